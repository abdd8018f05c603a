use crate::calc::{self, GradePoints, RankDirection, RankEntry, StudentSubjectMarks};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{coerce_number, parse_subject_result, required_array};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

// Pure calculations; none of these touch the workspace.

fn handle_grading_evaluate(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let gp = req
        .params
        .get("marks")
        .and_then(coerce_number)
        .map(calc::grade_and_points)
        .unwrap_or(GradePoints::INVALID);
    ok(
        &req.id,
        json!({
            "grade": gp.grade,
            "points": gp.points,
            "remarks": calc::remarks(gp.grade),
        }),
    )
}

fn handle_grading_division(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let points = req
        .params
        .get("points")
        .and_then(coerce_number)
        .filter(|p| *p >= 0.0 && p.fract() == 0.0 && *p <= u32::MAX as f64)
        .map(|p| p as u32);
    ok(
        &req.id,
        json!({ "points": points, "division": calc::division(points) }),
    )
}

fn handle_grading_best_seven(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let items = match required_array(req, "results") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut results = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match parse_subject_result(item) {
            Ok(r) => results.push(r),
            Err(msg) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("results[{}]: {}", i, msg),
                    None,
                )
            }
        }
    }
    ok(&req.id, json!(calc::best_seven(&results)))
}

fn handle_grading_statistics(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let items = match required_array(req, "marks") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let marks: Vec<f64> = items.iter().filter_map(coerce_number).collect();
    ok(
        &req.id,
        json!({
            "count": marks.len(),
            "statistics": calc::statistics(&marks),
        }),
    )
}

fn parse_direction(req: &Request) -> Result<RankDirection, Value> {
    match req.params.get("direction") {
        None | Some(Value::Null) => Ok(RankDirection::Desc),
        Some(v) => serde_json::from_value::<RankDirection>(v.clone()).map_err(|_| {
            err(
                &req.id,
                "bad_params",
                "direction must be one of: desc, asc",
                Some(json!({ "direction": v })),
            )
        }),
    }
}

fn handle_grading_rank(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let items = match required_array(req, "entries") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let direction = match parse_direction(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut entries = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let id = item
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let metric = item.get("metric").and_then(coerce_number);
        match (id, metric) {
            (Some(id), Some(metric)) => entries.push(RankEntry { id, metric }),
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("entries[{}] needs a string id and a numeric metric", i),
                    None,
                )
            }
        }
    }
    ok(
        &req.id,
        json!({ "ranked": calc::rank(&entries, direction) }),
    )
}

fn handle_grading_subject_positions(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let items = match required_array(req, "students") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let students: Vec<StudentSubjectMarks> = match serde_json::from_value(Value::Array(items.clone())) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({ "positions": calc::subject_positions(&students) }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.evaluate" => Some(handle_grading_evaluate(state, req)),
        "grading.division" => Some(handle_grading_division(state, req)),
        "grading.bestSeven" => Some(handle_grading_best_seven(state, req)),
        "grading.statistics" => Some(handle_grading_statistics(state, req)),
        "grading.rank" => Some(handle_grading_rank(state, req)),
        "grading.subjectPositions" => Some(handle_grading_subject_positions(state, req)),
        _ => None,
    }
}
