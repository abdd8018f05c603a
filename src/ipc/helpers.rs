use crate::calc::{CalcError, Grade, SubjectResult};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use serde_json::{json, Value};

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn optional_bool(req: &Request, key: &str) -> Result<Option<bool>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be boolean", key),
            None,
        )),
    }
}

pub fn required_array<'a>(req: &'a Request, key: &str) -> Result<&'a Vec<Value>, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| err(&req.id, "bad_params", format!("{} must be an array", key), None))
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn calc_err(req: &Request, e: CalcError) -> Value {
    tracing::warn!(method = %req.method, code = %e.code, message = %e.message, "request failed");
    err(&req.id, &e.code, e.message, e.details)
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Reads a JSON number or numeric string. Anything else is `None`.
pub fn coerce_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Validated marks for entry: a number in 0..=100.
pub fn parse_entry_marks(v: Option<&Value>) -> Result<f64, String> {
    let Some(v) = v else {
        return Err("missing marks".to_string());
    };
    let Some(marks) = coerce_number(v) else {
        return Err("marks must be a number".to_string());
    };
    if !(0.0..=100.0).contains(&marks) {
        return Err(format!("marks must be between 0 and 100, got {}", marks));
    }
    Ok(marks)
}

fn str_field(obj: &serde_json::Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Normalizes a caller-supplied result object. Marks may arrive as
/// `marksObtained` or `marks`, as numbers or numeric strings.
pub fn parse_subject_result(v: &Value) -> Result<SubjectResult, String> {
    let Some(obj) = v.as_object() else {
        return Err("result must be an object".to_string());
    };
    let marks = obj
        .get("marksObtained")
        .or_else(|| obj.get("marks"))
        .and_then(coerce_number);
    let grade = obj
        .get("grade")
        .and_then(|g| g.as_str())
        .and_then(Grade::parse);
    let points = obj
        .get("points")
        .and_then(coerce_number)
        .filter(|p| p.fract() == 0.0 && (0.0..=5.0).contains(p))
        .map(|p| p as u8);

    Ok(SubjectResult {
        id: str_field(obj, "id"),
        student_id: str_field(obj, "studentId"),
        exam_id: str_field(obj, "examId"),
        subject_id: str_field(obj, "subjectId"),
        class_id: str_field(obj, "classId"),
        academic_year_id: str_field(obj, "academicYearId"),
        marks_obtained: marks,
        grade,
        points,
        comment: obj
            .get("comment")
            .and_then(|c| c.as_str())
            .map(|c| c.to_string()),
    })
}

pub fn item_error(index: usize, code: &str, message: impl Into<String>) -> Value {
    json!({
        "index": index,
        "code": code,
        "message": message.into(),
    })
}
