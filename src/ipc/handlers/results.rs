use crate::calc::{self, CalcError};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    calc_err, db_conn, item_error, now_rfc3339, optional_str, parse_entry_marks, required_array,
    required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, ExamRow};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub const RESULTS_BULK_ENTER_MAX_ENTRIES: usize = 5000;

/// One validated mark ready to be written.
#[derive(Debug, Clone)]
struct Entry {
    student_id: String,
    exam_id: String,
    subject_id: String,
    class_id: String,
    academic_year_id: String,
    marks: f64,
    grade: calc::GradePoints,
    comment: Option<String>,
}

fn obj_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Checks references and marks; grade and points always come from the marks.
fn validate_entry(
    conn: &Connection,
    exam: &ExamRow,
    obj: &Map<String, Value>,
) -> Result<Entry, CalcError> {
    let Some(student_id) = obj_str(obj, "studentId") else {
        return Err(CalcError::new("bad_params", "missing studentId"));
    };
    let Some(subject_id) = obj_str(obj, "subjectId") else {
        return Err(CalcError::new("bad_params", "missing subjectId"));
    };
    let marks = parse_entry_marks(obj.get("marks").or_else(|| obj.get("marksObtained")))
        .map_err(|msg| CalcError::new("bad_params", msg))?;

    let Some(student) = records::find_student(conn, &student_id)? else {
        return Err(CalcError::new("not_found", "student not found")
            .with_details(json!({ "studentId": student_id })));
    };
    if !records::subject_exists(conn, &subject_id)? {
        return Err(CalcError::new("not_found", "subject not found")
            .with_details(json!({ "subjectId": subject_id })));
    }

    let academic_year_id = obj_str(obj, "academicYearId")
        .or_else(|| exam.academic_year_id.clone())
        .unwrap_or_default();
    let comment = obj
        .get("comment")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(Entry {
        student_id,
        exam_id: exam.id.clone(),
        subject_id,
        class_id: student.class_id,
        academic_year_id,
        marks,
        grade: calc::grade_and_points(marks),
        comment,
    })
}

/// Updates the newest row for the student/exam/subject/year, or inserts one.
/// Returns the row id and whether it was created.
fn write_entry(conn: &Connection, entry: &Entry) -> rusqlite::Result<(String, bool)> {
    let now = now_rfc3339();
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM results
             WHERE student_id = ? AND exam_id = ? AND subject_id = ?
               AND COALESCE(academic_year_id, '') = ?
             ORDER BY COALESCE(updated_at, created_at, '') DESC, rowid DESC
             LIMIT 1",
            (
                &entry.student_id,
                &entry.exam_id,
                &entry.subject_id,
                &entry.academic_year_id,
            ),
            |r| r.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE results
                 SET marks_obtained = ?, grade = ?, points = ?, comment = ?,
                     class_id = ?, updated_at = ?
                 WHERE id = ?",
                (
                    entry.marks,
                    entry.grade.grade.as_str(),
                    entry.grade.points as i64,
                    &entry.comment,
                    &entry.class_id,
                    &now,
                    &id,
                ),
            )?;
            Ok((id, false))
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO results(
                   id, student_id, exam_id, subject_id, class_id, academic_year_id,
                   marks_obtained, grade, points, comment, created_at, updated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    &id,
                    &entry.student_id,
                    &entry.exam_id,
                    &entry.subject_id,
                    &entry.class_id,
                    &entry.academic_year_id,
                    entry.marks,
                    entry.grade.grade.as_str(),
                    entry.grade.points as i64,
                    &entry.comment,
                    &now,
                    &now,
                ],
            )?;
            Ok((id, true))
        }
    }
}

fn load_exam(conn: &Connection, req: &Request, exam_id: &str) -> Result<ExamRow, Value> {
    match records::find_exam(conn, exam_id) {
        Ok(Some(exam)) => Ok(exam),
        Ok(None) => Err(err(
            &req.id,
            "not_found",
            "exam not found",
            Some(json!({ "examId": exam_id })),
        )),
        Err(e) => Err(calc_err(req, e)),
    }
}

fn handle_results_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(params) = req.params.as_object() else {
        return err(&req.id, "bad_params", "params must be an object", None);
    };
    let exam = match load_exam(conn, req, &exam_id) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let entry = match validate_entry(conn, &exam, params) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let (result_id, created) = match write_entry(conn, &entry) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "results" })),
            )
        }
    };
    ok(
        &req.id,
        json!({
            "resultId": result_id,
            "created": created,
            "marksObtained": entry.marks,
            "grade": entry.grade.grade,
            "points": entry.grade.points,
            "remarks": calc::remarks(entry.grade.grade),
        }),
    )
}

fn handle_results_bulk_enter(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let entries = match required_array(req, "entries") {
        Ok(v) => v,
        Err(e) => return e,
    };

    if entries.len() > RESULTS_BULK_ENTER_MAX_ENTRIES {
        let rejected = entries.len();
        return ok(
            &req.id,
            json!({
                "updated": 0,
                "rejected": rejected,
                "limitExceeded": true,
                "errors": [{
                    "index": -1,
                    "code": "too_many_entries",
                    "message": format!(
                        "bulk payload exceeds max entries: {} > {}",
                        rejected, RESULTS_BULK_ENTER_MAX_ENTRIES
                    )
                }]
            }),
        );
    }

    let exam = match load_exam(conn, req, &exam_id) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut valid: Vec<Entry> = Vec::with_capacity(entries.len());
    let mut errors: Vec<Value> = Vec::new();
    for (i, item) in entries.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            errors.push(item_error(i, "bad_params", format!("entry at index {} must be an object", i)));
            continue;
        };
        match validate_entry(conn, &exam, obj) {
            Ok(entry) => valid.push(entry),
            Err(e) => errors.push(item_error(i, &e.code, e.message)),
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let mut created = 0_usize;
    for entry in &valid {
        match write_entry(&tx, entry) {
            Ok((_, true)) => created += 1,
            Ok((_, false)) => {}
            Err(e) => {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": "results" })),
                );
            }
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(
        exam_id = %exam_id,
        updated = valid.len(),
        created,
        rejected = errors.len(),
        "bulk results entered"
    );
    ok(
        &req.id,
        json!({
            "updated": valid.len(),
            "created": created,
            "rejected": errors.len(),
            "errors": errors,
        }),
    )
}

fn handle_results_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = optional_str(req, "classId");

    let mut stmt = match conn.prepare(
        "SELECT id, student_id, subject_id, class_id, academic_year_id,
                marks_obtained, grade, points, comment, COALESCE(updated_at, created_at)
         FROM results
         WHERE exam_id = ?1 AND (?2 IS NULL OR class_id = ?2)
         ORDER BY student_id, subject_id, COALESCE(updated_at, created_at, ''), rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&exam_id, &class_id), |row| {
            let id: String = row.get(0)?;
            let student_id: Option<String> = row.get(1)?;
            let subject_id: Option<String> = row.get(2)?;
            let class_id: Option<String> = row.get(3)?;
            let academic_year_id: Option<String> = row.get(4)?;
            let marks_obtained: Option<f64> = row.get(5)?;
            let grade: Option<String> = row.get(6)?;
            let points: Option<i64> = row.get(7)?;
            let comment: Option<String> = row.get(8)?;
            let updated_at: Option<String> = row.get(9)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "subjectId": subject_id,
                "classId": class_id,
                "academicYearId": academic_year_id,
                "marksObtained": marks_obtained,
                "grade": grade,
                "points": points,
                "comment": comment,
                "updatedAt": updated_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_results_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let result_id = match required_str(req, "resultId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.execute("DELETE FROM results WHERE id = ?", [&result_id]) {
        Ok(0) => err(&req.id, "not_found", "result not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "results" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.upsert" => Some(handle_results_upsert(state, req)),
        "results.bulkEnter" => Some(handle_results_bulk_enter(state, req)),
        "results.list" => Some(handle_results_list(state, req)),
        "results.delete" => Some(handle_results_delete(state, req)),
        _ => None,
    }
}
