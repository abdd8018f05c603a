use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{calc_err, db_conn, now_rfc3339, required_str};
use crate::ipc::types::{AppState, Request};
use crate::records;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

/// `subjectIds`: missing or null means "not recorded"; an array replaces
/// the student's optional-subject selection.
fn parse_subject_ids(req: &Request) -> Result<Option<Vec<String>>, serde_json::Value> {
    match req.params.get("subjectIds") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Array(items)) => {
            let mut ids: Vec<String> = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let Some(id) = item.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                    return Err(err(
                        &req.id,
                        "bad_params",
                        format!("subjectIds[{}] must be a non-empty string", i),
                        None,
                    ));
                };
                if !ids.iter().any(|existing| existing == id) {
                    ids.push(id.to_string());
                }
            }
            Ok(Some(ids))
        }
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            "subjectIds must be an array or null",
            None,
        )),
    }
}

fn check_subjects_exist(
    conn: &Connection,
    req: &Request,
    ids: &[String],
) -> Result<(), serde_json::Value> {
    for id in ids {
        match records::subject_exists(conn, id) {
            Ok(true) => {}
            Ok(false) => {
                return Err(err(
                    &req.id,
                    "not_found",
                    "subject not found",
                    Some(json!({ "subjectId": id })),
                ))
            }
            Err(e) => return Err(calc_err(req, e)),
        }
    }
    Ok(())
}

fn write_selection(
    conn: &Connection,
    student_id: &str,
    selection: Option<&[String]>,
) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM student_subjects WHERE student_id = ?",
        [student_id],
    )?;
    for subject_id in selection.unwrap_or(&[]) {
        conn.execute(
            "INSERT INTO student_subjects(student_id, subject_id) VALUES(?, ?)",
            (student_id, subject_id),
        )?;
    }
    conn.execute(
        "UPDATE students SET subjects_recorded = ?, updated_at = ? WHERE id = ?",
        (selection.is_some() as i64, now_rfc3339(), student_id),
    )?;
    Ok(())
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match records::load_roster(conn, &class_id) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => calc_err(req, e),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let selection = match parse_subject_ids(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match records::class_name(conn, &class_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "class not found", None),
        Err(e) => return calc_err(req, e),
    }
    if let Some(ids) = selection.as_deref() {
        if let Err(e) = check_subjects_exist(conn, req, ids) {
            return e;
        }
    }

    let next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO students(id, class_id, name, active, sort_order, updated_at)
         VALUES(?, ?, ?, 1, ?, ?)",
        (&student_id, &class_id, &name, next_sort, now_rfc3339()),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    if let Err(e) = write_selection(&tx, &student_id, selection.as_deref()) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "student_subjects" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(student_id = %student_id, class_id = %class_id, "student created");
    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_set_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let selection = match parse_subject_ids(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match records::find_student(conn, &student_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return calc_err(req, e),
    }
    if let Some(ids) = selection.as_deref() {
        if let Err(e) = check_subjects_exist(conn, req, ids) {
            return e;
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = write_selection(&tx, &student_id, selection.as_deref()) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "student_subjects" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "subjectsRecorded": selection.is_some(),
            "subjectIds": selection.unwrap_or_default()
        }),
    )
}

/// Results are left in place and surface as orphans in the consistency check.
fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM student_subjects WHERE student_id = ?",
        [&student_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "student_subjects" })),
        );
    }
    let removed = match tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            );
        }
    };
    if removed == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "student not found", None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.setSubjects" => Some(handle_students_set_subjects(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
