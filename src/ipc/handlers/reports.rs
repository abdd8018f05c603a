use crate::calc::{CalcError, SubjectResult};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{calc_err, db_conn, optional_bool, required_str};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, ExamRow};
use crate::report::{self, ClassReport, ReportOptions, RosterStudent, StudentReport, Subject};
use rusqlite::Connection;
use serde_json::json;

/// Everything a class report reads, loaded up front.
struct ClassContext {
    class_name: String,
    exam: ExamRow,
    roster: Vec<RosterStudent>,
    catalog: Vec<Subject>,
    results: Vec<SubjectResult>,
    options: ReportOptions,
}

fn load_class_context(
    conn: &Connection,
    class_id: &str,
    exam_id: &str,
) -> Result<ClassContext, CalcError> {
    let Some(class_name) = records::class_name(conn, class_id)? else {
        return Err(CalcError::new("not_found", "class not found")
            .with_details(json!({ "classId": class_id })));
    };
    let Some(exam) = records::find_exam(conn, exam_id)? else {
        return Err(CalcError::new("not_found", "exam not found")
            .with_details(json!({ "examId": exam_id })));
    };
    let options = setup::load_report_options(conn).map_err(CalcError::db)?;
    Ok(ClassContext {
        class_name,
        exam,
        roster: records::load_roster(conn, class_id)?,
        catalog: records::load_catalog(conn)?,
        results: records::load_exam_results(conn, exam_id)?,
        options,
    })
}

fn class_report(class_id: &str, ctx: &ClassContext) -> ClassReport {
    report::build_class_report(
        class_id,
        &ctx.exam.id,
        &ctx.roster,
        &ctx.results,
        &ctx.catalog,
        &ctx.options,
    )
}

fn handle_reports_class_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = match load_class_context(conn, &class_id, &exam_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let report = class_report(&class_id, &ctx);
    tracing::debug!(
        class_id = %class_id,
        exam_id = %exam_id,
        students = report.student_count,
        classified = report.division_summary.total(),
        "class report built"
    );
    let mut out = json!(report);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("className".into(), json!(ctx.class_name));
        obj.insert("examName".into(), json!(ctx.exam.name));
    }
    ok(&req.id, out)
}

fn handle_reports_student_report(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let include_class_context = match optional_bool(req, "includeClassContext") {
        Ok(v) => v.unwrap_or(true),
        Err(e) => return e,
    };

    let student = match records::find_student(conn, &student_id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return calc_err(req, e),
    };
    let ctx = match load_class_context(conn, &student.class_id, &exam_id) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };

    let from_class = if include_class_context {
        StudentReport::from_class_report(&class_report(&student.class_id, &ctx), &student_id)
    } else {
        None
    };
    // Inactive students are not on the roster; they get a report without rank.
    let report = from_class.unwrap_or_else(|| {
        let roster_entry = ctx
            .roster
            .iter()
            .find(|s| s.id == student_id)
            .cloned()
            .unwrap_or_else(|| RosterStudent {
                id: student.id.clone(),
                name: student.name.clone(),
                selected_subject_ids: None,
            });
        report::build_student_report(
            &roster_entry,
            &ctx.exam.id,
            &ctx.results,
            &ctx.catalog,
            &ctx.options,
        )
    });
    tracing::debug!(
        student_id = %student_id,
        division = report.student.division.as_str(),
        ranked = report.student.rank.is_some(),
        "student report built"
    );

    let mut out = json!(report);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("className".into(), json!(ctx.class_name));
        obj.insert("examName".into(), json!(ctx.exam.name));
    }
    ok(&req.id, out)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.classReport" => Some(handle_reports_class_report(state, req)),
        "reports.studentReport" => Some(handle_reports_student_report(state, req)),
        _ => None,
    }
}
