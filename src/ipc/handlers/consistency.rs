use crate::calc::CalcError;
use crate::consistency::{self, ConsistencyReport, DuplicateKeepPolicy, FixOptions, FixPlan};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{calc_err, db_conn, now_rfc3339, optional_bool, optional_str};
use crate::ipc::types::{AppState, Request};
use crate::records;
use rusqlite::Connection;
use serde_json::{json, Value};

fn scan(
    conn: &Connection,
    exam_id: Option<&str>,
    policy: DuplicateKeepPolicy,
) -> Result<ConsistencyReport, CalcError> {
    let results = records::load_stored_results(conn, exam_id)?;
    let known = records::load_known_entities(conn)?;
    Ok(consistency::check(&results, &known, policy))
}

/// `keepPolicy` from the request, else the workspace setting.
fn resolve_policy(
    req: &Request,
    settings: &setup::ConsistencySettings,
) -> Result<DuplicateKeepPolicy, Value> {
    match optional_str(req, "keepPolicy") {
        None => Ok(settings.keep_policy),
        Some(raw) => DuplicateKeepPolicy::parse(&raw).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "keepPolicy must be one of: latest, earliest",
                Some(json!({ "keepPolicy": raw })),
            )
        }),
    }
}

fn load_settings(
    conn: &Connection,
    req: &Request,
) -> Result<setup::ConsistencySettings, Value> {
    setup::load_consistency_settings(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn handle_consistency_check(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match load_settings(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match resolve_policy(req, &settings) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = optional_str(req, "examId");

    let report = match scan(conn, exam_id.as_deref(), policy) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    if !report.summary.is_clean() {
        tracing::info!(
            scanned = report.summary.scanned,
            duplicate_groups = report.summary.duplicate_groups,
            incorrect = report.summary.incorrect_grades_or_points,
            orphaned = report.summary.orphaned,
            "consistency issues found"
        );
    }

    let mut out = json!(report);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("keepPolicy".into(), json!(policy.as_str()));
        obj.insert("examId".into(), json!(exam_id));
    }
    ok(&req.id, out)
}

fn apply_plan(conn: &Connection, plan: &FixPlan) -> Result<(usize, usize), (&'static str, String)> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| ("db_tx_failed", e.to_string()))?;

    let mut deleted = 0_usize;
    for id in &plan.delete_ids {
        match tx.execute("DELETE FROM results WHERE id = ?", [id]) {
            Ok(n) => deleted += n,
            Err(e) => {
                let _ = tx.rollback();
                return Err(("db_delete_failed", e.to_string()));
            }
        }
    }

    let now = now_rfc3339();
    let mut updated = 0_usize;
    for u in &plan.grade_updates {
        match tx.execute(
            "UPDATE results SET grade = ?, points = ?, updated_at = ? WHERE id = ?",
            (u.grade.as_str(), u.points as i64, &now, &u.result_id),
        ) {
            Ok(n) => updated += n,
            Err(e) => {
                let _ = tx.rollback();
                return Err(("db_update_failed", e.to_string()));
            }
        }
    }

    tx.commit().map_err(|e| ("db_commit_failed", e.to_string()))?;
    Ok((deleted, updated))
}

fn handle_consistency_fix(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match load_settings(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let policy = match resolve_policy(req, &settings) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let defaults = FixOptions::default();
    let mut options = FixOptions {
        remove_orphaned: settings.remove_orphaned_on_fix,
        ..defaults
    };
    for (key, slot) in [
        ("duplicates", &mut options.duplicates),
        ("grades", &mut options.grades),
        ("removeOrphaned", &mut options.remove_orphaned),
    ] {
        match optional_bool(req, key) {
            Ok(Some(v)) => *slot = v,
            Ok(None) => {}
            Err(e) => return e,
        }
    }
    let dry_run = match optional_bool(req, "dryRun") {
        Ok(v) => v.unwrap_or(false),
        Err(e) => return e,
    };
    let exam_id = optional_str(req, "examId");

    let before = match scan(conn, exam_id.as_deref(), policy) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    let plan = consistency::plan_fixes(&before, options);

    if dry_run || plan.is_empty() {
        return ok(
            &req.id,
            json!({
                "dryRun": dry_run,
                "deleted": 0,
                "updated": 0,
                "plan": plan,
                "summary": before.summary,
            }),
        );
    }

    let (deleted, updated) = match apply_plan(conn, &plan) {
        Ok(v) => v,
        Err((code, msg)) => {
            tracing::warn!(code, %msg, "consistency fix rolled back");
            return err(&req.id, code, msg, Some(json!({ "table": "results" })));
        }
    };
    tracing::info!(deleted, updated, keep_policy = policy.as_str(), "consistency fix applied");

    let after = match scan(conn, exam_id.as_deref(), policy) {
        Ok(v) => v,
        Err(e) => return calc_err(req, e),
    };
    ok(
        &req.id,
        json!({
            "dryRun": false,
            "deleted": deleted,
            "updated": updated,
            "plan": plan,
            "summary": after.summary,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "consistency.check" => Some(handle_consistency_check(state, req)),
        "consistency.fix" => Some(handle_consistency_fix(state, req)),
        _ => None,
    }
}
