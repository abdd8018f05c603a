use crate::consistency::DuplicateKeepPolicy;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use crate::report::ReportOptions;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Reports,
    Consistency,
}

impl SetupSection {
    const ALL: [SetupSection; 2] = [SetupSection::Reports, SetupSection::Consistency];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "reports" => Some(Self::Reports),
            "consistency" => Some(Self::Consistency),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Reports => "reports",
            Self::Consistency => "consistency",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Reports => "setup.reports",
            Self::Consistency => "setup.consistency",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Reports => json!({
            "assumeAllSubjectsWhenUnselected": true,
            "includeSubjectPositions": true
        }),
        SetupSection::Consistency => json!({
            "duplicateKeepPolicy": DuplicateKeepPolicy::default().as_str(),
            "removeOrphanedOnFix": false
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Reports => match k.as_str() {
                "assumeAllSubjectsWhenUnselected" | "includeSubjectPositions" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
            SetupSection::Consistency => match k.as_str() {
                "duplicateKeepPolicy" => {
                    let policy = v
                        .as_str()
                        .and_then(DuplicateKeepPolicy::parse)
                        .ok_or_else(|| {
                            "duplicateKeepPolicy must be one of: latest, earliest".to_string()
                        })?;
                    obj.insert(k.clone(), Value::String(policy.as_str().to_string()));
                }
                "removeOrphanedOnFix" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown consistency field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults field by field.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), %msg, "ignoring saved setting");
            }
        }
    }
    Ok(current)
}

fn bool_field(section: &Value, key: &str, default: bool) -> bool {
    section.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn load_report_options(conn: &rusqlite::Connection) -> anyhow::Result<ReportOptions> {
    let section = load_section(conn, SetupSection::Reports)?;
    let defaults = ReportOptions::default();
    Ok(ReportOptions {
        assume_all_subjects_when_unselected: bool_field(
            &section,
            "assumeAllSubjectsWhenUnselected",
            defaults.assume_all_subjects_when_unselected,
        ),
        include_subject_positions: bool_field(
            &section,
            "includeSubjectPositions",
            defaults.include_subject_positions,
        ),
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsistencySettings {
    pub keep_policy: DuplicateKeepPolicy,
    pub remove_orphaned_on_fix: bool,
}

pub fn load_consistency_settings(
    conn: &rusqlite::Connection,
) -> anyhow::Result<ConsistencySettings> {
    let section = load_section(conn, SetupSection::Consistency)?;
    Ok(ConsistencySettings {
        keep_policy: section
            .get("duplicateKeepPolicy")
            .and_then(|v| v.as_str())
            .and_then(DuplicateKeepPolicy::parse)
            .unwrap_or_default(),
        remove_orphaned_on_fix: bool_field(&section, "removeOrphanedOnFix", false),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(
            &req.id,
            "bad_params",
            "unknown section",
            Some(json!({ "section": section_raw })),
        );
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "settings updated");
    ok(
        &req.id,
        json!({ "ok": true, "section": section.name(), "values": current }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
