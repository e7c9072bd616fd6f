use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Assessments,
    Programme,
    Announcements,
    Messaging,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "assessments" => Some(Self::Assessments),
            "programme" => Some(Self::Programme),
            "announcements" => Some(Self::Announcements),
            "messaging" => Some(Self::Messaging),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Assessments => "setup.assessments",
            Self::Programme => "setup.programme",
            Self::Announcements => "setup.announcements",
            Self::Messaging => "setup.messaging",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Assessments => json!({
            "defaultStatus": "planned",
            "defaultDurationMinutes": 60,
            "defaultTargetPercentage": 70
        }),
        SetupSection::Programme => json!({
            "defaultPerTermCount": 4,
            "maxPerTermCount": 20
        }),
        SetupSection::Announcements => json!({
            "defaultAudience": ["learner", "parent", "teacher", "smt"],
            "pinnedLimit": 5
        }),
        SetupSection::Messaging => json!({
            "maxBodyChars": 2000
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_role_array(v: &Value, key: &str) -> Result<Vec<String>, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be array of roles", key))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let role = item
            .as_str()
            .ok_or_else(|| format!("{} must be array of roles", key))?
            .trim()
            .to_ascii_lowercase();
        if !matches!(role.as_str(), "learner" | "parent" | "teacher" | "smt") {
            return Err(format!(
                "{} roles must be one of: learner, parent, teacher, smt",
                key
            ));
        }
        if !out.contains(&role) {
            out.push(role);
        }
    }
    if out.is_empty() {
        return Err(format!("{} must contain at least one role", key));
    }
    Ok(out)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Assessments => match k.as_str() {
                "defaultStatus" => {
                    let s = v
                        .as_str()
                        .ok_or_else(|| format!("{} must be string", k))?
                        .trim()
                        .to_ascii_lowercase();
                    if !matches!(s.as_str(), "planned" | "written" | "marked" | "moderated") {
                        return Err(
                            "defaultStatus must be one of: planned, written, marked, moderated"
                                .into(),
                        );
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "defaultDurationMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 10, 300)?));
                }
                "defaultTargetPercentage" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 100)?));
                }
                _ => return Err(format!("unknown assessments field: {}", k)),
            },
            SetupSection::Programme => match k.as_str() {
                "defaultPerTermCount" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 12)?));
                }
                "maxPerTermCount" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 60)?));
                }
                _ => return Err(format!("unknown programme field: {}", k)),
            },
            SetupSection::Announcements => match k.as_str() {
                "defaultAudience" => {
                    let roles = parse_role_array(v, k)?;
                    obj.insert(k.clone(), json!(roles));
                }
                "pinnedLimit" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 20)?));
                }
                _ => return Err(format!("unknown announcements field: {}", k)),
            },
            SetupSection::Messaging => match k.as_str() {
                "maxBodyChars" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 80, 10000)?));
                }
                _ => return Err(format!("unknown messaging field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block setup UI.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let assessments = match load_section(conn, SetupSection::Assessments) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let programme = match load_section(conn, SetupSection::Programme) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let announcements = match load_section(conn, SetupSection::Announcements) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let messaging = match load_section(conn, SetupSection::Messaging) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "assessments": assessments,
            "programme": programme,
            "announcements": announcements,
            "messaging": messaging
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
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
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
