use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_string_array, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const ROLES: [&str; 4] = ["learner", "parent", "teacher", "smt"];

fn validate_roles(roles: &[String]) -> Result<(), String> {
    for role in roles {
        if !ROLES.contains(&role.as_str()) {
            return Err(format!(
                "unknown audience role: {} (expected one of learner, parent, teacher, smt)",
                role
            ));
        }
    }
    Ok(())
}

fn default_audience(conn: &rusqlite::Connection) -> Vec<String> {
    db::settings_get_json(conn, "setup.announcements")
        .ok()
        .flatten()
        .and_then(|v| {
            v.get("defaultAudience").and_then(|a| {
                a.as_array().map(|arr| {
                    arr.iter()
                        .filter_map(|r| r.as_str().map(|s| s.to_string()))
                        .collect::<Vec<_>>()
                })
            })
        })
        .filter(|roles| !roles.is_empty())
        .unwrap_or_else(|| ROLES.iter().map(|r| r.to_string()).collect())
}

fn row_json(
    id: String,
    title: String,
    body: String,
    audience_raw: String,
    created_by: String,
    pinned: bool,
    created_at: String,
    updated_at: Option<String>,
) -> serde_json::Value {
    let audience: Vec<String> = serde_json::from_str(&audience_raw).unwrap_or_default();
    json!({
        "id": id,
        "title": title,
        "body": body,
        "audience": audience,
        "createdBy": created_by,
        "pinned": pinned,
        "createdAt": created_at,
        "updatedAt": updated_at,
    })
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let role = req
        .params
        .get("audience")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if let Some(role) = &role {
        if let Err(m) = validate_roles(std::slice::from_ref(role)) {
            return err(&req.id, "bad_params", m, None);
        }
    }

    let mut stmt = match conn.prepare(
        "SELECT id, title, body, audience_json, created_by, pinned, created_at, updated_at
         FROM announcements
         ORDER BY pinned DESC, created_at DESC, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            Ok(row_json(
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, i64>(5)? != 0,
                r.get::<_, String>(6)?,
                r.get::<_, Option<String>>(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Audience filtering happens on the decoded role list, not in SQL: the
    // column holds a JSON array.
    let filtered: Vec<serde_json::Value> = match role {
        Some(role) => rows
            .into_iter()
            .filter(|a| {
                a.get("audience")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().any(|r| r.as_str() == Some(role.as_str())))
                    .unwrap_or(false)
            })
            .collect(),
        None => rows,
    };

    ok(&req.id, json!({ "announcements": filtered }))
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let body = match required_str(req, "body") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let created_by = match required_str(req, "createdBy") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let audience = match parse_string_array(req.params.get("audience")) {
        Ok(v) if v.is_empty() => default_audience(conn),
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("audience {}", m), None),
    };
    if let Err(m) = validate_roles(&audience) {
        return err(&req.id, "bad_params", m, None);
    }

    let id = Uuid::new_v4().to_string();
    let audience_raw = serde_json::to_string(&audience).unwrap_or_else(|_| "[]".to_string());
    if let Err(e) = conn.execute(
        "INSERT INTO announcements(id, title, body, audience_json, created_by, pinned, created_at)
         VALUES(?, ?, ?, ?, ?, 0, ?)",
        (&id, &title, &body, &audience_raw, &created_by, now_ts()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "announcements" })),
        );
    }

    ok(&req.id, json!({ "announcementId": id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let announcement_id = match required_str(req, "announcementId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM announcements WHERE id = ?",
            [&announcement_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "announcement not found", None);
    }

    if let Some(v) = patch.get("title") {
        let Some(title) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return err(&req.id, "bad_params", "title must not be empty", None);
        };
        if let Err(e) = conn.execute(
            "UPDATE announcements SET title = ?, updated_at = ? WHERE id = ?",
            (title, now_ts(), &announcement_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = patch.get("body") {
        let Some(body) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return err(&req.id, "bad_params", "body must not be empty", None);
        };
        if let Err(e) = conn.execute(
            "UPDATE announcements SET body = ?, updated_at = ? WHERE id = ?",
            (body, now_ts(), &announcement_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if patch.contains_key("audience") {
        let audience = match parse_string_array(patch.get("audience")) {
            Ok(v) => v,
            Err(m) => return err(&req.id, "bad_params", format!("audience {}", m), None),
        };
        if audience.is_empty() {
            return err(&req.id, "bad_params", "audience must not be empty", None);
        }
        if let Err(m) = validate_roles(&audience) {
            return err(&req.id, "bad_params", m, None);
        }
        let audience_raw = serde_json::to_string(&audience).unwrap_or_else(|_| "[]".to_string());
        if let Err(e) = conn.execute(
            "UPDATE announcements SET audience_json = ?, updated_at = ? WHERE id = ?",
            (&audience_raw, now_ts(), &announcement_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = patch.get("pinned") {
        let Some(pinned) = v.as_bool() else {
            return err(&req.id, "bad_params", "pinned must be boolean", None);
        };
        if let Err(e) = conn.execute(
            "UPDATE announcements SET pinned = ?, updated_at = ? WHERE id = ?",
            (pinned as i64, now_ts(), &announcement_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let announcement_id = match required_str(req, "announcementId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let deleted = match conn.execute(
        "DELETE FROM announcements WHERE id = ?",
        [&announcement_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "announcement not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "announcements.list" => Some(handle_list(state, req)),
        "announcements.create" => Some(handle_create(state, req)),
        "announcements.update" => Some(handle_update(state, req)),
        "announcements.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
