use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const STATUS_PENDING: &str = "pending";
const STATUS_REVIEWING: &str = "reviewing";
const STATUS_ACCEPTED: &str = "accepted";
const STATUS_REJECTED: &str = "rejected";

fn validate_status(status: &str) -> bool {
    matches!(
        status,
        STATUS_PENDING | STATUS_REVIEWING | STATUS_ACCEPTED | STATUS_REJECTED
    )
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(input) = req.params.get("application").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "application must be an object", None);
    };

    let mut fields = Vec::new();
    for key in ["learnerName", "grade", "parentName", "contactEmail"] {
        let Some(value) = input
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return err(&req.id, "bad_params", format!("missing application.{}", key), None);
        };
        fields.push(value.to_string());
    }
    let notes = match parse_opt_string(input.get("notes")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("notes {}", m), None),
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO admissions_applications(
            id, learner_name, grade, parent_name, contact_email, notes, status, submitted_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &fields[0],
            &fields[1],
            &fields[2],
            &fields[3],
            &notes,
            STATUS_PENDING,
            now_ts(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "admissions_applications" })),
        );
    }

    ok(
        &req.id,
        json!({ "applicationId": id, "status": STATUS_PENDING }),
    )
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let status = req
        .params
        .get("status")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty());
    if let Some(status) = &status {
        if !validate_status(status) {
            return err(
                &req.id,
                "bad_params",
                "status must be one of: pending, reviewing, accepted, rejected",
                None,
            );
        }
    }

    let sql = if status.is_some() {
        "SELECT id, learner_name, grade, parent_name, contact_email, notes, status, reviewed_by, submitted_at, updated_at
         FROM admissions_applications
         WHERE status = ?
         ORDER BY submitted_at, id"
    } else {
        "SELECT id, learner_name, grade, parent_name, contact_email, notes, status, reviewed_by, submitted_at, updated_at
         FROM admissions_applications
         ORDER BY submitted_at, id"
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "learnerName": r.get::<_, String>(1)?,
            "grade": r.get::<_, String>(2)?,
            "parentName": r.get::<_, String>(3)?,
            "contactEmail": r.get::<_, String>(4)?,
            "notes": r.get::<_, Option<String>>(5)?,
            "status": r.get::<_, String>(6)?,
            "reviewedBy": r.get::<_, Option<String>>(7)?,
            "submittedAt": r.get::<_, String>(8)?,
            "updatedAt": r.get::<_, Option<String>>(9)?,
        }))
    };
    let rows = if let Some(status) = &status {
        stmt.query_map([status], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        stmt.query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match rows {
        Ok(applications) => ok(&req.id, json!({ "applications": applications })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_update_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let application_id = match required_str(req, "applicationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match required_str(req, "status") {
        Ok(v) => v.to_ascii_lowercase(),
        Err(e) => return e,
    };
    if !validate_status(&status) {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: pending, reviewing, accepted, rejected",
            None,
        );
    }
    let reviewed_by = match parse_opt_string(req.params.get("reviewedBy")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("reviewedBy {}", m), None),
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM admissions_applications WHERE id = ?",
            [&application_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "application not found", None);
    }

    if let Err(e) = conn.execute(
        "UPDATE admissions_applications
         SET status = ?, reviewed_by = COALESCE(?, reviewed_by), updated_at = ?
         WHERE id = ?",
        (&status, &reviewed_by, now_ts(), &application_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true, "status": status }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admissions.submit" => Some(handle_submit(state, req)),
        "admissions.list" => Some(handle_list(state, req)),
        "admissions.updateStatus" => Some(handle_update_status(state, req)),
        _ => None,
    }
}
