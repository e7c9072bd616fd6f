use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ms, now_ts, parse_opt_i64, parse_string_array, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn max_body_chars(conn: &rusqlite::Connection) -> usize {
    db::settings_get_json(conn, "setup.messaging")
        .ok()
        .flatten()
        .and_then(|v| v.get("maxBodyChars").and_then(|n| n.as_u64()))
        .filter(|n| *n >= 1)
        .unwrap_or(2000) as usize
}

/// First send with a participant list creates the thread; later sends address
/// it by id. One write per message plus a touch on the thread marker. No
/// delivery guarantees beyond insertion order.
fn handle_send(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let sender_id = match required_str(req, "senderId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let sender_role = req
        .params
        .get("senderRole")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let body = match required_str(req, "body") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if body.chars().count() > max_body_chars(conn) {
        return err(
            &req.id,
            "bad_params",
            format!("body must not exceed {} characters", max_body_chars(conn)),
            None,
        );
    }

    let thread_id = match req.params.get("threadId").and_then(|v| v.as_str()) {
        Some(existing) => {
            let found: Option<String> = match conn
                .query_row(
                    "SELECT id FROM message_threads WHERE id = ?",
                    [existing],
                    |r| r.get(0),
                )
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            let Some(id) = found else {
                return err(&req.id, "not_found", "thread not found", None);
            };
            id
        }
        None => {
            let mut participants = match parse_string_array(req.params.get("participants")) {
                Ok(v) => v,
                Err(m) => return err(&req.id, "bad_params", format!("participants {}", m), None),
            };
            if participants.is_empty() {
                return err(
                    &req.id,
                    "bad_params",
                    "either threadId or participants is required",
                    None,
                );
            }
            if !participants.contains(&sender_id) {
                participants.push(sender_id.clone());
            }
            let id = Uuid::new_v4().to_string();
            let participants_raw =
                serde_json::to_string(&participants).unwrap_or_else(|_| "[]".to_string());
            if let Err(e) = conn.execute(
                "INSERT INTO message_threads(id, participants_json, created_at) VALUES(?, ?, ?)",
                (&id, &participants_raw, now_ts()),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "message_threads" })),
                );
            }
            id
        }
    };

    let message_id = Uuid::new_v4().to_string();
    let sent_at = now_ms();
    if let Err(e) = conn.execute(
        "INSERT INTO messages(id, thread_id, sender_id, sender_role, body, sent_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&message_id, &thread_id, &sender_id, &sender_role, &body, sent_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "messages" })),
        );
    }
    if let Err(e) = conn.execute(
        "UPDATE message_threads SET last_message_at = ? WHERE id = ?",
        (sent_at.to_string(), &thread_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "threadId": thread_id, "messageId": message_id, "sentAt": sent_at }),
    )
}

fn handle_messages_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let thread_id = match required_str(req, "threadId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Poll-style listening: pass the last seen sentAt to fetch only newer rows.
    let since_ts = match parse_opt_i64(req.params.get("sinceTs")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("sinceTs {}", m), None),
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM message_threads WHERE id = ?",
            [&thread_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "thread not found", None);
    }

    let mut stmt = match conn.prepare(
        "SELECT id, sender_id, sender_role, body, sent_at
         FROM messages
         WHERE thread_id = ? AND sent_at > ?
         ORDER BY sent_at, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&thread_id, since_ts.unwrap_or(-1)), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "senderId": r.get::<_, String>(1)?,
                "senderRole": r.get::<_, Option<String>>(2)?,
                "body": r.get::<_, String>(3)?,
                "sentAt": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(messages) => ok(&req.id, json!({ "messages": messages })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_threads_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let participant_id = match required_str(req, "participantId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, participants_json, created_at, last_message_at
         FROM message_threads
         ORDER BY last_message_at DESC, created_at DESC, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            let participants_raw: String = r.get(1)?;
            let participants: Vec<String> =
                serde_json::from_str(&participants_raw).unwrap_or_default();
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "participants": participants,
                "createdAt": r.get::<_, String>(2)?,
                "lastMessageAt": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let threads: Vec<serde_json::Value> = rows
        .into_iter()
        .filter(|t| {
            t.get("participants")
                .and_then(|v| v.as_array())
                .map(|arr| arr.iter().any(|p| p.as_str() == Some(participant_id.as_str())))
                .unwrap_or(false)
        })
        .collect();

    ok(&req.id, json!({ "threads": threads }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "messages.send" => Some(handle_send(state, req)),
        "messages.list" => Some(handle_messages_list(state, req)),
        "threads.list" => Some(handle_threads_list(state, req)),
        _ => None,
    }
}
