use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, load_planner_doc, now_ms, required_str, save_planner_doc};
use crate::ipc::types::{AppState, Request};
use crate::scheduler::{self, TERM_COUNT};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

struct ProgrammeDefaults {
    default_per_term_count: usize,
    max_per_term_count: usize,
}

fn load_programme_defaults(conn: &Connection) -> ProgrammeDefaults {
    let obj = db::settings_get_json(conn, "setup.programme")
        .ok()
        .flatten()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    let default_per_term_count = obj
        .get("defaultPerTermCount")
        .and_then(|v| v.as_u64())
        .filter(|v| *v >= 1)
        .unwrap_or(4) as usize;
    let max_per_term_count = obj
        .get("maxPerTermCount")
        .and_then(|v| v.as_u64())
        .filter(|v| *v >= 1)
        .unwrap_or(20) as usize;
    ProgrammeDefaults {
        default_per_term_count,
        max_per_term_count,
    }
}

fn default_status(conn: &Connection) -> String {
    db::settings_get_json(conn, "setup.assessments")
        .ok()
        .flatten()
        .and_then(|v| {
            v.get("defaultStatus")
                .and_then(|s| s.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "planned".to_string())
}

/// Requested counts per term: either an explicit four-entry array, a single
/// count applied to every term, or the configured default when neither is
/// given.
fn parse_counts(
    req: &Request,
    defaults: &ProgrammeDefaults,
) -> Result<[usize; TERM_COUNT], serde_json::Value> {
    if let Some(raw) = req.params.get("counts").filter(|v| !v.is_null()) {
        let Some(arr) = raw.as_array().filter(|a| a.len() == TERM_COUNT) else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("counts must be an array of {} integers", TERM_COUNT),
                None,
            ));
        };
        let mut out = [0usize; TERM_COUNT];
        for (i, v) in arr.iter().enumerate() {
            let Some(n) = v.as_u64() else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "counts entries must be non-negative integers",
                    None,
                ));
            };
            out[i] = n as usize;
        }
        return Ok(out);
    }
    if let Some(raw) = req.params.get("countPerTerm").filter(|v| !v.is_null()) {
        let Some(n) = raw.as_u64().filter(|n| *n >= 1) else {
            return Err(err(
                &req.id,
                "bad_params",
                "countPerTerm must be a positive integer",
                None,
            ));
        };
        return Ok([n as usize; TERM_COUNT]);
    }
    Ok([defaults.default_per_term_count; TERM_COUNT])
}

fn handle_auto_plan(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject = match required_str(req, "subject") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade = match required_str(req, "grade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let defaults = load_programme_defaults(conn);
    let counts = match parse_counts(req, &defaults) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if counts.iter().any(|n| *n > defaults.max_per_term_count) {
        return err(
            &req.id,
            "bad_params",
            format!("counts must not exceed {}", defaults.max_per_term_count),
            None,
        );
    }

    let mut doc = match load_planner_doc(conn, req, &teacher_id) {
        Ok(d) => d,
        Err(e) => return e,
    };

    // Destructive replan: the existing programme for this subject/grade pair is
    // replaced, not merged.
    let status = default_status(conn);
    let outcome = scheduler::plan_programme(&mut doc, &subject, &grade, &counts, now_ms(), &status);

    if let Err(e) = save_planner_doc(conn, req, &teacher_id, &doc) {
        return e;
    }

    info!(
        subject = %subject,
        grade = %grade,
        scheduled = outcome.scheduled.len(),
        skipped = outcome.skipped.len(),
        "programme auto-plan finished"
    );

    ok(
        &req.id,
        json!({
            "scheduledCount": outcome.scheduled.len(),
            "scheduled": outcome
                .scheduled
                .iter()
                .map(|a| serde_json::to_value(a).unwrap_or_else(|_| json!({})))
                .collect::<Vec<_>>(),
            "skippedTerms": outcome
                .skipped
                .iter()
                .map(|s| serde_json::to_value(s).unwrap_or_else(|_| json!({})))
                .collect::<Vec<_>>(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "programme.autoPlan" => Some(handle_auto_plan(state, req)),
        _ => None,
    }
}
