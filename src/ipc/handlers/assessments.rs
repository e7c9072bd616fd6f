use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, load_planner_doc, now_ms, parse_iso_date, parse_opt_date, parse_opt_i64,
    parse_opt_string, required_i64, required_str, save_planner_doc,
};
use crate::ipc::types::{AppState, Request};
use crate::scheduler::{self, Assessment, PlannerDoc, TERM_COUNT};
use rusqlite::Connection;
use serde_json::json;

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

/// Serialized assessment row plus its conflict flag against the owning term.
/// The flag is advisory; manual entry is never blocked by it.
fn assessment_json(doc: &PlannerDoc, a: &Assessment) -> serde_json::Value {
    let mut row = serde_json::to_value(a).unwrap_or_else(|_| json!({}));
    let conflict = doc
        .term(a.term)
        .and_then(|t| scheduler::check_date_conflict(a.assessment_date, t))
        .map(|c| c.message());
    row["conflict"] = match conflict {
        Some(m) => json!(m),
        None => serde_json::Value::Null,
    };
    row
}

fn valid_term(term: i64) -> bool {
    (1..=TERM_COUNT as i64).contains(&term)
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term = match parse_opt_i64(req.params.get("term")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("term {}", m), None),
    };
    let subject = match parse_opt_string(req.params.get("subject")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("subject {}", m), None),
    };
    let grade = match parse_opt_string(req.params.get("grade")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("grade {}", m), None),
    };

    let doc = match load_planner_doc(conn, req, &teacher_id) {
        Ok(d) => d,
        Err(e) => return e,
    };

    // Free-form filters compared by equality only, matching how the data was
    // always queried.
    let mut rows: Vec<&Assessment> = doc
        .assessments
        .iter()
        .filter(|a| term.map_or(true, |t| a.term == t))
        .filter(|a| subject.as_deref().map_or(true, |s| a.subject == s))
        .filter(|a| grade.as_deref().map_or(true, |g| a.grade == g))
        .collect();
    rows.sort_by_key(|a| (a.assessment_date, a.id));

    ok(
        &req.id,
        json!({
            "assessments": rows
                .into_iter()
                .map(|a| assessment_json(&doc, a))
                .collect::<Vec<_>>()
        }),
    )
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(input) = req.params.get("input").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "input must be an object", None);
    };

    let Some(term) = input.get("term").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing input.term", None);
    };
    if !valid_term(term) {
        return err(&req.id, "bad_params", "term must be 1..=4", None);
    }
    let Some(subject) = input
        .get("subject")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return err(&req.id, "bad_params", "missing input.subject", None);
    };
    let Some(grade) = input
        .get("grade")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return err(&req.id, "bad_params", "missing input.grade", None);
    };
    let Some(date_raw) = input.get("assessmentDate").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing input.assessmentDate", None);
    };
    let assessment_date = match parse_iso_date(date_raw) {
        Ok(d) => d,
        Err(m) => return err(&req.id, "bad_params", format!("assessmentDate: {}", m), None),
    };
    let moderation_date = match parse_opt_date(input.get("moderationDate")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("moderationDate {}", m), None),
    };
    let total_marks = match parse_opt_i64(input.get("totalMarks")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("totalMarks {}", m), None),
    };
    let target_percentage = match parse_opt_i64(input.get("targetPercentage")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("targetPercentage {}", m), None),
    };
    let duration = match parse_opt_i64(input.get("duration")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("duration {}", m), None),
    };
    let topics = match parse_opt_string(input.get("topics")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("topics {}", m), None),
    };
    let status = match parse_opt_string(input.get("status")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("status {}", m), None),
    }
    .unwrap_or_else(|| default_status(conn));

    let mut doc = match load_planner_doc(conn, req, &teacher_id) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let assessment = Assessment {
        id: now_ms(),
        term,
        subject: subject.to_string(),
        grade: grade.to_string(),
        assessment_date,
        moderation_date,
        total_marks,
        target_percentage,
        duration,
        topics,
        status,
    };
    doc.assessments.push(assessment.clone());

    if let Err(e) = save_planner_doc(conn, req, &teacher_id, &doc) {
        return e;
    }
    ok(&req.id, json!({ "assessment": assessment_json(&doc, &assessment) }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assessment_id = match required_i64(req, "assessmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut doc = match load_planner_doc(conn, req, &teacher_id) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let Some(pos) = doc.assessments.iter().position(|a| a.id == assessment_id) else {
        return err(&req.id, "not_found", "assessment not found", None);
    };

    {
        let a = &mut doc.assessments[pos];
        if let Some(v) = patch.get("term") {
            let Some(term) = v.as_i64().filter(|t| valid_term(*t)) else {
                return err(&req.id, "bad_params", "term must be 1..=4", None);
            };
            a.term = term;
        }
        if let Some(v) = patch.get("subject") {
            let Some(subject) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                return err(&req.id, "bad_params", "subject must not be empty", None);
            };
            a.subject = subject.to_string();
        }
        if let Some(v) = patch.get("grade") {
            let Some(grade) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                return err(&req.id, "bad_params", "grade must not be empty", None);
            };
            a.grade = grade.to_string();
        }
        if let Some(v) = patch.get("assessmentDate") {
            let Some(raw) = v.as_str() else {
                return err(&req.id, "bad_params", "assessmentDate must be a string", None);
            };
            a.assessment_date = match parse_iso_date(raw) {
                Ok(d) => d,
                Err(m) => return err(&req.id, "bad_params", format!("assessmentDate: {}", m), None),
            };
        }
        if patch.contains_key("moderationDate") {
            a.moderation_date = match parse_opt_date(patch.get("moderationDate")) {
                Ok(v) => v,
                Err(m) => return err(&req.id, "bad_params", format!("moderationDate {}", m), None),
            };
        }
        if patch.contains_key("totalMarks") {
            a.total_marks = match parse_opt_i64(patch.get("totalMarks")) {
                Ok(v) => v,
                Err(m) => return err(&req.id, "bad_params", format!("totalMarks {}", m), None),
            };
        }
        if patch.contains_key("targetPercentage") {
            a.target_percentage = match parse_opt_i64(patch.get("targetPercentage")) {
                Ok(v) => v,
                Err(m) => {
                    return err(&req.id, "bad_params", format!("targetPercentage {}", m), None)
                }
            };
        }
        if patch.contains_key("duration") {
            a.duration = match parse_opt_i64(patch.get("duration")) {
                Ok(v) => v,
                Err(m) => return err(&req.id, "bad_params", format!("duration {}", m), None),
            };
        }
        if patch.contains_key("topics") {
            a.topics = match parse_opt_string(patch.get("topics")) {
                Ok(v) => v,
                Err(m) => return err(&req.id, "bad_params", format!("topics {}", m), None),
            };
        }
        if let Some(v) = patch.get("status") {
            let Some(status) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                return err(&req.id, "bad_params", "status must not be empty", None);
            };
            a.status = status.to_string();
        }
    }

    let updated = doc.assessments[pos].clone();
    if let Err(e) = save_planner_doc(conn, req, &teacher_id, &doc) {
        return e;
    }
    ok(&req.id, json!({ "assessment": assessment_json(&doc, &updated) }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assessment_id = match required_i64(req, "assessmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut doc = match load_planner_doc(conn, req, &teacher_id) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let before = doc.assessments.len();
    doc.assessments.retain(|a| a.id != assessment_id);
    if doc.assessments.len() == before {
        return err(&req.id, "not_found", "assessment not found", None);
    }

    if let Err(e) = save_planner_doc(conn, req, &teacher_id, &doc) {
        return e;
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_check_conflict(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_i64(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date_raw = match required_str(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match parse_iso_date(&date_raw) {
        Ok(d) => d,
        Err(m) => return err(&req.id, "bad_params", format!("date: {}", m), None),
    };

    let doc = match load_planner_doc(conn, req, &teacher_id) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let Some(term) = doc.term(term_id) else {
        return err(&req.id, "not_found", "term not found", None);
    };

    let conflict = scheduler::check_date_conflict(date, term).map(|c| c.message());
    ok(
        &req.id,
        json!({
            "conflict": match conflict {
                Some(m) => json!(m),
                None => serde_json::Value::Null,
            }
        }),
    )
}

fn handle_next_available_date(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term_id = match required_i64(req, "termId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let doc = match load_planner_doc(conn, req, &teacher_id) {
        Ok(d) => d,
        Err(e) => return e,
    };
    match scheduler::find_next_available_date(&doc, term_id) {
        Ok(date) => ok(
            &req.id,
            json!({ "date": date.format("%Y-%m-%d").to_string() }),
        ),
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assessments.list" => Some(handle_list(state, req)),
        "assessments.create" => Some(handle_create(state, req)),
        "assessments.update" => Some(handle_update(state, req)),
        "assessments.delete" => Some(handle_delete(state, req)),
        "assessments.checkConflict" => Some(handle_check_conflict(state, req)),
        "assessments.nextAvailableDate" => Some(handle_next_available_date(state, req)),
        _ => None,
    }
}
