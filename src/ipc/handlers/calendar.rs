use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, load_planner_doc, parse_opt_date, required_i64, required_str, save_planner_doc,
};
use crate::ipc::types::{AppState, Request};
use crate::scheduler::Holiday;
use serde_json::json;

fn term_json(term: &crate::scheduler::Term) -> serde_json::Value {
    serde_json::to_value(term).unwrap_or_else(|_| json!({}))
}

fn handle_terms_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let doc = match load_planner_doc(conn, req, &teacher_id) {
        Ok(d) => d,
        Err(e) => return e,
    };
    // First read persists the seeded calendar so later saves start from a row.
    if let Err(e) = save_planner_doc(conn, req, &teacher_id, &doc) {
        return e;
    }
    ok(
        &req.id,
        json!({ "terms": doc.terms.iter().map(term_json).collect::<Vec<_>>() }),
    )
}

fn handle_terms_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut doc = match load_planner_doc(conn, req, &teacher_id) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let Some(term) = doc.term_mut(term_id) else {
        return err(&req.id, "not_found", "term not found", None);
    };

    if let Some(v) = patch.get("name") {
        let Some(name) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return err(&req.id, "bad_params", "name must not be empty", None);
        };
        term.name = name.to_string();
    }
    if patch.contains_key("startDate") {
        term.start_date = match parse_opt_date(patch.get("startDate")) {
            Ok(v) => v,
            Err(m) => return err(&req.id, "bad_params", format!("startDate {}", m), None),
        };
    }
    if patch.contains_key("endDate") {
        term.end_date = match parse_opt_date(patch.get("endDate")) {
            Ok(v) => v,
            Err(m) => return err(&req.id, "bad_params", format!("endDate {}", m), None),
        };
    }
    if let (Some(start), Some(end)) = (term.start_date, term.end_date) {
        if start > end {
            return err(
                &req.id,
                "bad_params",
                "startDate must be on or before endDate",
                None,
            );
        }
    }

    let updated = term_json(term);
    if let Err(e) = save_planner_doc(conn, req, &teacher_id, &doc) {
        return e;
    }
    ok(&req.id, json!({ "term": updated }))
}

fn parse_holiday_patch(
    req: &Request,
    holiday: &mut Holiday,
    patch: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), serde_json::Value> {
    if let Some(v) = patch.get("name") {
        let Some(name) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(err(&req.id, "bad_params", "name must not be empty", None));
        };
        holiday.name = name.to_string();
    }
    if patch.contains_key("start") {
        holiday.start = parse_opt_date(patch.get("start"))
            .map_err(|m| err(&req.id, "bad_params", format!("start {}", m), None))?;
    }
    if patch.contains_key("end") {
        holiday.end = parse_opt_date(patch.get("end"))
            .map_err(|m| err(&req.id, "bad_params", format!("end {}", m), None))?;
    }
    if let (Some(start), Some(end)) = (holiday.start, holiday.end) {
        if start > end {
            return Err(err(
                &req.id,
                "bad_params",
                "start must be on or before end",
                None,
            ));
        }
    }
    Ok(())
}

fn handle_holidays_add(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(input) = req.params.get("holiday").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "holiday must be an object", None);
    };
    if input.get("name").and_then(|v| v.as_str()).is_none() {
        return err(&req.id, "bad_params", "missing holiday.name", None);
    }

    let mut doc = match load_planner_doc(conn, req, &teacher_id) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let Some(term) = doc.term_mut(term_id) else {
        return err(&req.id, "not_found", "term not found", None);
    };

    let mut holiday = Holiday {
        name: String::new(),
        start: None,
        end: None,
    };
    if let Err(e) = parse_holiday_patch(req, &mut holiday, input) {
        return e;
    }
    // Overlapping holidays are allowed and not de-duplicated.
    term.holidays.push(holiday);
    let index = term.holidays.len() - 1;
    let updated = term_json(term);

    if let Err(e) = save_planner_doc(conn, req, &teacher_id, &doc) {
        return e;
    }
    ok(&req.id, json!({ "index": index, "term": updated }))
}

fn handle_holidays_update(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let index = match required_i64(req, "index") {
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
    let Some(term) = doc.term_mut(term_id) else {
        return err(&req.id, "not_found", "term not found", None);
    };
    let Some(holiday) = usize::try_from(index)
        .ok()
        .and_then(|i| term.holidays.get_mut(i))
    else {
        return err(&req.id, "not_found", "holiday not found", None);
    };

    if let Err(e) = parse_holiday_patch(req, holiday, patch) {
        return e;
    }
    let updated = term_json(term);

    if let Err(e) = save_planner_doc(conn, req, &teacher_id, &doc) {
        return e;
    }
    ok(&req.id, json!({ "term": updated }))
}

fn handle_holidays_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let index = match required_i64(req, "index") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut doc = match load_planner_doc(conn, req, &teacher_id) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let Some(term) = doc.term_mut(term_id) else {
        return err(&req.id, "not_found", "term not found", None);
    };
    let Some(i) = usize::try_from(index)
        .ok()
        .filter(|i| *i < term.holidays.len())
    else {
        return err(&req.id, "not_found", "holiday not found", None);
    };

    term.holidays.remove(i);
    let updated = term_json(term);

    if let Err(e) = save_planner_doc(conn, req, &teacher_id, &doc) {
        return e;
    }
    ok(&req.id, json!({ "term": updated }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calendar.terms.get" => Some(handle_terms_get(state, req)),
        "calendar.terms.update" => Some(handle_terms_update(state, req)),
        "calendar.holidays.add" => Some(handle_holidays_add(state, req)),
        "calendar.holidays.update" => Some(handle_holidays_update(state, req)),
        "calendar.holidays.remove" => Some(handle_holidays_remove(state, req)),
        _ => None,
    }
}
