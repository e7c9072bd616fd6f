mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn scans_forward_from_the_latest_booked_date() {
    let workspace = temp_dir("schoolhub-next-date");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "calendar.terms.update",
        json!({
            "teacherId": "t-1",
            "termId": 1,
            "patch": { "startDate": "2025-01-06", "endDate": "2025-01-17" }
        }),
    );

    // Empty term: the scan starts at the term's first day.
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assessments.nextAvailableDate",
        json!({ "teacherId": "t-1", "termId": 1 }),
    );
    assert_eq!(first.get("date").and_then(|v| v.as_str()), Some("2025-01-06"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "assessments.create",
        json!({
            "teacherId": "t-1",
            "input": { "term": 1, "subject": "Mathematics", "grade": "7", "assessmentDate": "2025-01-06" }
        }),
    );
    let next = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assessments.nextAvailableDate",
        json!({ "teacherId": "t-1", "termId": 1 }),
    );
    assert_eq!(next.get("date").and_then(|v| v.as_str()), Some("2025-01-07"));

    // A Friday booking rolls the suggestion over the weekend.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assessments.create",
        json!({
            "teacherId": "t-1",
            "input": { "term": 1, "subject": "Mathematics", "grade": "7", "assessmentDate": "2025-01-10" }
        }),
    );
    let monday = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "assessments.nextAvailableDate",
        json!({ "teacherId": "t-1", "termId": 1 }),
    );
    assert_eq!(monday.get("date").and_then(|v| v.as_str()), Some("2025-01-13"));
}

#[test]
fn holidays_of_other_terms_also_block_the_scan() {
    let workspace = temp_dir("schoolhub-next-date-holidays");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "calendar.terms.update",
        json!({
            "teacherId": "t-1",
            "termId": 1,
            "patch": { "startDate": "2025-01-06", "endDate": "2025-01-17" }
        }),
    );
    // Holiday recorded under term 2, overlapping term 1's range: the reserved
    // union spans all terms.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "calendar.holidays.add",
        json!({
            "teacherId": "t-1",
            "termId": 2,
            "holiday": { "name": "Exchange Week", "start": "2025-01-06", "end": "2025-01-07" }
        }),
    );

    let next = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "assessments.nextAvailableDate",
        json!({ "teacherId": "t-1", "termId": 1 }),
    );
    assert_eq!(next.get("date").and_then(|v| v.as_str()), Some("2025-01-08"));
}

#[test]
fn unset_term_dates_surface_the_calendar_message() {
    let workspace = temp_dir("schoolhub-next-date-unset");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "assessments.nextAvailableDate",
        json!({ "teacherId": "t-1", "termId": 2 }),
    );
    assert_eq!(error_code(&resp), "term_dates_not_set");
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str()),
        Some("Term dates are not set. Please set them in the School Calendar.")
    );
}

#[test]
fn exhausted_term_reports_no_available_weekdays() {
    let workspace = temp_dir("schoolhub-next-date-full");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    // Sat 2025-01-11 .. Sun 2025-01-12: a term with no weekdays at all.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "calendar.terms.update",
        json!({
            "teacherId": "t-1",
            "termId": 3,
            "patch": { "startDate": "2025-01-11", "endDate": "2025-01-12" }
        }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "assessments.nextAvailableDate",
        json!({ "teacherId": "t-1", "termId": 3 }),
    );
    assert_eq!(error_code(&resp), "no_available_weekday");
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str()),
        Some("No available weekdays found in this term.")
    );
}
