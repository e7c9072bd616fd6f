mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn create_filter_pin_and_delete() {
    let workspace = temp_dir("schoolhub-announcements");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let teachers_only = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "announcements.create",
        json!({
            "title": "Staff meeting moved",
            "body": "Monday briefing now starts at 07:15.",
            "audience": ["teacher", "smt"],
            "createdBy": "smt-1"
        }),
    );
    let teachers_only_id = teachers_only
        .get("announcementId")
        .and_then(|v| v.as_str())
        .expect("announcementId")
        .to_string();

    let everyone = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "announcements.create",
        json!({
            "title": "Sports day",
            "body": "Annual sports day on the 14th.",
            "createdBy": "smt-1"
        }),
    );
    let everyone_id = everyone
        .get("announcementId")
        .and_then(|v| v.as_str())
        .expect("announcementId")
        .to_string();

    // Parents only see the announcement addressed to everyone.
    let for_parents = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "announcements.list",
        json!({ "audience": "parent" }),
    );
    let rows = for_parents
        .get("announcements")
        .and_then(|v| v.as_array())
        .expect("announcements");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("id").and_then(|v| v.as_str()),
        Some(everyone_id.as_str())
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "announcements.update",
        json!({ "announcementId": teachers_only_id, "patch": { "pinned": true } }),
    );
    let all = request_ok(&mut stdin, &mut reader, "6", "announcements.list", json!({}));
    let rows = all
        .get("announcements")
        .and_then(|v| v.as_array())
        .expect("announcements");
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0].get("id").and_then(|v| v.as_str()),
        Some(teachers_only_id.as_str())
    );
    assert_eq!(rows[0].get("pinned").and_then(|v| v.as_bool()), Some(true));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "announcements.delete",
        json!({ "announcementId": teachers_only_id }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "8",
        "announcements.delete",
        json!({ "announcementId": teachers_only_id }),
    );
    assert_eq!(error_code(&resp), "not_found");
}

#[test]
fn audience_roles_are_validated() {
    let workspace = temp_dir("schoolhub-announcements-roles");
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
        "announcements.create",
        json!({
            "title": "Oops",
            "body": "Bad audience.",
            "audience": ["teacher", "janitor"],
            "createdBy": "smt-1"
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "announcements.list",
        json!({ "audience": "janitor" }),
    );
    assert_eq!(error_code(&resp), "bad_params");
}
