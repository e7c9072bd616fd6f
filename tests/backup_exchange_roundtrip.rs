mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn export_then_import_restores_the_workspace() {
    let source = temp_dir("schoolhub-backup-src");
    let restored = temp_dir("schoolhub-backup-dst");
    let bundle = temp_dir("schoolhub-backup-out").join("workspace.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "announcements.create",
        json!({
            "title": "Carried across",
            "body": "This row should survive the bundle roundtrip.",
            "createdBy": "smt-1"
        }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "backup.export",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("schoolhub-workspace-v1")
    );
    assert_eq!(exported.get("entryCount").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(
        exported
            .get("dbSha256")
            .and_then(|v| v.as_str())
            .map(|s| s.len()),
        Some(64)
    );

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.import",
        json!({
            "inPath": bundle.to_string_lossy(),
            "path": restored.to_string_lossy()
        }),
    );
    assert_eq!(
        imported.get("workspacePath").and_then(|v| v.as_str()),
        Some(restored.to_string_lossy().as_ref())
    );

    // The session now points at the restored workspace with the data intact.
    let listed = request_ok(&mut stdin, &mut reader, "5", "announcements.list", json!({}));
    let rows = listed
        .get("announcements")
        .and_then(|v| v.as_array())
        .expect("announcements");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("title").and_then(|v| v.as_str()),
        Some("Carried across")
    );
}

#[test]
fn import_rejects_non_bundle_and_keeps_the_session_usable() {
    let source = temp_dir("schoolhub-backup-bad-src");
    let not_a_bundle = temp_dir("schoolhub-backup-bad").join("not-a-bundle.zip");
    std::fs::write(&not_a_bundle, b"plain text, not a zip archive").expect("write file");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "announcements.create",
        json!({
            "title": "Still here",
            "body": "A failed import must not lose the open workspace.",
            "createdBy": "smt-1"
        }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "backup.import",
        json!({ "inPath": not_a_bundle.to_string_lossy() }),
    );
    assert_eq!(error_code(&resp), "backup_import_failed");

    let listed = request_ok(&mut stdin, &mut reader, "4", "announcements.list", json!({}));
    assert_eq!(
        listed
            .get("announcements")
            .and_then(|v| v.as_array())
            .expect("announcements")
            .len(),
        1
    );
}

#[test]
fn export_requires_an_open_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "backup.export",
        json!({ "outPath": "/tmp/nowhere.zip" }),
    );
    assert_eq!(error_code(&resp), "no_workspace");
}
