mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn first_send_creates_thread_and_later_sends_append() {
    let workspace = temp_dir("schoolhub-messaging");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "messages.send",
        json!({
            "senderId": "teacher-1",
            "senderRole": "teacher",
            "participants": ["parent-9"],
            "body": "Naledi did very well in the fractions test."
        }),
    );
    let thread_id = first
        .get("threadId")
        .and_then(|v| v.as_str())
        .expect("threadId")
        .to_string();
    let first_sent_at = first.get("sentAt").and_then(|v| v.as_i64()).expect("sentAt");

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "messages.send",
        json!({
            "senderId": "parent-9",
            "senderRole": "parent",
            "threadId": thread_id,
            "body": "Thank you for letting me know!"
        }),
    );
    assert_eq!(
        second.get("threadId").and_then(|v| v.as_str()),
        Some(thread_id.as_str())
    );
    let second_sent_at = second.get("sentAt").and_then(|v| v.as_i64()).expect("sentAt");

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "messages.list",
        json!({ "threadId": thread_id }),
    );
    let messages = all
        .get("messages")
        .and_then(|v| v.as_array())
        .expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[0].get("senderId").and_then(|v| v.as_str()),
        Some("teacher-1")
    );

    // Poll-style catch-up: only rows newer than the given marker come back.
    let newer = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "messages.list",
        json!({ "threadId": thread_id, "sinceTs": first_sent_at - 1 }),
    );
    assert_eq!(
        newer
            .get("messages")
            .and_then(|v| v.as_array())
            .expect("messages")
            .len(),
        2
    );
    let none = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "messages.list",
        json!({ "threadId": thread_id, "sinceTs": second_sent_at }),
    );
    assert!(none
        .get("messages")
        .and_then(|v| v.as_array())
        .expect("messages")
        .is_empty());
}

#[test]
fn threads_list_is_scoped_to_the_participant() {
    let workspace = temp_dir("schoolhub-messaging-threads");
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
        "messages.send",
        json!({
            "senderId": "teacher-1",
            "participants": ["parent-9"],
            "body": "Reminder: permission slips due Friday."
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "messages.send",
        json!({
            "senderId": "teacher-1",
            "participants": ["smt-1"],
            "body": "Draft timetable attached in the staff room."
        }),
    );

    let for_parent = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "threads.list",
        json!({ "participantId": "parent-9" }),
    );
    assert_eq!(
        for_parent
            .get("threads")
            .and_then(|v| v.as_array())
            .expect("threads")
            .len(),
        1
    );

    // The sender is always a participant of threads they started.
    let for_teacher = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "threads.list",
        json!({ "participantId": "teacher-1" }),
    );
    assert_eq!(
        for_teacher
            .get("threads")
            .and_then(|v| v.as_array())
            .expect("threads")
            .len(),
        2
    );
}

#[test]
fn send_requires_thread_or_participants() {
    let workspace = temp_dir("schoolhub-messaging-validate");
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
        "messages.send",
        json!({ "senderId": "teacher-1", "body": "Lost message" }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "messages.send",
        json!({ "senderId": "teacher-1", "threadId": "missing", "body": "Hello?" }),
    );
    assert_eq!(error_code(&resp), "not_found");

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "messages.list",
        json!({ "threadId": "missing" }),
    );
    assert_eq!(error_code(&resp), "not_found");
}
