use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::scheduler::PlannerDoc;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("schoolhub.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // One aggregate planning document per teacher, stored whole. Saves replace
    // the row outright; there is no version column and the last writer wins.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS planner_documents(
            teacher_id TEXT PRIMARY KEY,
            doc_json TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            audience_json TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    ensure_announcements_pinned(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_announcements_created ON announcements(created_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS admissions_applications(
            id TEXT PRIMARY KEY,
            learner_name TEXT NOT NULL,
            grade TEXT NOT NULL,
            parent_name TEXT NOT NULL,
            contact_email TEXT NOT NULL,
            notes TEXT,
            status TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    ensure_admissions_reviewed_by(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_admissions_status ON admissions_applications(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS message_threads(
            id TEXT PRIMARY KEY,
            participants_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_message_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            sender_role TEXT,
            body TEXT NOT NULL,
            sent_at INTEGER NOT NULL,
            FOREIGN KEY(thread_id) REFERENCES message_threads(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, sent_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_announcements_pinned(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces predate pinning.
    if table_has_column(conn, "announcements", "pinned")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE announcements ADD COLUMN pinned INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_admissions_reviewed_by(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "admissions_applications", "reviewed_by")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE admissions_applications ADD COLUMN reviewed_by TEXT",
        [],
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, &text),
    )?;
    Ok(())
}

/// Load the whole planning aggregate for one teacher, seeding four empty terms
/// on first access. Historical documents are normalized so terms 1..=4 always
/// exist.
pub fn planner_doc_load(conn: &Connection, teacher_id: &str) -> anyhow::Result<PlannerDoc> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT doc_json FROM planner_documents WHERE teacher_id = ?",
            [teacher_id],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => {
            let mut doc: PlannerDoc = serde_json::from_str(&text)?;
            doc.normalize();
            Ok(doc)
        }
        None => Ok(PlannerDoc::seeded()),
    }
}

/// Rewrite the aggregate wholesale. No read-modify-write guard: concurrent
/// sessions on the same teacher document are last-writer-wins.
pub fn planner_doc_save(
    conn: &Connection,
    teacher_id: &str,
    doc: &PlannerDoc,
    updated_at: &str,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(doc)?;
    conn.execute(
        "INSERT INTO planner_documents(teacher_id, doc_json, updated_at) VALUES(?, ?, ?)
         ON CONFLICT(teacher_id) DO UPDATE SET
            doc_json = excluded.doc_json,
            updated_at = excluded.updated_at",
        (teacher_id, &text, updated_at),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
