use crate::models::{
    BranchRow, EditRow, MessageRow, SessionRow, branch_status_str, format_time,
    session_status_str,
};
use anyhow::Result;
use forkline_core::{ChangeSet, Watermarks};
use forkline_types::models::{
    Branch, BranchId, EditHistory, Message, MessageId, Session, SessionId, UserId,
};
use rusqlite::{Connection, Row, params};
use tracing::debug;

const SESSION_COLUMNS: &str = "id, title, description, user_id, active_branch_id, model_name,
    model_config, status, create_time, last_active_time";

const MESSAGE_COLUMNS: &str = "id, session_id, parent_id, role, content, message_type,
    attachments, token_count, edited, create_time, metadata, children_count, deleted";

const BRANCH_COLUMNS: &str = "id, session_id, name, description, parent_branch_id,
    fork_message_id, head_message_id, is_main, status, create_time, update_time";

// -- Reads --

pub fn watermarks(conn: &Connection) -> Result<Watermarks> {
    let mark = |kind: &str, table: &str| -> Result<i64> {
        let sql = format!(
            "SELECT MAX(COALESCE((SELECT MAX(id) FROM {}), 0),
                        COALESCE((SELECT value FROM id_watermarks WHERE kind = ?1), 0))",
            table
        );
        Ok(conn.query_row(&sql, [kind], |r| r.get(0))?)
    };
    Ok(Watermarks {
        session: mark("session", "sessions")?,
        message: mark("message", "messages")?,
        branch: mark("branch", "branches")?,
    })
}

pub fn session_by_id(conn: &Connection, id: SessionId) -> Result<Option<Session>> {
    let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
    let row = conn.query_row(&sql, [id], session_row).optional()?;
    row.map(Session::try_from).transpose()
}

pub fn sessions_for_user(conn: &Connection, user_id: UserId, limit: u32) -> Result<Vec<Session>> {
    let sql = format!(
        "SELECT {} FROM sessions
         WHERE user_id = ?1 AND status = 'active'
         ORDER BY last_active_time DESC, id DESC
         LIMIT ?2",
        SESSION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![user_id, limit], session_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(Session::try_from).collect()
}

pub fn messages_for_session(conn: &Connection, session_id: SessionId) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {} FROM messages WHERE session_id = ?1 ORDER BY create_time, id",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([session_id], message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(Message::try_from).collect()
}

pub fn branches_for_session(conn: &Connection, session_id: SessionId) -> Result<Vec<Branch>> {
    let sql = format!(
        "SELECT {} FROM branches WHERE session_id = ?1 ORDER BY create_time, id",
        BRANCH_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([session_id], branch_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(Branch::try_from).collect()
}

pub fn edits_for_session(conn: &Connection, session_id: SessionId) -> Result<Vec<EditHistory>> {
    // JOIN messages to filter by session in a single query
    let mut stmt = conn.prepare(
        "SELECT e.message_id, e.version_index, e.content, e.edit_time, e.editor_id,
                e.edit_reason, e.is_current, e.char_difference
         FROM edit_history e
         JOIN messages m ON m.id = e.message_id
         WHERE m.session_id = ?1
         ORDER BY e.message_id, e.version_index",
    )?;
    let rows = stmt
        .query_map([session_id], |row| {
            Ok(EditRow {
                message_id: row.get(0)?,
                version_index: row.get(1)?,
                content: row.get(2)?,
                edit_time: row.get(3)?,
                editor_id: row.get(4)?,
                edit_reason: row.get(5)?,
                is_current: row.get(6)?,
                char_difference: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(EditHistory::try_from).collect()
}

pub fn session_of_message(conn: &Connection, message_id: MessageId) -> Result<Option<SessionId>> {
    conn.query_row(
        "SELECT session_id FROM messages WHERE id = ?1",
        [message_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn session_of_branch(conn: &Connection, branch_id: BranchId) -> Result<Option<SessionId>> {
    conn.query_row(
        "SELECT session_id FROM branches WHERE id = ?1",
        [branch_id],
        |row| row.get(0),
    )
    .optional()
}

fn session_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        user_id: row.get(3)?,
        active_branch_id: row.get(4)?,
        model_name: row.get(5)?,
        model_config: row.get(6)?,
        status: row.get(7)?,
        create_time: row.get(8)?,
        last_active_time: row.get(9)?,
    })
}

fn message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        parent_id: row.get(2)?,
        role: row.get(3)?,
        content: row.get(4)?,
        message_type: row.get(5)?,
        attachments: row.get(6)?,
        token_count: row.get(7)?,
        edited: row.get(8)?,
        create_time: row.get(9)?,
        metadata: row.get(10)?,
        children_count: row.get(11)?,
        deleted: row.get(12)?,
    })
}

fn branch_row(row: &Row<'_>) -> rusqlite::Result<BranchRow> {
    Ok(BranchRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        parent_branch_id: row.get(4)?,
        fork_message_id: row.get(5)?,
        head_message_id: row.get(6)?,
        is_main: row.get(7)?,
        status: row.get(8)?,
        create_time: row.get(9)?,
        update_time: row.get(10)?,
    })
}

// -- Writes --

/// Write a change set in one transaction. Rows are upserted rather than
/// replaced so the edit history cascade never fires on an update.
pub fn apply(conn: &Connection, changes: &ChangeSet) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    for session in changes.sessions.values() {
        upsert_session(&tx, session)?;
    }
    for message in changes.messages.values() {
        upsert_message(&tx, message)?;
    }
    for branch in changes.branches.values() {
        upsert_branch(&tx, branch)?;
    }
    for entry in changes.edits.values() {
        upsert_edit(&tx, entry)?;
    }
    for id in &changes.purged_messages {
        tx.execute("DELETE FROM edit_history WHERE message_id = ?1", [id])?;
        tx.execute("DELETE FROM messages WHERE id = ?1", [id])?;
    }

    let marks = [
        ("session", changes.sessions.keys().next_back()),
        ("message", changes.messages.keys().next_back()),
        ("branch", changes.branches.keys().next_back()),
    ];
    for (kind, max) in marks {
        if let Some(max) = max {
            tx.execute(
                "INSERT INTO id_watermarks (kind, value) VALUES (?1, ?2)
                 ON CONFLICT(kind) DO UPDATE SET value = MAX(value, excluded.value)",
                params![kind, max],
            )?;
        }
    }

    tx.commit()?;
    debug!(
        sessions = changes.sessions.len(),
        messages = changes.messages.len(),
        branches = changes.branches.len(),
        edits = changes.edits.len(),
        purged = changes.purged_messages.len(),
        "committed change set"
    );
    Ok(())
}

fn upsert_session(conn: &Connection, s: &Session) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, title, description, user_id, active_branch_id, model_name,
                               model_config, status, create_time, last_active_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            active_branch_id = excluded.active_branch_id,
            model_name = excluded.model_name,
            model_config = excluded.model_config,
            status = excluded.status,
            last_active_time = excluded.last_active_time",
        params![
            s.id,
            s.title,
            s.description,
            s.user_id,
            s.active_branch_id,
            s.model_name,
            serde_json::to_string(&s.model_config)?,
            session_status_str(s.status),
            format_time(&s.create_time),
            format_time(&s.last_active_time),
        ],
    )?;
    Ok(())
}

fn upsert_message(conn: &Connection, m: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, session_id, parent_id, role, content, message_type,
                               attachments, token_count, edited, create_time, metadata,
                               children_count, deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(id) DO UPDATE SET
            content = excluded.content,
            token_count = excluded.token_count,
            edited = excluded.edited,
            metadata = excluded.metadata,
            children_count = excluded.children_count,
            deleted = excluded.deleted",
        params![
            m.id,
            m.session_id,
            m.parent_id,
            m.role.as_str(),
            m.content,
            m.message_type.as_str(),
            serde_json::to_string(&m.attachments)?,
            m.token_count,
            m.edited,
            format_time(&m.create_time),
            serde_json::to_string(&m.metadata)?,
            m.children_count,
            m.deleted,
        ],
    )?;
    Ok(())
}

fn upsert_branch(conn: &Connection, b: &Branch) -> Result<()> {
    conn.execute(
        "INSERT INTO branches (id, session_id, name, description, parent_branch_id,
                               fork_message_id, head_message_id, is_main, status,
                               create_time, update_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            parent_branch_id = excluded.parent_branch_id,
            fork_message_id = excluded.fork_message_id,
            head_message_id = excluded.head_message_id,
            status = excluded.status,
            update_time = excluded.update_time",
        params![
            b.id,
            b.session_id,
            b.name,
            b.description,
            b.parent_branch_id,
            b.fork_message_id,
            b.head_message_id,
            b.is_main,
            branch_status_str(b.status),
            format_time(&b.create_time),
            format_time(&b.update_time),
        ],
    )?;
    Ok(())
}

fn upsert_edit(conn: &Connection, e: &EditHistory) -> Result<()> {
    conn.execute(
        "INSERT INTO edit_history (message_id, version_index, content, edit_time, editor_id,
                                   edit_reason, is_current, char_difference)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(message_id, version_index) DO UPDATE SET
            is_current = excluded.is_current",
        params![
            e.message_id,
            e.version_index,
            e.content,
            format_time(&e.edit_time),
            e.editor_id,
            e.edit_reason,
            e.is_current,
            e.char_difference,
        ],
    )?;
    Ok(())
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
