use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE sessions (
                id                  INTEGER PRIMARY KEY,
                title               TEXT NOT NULL,
                description         TEXT NOT NULL DEFAULT '',
                user_id             INTEGER NOT NULL,
                active_branch_id    INTEGER NOT NULL,
                model_name          TEXT NOT NULL,
                model_config        TEXT NOT NULL DEFAULT '{}',
                status              TEXT NOT NULL DEFAULT 'active',
                create_time         TEXT NOT NULL,
                last_active_time    TEXT NOT NULL
            );

            CREATE INDEX idx_sessions_user
                ON sessions(user_id, status, last_active_time);

            -- parent_id carries no foreign key: cleanup purges whole deleted
            -- subtrees in one statement.
            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY,
                session_id      INTEGER NOT NULL REFERENCES sessions(id),
                parent_id       INTEGER,
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                message_type    TEXT NOT NULL DEFAULT 'TEXT',
                attachments     TEXT NOT NULL DEFAULT '[]',
                token_count     INTEGER NOT NULL DEFAULT 0,
                edited          INTEGER NOT NULL DEFAULT 0,
                create_time     TEXT NOT NULL,
                metadata        TEXT NOT NULL DEFAULT '{}',
                children_count  INTEGER NOT NULL DEFAULT 0,
                deleted         INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_messages_session
                ON messages(session_id, create_time);

            CREATE TABLE branches (
                id                  INTEGER PRIMARY KEY,
                session_id          INTEGER NOT NULL REFERENCES sessions(id),
                name                TEXT NOT NULL,
                description         TEXT NOT NULL DEFAULT '',
                parent_branch_id    INTEGER,
                fork_message_id     INTEGER,
                head_message_id     INTEGER,
                is_main             INTEGER NOT NULL DEFAULT 0,
                status              TEXT NOT NULL DEFAULT 'active',
                create_time         TEXT NOT NULL,
                update_time         TEXT NOT NULL
            );

            CREATE INDEX idx_branches_session ON branches(session_id);

            CREATE TABLE edit_history (
                message_id      INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                version_index   INTEGER NOT NULL,
                content         TEXT NOT NULL,
                edit_time       TEXT NOT NULL,
                editor_id       INTEGER NOT NULL,
                edit_reason     TEXT NOT NULL DEFAULT '',
                is_current      INTEGER NOT NULL DEFAULT 0,
                char_difference INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (message_id, version_index)
            );

            -- Highest id ever issued per kind, so purged ids are never reused.
            CREATE TABLE id_watermarks (
                kind    TEXT PRIMARY KEY,
                value   INTEGER NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
