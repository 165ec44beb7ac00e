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
            CREATE TABLE users (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL
            );

            CREATE TABLE jobs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                title       TEXT NOT NULL,
                deleted_at  TEXT
            );

            CREATE TABLE job_hire_managers (
                job_id      INTEGER NOT NULL,
                admin_id    INTEGER NOT NULL,
                status      TEXT NOT NULL
            );

            CREATE INDEX idx_hire_managers_job
                ON job_hire_managers(job_id, admin_id);

            CREATE TABLE sales_team_members (
                freelancer_id   INTEGER NOT NULL,
                sales_user_id   INTEGER NOT NULL,
                UNIQUE(freelancer_id, sales_user_id)
            );

            -- job_id has no foreign key: jobs are owned elsewhere and may vanish
            CREATE TABLE conversations (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                participant_one_id  INTEGER NOT NULL,
                participant_two_id  INTEGER NOT NULL,
                job_id              INTEGER,
                pin_one             INTEGER NOT NULL DEFAULT 0,
                pin_two             INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL,
                CHECK (participant_one_id <> participant_two_id)
            );

            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                author_id       INTEGER NOT NULL,
                body            TEXT,
                edited_body     TEXT,
                reply_to_id     INTEGER REFERENCES messages(id),
                status          TEXT NOT NULL DEFAULT 'original',
                is_seen         INTEGER NOT NULL DEFAULT 0,
                seen_at         TEXT,
                like_one        INTEGER NOT NULL DEFAULT 0,
                like_two        INTEGER NOT NULL DEFAULT 0,
                pin_one         INTEGER NOT NULL DEFAULT 0,
                pin_two         INTEGER NOT NULL DEFAULT 0,
                deleted_at      TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE INDEX idx_messages_seen
                ON messages(is_seen, conversation_id);

            CREATE TABLE attachments (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
                filename    TEXT NOT NULL,
                alias       TEXT NOT NULL,
                url         TEXT NOT NULL,
                size        INTEGER NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_attachments_message
                ON attachments(message_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
