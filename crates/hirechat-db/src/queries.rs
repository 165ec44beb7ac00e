use std::collections::BTreeSet;

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, Row, params_from_iter};
use tracing::debug;

use hirechat_types::api::{MessageFilters, PageRequest};
use hirechat_types::filters::Page;
use hirechat_types::models::{
    Attachment, Conversation, HIRE_MANAGER_ACTIVE, HIRE_MANAGER_PAUSED_ACTIVE, Job, Message,
    MessageStatus, Slot, User, reaction_slot,
};

use crate::models::{MessageDetail, NewAttachment, NewMessage};
use crate::{Database, format_timestamp, parse_timestamp};

pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.author_id, m.body, m.edited_body, \
     m.reply_to_id, m.status, m.is_seen, m.seen_at, m.like_one, m.like_two, m.pin_one, m.pin_two, \
     m.deleted_at, m.created_at, m.updated_at";

const CONVERSATION_COLUMNS: &str =
    "id, participant_one_id, participant_two_id, job_id, pin_one, pin_two, created_at, updated_at";

const ATTACHMENT_COLUMNS: &str =
    "id, message_id, filename, alias, url, size, created_at, updated_at";

/// Search weights: a hit in the edited text ranks above a hit in the original.
const EDITED_BODY_WEIGHT: i64 = 10;
const BODY_WEIGHT: i64 = 5;

impl Database {
    // -- Users --

    pub fn create_user(&self, name: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO users (name) VALUES (?1)", [name])?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    // -- Jobs & staff assignments --

    pub fn create_job(&self, title: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO jobs (title) VALUES (?1)", [title])?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn soft_delete_job(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                rusqlite::params![id, format_timestamp(now)],
            )?;
            Ok(())
        })
    }

    /// Removes the job row entirely. Conversations keep their dangling `job_id`.
    pub fn purge_job(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM job_hire_managers WHERE job_id = ?1", [id])?;
            conn.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn assign_hire_manager(&self, job_id: i64, admin_id: i64, status: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO job_hire_managers (job_id, admin_id, status) VALUES (?1, ?2, ?3)",
                rusqlite::params![job_id, admin_id, status],
            )?;
            Ok(())
        })
    }

    /// The admin currently responsible for a job, if any.
    pub fn active_admin_for_job(&self, job_id: i64) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT admin_id FROM job_hire_managers
                 WHERE job_id = ?1 AND status IN (?2, ?3)
                 ORDER BY rowid DESC
                 LIMIT 1",
                rusqlite::params![job_id, HIRE_MANAGER_ACTIVE, HIRE_MANAGER_PAUSED_ACTIVE],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn assign_sales_rep(&self, freelancer_id: i64, sales_user_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO sales_team_members (freelancer_id, sales_user_id) VALUES (?1, ?2)",
                rusqlite::params![freelancer_id, sales_user_id],
            )?;
            Ok(())
        })
    }

    /// Freelancers on `sales_user_id`'s team (`belongs = true`) or on any
    /// other rep's team (`belongs = false`).
    pub fn sales_team_freelancer_ids(&self, sales_user_id: i64, belongs: bool) -> Result<BTreeSet<i64>> {
        self.with_conn(|conn| {
            let sql = if belongs {
                "SELECT DISTINCT freelancer_id FROM sales_team_members WHERE sales_user_id = ?1"
            } else {
                "SELECT DISTINCT freelancer_id FROM sales_team_members WHERE sales_user_id <> ?1"
            };
            let mut stmt = conn.prepare(sql)?;
            let ids = stmt
                .query_map([sales_user_id], |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<BTreeSet<_>, _>>()?;
            Ok(ids)
        })
    }

    // -- Conversations --

    pub fn create_conversation(
        &self,
        participant_one_id: i64,
        participant_two_id: i64,
        job_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        if participant_one_id == participant_two_id {
            bail!("Conversation needs two distinct participants, got {} twice", participant_one_id);
        }

        self.with_conn(|conn| {
            let ts = format_timestamp(now);
            conn.execute(
                "INSERT INTO conversations (participant_one_id, participant_two_id, job_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![participant_one_id, participant_two_id, job_id, ts],
            )?;
            let id = conn.last_insert_rowid();
            query_conversation(conn, id)?.ok_or_else(|| anyhow!("Conversation {} vanished after insert", id))
        })
    }

    pub fn get_conversation(&self, id: i64) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    // -- Messages --

    pub fn insert_message(&self, new: &NewMessage<'_>, now: DateTime<Utc>) -> Result<Message> {
        self.with_conn(|conn| {
            let ts = format_timestamp(now);
            conn.execute(
                "INSERT INTO messages (conversation_id, author_id, body, reply_to_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![
                    new.conversation_id,
                    new.author_id,
                    new.body,
                    new.reply_to_id,
                    MessageStatus::Original.as_str(),
                    ts
                ],
            )?;
            let id = conn.last_insert_rowid();
            debug!("Inserted message {} in conversation {}", id, new.conversation_id);
            query_message(conn, id)?.ok_or_else(|| anyhow!("Message {} vanished after insert", id))
        })
    }

    /// Fetch a message, including soft-deleted ones.
    pub fn get_message(&self, id: i64) -> Result<Option<Message>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    pub fn get_messages_by_ids(&self, ids: &[i64]) -> Result<Vec<Message>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {} FROM messages m WHERE m.id IN ({})",
                MESSAGE_COLUMNS,
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(ids.iter()), map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Store an edit. The original body is kept untouched.
    pub fn edit_message(&self, id: i64, edited_body: &str, now: DateTime<Utc>) -> Result<Message> {
        self.update_message(
            id,
            "UPDATE messages SET status = ?2, edited_body = ?3, updated_at = ?4 WHERE id = ?1",
            rusqlite::params![id, MessageStatus::Edited.as_str(), edited_body, format_timestamp(now)],
        )
    }

    /// `Some(at)` marks seen at `at`, `None` clears both flag and timestamp.
    pub fn set_seen(&self, id: i64, seen_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<Message> {
        self.update_message(
            id,
            "UPDATE messages SET is_seen = ?2, seen_at = ?3, updated_at = ?4 WHERE id = ?1",
            rusqlite::params![
                id,
                seen_at.is_some(),
                seen_at.map(format_timestamp),
                format_timestamp(now)
            ],
        )
    }

    pub fn set_like(&self, id: i64, slot: Slot, value: bool, now: DateTime<Utc>) -> Result<Message> {
        let sql = match slot {
            Slot::One => "UPDATE messages SET like_one = ?2, updated_at = ?3 WHERE id = ?1",
            Slot::Two => "UPDATE messages SET like_two = ?2, updated_at = ?3 WHERE id = ?1",
        };
        self.update_message(id, sql, rusqlite::params![id, value, format_timestamp(now)])
    }

    pub fn set_pin(&self, id: i64, slot: Slot, value: bool, now: DateTime<Utc>) -> Result<Message> {
        let sql = match slot {
            Slot::One => "UPDATE messages SET pin_one = ?2, updated_at = ?3 WHERE id = ?1",
            Slot::Two => "UPDATE messages SET pin_two = ?2, updated_at = ?3 WHERE id = ?1",
        };
        self.update_message(id, sql, rusqlite::params![id, value, format_timestamp(now)])
    }

    /// Sets the deletion timestamp once. Returns false if the message was
    /// already deleted.
    pub fn soft_delete_message(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                rusqlite::params![id, format_timestamp(now)],
            )?;
            Ok(changed > 0)
        })
    }

    /// Messages of one conversation, newest first.
    ///
    /// With a search string every whitespace-separated term scores
    /// [`EDITED_BODY_WEIGHT`] for a hit in the edited text and [`BODY_WEIGHT`]
    /// for a hit in the original; non-matching and deleted rows drop out and the
    /// best score sorts first. `pinned_only` looks at the requester's own slot.
    /// `total` counts every matching row; `page` is derived from the offset.
    pub fn list_messages(
        &self,
        conversation_id: i64,
        requester_id: i64,
        filters: &MessageFilters,
        page: PageRequest,
    ) -> Result<Page<Message>> {
        let mut params: Vec<Value> = vec![Value::Integer(conversation_id)];
        let mut clauses = vec!["m.conversation_id = ?1".to_string()];

        let terms: Vec<&str> = filters
            .search
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default();

        if !filters.include_deleted || !terms.is_empty() {
            clauses.push("m.deleted_at IS NULL".to_string());
        }

        if filters.pinned_only {
            params.push(Value::Integer(requester_id));
            let idx = params.len();
            clauses.push(format!(
                "((m.author_id = ?{idx} AND m.{own}) OR (m.author_id <> ?{idx} AND m.{other}))",
                own = pin_column(reaction_slot(true)),
                other = pin_column(reaction_slot(false)),
            ));
        }

        let mut score_parts = Vec::with_capacity(terms.len());
        for term in &terms {
            params.push(Value::Text(format!("%{}%", escape_like(term))));
            let idx = params.len();
            score_parts.push(format!(
                "(CASE WHEN m.edited_body LIKE ?{idx} ESCAPE '\\' THEN {EDITED_BODY_WEIGHT} ELSE 0 END \
                 + CASE WHEN m.body LIKE ?{idx} ESCAPE '\\' THEN {BODY_WEIGHT} ELSE 0 END)"
            ));
        }
        let score = if score_parts.is_empty() {
            "0".to_string()
        } else {
            let expr = score_parts.join(" + ");
            clauses.push(format!("({}) > 0", expr));
            expr
        };

        let where_sql = clauses.join(" AND ");
        let count_sql = format!("SELECT COUNT(*) FROM messages m WHERE {}", where_sql);
        let count_params = params.clone();

        params.push(Value::Integer(i64::from(page.limit)));
        let limit_idx = params.len();
        params.push(Value::Integer(i64::from(page.offset)));
        let offset_idx = params.len();

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}, {score} AS score
             FROM messages m
             WHERE {where_sql}
             ORDER BY score DESC, m.created_at DESC, m.id DESC
             LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(params_from_iter(params.iter()), map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let total: i64 = conn.query_row(&count_sql, params_from_iter(count_params.iter()), |row| row.get(0))?;
            Ok(Page {
                items,
                total: total.max(0) as u64,
                page: page.offset / page.limit.max(1) + 1,
                per_page: page.limit,
            })
        })
    }

    /// Unseen, live messages written to `user_id` by the other participant,
    /// across all of the user's conversations.
    pub fn count_unread_for_user(&self, user_id: i64) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*)
                 FROM messages m
                 JOIN conversations c ON c.id = m.conversation_id
                 WHERE (c.participant_one_id = ?1 OR c.participant_two_id = ?1)
                   AND m.author_id <> ?1
                   AND m.is_seen = 0
                   AND m.deleted_at IS NULL",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }

    /// Re-read a message with its author, conversation and job (soft-deleted
    /// jobs included). Fails if the conversation or a referenced job is gone.
    pub fn get_message_detail(&self, id: i64) -> Result<Option<MessageDetail>> {
        self.with_conn(|conn| {
            let Some(message) = query_message(conn, id)? else {
                return Ok(None);
            };
            let conversation = query_conversation(conn, message.conversation_id)?.ok_or_else(|| {
                anyhow!("Conversation {} of message {} no longer exists", message.conversation_id, id)
            })?;
            let job = match conversation.job_id {
                Some(job_id) => Some(query_job(conn, job_id)?.ok_or_else(|| {
                    anyhow!("Job {} of conversation {} no longer exists", job_id, conversation.id)
                })?),
                None => None,
            };
            let author = query_user(conn, message.author_id)?;

            Ok(Some(MessageDetail {
                message,
                author,
                conversation,
                job,
            }))
        })
    }

    // -- Attachments --

    /// Record attachment metadata for already stored blobs. All rows are
    /// written in one transaction; on error none of them persist.
    pub fn insert_attachments(&self, new: &[NewAttachment<'_>], now: DateTime<Utc>) -> Result<Vec<Attachment>> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let ts = format_timestamp(now);
            let mut inserted = Vec::with_capacity(new.len());
            for attachment in new {
                tx.execute(
                    "INSERT INTO attachments (message_id, filename, alias, url, size, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    rusqlite::params![
                        attachment.message_id,
                        attachment.filename,
                        attachment.alias,
                        attachment.url,
                        attachment.size,
                        ts
                    ],
                )?;
                let id = tx.last_insert_rowid();
                inserted.push(tx.query_row(
                    &format!("SELECT {} FROM attachments WHERE id = ?1", ATTACHMENT_COLUMNS),
                    [id],
                    map_attachment,
                )?);
            }
            tx.commit()?;
            Ok(inserted)
        })
    }

    /// Batch-fetch attachments for a set of message IDs.
    pub fn get_attachments_for_messages(&self, message_ids: &[i64]) -> Result<Vec<Attachment>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {} FROM attachments WHERE message_id IN ({}) ORDER BY id",
                ATTACHMENT_COLUMNS,
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(message_ids.iter()), map_attachment)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn update_message<P: rusqlite::Params>(&self, id: i64, sql: &str, params: P) -> Result<Message> {
        self.with_conn(|conn| {
            let changed = conn.execute(sql, params)?;
            if changed == 0 {
                bail!("Message {} not found", id);
            }
            query_message(conn, id)?.ok_or_else(|| anyhow!("Message {} not found", id))
        })
    }
}

fn pin_column(slot: Slot) -> &'static str {
    match slot {
        Slot::One => "pin_one = 1",
        Slot::Two => "pin_two = 1",
    }
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn query_user(conn: &Connection, id: i64) -> Result<Option<User>> {
    conn.query_row("SELECT id, name FROM users WHERE id = ?1", [id], |row| {
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })
    .optional()
}

fn query_job(conn: &Connection, id: i64) -> Result<Option<Job>> {
    conn.query_row("SELECT id, title, deleted_at FROM jobs WHERE id = ?1", [id], |row| {
        Ok(Job {
            id: row.get(0)?,
            title: row.get(1)?,
            deleted_at: opt_timestamp(row, 2)?,
        })
    })
    .optional()
}

fn query_conversation(conn: &Connection, id: i64) -> Result<Option<Conversation>> {
    conn.query_row(
        &format!("SELECT {} FROM conversations WHERE id = ?1", CONVERSATION_COLUMNS),
        [id],
        |row| {
            Ok(Conversation {
                id: row.get(0)?,
                participant_one_id: row.get(1)?,
                participant_two_id: row.get(2)?,
                job_id: row.get(3)?,
                pin_one: row.get(4)?,
                pin_two: row.get(5)?,
                created_at: timestamp(row, 6)?,
                updated_at: timestamp(row, 7)?,
            })
        },
    )
    .optional()
}

pub(crate) fn query_message(conn: &Connection, id: i64) -> Result<Option<Message>> {
    conn.query_row(
        &format!("SELECT {} FROM messages m WHERE m.id = ?1", MESSAGE_COLUMNS),
        [id],
        map_message,
    )
    .optional()
}

pub(crate) fn map_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let status: String = row.get(6)?;
    let status = MessageStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("unknown message status '{}'", status).into(),
        )
    })?;

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        author_id: row.get(2)?,
        body: row.get(3)?,
        edited_body: row.get(4)?,
        reply_to_id: row.get(5)?,
        status,
        is_seen: row.get(7)?,
        seen_at: opt_timestamp(row, 8)?,
        like_one: row.get(9)?,
        like_two: row.get(10)?,
        pin_one: row.get(11)?,
        pin_two: row.get(12)?,
        deleted_at: opt_timestamp(row, 13)?,
        created_at: timestamp(row, 14)?,
        updated_at: timestamp(row, 15)?,
    })
}

fn map_attachment(row: &Row<'_>) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: row.get(0)?,
        message_id: row.get(1)?,
        filename: row.get(2)?,
        alias: row.get(3)?,
        url: row.get(4)?,
        size: row.get(5)?,
        created_at: timestamp(row, 6)?,
        updated_at: timestamp(row, 7)?,
    })
}

pub(crate) fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        parse_timestamp(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
    })
    .transpose()
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
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
