//! Candidate selection for the staff notification feed.
//!
//! Every [`Predicate`] compiles to one parenthesised SQL condition over
//! `messages m JOIN conversations c`; a [`Conjunction`] joins them with `AND`.
//! Soft-deleted messages are never candidates.

use anyhow::Result;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tracing::debug;

use hirechat_types::filters::{Conjunction, Predicate, Retrieval};
use hirechat_types::models::{HIRE_MANAGER_ACTIVE, HIRE_MANAGER_PAUSED_ACTIVE};

use crate::Database;
use crate::models::CandidateRow;
use crate::queries::timestamp;

/// A compiled `WHERE` clause with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub params: Vec<Value>,
}

pub fn compile(conjunction: &Conjunction) -> WhereClause {
    let mut parts = vec!["m.deleted_at IS NULL".to_string()];
    let mut params = Vec::new();

    for predicate in conjunction.predicates() {
        if let Some(sql) = compile_predicate(predicate, &mut params) {
            parts.push(sql);
        }
    }

    WhereClause {
        sql: parts.join(" AND "),
        params,
    }
}

fn compile_predicate(predicate: &Predicate, params: &mut Vec<Value>) -> Option<String> {
    match predicate {
        Predicate::BySalesOwnership { hidden_freelancer_ids } => {
            if hidden_freelancer_ids.is_empty() {
                return None;
            }
            let placeholders = vec!["?"; hidden_freelancer_ids.len()].join(", ");
            params.extend(hidden_freelancer_ids.iter().map(|id| Value::Integer(*id)));
            Some(format!("(c.participant_two_id NOT IN ({}))", placeholders))
        }
        Predicate::ByJobAssignment { admin_id } => {
            params.push(Value::Integer(*admin_id));
            params.push(Value::Text(HIRE_MANAGER_ACTIVE.to_string()));
            params.push(Value::Text(HIRE_MANAGER_PAUSED_ACTIVE.to_string()));
            Some(
                "(EXISTS (SELECT 1 FROM job_hire_managers h
                          WHERE h.job_id = c.job_id AND h.admin_id = ? AND h.status IN (?, ?)))"
                    .to_string(),
            )
        }
        Predicate::HasJob => Some("(c.job_id IS NOT NULL)".to_string()),
        Predicate::WithoutJob => Some("(c.job_id IS NULL)".to_string()),
        Predicate::BySeenState { seen } => {
            // The conversation must also hold a client-seat message in the same
            // read state, so a flag flipped mid-query cannot surface alone.
            params.push(Value::Integer(i64::from(*seen)));
            params.push(Value::Integer(i64::from(*seen)));
            Some(
                "(m.is_seen = ? AND EXISTS (SELECT 1 FROM messages r
                          WHERE r.conversation_id = m.conversation_id
                            AND r.author_id = c.participant_one_id
                            AND r.is_seen = ?
                            AND r.deleted_at IS NULL))"
                    .to_string(),
            )
        }
    }
}

impl Database {
    /// Select candidate rows. When `grouped`, one row per conversation (its
    /// most recently updated message), ordered by conversation id descending.
    /// Returns the rows plus the total row count, which is only computed for
    /// [`Retrieval::Page`].
    pub fn select_notification_candidates(
        &self,
        conjunction: &Conjunction,
        grouped: bool,
        retrieval: Retrieval,
    ) -> Result<(Vec<CandidateRow>, Option<u64>)> {
        let clause = compile(conjunction);
        let base = candidate_sql(&clause, grouped);
        let (limit, offset) = retrieval.limit_offset();

        let mut params = clause.params.clone();
        params.push(Value::Integer(i64::from(limit)));
        params.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
        let sql = format!("{} LIMIT ? OFFSET ?", base);

        debug!("Notification candidates: {}", sql);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    Ok(CandidateRow {
                        message_id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        updated_at: timestamp(row, 2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let total = match retrieval {
                Retrieval::Page { .. } => {
                    let count_sql = format!("SELECT COUNT(*) FROM ({})", base);
                    let count: i64 = conn.query_row(
                        &count_sql,
                        params_from_iter(clause.params.iter()),
                        |row| row.get(0),
                    )?;
                    Some(count.max(0) as u64)
                }
                Retrieval::Limit(_) => None,
            };

            Ok((rows, total))
        })
    }

    /// Number of candidate messages, or of distinct conversations when `grouped`.
    pub fn count_notification_candidates(&self, conjunction: &Conjunction, grouped: bool) -> Result<u64> {
        let clause = compile(conjunction);
        let select = if grouped { "COUNT(DISTINCT m.conversation_id)" } else { "COUNT(*)" };
        let sql = format!(
            "SELECT {}
             FROM messages m
             JOIN conversations c ON c.id = m.conversation_id
             WHERE {}",
            select, clause.sql
        );

        self.with_conn(|conn| {
            let count: i64 = conn.query_row(&sql, params_from_iter(clause.params.iter()), |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
    }
}

fn candidate_sql(clause: &WhereClause, grouped: bool) -> String {
    if grouped {
        // SQLite fills bare columns from the row that produced MAX().
        format!(
            "SELECT m.id, m.conversation_id, MAX(m.updated_at) AS last_update
             FROM messages m
             JOIN conversations c ON c.id = m.conversation_id
             WHERE {}
             GROUP BY m.conversation_id
             ORDER BY m.conversation_id DESC, last_update DESC",
            clause.sql
        )
    } else {
        format!(
            "SELECT m.id, m.conversation_id, m.updated_at
             FROM messages m
             JOIN conversations c ON c.id = m.conversation_id
             WHERE {}
             ORDER BY m.updated_at DESC, m.id DESC",
            clause.sql
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMessage;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use hirechat_types::filters::Predicate;
    use std::collections::BTreeSet;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn send(db: &Database, conversation_id: i64, author_id: i64, at: DateTime<Utc>) -> i64 {
        db.insert_message(
            &NewMessage {
                conversation_id,
                author_id,
                body: Some("ping"),
                reply_to_id: None,
            },
            at,
        )
        .unwrap()
        .id
    }

    #[test]
    fn empty_conjunction_only_hides_deleted() {
        let clause = compile(&Conjunction::new());
        assert_eq!(clause.sql, "m.deleted_at IS NULL");
        assert!(clause.params.is_empty());
    }

    #[test]
    fn empty_sales_exclusion_compiles_to_nothing() {
        let conj = Conjunction::new().and(Predicate::BySalesOwnership {
            hidden_freelancer_ids: BTreeSet::new(),
        });
        assert_eq!(compile(&conj).sql, "m.deleted_at IS NULL");
    }

    #[test]
    fn predicates_bind_in_order() {
        let conj = Conjunction::new()
            .and(Predicate::BySalesOwnership {
                hidden_freelancer_ids: BTreeSet::from([5, 9]),
            })
            .and(Predicate::ByJobAssignment { admin_id: 3 });
        let clause = compile(&conj);
        assert_eq!(
            clause.params,
            vec![
                Value::Integer(5),
                Value::Integer(9),
                Value::Integer(3),
                Value::Text(HIRE_MANAGER_ACTIVE.into()),
                Value::Text(HIRE_MANAGER_PAUSED_ACTIVE.into()),
            ]
        );
        assert_eq!(clause.sql.matches('?').count(), clause.params.len());
    }

    #[test]
    fn grouped_selection_keeps_latest_message_per_conversation() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_conversation(1, 2, None, t0()).unwrap();
        let b = db.create_conversation(1, 3, None, t0()).unwrap();
        send(&db, a.id, 1, t0());
        let latest_a = send(&db, a.id, 1, t0() + Duration::minutes(5));
        let only_b = send(&db, b.id, 1, t0() + Duration::minutes(1));

        let (rows, total) = db
            .select_notification_candidates(&Conjunction::new(), true, Retrieval::Limit(10))
            .unwrap();
        assert!(total.is_none());
        let ids: Vec<_> = rows.iter().map(|r| (r.conversation_id, r.message_id)).collect();
        assert_eq!(ids, vec![(b.id, only_b), (a.id, latest_a)]);
    }

    #[test]
    fn paginated_selection_reports_total() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..4 {
            let conv = db.create_conversation(1, 10 + i, None, t0()).unwrap();
            send(&db, conv.id, 1, t0());
        }

        let (rows, total) = db
            .select_notification_candidates(&Conjunction::new(), true, Retrieval::Page { page: 2, per_page: 3 })
            .unwrap();
        assert_eq!(total, Some(4));
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn seen_state_requires_matching_client_message() {
        let db = Database::open_in_memory().unwrap();
        let conv = db.create_conversation(1, 2, None, t0()).unwrap();
        // Only the freelancer has written; no client-seat message exists yet.
        send(&db, conv.id, 2, t0());

        let unseen = Conjunction::new().and(Predicate::BySeenState { seen: false });
        assert_eq!(db.count_notification_candidates(&unseen, true).unwrap(), 0);

        send(&db, conv.id, 1, t0());
        assert_eq!(db.count_notification_candidates(&unseen, true).unwrap(), 1);
        assert_eq!(db.count_notification_candidates(&unseen, false).unwrap(), 2);
    }

    #[test]
    fn job_predicates() {
        let db = Database::open_in_memory().unwrap();
        let job = db.create_job("Copywriting").unwrap();
        db.assign_hire_manager(job, 42, HIRE_MANAGER_ACTIVE).unwrap();
        let with_job = db.create_conversation(1, 2, Some(job), t0()).unwrap();
        let without = db.create_conversation(1, 3, None, t0()).unwrap();
        send(&db, with_job.id, 1, t0());
        send(&db, without.id, 1, t0());

        let count = |p: Predicate| {
            db.count_notification_candidates(&Conjunction::new().and(p), true).unwrap()
        };
        assert_eq!(count(Predicate::HasJob), 1);
        assert_eq!(count(Predicate::WithoutJob), 1);
        assert_eq!(count(Predicate::ByJobAssignment { admin_id: 42 }), 1);
        assert_eq!(count(Predicate::ByJobAssignment { admin_id: 43 }), 0);
    }
}
