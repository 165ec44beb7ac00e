//! Staff routing vocabulary shared by the router, the aggregator and the
//! query layer.
//!
//! A [`Conjunction`] is a flat list of [`Predicate`]s that must all hold for a
//! candidate message. Each variant is self-contained so any combination can be
//! built and tested on its own.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Sales,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobFilter {
    #[default]
    Any,
    WithJob,
    WithoutJob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeenFilter {
    #[default]
    UnseenOnly,
    SeenOnly,
    Any,
}

/// One visibility constraint over the message/conversation join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Hide conversations whose freelancer seat belongs to another sales rep.
    BySalesOwnership { hidden_freelancer_ids: BTreeSet<i64> },
    /// Only conversations whose job is actively managed by `admin_id`.
    ByJobAssignment { admin_id: i64 },
    /// Only conversations tied to some job.
    HasJob,
    /// Only conversations with no job at all.
    WithoutJob,
    /// Message seen flag plus the conversation-level read-state guard.
    BySeenState { seen: bool },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conjunction(Vec<Predicate>);

impl Conjunction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.0.push(predicate);
        self
    }

    pub fn push(&mut self, predicate: Predicate) {
        self.0.push(predicate);
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// How many candidate rows to fetch. The two modes never mix in one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Retrieval {
    Limit(u32),
    Page { page: u32, per_page: u32 },
}

impl Retrieval {
    /// SQL `LIMIT`/`OFFSET` pair for this retrieval.
    pub fn limit_offset(&self) -> (u32, u64) {
        match *self {
            Self::Limit(limit) => (limit, 0),
            Self::Page { page, per_page } => {
                (per_page, u64::from(page.saturating_sub(1)) * u64::from(per_page))
            }
        }
    }
}

/// Length-aware page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn last_page(&self) -> u32 {
        if self.per_page == 0 {
            return 1;
        }
        let pages = self.total.div_ceil(u64::from(self.per_page));
        u32::try_from(pages.max(1)).unwrap_or(u32::MAX)
    }

    /// Swap the item collection while keeping the page metadata.
    pub fn with_items<U>(self, items: Vec<U>) -> Page<U> {
        Page {
            items,
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFilterError {
    kind: &'static str,
    value: String,
}

impl fmt::Display for ParseFilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for ParseFilterError {}

impl FromStr for StaffRole {
    type Err = ParseFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sales" => Ok(Self::Sales),
            "admin" => Ok(Self::Admin),
            _ => Err(ParseFilterError { kind: "staff role", value: s.to_string() }),
        }
    }
}

impl FromStr for JobFilter {
    type Err = ParseFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" | "" => Ok(Self::Any),
            "with_job" | "with-job" => Ok(Self::WithJob),
            "without_job" | "without-job" => Ok(Self::WithoutJob),
            _ => Err(ParseFilterError { kind: "job filter", value: s.to_string() }),
        }
    }
}

impl FromStr for SeenFilter {
    type Err = ParseFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unseen" | "unseen_only" => Ok(Self::UnseenOnly),
            "seen" | "seen_only" => Ok(Self::SeenOnly),
            "any" | "" => Ok(Self::Any),
            _ => Err(ParseFilterError { kind: "seen filter", value: s.to_string() }),
        }
    }
}
