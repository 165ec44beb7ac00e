//! Staff notification feed.
//!
//! The pipeline runs select -> group -> rehydrate -> dedup against the live
//! store without a surrounding transaction. A row can therefore come back
//! with a seen state that changed after it was selected; readers get an
//! eventually consistent view.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use hirechat_db::models::CandidateRow;
use hirechat_db::{Database, is_transient};
use hirechat_types::api::{MessageView, NotificationView};
use hirechat_types::filters::{JobFilter, Page, Predicate, Retrieval, SeenFilter, StaffRole};
use hirechat_types::models::{Conversation, Job, Message, User};

use crate::error::{ChatError, ChatResult};
use crate::router::{ConversationRouter, SalesAssignments};

pub const DEFAULT_NOTIFICATION_LIMIT: u32 = 50;

/// Hire-manager assignments, owned by the jobs system.
pub trait HireManagers {
    fn active_admin_for_job(&self, job_id: i64) -> anyhow::Result<Option<i64>>;
}

impl HireManagers for Database {
    fn active_admin_for_job(&self, job_id: i64) -> anyhow::Result<Option<i64>> {
        Database::active_admin_for_job(self, job_id)
    }
}

/// Identity under which conversations collapse into one feed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusinessKey {
    Job(i64),
    Pair(i64, i64),
}

impl BusinessKey {
    pub fn for_conversation(conversation: &Conversation) -> Self {
        match conversation.job_id {
            Some(job_id) => Self::Job(job_id),
            None => Self::Pair(conversation.participant_one_id, conversation.participant_two_id),
        }
    }
}

impl fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job(job_id) => write!(f, "job:{}", job_id),
            Self::Pair(one, two) => write!(f, "pair:{}-{}", one, two),
        }
    }
}

/// Which entry survives when two rows share a [`BusinessKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupPolicy {
    /// Higher `(updated_at, id)` wins, whatever the iteration order.
    #[default]
    MostRecentlyUpdated,
    /// The row seen last while iterating in candidate order wins. This is the
    /// legacy dashboard behaviour; with keys spanning several conversations it
    /// does not reliably pick the newest message.
    LastInIterationOrder,
}

impl DedupPolicy {
    pub fn replaces(self, incumbent: &Message, challenger: &Message) -> bool {
        match self {
            Self::MostRecentlyUpdated => {
                (challenger.updated_at, challenger.id) > (incumbent.updated_at, incumbent.id)
            }
            Self::LastInIterationOrder => true,
        }
    }
}

/// Collapse entries sharing a key. Survivors keep the position at which
/// their key was first seen.
pub fn deduplicate(policy: DedupPolicy, notifications: Vec<Notification>) -> Vec<Notification> {
    let mut kept: Vec<Notification> = Vec::with_capacity(notifications.len());
    let mut index: HashMap<BusinessKey, usize> = HashMap::new();

    for notification in notifications {
        match index.get(&notification.key) {
            Some(&at) => {
                if policy.replaces(&kept[at].message, &notification.message) {
                    debug!(
                        "Dedup {}: message {} replaces {}",
                        notification.key, notification.message.id, kept[at].message.id
                    );
                    kept[at] = notification;
                }
            }
            None => {
                index.insert(notification.key, kept.len());
                kept.push(notification);
            }
        }
    }
    kept
}

/// One staff feed request.
#[derive(Debug, Clone)]
pub struct NotificationQuery {
    pub staff_user_id: i64,
    pub role: StaffRole,
    pub job_filter: JobFilter,
    pub seen_filter: SeenFilter,
    pub grouped: bool,
    pub limit: Option<u32>,
    /// `(page, per_page)`, 1-based.
    pub page: Option<(u32, u32)>,
}

impl NotificationQuery {
    pub fn new(staff_user_id: i64, role: StaffRole) -> Self {
        Self {
            staff_user_id,
            role,
            job_filter: JobFilter::default(),
            seen_filter: SeenFilter::default(),
            grouped: true,
            limit: None,
            page: None,
        }
    }

    pub fn with_job_filter(mut self, job_filter: JobFilter) -> Self {
        self.job_filter = job_filter;
        self
    }

    pub fn with_seen_filter(mut self, seen_filter: SeenFilter) -> Self {
        self.seen_filter = seen_filter;
        self
    }

    pub fn with_grouped(mut self, grouped: bool) -> Self {
        self.grouped = grouped;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_page(mut self, page: u32, per_page: u32) -> Self {
        self.page = Some((page, per_page));
        self
    }

    /// Resolve the retrieval mode. `limit` and `page` are mutually exclusive;
    /// with neither, `default_limit` applies.
    pub fn retrieval(&self, default_limit: u32) -> ChatResult<Retrieval> {
        match (self.limit, self.page) {
            (Some(_), Some(_)) => Err(ChatError::InvalidFilterCombination(
                "limit and page cannot be combined",
            )),
            (Some(0), None) => Err(ChatError::InvalidFilterCombination("limit must be positive")),
            (Some(limit), None) => Ok(Retrieval::Limit(limit)),
            (None, Some((_, 0))) => Err(ChatError::InvalidFilterCombination("per_page must be positive")),
            (None, Some((page, per_page))) => Ok(Retrieval::Page {
                page: page.max(1),
                per_page,
            }),
            (None, None) => Ok(Retrieval::Limit(default_limit)),
        }
    }
}

/// A rehydrated feed entry.
#[derive(Debug, Clone)]
pub struct Notification {
    pub key: BusinessKey,
    pub message: Message,
    pub author: Option<User>,
    pub conversation: Conversation,
    pub job: Option<Job>,
    pub hire_manager_id: Option<i64>,
}

impl Notification {
    pub fn to_view(&self) -> NotificationView {
        NotificationView {
            key: self.key.to_string(),
            message: MessageView::new(&self.message, self.author.as_ref(), None, &[]),
            conversation: self.conversation.clone(),
            job: self.job.clone(),
            hire_manager_id: self.hire_manager_id,
        }
    }
}

#[derive(Debug, Clone)]
pub enum NotificationFeed {
    List(Vec<Notification>),
    /// Page metadata is taken from candidate selection, before dedup, so
    /// `items` may be shorter than `per_page` even when more pages exist.
    Paged(Page<Notification>),
}

impl NotificationFeed {
    pub fn items(&self) -> &[Notification] {
        match self {
            Self::List(items) => items,
            Self::Paged(page) => &page.items,
        }
    }

    pub fn into_views(self) -> NotificationFeedView {
        match self {
            Self::List(items) => NotificationFeedView::List(items.iter().map(Notification::to_view).collect()),
            Self::Paged(page) => {
                let views: Vec<NotificationView> = page.items.iter().map(Notification::to_view).collect();
                NotificationFeedView::Paged(page.with_items(views))
            }
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(untagged)]
pub enum NotificationFeedView {
    List(Vec<NotificationView>),
    Paged(Page<NotificationView>),
}

pub struct NotificationAggregator<'a, S = Database, H = Database> {
    db: &'a Database,
    sales: &'a S,
    hire_managers: &'a H,
    policy: DedupPolicy,
    default_limit: u32,
}

impl<'a> NotificationAggregator<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self::with_collaborators(db, db, db)
    }
}

impl<'a, S: SalesAssignments, H: HireManagers> NotificationAggregator<'a, S, H> {
    pub fn with_collaborators(db: &'a Database, sales: &'a S, hire_managers: &'a H) -> Self {
        Self {
            db,
            sales,
            hire_managers,
            policy: DedupPolicy::default(),
            default_limit: DEFAULT_NOTIFICATION_LIMIT,
        }
    }

    pub fn with_policy(mut self, policy: DedupPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_default_limit(mut self, limit: u32) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    pub fn fetch(&self, query: &NotificationQuery) -> ChatResult<NotificationFeed> {
        let retrieval = query.retrieval(self.default_limit)?;

        let mut conjunction =
            ConversationRouter::new(self.sales).route(query.staff_user_id, query.role, query.job_filter)?;
        match query.seen_filter {
            SeenFilter::UnseenOnly => conjunction.push(Predicate::BySeenState { seen: false }),
            SeenFilter::SeenOnly => conjunction.push(Predicate::BySeenState { seen: true }),
            SeenFilter::Any => {}
        }

        let (rows, total) = retry_transient("select notification candidates", || {
            self.db.select_notification_candidates(&conjunction, query.grouped, retrieval)
        })?;
        let selected = rows.len();

        let mut notifications: Vec<Notification> = rows.iter().filter_map(|row| self.rehydrate(row)).collect();
        if query.grouped {
            notifications = deduplicate(self.policy, notifications);
        }

        debug!(
            "Staff {} feed: {} candidate(s), {} after rehydration and dedup",
            query.staff_user_id,
            selected,
            notifications.len()
        );

        Ok(match retrieval {
            Retrieval::Limit(_) => NotificationFeed::List(notifications),
            Retrieval::Page { page, per_page } => NotificationFeed::Paged(Page {
                total: total.unwrap_or(selected as u64),
                items: notifications,
                page,
                per_page,
            }),
        })
    }

    /// Unseen candidate messages for this staff account, or conversations
    /// holding one when `grouped`.
    pub fn unread_count(
        &self,
        staff_user_id: i64,
        role: StaffRole,
        job_filter: JobFilter,
        grouped: bool,
    ) -> ChatResult<u64> {
        let conjunction = ConversationRouter::new(self.sales)
            .route(staff_user_id, role, job_filter)?
            .and(Predicate::BySeenState { seen: false });
        retry_transient("count notification candidates", || {
            self.db.count_notification_candidates(&conjunction, grouped)
        })
    }

    /// Re-read one candidate. Rows that cannot be rehydrated are dropped so a
    /// single broken reference never fails the whole feed.
    fn rehydrate(&self, row: &CandidateRow) -> Option<Notification> {
        let detail = match retry_transient("rehydrate message", || self.db.get_message_detail(row.message_id)) {
            Ok(Some(detail)) => detail,
            Ok(None) => {
                warn!("Notification candidate {} vanished before rehydration", row.message_id);
                return None;
            }
            Err(e) => {
                warn!("Dropping notification candidate {}: {}", row.message_id, e);
                return None;
            }
        };

        if detail.message.is_deleted() {
            debug!("Skipping message {}: deleted after selection", row.message_id);
            return None;
        }
        if detail.message.body.as_deref().is_none_or(|b| b.trim().is_empty()) {
            debug!("Skipping message {}: empty body", row.message_id);
            return None;
        }

        let hire_manager_id = match detail.conversation.job_id {
            Some(job_id) => match self.hire_managers.active_admin_for_job(job_id) {
                Ok(admin) => admin,
                Err(e) => {
                    warn!("Dropping notification candidate {}: hire manager lookup failed: {}", row.message_id, e);
                    return None;
                }
            },
            None => None,
        };

        Some(Notification {
            key: BusinessKey::for_conversation(&detail.conversation),
            message: detail.message,
            author: detail.author,
            conversation: detail.conversation,
            job: detail.job,
            hire_manager_id,
        })
    }
}

/// Run `op`, retrying once if the store reports a busy or locked database.
fn retry_transient<T>(what: &str, mut op: impl FnMut() -> anyhow::Result<T>) -> ChatResult<T> {
    match op() {
        Err(e) if is_transient(&e) => {
            warn!("Transient failure during {}, retrying once: {}", what, e);
            Ok(op()?)
        }
        other => Ok(other?),
    }
}
