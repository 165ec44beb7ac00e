use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use hirechat_db::Database;
use hirechat_types::api::{MessageFilters, MessageView, PageRequest, UploadedFile};
use hirechat_types::events::{Broadcaster, ChatEvent};
use hirechat_types::filters::Page;
use hirechat_types::models::Message;

use crate::aggregator::{NotificationAggregator, NotificationFeed, NotificationQuery};
use crate::attachments::{AttachmentBinder, prepare_all};
use crate::blob::BlobStore;
use crate::config::ChatConfig;
use crate::error::{ChatError, ChatResult};
use crate::store::MessageStore;

/// Calls into the store, then publishes the resulting event. The store never
/// publishes on its own.
pub struct ChatService<B: BlobStore, P: Broadcaster> {
    db: Arc<Database>,
    store: MessageStore,
    binder: AttachmentBinder<B>,
    broadcaster: P,
    notification_limit: u32,
}

impl<B: BlobStore, P: Broadcaster> ChatService<B, P> {
    pub fn new(db: Arc<Database>, blobs: B, broadcaster: P, config: &ChatConfig) -> Self {
        Self {
            store: MessageStore::new(db.clone()),
            binder: AttachmentBinder::new(db.clone(), blobs, config.upload_timeout),
            db,
            broadcaster,
            notification_limit: config.notification_limit,
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Create a message and bind its attachments. Every file is validated
    /// before the message is written. If any upload then fails, the blobs
    /// already stored are removed, no attachment row is kept, the new message
    /// is soft-deleted again and no event is published.
    pub async fn send_message(
        &self,
        conversation_id: i64,
        author_id: i64,
        body: Option<&str>,
        reply_to_id: Option<i64>,
        files: &[UploadedFile],
    ) -> ChatResult<MessageView> {
        let prepared = prepare_all(files)?;
        let message = self.store.create(conversation_id, author_id, body, reply_to_id)?;

        if let Err(e) = self.binder.bind_all(message.id, prepared).await {
            warn!("Rolling back message {} after attachment failure", message.id);
            self.db.soft_delete_message(message.id, Utc::now())?;
            return Err(e);
        }

        self.publish(ChatEvent::MessageCreated {
            conversation_id,
            message_id: message.id,
        });
        self.view(&message)
    }

    /// Edit a message inside its window. New files are appended to the
    /// existing attachments.
    ///
    /// Uploads run before the text is changed, so a failed upload leaves the
    /// message untouched. Once the edit is written `message-updated` is
    /// published even if recording the attachments fails.
    pub async fn edit_message(
        &self,
        message_id: i64,
        actor_id: i64,
        new_body: &str,
        files: &[UploadedFile],
    ) -> ChatResult<MessageView> {
        let prepared = prepare_all(files)?;
        let now = Utc::now();
        self.store.check_editable(message_id, actor_id, now)?;

        let uploaded = self.binder.upload_all(message_id, prepared).await?;
        let message = match self.store.update_at(message_id, actor_id, new_body, now) {
            Ok(message) => message,
            Err(e) => {
                self.binder.discard(message_id, &uploaded).await;
                return Err(e);
            }
        };
        let recorded = self.binder.record(message_id, &uploaded).await;

        self.publish(ChatEvent::MessageUpdated {
            conversation_id: message.conversation_id,
            message_id,
        });
        recorded?;
        self.view(&message)
    }

    pub fn mark_seen(&self, message_id: i64, actor_id: i64) -> ChatResult<Message> {
        let message = self.store.mark_seen(message_id, actor_id)?;
        self.publish(ChatEvent::MessageSeen {
            conversation_id: message.conversation_id,
            message_id,
        });
        Ok(message)
    }

    pub fn mark_unseen(&self, message_id: i64, actor_id: i64) -> ChatResult<Message> {
        let message = self.store.mark_unseen(message_id, actor_id)?;
        self.publish(ChatEvent::MessageUnseen {
            conversation_id: message.conversation_id,
            message_id,
        });
        Ok(message)
    }

    pub fn like(&self, message_id: i64, actor_id: i64, value: bool) -> ChatResult<Message> {
        let message = self.store.like(message_id, actor_id, value)?;
        self.publish(ChatEvent::MessageLiked {
            conversation_id: message.conversation_id,
            message_id,
        });
        Ok(message)
    }

    pub fn pin(&self, message_id: i64, actor_id: i64, value: bool) -> ChatResult<Message> {
        let message = self.store.pin(message_id, actor_id, value)?;
        self.publish(ChatEvent::MessagePinned {
            conversation_id: message.conversation_id,
            message_id,
        });
        Ok(message)
    }

    pub fn delete(&self, message_id: i64, actor_id: i64) -> ChatResult<MessageView> {
        let message = self.store.delete(message_id, actor_id)?;
        self.publish(ChatEvent::MessageDeleted {
            conversation_id: message.conversation_id,
            message_id,
        });
        self.view(&message)
    }

    pub fn list_messages(
        &self,
        conversation_id: i64,
        requester_id: i64,
        filters: &MessageFilters,
        page: PageRequest,
    ) -> ChatResult<Page<MessageView>> {
        let listed = self.store.list_by_conversation(conversation_id, requester_id, filters, page)?;
        let views = self.store.present(&listed.items)?;
        Ok(listed.with_items(views))
    }

    pub fn unread_total(&self, user_id: i64) -> ChatResult<u64> {
        self.store.unread_total(user_id)
    }

    pub fn notifications(&self, query: &NotificationQuery) -> ChatResult<NotificationFeed> {
        NotificationAggregator::new(&self.db)
            .with_default_limit(self.notification_limit)
            .fetch(query)
    }

    /// Unseen feed candidates under the query's routing, ignoring its seen
    /// filter and pagination.
    pub fn unread_notifications(&self, query: &NotificationQuery) -> ChatResult<u64> {
        NotificationAggregator::new(&self.db).unread_count(
            query.staff_user_id,
            query.role,
            query.job_filter,
            query.grouped,
        )
    }

    fn view(&self, message: &Message) -> ChatResult<MessageView> {
        self.store
            .present(std::slice::from_ref(message))?
            .pop()
            .ok_or_else(|| ChatError::message_not_found(message.id))
    }

    fn publish(&self, event: ChatEvent) {
        info!("{} conversation={} message={}", event.name(), event.conversation_id(), event.message_id());
        self.broadcaster.publish(&event.channel(), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::StoredBlob;
    use hirechat_types::models::MessageStatus;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, ChatEvent)>>);

    impl Broadcaster for Recorder {
        fn publish(&self, channel: &str, event: ChatEvent) {
            self.0.lock().unwrap().push((channel.to_string(), event));
        }
    }

    impl Recorder {
        fn names(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().iter().map(|(_, e)| e.name()).collect()
        }
    }

    /// In-memory blobs. Uploads numbered `fail_from` and later fail.
    struct MemoryStore {
        fail_from: usize,
        uploads: AtomicUsize,
        stored: Mutex<Vec<String>>,
    }

    impl BlobStore for MemoryStore {
        async fn upload(&self, bytes: Vec<u8>, path_prefix: &str, extension: &str) -> anyhow::Result<StoredBlob> {
            let n = self.uploads.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_from {
                anyhow::bail!("storage offline");
            }
            let filename = format!("f{}.{}", n, extension);
            self.stored.lock().unwrap().push(format!("{}/{}", path_prefix, filename));
            Ok(StoredBlob {
                url: format!("mem://{}/{}", path_prefix, filename),
                size: bytes.len() as u64,
                filename,
            })
        }

        async fn remove(&self, path_prefix: &str, filename: &str) -> anyhow::Result<()> {
            let path = format!("{}/{}", path_prefix, filename);
            self.stored.lock().unwrap().retain(|p| *p != path);
            Ok(())
        }
    }

    struct Fixture {
        service: ChatService<MemoryStore, Recorder>,
        db: Arc<Database>,
        conversation_id: i64,
        client: i64,
        freelancer: i64,
    }

    fn fixture(fail_uploads: bool) -> Fixture {
        fixture_failing_from(if fail_uploads { 0 } else { usize::MAX })
    }

    fn fixture_failing_from(fail_from: usize) -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let client = db.create_user("Client").unwrap();
        let freelancer = db.create_user("Freelancer").unwrap();
        let conversation_id = db.create_conversation(client, freelancer, None, Utc::now()).unwrap().id;
        let service = ChatService::new(
            db.clone(),
            MemoryStore {
                fail_from,
                uploads: AtomicUsize::new(0),
                stored: Mutex::new(Vec::new()),
            },
            Recorder::default(),
            &ChatConfig::default(),
        );
        Fixture {
            service,
            db,
            conversation_id,
            client,
            freelancer,
        }
    }

    fn brief() -> UploadedFile {
        UploadedFile {
            name: "brief.pdf".into(),
            file: "aGVsbG8=".into(),
        }
    }

    #[tokio::test]
    async fn every_write_publishes_once() {
        let f = fixture(false);
        let view = f
            .service
            .send_message(f.conversation_id, f.client, Some("hi"), None, &[brief()])
            .await
            .unwrap();
        let content = view.content.as_ref().unwrap();
        assert_eq!(content.attachments.len(), 1);
        assert_eq!(content.message.as_deref(), Some("hi"));

        f.service.edit_message(view.id, f.client, "hi there", &[]).await.unwrap();
        f.service.mark_seen(view.id, f.freelancer).unwrap();
        f.service.mark_unseen(view.id, f.freelancer).unwrap();
        f.service.like(view.id, f.freelancer, true).unwrap();
        f.service.pin(view.id, f.freelancer, true).unwrap();
        let deleted = f.service.delete(view.id, f.client).unwrap();
        assert!(deleted.content.is_none());

        assert_eq!(
            f.service.broadcaster.names(),
            vec![
                "message-created",
                "message-updated",
                "message-seen",
                "message-unseen",
                "message-liked",
                "message-pinned",
                "message-deleted",
            ]
        );
        let channels: Vec<String> = f.service.broadcaster.0.lock().unwrap().iter().map(|(c, _)| c.clone()).collect();
        assert!(channels.iter().all(|c| *c == format!("conversation.{}", f.conversation_id)));
    }

    #[tokio::test]
    async fn failed_write_publishes_nothing() {
        let f = fixture(false);
        let err = f.service.mark_seen(9999, f.freelancer).unwrap_err();
        assert!(matches!(err, ChatError::NotFound { .. }));

        let msg = f.service.store().create(f.conversation_id, f.client, Some("hi"), None).unwrap();
        let err = f.service.mark_seen(msg.id, f.client).unwrap_err();
        assert!(matches!(err, ChatError::SelfSeenNotAllowed));
        assert!(f.service.broadcaster.names().is_empty());
    }

    #[tokio::test]
    async fn invalid_files_reject_before_writing() {
        let f = fixture(false);
        let bad = UploadedFile {
            name: "virus.exe".into(),
            file: "aGVsbG8=".into(),
        };
        let err = f
            .service
            .send_message(f.conversation_id, f.client, Some("hi"), None, &[bad])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidAttachment(_)));
        assert_eq!(f.service.unread_total(f.freelancer).unwrap(), 0);
    }

    #[tokio::test]
    async fn upload_failure_rolls_back_the_message() {
        let f = fixture(true);
        let err = f
            .service
            .send_message(f.conversation_id, f.client, Some("hi"), None, &[brief()])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AttachmentUploadFailed(_)));
        assert!(f.service.broadcaster.names().is_empty());
        assert_eq!(f.service.unread_total(f.freelancer).unwrap(), 0);

        let listed = f
            .service
            .list_messages(
                f.conversation_id,
                f.client,
                &MessageFilters {
                    include_deleted: true,
                    ..MessageFilters::default()
                },
                PageRequest::default(),
            )
            .unwrap();
        assert_eq!(listed.total, 1);
        assert!(listed.items[0].deleted_at.is_some());
        assert!(f.db.get_attachments_for_messages(&[listed.items[0].id]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_upload_failing_keeps_no_attachments() {
        let f = fixture_failing_from(1);
        let err = f
            .service
            .send_message(f.conversation_id, f.client, Some("two files"), None, &[brief(), brief()])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AttachmentUploadFailed(_)));
        assert!(f.service.broadcaster.names().is_empty());

        let blobs = &f.service.binder.blobs;
        assert_eq!(blobs.uploads.load(Ordering::SeqCst), 2);
        assert!(blobs.stored.lock().unwrap().is_empty());

        let all = MessageFilters {
            include_deleted: true,
            ..MessageFilters::default()
        };
        let listed = f.db.list_messages(f.conversation_id, f.client, &all, PageRequest::default()).unwrap();
        assert_eq!(listed.total, 1);
        assert!(listed.items[0].is_deleted());
        assert!(f.db.get_attachments_for_messages(&[listed.items[0].id]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_upload_on_edit_leaves_the_message_untouched() {
        let f = fixture_failing_from(0);
        let msg = f.service.send_message(f.conversation_id, f.client, Some("draft"), None, &[]).await.unwrap();

        let err = f
            .service
            .edit_message(msg.id, f.client, "final", &[brief()])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AttachmentUploadFailed(_)));

        let stored = f.db.get_message(msg.id).unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Original);
        assert_eq!(stored.body.as_deref(), Some("draft"));
        assert!(stored.edited_body.is_none());
        assert_eq!(f.service.broadcaster.names(), vec!["message-created"]);
    }

    #[tokio::test]
    async fn rejected_edit_uploads_nothing() {
        let f = fixture(false);
        let msg = f.service.send_message(f.conversation_id, f.client, Some("draft"), None, &[]).await.unwrap();

        let err = f
            .service
            .edit_message(msg.id, f.freelancer, "hijack", &[brief()])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AccessDenied));
        assert_eq!(f.service.binder.blobs.uploads.load(Ordering::SeqCst), 0);
        assert!(f.db.get_attachments_for_messages(&[msg.id]).unwrap().is_empty());
    }
}
