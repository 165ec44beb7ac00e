use std::sync::Arc;

use tempfile::tempdir;

use hirechat_core::aggregator::{NotificationFeed, NotificationQuery};
use hirechat_core::blob::DiskBlobStore;
use hirechat_core::config::ChatConfig;
use hirechat_core::service::ChatService;
use hirechat_core::ChatError;
use hirechat_db::Database;
use hirechat_gateway::dispatcher::Dispatcher;
use hirechat_types::api::UploadedFile;
use hirechat_types::events::{ChatEvent, conversation_channel};
use hirechat_types::filters::{SeenFilter, StaffRole};

const ADMIN: i64 = 900;
const SALES: i64 = 901;

struct Inbox {
    service: ChatService<DiskBlobStore, Dispatcher>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    _storage: tempfile::TempDir,
}

async fn inbox() -> Inbox {
    let storage = tempdir().unwrap();
    let db = Arc::new(Database::open_in_memory().unwrap());
    let blobs = DiskBlobStore::new(storage.path().to_path_buf(), "https://files.test").await.unwrap();
    let dispatcher = Dispatcher::new();
    let service = ChatService::new(db.clone(), blobs, dispatcher.clone(), &ChatConfig::default());
    Inbox {
        service,
        dispatcher,
        db,
        _storage: storage,
    }
}

fn conversation_ids(feed: &NotificationFeed) -> Vec<i64> {
    feed.items().iter().map(|n| n.conversation.id).collect()
}

#[tokio::test]
async fn seen_state_moves_conversation_between_feeds() {
    let inbox = inbox().await;
    let client = inbox.db.create_user("Avery").unwrap();
    let freelancer = inbox.db.create_user("Blake").unwrap();
    let conv = inbox.db.create_conversation(client, freelancer, None, chrono::Utc::now()).unwrap();
    let mut events = inbox.dispatcher.subscribe_channel(conversation_channel(conv.id));

    let seen_only = NotificationQuery::new(ADMIN, StaffRole::Admin).with_seen_filter(SeenFilter::SeenOnly);
    let unseen_only = NotificationQuery::new(ADMIN, StaffRole::Admin).with_seen_filter(SeenFilter::UnseenOnly);

    let hi = inbox.service.send_message(conv.id, client, Some("hi"), None, &[]).await.unwrap();
    assert!(conversation_ids(&inbox.service.notifications(&seen_only).unwrap()).is_empty());
    assert_eq!(conversation_ids(&inbox.service.notifications(&unseen_only).unwrap()), vec![conv.id]);
    assert_eq!(inbox.service.unread_total(freelancer).unwrap(), 1);

    inbox.service.mark_seen(hi.id, freelancer).unwrap();
    assert_eq!(conversation_ids(&inbox.service.notifications(&seen_only).unwrap()), vec![conv.id]);
    assert!(conversation_ids(&inbox.service.notifications(&unseen_only).unwrap()).is_empty());
    assert_eq!(inbox.service.unread_total(freelancer).unwrap(), 0);

    inbox.service.mark_unseen(hi.id, freelancer).unwrap();
    assert!(conversation_ids(&inbox.service.notifications(&seen_only).unwrap()).is_empty());
    assert_eq!(conversation_ids(&inbox.service.notifications(&unseen_only).unwrap()), vec![conv.id]);

    let expected = [
        ChatEvent::MessageCreated {
            conversation_id: conv.id,
            message_id: hi.id,
        },
        ChatEvent::MessageSeen {
            conversation_id: conv.id,
            message_id: hi.id,
        },
        ChatEvent::MessageUnseen {
            conversation_id: conv.id,
            message_id: hi.id,
        },
    ];
    for event in expected {
        assert_eq!(events.recv().await, Some(event));
    }
    assert_eq!(events.try_recv(), None);
}

#[tokio::test]
async fn outsiders_cannot_touch_the_conversation() {
    let inbox = inbox().await;
    let client = inbox.db.create_user("Avery").unwrap();
    let freelancer = inbox.db.create_user("Blake").unwrap();
    let outsider = inbox.db.create_user("Casey").unwrap();
    let conv = inbox.db.create_conversation(client, freelancer, None, chrono::Utc::now()).unwrap();
    let msg = inbox.service.send_message(conv.id, client, Some("hi"), None, &[]).await.unwrap();

    let denied = |r: Result<_, ChatError>| matches!(r, Err(ChatError::AccessDenied));
    assert!(denied(inbox.service.send_message(conv.id, outsider, Some("hey"), None, &[]).await.map(|_| ())));
    assert!(denied(inbox.service.mark_seen(msg.id, outsider).map(|_| ())));
    assert!(denied(inbox.service.like(msg.id, outsider, true).map(|_| ())));
    assert!(denied(inbox.service.pin(msg.id, outsider, true).map(|_| ())));
    assert!(denied(inbox.service.delete(msg.id, outsider).map(|_| ())));
}

#[tokio::test]
async fn attachments_land_on_disk_and_in_views() {
    let inbox = inbox().await;
    let client = inbox.db.create_user("Avery").unwrap();
    let freelancer = inbox.db.create_user("Blake").unwrap();
    let conv = inbox.db.create_conversation(client, freelancer, None, chrono::Utc::now()).unwrap();

    let file = UploadedFile {
        name: "scope.txt".into(),
        file: "data:text/plain;base64,c2NvcGU=".into(),
    };
    let view = inbox
        .service
        .send_message(conv.id, client, Some("scope attached"), None, &[file])
        .await
        .unwrap();

    let content = view.content.expect("live message has content");
    assert_eq!(content.attachments.len(), 1);
    let attachment = &content.attachments[0];
    assert_eq!(attachment.name, "scope.txt");
    assert_eq!(attachment.size, 5);
    assert!(
        attachment
            .url
            .starts_with(&format!("https://files.test/attachments/chat_message_{}/", view.id))
    );
}

#[tokio::test]
async fn sales_feed_respects_team_ownership() {
    let inbox = inbox().await;
    let client = inbox.db.create_user("Avery").unwrap();
    let mine = inbox.db.create_user("Mine").unwrap();
    let theirs = inbox.db.create_user("Theirs").unwrap();
    inbox.db.assign_sales_rep(mine, SALES).unwrap();
    inbox.db.assign_sales_rep(theirs, SALES + 1).unwrap();

    let now = chrono::Utc::now();
    let visible = inbox.db.create_conversation(client, mine, None, now).unwrap();
    let hidden = inbox.db.create_conversation(client, theirs, None, now).unwrap();
    for conv in [visible.id, hidden.id] {
        inbox.service.send_message(conv, client, Some("ready to start?"), None, &[]).await.unwrap();
    }

    let feed = inbox.service.notifications(&NotificationQuery::new(SALES, StaffRole::Sales)).unwrap();
    assert_eq!(conversation_ids(&feed), vec![visible.id]);

    let admin = inbox.service.notifications(&NotificationQuery::new(ADMIN, StaffRole::Admin)).unwrap();
    assert_eq!(conversation_ids(&admin), vec![hidden.id, visible.id]);
}
