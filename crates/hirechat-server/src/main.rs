use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use hirechat_core::aggregator::NotificationQuery;
use hirechat_core::blob::DiskBlobStore;
use hirechat_core::config::ChatConfig;
use hirechat_core::service::ChatService;
use hirechat_db::Database;
use hirechat_gateway::dispatcher::Dispatcher;
use hirechat_types::filters::{JobFilter, SeenFilter, StaffRole};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hirechat=debug".into()),
        )
        .init();

    // Config
    let config = ChatConfig::from_env()?;
    let query = staff_query_from_env(&config)?;

    // Init database and collaborators
    let db = Arc::new(Database::open(&config.db_path)?);
    let blobs = DiskBlobStore::new(config.storage_dir.clone(), config.public_base_url.clone()).await?;
    let service = ChatService::new(db, blobs, Dispatcher::new(), &config);

    info!(
        "Notification feed for staff {} ({:?}, jobs={:?}, seen={:?}, grouped={})",
        query.staff_user_id, query.role, query.job_filter, query.seen_filter, query.grouped
    );

    let unread = service.unread_notifications(&query)?;
    let feed = service.notifications(&query)?;
    info!("{} entr(ies), {} unread", feed.items().len(), unread);

    println!("{}", serde_json::to_string_pretty(&feed.into_views())?);
    Ok(())
}

fn staff_query_from_env(config: &ChatConfig) -> anyhow::Result<NotificationQuery> {
    let staff_user_id: i64 = std::env::var("HIRECHAT_STAFF_ID")
        .context("HIRECHAT_STAFF_ID is required")?
        .parse()
        .context("HIRECHAT_STAFF_ID")?;
    let role: StaffRole = std::env::var("HIRECHAT_STAFF_ROLE")
        .unwrap_or_else(|_| "admin".into())
        .parse()?;
    let job_filter: JobFilter = std::env::var("HIRECHAT_JOB_FILTER").unwrap_or_default().parse()?;
    let seen_filter: SeenFilter = std::env::var("HIRECHAT_SEEN_FILTER")
        .unwrap_or_else(|_| "unseen".into())
        .parse()?;
    let grouped = std::env::var("HIRECHAT_GROUPED")
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true);

    let mut query = NotificationQuery::new(staff_user_id, role)
        .with_job_filter(job_filter)
        .with_seen_filter(seen_filter)
        .with_grouped(grouped);
    if let Ok(page) = std::env::var("HIRECHAT_PAGE") {
        query = query.with_page(page.parse().context("HIRECHAT_PAGE")?, config.per_page);
    }
    Ok(query)
}
