use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::aggregator::DEFAULT_NOTIFICATION_LIMIT;

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub public_base_url: String,
    pub upload_timeout: Duration,
    pub notification_limit: u32,
    pub per_page: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            db_path: "hirechat.db".into(),
            storage_dir: "./chat-storage".into(),
            public_base_url: "http://localhost:3000/storage".into(),
            upload_timeout: Duration::from_secs(30),
            notification_limit: DEFAULT_NOTIFICATION_LIMIT,
            per_page: 15,
        }
    }
}

impl ChatConfig {
    /// Read `HIRECHAT_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let upload_timeout = match lookup("HIRECHAT_UPLOAD_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(v.parse().context("HIRECHAT_UPLOAD_TIMEOUT_SECS")?),
            None => defaults.upload_timeout,
        };
        let notification_limit: u32 = match lookup("HIRECHAT_NOTIFICATION_LIMIT") {
            Some(v) => v.parse().context("HIRECHAT_NOTIFICATION_LIMIT")?,
            None => defaults.notification_limit,
        };
        let per_page: u32 = match lookup("HIRECHAT_PER_PAGE") {
            Some(v) => v.parse().context("HIRECHAT_PER_PAGE")?,
            None => defaults.per_page,
        };
        if notification_limit == 0 || per_page == 0 {
            anyhow::bail!("HIRECHAT_NOTIFICATION_LIMIT and HIRECHAT_PER_PAGE must be positive");
        }

        Ok(Self {
            db_path: lookup("HIRECHAT_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            storage_dir: lookup("HIRECHAT_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            public_base_url: lookup("HIRECHAT_PUBLIC_BASE_URL").unwrap_or(defaults.public_base_url),
            upload_timeout,
            notification_limit,
            per_page,
        })
    }
}
