use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::Utc;
use tracing::{info, warn};

use hirechat_db::Database;
use hirechat_db::models::NewAttachment;
use hirechat_types::api::UploadedFile;
use hirechat_types::models::Attachment;

use crate::blob::{BlobStore, StoredBlob};
use crate::error::{ChatError, ChatResult};

pub const MAX_ATTACHMENTS_PER_MESSAGE: usize = 12;
pub const MAX_FILE_NAME_LEN: usize = 255;

pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "pdf", "doc", "docx", "xls", "xlsx", "ppt",
    "pptx", "csv", "txt", "rtf", "odt", "zip", "rar", "mp3", "mp4", "mov", "psd", "ai",
];

/// A file that passed validation and is ready for upload.
#[derive(Debug, Clone)]
pub struct PreparedFile {
    pub alias: String,
    pub extension: String,
    pub bytes: Vec<u8>,
}

/// Validate one uploaded file: name length, extension allow-list and base64
/// payload (a leading `data:...;base64,` header is stripped).
pub fn prepare(file: &UploadedFile) -> ChatResult<PreparedFile> {
    let name = file.name.trim();
    if name.is_empty() || name.chars().count() > MAX_FILE_NAME_LEN {
        return Err(ChatError::InvalidAttachment(format!(
            "file name must be 1..={} characters",
            MAX_FILE_NAME_LEN
        )));
    }

    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|e| ALLOWED_EXTENSIONS.contains(&e.as_str()))
        .ok_or_else(|| ChatError::InvalidAttachment(format!("extension of '{}' is not allowed", name)))?;

    let payload = match file.file.split_once(";base64,") {
        Some((header, data)) if header.starts_with("data:") => data,
        _ => file.file.as_str(),
    };
    let bytes = B64
        .decode(payload.trim())
        .map_err(|e| ChatError::InvalidAttachment(format!("'{}' is not valid base64: {}", name, e)))?;
    if bytes.is_empty() {
        return Err(ChatError::InvalidAttachment(format!("'{}' is empty", name)));
    }

    Ok(PreparedFile {
        alias: name.to_string(),
        extension,
        bytes,
    })
}

/// Validate a whole batch before anything is written.
pub fn prepare_all(files: &[UploadedFile]) -> ChatResult<Vec<PreparedFile>> {
    if files.len() > MAX_ATTACHMENTS_PER_MESSAGE {
        return Err(ChatError::InvalidAttachment(format!(
            "at most {} attachments per message",
            MAX_ATTACHMENTS_PER_MESSAGE
        )));
    }
    files.iter().map(prepare).collect()
}

/// A blob that reached storage but has no attachment row yet.
#[derive(Debug, Clone)]
pub struct UploadedAttachment {
    pub alias: String,
    pub blob: StoredBlob,
}

/// Uploads files through a [`BlobStore`] and records them against a message.
/// Rows are written only once every upload of a batch succeeded, in a single
/// transaction. Blobs of a failed batch are removed again.
pub struct AttachmentBinder<B: BlobStore> {
    db: Arc<Database>,
    pub(crate) blobs: B,
    upload_timeout: Duration,
}

fn blob_prefix(message_id: i64) -> String {
    format!("attachments/chat_message_{}", message_id)
}

impl<B: BlobStore> AttachmentBinder<B> {
    pub fn new(db: Arc<Database>, blobs: B, upload_timeout: Duration) -> Self {
        Self {
            db,
            blobs,
            upload_timeout,
        }
    }

    pub async fn bind(&self, message_id: i64, file: &UploadedFile) -> ChatResult<Attachment> {
        let prepared = prepare(file)?;
        self.bind_all(message_id, vec![prepared])
            .await?
            .pop()
            .ok_or_else(|| ChatError::AttachmentUploadFailed(format!("nothing recorded for '{}'", file.name)))
    }

    /// Upload and record a validated batch. Either every file ends up bound
    /// or none does.
    pub async fn bind_all(&self, message_id: i64, files: Vec<PreparedFile>) -> ChatResult<Vec<Attachment>> {
        let uploaded = self.upload_all(message_id, files).await?;
        self.record(message_id, &uploaded).await
    }

    /// Upload a batch in order. On the first failure the blobs already
    /// stored for this batch are removed and the error is returned.
    pub async fn upload_all(
        &self,
        message_id: i64,
        files: Vec<PreparedFile>,
    ) -> ChatResult<Vec<UploadedAttachment>> {
        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            match self.upload(message_id, file).await {
                Ok(done) => uploaded.push(done),
                Err(e) => {
                    self.discard(message_id, &uploaded).await;
                    return Err(e);
                }
            }
        }
        Ok(uploaded)
    }

    /// Write the rows for uploaded blobs. If the insert fails the blobs are
    /// discarded.
    pub async fn record(&self, message_id: i64, uploaded: &[UploadedAttachment]) -> ChatResult<Vec<Attachment>> {
        if uploaded.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<NewAttachment<'_>> = uploaded
            .iter()
            .map(|u| NewAttachment {
                message_id,
                filename: &u.blob.filename,
                alias: &u.alias,
                url: &u.blob.url,
                size: i64::try_from(u.blob.size).unwrap_or(i64::MAX),
            })
            .collect();

        match self.db.insert_attachments(&rows, Utc::now()) {
            Ok(attachments) => {
                info!("{} attachment(s) bound to message {}", attachments.len(), message_id);
                Ok(attachments)
            }
            Err(e) => {
                self.discard(message_id, uploaded).await;
                Err(e.into())
            }
        }
    }

    /// Best-effort removal of uploaded blobs that will not be recorded.
    pub async fn discard(&self, message_id: i64, uploaded: &[UploadedAttachment]) {
        let prefix = blob_prefix(message_id);
        for item in uploaded {
            if let Err(e) = self.blobs.remove(&prefix, &item.blob.filename).await {
                warn!(
                    "Could not remove orphaned blob {}/{} for message {}: {}",
                    prefix, item.blob.filename, message_id, e
                );
            }
        }
    }

    async fn upload(&self, message_id: i64, file: PreparedFile) -> ChatResult<UploadedAttachment> {
        let prefix = blob_prefix(message_id);
        let upload = self.blobs.upload(file.bytes, &prefix, &file.extension);

        match tokio::time::timeout(self.upload_timeout, upload).await {
            Ok(Ok(blob)) => Ok(UploadedAttachment {
                alias: file.alias,
                blob,
            }),
            Ok(Err(e)) => {
                warn!("Upload of '{}' for message {} failed: {}", file.alias, message_id, e);
                Err(ChatError::AttachmentUploadFailed(e.to_string()))
            }
            Err(_) => {
                warn!(
                    "Upload of '{}' for message {} timed out after {:?}",
                    file.alias, message_id, self.upload_timeout
                );
                Err(ChatError::AttachmentUploadFailed("upload timed out".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingStore;

    impl BlobStore for FailingStore {
        fn upload(
            &self,
            _bytes: Vec<u8>,
            _path_prefix: &str,
            _extension: &str,
        ) -> impl Future<Output = anyhow::Result<StoredBlob>> + Send {
            async { Err(anyhow::anyhow!("bucket unavailable")) }
        }

        fn remove(&self, _path_prefix: &str, _filename: &str) -> impl Future<Output = anyhow::Result<()>> + Send {
            async { Ok(()) }
        }
    }

    struct SlowStore;

    impl BlobStore for SlowStore {
        async fn upload(&self, bytes: Vec<u8>, _path_prefix: &str, _extension: &str) -> anyhow::Result<StoredBlob> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(StoredBlob {
                url: "http://never".into(),
                size: bytes.len() as u64,
                filename: "never".into(),
            })
        }

        async fn remove(&self, _path_prefix: &str, _filename: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Keeps blob paths in memory. Uploads past `fail_from` fail.
    #[derive(Default)]
    struct MemoryStore {
        fail_from: Option<usize>,
        uploads: AtomicUsize,
        stored: Mutex<Vec<String>>,
    }

    impl MemoryStore {
        fn failing_from(n: usize) -> Self {
            Self {
                fail_from: Some(n),
                ..Self::default()
            }
        }

        fn stored(&self) -> Vec<String> {
            self.stored.lock().unwrap().clone()
        }
    }

    impl BlobStore for MemoryStore {
        async fn upload(&self, bytes: Vec<u8>, path_prefix: &str, extension: &str) -> anyhow::Result<StoredBlob> {
            let n = self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.fail_from.is_some_and(|from| n >= from) {
                anyhow::bail!("quota exceeded");
            }
            let filename = format!("file{}.{}", n, extension);
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

    fn file(name: &str, content: &str) -> UploadedFile {
        UploadedFile {
            name: name.into(),
            file: content.into(),
        }
    }

    fn message_fixture() -> (Arc<Database>, i64) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let conv = db.create_conversation(1, 2, None, Utc::now()).unwrap();
        let msg = db
            .insert_message(
                &hirechat_db::models::NewMessage {
                    conversation_id: conv.id,
                    author_id: 1,
                    body: Some("see attached"),
                    reply_to_id: None,
                },
                Utc::now(),
            )
            .unwrap();
        (db, msg.id)
    }

    #[test]
    fn validation_rules() {
        let ok = prepare(&file("Brief.PDF", "aGVsbG8=")).unwrap();
        assert_eq!(ok.extension, "pdf");
        assert_eq!(ok.bytes, b"hello");

        let data_url = prepare(&file("logo.png", "data:image/png;base64,aGVsbG8=")).unwrap();
        assert_eq!(data_url.bytes, b"hello");

        assert!(matches!(prepare(&file("run.exe", "aGVsbG8=")), Err(ChatError::InvalidAttachment(_))));
        assert!(matches!(prepare(&file("noext", "aGVsbG8=")), Err(ChatError::InvalidAttachment(_))));
        assert!(matches!(prepare(&file("a.txt", "***")), Err(ChatError::InvalidAttachment(_))));

        let long_name = format!("{}.txt", "a".repeat(MAX_FILE_NAME_LEN));
        assert!(matches!(prepare(&file(&long_name, "aGVsbG8=")), Err(ChatError::InvalidAttachment(_))));
    }

    #[test]
    fn batch_limit() {
        let files: Vec<_> = (0..=MAX_ATTACHMENTS_PER_MESSAGE)
            .map(|i| file(&format!("{}.txt", i), "aGVsbG8="))
            .collect();
        assert!(matches!(prepare_all(&files), Err(ChatError::InvalidAttachment(_))));
        assert_eq!(prepare_all(&files[1..]).unwrap().len(), MAX_ATTACHMENTS_PER_MESSAGE);
    }

    #[tokio::test]
    async fn binds_after_upload() {
        let (db, message_id) = message_fixture();
        let binder = AttachmentBinder::new(db.clone(), MemoryStore::default(), Duration::from_secs(5));

        let attachment = binder.bind(message_id, &file("notes.txt", "aGVsbG8=")).await.unwrap();
        assert_eq!(attachment.alias, "notes.txt");
        assert_eq!(attachment.size, 5);
        assert_eq!(
            attachment.url,
            format!("mem://attachments/chat_message_{}/file0.txt", message_id)
        );
        assert_eq!(db.get_attachments_for_messages(&[message_id]).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn later_failure_in_batch_leaves_nothing_behind() {
        let (db, message_id) = message_fixture();
        let binder = AttachmentBinder::new(db.clone(), MemoryStore::failing_from(1), Duration::from_secs(5));
        let files = prepare_all(&[file("a.txt", "aGVsbG8="), file("b.txt", "aGVsbG8=")]).unwrap();

        let result = binder.bind_all(message_id, files).await;
        assert!(matches!(result, Err(ChatError::AttachmentUploadFailed(_))));
        assert_eq!(binder.blobs.uploads.load(Ordering::SeqCst), 2);
        assert!(binder.blobs.stored().is_empty());
        assert!(db.get_attachments_for_messages(&[message_id]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_insert_discards_uploaded_blobs() {
        let (db, message_id) = message_fixture();
        let binder = AttachmentBinder::new(db.clone(), MemoryStore::default(), Duration::from_secs(5));
        let missing_message = message_id + 1000;
        let files = prepare_all(&[file("a.txt", "aGVsbG8=")]).unwrap();

        let uploaded = binder.upload_all(missing_message, files).await.unwrap();
        assert_eq!(binder.blobs.stored().len(), 1);

        let result = binder.record(missing_message, &uploaded).await;
        assert!(matches!(result, Err(ChatError::RepositoryFailure(_))));
        assert!(binder.blobs.stored().is_empty());
    }

    #[tokio::test]
    async fn failed_upload_persists_nothing() {
        let (db, message_id) = message_fixture();
        let binder = AttachmentBinder::new(db.clone(), FailingStore, Duration::from_secs(5));

        let result = binder.bind(message_id, &file("notes.txt", "aGVsbG8=")).await;
        assert!(matches!(result, Err(ChatError::AttachmentUploadFailed(_))));
        assert!(db.get_attachments_for_messages(&[message_id]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_upload_times_out() {
        let (db, message_id) = message_fixture();
        let binder = AttachmentBinder::new(db.clone(), SlowStore, Duration::from_millis(50));

        let result = binder.bind(message_id, &file("notes.txt", "aGVsbG8=")).await;
        assert!(matches!(result, Err(ChatError::AttachmentUploadFailed(_))));
        assert!(db.get_attachments_for_messages(&[message_id]).unwrap().is_empty());
    }
}
