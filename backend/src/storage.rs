//! Session artifact storage.
//!
//! Plugins persist per-session files (screenshots, command logs, browser
//! logs, videos) through the `SessionStorage` seam. The default deployment
//! uses the filesystem backend, selected by a `file://` storage URL.

use std::path::PathBuf;

use async_trait::async_trait;

/// Well-known artifact names inside a session's storage directory.
pub const VIDEO_FILE_NAME: &str = "video.mp4";
pub const BROWSER_LOG_FILE_NAME: &str = "browser.log";
pub const MESSAGE_LOG_FILE_NAME: &str = "messages.log";
pub const SCREENSHOTS_DIR: &str = "screenshots";
pub const COMMANDS_DIR: &str = "commands";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported storage url: {0}")]
    UnsupportedScheme(String),
    #[error("file {0} not found")]
    NotFound(String),
}

/// One artifact to persist.
pub struct BlobFile {
    pub file_name: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Saves a file under `<session>/<dir>/<file_name>`. `dir` may be empty.
    async fn save_file(&self, session_id: &str, dir: &str, file: BlobFile)
        -> Result<(), StorageError>;
    async fn get_file(&self, session_id: &str, name: &str) -> Result<Vec<u8>, StorageError>;
    async fn list_files(&self, session_id: &str, dir: &str) -> Result<Vec<String>, StorageError>;
    async fn exists(&self, session_id: &str, name: &str) -> Result<bool, StorageError>;
    async fn delete_session(&self, session_id: &str) -> Result<(), StorageError>;
}

/// Filesystem-backed session storage rooted at one directory.
pub struct FsSessionStorage {
    root: PathBuf,
}

impl FsSessionStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Builds a storage backend from a URL. Only `file://` is understood.
    pub fn from_url(url: &str) -> Result<Self, StorageError> {
        match url.strip_prefix("file://") {
            Some(path) if !path.is_empty() => Ok(Self::new(path)),
            _ => Err(StorageError::UnsupportedScheme(url.to_owned())),
        }
    }

    fn session_dir(&self, session_id: &str, dir: &str) -> PathBuf {
        let mut path = self.root.join(session_id);
        let trimmed = dir.trim_matches('/');
        if !trimmed.is_empty() {
            path = path.join(trimmed);
        }
        path
    }

    fn file_path(&self, session_id: &str, name: &str) -> PathBuf {
        self.root.join(session_id).join(name.trim_start_matches('/'))
    }
}

#[async_trait]
impl SessionStorage for FsSessionStorage {
    async fn save_file(
        &self,
        session_id: &str,
        dir: &str,
        file: BlobFile,
    ) -> Result<(), StorageError> {
        let dir_path = self.session_dir(session_id, dir);
        tokio::fs::create_dir_all(&dir_path).await?;
        tokio::fs::write(dir_path.join(&file.file_name), &file.content).await?;
        Ok(())
    }

    async fn get_file(&self, session_id: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.file_path(session_id, name);
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_owned()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list_files(&self, session_id: &str, dir: &str) -> Result<Vec<String>, StorageError> {
        let dir_path = self.session_dir(session_id, dir);
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, session_id: &str, name: &str) -> Result<bool, StorageError> {
        Ok(self.file_path(session_id, name).exists())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StorageError> {
        let path = self.root.join(session_id);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(name: &str, content: &str) -> BlobFile {
        BlobFile {
            file_name: name.into(),
            content_type: "text/plain".into(),
            content: content.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_save_and_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsSessionStorage::new(tmp.path());

        store
            .save_file("sess-1", "/commands", blob("001.json", "{}"))
            .await
            .unwrap();

        assert!(store.exists("sess-1", "commands/001.json").await.unwrap());
        let content = store.get_file("sess-1", "commands/001.json").await.unwrap();
        assert_eq!(content, b"{}");
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_tolerates_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsSessionStorage::new(tmp.path());

        store
            .save_file("sess-1", "shots", blob("b.png", "x"))
            .await
            .unwrap();
        store
            .save_file("sess-1", "shots", blob("a.png", "y"))
            .await
            .unwrap();

        assert_eq!(
            store.list_files("sess-1", "shots").await.unwrap(),
            vec!["a.png".to_string(), "b.png".to_string()]
        );
        assert!(store.list_files("sess-2", "shots").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_session_removes_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsSessionStorage::new(tmp.path());

        store.save_file("sess-1", "", blob("log.txt", "hi")).await.unwrap();
        store.delete_session("sess-1").await.unwrap();

        assert!(!store.exists("sess-1", "log.txt").await.unwrap());
        // A second delete of the same session is a no-op.
        store.delete_session("sess-1").await.unwrap();
    }

    #[test]
    fn test_from_url_only_accepts_file_scheme() {
        assert!(FsSessionStorage::from_url("file:///tmp/sessions").is_ok());
        assert!(matches!(
            FsSessionStorage::from_url("s3://bucket/sessions"),
            Err(StorageError::UnsupportedScheme(_))
        ));
    }
}
