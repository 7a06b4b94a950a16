use std::fmt::Write as _;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::Thread;
use crate::error::StoreError;

/// Durable storage for threads.
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Returns the saved thread, or `None` if it was never saved.
    async fn load(&self, thread_id: &str) -> Result<Option<Thread>, StoreError>;

    /// Saves the thread, replacing any earlier checkpoint.
    async fn save(&self, thread: &Thread) -> Result<(), StoreError>;
}

/// Stores each thread as `<encoded thread id>.json` in one directory.
///
/// Lowercase ASCII letters, digits, `-` and `_` are kept as they are, every
/// other byte of the id is written as `%XX`. Distinct ids therefore never
/// share a file, not even on case-insensitive file systems.
#[derive(Clone, Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store rooted at `dir`. The directory is created on the
    /// first save.
    #[inline]
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the directory holding the checkpoints.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        let mut file_stem = String::with_capacity(thread_id.len());
        for byte in thread_id.bytes() {
            match byte {
                b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => file_stem.push(char::from(byte)),
                _ => {
                    _ = write!(file_stem, "%{byte:02X}");
                }
            }
        }
        self.dir.join(format!("{file_stem}.json"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<Thread>, StoreError> {
        let path = self.path_for(thread_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let mut thread: Thread =
            serde_json::from_str(&contents).map_err(|source| StoreError::Format {
                thread_id: thread_id.to_owned(),
                source,
            })?;
        thread.id = thread_id.to_owned();
        Ok(Some(thread))
    }

    async fn save(&self, thread: &Thread) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_error(&self.dir))?;

        let contents = serde_json::to_string_pretty(thread).map_err(|source| {
            StoreError::Format {
                thread_id: thread.id.clone(),
                source,
            }
        })?;
        let path = self.path_for(&thread.id);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, contents)
            .await
            .map_err(io_error(&tmp_path))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(io_error(&path))?;
        trace!("saved checkpoint to {}", path.display());
        Ok(())
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ConversationStore, Message};

    fn file_store(dir: &Path) -> ConversationStore {
        ConversationStore::with_checkpoint_store(FileCheckpointStore::new(dir))
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(dir.path());
        store.append("team/1", Message::user("hi")).await.unwrap();
        store
            .append("team/1", Message::assistant("hello", vec![]))
            .await
            .unwrap();
        store.checkpoint("team/1").await.unwrap();
        assert!(dir.path().join("team%2F1.json").exists());

        let fresh = file_store(dir.path());
        assert!(fresh.load("team/1").await.unwrap());
        assert_eq!(
            fresh.snapshot("team/1").await.unwrap(),
            store.snapshot("team/1").await.unwrap()
        );
        assert!(!fresh.load("never-saved").await.unwrap());
    }

    #[test]
    fn test_file_names_are_distinct() {
        let store = FileCheckpointStore::new("/data");
        let ids = ["team/1", "team_1", "team.1", "Team_1", "..", "1", "work"];
        let paths: Vec<_> = ids.iter().map(|id| store.path_for(id)).collect();
        for (i, path) in paths.iter().enumerate() {
            assert_eq!(path.parent(), Some(Path::new("/data")), "{path:?}");
            assert!(!paths[i + 1..].contains(path), "{path:?}");
        }
        assert_eq!(paths[3], Path::new("/data/%54eam_1.json"));
        assert_eq!(paths[4], Path::new("/data/%2E%2E.json"));
        assert_eq!(paths[5], Path::new("/data/1.json"));
    }

    #[tokio::test]
    async fn test_similar_ids_keep_separate_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(dir.path());
        for id in ["team/1", "team_1", "team.1"] {
            store.append(id, Message::user(id)).await.unwrap();
            store.checkpoint(id).await.unwrap();
        }

        let fresh = file_store(dir.path());
        for id in ["team/1", "team_1", "team.1"] {
            assert_eq!(fresh.snapshot(id).await.unwrap(), [Message::user(id)]);
        }
    }

    #[tokio::test]
    async fn test_first_access_reads_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(dir.path());
        store.append("notes", Message::user("first")).await.unwrap();
        store.checkpoint("notes").await.unwrap();

        // No explicit load: appending continues from the checkpoint.
        let fresh = file_store(dir.path());
        fresh.append("notes", Message::user("second")).await.unwrap();
        fresh.checkpoint("notes").await.unwrap();

        let reopened = file_store(dir.path());
        assert_eq!(
            reopened.snapshot("notes").await.unwrap(),
            [Message::user("first"), Message::user("second")]
        );
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        std::fs::write(
            dir.path().join("orphan.json"),
            r#"{
                "thread_id": "orphan",
                "messages": [{ "role": "tool", "call_id": "x", "content": "" }]
            }"#,
        )
        .unwrap();

        let store = file_store(dir.path());
        assert!(matches!(
            store.load("bad").await,
            Err(StoreError::Format { .. })
        ));
        assert!(matches!(
            store.load("orphan").await,
            Err(StoreError::CorruptState { index: 0, .. })
        ));
        // The thread stays unusable rather than silently starting over.
        assert!(matches!(
            store.append("orphan", Message::user("hi")).await,
            Err(StoreError::CorruptState { .. })
        ));
        std::fs::remove_file(dir.path().join("orphan.json")).unwrap();
        assert!(store.snapshot("orphan").await.unwrap().is_empty());

        // An explicit restore replaces the broken checkpoint.
        store
            .restore("bad", vec![Message::user("start over")])
            .await
            .unwrap();
        store.checkpoint("bad").await.unwrap();
        assert_eq!(
            file_store(dir.path()).snapshot("bad").await.unwrap(),
            [Message::user("start over")]
        );
    }
}
