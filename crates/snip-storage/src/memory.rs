use crate::log::{self, LogEntry, Snapshot};
use async_trait::async_trait;
use snip_core::error::Result;
use snip_core::{LinkRecord, Repository, ShortCode, StorageError, UserLinks};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tokio::task::JoinError;
use tracing::{debug, info, trace};

/// Everything guarded by the repository lock.
///
/// Links, owner index and log handle sit behind one lock so a reader can
/// never observe a link without its owner entry, or memory ahead of the log.
#[derive(Debug, Default)]
struct State {
    tables: Snapshot,
    log: Option<File>,
    closed: bool,
}

impl State {
    fn owns(&self, owner: &str, code: &ShortCode) -> bool {
        self.tables
            .owners
            .get(owner)
            .is_some_and(|codes| codes.contains(code))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StorageError::Unavailable(
                "persistence log is closed".to_string(),
            ));
        }
        Ok(())
    }

    async fn append(&mut self, lines: &str) -> Result<()> {
        let Some(file) = self.log.as_mut() else {
            return Ok(());
        };
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Truncates the log and writes the current tables back in full.
    async fn rewrite_log(&mut self) -> Result<()> {
        let Some(file) = self.log.as_mut() else {
            return Ok(());
        };
        let body = self.tables.render();
        file.set_len(0).await?;
        file.seek(SeekFrom::Start(0)).await?;
        file.write_all(body.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn add(&mut self, code: ShortCode, url: String, owner: String) -> Result<ShortCode> {
        self.ensure_open()?;
        ensure_loggable(&code, &url, &owner)?;

        if self.tables.links.contains_key(&code) {
            return Err(StorageError::KeyExists(code.to_string()));
        }

        // log first: a failed write leaves memory untouched
        let record = LinkRecord::active(url);
        let lines = LogEntry::url(&code, &record).line() + &LogEntry::user(&owner, &code).line();
        self.append(&lines).await?;

        self.tables.links.insert(code.clone(), record);
        self.tables
            .owners
            .entry(owner.clone())
            .or_default()
            .push(code.clone());

        debug!(code = %code, owner = %owner, "stored link");
        Ok(code)
    }

    async fn delete_batch(&mut self, codes: Vec<ShortCode>, owner: String) -> Result<()> {
        self.ensure_open()?;

        let mut deleted = 0_usize;
        for code in &codes {
            if !self.owns(&owner, code) {
                continue;
            }
            if let Some(record) = self.tables.links.get_mut(code) {
                if !record.deleted {
                    record.tombstone();
                    deleted += 1;
                }
            }
        }

        self.rewrite_log().await?;

        debug!(owner = %owner, requested = codes.len(), deleted, "deleted batch");
        Ok(())
    }
}

/// Log lines are comma separated and newline terminated, without escaping.
fn ensure_loggable(code: &ShortCode, url: &str, owner: &str) -> Result<()> {
    let breaks_line = |s: &str| s.contains(['\n', '\r']);

    if code.as_str().contains(',') || breaks_line(code.as_str()) {
        return Err(StorageError::InvalidData(format!(
            "short code {code:?} must not contain commas or line breaks"
        )));
    }
    if owner.contains(',') || breaks_line(owner) {
        return Err(StorageError::InvalidData(format!(
            "owner {owner:?} must not contain commas or line breaks"
        )));
    }
    if breaks_line(url) {
        return Err(StorageError::InvalidData(format!(
            "url {url:?} must not contain line breaks"
        )));
    }
    Ok(())
}

fn writer_failed(err: JoinError) -> StorageError {
    StorageError::Unavailable(format!("log writer task failed: {err}"))
}

/// In-memory implementation of [`Repository`], optionally persisted to an
/// append log.
///
/// Links are deduplicated by code only; submitting the same url twice
/// creates two records. Mutations run on their own task once the write lock
/// is held, so a caller that gives up (timeout, abort) never leaves the log
/// half written.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Arc<RwLock<State>>,
}

impl InMemoryRepository {
    /// Creates a repository that lives purely in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens (or creates) the log file at `path` and replays it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .await?;
        let repository = Self::with_log(file).await?;
        info!(path = %path.display(), links = repository.len().await, "opened persistence log");
        Ok(repository)
    }

    /// Replays an already opened log handle and keeps it for further writes.
    ///
    /// The handle must be readable from its current position and opened in
    /// append mode.
    pub async fn with_log(mut file: File) -> Result<Self> {
        let replay = log::replay(BufReader::new(&mut file)).await?;
        Ok(Self {
            state: Arc::new(RwLock::new(State {
                tables: replay.snapshot,
                log: Some(file),
                closed: false,
            })),
        })
    }

    /// Number of stored links, tombstoned ones included.
    pub async fn len(&self) -> usize {
        self.state.read().await.tables.links.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Flushes and syncs the log, then releases the handle.
    ///
    /// Later writes fail with [`StorageError::Unavailable`]; reads keep
    /// working from memory.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(mut file) = state.log.take() {
            file.flush().await?;
            file.sync_all().await?;
            state.closed = true;
            debug!("closed persistence log");
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn add(&self, code: &ShortCode, url: &str, owner: &str) -> Result<ShortCode> {
        let (code, url, owner) = (code.clone(), url.to_owned(), owner.to_owned());
        let mut state = Arc::clone(&self.state).write_owned().await;

        tokio::spawn(async move { state.add(code, url, owner).await })
            .await
            .map_err(writer_failed)?
    }

    async fn get(&self, code: &ShortCode) -> Result<String> {
        trace!(code = %code, "resolving short code");
        let state = self.state.read().await;

        match state.tables.links.get(code) {
            None => Err(StorageError::KeyNotFound(code.to_string())),
            Some(record) if record.deleted => Err(StorageError::Deleted(code.to_string())),
            Some(record) => Ok(record.url.clone()),
        }
    }

    async fn get_all_user(&self, owner: &str) -> UserLinks {
        let state = self.state.read().await;

        let Some(codes) = state.tables.owners.get(owner) else {
            return UserLinks::new();
        };

        codes
            .iter()
            .filter_map(|code| {
                let record = state.tables.links.get(code)?;
                (!record.deleted).then(|| (code.clone(), record.url.clone()))
            })
            .collect()
    }

    async fn delete_batch(&self, codes: &[ShortCode], owner: &str) -> Result<()> {
        let (codes, owner) = (codes.to_vec(), owner.to_owned());
        let mut state = Arc::clone(&self.state).write_owned().await;

        // compaction truncates before it writes; it must not stop halfway
        tokio::spawn(async move { state.delete_batch(codes, owner).await })
            .await
            .map_err(writer_failed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn log_path(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("links.log")
    }

    fn sorted_lines(contents: &str) -> Vec<&str> {
        let mut lines: Vec<_> = contents.lines().collect();
        lines.sort_unstable();
        lines
    }

    #[tokio::test]
    async fn add_and_get() {
        let repo = InMemoryRepository::new();

        let stored = repo
            .add(&code("abc123"), "https://example.com", "alice")
            .await
            .unwrap();

        assert_eq!(stored, code("abc123"));
        assert_eq!(
            repo.get(&code("abc123")).await.unwrap(),
            "https://example.com"
        );
    }

    #[tokio::test]
    async fn get_nonexistent() {
        let repo = InMemoryRepository::new();

        let err = repo.get(&code("nope")).await.unwrap_err();
        assert_eq!(err, StorageError::KeyNotFound("nope".into()));
    }

    #[tokio::test]
    async fn add_conflict_keeps_first_url() {
        let repo = InMemoryRepository::new();

        repo.add(&code("abc123"), "https://one.example", "alice")
            .await
            .unwrap();
        let err = repo
            .add(&code("abc123"), "https://two.example", "alice")
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::KeyExists(_)));
        assert_eq!(
            repo.get(&code("abc123")).await.unwrap(),
            "https://one.example"
        );
        assert_eq!(repo.get_all_user("alice").await.len(), 1);
    }

    #[tokio::test]
    async fn same_url_is_stored_twice() {
        let repo = InMemoryRepository::new();

        repo.add(&code("a1"), "https://example.com", "alice")
            .await
            .unwrap();
        let stored = repo
            .add(&code("a2"), "https://example.com", "bob")
            .await
            .unwrap();

        assert_eq!(stored, code("a2"));
        assert_eq!(repo.len().await, 2);
    }

    #[tokio::test]
    async fn delete_by_owner_tombstones() {
        let repo = InMemoryRepository::new();
        repo.add(&code("a1"), "https://one.example", "alice")
            .await
            .unwrap();
        repo.add(&code("a2"), "https://two.example", "alice")
            .await
            .unwrap();

        repo.delete_batch(&[code("a1")], "alice").await.unwrap();

        assert_eq!(
            repo.get(&code("a1")).await.unwrap_err(),
            StorageError::Deleted("a1".into())
        );
        let listed = repo.get_all_user("alice").await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[&code("a2")], "https://two.example");
        // tombstones are retained
        assert_eq!(repo.len().await, 2);
    }

    #[tokio::test]
    async fn delete_by_other_owner_is_noop() {
        let repo = InMemoryRepository::new();
        repo.add(&code("a1"), "https://one.example", "alice")
            .await
            .unwrap();

        repo.delete_batch(&[code("a1")], "bob").await.unwrap();

        assert_eq!(repo.get(&code("a1")).await.unwrap(), "https://one.example");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let repo = InMemoryRepository::new();
        repo.add(&code("a1"), "https://one.example", "alice")
            .await
            .unwrap();

        repo.delete_batch(&[code("a1"), code("a1"), code("missing")], "alice")
            .await
            .unwrap();
        repo.delete_batch(&[code("a1")], "alice").await.unwrap();

        assert!(matches!(
            repo.get(&code("a1")).await,
            Err(StorageError::Deleted(_))
        ));
    }

    #[tokio::test]
    async fn get_all_user_for_unknown_owner_is_empty() {
        let repo = InMemoryRepository::new();
        assert!(repo.get_all_user("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn add_appends_url_and_user_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir);
        let repo = InMemoryRepository::open(&path).await.unwrap();

        repo.add(&code("a1"), "https://one.example/?x=1,2", "alice")
            .await
            .unwrap();
        repo.add(&code("b1"), "https://two.example", "bob")
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(
            contents,
            "url,a1,https://one.example/?x=1,2\n\
             user,alice,a1\n\
             url,b1,https://two.example\n\
             user,bob,b1\n"
        );
    }

    #[tokio::test]
    async fn delete_rewrites_whole_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir);
        let repo = InMemoryRepository::open(&path).await.unwrap();

        repo.add(&code("a1"), "https://one.example", "alice")
            .await
            .unwrap();
        repo.add(&code("a2"), "https://two.example", "alice")
            .await
            .unwrap();
        repo.delete_batch(&[code("a1")], "alice").await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(
            sorted_lines(&contents),
            vec![
                "url,a1,deleted",
                "url,a2,https://two.example",
                "user,alice,a1",
                "user,alice,a2",
            ]
        );

        // appends after a rewrite land after the compacted body
        repo.add(&code("a3"), "https://three.example", "alice")
            .await
            .unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.ends_with("url,a3,https://three.example\nuser,alice,a3\n"));
        assert_eq!(contents.lines().count(), 6);
    }

    #[tokio::test]
    async fn reopen_reproduces_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir);

        let owners = ["alice", "bob", "carol"];
        let repo = InMemoryRepository::open(&path).await.unwrap();
        for i in 0..30 {
            let owner = owners[i % owners.len()];
            repo.add(
                &code(&format!("code{i:02}")),
                &format!("https://example.com/{i}"),
                owner,
            )
            .await
            .unwrap();
        }
        repo.delete_batch(&[code("code00"), code("code03"), code("code01")], "alice")
            .await
            .unwrap();
        repo.close().await.unwrap();

        let reopened = InMemoryRepository::open(&path).await.unwrap();

        assert_eq!(reopened.len().await, 30);
        for i in 0..30 {
            let c = code(&format!("code{i:02}"));
            assert_eq!(reopened.get(&c).await, repo.get(&c).await, "mismatch for {c}");
        }
        for owner in owners {
            assert_eq!(
                reopened.get_all_user(owner).await,
                repo.get_all_user(owner).await
            );
        }
        // code00 and code03 belong to alice, code01 to bob
        assert!(matches!(
            reopened.get(&code("code00")).await,
            Err(StorageError::Deleted(_))
        ));
        assert!(matches!(
            reopened.get(&code("code03")).await,
            Err(StorageError::Deleted(_))
        ));
        assert!(reopened.get(&code("code01")).await.is_ok());
    }

    #[tokio::test]
    async fn open_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir);
        tokio::fs::write(
            &path,
            "url,a1,https://one.example\nnot a record\nuser,alice,a1\nurl,a2",
        )
        .await
        .unwrap();

        let repo = InMemoryRepository::open(&path).await.unwrap();

        assert_eq!(repo.len().await, 1);
        assert_eq!(repo.get(&code("a1")).await.unwrap(), "https://one.example");
        assert_eq!(repo.get_all_user("alice").await.len(), 1);
    }

    #[tokio::test]
    async fn writes_fail_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let repo = InMemoryRepository::open(log_path(&dir)).await.unwrap();
        repo.add(&code("a1"), "https://one.example", "alice")
            .await
            .unwrap();

        repo.close().await.unwrap();

        assert!(matches!(
            repo.add(&code("a2"), "https://two.example", "alice").await,
            Err(StorageError::Unavailable(_))
        ));
        assert_eq!(repo.get(&code("a1")).await.unwrap(), "https://one.example");
    }

    #[tokio::test]
    async fn concurrent_adds_keep_index_consistent() {
        const TASKS: usize = 64;
        const OWNERS: usize = 4;

        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir);
        let repo = Arc::new(InMemoryRepository::open(&path).await.unwrap());

        let mut handles = vec![];
        for i in 0..TASKS {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                let owner = format!("owner-{}", i % OWNERS);
                repo.add(
                    &code(&format!("c{i:03}")),
                    &format!("https://example{i}.com"),
                    &owner,
                )
                .await
                .unwrap();
                // readers interleave with writers
                let listed = repo.get_all_user(&owner).await;
                assert!(listed.contains_key(&code(&format!("c{i:03}"))));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(repo.len().await, TASKS);
        let mut total = 0;
        for o in 0..OWNERS {
            let listed = repo.get_all_user(&format!("owner-{o}")).await;
            assert_eq!(listed.len(), TASKS / OWNERS);
            for (c, url) in &listed {
                let i: usize = c.as_str()[1..].parse().unwrap();
                assert_eq!(i % OWNERS, o);
                assert_eq!(url, &format!("https://example{i}.com"));
            }
            total += listed.len();
        }
        assert_eq!(total, TASKS);

        let replayed = InMemoryRepository::open(&path).await.unwrap();
        assert_eq!(replayed.len().await, TASKS);
    }

    #[tokio::test]
    async fn concurrent_overlapping_deletes() {
        let repo = Arc::new(InMemoryRepository::new());
        let codes: Vec<_> = (0..20).map(|i| code(&format!("c{i:02}"))).collect();
        for c in &codes {
            repo.add(c, "https://example.com", "alice").await.unwrap();
        }

        let mut handles = vec![];
        for window in [0..15, 5..20, 0..20] {
            let repo = Arc::clone(&repo);
            let batch = codes[window].to_vec();
            handles.push(tokio::spawn(async move {
                repo.delete_batch(&batch, "alice").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(repo.get_all_user("alice").await.is_empty());
        assert_eq!(repo.len().await, 20);
    }

    #[tokio::test]
    async fn cancelled_delete_leaves_log_complete() {
        const LINKS: usize = 20_000;

        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir);
        let mut seed = String::new();
        for i in 0..LINKS {
            seed.push_str(&format!("url,c{i:06},https://example.com/{i}\n"));
            seed.push_str(&format!("user,alice,c{i:06}\n"));
        }
        tokio::fs::write(&path, &seed).await.unwrap();

        let repo = InMemoryRepository::open(&path).await.unwrap();
        let _ = tokio::time::timeout(
            std::time::Duration::from_micros(1),
            repo.delete_batch(&[code("c000000")], "alice"),
        )
        .await;
        // waits for any compaction still holding the lock
        repo.close().await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2 * LINKS);

        let reopened = InMemoryRepository::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, LINKS);
        assert!(reopened.get_all_user("alice").await.len() >= LINKS - 1);
        assert_eq!(
            reopened.get(&code("c019999")).await.unwrap(),
            "https://example.com/19999"
        );
    }

    #[tokio::test]
    async fn rejects_fields_that_break_log_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(&dir);
        let repo = InMemoryRepository::open(&path).await.unwrap();

        for (c, url, owner) in [
            ("a1", "https://one.example", "a,b"),
            ("a2", "https://one.example", "a\nuser,mallory"),
            ("a3", "https://one.example/\nurl,x,y", "alice"),
            ("a,4", "https://one.example", "alice"),
        ] {
            let err = repo.add(&code(c), url, owner).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidData(_)), "{c}");
        }

        assert!(repo.is_empty().await);
        assert!(tokio::fs::read_to_string(&path).await.unwrap().is_empty());
    }
}
