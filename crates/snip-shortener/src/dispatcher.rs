//! Background execution of owner-scoped batch deletes.
//!
//! A delete request is split into fixed-size chunks, and every chunk runs as
//! its own tokio task with its own timeout. The caller only learns how many
//! chunks were scheduled; chunk outcomes are logged.

use parking_lot::Mutex;
use snip_core::{ShortCode, Shortener, ShortenerError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use typed_builder::TypedBuilder;

/// Configures a [`DeleteDispatcher`].
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct DispatcherSettings {
    /// Ids handed to a single `delete_batch` call.
    #[builder(default = 250)]
    pub chunk_size: usize,
    /// Upper bound for one chunk; a chunk still running after this is abandoned.
    #[builder(default = Duration::from_secs(10))]
    pub chunk_timeout: Duration,
    /// Largest request accepted by [`DeleteDispatcher::dispatch`].
    #[builder(default = 1000)]
    pub max_ids: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Default)]
struct Inflight {
    tasks: JoinSet<()>,
    closed: bool,
}

pub struct DeleteDispatcher {
    shortener: Arc<dyn Shortener>,
    settings: DispatcherSettings,
    inflight: Mutex<Inflight>,
}

impl DeleteDispatcher {
    pub fn new(shortener: Arc<dyn Shortener>, settings: DispatcherSettings) -> Self {
        Self {
            shortener,
            settings,
            inflight: Mutex::new(Inflight::default()),
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Schedules deletion of `codes` on behalf of `owner` and returns the
    /// number of chunks spawned.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(
        &self,
        codes: Vec<ShortCode>,
        owner: impl Into<String>,
    ) -> Result<usize, ShortenerError> {
        if codes.len() > self.settings.max_ids {
            return Err(ShortenerError::BatchTooLarge {
                len: codes.len(),
                max: self.settings.max_ids,
            });
        }

        let owner = owner.into();
        let chunk_size = self.settings.chunk_size.max(1);
        let timeout = self.settings.chunk_timeout;

        let mut inflight = self.inflight.lock();
        if inflight.closed {
            return Err(ShortenerError::ShuttingDown);
        }
        while inflight.tasks.try_join_next().is_some() {}

        let mut chunks = 0;
        for (chunk, codes) in codes.chunks(chunk_size).enumerate() {
            let shortener = Arc::clone(&self.shortener);
            let codes = codes.to_vec();
            let owner = owner.clone();
            inflight.tasks.spawn(async move {
                run_chunk(shortener, codes, owner, chunk, timeout).await;
            });
            chunks += 1;
        }

        debug!(owner = %owner, ids = codes.len(), chunks, "dispatched batch delete");
        Ok(chunks)
    }

    /// Number of chunk tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        let mut inflight = self.inflight.lock();
        while inflight.tasks.try_join_next().is_some() {}
        inflight.tasks.len()
    }

    /// Stops accepting work and waits up to `grace` for running chunks.
    ///
    /// Chunks still running afterwards are aborted; their count is returned.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let mut tasks = {
            let mut inflight = self.inflight.lock();
            inflight.closed = true;
            std::mem::take(&mut inflight.tasks)
        };

        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_ok() {
            debug!("delete dispatcher drained");
            return 0;
        }

        let remaining = tasks.len();
        warn!(
            remaining,
            grace_ms = grace.as_millis() as u64,
            "aborting delete chunks after grace period"
        );
        tasks.shutdown().await;
        remaining
    }
}

async fn run_chunk(
    shortener: Arc<dyn Shortener>,
    codes: Vec<ShortCode>,
    owner: String,
    chunk: usize,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, shortener.delete_batch(&codes, &owner)).await {
        Ok(Ok(())) => debug!(chunk, owner = %owner, ids = codes.len(), "deleted chunk"),
        Ok(Err(e)) => error!(chunk, owner = %owner, ids = codes.len(), error = %e, "chunk delete failed"),
        Err(_) => warn!(
            chunk,
            owner = %owner,
            ids = codes.len(),
            timeout_ms = timeout.as_millis() as u64,
            "chunk delete timed out"
        ),
    }
}
