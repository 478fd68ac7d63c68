use crate::error::Result;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Active links of a single owner, keyed by short code.
pub type UserLinks = HashMap<ShortCode, String>;

/// The value stored under a short code.
///
/// Records are never physically removed. Deletion flips `deleted`
/// to `true`, after which the record is invisible to lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// The original URL that was shortened.
    pub url: String,
    /// Tombstone flag. Only ever transitions `false -> true`.
    pub deleted: bool,
}

impl LinkRecord {
    pub fn active(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            deleted: false,
        }
    }

    pub fn tombstone(&mut self) {
        self.deleted = true;
    }
}

/// Storage backend for links and their owner index.
///
/// Every backend (pure memory, memory plus append log, PostgreSQL) implements
/// this one capability set; the backend is picked at startup.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Stores `url` under `code` on behalf of `owner`.
    ///
    /// Returns the code the link is stored under. This is `code` itself for a
    /// fresh record, or the code of an existing record when the backend
    /// deduplicates urls. Returns `Err(KeyExists)` when `code` is taken.
    async fn add(&self, code: &ShortCode, url: &str, owner: &str) -> Result<ShortCode>;

    /// Resolves a short code.
    ///
    /// Returns `Err(KeyNotFound)` for unknown codes and `Err(Deleted)` for
    /// tombstoned ones.
    async fn get(&self, code: &ShortCode) -> Result<String>;

    /// Lists the active links created by `owner`. Never fails; storage errors
    /// degrade to omitted entries or an empty map.
    async fn get_all_user(&self, owner: &str) -> UserLinks;

    /// Tombstones every code in `codes` owned by `owner`.
    ///
    /// Codes owned by someone else, unknown codes and already deleted codes
    /// are skipped silently.
    async fn delete_batch(&self, codes: &[ShortCode], owner: &str) -> Result<()>;

    /// Reports whether the backend is reachable.
    async fn ping(&self) -> bool {
        true
    }
}

#[async_trait]
impl<R: Repository> Repository for Arc<R> {
    async fn add(&self, code: &ShortCode, url: &str, owner: &str) -> Result<ShortCode> {
        (**self).add(code, url, owner).await
    }

    async fn get(&self, code: &ShortCode) -> Result<String> {
        (**self).get(code).await
    }

    async fn get_all_user(&self, owner: &str) -> UserLinks {
        (**self).get_all_user(owner).await
    }

    async fn delete_batch(&self, codes: &[ShortCode], owner: &str) -> Result<()> {
        (**self).delete_batch(codes, owner).await
    }

    async fn ping(&self) -> bool {
        (**self).ping().await
    }
}
