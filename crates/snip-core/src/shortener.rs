use crate::error::ShortenerError;
use crate::repository::UserLinks;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

type Result<T> = std::result::Result<T, ShortenerError>;

/// Outcome of shortening a single url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortened {
    /// The code the url is stored under.
    pub code: ShortCode,
    /// `true` when a new record was created, `false` when the url was
    /// already stored and `code` belongs to the existing record.
    pub inserted: bool,
}

/// One entry of a batch shorten request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Caller-chosen identifier echoed back in the result.
    pub correlation_id: String,
    /// The original URL to be shortened.
    pub original_url: String,
}

/// One entry of a batch shorten result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchShortened {
    pub correlation_id: String,
    pub code: ShortCode,
    pub inserted: bool,
}

#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Stores `url` for `owner` under a freshly generated code, or returns the
    /// code of the existing record if the backend already holds `url`.
    async fn shorten(&self, url: &str, owner: &str) -> Result<Shortened>;

    /// Resolves a short code to its original url.
    ///
    /// Unknown and deleted codes are reported as distinct errors, see
    /// [`ShortenerError::is_not_found`] and [`ShortenerError::is_deleted`].
    async fn resolve(&self, code: &ShortCode) -> Result<String>;

    /// Lists the active links of `owner`. Never fails.
    async fn list_user(&self, owner: &str) -> UserLinks;

    /// Deletes the given codes on behalf of `owner`. Idempotent.
    async fn delete_batch(&self, codes: &[ShortCode], owner: &str) -> Result<()>;
}
