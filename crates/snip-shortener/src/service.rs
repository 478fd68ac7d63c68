use async_trait::async_trait;
use snip_core::{
    BatchItem, BatchShortened, Repository, ShortCode, Shortened, Shortener, ShortenerError,
    StorageError, UserLinks,
};
use snip_generator::Generator;
use std::sync::Arc;
use tracing::{debug, warn};

/// Longest url accepted for shortening.
pub const MAX_URL_LENGTH: usize = 2000;
/// Most items accepted by a single [`ShortenerService::shorten_batch`] call.
pub const MAX_BATCH_SIZE: usize = 1000;
const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// A concrete implementation of the `Shortener` trait.
///
/// This service wraps a `Repository` and a `Generator` to handle:
/// - Short code generation, regenerating when a code is already taken
/// - URL validation
/// - Reporting whether a link was created or already existed
#[derive(Debug)]
pub struct ShortenerService<R, G> {
    repository: Arc<R>,
    generator: Arc<G>,
    max_attempts: usize,
}

impl<R: Repository, G: Generator> ShortenerService<R, G> {
    pub fn new(repository: R, generator: G) -> Self {
        Self {
            repository: Arc::new(repository),
            generator: Arc::new(generator),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets how many codes are tried before a collision is reported.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Validates that the URL has a valid format (has a scheme and host).
    fn validate_url(url: &str) -> Result<(), ShortenerError> {
        if url.is_empty() {
            return Err(ShortenerError::InvalidUrl(
                "URL cannot be empty".to_string(),
            ));
        }

        if url.len() > MAX_URL_LENGTH {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL is longer than {} characters",
                MAX_URL_LENGTH
            )));
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        };

        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if scheme.is_empty() || host.is_empty() {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        }

        let scheme = scheme.to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL scheme must be http or https: {}",
                scheme
            )));
        }

        if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must not contain whitespace or control characters: {}",
                url
            )));
        }

        Ok(())
    }

    /// Shortens many urls for one owner.
    ///
    /// Invalid urls and failed items are skipped; the rest are returned in
    /// input order.
    pub async fn shorten_batch(
        &self,
        items: Vec<BatchItem>,
        owner: &str,
    ) -> Result<Vec<BatchShortened>, ShortenerError> {
        if items.len() > MAX_BATCH_SIZE {
            return Err(ShortenerError::BatchTooLarge {
                len: items.len(),
                max: MAX_BATCH_SIZE,
            });
        }

        let mut shortened = Vec::with_capacity(items.len());
        for item in items {
            match self.shorten(&item.original_url, owner).await {
                Ok(result) => shortened.push(BatchShortened {
                    correlation_id: item.correlation_id,
                    code: result.code,
                    inserted: result.inserted,
                }),
                Err(e) => {
                    warn!(correlation_id = %item.correlation_id, error = %e, "skipping batch item");
                }
            }
        }

        Ok(shortened)
    }

    /// Reports whether the storage backend is reachable.
    pub async fn ping(&self) -> bool {
        self.repository.ping().await
    }
}

#[async_trait]
impl<R: Repository, G: Generator> Shortener for ShortenerService<R, G> {
    async fn shorten(&self, url: &str, owner: &str) -> Result<Shortened, ShortenerError> {
        Self::validate_url(url)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let candidate = self.generator.generate()?;

            match self.repository.add(&candidate, url, owner).await {
                Ok(code) => {
                    let inserted = code == candidate;
                    debug!(code = %code, owner, inserted, "shortened url");
                    return Ok(Shortened { code, inserted });
                }
                Err(StorageError::KeyExists(code)) if attempt < self.max_attempts => {
                    warn!(code = %code, attempt, "generated short code already taken, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn resolve(&self, code: &ShortCode) -> Result<String, ShortenerError> {
        Ok(self.repository.get(code).await?)
    }

    async fn list_user(&self, owner: &str) -> UserLinks {
        self.repository.get_all_user(owner).await
    }

    async fn delete_batch(&self, codes: &[ShortCode], owner: &str) -> Result<(), ShortenerError> {
        Ok(self.repository.delete_batch(codes, owner).await?)
    }
}
