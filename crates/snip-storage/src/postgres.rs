use async_trait::async_trait;
use snip_core::error::Result;
use snip_core::{Repository, ShortCode, StorageError, UserLinks};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Unique constraint on `urls.url`; a violation means the url is already stored.
pub const URL_UNIQUE_CONSTRAINT: &str = "urls_url_key";

/// How often `add` retries when the conflicting row is not visible yet.
const MAX_DEDUP_ATTEMPTS: usize = 3;
const PING_TIMEOUT: Duration = Duration::from_secs(1);

/// PostgreSQL implementation of the repository contract.
///
/// Soft delete is implemented with the `deleted` column. The unique
/// constraint on `url` deduplicates submissions: adding a url that is
/// already stored returns the code of the existing row instead of failing.
/// The schema is expected to exist already (see `ddl/postgres/urls.sql`).
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Creates a repository from an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a repository by opening a new connection pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_by_url(&self, url: &str) -> Result<Option<ShortCode>> {
        let row = sqlx::query("SELECT url_id FROM urls WHERE url = $1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(|row| {
            row.try_get::<String, _>("url_id")
                .map(ShortCode::new_unchecked)
                .map_err(map_sqlx_error)
        })
        .transpose()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Violation {
    /// The url is already stored.
    DuplicateUrl,
    /// Any other unique constraint, in practice `url_id`.
    DuplicateKey,
}

fn unique_violation(err: &sqlx::Error) -> Option<Violation> {
    let db_err = err.as_database_error()?;
    if !db_err.is_unique_violation() {
        return None;
    }
    Some(classify_constraint(db_err.constraint()))
}

fn classify_constraint(constraint: Option<&str>) -> Violation {
    match constraint {
        Some(URL_UNIQUE_CONSTRAINT) => Violation::DuplicateUrl,
        _ => Violation::DuplicateKey,
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_) => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn add(&self, code: &ShortCode, url: &str, owner: &str) -> Result<ShortCode> {
        for attempt in 1..=MAX_DEDUP_ATTEMPTS {
            let result = sqlx::query("INSERT INTO urls (user_id, url_id, url) VALUES ($1, $2, $3)")
                .bind(owner)
                .bind(code.as_str())
                .bind(url)
                .execute(&self.pool)
                .await;

            let err = match result {
                Ok(_) => {
                    debug!(code = %code, owner, "stored link");
                    return Ok(code.clone());
                }
                Err(err) => err,
            };

            match unique_violation(&err) {
                Some(Violation::DuplicateUrl) => {
                    if let Some(existing) = self.find_by_url(url).await? {
                        debug!(code = %existing, owner, "url already stored");
                        return Ok(existing);
                    }
                    // the conflicting row went away between insert and select
                    warn!(code = %code, attempt, "conflicting url row not visible, retrying insert");
                }
                Some(Violation::DuplicateKey) => {
                    return Err(StorageError::KeyExists(code.to_string()));
                }
                None => return Err(map_sqlx_error(err)),
            }
        }

        Err(StorageError::Query(format!(
            "url conflicted {MAX_DEDUP_ATTEMPTS} times without a visible row"
        )))
    }

    async fn get(&self, code: &ShortCode) -> Result<String> {
        trace!(code = %code, "resolving short code");

        let row = sqlx::query("SELECT url, deleted FROM urls WHERE url_id = $1")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Err(StorageError::KeyNotFound(code.to_string()));
        };

        let deleted: bool = row.try_get("deleted").map_err(map_sqlx_error)?;
        if deleted {
            return Err(StorageError::Deleted(code.to_string()));
        }

        row.try_get("url").map_err(map_sqlx_error)
    }

    async fn get_all_user(&self, owner: &str) -> UserLinks {
        let rows = sqlx::query(
            "SELECT url_id, url FROM urls WHERE user_id = $1 AND deleted = false ORDER BY id",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                warn!(owner, error = %e, "listing user links failed");
                return UserLinks::new();
            }
        };

        rows.iter()
            .filter_map(|row| {
                let code: String = row.try_get("url_id").ok()?;
                let url: String = row.try_get("url").ok()?;
                Some((ShortCode::new_unchecked(code), url))
            })
            .collect()
    }

    async fn delete_batch(&self, codes: &[ShortCode], owner: &str) -> Result<()> {
        if codes.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = codes.iter().map(|c| c.as_str().to_owned()).collect();
        let result = sqlx::query(
            r#"
            UPDATE urls
            SET deleted = true
            WHERE user_id = $1
              AND url_id = ANY($2)
              AND deleted = false
            "#,
        )
        .bind(owner)
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(
            owner,
            requested = codes.len(),
            deleted = result.rows_affected(),
            "deleted batch"
        );
        Ok(())
    }

    async fn ping(&self) -> bool {
        matches!(
            tokio::time::timeout(PING_TIMEOUT, sqlx::query("SELECT 1").execute(&self.pool)).await,
            Ok(Ok(_))
        )
    }
}
