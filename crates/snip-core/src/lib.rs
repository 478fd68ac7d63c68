//! Core types and traits for the snip link store.
//!
//! This crate provides the types shared by the storage backends, the
//! identifier generators and the shortening service.

pub mod error;
pub mod repository;
pub mod shortcode;
pub mod shortener;

pub use error::{GeneratorError, ShortenerError, StorageError};
pub use repository::{LinkRecord, Repository, UserLinks};
pub use shortcode::ShortCode;
pub use shortener::{BatchItem, BatchShortened, Shortened, Shortener};
