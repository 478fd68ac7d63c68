//! Link shortening service and batched delete pipeline.
//!
//! [`ShortenerService`] ties a [`Repository`](snip_core::Repository) to a
//! [`Generator`](snip_generator::Generator). [`DeleteDispatcher`] splits large
//! delete requests into chunks that run in the background.

pub mod dispatcher;
pub mod service;

pub use dispatcher::{DeleteDispatcher, DispatcherSettings};
pub use service::ShortenerService;
pub use snip_core::{Shortener, ShortenerError};
