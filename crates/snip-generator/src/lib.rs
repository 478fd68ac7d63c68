pub mod random;
pub mod seq;

pub use random::RandomGenerator;
pub use seq::SeqGenerator;

use snip_core::{GeneratorError, ShortCode};

/// Trait for generating short codes.
///
/// Implementations are pure generators that don't interact with storage.
/// They never check for collisions; a taken code is rejected by the
/// repository and the caller regenerates.
pub trait Generator: Send + Sync + 'static {
    /// Generates a candidate short code.
    fn generate(&self) -> Result<ShortCode, GeneratorError>;
}
