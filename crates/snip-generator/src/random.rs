use crate::Generator;
use rand::rngs::OsRng;
use rand::RngCore;
use snip_core::shortcode::MAX_LENGTH;
use snip_core::{GeneratorError, ShortCode};

/// URL-safe alphabet. 64 symbols, so masking a byte to 6 bits is unbiased.
const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

pub const DEFAULT_LENGTH: usize = 12;

/// Random short codes drawn from the operating system CSPRNG.
#[derive(Debug, Clone, Copy)]
pub struct RandomGenerator {
    length: usize,
}

impl RandomGenerator {
    /// Creates a generator producing codes of exactly `length` characters.
    pub fn new(length: usize) -> Result<Self, GeneratorError> {
        if length == 0 || length > MAX_LENGTH {
            return Err(GeneratorError::InvalidLength {
                length,
                max: MAX_LENGTH,
            });
        }
        Ok(Self { length })
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self {
            length: DEFAULT_LENGTH,
        }
    }
}

fn encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| ALPHABET[usize::from(b & 0x3f)] as char)
        .collect()
}

impl Generator for RandomGenerator {
    fn generate(&self) -> Result<ShortCode, GeneratorError> {
        let mut bytes = vec![0_u8; self.length];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| GeneratorError::Entropy(e.to_string()))?;
        Ok(ShortCode::new_unchecked(encode(&bytes)))
    }
}
