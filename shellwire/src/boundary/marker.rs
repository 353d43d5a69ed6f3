//! Boundary marker generation.
//!
//! Markers are short random strings. A marker that already occurs in the
//! text being wrapped would end detection early, so every candidate is
//! checked against that text and regenerated on collision.

use log::debug;
use rand::Rng;

use crate::error::{BoundaryError, Result};

/// Default marker length.
pub const MARKER_LEN: usize = 8;

/// Candidates tried before giving up.
pub const MAX_ATTEMPTS: usize = 32;

/// Generate a marker from `alphabet` that occurs in none of `avoid`.
pub fn generate(dialect: &str, alphabet: &str, avoid: &[&str]) -> Result<String> {
    generate_with(&mut rand::rng(), dialect, alphabet, MARKER_LEN, avoid)
}

/// Generate a marker using the given random source.
pub fn generate_with<R: Rng + ?Sized>(
    rng: &mut R,
    dialect: &str,
    alphabet: &str,
    len: usize,
    avoid: &[&str],
) -> Result<String> {
    let chars: Vec<char> = alphabet.chars().collect();
    if chars.is_empty() {
        return Err(BoundaryError::EmptyAlphabet {
            dialect: dialect.to_string(),
        }
        .into());
    }

    for attempt in 1..=MAX_ATTEMPTS {
        let marker: String = (0..len)
            .map(|_| chars[rng.random_range(0..chars.len())])
            .collect();
        if avoid.iter().all(|text| !text.contains(&marker)) {
            return Ok(marker);
        }
        debug!("marker {:?} collides with command text (attempt {})", marker, attempt);
    }

    Err(BoundaryError::MarkerCollision {
        attempts: MAX_ATTEMPTS,
    }
    .into())
}
