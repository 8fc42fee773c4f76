//! Fallback public reference generation.

use rand::Rng;

use super::{SubmissionError, SubmissionStore};

/// Prefix of references generated locally rather than by a backend.
pub const REFERENCE_PREFIX: &str = "OF-";

const REFERENCE_LENGTH: usize = 6;

/// No 0/O or 1/I, so references survive being read out over the phone.
const REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const MAX_REFERENCE_ATTEMPTS: usize = 32;

/// Generate a random reference such as `OF-7KX2QM`.
pub fn random_reference<R: Rng + ?Sized>(rng: &mut R) -> String {
    let body: String = (0..REFERENCE_LENGTH)
        .map(|_| REFERENCE_ALPHABET[rng.gen_range(0..REFERENCE_ALPHABET.len())] as char)
        .collect();
    format!("{REFERENCE_PREFIX}{body}")
}

/// Generate a reference that no stored submission uses yet.
pub fn unique_reference(store: &dyn SubmissionStore) -> Result<String, SubmissionError> {
    let mut rng = rand::thread_rng();
    for _ in 0..MAX_REFERENCE_ATTEMPTS {
        let candidate = random_reference(&mut rng);
        if !store.reference_exists(&candidate)? {
            return Ok(candidate);
        }
        tracing::debug!(reference = %candidate, "Generated reference already taken, retrying");
    }
    Err(SubmissionError::Database(
        "could not generate an unused public reference".to_string(),
    ))
}
