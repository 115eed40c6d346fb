//! Request id generation.
use rand::{rngs::OsRng, RngCore};

/// Length of generated request ids.
pub const ID_LENGTH: usize = 21;

const ALPHABET: &[u8; 64] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_-";

/// Generates a URL-safe random request id from the operating system's RNG.
///
/// Ids are unique with overwhelming probability, not by construction. Nothing here coordinates
/// across processes.
pub fn generate_id() -> String {
    let mut bytes = [0u8; ID_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| ALPHABET[(b & 63) as usize] as char)
        .collect()
}
