//! The five-digit script fingerprint exposed as `__HASH__`.

use sha1::{Digest, Sha1};

/// Hashes the whitespace-stripped script text concatenated with the hashes
/// of its imports (in import order): SHA-1, interpreted as a little-endian
/// byte sum, reduced to its low five decimal digits, zero-padded.
pub(crate) fn short_hash(text: &str, import_hashes: &[String]) -> String {
    let stripped: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let mut hasher = Sha1::new();
    hasher.update(stripped.as_bytes());
    for h in import_hashes {
        hasher.update(h.as_bytes());
    }
    let digest = hasher.finalize();

    // sum(b_i * 256^i) mod 1e5, computed with modular powers
    let mut acc: u64 = 0;
    let mut power: u64 = 1;
    for b in digest {
        acc = (acc + u64::from(b) * power) % 100_000;
        power = power * 256 % 100_000;
    }
    format!("{acc:05}")
}
