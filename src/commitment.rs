//! One-way answer commitments.
//!
//! A challenge never stores its correct answer in the clear. Both the
//! stored commitment and every submitted attempt go through the same
//! normalization (trim surrounding whitespace, lowercase) before hashing,
//! so case and padding differences never change a verdict. Correctness is
//! exact digest equality; judging-criteria text is advisory only.

/// Normalized form of an answer: trimmed and lower-cased.
fn normalize(plaintext: &str) -> String {
    plaintext.trim().to_lowercase()
}

/// SHA-256 commitment of a plaintext answer, as a lowercase hex digest.
pub fn answer_commitment(plaintext: &str) -> String {
    sha256::digest(normalize(plaintext))
}

/// Whether a submitted answer matches a stored commitment.
pub fn verify_answer(plaintext: &str, commitment: &str) -> bool {
    answer_commitment(plaintext) == commitment
}
