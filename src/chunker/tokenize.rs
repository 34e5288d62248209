//! Token counting and content hashing
//!
//! Tokens are UAX #29 words containing at least one alphanumeric character.
//! Window sizes, overlap and the hashing encoder all count on this scheme.

use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;

/// Identifier of the tokenization scheme, recorded in the index manifest
pub const TOKENIZER_ID: &str = "uax29-words-v1";

/// Hex characters of the content hash kept in a chunk id
pub const CHUNK_ID_LEN: usize = 16;

pub fn words(text: &str) -> impl Iterator<Item = &str> {
    text.unicode_words()
}

pub fn count_tokens(text: &str) -> usize {
    text.unicode_words().count()
}

/// A word-bound segment counts as a token when it has an alphanumeric char.
pub(crate) fn is_token(segment: &str) -> bool {
    segment.chars().any(char::is_alphanumeric)
}

/// Lowercase hex SHA-256 of `text`
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

pub fn chunk_id(text: &str) -> String {
    let mut hash = content_hash(text);
    hash.truncate(CHUNK_ID_LEN);
    hash
}

/// Query normalization: trim, lowercase, collapse internal whitespace.
pub fn normalize_query(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
