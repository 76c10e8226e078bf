use serde_json::Value;
use sha2::{Digest, Sha256};

/// First space-delimited token of `text`. Matching against the command table is
/// exact and case-sensitive, so no trimming or folding happens here.
pub fn command_token(text: &str) -> &str {
    text.split(' ').next().unwrap_or_default()
}

/// Number of space-delimited words, counting empty words between repeated spaces.
pub fn word_count(text: &str) -> usize {
    text.split(' ').count()
}

/// Everything after the command token and its separating space.
///
/// `None` when the command carries no argument, including a tail made only of
/// whitespace.
pub fn argument_tail(text: &str) -> Option<&str> {
    let (_, tail) = text.split_once(' ')?;
    if tail.trim().is_empty() {
        return None;
    }
    Some(tail)
}

/// `n`-th space-delimited word, zero based.
pub fn word(text: &str, n: usize) -> Option<&str> {
    text.split(' ').nth(n)
}

pub fn is_group_conversation(peer_id: i64, threshold: i64) -> bool {
    peer_id > threshold
}

pub fn prompt_length(text: &str) -> usize {
    text.chars().count()
}

pub fn photo_attachment(owner_id: i64, id: i64) -> String {
    format!("photo{owner_id}_{id}")
}

pub fn queue_position_message(template: &str, position: usize) -> String {
    format!("{template}{position}")
}

pub fn jcs_sha256_hex(value: &Value) -> Result<String, String> {
    let canonical = serde_jcs::to_string(value)
        .map_err(|err| format!("failed to canonicalize JSON via JCS: {err}"))?;
    Ok(sha256_hex(canonical.as_bytes()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
