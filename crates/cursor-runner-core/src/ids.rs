//! Identifier generation (spec §4.D, §6).

use rand::distributions::Alphanumeric;
use rand::Rng;

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// `agent-<unix-ms>-<random>` (spec §4.D).
pub fn generate_conversation_id() -> String {
    format!("agent-{}-{}", unix_millis(), random_suffix(8))
}

/// `req-<unix-ms>-<random-base36>` (spec §6).
pub fn generate_request_id() -> String {
    format!("req-{}-{}", unix_millis(), random_suffix(8))
}

/// `msg-<unix-ms>-<random>`, used for each appended [`crate::conversation::Message`].
pub fn generate_message_id() -> String {
    format!("msg-{}-{}", unix_millis(), random_suffix(6))
}
