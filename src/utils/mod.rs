/// Utility functions and helpers
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Generate a unique ID based on timestamp and random component
///
/// Handy for hosts that want one sticky context per request.
pub fn generate_id(prefix: &str) -> String {
    let random: u32 = rand::random();
    format!("{}-{}-{:x}", prefix, now_millis(), random)
}

/// Wall-clock milliseconds since the Unix epoch
///
/// Sticky records are shared between processes, so they carry wall-clock time.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Store key for a context id: a bounded-length digest under a prefix
pub fn context_key(prefix: &str, context_id: &str) -> String {
    let digest = Sha256::digest(context_id.as_bytes());
    format!("{}:{}", prefix, hex::encode(&digest[..8]))
}

/// Format duration for human-readable output
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 && duration.subsec_millis() > 0 {
        format!("{}ms", duration.subsec_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
