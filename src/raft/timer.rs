use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Election timeout bounds, milliseconds. The draw is half-open: [150, 300).
pub const ELECTION_TIMEOUT_MIN_MS: u64 = 150;
pub const ELECTION_TIMEOUT_MAX_MS: u64 = 300;

/// Generates a random election timeout for one candidate round.
pub fn random_election_timeout() -> Duration {
    let mut rng = rand::thread_rng();
    let timeout_ms = rng.gen_range(ELECTION_TIMEOUT_MIN_MS..ELECTION_TIMEOUT_MAX_MS);
    Duration::from_millis(timeout_ms)
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
