mod id;

pub use id::*;

/// Returns the current wall-clock time as unix milliseconds.
///
/// All timestamps that cross the wire use this representation, since clients
/// compare them against their own clocks during sync.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
