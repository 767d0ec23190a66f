//! Backoff builders.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Upper bound between message stream re-open attempts.
pub const STREAM_MAX_DELAY: Duration = Duration::from_secs(30);

/// Backoff for re-opening a binding's message stream.
///
/// - Min delay: 100ms
/// - Max delay: 30s
/// - Unbounded attempts; callers stop on cancellation
/// - Jitter enabled
pub fn stream_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(STREAM_MAX_DELAY)
        .without_max_times()
        .with_jitter()
}

/// Backoff for NATS and Redis connections at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    #[test]
    fn test_connection_backoff_is_bounded() {
        let delays: Vec<Duration> = connection_backoff().build().collect();
        assert_eq!(delays.len(), 30);
        assert!(delays.iter().all(|d| *d >= Duration::from_millis(100)));
    }

    #[test]
    fn test_stream_backoff_does_not_run_out() {
        let mut delays = stream_backoff().build();
        for _ in 0..100 {
            assert!(delays.next().is_some());
        }
    }
}
