//! Retry policy: error classification and backoff schedules.
//!
//! Failures are classified from the provider's error text because the
//! engines surface errors as strings, not HTTP status codes. Three classes:
//!
//! * **RateLimited** — 429 / quota exhaustion. Backs off at `base * 3^n`:
//!   a shared quota needs real recovery time, and retrying fast just burns
//!   more of it.
//! * **Transient** — timeouts, 5xx, connection resets. Backs off at
//!   `base * 2^n`.
//! * **Permanent** — authentication and bad-request errors. Never retried;
//!   attempt two would fail identically.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimited,
    Transient,
    Permanent,
}

/// Classify an engine error from its message text.
pub fn classify_error(detail: &str) -> ErrorClass {
    let lower = detail.to_lowercase();

    if lower.contains("429")
        || lower.contains("quota")
        || lower.contains("rate limit")
        || lower.contains("resource exhausted")
        || lower.contains("resource_exhausted")
        || lower.contains("too many requests")
    {
        return ErrorClass::RateLimited;
    }

    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("api key")
        || lower.contains("unauthorized")
        || lower.contains("permission denied")
        || lower.contains("invalid argument")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Transient
}

/// Attempt-count retry schedule.
///
/// Attempts are numbered from 1; `max_attempts` includes the first try. The
/// driver loop is explicit about which attempt it is on so logs, errors,
/// and the backoff schedule all agree.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_secs: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_secs: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_secs: base_secs.max(0.0),
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-indexed) failed
    /// with the given class.
    pub fn should_retry(&self, class: ErrorClass, attempt: u32) -> bool {
        class != ErrorClass::Permanent && attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt` (1-indexed).
    pub fn backoff(&self, class: ErrorClass, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let factor: f64 = match class {
            ErrorClass::RateLimited => 3.0f64.powi(exponent as i32),
            _ => 2.0f64.powi(exponent as i32),
        };
        Duration::from_secs_f64(self.base_secs * factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_errors_are_recognised() {
        assert_eq!(classify_error("HTTP 429 Too Many Requests"), ErrorClass::RateLimited);
        assert_eq!(classify_error("Quota exceeded for model"), ErrorClass::RateLimited);
        assert_eq!(classify_error("RESOURCE_EXHAUSTED"), ErrorClass::RateLimited);
    }

    #[test]
    fn auth_errors_are_permanent() {
        assert_eq!(classify_error("401 Unauthorized"), ErrorClass::Permanent);
        assert_eq!(classify_error("invalid API key provided"), ErrorClass::Permanent);
    }

    #[test]
    fn everything_else_is_transient() {
        assert_eq!(classify_error("connection reset by peer"), ErrorClass::Transient);
        assert_eq!(classify_error("503 Service Unavailable"), ErrorClass::Transient);
        assert_eq!(classify_error("deadline exceeded"), ErrorClass::Transient);
    }

    #[test]
    fn transient_backoff_doubles() {
        let policy = RetryPolicy::new(4, 2.0);
        assert_eq!(policy.backoff(ErrorClass::Transient, 1), Duration::from_secs(2));
        assert_eq!(policy.backoff(ErrorClass::Transient, 2), Duration::from_secs(4));
        assert_eq!(policy.backoff(ErrorClass::Transient, 3), Duration::from_secs(8));
    }

    #[test]
    fn rate_limited_backoff_triples() {
        let policy = RetryPolicy::new(4, 2.0);
        assert_eq!(policy.backoff(ErrorClass::RateLimited, 1), Duration::from_secs(2));
        assert_eq!(policy.backoff(ErrorClass::RateLimited, 2), Duration::from_secs(6));
        assert_eq!(policy.backoff(ErrorClass::RateLimited, 3), Duration::from_secs(18));
    }

    #[test]
    fn permanent_errors_never_retry() {
        let policy = RetryPolicy::new(4, 2.0);
        assert!(!policy.should_retry(ErrorClass::Permanent, 1));
        assert!(policy.should_retry(ErrorClass::Transient, 1));
        assert!(policy.should_retry(ErrorClass::RateLimited, 3));
        assert!(!policy.should_retry(ErrorClass::Transient, 4));
    }
}
