use std::thread;
use std::time::Duration;

use crate::error::KiraError;

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn run<T, F>(&self, scan: &str, mut op: F) -> Result<T, KiraError>
    where
        F: FnMut(usize) -> Result<T, KiraError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1usize;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if attempt >= max_attempts {
                        return Err(KiraError::FetchFailed {
                            scan: scan.to_string(),
                            attempts: attempt,
                            message: err.to_string(),
                        });
                    }
                    tracing::warn!(scan, attempt, max_attempts, "{err}; retrying");
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(4, Duration::ZERO);
        let mut calls = 0;
        let result: Result<(), KiraError> = policy.run("5", |_| {
            calls += 1;
            Err(KiraError::TransientFetch("503".to_string()))
        });
        assert_eq!(calls, 4);
        assert_matches!(result, Err(KiraError::FetchFailed { attempts: 4, .. }));
    }

    #[test]
    fn permanent_error_is_not_retried() {
        let policy = RetryPolicy::new(4, Duration::ZERO);
        let mut calls = 0;
        let result: Result<(), KiraError> = policy.run("5", |_| {
            calls += 1;
            Err(KiraError::ArchiveNotFound("scan 5".to_string()))
        });
        assert_eq!(calls, 1);
        assert_matches!(result, Err(KiraError::ArchiveNotFound(_)));
    }

    #[test]
    fn recovers_after_transient_failure() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let result = policy.run("5", |attempt| {
            if attempt < 2 {
                Err(KiraError::TransientFetch("timeout".to_string()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }
}
