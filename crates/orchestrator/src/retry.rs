//! Bounded retry with exponential backoff for transient failures.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    50
}

fn default_multiplier() -> f64 {
    2.0
}

/// How often and how patiently to retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wait before the second attempt.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Growth factor of the wait between attempts.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

/// Every attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted<E> {
    /// Attempts made.
    pub attempts: u32,
    /// Error from the final attempt.
    pub last: E,
}

impl RetryPolicy {
    /// Policy that tries once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before attempt `attempt + 1` (attempts count from 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis((self.initial_backoff_ms as f64 * factor).round() as u64)
    }

    /// Run `op` until it succeeds or the attempts run out. `op` receives the
    /// 1-based attempt number.
    pub fn run<T, E, F>(&self, what: &str, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(last) if attempt >= max => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last,
                    })
                }
                Err(e) => {
                    let wait = self.backoff(attempt);
                    warn!(attempt, max, ?wait, error = %e, "{what} failed, retrying");
                    thread::sleep(wait);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            multiplier: 2.0,
        }
    }

    #[test]
    fn backoff_grows_geometrically() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_millis(50));
        assert_eq!(p.backoff(2), Duration::from_millis(100));
        assert_eq!(p.backoff(3), Duration::from_millis(200));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let out = fast(3).run("flaky op", |attempt| {
            calls += 1;
            if attempt < 3 {
                Err("transient")
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(out, Ok(3));
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhaustion_keeps_last_cause() {
        let out: Result<(), _> = fast(2).run("doomed op", |attempt| Err(format!("failure {attempt}")));
        let err = out.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.last, "failure 2");
    }

    #[test]
    fn none_tries_once() {
        let mut calls = 0;
        let _ = RetryPolicy::none().run("single", |_| {
            calls += 1;
            Err::<(), _>("no")
        });
        assert_eq!(calls, 1);
    }
}
