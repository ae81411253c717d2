// Reconnect delay policy.
//
// Delays double per consecutive failure starting from `base`, capped at
// `max`, with up to `jitter` of random noise added on top. The noise is
// never fed back into the stored delay.

use std::time::Duration;

use rand::Rng;

/// How the previous session ended, as far as backoff cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    /// Torn down on purpose (settings change, refresh). Retry now.
    Reload,
    Failure { reached_session: bool },
}

/// Per-device memory of the last scheduled delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    delay: Option<Duration>,
}

impl RetryState {
    pub fn is_clear(&self) -> bool {
        self.delay.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub jitter: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(15),
            jitter: Duration::from_secs(5),
            max: Duration::from_secs(3600),
        }
    }
}

impl BackoffPolicy {
    pub fn next_delay(&self, state: &mut RetryState, closure: Closure) -> Duration {
        match closure {
            Closure::Reload => {
                *state = RetryState::default();
                Duration::ZERO
            }
            Closure::Failure {
                reached_session: true,
            } => {
                *state = RetryState::default();
                self.base + self.noise()
            }
            Closure::Failure {
                reached_session: false,
            } => {
                let delay = match state.delay {
                    None => self.base,
                    Some(previous) => previous.saturating_mul(2).min(self.max),
                };
                state.delay = Some(delay);
                delay + self.noise()
            }
        }
    }

    fn noise(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}
