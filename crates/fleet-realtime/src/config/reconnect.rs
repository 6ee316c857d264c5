//! Delay policy between reconnect attempts

use rand::Rng;
use std::time::Duration;

/// How long to wait before the next reconnect attempt.
///
/// The state machine is the same for every policy; only the delay changes.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// Same delay before every attempt, forever
    Fixed { delay: Duration },
    /// Doubling delay capped at `max`, with up to `jitter` (a fraction of the
    /// computed delay) added at random
    ExponentialBackoff {
        initial: Duration,
        max: Duration,
        jitter: f64,
    },
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self::ExponentialBackoff {
            initial,
            max,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(self, jitter: f64) -> Self {
        match self {
            Self::ExponentialBackoff { initial, max, .. } => Self::ExponentialBackoff {
                initial,
                max,
                jitter: sanitized_jitter(jitter),
            },
            fixed => fixed,
        }
    }

    /// Delay before retry number `attempt` (zero based) since the last
    /// successful open.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::ExponentialBackoff {
                initial,
                max,
                jitter,
            } => {
                let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
                let base = initial.saturating_mul(factor).min(*max);
                let jitter = sanitized_jitter(*jitter);
                if jitter == 0.0 {
                    return base;
                }
                let spread = base.mul_f64(jitter);
                let extra = rand::thread_rng().gen_range(Duration::ZERO..=spread);
                (base + extra).min(*max)
            }
        }
    }
}

/// Jitter as a fraction in `0.0..=1.0`; NaN and infinities count as none
fn sanitized_jitter(jitter: f64) -> f64 {
    if jitter.is_finite() {
        jitter.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
