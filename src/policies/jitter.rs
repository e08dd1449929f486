//! # Jitter policy for reconnect spacing.
//!
//! [`JitterPolicy`] adds randomness to reconnect delays so that sessions
//! which lost their connections at the same instant (e.g. one transport
//! failure taking down several sessions on a shared route) do not all
//! reconnect in lockstep.
//!
//! - [`JitterPolicy::None`] — no randomization, predictable delays
//! - [`JitterPolicy::Full`] — random delay in [0, interval]
//! - [`JitterPolicy::Equal`] — interval/2 + random[0, interval/2]

use rand::Rng;
use std::time::Duration;

/// Policy controlling randomization of reconnect delays.
///
/// ## Trade-offs
/// - **None**: predictable, but risks synchronized reconnect storms
/// - **Full**: maximum randomness, aggressive load spreading
/// - **Equal**: balanced (preserves ~75% of the interval on average)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// No jitter: use the exact interval.
    #[default]
    None,

    /// Full jitter: random delay in [0, interval].
    Full,

    /// Equal jitter: interval/2 + random[0, interval/2].
    Equal,
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Self::full_jitter(delay),
            JitterPolicy::Equal => Self::equal_jitter(delay),
        }
    }

    /// Full jitter: random[0, delay]
    fn full_jitter(delay: Duration) -> Duration {
        let mut rng = rand::rng();
        let ms = delay.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.random_range(0..=ms))
    }

    /// Equal jitter: delay/2 + random[0, delay/2]
    fn equal_jitter(delay: Duration) -> Duration {
        let mut rng = rand::rng();
        let ms = delay.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        let half = ms / 2;
        let jitter = if half == 0 {
            0
        } else {
            rng.random_range(0..=half)
        };
        Duration::from_millis(half + jitter)
    }
}
