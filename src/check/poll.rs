//! Registration polling

use std::time::Duration;

use crate::cube::CubeApi;
use crate::domain::SearchParams;
use crate::error::Result;

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Re-queries run while `polls <= max_polls`, so at most `max_polls + 1`.
    pub max_polls: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_polls: 10,
            interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollResult {
    pub registered: u64,
    pub polls: u32,
}

/// Query the registered series count, re-polling while nothing is registered.
///
/// `on_poll` is called after every re-query with the poll number and count.
pub fn wait_for_registration<C, S>(
    cube: &C,
    params: &SearchParams,
    policy: PollPolicy,
    sleeper: &S,
    mut on_poll: impl FnMut(u32, u64),
) -> Result<PollResult>
where
    C: CubeApi + ?Sized,
    S: Sleeper + ?Sized,
{
    let mut registered = cube.registered_series_count(params)?;
    let mut polls = 0;
    while registered < 1 && polls <= policy.max_polls {
        polls += 1;
        sleeper.sleep(policy.interval);
        registered = cube.registered_series_count(params)?;
        tracing::debug!("{registered} series found in CUBE.");
        on_poll(polls, registered);
    }
    Ok(PollResult { registered, polls })
}
