/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Deadlines the engine thread waits on besides its event queue.
//!
//! There are two: the round change timer, which fires a timeout if the current round does not finish
//! in time, and the future PRE-PREPARE timer, which re-delivers a PRE-PREPARE whose proposal had a
//! timestamp in the future once that timestamp is reached. Setting a timer replaces the previous one.

use std::time::{Duration, Instant};

use crate::types::data_types::Round;

use super::messages::ConsensusMessage;

/// Length of the round change timer for `round`: `request_timeout + 2^round` seconds, clamped to
/// `max_timeout`.
pub fn round_timeout(request_timeout: Duration, max_timeout: Duration, round: Round) -> Duration {
    let backoff = u32::try_from(round.int())
        .ok()
        .and_then(|exp| 2u64.checked_pow(exp))
        .map(Duration::from_secs)
        .unwrap_or(Duration::MAX);
    request_timeout.saturating_add(backoff).min(max_timeout)
}

fn deadline_after(duration: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(duration)
        .unwrap_or_else(|| now + Duration::from_secs(u32::MAX as u64))
}

/// Something the engine thread should do when a timer fires.
pub(crate) enum Expired {
    RoundChange,
    FuturePreprepare(ConsensusMessage),
}

#[derive(Default)]
pub(crate) struct Timers {
    round_change: Option<Instant>,
    future_preprepare: Option<(Instant, ConsensusMessage)>,
}

impl Timers {
    pub(crate) fn new() -> Timers {
        Timers::default()
    }

    /// Start the round change timer, stopping both timers first.
    pub(crate) fn reset_round_change(&mut self, timeout: Duration) {
        self.stop();
        self.round_change = Some(deadline_after(timeout));
    }

    pub(crate) fn set_future_preprepare(&mut self, delay: Duration, msg: ConsensusMessage) {
        self.future_preprepare = Some((deadline_after(delay), msg));
    }

    pub(crate) fn stop(&mut self) {
        self.round_change = None;
        self.future_preprepare = None;
    }

    /// The earliest instant at which a timer fires, if any timer is running.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let future_preprepare = self.future_preprepare.as_ref().map(|(deadline, _)| *deadline);
        match (self.round_change, future_preprepare) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Take every timer that has fired as of `now`.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<Expired> {
        let mut expired = Vec::new();
        if self
            .future_preprepare
            .as_ref()
            .is_some_and(|(deadline, _)| *deadline <= now)
        {
            if let Some((_, msg)) = self.future_preprepare.take() {
                expired.push(Expired::FuturePreprepare(msg));
            }
        }
        if self.round_change.is_some_and(|deadline| deadline <= now) {
            self.round_change = None;
            expired.push(Expired::RoundChange);
        }
        expired
    }
}
