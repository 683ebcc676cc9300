//! Idle work scheduling for optimization passes.
//!
//! A pass is requested whenever the mutation watcher sees relevant changes.
//! Requests coalesce until the host reports an idle period, or until the
//! request's deadline passes so that a continuously busy page still gets
//! optimized. Time is the host clock in milliseconds.

use tracing::{debug, trace};

/// What the host knows about the current idle period, as passed to an
/// idle callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleDeadline {
    pub time_remaining_ms: f64,
    pub did_timeout: bool,
}

impl IdleDeadline {
    pub fn idle(time_remaining_ms: f64) -> Self {
        Self {
            time_remaining_ms,
            did_timeout: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled { requested_at: u64, deadline: u64 },
    Running { rerun_requested: bool },
}

/// Handed out when a pass starts; returned through [`IdleScheduler::finish`].
#[derive(Debug, PartialEq)]
#[must_use]
pub struct PassTicket {
    pub waited_ms: u64,
    pub timed_out: bool,
}

#[derive(Debug)]
pub struct IdleScheduler {
    state: SchedulerState,
    timeout_ms: u64,
    coalesced: u64,
    passes_started: u64,
}

impl IdleScheduler {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            state: SchedulerState::Idle,
            timeout_ms,
            coalesced: 0,
            passes_started: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SchedulerState::Idle
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, SchedulerState::Scheduled { .. })
    }

    /// Requests merged into an already pending or running pass.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    pub fn passes_started(&self) -> u64 {
        self.passes_started
    }

    /// Request a pass. Returns true if this created a new pending pass.
    pub fn schedule(&mut self, now: u64) -> bool {
        match self.state {
            SchedulerState::Idle => {
                let deadline = now.saturating_add(self.timeout_ms);
                self.state = SchedulerState::Scheduled {
                    requested_at: now,
                    deadline,
                };
                trace!(now, deadline, "pass scheduled");
                true
            }
            SchedulerState::Scheduled { .. } => {
                self.coalesced += 1;
                false
            }
            SchedulerState::Running { .. } => {
                self.state = SchedulerState::Running {
                    rerun_requested: true,
                };
                self.coalesced += 1;
                false
            }
        }
    }

    /// Start the pending pass if the host is idle or the deadline has passed.
    pub fn poll(&mut self, now: u64, idle: Option<IdleDeadline>) -> Option<PassTicket> {
        let SchedulerState::Scheduled {
            requested_at,
            deadline,
        } = self.state
        else {
            return None;
        };
        let has_idle_time = idle.is_some_and(|d| d.did_timeout || d.time_remaining_ms > 0.0);
        let timed_out = now >= deadline;
        if !has_idle_time && !timed_out {
            return None;
        }
        self.state = SchedulerState::Running {
            rerun_requested: false,
        };
        self.passes_started += 1;
        let ticket = PassTicket {
            waited_ms: now.saturating_sub(requested_at),
            timed_out: timed_out && !has_idle_time,
        };
        debug!(waited_ms = ticket.waited_ms, timed_out = ticket.timed_out, "pass starting");
        Some(ticket)
    }

    /// Start a pass right away, bypassing the idle wait. Used for the first
    /// pass after enabling and for explicit runs.
    pub fn begin_now(&mut self, now: u64) -> PassTicket {
        let waited_ms = match self.state {
            SchedulerState::Scheduled { requested_at, .. } => now.saturating_sub(requested_at),
            _ => 0,
        };
        self.state = SchedulerState::Running {
            rerun_requested: false,
        };
        self.passes_started += 1;
        PassTicket {
            waited_ms,
            timed_out: false,
        }
    }

    /// Close out a pass. A request that arrived mid-pass becomes pending.
    pub fn finish(&mut self, ticket: PassTicket, now: u64) {
        let rerun = matches!(
            self.state,
            SchedulerState::Running {
                rerun_requested: true
            }
        );
        self.state = SchedulerState::Idle;
        trace!(waited_ms = ticket.waited_ms, timed_out = ticket.timed_out, rerun, "pass finished");
        if rerun {
            self.schedule(now);
        }
    }

    /// Drop any pending pass.
    pub fn cancel(&mut self) {
        if self.state != SchedulerState::Idle {
            debug!(state = ?self.state, "scheduler cancelled");
        }
        self.state = SchedulerState::Idle;
    }

    /// Milliseconds until the pending pass is forced, if one is pending.
    pub fn time_until_deadline(&self, now: u64) -> Option<u64> {
        match self.state {
            SchedulerState::Scheduled { deadline, .. } => Some(deadline.saturating_sub(now)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_coalesce_into_one_pass() {
        let mut s = IdleScheduler::new(1000);
        assert!(s.schedule(0));
        assert!(!s.schedule(5));
        assert!(!s.schedule(9));
        assert_eq!(s.coalesced(), 2);
        let t = s.poll(10, Some(IdleDeadline::idle(12.0))).unwrap();
        assert_eq!(t.waited_ms, 10);
        s.finish(t, 11);
        assert!(s.is_idle());
        assert_eq!(s.passes_started(), 1);
    }

    #[test]
    fn waits_for_idle_before_deadline() {
        let mut s = IdleScheduler::new(1000);
        s.schedule(0);
        assert!(s.poll(500, None).is_none());
        assert!(s.poll(500, Some(IdleDeadline::idle(0.0))).is_none());
        assert_eq!(s.time_until_deadline(500), Some(500));
    }

    #[test]
    fn deadline_forces_the_pass() {
        let mut s = IdleScheduler::new(1000);
        s.schedule(100);
        let t = s.poll(1100, None).unwrap();
        assert!(t.timed_out);
        assert_eq!(t.waited_ms, 1000);
        s.finish(t, 1100);
    }

    #[test]
    fn request_during_pass_reschedules() {
        let mut s = IdleScheduler::new(50);
        s.schedule(0);
        let t = s.poll(1, Some(IdleDeadline::idle(5.0))).unwrap();
        assert!(!s.schedule(2));
        s.finish(t, 3);
        assert_eq!(
            s.state(),
            SchedulerState::Scheduled {
                requested_at: 3,
                deadline: 53
            }
        );
    }

    #[test]
    fn cancel_drops_pending_work() {
        let mut s = IdleScheduler::new(50);
        s.schedule(0);
        s.cancel();
        assert!(s.poll(1000, Some(IdleDeadline::idle(5.0))).is_none());
    }

    #[test]
    fn nothing_runs_without_a_request() {
        let mut s = IdleScheduler::new(50);
        assert!(s.poll(10_000, Some(IdleDeadline::idle(50.0))).is_none());
    }
}
