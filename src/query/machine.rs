//! Cursor state machine
//!
//! Pure bookkeeping: the machine tracks demand and the number of buffered
//! results and tells the driver what to do next. It never touches storage.
//!
//! ```text
//!                 Request
//! AwaitingDemand ────────► Replaying ──── Replayed ───┐
//!      ▲                      ▲                       │
//!      │ demand met           │ Tick / NewData        ▼
//!      └──────────────────── Idle ◄── caught up (live)
//!                                                     │ caught up (current)
//!                                                     │ or finished (both)
//!                                                     ▼
//!                                                 Completed
//! ```
//!
//! A replay abandoned by a dropped request is reported as `Interrupted`
//! and puts the machine back to `AwaitingDemand`.

/// Where a cursor is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Nothing to deliver until the consumer asks for more
    AwaitingDemand,
    /// A range query is in flight
    Replaying,
    /// Live cursor caught up with the store, waiting for new data
    Idle,
    /// Terminal
    Completed,
}

/// Bounded or unbounded query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorMode {
    /// Stops at the bound captured when the query started
    Current,
    /// Keeps polling for new data
    Live,
}

/// Inputs to the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorEvent {
    /// Consumer wants `n` more results
    Request(u64),
    /// A range query returned `count` results; `exhausted` means the
    /// source reached its current upper bound, `finished` that it passed
    /// the bound the query was opened with
    Replayed {
        count: usize,
        exhausted: bool,
        finished: bool,
    },
    /// The in-flight range query was dropped before it returned
    Interrupted,
    /// Refresh interval elapsed
    Tick,
    /// Something relevant was appended
    NewData,
    Cancel,
    /// The source failed
    Failed,
}

/// Instructions for the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorEffect {
    /// Run one range query returning at most `limit` results
    Replay { limit: usize },
    /// Hand the next `n` buffered results to the consumer
    Deliver(usize),
    /// Signal end of stream
    Complete,
    /// Signal the failure to the consumer
    Fail,
}

/// State plus the counters transitions depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorMachine {
    pub state: CursorState,
    pub mode: CursorMode,
    /// Requested but not yet delivered
    pub demand: u64,
    /// Fetched but not yet delivered
    pub buffered: usize,
    pub max_buffer_size: usize,
    /// The last replay reached the upper bound
    pub caught_up: bool,
    /// New data was signalled while a replay was in flight
    pub wake_pending: bool,
    /// The source will never return more results
    pub finished: bool,
}

impl CursorMachine {
    pub fn new(mode: CursorMode, max_buffer_size: usize) -> Self {
        Self {
            state: CursorState::AwaitingDemand,
            mode,
            demand: 0,
            buffered: 0,
            max_buffer_size: max_buffer_size.max(1),
            caught_up: false,
            wake_pending: false,
            finished: false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == CursorState::Completed
    }

    /// Apply one event, returning the next machine and what the driver must do
    pub fn step(self, event: CursorEvent) -> (Self, Vec<CursorEffect>) {
        let mut next = self;
        let mut effects = Vec::new();

        if next.state == CursorState::Completed {
            return (next, effects);
        }

        match event {
            CursorEvent::Request(n) => {
                next.demand = next.demand.saturating_add(n);
            }
            CursorEvent::Replayed {
                count,
                exhausted,
                finished,
            } => {
                if next.state != CursorState::Replaying {
                    return (next, effects);
                }
                next.buffered += count;
                next.finished = finished;
                next.caught_up = exhausted || count == 0;
                if next.wake_pending && next.mode == CursorMode::Live {
                    next.caught_up = false;
                }
                next.wake_pending = false;
                next.state = CursorState::AwaitingDemand;
            }
            CursorEvent::Interrupted => {
                if next.state != CursorState::Replaying {
                    return (next, effects);
                }
                next.wake_pending = false;
                next.state = CursorState::AwaitingDemand;
            }
            CursorEvent::Tick | CursorEvent::NewData => {
                if next.mode == CursorMode::Current || next.finished {
                    return (next, effects);
                }
                if next.state == CursorState::Replaying {
                    next.wake_pending = true;
                    return (next, effects);
                }
                next.caught_up = false;
            }
            CursorEvent::Cancel => {
                next.state = CursorState::Completed;
                next.demand = 0;
                next.buffered = 0;
                return (next, effects);
            }
            CursorEvent::Failed => {
                next.state = CursorState::Completed;
                effects.push(CursorEffect::Fail);
                return (next, effects);
            }
        }

        next.settle(&mut effects);
        (next, effects)
    }

    /// Deliver what demand allows, then pick the next state
    fn settle(&mut self, effects: &mut Vec<CursorEffect>) {
        let deliverable = self.buffered.min(usize::try_from(self.demand).unwrap_or(usize::MAX));
        if deliverable > 0 {
            effects.push(CursorEffect::Deliver(deliverable));
            self.buffered -= deliverable;
            self.demand -= deliverable as u64;
        }

        if self.state == CursorState::Replaying {
            return;
        }

        // Refill when someone is waiting or the buffer ran down to half
        let wants_more = self.demand > 0 || self.buffered > 0;
        if !self.caught_up
            && !self.finished
            && wants_more
            && self.buffered <= self.max_buffer_size / 2
        {
            self.state = CursorState::Replaying;
            effects.push(CursorEffect::Replay {
                limit: self.max_buffer_size - self.buffered,
            });
            return;
        }

        let drained = self.buffered == 0
            && (self.finished || (self.caught_up && self.mode == CursorMode::Current));
        self.state = if drained {
            effects.push(CursorEffect::Complete);
            CursorState::Completed
        } else if self.demand == 0 {
            CursorState::AwaitingDemand
        } else {
            CursorState::Idle
        };
    }
}
