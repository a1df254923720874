//! Cursor driver
//!
//! Runs a [`CursorMachine`] against a [`CursorSource`]: executes the
//! machine's effects, feeds results back in and, for live cursors, waits
//! on the refresh timer or an append notification while idle.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use super::machine::{CursorEffect, CursorEvent, CursorMachine, CursorMode, CursorState};
use super::source::CursorSource;
use crate::error::{JournalError, JournalResult};
use crate::journal::AppendNotification;

/// Backpressured, cancellable query cursor
pub struct Cursor<S: CursorSource> {
    source: S,
    machine: CursorMachine,
    buffer: VecDeque<S::Item>,
    /// Delivered results not yet returned by `request`
    ready: Vec<S::Item>,
    ticker: Interval,
    notifications: Option<broadcast::Receiver<AppendNotification>>,
}

impl<S: CursorSource> Cursor<S> {
    /// `notifications` only matters for live cursors
    pub fn new(
        source: S,
        mode: CursorMode,
        max_buffer_size: usize,
        refresh_interval: Duration,
        notifications: Option<broadcast::Receiver<AppendNotification>>,
    ) -> Self {
        let period = refresh_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            source,
            machine: CursorMachine::new(mode, max_buffer_size),
            buffer: VecDeque::new(),
            ready: Vec::new(),
            ticker,
            notifications: match mode {
                CursorMode::Live => notifications,
                CursorMode::Current => None,
            },
        }
    }

    pub fn state(&self) -> CursorState {
        self.machine.state
    }

    pub fn is_completed(&self) -> bool {
        self.machine.is_completed()
    }

    /// Results fetched but not yet delivered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Outstanding demand
    pub fn demand(&self) -> u64 {
        self.machine.demand
    }

    /// Ask for up to `n` more results
    ///
    /// Returns as soon as at least one result was delivered. An empty
    /// result means the cursor completed. A live cursor with nothing new
    /// waits for the next refresh tick or append notification.
    ///
    /// Dropping the returned future loses nothing: results already
    /// delivered are returned by the next call, and an abandoned range
    /// query is issued again.
    pub async fn request(&mut self, n: u64) -> JournalResult<Vec<S::Item>> {
        if n == 0 {
            return Err(JournalError::invalid("demand must be positive"));
        }

        let mut effects = Vec::new();
        if self.state() == CursorState::Replaying {
            // The previous request was dropped while its query was in flight
            effects.extend(self.apply(CursorEvent::Interrupted));
        }
        effects.extend(self.apply(CursorEvent::Request(n)));

        loop {
            let mut replay = None;
            for effect in effects.drain(..) {
                match effect {
                    CursorEffect::Deliver(count) => {
                        let count = count.min(self.buffer.len());
                        self.ready.extend(self.buffer.drain(..count));
                    }
                    CursorEffect::Replay { limit } => replay = Some(limit),
                    CursorEffect::Complete => self.release(),
                    CursorEffect::Fail => self.release(),
                }
            }

            if let Some(limit) = replay {
                match self.source.fetch(limit).await {
                    Ok(fetched) => {
                        let count = fetched.items.len();
                        self.buffer.extend(fetched.items);
                        effects = self.apply(CursorEvent::Replayed {
                            count,
                            exhausted: fetched.exhausted,
                            finished: fetched.finished,
                        });
                        continue;
                    }
                    Err(e) => {
                        self.apply(CursorEvent::Failed);
                        self.release();
                        return Err(e);
                    }
                }
            }

            if !self.ready.is_empty() || self.is_completed() {
                return Ok(std::mem::take(&mut self.ready));
            }

            effects = match self.state() {
                CursorState::Idle => {
                    let wakeup = self.wait_for_data().await;
                    self.apply(wakeup)
                }
                state => {
                    return Err(JournalError::storage(
                        "cursor",
                        format!("no progress possible in state {:?}", state),
                    ))
                }
            };
        }
    }

    /// Stop the cursor and release its subscription
    pub fn cancel(&mut self) {
        self.apply(CursorEvent::Cancel);
        self.buffer.clear();
        self.ready.clear();
        self.release();
    }

    fn apply(&mut self, event: CursorEvent) -> Vec<CursorEffect> {
        let before = self.machine.state;
        let (next, effects) = self.machine.step(event);
        self.machine = next;
        if before != next.state {
            debug!(from = ?before, to = ?next.state, event = ?event, "Cursor state changed");
        }
        effects
    }

    fn release(&mut self) {
        self.notifications = None;
    }

    /// Wait for the refresh tick or a relevant append
    async fn wait_for_data(&mut self) -> CursorEvent {
        let Self {
            source,
            ticker,
            notifications,
            ..
        } = self;

        let Some(rx) = notifications.as_mut() else {
            ticker.tick().await;
            return CursorEvent::Tick;
        };

        loop {
            tokio::select! {
                _ = ticker.tick() => return CursorEvent::Tick,
                received = rx.recv() => match received {
                    Ok(notification) if source.is_relevant(&notification) => {
                        return CursorEvent::NewData;
                    }
                    Ok(_) => continue,
                    // Missed some; a replay finds out what
                    Err(RecvError::Lagged(_)) => return CursorEvent::NewData,
                    Err(RecvError::Closed) => break,
                },
            }
        }

        *notifications = None;
        ticker.tick().await;
        CursorEvent::Tick
    }
}
