// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::event::{ControllerEvent, EventSink};

/// A cancellable one-shot timer that posts an event into the controller
/// queue.
///
/// Each schedule gets a new ticket. An event whose ticket no longer matches
/// (because the timer was cancelled or rescheduled after it fired) is
/// rejected by [`TimerSlot::fire`].
#[derive(Debug, Default)]
pub struct TimerSlot {
    ticket: u64,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&mut self, delay: Duration, events: &EventSink, make_event: F)
    where
        F: FnOnce(u64) -> ControllerEvent + Send + 'static,
    {
        self.cancel();
        self.ticket += 1;
        let ticket = self.ticket;
        let events = events.clone();
        self.handle = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = events.send(make_event(ticket));
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.handle.is_some()
    }

    /// Accept a fired event. Returns false for stale tickets.
    pub fn fire(&mut self, ticket: u64) -> bool {
        if self.handle.is_some() && ticket == self.ticket {
            self.handle = None;
            true
        } else {
            false
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
