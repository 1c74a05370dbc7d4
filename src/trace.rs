// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small fixed-capacity trace ring (spec §0 "ambient logging"), grounded
//! on `lib/ringbuf`'s design: a static backing array of the most recent
//! tagged events, overwritten oldest-first, with immediate-repeat entries
//! collapsed into a running count rather than grown. Unlike `lib/ringbuf`
//! this is a plain safe struct rather than a macro-declared static — there
//! is exactly one trace ring per driver instance here, not one per module,
//! so there is no need for the macro's name-generation trick.

/// One tagged, timestamped event worth keeping around for post-mortem
/// inspection. Deliberately coarser than the AT-command traffic itself
/// (that already lives in the event log, spec §4.4) — this ring exists for
/// the plumbing *around* the protocol: link state transitions, queueing
/// decisions, and the hardware-level conditions that don't otherwise leave
/// a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// L1 receive byte queue overflowed; bytes were dropped.
    RxOverflow,
    /// L2 AT command state machine entered a new state.
    LinkState(crate::link::AtState),
    /// L3 session state machine entered a new state.
    SessionState(crate::session::SessionState),
    /// A CIS operation was deferred because the link was busy.
    CisDeferred,
    /// The CIS operation queue was full and the oldest entry was dropped.
    CisQueueFull,
    /// The comm-loss timer expired; a modem power cycle was requested.
    CommTimeout,
    /// `power_lost()` was observed.
    PowerLost,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    timestamp: u32,
    event: TraceEvent,
    count: u16,
}

/// A ring of the last `N` [`TraceEvent`]s, with consecutive repeats of the
/// same event collapsed into one entry's `count`.
pub struct Trace<const N: usize> {
    buffer: [Option<Entry>; N],
    /// Index one past the most recently written entry.
    next: usize,
    len: usize,
}

impl<const N: usize> Trace<N> {
    pub const fn new() -> Self {
        Self {
            buffer: [None; N],
            next: 0,
            len: 0,
        }
    }

    /// Records `event` at `timestamp`. If it repeats the immediately
    /// preceding entry, bumps that entry's count instead of consuming a
    /// new slot.
    pub fn record(&mut self, timestamp: u32, event: TraceEvent) {
        let last_idx = (self.next + N - 1) % N;
        if let Some(entry) = self.buffer[last_idx].as_mut() {
            if entry.event == event {
                entry.count = entry.count.saturating_add(1);
                entry.timestamp = timestamp;
                return;
            }
        }
        self.buffer[self.next] = Some(Entry {
            timestamp,
            event,
            count: 1,
        });
        self.next = (self.next + 1) % N;
        if self.len < N {
            self.len += 1;
        }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries oldest-first, as kept in the ring right now.
    pub fn entries(&self) -> impl Iterator<Item = (u32, TraceEvent, u16)> + '_ {
        let start = (self.next + N - self.len) % N;
        (0..self.len).map(move |i| {
            let entry = self.buffer[(start + i) % N].expect("len tracks occupancy");
            (entry.timestamp, entry.event, entry.count)
        })
    }
}

impl<const N: usize> Default for Trace<N> {
    fn default() -> Self {
        Self::new()
    }
}
