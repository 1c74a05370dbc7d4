// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The event log (spec §4.4, L4): a deduplicated in-memory summary of the
//! last `N` (=15) terminal-status events, a rolling text-log line
//! formatter, and (in [`snapshot`]) the on-demand binary snapshot builder.

pub mod snapshot;

use heapless::String;

use crate::collaborators::ModemLogSink;
use crate::error::ErrorKind;

/// Number of deduplicated slots kept (spec §3 "Short-term error
/// deduplication ring").
pub const DEDUP_RING_LEN: usize = 15;

/// One deduplicated slot: an event kind, when it was last seen, and how
/// many times it has repeated since the slot was last overwritten.
#[derive(Debug, Clone, Copy)]
pub struct DedupEntry {
    pub timestamp: u32,
    pub kind: ErrorKind,
    pub count: u16,
}

/// The deduplication ring plus the rolling text-log formatter (spec §4.4).
///
/// A new event whose kind is already present bumps that slot's count and
/// refreshes its timestamp; a genuinely new kind overwrites the oldest slot.
/// This is deliberately distinct from [`crate::eventq::DedupRing`]: that
/// type drops duplicates outright, this one counts them.
pub struct EventLog<const N: usize> {
    slots: [Option<DedupEntry>; N],
    head: usize,
    len: usize,
}

impl<const N: usize> EventLog<N> {
    pub const fn new() -> Self {
        Self {
            slots: [None; N],
            head: 0,
            len: 0,
        }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn find_mut(&mut self, kind: ErrorKind) -> Option<&mut DedupEntry> {
        let mut found_idx = None;
        for i in 0..self.len {
            let idx = (self.head + i) % N;
            if matches!(&self.slots[idx], Some(entry) if entry.kind == kind) {
                found_idx = Some(idx);
                break;
            }
        }
        found_idx.and_then(move |idx| self.slots[idx].as_mut())
    }

    /// Records one terminal-status event (spec §4.4 "consult the in-memory
    /// deduplication ring").
    pub fn record(&mut self, timestamp: u32, kind: ErrorKind) {
        if let Some(entry) = self.find_mut(kind) {
            entry.count = entry.count.saturating_add(1);
            entry.timestamp = timestamp;
            return;
        }
        if self.len == N {
            self.head = (self.head + 1) % N;
            self.len -= 1;
        }
        let write_at = (self.head + self.len) % N;
        self.slots[write_at] = Some(DedupEntry {
            timestamp,
            kind,
            count: 1,
        });
        self.len += 1;
    }

    /// Entries oldest-first, as kept in the ring right now.
    pub fn entries(&self) -> impl Iterator<Item = DedupEntry> + '_ {
        (0..self.len).map(move |i| self.slots[(self.head + i) % N].expect("len tracks occupancy"))
    }
}

impl<const N: usize> Default for EventLog<N> {
    fn default() -> Self {
        Self::new()
    }
}

const TEXT_LINE_CAP: usize = 160;

/// Builds one rolling-text-log line and appends it via `sink` (spec §4.4:
/// `timestamp " (" signal_strength "): " filename event_phrase
/// [sub-error_phrase] [" MOMSN: " s | " MTMSN: " s] CRLF`). `sink` is opened,
/// written, and closed once per call by its implementation (spec §9 "File
/// I/O").
#[allow(clippy::too_many_arguments)]
pub fn append_text_line(
    sink: &mut impl ModemLogSink,
    timestamp: u32,
    signal_strength: i8,
    filename: &str,
    event: ErrorKind,
    sub_error: Option<ErrorKind>,
    momsn: Option<u32>,
    mtmsn: Option<u32>,
) {
    use core::fmt::Write as _;
    let mut line: String<TEXT_LINE_CAP> = String::new();
    let _ = write!(line, "{timestamp} ({signal_strength}): {filename} {}", event.phrase());
    if let Some(sub) = sub_error {
        let _ = write!(line, " {}", sub.phrase());
    }
    if let Some(s) = momsn {
        let _ = write!(line, " MOMSN: {s}");
    } else if let Some(s) = mtmsn {
        let _ = write!(line, " MTMSN: {s}");
    }
    let _ = write!(line, "\r\n");
    sink.append_line(&line);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_kind_bumps_count_and_refreshes_timestamp() {
        let mut log: EventLog<4> = EventLog::new();
        log.record(100, ErrorKind::RfDrop);
        log.record(200, ErrorKind::RfDrop);
        let entries: heapless::Vec<DedupEntry, 4> = log.entries().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].count, 2);
        assert_eq!(entries[0].timestamp, 200);
    }

    #[test]
    fn full_ring_overwrites_oldest_distinct_kind() {
        let mut log: EventLog<2> = EventLog::new();
        log.record(1, ErrorKind::RfDrop);
        log.record(2, ErrorKind::CsqError);
        log.record(3, ErrorKind::IsuBusy);
        let entries: heapless::Vec<DedupEntry, 2> = log.entries().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, ErrorKind::CsqError);
        assert_eq!(entries[1].kind, ErrorKind::IsuBusy);
    }

    struct MockSink(heapless::Vec<String<TEXT_LINE_CAP>, 4>);

    impl ModemLogSink for MockSink {
        fn append_line(&mut self, line: &str) {
            let mut s = String::new();
            let _ = s.push_str(line);
            let _ = self.0.push(s);
        }
    }

    #[test]
    fn text_line_carries_momsn_when_given() {
        let mut sink = MockSink(heapless::Vec::new());
        append_text_line(&mut sink, 42, 3, "A0001.rpt", ErrorKind::None, None, Some(7), None);
        assert!(sink.0[0].contains("MOMSN: 7"));
        assert!(sink.0[0].ends_with("\r\n"));
    }
}
