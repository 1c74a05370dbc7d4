// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session-layer configurable parameters (spec §4.3 "Configurable
//! parameters", §6 "Configuration options") — a plain struct with named
//! setter/getter methods, matching the spec's explicit requirement rather
//! than a generic key-value config layer.

use heapless::String;

/// Which file-send retries are currently ticking against the shared retry
/// timer (spec §5 names one "retry delay" logical timer; this session
/// shares it between the two retry kinds since at most one conversation is
/// ever outstanding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    SignalStrength,
    FileSend,
}

/// Keep-list for outbound report files (spec §6 "Outbound report-file
/// rules"): `NULL` (empty) deletes every sent file, `*` keeps every sent
/// file, otherwise a file is kept if its name's first byte appears in the
/// list.
#[derive(Debug, Clone)]
pub struct KeepList {
    flags: String<16>,
}

impl KeepList {
    pub fn delete_all() -> Self {
        Self { flags: String::new() }
    }

    pub fn from_flags(flags: &str) -> Self {
        let mut s = String::new();
        let take = flags.len().min(s.capacity());
        let _ = s.push_str(&flags[..take]);
        Self { flags: s }
    }

    pub fn as_str(&self) -> &str {
        &self.flags
    }

    /// Whether a file whose name starts with `first_byte` should be kept
    /// (moved to `sent`) rather than deleted.
    pub fn keeps(&self, first_byte: u8) -> bool {
        if self.flags.as_str() == "*" {
            return true;
        }
        self.flags.as_bytes().contains(&first_byte)
    }
}

impl Default for KeepList {
    fn default() -> Self {
        Self::delete_all()
    }
}

/// Runtime-settable session parameters (spec §4.3, §6). All have
/// documented defaults and are readable/writable via named accessors.
#[derive(Debug, Clone)]
pub struct Config {
    signal_poll_ms: u32,
    signal_retry_count: u8,
    signal_retry_delay_ms: u32,
    file_retry_count: u8,
    file_retry_delay_ms: u32,
    wait_for_calls_ms: u32,
    comm_timeout_ms: u32,
    satellite_timeout_secs: u8,
    keep_list: KeepList,
}

const GATEWAY_POLL_MS: u32 = 10_000;

impl Config {
    pub fn new() -> Self {
        Self {
            signal_poll_ms: 150_000,
            signal_retry_count: 3,
            signal_retry_delay_ms: 25_000,
            file_retry_count: 5,
            file_retry_delay_ms: 3_000,
            wait_for_calls_ms: 45_000,
            comm_timeout_ms: 600_000,
            satellite_timeout_secs: 65,
            keep_list: KeepList::delete_all(),
        }
    }

    pub fn signal_poll_ms(&self) -> u32 {
        self.signal_poll_ms
    }
    pub fn set_signal_poll_ms(&mut self, ms: u32) {
        self.signal_poll_ms = ms;
    }

    pub fn signal_retry_count(&self) -> u8 {
        self.signal_retry_count
    }
    pub fn set_signal_retry_count(&mut self, n: u8) {
        self.signal_retry_count = n;
    }

    pub fn signal_retry_delay_ms(&self) -> u32 {
        self.signal_retry_delay_ms
    }
    pub fn set_signal_retry_delay_ms(&mut self, ms: u32) {
        self.signal_retry_delay_ms = ms;
    }

    pub fn file_retry_count(&self) -> u8 {
        self.file_retry_count
    }
    pub fn set_file_retry_count(&mut self, n: u8) {
        self.file_retry_count = n;
    }

    pub fn file_retry_delay_ms(&self) -> u32 {
        self.file_retry_delay_ms
    }
    pub fn set_file_retry_delay_ms(&mut self, ms: u32) {
        self.file_retry_delay_ms = ms;
    }

    pub fn wait_for_calls_ms(&self) -> u32 {
        self.wait_for_calls_ms
    }
    pub fn set_wait_for_calls_ms(&mut self, ms: u32) {
        self.wait_for_calls_ms = ms;
    }

    pub fn comm_timeout_ms(&self) -> u32 {
        self.comm_timeout_ms
    }
    pub fn set_comm_timeout_ms(&mut self, ms: u32) {
        self.comm_timeout_ms = ms;
    }

    /// Fixed at 10 s (spec §4.3 "gateway-status poll interval ... fixed");
    /// there is no setter.
    pub fn gateway_poll_ms(&self) -> u32 {
        GATEWAY_POLL_MS
    }

    pub fn satellite_timeout_secs(&self) -> u8 {
        self.satellite_timeout_secs
    }
    pub fn set_satellite_timeout_secs(&mut self, secs: u8) {
        self.satellite_timeout_secs = secs.max(1);
    }

    pub fn keep_list(&self) -> &KeepList {
        &self.keep_list
    }
    pub fn set_keep_list(&mut self, keep_list: KeepList) {
        self.keep_list = keep_list;
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
