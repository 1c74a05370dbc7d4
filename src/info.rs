// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The modem info block (spec §3 "Modem info block") — the aggregate status
//! cache mutated by the AT layer on every successful response parse, and
//! read by the session layer and by callers after a terminal observation.

/// Current voice-call state, as last reported by a `CLCC` parse (spec §4.2
/// point 9). Distinct from [`crate::error::ErrorKind`]'s `Call` category: this
/// is a sticky cached field, not a one-shot terminal-outcome code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Active,
    Held,
    Dialing,
    Incoming,
    Waiting,
    Idle,
    Invalid,
}

/// The single CIS operation currently dispatched to the AT layer, if any
/// (spec §3 "a pending CIS command enum").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCis {
    RingerOn,
    RingerOff,
    RingerStatus,
    Relay1On,
    Relay1Off,
    Relay1Status,
    Relay2On,
    Relay2Off,
    Relay2Status,
    Reset,
    DownloadConfig,
    ProgramCis,
}

/// Aggregate modem status (spec §3 "Modem info block").
///
/// IMEI and software-version strings are cached by the init script itself
/// (they are read once at boot and are not part of this per-response
/// status cache); see the AT layer for those getters.
#[derive(Debug, Clone, Copy)]
pub struct ModemInfo {
    /// -1 = unknown/failed, otherwise 0..=5 (spec §4.2 point 6).
    signal_strength: i8,
    momsn: u32,
    mtmsn: u32,
    /// `None` until an `AT+SBDIX` response has actually reported a length —
    /// a gateway-status (`+SBDSX`) response carries no `mt_len` field, so it
    /// must not be mistaken for "the next MT is 0 bytes".
    mt_length: Option<u16>,
    queue_depth: u16,
    ring_alert: bool,
    call_status: Option<CallStatus>,
    ringer_on: bool,
    relay1_on: bool,
    relay2_on: bool,
    pending_cis: Option<PendingCis>,
}

impl ModemInfo {
    pub const fn new() -> Self {
        Self {
            signal_strength: -1,
            momsn: 0,
            mtmsn: 0,
            mt_length: None,
            queue_depth: 0,
            ring_alert: false,
            call_status: None,
            ringer_on: false,
            relay1_on: false,
            relay2_on: false,
            pending_cis: None,
        }
    }

    pub fn signal_strength(&self) -> i8 {
        self.signal_strength
    }

    /// Sets the cached signal strength. `n` outside -1..=5 is a caller bug
    /// and is clamped rather than accepted, since spec §8 invariant 6
    /// requires this field to always be a valid reading.
    pub fn set_signal_strength(&mut self, n: i8) {
        self.signal_strength = n.clamp(-1, 5);
    }

    pub fn momsn(&self) -> u32 {
        self.momsn
    }

    pub fn mtmsn(&self) -> u32 {
        self.mtmsn
    }

    /// The length declared by the last `AT+SBDIX` response, if one has
    /// actually run this session. `None` means "no declared length to check
    /// against yet" — a read-MT triggered purely off a `+SBDSX:` gateway
    /// poll must not reject its payload for a mismatch against a length
    /// nothing ever reported.
    pub fn mt_length(&self) -> Option<u16> {
        self.mt_length
    }

    pub fn queue_depth(&self) -> u16 {
        self.queue_depth
    }

    /// Stores a successful session-initiate response's fields (spec §4.2
    /// "Session-initiate response parsing": `mt`, `mtlen`, `mtqueuenbr` are
    /// stored only on success).
    pub fn record_session_response(&mut self, momsn: u32, mtmsn: u32, mt_length: u16, queue_depth: u16) {
        self.momsn = momsn;
        self.mtmsn = mtmsn;
        self.mt_length = Some(mt_length);
        self.queue_depth = queue_depth;
    }

    /// Stores a gateway-status (`+SBDSX`) response's fields (spec §4.2 point
    /// 8). Unlike [`Self::record_session_response`], this never touches
    /// `mt_length` — `+SBDSX` has no length field to report.
    pub fn record_gateway_response(&mut self, momsn: u32, mtmsn: u32, queue_depth: u16) {
        self.momsn = momsn;
        self.mtmsn = mtmsn;
        self.queue_depth = queue_depth;
    }

    pub fn ring_alert(&self) -> bool {
        self.ring_alert
    }

    pub fn set_ring_alert(&mut self, ra: bool) {
        self.ring_alert = ra;
    }

    pub fn call_status(&self) -> Option<CallStatus> {
        self.call_status
    }

    pub fn set_call_status(&mut self, status: CallStatus) {
        self.call_status = Some(status);
    }

    pub fn ringer_on(&self) -> bool {
        self.ringer_on
    }

    pub fn set_ringer_on(&mut self, on: bool) {
        self.ringer_on = on;
    }

    pub fn relay_on(&self, relay: u8) -> bool {
        match relay {
            1 => self.relay1_on,
            _ => self.relay2_on,
        }
    }

    pub fn set_relay_on(&mut self, relay: u8, on: bool) {
        match relay {
            1 => self.relay1_on = on,
            _ => self.relay2_on = on,
        }
    }

    pub fn pending_cis(&self) -> Option<PendingCis> {
        self.pending_cis
    }

    pub fn set_pending_cis(&mut self, op: Option<PendingCis>) {
        self.pending_cis = op;
    }

    /// Clears everything except ringer and relay state, which the session
    /// layer needs to restore CIS state after a power cycle (spec §3
    /// "Lifecycles").
    pub fn clear_on_power_loss(&mut self) {
        let ringer_on = self.ringer_on;
        let relay1_on = self.relay1_on;
        let relay2_on = self.relay2_on;
        *self = Self::new();
        self.ringer_on = ringer_on;
        self.relay1_on = relay1_on;
        self.relay2_on = relay2_on;
    }
}

impl Default for ModemInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_info_reports_unknown_signal() {
        let info = ModemInfo::new();
        assert_eq!(info.signal_strength(), -1);
    }

    #[test]
    fn signal_strength_is_clamped() {
        let mut info = ModemInfo::new();
        info.set_signal_strength(9);
        assert_eq!(info.signal_strength(), 5);
        info.set_signal_strength(-9);
        assert_eq!(info.signal_strength(), -1);
    }

    #[test]
    fn gateway_response_never_invents_an_mt_length() {
        let mut info = ModemInfo::new();
        assert_eq!(info.mt_length(), None);
        info.record_gateway_response(3, 1, 1);
        assert_eq!(info.mt_length(), None);
        info.record_session_response(3, 1, 16, 1);
        assert_eq!(info.mt_length(), Some(16));
        info.record_gateway_response(4, 1, 0);
        assert_eq!(info.mt_length(), Some(16));
    }

    #[test]
    fn power_loss_preserves_ringer_and_relays_only() {
        let mut info = ModemInfo::new();
        info.set_signal_strength(4);
        info.record_session_response(42, 7, 16, 1);
        info.set_ring_alert(true);
        info.set_ringer_on(true);
        info.set_relay_on(1, true);
        info.set_relay_on(2, true);
        info.set_pending_cis(Some(PendingCis::Reset));

        info.clear_on_power_loss();

        assert_eq!(info.signal_strength(), -1);
        assert_eq!(info.momsn(), 0);
        assert_eq!(info.mtmsn(), 0);
        assert!(!info.ring_alert());
        assert_eq!(info.pending_cis(), None);
        assert!(info.ringer_on());
        assert!(info.relay_on(1));
        assert!(info.relay_on(2));
    }
}
