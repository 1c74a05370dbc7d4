// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The single error-kind enum observed after every terminal state (spec §7).
//!
//! Nothing in this crate panics on a recoverable condition; every
//! conversation stores the last `ErrorKind` it hit and the session layer
//! reads it once after observing a terminal state, then clears it.

/// Cause of the most recent terminal outcome (`Succeeded`/`Failed`/`TimedOut`).
///
/// `None` is the reset value: set on `ack_idle`/`ack_init` and on every
/// fresh command dispatch, so a stale kind can never leak into the next
/// conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
#[repr(u8)]
pub enum ErrorKind {
    #[default]
    None,

    // Transport (L1)
    HwError,
    RxBufferOverflow,
    RspTimedOut,

    // Generic AT failure
    Error,
    ClearModemBufferError,

    // TX binary / buffer
    TxBinTimeout,
    TxBinBadChecksum,
    TxBinBadSize,

    // Session-initiate (SBDIX) MO status codes 10..36
    GssTimeout,
    GssQueueFull,
    MoSegmentError,
    IncompleteSession,
    SegmentSizeError,
    AccessDenied,
    SbdBlocked,
    IsuTimeout,
    RfDrop,
    ProtocolError,
    NoNetworkService,
    IsuBusy,
    SbdGenericFail,

    // Gateway status (SBDSX) — informational, not a failure
    GatewayHasMail,
    GatewayNoMail,

    // Network registration (CREG)
    NotRegistered,
    RegisteredHome,
    Searching,
    Denied,
    Unknown,
    RegisteredRoaming,

    // Signal strength (CSQF)
    CsqError,
    /// Terminal `Failed` for a `+CSQF:0` reading — a real response, not a
    /// timeout or line-garble, but a reported strength of zero, which is
    /// itself a failure to debounce (spec §4.3 "signal-strength failed").
    /// Kept distinct from [`Self::None`] so a zero reading can never be
    /// mistaken for the success terminal once observed.
    CsqZero,

    // Call status (CLCC)
    Active,
    Held,
    Dialing,
    Incoming,
    Waiting,
    Idle,
    Invalid,

    // MT receive (SBDRB)
    RxNoMsgWaiting,
    RxBadChecksum,
    RxBadFileLength,

    // File I/O (external filesystem collaborator, surfaced here)
    FileOpenErr,
    FileReadErr,
    FileWriteErr,
    TruncatedFile,

    // Modem power
    ModemPoweredDown,

    // CIS
    CisRingerOn,
    CisRingerOff,
    CisRelay1On,
    CisRelay1Off,
    CisRelay2On,
    CisRelay2Off,
}

impl ErrorKind {
    /// `SBDIX` MO status code → kind, per spec §4.2 "Session-initiate response
    /// parsing" and §7. Reserved/unassigned codes in 20..=31 and the
    /// undocumented 33/34/36 fold into [`ErrorKind::SbdGenericFail`] rather
    /// than panicking on an out-of-range code from a noisy RF link.
    pub fn from_sbdix_mo(mo: u8) -> Option<Self> {
        match mo {
            0..=4 => None, // success family, no error kind recorded
            10 => Some(Self::GssTimeout),
            11 => Some(Self::GssQueueFull),
            12 => Some(Self::MoSegmentError),
            13 => Some(Self::IncompleteSession),
            14 => Some(Self::SegmentSizeError),
            15 => Some(Self::AccessDenied),
            16 => Some(Self::SbdBlocked),
            17 => Some(Self::IsuTimeout),
            18 => Some(Self::RfDrop),
            19 => Some(Self::ProtocolError),
            32 => Some(Self::NoNetworkService),
            35 => Some(Self::IsuBusy),
            _ => Some(Self::SbdGenericFail),
        }
    }

    /// `mo` values that land in the success family (spec §4.2 point "mo ∈
    /// {0..4}").
    pub fn sbdix_mo_is_success(mo: u8) -> bool {
        mo <= 4
    }

    /// Stable byte code for the L4 binary snapshot (spec §4.4). Safe to cast
    /// because every variant here is fieldless.
    pub fn log_code(self) -> u8 {
        self as u8
    }

    /// Short kebab-case phrase for the rolling text log (spec §4.4's line
    /// format, §7's kind names).
    pub fn phrase(self) -> &'static str {
        match self {
            Self::None => "ok",
            Self::HwError => "hw-error",
            Self::RxBufferOverflow => "rx-buffer-overflow",
            Self::RspTimedOut => "rsp-timed-out",
            Self::Error => "error",
            Self::ClearModemBufferError => "clear-modem-buffer-error",
            Self::TxBinTimeout => "tx-bin-timeout",
            Self::TxBinBadChecksum => "tx-bin-bad-checksum",
            Self::TxBinBadSize => "tx-bin-bad-size",
            Self::GssTimeout => "gss-timeout",
            Self::GssQueueFull => "gss-queue-full",
            Self::MoSegmentError => "mo-segment-error",
            Self::IncompleteSession => "incomplete-session",
            Self::SegmentSizeError => "segment-size-error",
            Self::AccessDenied => "access-denied",
            Self::SbdBlocked => "sbd-blocked",
            Self::IsuTimeout => "isu-timeout",
            Self::RfDrop => "rf-drop",
            Self::ProtocolError => "protocol-error",
            Self::NoNetworkService => "no-network-service",
            Self::IsuBusy => "isu-busy",
            Self::SbdGenericFail => "sbd-generic-fail",
            Self::GatewayHasMail => "gateway-has-mail",
            Self::GatewayNoMail => "gateway-no-mail",
            Self::NotRegistered => "not-registered",
            Self::RegisteredHome => "registered-home",
            Self::Searching => "searching",
            Self::Denied => "denied",
            Self::Unknown => "unknown",
            Self::RegisteredRoaming => "registered-roaming",
            Self::CsqError => "csq-error",
            Self::CsqZero => "csq-zero",
            Self::Active => "active",
            Self::Held => "held",
            Self::Dialing => "dialing",
            Self::Incoming => "incoming",
            Self::Waiting => "waiting",
            Self::Idle => "idle",
            Self::Invalid => "invalid",
            Self::RxNoMsgWaiting => "rx-no-msg-waiting",
            Self::RxBadChecksum => "rx-bad-checksum",
            Self::RxBadFileLength => "rx-bad-file-length",
            Self::FileOpenErr => "file-open-err",
            Self::FileReadErr => "file-read-err",
            Self::FileWriteErr => "file-write-err",
            Self::TruncatedFile => "truncated-file",
            Self::ModemPoweredDown => "modem-powered-down",
            Self::CisRingerOn => "cis-ringer-on",
            Self::CisRingerOff => "cis-ringer-off",
            Self::CisRelay1On => "cis-relay1-on",
            Self::CisRelay1Off => "cis-relay1-off",
            Self::CisRelay2On => "cis-relay2-on",
            Self::CisRelay2Off => "cis-relay2-off",
        }
    }
}
