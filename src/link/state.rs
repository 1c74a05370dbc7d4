// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Top-level AT state, conversation sub-state, and the outstanding-command
//! record (spec §3 "Outstanding-command record", §4.2 "Sub-states").
//!
//! Both state machines are closed sum types with a total transition
//! function over (state × observed response), per Design Notes §9 — no
//! trait objects, no virtual dispatch.

use crate::error::ErrorKind;
use crate::timer::Timer;

/// Top-level conversation state. `Succeeded`/`Failed`/`TimedOut` are
/// observation states: the caller must explicitly `ack_idle`/`ack_init`
/// after reading them (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtState {
    PoweredDown,
    Initialising,
    Idle,
    Sending,
    Receiving,
    Programming,
    Succeeded,
    Failed,
    TimedOut,
}

impl AtState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

/// The five AT commands that are a single send/await-one-line exchange,
/// sharing one response-parsing shape (header-matched line, spec §4.2
/// points 6–10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleExchange {
    Csq,
    Creg,
    Sbdsx,
    Clcc,
    Chup,
}

/// The CIS operations whose entire script is "send the literal, await one
/// ack line" (ringer/relay set+query, and the plain `reset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CisSimpleOp {
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
}

/// Conversation sub-state: one linear script position per the ~15 scripts
/// of spec §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubState {
    // --- Init (spec §4.2 point 1) ---
    InitQueryImei,
    InitAwaitImei,
    InitMtAlertConfig,
    InitAutoRegisterOn,
    InitInitiateSession,
    InitAwaitSessionResponse,
    InitRevisionQuery,
    InitAwaitRevision,

    // --- Send-binary-file / Send-binary-buffer (point 2) ---
    TxBinAwaitReady,
    TxBinStreaming,
    TxBinAwaitZero,
    TxBinAwaitSessionResponse,
    TxBinAwaitTrailingZero,

    // --- Send-text (point 3) ---
    TxTextAwaitResult,
    TxTextAwaitSessionResponse,
    TxTextAwaitTrailingZero,

    // --- Mailbox-check (point 4) ---
    MboxAwaitZero,
    MboxAwaitSessionResponse,
    MboxAwaitTrailingZero,

    // --- Read-MT-binary (point 5) ---
    RxMtAwaitLength,
    RxMtAwaitPayload,
    RxMtAwaitChecksum,
    RxMtAwaitTrailingZero,

    // --- CSQ / CREG / SBDSX / CLCC / hang-up (points 6-10) ---
    AwaitSingleResponse(SingleExchange),

    // --- CIS programming scripts (point 11) ---
    CisAwaitSimpleAck(CisSimpleOp),
    CisDownloadConfigCollecting,
    CisVersionCheckAwait,
    CisReloadFlashAwaitVersionCheck,
    CisReloadFlashUploadingLine,
    CisReloadFlashAwaitLineAck,
    CisReloadFlashAwaitComplete,
}

/// One per driver instance: the live conversation, if any (spec §3
/// "Outstanding-command record", invariant 1: at most one outstanding).
#[derive(Debug, Clone, Copy)]
pub struct OutstandingCommand {
    pub state: AtState,
    pub sub_state: Option<SubState>,
    pub last_error: ErrorKind,
    pub deadline: Timer,
}

impl OutstandingCommand {
    pub const fn new() -> Self {
        Self {
            state: AtState::PoweredDown,
            sub_state: None,
            last_error: ErrorKind::None,
            deadline: Timer::new(),
        }
    }

    /// Cancels the response deadline before any terminal state is observed
    /// by the caller (spec §3 invariant 3).
    pub fn enter_terminal(&mut self, state: AtState, error: ErrorKind) {
        debug_assert!(state.is_terminal());
        self.deadline.stop();
        self.state = state;
        self.last_error = error;
        self.sub_state = None;
    }
}

impl Default for OutstandingCommand {
    fn default() -> Self {
        Self::new()
    }
}
