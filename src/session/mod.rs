// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The session/policy layer (spec §4.3, L3): arms the timers, runs the
//! idle-state priority ladder, and interprets every terminal observation
//! the AT layer produces into a policy decision — retry, give up, log,
//! move a file, wait for an incoming call.

pub mod config;

use crate::collaborators::{
    CisImageSource, Filesystem, ModemLogSink, NvramStore, PowerManager, RealTimeClock,
    SystemLogSink,
};
use crate::error::ErrorKind;
use crate::eventlog::{append_text_line, EventLog};
use crate::eventq::DedupRing;
use crate::info::PendingCis;
use crate::link::{AtLink, AtState, Classification};
use crate::serial::UartHardware;
use crate::timer::{TimeSource, Timer};
use crate::trace::{Trace, TraceEvent};

pub use config::{Config, KeepList, RetryKind};

const DEDUP_LOG_LEN: usize = 15;
const CIS_QUEUE_CAP: usize = 8;

/// Depth of the ambient trace ring (spec §0 "internal ambient logging").
const TRACE_LEN: usize = 32;

/// Length of one CIS firmware-image line this driver is willing to buffer
/// per tick (spec §4.2 point 11 doesn't give an exact figure).
const CIS_LINE_BUF_LEN: usize = 128;

/// Periodic call-status (`CLCC`) poll while `DSR` is asserted (spec §4.3
/// tick priority 4 names the trigger but not a cadence; this crate reuses
/// the gateway-status cadence since both are low-urgency background polls).
const CALL_STATUS_POLL_MS: u32 = 10_000;

/// Session-layer view of the conversation (spec §4.3's own three-state
/// description, plus the `powered-down` state it inherits from L2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    PoweredDown,
    Initialising,
    Idle,
    Busy,
}

/// What the outstanding AT conversation was issued for, so `tick()` knows
/// how to interpret the terminal state it eventually observes (spec §4.3
/// "post-command cleanup").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingOp {
    FileSend,
    AdHocSend,
    ReadMt,
    Signal,
    Gateway,
    CallStatus,
    HangUp,
    Cis(PendingCis),
}

/// The L3 policy layer: one `Session` per modem/CIS pair.
pub struct Session<H: UartHardware, const TXN: usize, const RXN: usize> {
    link: AtLink<H, TXN, RXN>,
    config: Config,
    state: SessionState,
    prev_state: Option<SessionState>,
    sending_enabled: bool,

    signal_timer: Timer,
    wait_timer: Timer,
    gateway_timer: Timer,
    call_status_timer: Timer,
    comm_timer: Timer,
    retry_timer: Timer,
    retry_kind: Option<RetryKind>,

    signal_fail_count: u8,
    file_fail_count: u8,

    pending_op: Option<PendingOp>,
    pending_file: Option<crate::collaborators::FileHandle>,
    cis_queue: DedupRing<PendingCis, CIS_QUEUE_CAP>,
    eventlog: EventLog<DEDUP_LOG_LEN>,
    trace: Trace<TRACE_LEN>,

    scratch: [u8; TXN],
}

impl<H: UartHardware, const TXN: usize, const RXN: usize> Session<H, TXN, RXN> {
    pub fn new(hw: H) -> Self {
        Self {
            link: AtLink::new(hw),
            config: Config::new(),
            state: SessionState::PoweredDown,
            prev_state: None,
            sending_enabled: false,
            signal_timer: Timer::new(),
            wait_timer: Timer::new(),
            gateway_timer: Timer::new(),
            call_status_timer: Timer::new(),
            comm_timer: Timer::new(),
            retry_timer: Timer::new(),
            retry_kind: None,
            signal_fail_count: 0,
            file_fail_count: 0,
            pending_op: None,
            pending_file: None,
            cis_queue: DedupRing::new(),
            eventlog: EventLog::new(),
            trace: Trace::new(),
            scratch: [0; TXN],
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The ambient trace ring for post-mortem inspection (spec §0).
    pub fn trace(&self) -> &Trace<TRACE_LEN> {
        &self.trace
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn link(&self) -> &AtLink<H, TXN, RXN> {
        &self.link
    }

    /// Mutable access to the AT layer, for feeding simulated hardware bytes
    /// through [`crate::serial::SerialLink::on_uart_interrupt`] in tests.
    pub fn link_mut(&mut self) -> &mut AtLink<H, TXN, RXN> {
        &mut self.link
    }

    pub fn eventlog(&self) -> &EventLog<DEDUP_LOG_LEN> {
        &self.eventlog
    }

    // ---- lifecycle -------------------------------------------------------

    /// Begins the init script once the modem's power rail is up (spec §4.2
    /// point 1, §3 "Lifecycles").
    pub fn init(&mut self, now_ms: u32) -> bool {
        if self.state != SessionState::PoweredDown {
            return false;
        }
        if self.link.init(now_ms) {
            self.state = SessionState::Initialising;
            true
        } else {
            false
        }
    }

    /// The caller's power-loss hook (spec §3 "Lifecycles"): CIS ringer/relay
    /// state survives, everything else resets.
    pub fn power_lost(&mut self) {
        self.link.power_lost();
        // No clock is available at this hook (spec §3's power-loss interrupt
        // carries no timestamp); the trace ring records ordering, not wall
        // time, for this one event.
        self.trace.record(0, TraceEvent::PowerLost);
        self.state = SessionState::PoweredDown;
        self.prev_state = None;
        self.sending_enabled = false;
        self.pending_op = None;
        self.pending_file = None;
        self.signal_timer.stop();
        self.wait_timer.stop();
        self.gateway_timer.stop();
        self.call_status_timer.stop();
        self.comm_timer.stop();
        self.retry_timer.stop();
        self.retry_kind = None;
        self.signal_fail_count = 0;
        self.file_fail_count = 0;
    }

    pub fn enable_sending(&mut self) {
        self.sending_enabled = true;
    }

    pub fn disable_sending(&mut self) {
        self.sending_enabled = false;
    }

    // ---- ad hoc send / receive --------------------------------------------

    pub fn send_text(&mut self, text: &[u8], now_ms: u32) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        if self.link.send_text(text, now_ms) {
            self.begin_busy(PendingOp::AdHocSend, now_ms);
            true
        } else {
            false
        }
    }

    pub fn send_binary(&mut self, payload: &[u8], now_ms: u32) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        if self.link.send_buffer(payload, now_ms) {
            self.begin_busy(PendingOp::AdHocSend, now_ms);
            true
        } else {
            false
        }
    }

    /// The last MT payload received, regardless of whether it was a text or
    /// binary send on the far end (spec §4.2 point 5: one receive path).
    pub fn get_text_response(&self) -> &[u8] {
        self.link.mt_payload()
    }

    pub fn get_binary_response(&self) -> &[u8] {
        self.link.mt_payload()
    }

    pub fn hangup_call(&mut self, now_ms: u32) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        if self.link.hang_up(now_ms) {
            self.begin_busy(PendingOp::HangUp, now_ms);
            true
        } else {
            false
        }
    }

    pub fn report_pcmcia_error(&mut self, rtc: &impl RealTimeClock, sys_log: &mut impl SystemLogSink) {
        sys_log.record_hardware_error("pcmcia");
        self.eventlog.record(rtc.now_secs(), ErrorKind::FileOpenErr);
    }

    // ---- CIS operations ----------------------------------------------------

    fn dispatch_cis(&mut self, op: PendingCis, now_ms: u32) -> bool {
        match op {
            PendingCis::RingerOn => self.link.set_ringer(true, now_ms),
            PendingCis::RingerOff => self.link.set_ringer(false, now_ms),
            PendingCis::RingerStatus => self.link.query_ringer(now_ms),
            PendingCis::Relay1On => self.link.set_relay(1, true, now_ms),
            PendingCis::Relay1Off => self.link.set_relay(1, false, now_ms),
            PendingCis::Relay1Status => self.link.query_relay(1, now_ms),
            PendingCis::Relay2On => self.link.set_relay(2, true, now_ms),
            PendingCis::Relay2Off => self.link.set_relay(2, false, now_ms),
            PendingCis::Relay2Status => self.link.query_relay(2, now_ms),
            PendingCis::Reset => self.link.reset_cis(now_ms),
            PendingCis::DownloadConfig => self.link.download_cis_config(now_ms),
            PendingCis::ProgramCis => self.link.program_cis(now_ms),
        }
    }

    /// Tries to issue `op` right away if the link can take a CIS command
    /// (idle or powered-down, spec §4.3 "CIS commands from powered-down");
    /// otherwise defers it to the CIS queue drained on every idle tick.
    fn issue_or_defer_cis(&mut self, op: PendingCis, now_ms: u32) -> bool {
        let can_try_now = matches!(self.state, SessionState::Idle | SessionState::PoweredDown);
        if can_try_now && self.dispatch_cis(op, now_ms) {
            self.begin_busy(PendingOp::Cis(op), now_ms);
            return true;
        }
        if self.cis_queue.len() == CIS_QUEUE_CAP {
            self.trace.record(now_ms, TraceEvent::CisQueueFull);
        } else {
            self.trace.record(now_ms, TraceEvent::CisDeferred);
        }
        self.cis_queue.push(op);
        false
    }

    pub fn toggle_ringer(&mut self, on: bool, now_ms: u32) -> bool {
        let op = if on { PendingCis::RingerOn } else { PendingCis::RingerOff };
        self.issue_or_defer_cis(op, now_ms)
    }

    pub fn send_ringer_status_query(&mut self, now_ms: u32) -> bool {
        self.issue_or_defer_cis(PendingCis::RingerStatus, now_ms)
    }

    pub fn get_ringer_status(&self) -> bool {
        self.link.info().ringer_on()
    }

    pub fn toggle_relay(&mut self, relay: u8, on: bool, now_ms: u32) -> bool {
        let op = match (relay, on) {
            (1, true) => PendingCis::Relay1On,
            (1, false) => PendingCis::Relay1Off,
            (_, true) => PendingCis::Relay2On,
            (_, false) => PendingCis::Relay2Off,
        };
        self.issue_or_defer_cis(op, now_ms)
    }

    pub fn send_relay_status_query(&mut self, relay: u8, now_ms: u32) -> bool {
        let op = if relay == 1 {
            PendingCis::Relay1Status
        } else {
            PendingCis::Relay2Status
        };
        self.issue_or_defer_cis(op, now_ms)
    }

    pub fn get_relay_status(&self, relay: u8) -> bool {
        self.link.info().relay_on(relay)
    }

    pub fn reset_cis(&mut self, now_ms: u32) -> bool {
        self.issue_or_defer_cis(PendingCis::Reset, now_ms)
    }

    /// Maps the CIS-config capture script onto [`PendingCis::DownloadConfig`]
    /// (no other L2 CIS operation fits the name; see `DESIGN.md`).
    pub fn upload_cis_config(&mut self, now_ms: u32) -> bool {
        self.issue_or_defer_cis(PendingCis::DownloadConfig, now_ms)
    }

    pub fn cis_download_capture(&self) -> &[u8] {
        self.link.cis_download_capture()
    }

    pub fn program_cis(&mut self, now_ms: u32) -> bool {
        self.issue_or_defer_cis(PendingCis::ProgramCis, now_ms)
    }

    // ---- internal helpers --------------------------------------------------

    fn begin_busy(&mut self, op: PendingOp, now_ms: u32) {
        self.prev_state = Some(self.state);
        self.state = SessionState::Busy;
        self.pending_op = Some(op);
        self.trace.record(now_ms, TraceEvent::SessionState(SessionState::Busy));
    }

    /// Returns to `Idle` or `PoweredDown` depending on which state the
    /// outstanding command was issued from (spec §4.3 "CIS commands from
    /// powered-down").
    fn return_from_busy(&mut self, now_ms: u32) {
        match self.prev_state.take() {
            Some(SessionState::PoweredDown) => {
                self.link.ack_powered_down();
                self.state = SessionState::PoweredDown;
            }
            _ => {
                self.link.ack_idle();
                self.state = SessionState::Idle;
            }
        }
        self.trace.record(now_ms, TraceEvent::SessionState(self.state));
    }

    fn log_event(
        eventlog: &mut EventLog<DEDUP_LOG_LEN>,
        modem_log: &mut impl ModemLogSink,
        now_secs: u32,
        signal: i8,
        filename: &str,
        kind: ErrorKind,
        sub: Option<ErrorKind>,
        momsn: Option<u32>,
        mtmsn: Option<u32>,
    ) {
        eventlog.record(now_secs, kind);
        append_text_line(modem_log, now_secs, signal, filename, kind, sub, momsn, mtmsn);
    }

    fn drain_cis_queue(&mut self, now_ms: u32) {
        if self.state != SessionState::Idle && self.state != SessionState::PoweredDown {
            return;
        }
        if let Some(op) = self.cis_queue.pop() {
            if self.dispatch_cis(op, now_ms) {
                self.begin_busy(PendingOp::Cis(op), now_ms);
            } else {
                self.cis_queue.push(op);
            }
        }
    }

    /// Feeds the next line of a `program_cis` reload-flash upload once L2
    /// asks for one (spec §4.2 point 11, §8 scenario 5).
    fn drive_cis_upload(&mut self, now_ms: u32, cis_source: &mut impl CisImageSource) {
        if !self.link.cis_wants_line() {
            return;
        }
        let mut buf = [0u8; CIS_LINE_BUF_LEN];
        if let Some((len, is_last)) = cis_source.next_line(&mut buf) {
            if is_last {
                self.link.cis_offer_last_line(&buf[..len], now_ms);
            } else {
                self.link.cis_offer_line(&buf[..len], now_ms);
            }
        }
    }

    /// If the modem has gone unresponsive past the configured comm timeout,
    /// power-cycles the CIS and enqueues a reset of it (spec §4.3
    /// "communications timeout").
    fn check_comm_timeout(&mut self, now_ms: u32, power: &mut impl PowerManager) {
        if self.comm_timer.is_armed() && self.comm_timer.expired(now_ms) {
            self.trace.record(now_ms, TraceEvent::CommTimeout);
            power.power_cycle_cis();
            self.cis_queue.push(PendingCis::Reset);
            self.comm_timer.start(now_ms, self.config.comm_timeout_ms());
        }
    }

    fn sync_imei_mirror(&self, nvram: &mut impl NvramStore) {
        let reported = self.link.imei();
        let mirrored_matches = nvram
            .read_imei()
            .map(|mirrored| mirrored.as_str() == reported)
            .unwrap_or(false);
        if !mirrored_matches {
            nvram.write_imei(reported);
        }
    }

    // ---- main drive loop ----------------------------------------------------

    /// Drives both the AT layer and the session policy on top of it. Must be
    /// called frequently from the main loop, same contract as [`AtLink::tick`]
    /// (spec §4.2 "Contract", §4.3).
    #[allow(clippy::too_many_arguments)]
    pub fn tick(
        &mut self,
        clock: &impl TimeSource,
        rtc: &impl RealTimeClock,
        fs: &mut impl Filesystem,
        power: &mut impl PowerManager,
        modem_log: &mut impl ModemLogSink,
        sys_log: &mut impl SystemLogSink,
        nvram: &mut impl NvramStore,
        cis_source: &mut impl CisImageSource,
    ) {
        let now_ms = clock.now_ms();
        self.link.tick(clock);
        if self.link.serial_mut().rx_overflowed() {
            self.trace.record(now_ms, TraceEvent::RxOverflow);
        }

        match self.state {
            SessionState::PoweredDown => self.drain_cis_queue(now_ms),
            SessionState::Initialising => self.tick_initialising(now_ms, nvram),
            SessionState::Idle => self.tick_idle(now_ms, rtc, fs, modem_log, cis_source),
            SessionState::Busy => {
                self.tick_busy(now_ms, rtc, fs, power, modem_log, sys_log, nvram)
            }
        }

        self.drive_cis_upload(now_ms, cis_source);
        self.check_comm_timeout(now_ms, power);
    }

    fn tick_initialising(&mut self, now_ms: u32, nvram: &mut impl NvramStore) {
        match self.link.state() {
            AtState::Succeeded => {
                self.sync_imei_mirror(nvram);
                self.link.ack_idle();
                self.state = SessionState::Idle;
                self.sending_enabled = true;
                self.link.set_satellite_timeout_secs(self.config.satellite_timeout_secs());
                self.signal_timer.start(now_ms, self.config.signal_poll_ms());
                self.gateway_timer.start(now_ms, self.config.gateway_poll_ms());
                self.comm_timer.start(now_ms, self.config.comm_timeout_ms());
                self.trace.record(now_ms, TraceEvent::SessionState(SessionState::Idle));
            }
            AtState::Failed | AtState::TimedOut => {
                self.link.ack_init(now_ms);
            }
            _ => {}
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn tick_idle(
        &mut self,
        now_ms: u32,
        rtc: &impl RealTimeClock,
        fs: &mut impl Filesystem,
        modem_log: &mut impl ModemLogSink,
        cis_source: &mut impl CisImageSource,
    ) {
        // 1. Drain any CIS operation that was deferred while busy.
        self.drain_cis_queue(now_ms);
        if self.state != SessionState::Idle {
            return;
        }

        // 2. Incoming-call wait window.
        if self.wait_timer.is_armed() && self.wait_timer.expired(now_ms) {
            self.wait_timer.stop();
        }

        // 3. Service a waiting MT message before anything else.
        let info = self.link.info();
        if info.ring_alert() || info.queue_depth() > 0 {
            if self.link.read_mt(now_ms) {
                self.begin_busy(PendingOp::ReadMt, now_ms);
                return;
            }
        }

        // 4. Voice-call detection via DSR.
        if self.link.dsr()
            && (!self.call_status_timer.is_armed() || self.call_status_timer.expired(now_ms))
            && self.link.check_call_status(now_ms)
        {
            self.call_status_timer.start(now_ms, CALL_STATUS_POLL_MS);
            self.begin_busy(PendingOp::CallStatus, now_ms);
            return;
        }

        // 5. Ring-indicator logging.
        if self.link.ri() {
            Self::log_event(
                &mut self.eventlog,
                modem_log,
                rtc.now_secs(),
                self.link.info().signal_strength(),
                "-",
                ErrorKind::Incoming,
                None,
                None,
                None,
            );
        }

        // 6. Signal-strength poll, or its retry if one is due.
        let retrying_signal =
            self.retry_kind == Some(RetryKind::SignalStrength) && self.retry_timer.expired(now_ms);
        if self.signal_timer.expired(now_ms) || retrying_signal {
            if retrying_signal {
                self.retry_timer.stop();
                self.retry_kind = None;
            }
            if self.link.query_signal(now_ms) {
                self.signal_timer.start(now_ms, self.config.signal_poll_ms());
                self.begin_busy(PendingOp::Signal, now_ms);
                return;
            }
        }

        // 7. Outbound sending, or the gateway-status fallback poll. Held off
        // while the incoming-call wait window (step 2) is still armed, so a
        // just-finished exchange gets a clear shot at a ring before this
        // reopens the line with an outbound send of its own.
        if self.sending_enabled && !self.link.dsr() && !self.wait_timer.is_armed() {
            let retrying_file =
                self.retry_kind == Some(RetryKind::FileSend) && self.retry_timer.expired(now_ms);
            if retrying_file {
                self.retry_timer.stop();
                self.retry_kind = None;
            }
            if self.pending_file.is_none() {
                if let Some(file) = fs.next_outbox_file() {
                    self.pending_file = Some(file);
                }
            }
            if let Some(file) = self.pending_file.clone() {
                if self.link.send_file(fs, &file, &mut self.scratch, now_ms) {
                    Self::log_event(
                        &mut self.eventlog,
                        modem_log,
                        rtc.now_secs(),
                        self.link.info().signal_strength(),
                        file.name.as_str(),
                        ErrorKind::None,
                        None,
                        None,
                        None,
                    );
                    self.begin_busy(PendingOp::FileSend, now_ms);
                    return;
                }
            } else if self.gateway_timer.expired(now_ms) {
                if self.link.check_gateway(now_ms) {
                    self.gateway_timer.start(now_ms, self.config.gateway_poll_ms());
                    self.begin_busy(PendingOp::Gateway, now_ms);
                }
            }
        }
        let _ = cis_source; // consumed centrally in drive_cis_upload, not here
    }

    #[allow(clippy::too_many_arguments)]
    fn tick_busy(
        &mut self,
        now_ms: u32,
        rtc: &impl RealTimeClock,
        fs: &mut impl Filesystem,
        power: &mut impl PowerManager,
        modem_log: &mut impl ModemLogSink,
        sys_log: &mut impl SystemLogSink,
        nvram: &mut impl NvramStore,
    ) {
        let link_state = self.link.state();
        if !link_state.is_terminal() {
            // A CIS-powered-down link legitimately spends its whole
            // conversation in `Programming`; any other sub-state observing
            // `PoweredDown` mid-conversation is the "unexpected L2 state"
            // case (spec §9 default arm).
            if link_state == AtState::PoweredDown && !matches!(self.pending_op, Some(PendingOp::Cis(_))) {
                Self::log_event(
                    &mut self.eventlog,
                    modem_log,
                    rtc.now_secs(),
                    self.link.info().signal_strength(),
                    "-",
                    ErrorKind::ModemPoweredDown,
                    None,
                    None,
                    None,
                );
                self.link.ack_init(now_ms);
                self.state = SessionState::Initialising;
                self.prev_state = None;
                self.pending_op = None;
                self.trace
                    .record(now_ms, TraceEvent::SessionState(SessionState::Initialising));
            }
            return;
        }

        // Any terminal observation other than a silent timeout proves the
        // modem is still talking to us.
        if link_state != AtState::TimedOut {
            self.comm_timer.start(now_ms, self.config.comm_timeout_ms());
        }

        let op = self.pending_op.take();
        let error = self.link.error_code();
        let signal = self.link.info().signal_strength();

        match op {
            Some(PendingOp::FileSend) => self.cleanup_file_send(now_ms, rtc, fs, modem_log, error, signal),
            Some(PendingOp::AdHocSend) => self.cleanup_ad_hoc_send(now_ms, rtc, modem_log, error, signal),
            Some(PendingOp::ReadMt) => self.cleanup_read_mt(now_ms, rtc, fs, modem_log, error, signal),
            Some(PendingOp::Signal) => self.cleanup_signal(now_ms, rtc, modem_log, sys_log, error, signal),
            Some(PendingOp::Gateway) => self.cleanup_gateway(now_ms, rtc, modem_log, error, signal),
            Some(PendingOp::CallStatus) => self.cleanup_call_status(now_ms, rtc, modem_log, error, signal),
            Some(PendingOp::HangUp) => self.cleanup_hangup(now_ms, rtc, modem_log, error, signal),
            Some(PendingOp::Cis(which)) => {
                self.cleanup_cis(now_ms, rtc, modem_log, nvram, power, which, error, signal)
            }
            None => self.return_from_busy(now_ms),
        }
    }

    fn cleanup_file_send(
        &mut self,
        now_ms: u32,
        rtc: &impl RealTimeClock,
        fs: &mut impl Filesystem,
        modem_log: &mut impl ModemLogSink,
        error: ErrorKind,
        signal: i8,
    ) {
        let file = self.pending_file.take();
        let mut want_hangup = false;

        if error == ErrorKind::None {
            self.file_fail_count = 0;
            if let Some(f) = &file {
                Self::log_event(
                    &mut self.eventlog,
                    modem_log,
                    rtc.now_secs(),
                    signal,
                    f.name.as_str(),
                    ErrorKind::None,
                    None,
                    Some(self.link.info().momsn()),
                    None,
                );
                let first = f.name.as_bytes().first().copied().unwrap_or(0);
                if self.config.keep_list().keeps(first) {
                    if fs.move_to_sent(f).is_err() {
                        let _ = fs.delete(f);
                    }
                } else {
                    let _ = fs.delete(f);
                }
            }
            want_hangup = self.link.dsr();
        } else {
            self.file_fail_count = self.file_fail_count.saturating_add(1);
            if let Some(f) = &file {
                Self::log_event(
                    &mut self.eventlog,
                    modem_log,
                    rtc.now_secs(),
                    signal,
                    f.name.as_str(),
                    error,
                    None,
                    None,
                    None,
                );
            }
            if self.file_fail_count < self.config.file_retry_count() {
                self.pending_file = file;
                self.retry_timer.start(now_ms, self.config.file_retry_delay_ms());
                self.retry_kind = Some(RetryKind::FileSend);
            } else {
                self.file_fail_count = 0;
                if let Some(f) = &file {
                    if fs.move_to_error(f).is_err() {
                        let _ = fs.delete(f);
                    }
                }
            }
        }

        self.return_from_busy(now_ms);
        if want_hangup {
            let _ = self.hangup_call(now_ms);
        } else if !(self.link.info().ring_alert() || self.link.info().queue_depth() > 0) {
            self.wait_timer.start(now_ms, self.config.wait_for_calls_ms());
        }
    }

    fn cleanup_ad_hoc_send(
        &mut self,
        now_ms: u32,
        rtc: &impl RealTimeClock,
        modem_log: &mut impl ModemLogSink,
        error: ErrorKind,
        signal: i8,
    ) {
        Self::log_event(
            &mut self.eventlog,
            modem_log,
            rtc.now_secs(),
            signal,
            "-",
            error,
            None,
            None,
            None,
        );
        let want_hangup = error == ErrorKind::None && self.link.dsr();
        self.return_from_busy(now_ms);
        if want_hangup {
            let _ = self.hangup_call(now_ms);
        } else if !(self.link.info().ring_alert() || self.link.info().queue_depth() > 0) {
            self.wait_timer.start(now_ms, self.config.wait_for_calls_ms());
        }
    }

    fn cleanup_read_mt(
        &mut self,
        now_ms: u32,
        rtc: &impl RealTimeClock,
        fs: &mut impl Filesystem,
        modem_log: &mut impl ModemLogSink,
        error: ErrorKind,
        signal: i8,
    ) {
        match error {
            ErrorKind::None => {
                let mtmsn = self.link.info().mtmsn();
                match self.link.mt_classification() {
                    Some(Classification::Sentinel(_)) => {
                        Self::log_event(
                            &mut self.eventlog,
                            modem_log,
                            rtc.now_secs(),
                            signal,
                            "-",
                            ErrorKind::None,
                            None,
                            None,
                            Some(mtmsn),
                        );
                    }
                    Some(Classification::Routed(route)) => {
                        let ok = fs
                            .write_received(route.device, route.subdir, self.link.mt_payload())
                            .is_ok();
                        if ok {
                            Self::log_event(
                                &mut self.eventlog,
                                modem_log,
                                rtc.now_secs(),
                                signal,
                                "-",
                                ErrorKind::None,
                                None,
                                None,
                                Some(mtmsn),
                            );
                        } else {
                            let _ = fs.write_to_error_dir(self.link.mt_payload());
                            Self::log_event(
                                &mut self.eventlog,
                                modem_log,
                                rtc.now_secs(),
                                signal,
                                "-",
                                ErrorKind::FileWriteErr,
                                None,
                                None,
                                Some(mtmsn),
                            );
                        }
                    }
                    None | Some(Classification::Unrecognized) => {
                        let _ = fs.write_to_error_dir(self.link.mt_payload());
                        Self::log_event(
                            &mut self.eventlog,
                            modem_log,
                            rtc.now_secs(),
                            signal,
                            "-",
                            ErrorKind::FileWriteErr,
                            None,
                            None,
                            Some(mtmsn),
                        );
                    }
                }
            }
            ErrorKind::RxBadChecksum | ErrorKind::RxBadFileLength => {
                let _ = fs.write_to_error_dir(self.link.mt_payload());
                Self::log_event(
                    &mut self.eventlog,
                    modem_log,
                    rtc.now_secs(),
                    signal,
                    "-",
                    error,
                    None,
                    None,
                    None,
                );
            }
            _ => {
                Self::log_event(
                    &mut self.eventlog,
                    modem_log,
                    rtc.now_secs(),
                    signal,
                    "-",
                    error,
                    None,
                    None,
                    None,
                );
            }
        }
        self.return_from_busy(now_ms);
        self.wait_timer.start(now_ms, self.config.wait_for_calls_ms());
    }

    fn cleanup_signal(
        &mut self,
        now_ms: u32,
        rtc: &impl RealTimeClock,
        modem_log: &mut impl ModemLogSink,
        sys_log: &mut impl SystemLogSink,
        error: ErrorKind,
        signal: i8,
    ) {
        if error == ErrorKind::None {
            self.signal_fail_count = 0;
            Self::log_event(
                &mut self.eventlog,
                modem_log,
                rtc.now_secs(),
                signal,
                "-",
                ErrorKind::None,
                None,
                None,
                None,
            );
        } else {
            self.signal_fail_count = self.signal_fail_count.saturating_add(1);
            if self.signal_fail_count < self.config.signal_retry_count() {
                self.retry_timer.start(now_ms, self.config.signal_retry_delay_ms());
                self.retry_kind = Some(RetryKind::SignalStrength);
            } else {
                self.signal_fail_count = 0;
                self.link.info_mut().set_signal_strength(-1);
                Self::log_event(
                    &mut self.eventlog,
                    modem_log,
                    rtc.now_secs(),
                    -1,
                    "-",
                    ErrorKind::CsqError,
                    None,
                    None,
                    None,
                );
                sys_log.record("signal-strength-failed");
            }
        }
        self.return_from_busy(now_ms);
    }

    fn cleanup_gateway(
        &mut self,
        now_ms: u32,
        rtc: &impl RealTimeClock,
        modem_log: &mut impl ModemLogSink,
        error: ErrorKind,
        signal: i8,
    ) {
        Self::log_event(
            &mut self.eventlog,
            modem_log,
            rtc.now_secs(),
            signal,
            "gateway-status",
            error,
            None,
            None,
            None,
        );
        self.return_from_busy(now_ms);
    }

    fn cleanup_call_status(
        &mut self,
        now_ms: u32,
        rtc: &impl RealTimeClock,
        modem_log: &mut impl ModemLogSink,
        error: ErrorKind,
        signal: i8,
    ) {
        Self::log_event(
            &mut self.eventlog,
            modem_log,
            rtc.now_secs(),
            signal,
            "call-status",
            error,
            None,
            None,
            None,
        );
        self.return_from_busy(now_ms);
        self.wait_timer.start(now_ms, self.config.wait_for_calls_ms());
    }

    fn cleanup_hangup(
        &mut self,
        now_ms: u32,
        rtc: &impl RealTimeClock,
        modem_log: &mut impl ModemLogSink,
        error: ErrorKind,
        signal: i8,
    ) {
        Self::log_event(
            &mut self.eventlog,
            modem_log,
            rtc.now_secs(),
            signal,
            "-",
            error,
            None,
            None,
            None,
        );
        self.return_from_busy(now_ms);
        self.wait_timer.start(now_ms, self.config.wait_for_calls_ms());
    }

    #[allow(clippy::too_many_arguments)]
    fn cleanup_cis(
        &mut self,
        now_ms: u32,
        rtc: &impl RealTimeClock,
        modem_log: &mut impl ModemLogSink,
        nvram: &mut impl NvramStore,
        power: &mut impl PowerManager,
        which: PendingCis,
        error: ErrorKind,
        signal: i8,
    ) {
        Self::log_event(
            &mut self.eventlog,
            modem_log,
            rtc.now_secs(),
            signal,
            "-",
            error,
            None,
            None,
            None,
        );
        match which {
            PendingCis::DownloadConfig => {}
            PendingCis::ProgramCis => {
                if error != ErrorKind::None {
                    nvram.invalidate_cis_config();
                    power.power_cycle_cis();
                } else {
                    // A reload-flash reinitialises the CIS board's own
                    // volatile state; push the cache this session already
                    // held before the reload back out over the wire so the
                    // board matches what it was last told (spec §8 scenario
                    // 5: "restores previous ringer and relay states from its
                    // cache").
                    let info = self.link.info();
                    let ringer_on = info.ringer_on();
                    let relay1_on = info.relay_on(1);
                    let relay2_on = info.relay_on(2);
                    self.cis_queue
                        .push(if ringer_on { PendingCis::RingerOn } else { PendingCis::RingerOff });
                    self.cis_queue
                        .push(if relay1_on { PendingCis::Relay1On } else { PendingCis::Relay1Off });
                    self.cis_queue
                        .push(if relay2_on { PendingCis::Relay2On } else { PendingCis::Relay2Off });
                }
            }
            _ => {
                if error != ErrorKind::None {
                    self.cis_queue.push(which);
                }
            }
        }
        self.return_from_busy(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::FileHandle;
    use crate::link::mt::{Device, Subdir};
    use crate::serial::{ConfigError, SerialConfig, UartHardware};
    use crate::timer::VirtualClock;
    use heapless::String as HString;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct MockUart {
        rx_fifo: Rc<RefCell<VecDeque<u8>>>,
        dsr: Rc<RefCell<bool>>,
        ri: Rc<RefCell<bool>>,
    }

    impl UartHardware for MockUart {
        fn configure(&mut self, _config: SerialConfig) -> Result<(), ConfigError> {
            Ok(())
        }
        fn hw_rx_ready(&self) -> bool {
            !self.rx_fifo.borrow().is_empty()
        }
        fn hw_rx_read(&mut self) -> u8 {
            self.rx_fifo.borrow_mut().pop_front().unwrap()
        }
        fn hw_tx_ready(&self) -> bool {
            true
        }
        fn hw_tx_write(&mut self, _byte: u8) {}
        fn set_tx_interrupt_enabled(&mut self, _enabled: bool) {}
        fn ri(&self) -> bool {
            *self.ri.borrow()
        }
        fn dcd(&self) -> bool {
            false
        }
        fn dsr(&self) -> bool {
            *self.dsr.borrow()
        }
        fn cts(&self) -> bool {
            false
        }
        fn rts(&self) -> bool {
            false
        }
        fn dtr(&self) -> bool {
            false
        }
        fn cis_pwr(&self) -> bool {
            false
        }
        fn set_rts(&mut self, _on: bool) {}
        fn set_dtr(&mut self, _on: bool) {}
        fn set_tx(&mut self, _on: bool) {}
        fn set_cis_pwr(&mut self, _on: bool) {}
        fn set_port_mux(&mut self, _programming: bool) {}
    }

    struct MockClock(VirtualClock);

    impl TimeSource for MockClock {
        fn now_ms(&self) -> u32 {
            self.0.now_ms()
        }
    }

    struct MockRtc;
    impl RealTimeClock for MockRtc {
        fn now_secs(&self) -> u32 {
            0
        }
    }

    struct MockFs;
    impl Filesystem for MockFs {
        fn next_outbox_file(&mut self) -> Option<FileHandle> {
            None
        }
        fn read_exact(&mut self, _file: &FileHandle, _offset: usize, _buf: &mut [u8]) -> Result<(), ()> {
            Ok(())
        }
        fn delete(&mut self, _file: &FileHandle) -> Result<(), ()> {
            Ok(())
        }
        fn move_to_sent(&mut self, _file: &FileHandle) -> Result<(), ()> {
            Ok(())
        }
        fn move_to_error(&mut self, _file: &FileHandle) -> Result<(), ()> {
            Ok(())
        }
        fn write_received(&mut self, _device: Device, _subdir: Subdir, _data: &[u8]) -> Result<(), ()> {
            Ok(())
        }
        fn write_to_error_dir(&mut self, _data: &[u8]) -> Result<(), ()> {
            Ok(())
        }
    }

    struct MockPower;
    impl PowerManager for MockPower {
        fn power_cycle_modem(&mut self) {}
        fn power_cycle_cis(&mut self) {}
    }

    struct MockModemLog;
    impl ModemLogSink for MockModemLog {
        fn append_line(&mut self, _line: &str) {}
    }

    struct MockSysLog;
    impl SystemLogSink for MockSysLog {
        fn record(&mut self, _line: &str) {}
        fn record_hardware_error(&mut self, _context: &str) {}
    }

    struct MockNvram;
    impl NvramStore for MockNvram {
        fn read_imei(&self) -> Option<HString<16>> {
            None
        }
        fn write_imei(&mut self, _imei: &str) {}
        fn invalidate_cis_config(&mut self) {}
    }

    struct MockCisSource;
    impl CisImageSource for MockCisSource {
        fn next_line(&mut self, _buf: &mut [u8]) -> Option<(usize, bool)> {
            None
        }
    }

    struct TestRig {
        session: Session<MockUart, 340, 32>,
        rx_fifo: Rc<RefCell<VecDeque<u8>>>,
        clock: MockClock,
    }

    impl TestRig {
        fn new() -> Self {
            let rx_fifo = Rc::new(RefCell::new(VecDeque::new()));
            let hw = MockUart {
                rx_fifo: rx_fifo.clone(),
                ..Default::default()
            };
            Self {
                session: Session::new(hw),
                rx_fifo,
                clock: MockClock(VirtualClock::new()),
            }
        }

        /// Delivers `line` (without its terminator) into the hardware receive
        /// FIFO and drains it into the link's software queue.
        fn feed_line(&mut self, line: &[u8]) {
            self.rx_fifo.borrow_mut().extend(line.iter().copied());
            self.rx_fifo.borrow_mut().push_back(b'\r');
            self.session.link.serial_mut().on_uart_interrupt();
        }

        fn tick(&mut self) {
            self.session.tick(
                &self.clock,
                &MockRtc,
                &mut MockFs,
                &mut MockPower,
                &mut MockModemLog,
                &mut MockSysLog,
                &mut MockNvram,
                &mut MockCisSource,
            );
        }
    }

    #[test]
    fn starts_powered_down() {
        let rig = TestRig::new();
        assert_eq!(rig.session.state(), SessionState::PoweredDown);
    }

    #[test]
    fn init_drives_the_whole_init_script_to_idle() {
        let mut rig = TestRig::new();
        let now = rig.clock.now_ms();
        assert!(rig.session.init(now));
        assert_eq!(rig.session.state(), SessionState::Initialising);

        rig.feed_line(b"300434063158830");
        rig.tick();
        rig.feed_line(b"0");
        rig.tick();
        rig.feed_line(b"0");
        rig.tick();
        rig.feed_line(b"+SBDIX: 0, 1, 0, 0, 0, 0");
        rig.tick();
        rig.feed_line(b"0");
        rig.tick();
        rig.feed_line(b"Call Processor Version: 1.2");
        rig.tick();

        assert_eq!(rig.session.state(), SessionState::Idle);
        assert!(rig.session.eventlog().is_empty());
        assert_eq!(rig.session.link().imei(), "300434063158830");
        assert_eq!(rig.session.link().software_version(), "1.2");
    }

    #[test]
    fn cis_ringer_toggle_is_accepted_while_powered_down() {
        let mut rig = TestRig::new();
        let now = rig.clock.now_ms();
        assert_eq!(rig.session.state(), SessionState::PoweredDown);
        assert!(rig.session.toggle_ringer(true, now));
        assert_eq!(rig.session.state(), SessionState::Busy);
    }

    #[test]
    fn power_loss_returns_to_powered_down_and_clears_timers() {
        let mut rig = TestRig::new();
        let now = rig.clock.now_ms();
        rig.session.init(now);
        rig.session.power_lost();
        assert_eq!(rig.session.state(), SessionState::PoweredDown);
        assert!(!rig.session.signal_timer.is_armed());
    }
}
