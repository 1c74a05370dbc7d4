// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The AT command state machine (spec §4.2) — one operation per externally
//! meaningful AT/CIS command, a `tick()` that drives parsing and
//! transitions, and the getters the session layer and callers poll after a
//! terminal observation.

use core::fmt::Write as _;

use heapless::String;

use crate::collaborators::{FileHandle, Filesystem};
use crate::error::ErrorKind;
use crate::info::{CallStatus, ModemInfo};
use crate::serial::{Port, SerialLink, UartHardware};
use crate::timer::TimeSource;

use super::mt::{self, Classification};
use super::parse::{
    self, CisLineAck, FeedResult, LengthPrefixedReader, LineAccumulator, LpOutcome,
};
use super::state::{AtState, CisSimpleOp, OutstandingCommand, SingleExchange, SubState};

/// Largest MT-binary payload this driver will accept (spec §3 "Byte
/// queue" sizing note; the spec does not give an exact figure for the MT
/// side, so this crate picks a generous one).
pub const MAX_RX_FILE_LEN: usize = 1024;
/// Bulk-capture cap for CIS `download config` (spec §4.2 point 11: "bulk
/// capture of up to a fixed byte count" — this crate's chosen figure).
pub const CIS_DOWNLOAD_CONFIG_CAP: usize = 256;

const LINE_CAP: usize = 180; // exceeds the ~145-byte CGMR response (spec §3).

const STANDARD_TIMEOUT_MS: u32 = 5_000;
const SATELLITE_TIMEOUT_DEFAULT_MS: u32 = 65_000;
const CIS_TIMEOUT_DEFAULT_MS: u32 = 5_000;
const CIS_DOWNLOAD_TIMEOUT_MS: u32 = 65_000;

fn at_line(buf: &mut String<48>, body: &str) {
    buf.clear();
    let _ = write!(buf, "AT{body}\r");
}

fn at_crlf(buf: &mut String<48>, body: &str) {
    buf.clear();
    let _ = write!(buf, "AT{body}\r\n");
}

/// The AT command state machine. Owns the serial link, the outstanding
/// conversation, and the aggregate status cache.
pub struct AtLink<H: UartHardware, const TXN: usize, const RXN: usize> {
    serial: SerialLink<H, TXN, RXN>,
    cmd: OutstandingCommand,
    info: ModemInfo,
    line: LineAccumulator<LINE_CAP>,
    rx_frame: LengthPrefixedReader<MAX_RX_FILE_LEN>,
    cis_capture: heapless::Vec<u8, CIS_DOWNLOAD_CONFIG_CAP>,
    pending: PendingTx<TXN>,
    expect_final_ack: bool,
    satellite_timeout_ms: u32,
    imei: String<16>,
    software_version: String<8>,
    scratch: String<48>,
}

impl<H: UartHardware, const TXN: usize, const RXN: usize> AtLink<H, TXN, RXN> {
    pub fn new(hw: H) -> Self {
        Self {
            serial: SerialLink::new(hw),
            cmd: OutstandingCommand::new(),
            info: ModemInfo::new(),
            line: LineAccumulator::new(),
            rx_frame: LengthPrefixedReader::new(),
            cis_capture: heapless::Vec::new(),
            pending: PendingTx::new(),
            expect_final_ack: false,
            satellite_timeout_ms: SATELLITE_TIMEOUT_DEFAULT_MS,
            imei: String::new(),
            software_version: String::new(),
            scratch: String::new(),
        }
    }

    pub fn serial_mut(&mut self) -> &mut SerialLink<H, TXN, RXN> {
        &mut self.serial
    }

    /// High while a voice call is in progress (spec §4.3 tick priority 4).
    pub fn dsr(&self) -> bool {
        self.serial.dsr()
    }

    /// High while the modem's ring indicator is asserted (spec §4.3 tick
    /// priority 5).
    pub fn ri(&self) -> bool {
        self.serial.ri()
    }

    pub fn state(&self) -> AtState {
        self.cmd.state
    }

    pub fn error_code(&self) -> ErrorKind {
        self.cmd.last_error
    }

    pub fn info(&self) -> &ModemInfo {
        &self.info
    }

    /// Mutable access for the session layer's own bookkeeping on the cache
    /// (e.g. forcing signal strength back to "unknown" once its debounce
    /// budget is exhausted — spec §4.3 "signal-strength failed").
    pub fn info_mut(&mut self) -> &mut ModemInfo {
        &mut self.info
    }

    pub fn imei(&self) -> &str {
        &self.imei
    }

    pub fn software_version(&self) -> &str {
        &self.software_version
    }

    /// Programmable satellite-response timeout, 1..255 s (spec §4.2
    /// "Timeouts", forwarded from the session layer's configuration).
    pub fn set_satellite_timeout_secs(&mut self, secs: u8) {
        self.satellite_timeout_ms = (secs.max(1) as u32) * 1_000;
    }

    fn is_idle(&self) -> bool {
        self.cmd.state == AtState::Idle
    }

    /// CIS scripts share the UART with the modem but not its power rail: a
    /// CIS command may be dispatched while the modem is still
    /// `powered-down` (spec §4.3 "CIS commands from powered-down").
    fn is_idle_for_cis(&self) -> bool {
        matches!(self.cmd.state, AtState::Idle | AtState::PoweredDown)
    }

    fn begin(&mut self, state: AtState, sub_state: SubState, now_ms: u32, timeout_ms: u32) {
        self.cmd.state = state;
        self.cmd.sub_state = Some(sub_state);
        self.cmd.last_error = ErrorKind::None;
        self.cmd.deadline.start(now_ms, timeout_ms);
        self.line.reset();
    }

    fn fail(&mut self, kind: ErrorKind) {
        self.cmd.enter_terminal(AtState::Failed, kind);
    }

    fn succeed(&mut self) {
        self.cmd.enter_terminal(AtState::Succeeded, ErrorKind::None);
    }

    // ---- operations -----------------------------------------------------

    /// Begins the init script: IMEI query → MT-alert config → auto-register
    /// → initiate-session → revision query (spec §4.2 point 1).
    pub fn init(&mut self, now_ms: u32) -> bool {
        if self.cmd.state != AtState::PoweredDown && self.cmd.state != AtState::Idle {
            return false;
        }
        at_line(&mut self.scratch, "CGSN");
        self.serial.send(self.scratch.as_bytes());
        self.begin(
            AtState::Initialising,
            SubState::InitQueryImei,
            now_ms,
            STANDARD_TIMEOUT_MS,
        );
        true
    }

    pub fn send_buffer(&mut self, payload: &[u8], now_ms: u32) -> bool {
        if !self.is_idle() || payload.len() > TXN {
            return false;
        }
        self.scratch.clear();
        let _ = write!(self.scratch, "AT+SBDWB={}\r", payload.len());
        self.serial.send(self.scratch.as_bytes());
        // Stashed until the `READY` ack, which triggers the actual byte
        // stream (spec §4.2 point 2).
        self.pending = PendingTx::from_slice(payload);
        self.begin(
            AtState::Sending,
            SubState::TxBinAwaitReady,
            now_ms,
            STANDARD_TIMEOUT_MS,
        );
        true
    }

    pub fn send_file(
        &mut self,
        fs: &mut impl Filesystem,
        file: &FileHandle,
        scratch: &mut [u8],
        now_ms: u32,
    ) -> bool {
        if !self.is_idle() || file.len > scratch.len() {
            return false;
        }
        if fs.read_exact(file, 0, &mut scratch[..file.len]).is_err() {
            return false;
        }
        self.send_buffer(&scratch[..file.len], now_ms)
    }

    pub fn send_text(&mut self, text: &[u8], now_ms: u32) -> bool {
        if !self.is_idle() || text.len() > 40 {
            return false;
        }
        self.scratch.clear();
        let _ = self.scratch.push_str("AT+SBDWT=");
        for &b in text {
            let _ = self.scratch.push(b as char);
        }
        let _ = self.scratch.push('\r');
        self.serial.send(self.scratch.as_bytes());
        self.begin(
            AtState::Sending,
            SubState::TxTextAwaitResult,
            now_ms,
            STANDARD_TIMEOUT_MS,
        );
        true
    }

    pub fn check_mailbox(&mut self, now_ms: u32) -> bool {
        if !self.is_idle() {
            return false;
        }
        at_line(&mut self.scratch, "+SBDD0");
        self.serial.send(self.scratch.as_bytes());
        self.begin(
            AtState::Sending,
            SubState::MboxAwaitZero,
            now_ms,
            STANDARD_TIMEOUT_MS,
        );
        true
    }

    pub fn read_mt(&mut self, now_ms: u32) -> bool {
        if !self.is_idle() {
            return false;
        }
        at_line(&mut self.scratch, "+SBDRB");
        self.serial.send(self.scratch.as_bytes());
        self.rx_frame.reset();
        self.begin(
            AtState::Receiving,
            SubState::RxMtAwaitLength,
            now_ms,
            self.satellite_timeout_ms,
        );
        true
    }

    pub fn query_signal(&mut self, now_ms: u32) -> bool {
        self.single_exchange(SingleExchange::Csq, "+CSQF", now_ms)
    }

    pub fn check_registration(&mut self, now_ms: u32) -> bool {
        self.single_exchange(SingleExchange::Creg, "+CREG?", now_ms)
    }

    pub fn check_gateway(&mut self, now_ms: u32) -> bool {
        self.single_exchange(SingleExchange::Sbdsx, "+SBDSX", now_ms)
    }

    pub fn check_call_status(&mut self, now_ms: u32) -> bool {
        self.single_exchange(SingleExchange::Clcc, "+CLCC", now_ms)
    }

    pub fn hang_up(&mut self, now_ms: u32) -> bool {
        self.single_exchange(SingleExchange::Chup, "+CHUP", now_ms)
    }

    fn single_exchange(&mut self, which: SingleExchange, body: &str, now_ms: u32) -> bool {
        if !self.is_idle() {
            return false;
        }
        at_line(&mut self.scratch, body);
        self.serial.send(self.scratch.as_bytes());
        self.begin(
            AtState::Sending,
            SubState::AwaitSingleResponse(which),
            now_ms,
            STANDARD_TIMEOUT_MS,
        );
        true
    }

    fn cis_simple(&mut self, op: CisSimpleOp, body: &str, now_ms: u32) -> bool {
        if !self.is_idle_for_cis() {
            return false;
        }
        self.serial.set_port(Port::Programming);
        at_line(&mut self.scratch, body);
        self.serial.send(self.scratch.as_bytes());
        self.begin(
            AtState::Programming,
            SubState::CisAwaitSimpleAck(op),
            now_ms,
            CIS_TIMEOUT_DEFAULT_MS,
        );
        true
    }

    pub fn set_ringer(&mut self, on: bool, now_ms: u32) -> bool {
        if on {
            self.cis_simple(CisSimpleOp::RingerOn, "set ringer 1", now_ms)
        } else {
            self.cis_simple(CisSimpleOp::RingerOff, "set ringer 0", now_ms)
        }
    }

    pub fn query_ringer(&mut self, now_ms: u32) -> bool {
        self.cis_simple(CisSimpleOp::RingerStatus, "set ringer", now_ms)
    }

    pub fn set_relay(&mut self, relay: u8, on: bool, now_ms: u32) -> bool {
        let (op, body): (CisSimpleOp, &str) = match (relay, on) {
            (1, true) => (CisSimpleOp::Relay1On, "set relay 0 1"),
            (1, false) => (CisSimpleOp::Relay1Off, "set relay 0 0"),
            (_, true) => (CisSimpleOp::Relay2On, "set relay 1 1"),
            (_, false) => (CisSimpleOp::Relay2Off, "set relay 1 0"),
        };
        self.cis_simple(op, body, now_ms)
    }

    pub fn query_relay(&mut self, relay: u8, now_ms: u32) -> bool {
        let (op, body) = if relay == 1 {
            (CisSimpleOp::Relay1Status, "set relay 0")
        } else {
            (CisSimpleOp::Relay2Status, "set relay 1")
        };
        self.cis_simple(op, body, now_ms)
    }

    pub fn reset_cis(&mut self, now_ms: u32) -> bool {
        self.cis_simple(CisSimpleOp::Reset, "reset", now_ms)
    }

    pub fn download_cis_config(&mut self, now_ms: u32) -> bool {
        if !self.is_idle_for_cis() {
            return false;
        }
        self.serial.set_port(Port::Programming);
        self.cis_capture.clear();
        self.scratch.clear();
        let _ = self.scratch.push_str("download config\r\n");
        self.serial.send(self.scratch.as_bytes());
        self.begin(
            AtState::Programming,
            SubState::CisDownloadConfigCollecting,
            now_ms,
            CIS_DOWNLOAD_TIMEOUT_MS,
        );
        true
    }

    pub fn cis_download_capture(&self) -> &[u8] {
        &self.cis_capture
    }

    /// The payload of the last successfully-received MT frame; valid once
    /// `state()` is `Succeeded` after a [`Self::read_mt`] (spec §4.2 point
    /// 5).
    pub fn mt_payload(&self) -> &[u8] {
        self.rx_frame.payload()
    }

    /// Classifies `mt_payload()`'s message-type tag (spec §4.2 "File write
    /// for received MT", §6). `None` if the payload is too short to carry
    /// one.
    pub fn mt_classification(&self) -> Option<Classification> {
        let payload = self.rx_frame.payload();
        if payload.len() < 4 {
            return None;
        }
        let msg_type = ((payload[2] as u16) << 8) | payload[3] as u16;
        Some(mt::classify(msg_type))
    }

    /// Begins `program_cis`: version-check, then a line-by-line reload-flash
    /// upload driven by [`Self::cis_wants_line`]/[`Self::cis_offer_line`]
    /// (spec §4.2 point 11, §8 scenario 5).
    pub fn program_cis(&mut self, now_ms: u32) -> bool {
        if !self.is_idle_for_cis() {
            return false;
        }
        self.serial.set_port(Port::Programming);
        self.serial.send(b"~");
        self.begin(
            AtState::Programming,
            SubState::CisReloadFlashAwaitVersionCheck,
            now_ms,
            CIS_TIMEOUT_DEFAULT_MS,
        );
        true
    }

    /// Standalone CIS version-check (spec §4.2 point 11), independent of
    /// `program_cis`'s internal pre-check before reload-flash.
    pub fn cis_version_check(&mut self, now_ms: u32) -> bool {
        if !self.is_idle_for_cis() {
            return false;
        }
        self.serial.set_port(Port::Programming);
        self.serial.send(b"~");
        self.begin(
            AtState::Programming,
            SubState::CisVersionCheckAwait,
            now_ms,
            CIS_TIMEOUT_DEFAULT_MS,
        );
        true
    }

    pub fn cis_wants_line(&self) -> bool {
        self.cmd.sub_state == Some(SubState::CisReloadFlashUploadingLine)
    }

    pub fn cis_offer_line(&mut self, line: &[u8], now_ms: u32) {
        if !self.cis_wants_line() {
            return;
        }
        self.expect_final_ack = false;
        self.serial.send(line);
        self.cmd.sub_state = Some(SubState::CisReloadFlashAwaitLineAck);
        self.cmd.deadline.start(now_ms, CIS_TIMEOUT_DEFAULT_MS);
    }

    /// Signals the end of the image: the accepted-line ack (`a`) for this
    /// line is followed by a `C` marking the upload complete (spec §4.2
    /// point 11: "`a` followed by `C` means upload complete").
    pub fn cis_offer_last_line(&mut self, line: &[u8], now_ms: u32) {
        if !self.cis_wants_line() {
            return;
        }
        self.expect_final_ack = true;
        self.serial.send(line);
        self.cmd.sub_state = Some(SubState::CisReloadFlashAwaitLineAck);
        self.cmd.deadline.start(now_ms, CIS_TIMEOUT_DEFAULT_MS);
    }

    pub fn ack_idle(&mut self) {
        self.flush_for_ack();
        self.cmd = OutstandingCommand::new();
        self.cmd.state = AtState::Idle;
        self.serial.set_port(Port::Data);
    }

    /// Restores `powered-down` after a CIS script that was dispatched while
    /// the modem itself had no power (spec §4.3 "CIS commands from
    /// powered-down"): unlike [`Self::ack_idle`], this does not claim the
    /// modem is ready for a new AT conversation.
    pub fn ack_powered_down(&mut self) {
        self.flush_for_ack();
        self.cmd = OutstandingCommand::new();
        self.serial.set_port(Port::Data);
    }

    pub fn ack_init(&mut self, now_ms: u32) {
        self.flush_for_ack();
        self.cmd = OutstandingCommand::new();
        self.serial.set_port(Port::Data);
        self.init(now_ms);
    }

    fn flush_for_ack(&mut self) {
        self.serial.flush_rx();
        self.serial.flush_tx();
        self.line.reset();
        self.rx_frame.reset();
    }

    pub fn power_lost(&mut self) {
        self.info.clear_on_power_loss();
        self.cmd = OutstandingCommand::new();
        self.flush_for_ack();
        self.serial.set_port(Port::Data);
    }

    // ---- main drive loop --------------------------------------------------

    /// Drains newly-received bytes and advances the conversation. Must be
    /// called frequently from the main loop (spec §4.2 "Contract").
    pub fn tick(&mut self, clock: &impl TimeSource) {
        let now_ms = clock.now_ms();

        match self.cmd.sub_state {
            Some(SubState::RxMtAwaitLength)
            | Some(SubState::RxMtAwaitPayload)
            | Some(SubState::RxMtAwaitChecksum)
            | Some(SubState::RxMtAwaitTrailingZero) => self.drive_rx_frame(now_ms),
            Some(SubState::CisDownloadConfigCollecting) => self.drive_cis_capture(),
            Some(SubState::CisReloadFlashAwaitLineAck)
            | Some(SubState::CisReloadFlashAwaitComplete) => self.drive_cis_line_ack(now_ms),
            _ => {
                while let Some(byte) = self.serial.recv_byte() {
                    if self.line.feed(byte) == FeedResult::LineComplete {
                        self.on_line(now_ms);
                    }
                }
            }
        }

        if self.cmd.deadline.is_armed() && self.cmd.deadline.expired(now_ms) {
            self.on_timeout();
        }
    }

    /// Raw byte capture for `download config` — a bulk stream with no line
    /// terminator, bounded by [`CIS_DOWNLOAD_CONFIG_CAP`] (spec §4.2 point
    /// 11).
    fn drive_cis_capture(&mut self) {
        while let Some(byte) = self.serial.recv_byte() {
            if self.cis_capture.len() == CIS_DOWNLOAD_CONFIG_CAP {
                self.succeed();
                return;
            }
            let _ = self.cis_capture.push(byte);
        }
    }

    /// Constant-byte parser for the reload-flash upload ack stream (spec
    /// §4.2 point 11, §6 "CIS command table").
    fn drive_cis_line_ack(&mut self, now_ms: u32) {
        while let Some(byte) = self.serial.recv_byte() {
            if self.cmd.sub_state == Some(SubState::CisReloadFlashAwaitComplete) {
                if byte == b'C' {
                    self.succeed();
                } else {
                    self.fail(ErrorKind::Error);
                }
                return;
            }
            match parse::classify_cis_ack(byte) {
                Some(CisLineAck::Accepted) => {
                    if self.expect_final_ack {
                        self.cmd.sub_state = Some(SubState::CisReloadFlashAwaitComplete);
                        self.cmd.deadline.start(now_ms, CIS_TIMEOUT_DEFAULT_MS);
                    } else {
                        self.cmd.sub_state = Some(SubState::CisReloadFlashUploadingLine);
                        self.cmd.deadline.stop();
                    }
                    return;
                }
                Some(CisLineAck::Complete) => {
                    self.succeed();
                    return;
                }
                Some(CisLineAck::Recoverable) => {
                    self.serial.send(b"c\r");
                    self.serial.send(b"~");
                    self.cmd.sub_state = Some(SubState::CisReloadFlashAwaitVersionCheck);
                    self.cmd.deadline.start(now_ms, CIS_TIMEOUT_DEFAULT_MS);
                    return;
                }
                Some(CisLineAck::Fatal) => {
                    self.fail(ErrorKind::Error);
                    return;
                }
                None => {}
            }
        }
    }

    fn on_timeout(&mut self) {
        // SBDSX/CSQF time out silently (spec §4.2 "Timeouts").
        let silent = matches!(
            self.cmd.sub_state,
            Some(SubState::AwaitSingleResponse(SingleExchange::Sbdsx))
                | Some(SubState::AwaitSingleResponse(SingleExchange::Csq))
        );
        if silent {
            self.cmd.enter_terminal(AtState::TimedOut, ErrorKind::None);
        } else {
            self.cmd.enter_terminal(AtState::TimedOut, ErrorKind::RspTimedOut);
        }
    }

    fn drive_rx_frame(&mut self, now_ms: u32) {
        while let Some(byte) = self.serial.recv_byte() {
            match self.rx_frame.feed(byte) {
                LpOutcome::Pending => {}
                LpOutcome::Overflow => {
                    self.fail(ErrorKind::RxBadFileLength);
                    return;
                }
                LpOutcome::Done {
                    checksum_ok,
                    trailing_ok,
                } => {
                    let _ = trailing_ok; // consumed to keep the byte stream aligned
                    let declared = self.rx_frame.declared_len();
                    // `mt_length()` is `None` when the read was triggered off
                    // a bare `+SBDSX:` gateway poll rather than an
                    // `AT+SBDIX` response — there is then no declared length
                    // to check the frame against, so the checksum alone
                    // gates acceptance (spec §8 scenario 2).
                    if matches!(self.info.mt_length(), Some(expected) if declared != expected) {
                        self.fail(ErrorKind::RxBadFileLength);
                    } else if !checksum_ok {
                        self.fail(ErrorKind::RxBadChecksum);
                    } else {
                        self.succeed();
                    }
                    return;
                }
            }
        }
        let _ = now_ms;
    }

    fn on_line(&mut self, now_ms: u32) {
        let line: heapless::Vec<u8, LINE_CAP> = heapless::Vec::from_slice(self.line.line())
            .unwrap_or_default();
        self.line.reset();
        let line = line.as_slice();

        match self.cmd.sub_state {
            Some(SubState::InitQueryImei) => {
                if let Ok(s) = core::str::from_utf8(line) {
                    self.imei.clear();
                    let _ = self.imei.push_str(s.trim());
                }
                at_line(&mut self.scratch, "SBDMTA=0");
                self.serial.send(self.scratch.as_bytes());
                self.cmd.sub_state = Some(SubState::InitMtAlertConfig);
                self.cmd.deadline.start(now_ms, STANDARD_TIMEOUT_MS);
            }
            Some(SubState::InitMtAlertConfig) => {
                if parse::parse_solitary_digit(line) == Some(0) {
                    at_line(&mut self.scratch, "SBDAREG=1");
                    self.serial.send(self.scratch.as_bytes());
                    self.cmd.sub_state = Some(SubState::InitAutoRegisterOn);
                    self.cmd.deadline.start(now_ms, STANDARD_TIMEOUT_MS);
                } else {
                    self.restart_init(now_ms);
                }
            }
            Some(SubState::InitAutoRegisterOn) => {
                if parse::parse_solitary_digit(line) == Some(0) {
                    at_crlf(&mut self.scratch, "+SBDIX");
                    self.serial.send(self.scratch.as_bytes());
                    self.cmd.sub_state = Some(SubState::InitInitiateSession);
                    self.cmd.deadline.start(now_ms, self.satellite_timeout_ms);
                } else {
                    self.restart_init(now_ms);
                }
            }
            Some(SubState::InitInitiateSession) => {
                if let Some(r) = parse::parse_sbdix(line) {
                    if ErrorKind::sbdix_mo_is_success(r.mo) {
                        self.info
                            .record_session_response(r.momsn, r.mtmsn.max(0) as u32, r.mt_len, r.queued);
                    }
                    self.cmd.sub_state = Some(SubState::InitAwaitSessionResponse);
                } else if parse::parse_solitary_digit(line).is_some() {
                    at_line(&mut self.scratch, "CGMR");
                    self.serial.send(self.scratch.as_bytes());
                    self.cmd.sub_state = Some(SubState::InitRevisionQuery);
                    self.cmd.deadline.start(now_ms, STANDARD_TIMEOUT_MS);
                }
            }
            Some(SubState::InitAwaitSessionResponse) => {
                if parse::parse_solitary_digit(line).is_some() {
                    at_line(&mut self.scratch, "CGMR");
                    self.serial.send(self.scratch.as_bytes());
                    self.cmd.sub_state = Some(SubState::InitRevisionQuery);
                    self.cmd.deadline.start(now_ms, STANDARD_TIMEOUT_MS);
                }
            }
            Some(SubState::InitRevisionQuery) | Some(SubState::InitAwaitRevision) => {
                if let Some(rest) = parse::match_header(line, b"Call Processor Version: ") {
                    self.software_version.clear();
                    if let Ok(s) = core::str::from_utf8(rest) {
                        let trimmed = s.trim();
                        let take = trimmed.len().min(self.software_version.capacity());
                        let _ = self.software_version.push_str(&trimmed[..take]);
                    }
                    self.succeed();
                }
                // filler bytes that don't match any header are simply
                // discarded by the line accumulator.
            }

            Some(SubState::TxBinAwaitReady) => {
                if parse::is_ready_line(line) {
                    let frame = self.pending.frame_bytes();
                    self.serial.send(&frame);
                    self.cmd.sub_state = Some(SubState::TxBinAwaitZero);
                    self.cmd.deadline.start(now_ms, STANDARD_TIMEOUT_MS);
                } else if let Some(code) = parse::parse_solitary_digit(line) {
                    let kind = match code {
                        1 => ErrorKind::TxBinTimeout,
                        2 => ErrorKind::TxBinBadChecksum,
                        _ => ErrorKind::TxBinBadSize,
                    };
                    self.fail(kind);
                }
            }
            Some(SubState::TxBinAwaitZero) | Some(SubState::TxTextAwaitResult) => {
                match parse::parse_solitary_digit(line) {
                    Some(0) => {
                        at_crlf(&mut self.scratch, "+SBDIX");
                        self.serial.send(self.scratch.as_bytes());
                        self.cmd.sub_state = Some(if self.cmd.sub_state == Some(SubState::TxBinAwaitZero) {
                            SubState::TxBinAwaitSessionResponse
                        } else {
                            SubState::TxTextAwaitSessionResponse
                        });
                        self.cmd.deadline.start(now_ms, self.satellite_timeout_ms);
                    }
                    Some(_) => self.fail(ErrorKind::Error),
                    None => {}
                }
            }
            Some(SubState::TxBinAwaitSessionResponse)
            | Some(SubState::MboxAwaitSessionResponse)
            | Some(SubState::TxTextAwaitSessionResponse) => {
                let trailing = match self.cmd.sub_state {
                    Some(SubState::MboxAwaitSessionResponse) => SubState::MboxAwaitTrailingZero,
                    Some(SubState::TxTextAwaitSessionResponse) => SubState::TxTextAwaitTrailingZero,
                    _ => SubState::TxBinAwaitTrailingZero,
                };
                if let Some(r) = parse::parse_sbdix(line) {
                    if ErrorKind::sbdix_mo_is_success(r.mo) {
                        self.info.record_session_response(
                            r.momsn,
                            r.mtmsn.max(0) as u32,
                            r.mt_len,
                            r.queued,
                        );
                        self.cmd.last_error = ErrorKind::None;
                    } else if let Some(kind) = ErrorKind::from_sbdix_mo(r.mo) {
                        self.cmd.last_error = kind;
                    }
                    self.cmd.sub_state = Some(trailing);
                } else if parse::parse_solitary_digit(line).is_some() {
                    if self.cmd.last_error == ErrorKind::None {
                        self.succeed();
                    } else {
                        let kind = self.cmd.last_error;
                        self.fail(kind);
                    }
                }
            }
            Some(SubState::TxBinAwaitTrailingZero)
            | Some(SubState::MboxAwaitTrailingZero)
            | Some(SubState::TxTextAwaitTrailingZero) => {
                if self.cmd.last_error == ErrorKind::None {
                    self.succeed();
                } else {
                    let kind = self.cmd.last_error;
                    self.fail(kind);
                }
            }

            Some(SubState::MboxAwaitZero) => {
                if parse::parse_solitary_digit(line) == Some(0) {
                    at_crlf(&mut self.scratch, "+SBDIX");
                    self.serial.send(self.scratch.as_bytes());
                    self.cmd.sub_state = Some(SubState::MboxAwaitSessionResponse);
                    self.cmd.deadline.start(now_ms, self.satellite_timeout_ms);
                } else {
                    self.fail(ErrorKind::ClearModemBufferError);
                }
            }

            Some(SubState::AwaitSingleResponse(which)) => self.on_single_exchange_line(which, line),

            Some(SubState::CisAwaitSimpleAck(op)) => self.on_cis_simple_ack(op, line),
            Some(SubState::CisVersionCheckAwait) | Some(SubState::CisReloadFlashAwaitVersionCheck) => {
                if line == parse::CIS_VERSION_LITERAL {
                    if self.cmd.sub_state == Some(SubState::CisVersionCheckAwait) {
                        self.succeed();
                    } else {
                        self.cmd.sub_state = Some(SubState::CisReloadFlashUploadingLine);
                        self.serial.send(b"reload flash");
                        self.cmd.deadline.start(now_ms, CIS_TIMEOUT_DEFAULT_MS);
                    }
                }
            }
            _ => {
                // Unexpected response in a state that doesn't read lines;
                // spec §9 routes this to an explicit default "unexpected
                // response" arm, handled by the session layer observing
                // `Failed` with `ErrorKind::Error`.
                self.fail(ErrorKind::Error);
            }
        }
    }

    fn restart_init(&mut self, now_ms: u32) {
        at_line(&mut self.scratch, "SBDMTA=0");
        self.serial.send(self.scratch.as_bytes());
        self.cmd.sub_state = Some(SubState::InitMtAlertConfig);
        self.cmd.deadline.start(now_ms, STANDARD_TIMEOUT_MS);
    }

    fn on_single_exchange_line(&mut self, which: SingleExchange, line: &[u8]) {
        match which {
            SingleExchange::Csq => {
                if let Some(r) = parse::parse_csqf(line) {
                    if r.n == 0 {
                        self.info.set_signal_strength(0);
                        self.fail(ErrorKind::CsqZero);
                    } else {
                        self.info.set_signal_strength(r.n as i8);
                        self.succeed();
                    }
                } else if parse::parse_solitary_digit(line) == Some(4) {
                    self.fail(ErrorKind::CsqError);
                }
            }
            SingleExchange::Creg => {
                if let Some(r) = parse::parse_creg(line) {
                    match r.status {
                        0 => self.fail(ErrorKind::NotRegistered),
                        1 => {
                            self.cmd.last_error = ErrorKind::RegisteredHome;
                            self.succeed();
                        }
                        2 => {
                            self.cmd.last_error = ErrorKind::Searching;
                            self.succeed();
                        }
                        3 => {
                            self.cmd.last_error = ErrorKind::Denied;
                            self.succeed();
                        }
                        4 => {
                            self.cmd.last_error = ErrorKind::Unknown;
                            self.succeed();
                        }
                        _ => {
                            self.cmd.last_error = ErrorKind::RegisteredRoaming;
                            self.succeed();
                        }
                    }
                }
            }
            SingleExchange::Sbdsx => {
                if let Some(r) = parse::parse_sbdsx(line) {
                    self.info.record_gateway_response(r.momsn, r.mtmsn, r.queued);
                    self.info.set_ring_alert(r.ra != 0);
                    if r.ra != 0 || self.info.queue_depth() != 0 || r.queued > 0 {
                        self.cmd.last_error = ErrorKind::GatewayHasMail;
                    } else {
                        self.cmd.last_error = ErrorKind::GatewayNoMail;
                    }
                } else if parse::parse_solitary_digit(line).is_some() {
                    if self.cmd.last_error == ErrorKind::GatewayHasMail {
                        self.succeed();
                    } else {
                        self.fail(ErrorKind::None); // quiet, not logged as timed-out
                    }
                }
            }
            SingleExchange::Clcc => {
                if let Some(r) = parse::parse_clcc(line) {
                    match r.code {
                        0 => {
                            self.info.set_call_status(CallStatus::Active);
                            self.cmd.last_error = ErrorKind::Active;
                            self.succeed();
                        }
                        1 => {
                            self.info.set_call_status(CallStatus::Held);
                            self.cmd.last_error = ErrorKind::Held;
                            self.succeed();
                        }
                        2 => {
                            self.info.set_call_status(CallStatus::Dialing);
                            self.fail(ErrorKind::Dialing);
                        }
                        3 => {
                            self.info.set_call_status(CallStatus::Incoming);
                            self.cmd.last_error = ErrorKind::Incoming;
                            self.succeed();
                        }
                        4 => {
                            self.info.set_call_status(CallStatus::Waiting);
                            self.cmd.last_error = ErrorKind::Waiting;
                            self.succeed();
                        }
                        _ => {
                            self.info.set_call_status(CallStatus::Idle);
                            self.cmd.last_error = ErrorKind::Idle;
                            self.succeed();
                        }
                    }
                }
            }
            SingleExchange::Chup => match parse::parse_solitary_digit(line) {
                Some(0) => self.succeed(),
                Some(_) => self.fail(ErrorKind::Error),
                None => {}
            },
        }
    }

    fn on_cis_simple_ack(&mut self, op: CisSimpleOp, line: &[u8]) {
        let on_off = |suffix: &[u8]| -> Option<bool> {
            if line.ends_with(b"On") {
                Some(true)
            } else if line.ends_with(b"Off") {
                Some(false)
            } else {
                let _ = suffix;
                None
            }
        };
        match op {
            CisSimpleOp::RingerOn | CisSimpleOp::RingerOff | CisSimpleOp::RingerStatus => {
                if let Some(on) = on_off(b"Ringer") {
                    self.info.set_ringer_on(on);
                    self.cmd.last_error = if on {
                        ErrorKind::CisRingerOn
                    } else {
                        ErrorKind::CisRingerOff
                    };
                    self.succeed();
                }
            }
            CisSimpleOp::Relay1On | CisSimpleOp::Relay1Off | CisSimpleOp::Relay1Status => {
                if let Some(on) = on_off(b"Relay[0]") {
                    self.info.set_relay_on(1, on);
                    self.cmd.last_error = if on {
                        ErrorKind::CisRelay1On
                    } else {
                        ErrorKind::CisRelay1Off
                    };
                    self.succeed();
                }
            }
            CisSimpleOp::Relay2On | CisSimpleOp::Relay2Off | CisSimpleOp::Relay2Status => {
                if let Some(on) = on_off(b"Relay[1]") {
                    self.info.set_relay_on(2, on);
                    self.cmd.last_error = if on {
                        ErrorKind::CisRelay2On
                    } else {
                        ErrorKind::CisRelay2Off
                    };
                    self.succeed();
                }
            }
            CisSimpleOp::Reset => self.succeed(),
        }
    }
}

/// Staging area for an outgoing binary frame between `send_buffer` queuing
/// the `SBDWB=` command and the `READY` ack that triggers the actual byte
/// stream (spec §4.2 point 2).
struct PendingTx<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> PendingTx<N> {
    const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    fn from_slice(payload: &[u8]) -> Self {
        let mut s = Self::new();
        s.buf[..payload.len()].copy_from_slice(payload);
        s.len = payload.len();
        s
    }

    /// Payload bytes followed by the big-endian additive checksum (spec
    /// §4.2 point 2). The length itself was already sent in the `SBDWB=`
    /// command line.
    fn frame_bytes(&self) -> heapless::Vec<u8, N> {
        let payload = &self.buf[..self.len];
        let cksum = parse::additive_checksum(payload);
        let mut out = heapless::Vec::new();
        for &b in payload {
            let _ = out.push(b);
        }
        let _ = out.push((cksum >> 8) as u8);
        let _ = out.push((cksum & 0xFF) as u8);
        out
    }
}
