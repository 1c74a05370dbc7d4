// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared test double plumbing for the integration suites, mirroring the
//! `MockUart`/`TestRig` pattern colocated with `Session`'s own unit tests,
//! but built only against the crate's public API since these files live
//! outside `src/`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use heapless::String as HString;

use isu_driver::collaborators::{
    CisImageSource, FileHandle, Filesystem, ModemLogSink, NvramStore, PowerManager, RealTimeClock,
    SystemLogSink,
};
use isu_driver::link::{Device, Subdir};
use isu_driver::serial::{ConfigError, SerialConfig, UartHardware};
use isu_driver::timer::{TimeSource, VirtualClock};
use isu_driver::Session;

#[derive(Default)]
pub struct MockUart {
    pub rx_fifo: Rc<RefCell<VecDeque<u8>>>,
    pub dsr: Rc<RefCell<bool>>,
    pub ri: Rc<RefCell<bool>>,
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

pub struct MockClock(pub VirtualClock);

impl TimeSource for MockClock {
    fn now_ms(&self) -> u32 {
        self.0.now_ms()
    }
}

pub struct MockRtc;
impl RealTimeClock for MockRtc {
    fn now_secs(&self) -> u32 {
        0
    }
}

/// Serves at most one outbox file, then reports the outbox empty. Records
/// what happened to the file so tests can assert on it.
#[derive(Default)]
pub struct MockFs {
    pub pending: Option<(FileHandle, Vec<u8>)>,
    pub deleted: Rc<RefCell<Vec<String>>>,
    pub sent: Rc<RefCell<Vec<String>>>,
    pub errored: Rc<RefCell<Vec<String>>>,
    pub received: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl Filesystem for MockFs {
    fn next_outbox_file(&mut self) -> Option<FileHandle> {
        self.pending.as_ref().map(|(f, _)| f.clone())
    }
    fn read_exact(&mut self, file: &FileHandle, offset: usize, buf: &mut [u8]) -> Result<(), ()> {
        let (_, content) = self.pending.as_ref().ok_or(())?;
        if file.len != content.len() || offset + buf.len() > content.len() {
            return Err(());
        }
        buf.copy_from_slice(&content[offset..offset + buf.len()]);
        Ok(())
    }
    fn delete(&mut self, file: &FileHandle) -> Result<(), ()> {
        self.deleted.borrow_mut().push(file.name.as_str().into());
        self.pending = None;
        Ok(())
    }
    fn move_to_sent(&mut self, file: &FileHandle) -> Result<(), ()> {
        self.sent.borrow_mut().push(file.name.as_str().into());
        self.pending = None;
        Ok(())
    }
    fn move_to_error(&mut self, file: &FileHandle) -> Result<(), ()> {
        self.errored.borrow_mut().push(file.name.as_str().into());
        self.pending = None;
        Ok(())
    }
    fn write_received(&mut self, _device: Device, _subdir: Subdir, data: &[u8]) -> Result<(), ()> {
        self.received.borrow_mut().push(data.to_vec());
        Ok(())
    }
    fn write_to_error_dir(&mut self, data: &[u8]) -> Result<(), ()> {
        self.received.borrow_mut().push(data.to_vec());
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPower {
    pub modem_cycles: Rc<RefCell<u32>>,
    pub cis_cycles: Rc<RefCell<u32>>,
}
impl PowerManager for MockPower {
    fn power_cycle_modem(&mut self) {
        *self.modem_cycles.borrow_mut() += 1;
    }
    fn power_cycle_cis(&mut self) {
        *self.cis_cycles.borrow_mut() += 1;
    }
}

pub struct MockModemLog;
impl ModemLogSink for MockModemLog {
    fn append_line(&mut self, _line: &str) {}
}

#[derive(Default)]
pub struct MockSysLog {
    pub lines: Rc<RefCell<Vec<String>>>,
}
impl SystemLogSink for MockSysLog {
    fn record(&mut self, line: &str) {
        self.lines.borrow_mut().push(line.into());
    }
    fn record_hardware_error(&mut self, context: &str) {
        self.lines.borrow_mut().push(context.into());
    }
}

pub struct MockNvram;
impl NvramStore for MockNvram {
    fn read_imei(&self) -> Option<HString<16>> {
        None
    }
    fn write_imei(&mut self, _imei: &str) {}
    fn invalidate_cis_config(&mut self) {}
}

/// Hands out the lines it was constructed with, in order, marking the
/// last one final.
#[derive(Default)]
pub struct MockCisSource {
    pub lines: VecDeque<Vec<u8>>,
}
impl CisImageSource for MockCisSource {
    fn next_line(&mut self, buf: &mut [u8]) -> Option<(usize, bool)> {
        let line = self.lines.pop_front()?;
        let n = line.len().min(buf.len());
        buf[..n].copy_from_slice(&line[..n]);
        Some((n, self.lines.is_empty()))
    }
}

pub struct Rig {
    pub session: Session<MockUart, 340, 512>,
    pub rx_fifo: Rc<RefCell<VecDeque<u8>>>,
    pub dsr: Rc<RefCell<bool>>,
    pub clock: MockClock,
    pub fs: MockFs,
    pub power: MockPower,
    pub sys_log: MockSysLog,
    pub cis_source: MockCisSource,
}

impl Rig {
    pub fn new() -> Self {
        let rx_fifo = Rc::new(RefCell::new(VecDeque::new()));
        let dsr = Rc::new(RefCell::new(false));
        let hw = MockUart {
            rx_fifo: rx_fifo.clone(),
            dsr: dsr.clone(),
            ..Default::default()
        };
        Self {
            session: Session::new(hw),
            rx_fifo,
            dsr,
            clock: MockClock(VirtualClock::new()),
            fs: MockFs::default(),
            power: MockPower::default(),
            sys_log: MockSysLog::default(),
            cis_source: MockCisSource::default(),
        }
    }

    pub fn now(&self) -> u32 {
        self.clock.now_ms()
    }

    /// Delivers raw bytes (no terminator appended) into the hardware FIFO
    /// and drains them into the link's software queue.
    pub fn feed_bytes(&mut self, bytes: &[u8]) {
        self.rx_fifo.borrow_mut().extend(bytes.iter().copied());
        self.session.link_mut().serial_mut().on_uart_interrupt();
    }

    /// Convenience for CRLF-terminated text responses.
    pub fn feed_line(&mut self, line: &[u8]) {
        self.rx_fifo.borrow_mut().extend(line.iter().copied());
        self.rx_fifo.borrow_mut().push_back(b'\r');
        self.session.link_mut().serial_mut().on_uart_interrupt();
    }

    pub fn tick(&mut self) {
        self.session.tick(
            &self.clock,
            &MockRtc,
            &mut self.fs,
            &mut self.power,
            &mut MockModemLog,
            &mut self.sys_log,
            &mut MockNvram,
            &mut self.cis_source,
        );
    }
}
