// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Serial port and byte queues (spec §4.1).
//!
//! The UART register setup itself is an external collaborator (spec §1) —
//! [`UartHardware`] is the seam. This module owns the fixed-capacity
//! transmit/receive byte queues, the discrete-line bookkeeping, and the
//! data/programming port mux, and drains/fills the hardware through that
//! trait from both the main loop and [`SerialLink::on_uart_interrupt`].
//!
//! Every mutation reachable from the main loop is bracketed in
//! [`critical_section::free`] so it can never interleave with
//! `on_uart_interrupt`, matching spec §5 "Shared resources".

use crate::queue::ByteQueue;

/// Data bits per UART frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Eight,
    Nine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    OneAndHalf,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    XonXoff,
    RtsCts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    pub bit_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            bit_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::RtsCts,
        }
    }
}

/// Synchronous open() failure — distinct from the per-conversation
/// [`crate::error::ErrorKind`] register, since this is a configuration
/// rejection rather than an outcome of an AT conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// XON/XOFF flow control is unsupported by this link, or another
    /// combination (e.g. reserved data/parity/stop-bit combination) the
    /// hardware can't represent (spec §4.1 "Configuration options").
    BadParameter,
}

/// Which physical endpoint the shared UART is currently wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    /// The modem data port (default).
    Data,
    /// The CIS programming port.
    Programming,
}

/// The hardware/board-level seam this module drives. A real implementation
/// wraps the MCU's UART peripheral and GPIO-backed discrete lines; a test
/// implementation is a software FIFO pair (see `tests/`).
pub trait UartHardware {
    fn configure(&mut self, config: SerialConfig) -> Result<(), ConfigError>;

    /// Byte waiting in the hardware receive FIFO.
    fn hw_rx_ready(&self) -> bool;
    /// Reads one byte out of the hardware receive FIFO. Only called when
    /// `hw_rx_ready()` is true.
    fn hw_rx_read(&mut self) -> u8;
    /// Hardware transmit holding register is empty and can accept a byte.
    fn hw_tx_ready(&self) -> bool;
    fn hw_tx_write(&mut self, byte: u8);
    /// Enables or disables the "transmit register empty" interrupt source.
    fn set_tx_interrupt_enabled(&mut self, enabled: bool);

    fn ri(&self) -> bool;
    fn dcd(&self) -> bool;
    fn dsr(&self) -> bool;
    fn cts(&self) -> bool;
    fn rts(&self) -> bool;
    fn dtr(&self) -> bool;
    fn cis_pwr(&self) -> bool;

    fn set_rts(&mut self, on: bool);
    fn set_dtr(&mut self, on: bool);
    /// Drives the TX line directly (used to hold it idle/break outside of
    /// normal framed transmission).
    fn set_tx(&mut self, on: bool);
    fn set_cis_pwr(&mut self, on: bool);
    /// `true` selects the CIS programming port, `false` the modem data port.
    fn set_port_mux(&mut self, programming: bool);
}

/// Serial port plus its fixed-capacity transmit/receive byte queues.
///
/// `TXN`/`RXN` should exceed the largest single modem response; spec §3
/// recommends 4 KiB on the receive side.
pub struct SerialLink<H: UartHardware, const TXN: usize, const RXN: usize> {
    hw: H,
    tx: ByteQueue<TXN>,
    rx: ByteQueue<RXN>,
    port: Port,
}

impl<H: UartHardware, const TXN: usize, const RXN: usize> SerialLink<H, TXN, RXN> {
    pub const fn new(hw: H) -> Self {
        Self {
            hw,
            tx: ByteQueue::new(),
            rx: ByteQueue::new(),
            port: Port::Data,
        }
    }

    pub fn open(&mut self, config: SerialConfig) -> Result<(), ConfigError> {
        if config.flow_control == FlowControl::XonXoff {
            return Err(ConfigError::BadParameter);
        }
        self.hw.configure(config)
    }

    /// Queues `bytes` for transmission. Bytes queued by one call stay
    /// contiguous on the wire (spec §5 "Ordering guarantees").
    pub fn send(&mut self, bytes: &[u8]) {
        critical_section::free(|_| {
            self.tx.push_slice_overwrite(bytes);
        });
        self.hw.set_tx_interrupt_enabled(true);
    }

    pub fn recv_byte(&mut self) -> Option<u8> {
        critical_section::free(|_| self.rx.pop())
    }

    pub fn flush_tx(&mut self) {
        critical_section::free(|_| self.tx.clear());
    }

    pub fn flush_rx(&mut self) {
        critical_section::free(|_| self.rx.clear());
    }

    /// Surfaced receive-overflow flag (spec §4.1 "Failure semantics").
    pub fn rx_overflowed(&mut self) -> bool {
        critical_section::free(|_| self.rx.take_overflow())
    }

    pub fn ri(&self) -> bool {
        self.hw.ri()
    }
    pub fn dcd(&self) -> bool {
        self.hw.dcd()
    }
    pub fn dsr(&self) -> bool {
        self.hw.dsr()
    }
    pub fn cts(&self) -> bool {
        self.hw.cts()
    }
    pub fn rts(&self) -> bool {
        self.hw.rts()
    }
    pub fn dtr(&self) -> bool {
        self.hw.dtr()
    }
    pub fn cis_pwr(&self) -> bool {
        self.hw.cis_pwr()
    }

    pub fn set_rts(&mut self, on: bool) {
        self.hw.set_rts(on);
    }
    pub fn set_dtr(&mut self, on: bool) {
        self.hw.set_dtr(on);
    }
    pub fn set_tx(&mut self, on: bool) {
        self.hw.set_tx(on);
    }
    pub fn set_cis_pwr(&mut self, on: bool) {
        self.hw.set_cis_pwr(on);
    }

    pub fn port(&self) -> Port {
        self.port
    }

    /// Switches the shared UART between the modem data port and the CIS
    /// programming port, flushing both queues (spec §4.1 "Port mux" — stale
    /// bytes from one endpoint must never be read as a response from the
    /// other).
    pub fn set_port(&mut self, port: Port) {
        self.flush_tx();
        self.flush_rx();
        self.port = port;
        self.hw.set_port_mux(matches!(port, Port::Programming));
    }

    /// Drains the hardware receive FIFO and, if transmit data is pending
    /// and idle time is available, shifts one byte out. Call this from the
    /// board's UART interrupt handler (spec §4.1 "Concurrency").
    pub fn on_uart_interrupt(&mut self) {
        while self.hw.hw_rx_ready() {
            let byte = self.hw.hw_rx_read();
            self.rx.push_overwrite(byte);
        }
        if !self.tx.is_empty() && self.hw.hw_tx_ready() && !self.hw.hw_rx_ready() {
            if let Some(byte) = self.tx.pop() {
                self.hw.hw_tx_write(byte);
            }
        }
        if self.tx.is_empty() {
            self.hw.set_tx_interrupt_enabled(false);
        }
    }
}
