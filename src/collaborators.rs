// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! External collaborator seams (spec §1 "out of scope", §6, §9 "File I/O").
//!
//! None of these are implemented here — the filesystem, the real-time
//! clock/GPS source, the power manager, the rules/event engine, the modem
//! log file writer and the system log all live outside this crate. The
//! traits below are the entire surface this crate needs from them.

use heapless::String;

/// One file as seen from the outbox/inbox/sent/error directory scheme of
/// spec §6. `name` carries the leading byte the keep-list priority
/// matching in §4.3 looks at.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub name: String<64>,
    pub len: usize,
}

/// The removable-storage filesystem and its PCMCIA path helpers (spec §1).
/// Every call is expected to open, do its I/O, and close — no long-lived
/// handles are kept across ticks (spec §9 "File I/O").
pub trait Filesystem {
    /// Returns the next file in the modem device's outbox, in ascending
    /// filename order, without removing it (spec §6 "Outbound report-file
    /// rules").
    fn next_outbox_file(&mut self) -> Option<FileHandle>;

    fn read_exact(&mut self, file: &FileHandle, offset: usize, buf: &mut [u8]) -> Result<(), ()>;

    fn delete(&mut self, file: &FileHandle) -> Result<(), ()>;
    /// Moves a file into the device's `sent` subdirectory; callers fall
    /// back to [`Self::delete`] on failure (spec §4.3 "post-command
    /// cleanup").
    fn move_to_sent(&mut self, file: &FileHandle) -> Result<(), ()>;
    fn move_to_error(&mut self, file: &FileHandle) -> Result<(), ()>;

    /// Writes a freshly-received MT payload to `device`/`subdir`,
    /// generating a filename. A `None` subdir (sentinel dispatch, §6)
    /// never reaches this — those are handled as immediate actions.
    fn write_received(
        &mut self,
        device: crate::link::mt::Device,
        subdir: crate::link::mt::Subdir,
        data: &[u8],
    ) -> Result<(), ()>;

    /// Relocates a failed receive (bad length/checksum) to the error
    /// subdirectory instead of inbox (spec §3 invariant 4).
    fn write_to_error_dir(&mut self, data: &[u8]) -> Result<(), ()>;
}

/// Real-time clock / GPS time source (spec §1 "out of scope"). Seconds
/// since an arbitrary fixed epoch, used only for the event log's
/// timestamps and the binary snapshot's `requested_time`.
pub trait RealTimeClock {
    fn now_secs(&self) -> u32;
}

/// Power cycling of the modem and CIS boards (spec §1 "out of scope").
pub trait PowerManager {
    fn power_cycle_modem(&mut self);
    fn power_cycle_cis(&mut self);
}

/// The modem log file writer (spec §1 "covered only at interface level").
/// Implementors open, append one line, and close on every call.
pub trait ModemLogSink {
    fn append_line(&mut self, line: &str);
}

/// The system log (spec §1 "out of scope").
pub trait SystemLogSink {
    fn record(&mut self, line: &str);
    /// `sbd-blocked` additionally escalates here as a hardware error
    /// (spec §7 "Fatal conditions").
    fn record_hardware_error(&mut self, context: &str);
}

/// EEPROM mirror of the IMEI, and the CIS-configuration invalidation
/// marker written on a failed `program_cis` (spec §6 "Persistent state").
pub trait NvramStore {
    fn read_imei(&self) -> Option<String<16>>;
    fn write_imei(&mut self, imei: &str);
    fn invalidate_cis_config(&mut self);
}

/// Supplies the CIS firmware image a `program_cis` reload-flash upload
/// sends line by line (spec §4.2 point 11, §8 scenario 5's "supplied next
/// line function"). The rules/event engine that actually owns CIS images
/// is itself out of scope (spec §1).
pub trait CisImageSource {
    /// Writes the next line into `buf`, returning the number of bytes
    /// written and whether it is the final line of the image. `None` means
    /// no line is buffered yet this tick; the session layer retries later.
    fn next_line(&mut self, buf: &mut [u8]) -> Option<(usize, bool)>;
}
