// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The on-demand binary snapshot message (spec §4.4
//! `generate_log_message(requested_time)`).
//!
//! Layout: `msg_type:u16, total_len:u16, requested_time:u32, crc:u16,
//! entry_count:u8`, followed by `entry_count` records of `timestamp:u32,
//! kind_code:u8, count:u16`, all big-endian. The CRC field sits right after
//! the fixed header and covers every byte that follows it (spec.md's
//! wording — "a trailing 16-bit CRC computed over every byte after the CRC
//! field itself" — only parses if the CRC is not literally the last byte;
//! see `DESIGN.md` for this placement decision).

use heapless::Vec;

use super::EventLog;

/// Message-type tag for this snapshot, grouped with the other
/// `SystemLogger` device traffic (spec §10.1's CRC choice lives alongside
/// this constant for the same reason: nothing in spec.md names one).
pub const LOG_SNAPSHOT_MSG_TYPE: u16 = 0x0C00;

const HEADER_LEN: usize = 2 + 2 + 4 + 2 + 1;
const ENTRY_LEN: usize = 4 + 1 + 2;

/// Upper bound on the encoded message for [`DEDUP_RING_LEN`](super::DEDUP_RING_LEN)
/// entries.
pub const MAX_LOG_MESSAGE_LEN: usize = HEADER_LEN + super::DEDUP_RING_LEN * ENTRY_LEN;

fn push_u16(buf: &mut Vec<u8, MAX_LOG_MESSAGE_LEN>, v: u16) {
    let _ = buf.push((v >> 8) as u8);
    let _ = buf.push((v & 0xFF) as u8);
}

fn push_u32(buf: &mut Vec<u8, MAX_LOG_MESSAGE_LEN>, v: u32) {
    let _ = buf.push((v >> 24) as u8);
    let _ = buf.push((v >> 16) as u8);
    let _ = buf.push((v >> 8) as u8);
    let _ = buf.push((v & 0xFF) as u8);
}

/// Builds the binary snapshot of `log`'s current contents (spec §4.4).
pub fn generate_log_message<const N: usize>(
    log: &EventLog<N>,
    requested_time: u32,
) -> Vec<u8, MAX_LOG_MESSAGE_LEN> {
    let mut out: Vec<u8, MAX_LOG_MESSAGE_LEN> = Vec::new();
    let entry_count = log.len() as u8;
    let total_len = (HEADER_LEN + entry_count as usize * ENTRY_LEN) as u16;

    push_u16(&mut out, LOG_SNAPSHOT_MSG_TYPE);
    push_u16(&mut out, total_len);
    push_u32(&mut out, requested_time);
    let crc_pos = out.len();
    push_u16(&mut out, 0); // patched below
    let _ = out.push(entry_count);

    for entry in log.entries() {
        push_u32(&mut out, entry.timestamp);
        let _ = out.push(entry.kind.log_code());
        push_u16(&mut out, entry.count);
    }

    let crc = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM).checksum(&out[crc_pos + 2..]);
    out[crc_pos] = (crc >> 8) as u8;
    out[crc_pos + 1] = (crc & 0xFF) as u8;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn empty_log_still_has_a_valid_crc() {
        let log: EventLog<15> = EventLog::new();
        let msg = generate_log_message(&log, 1_000);
        assert_eq!(msg.len(), HEADER_LEN);
        let crc = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM).checksum(&msg[7..]);
        assert_eq!(((msg[5] as u16) << 8) | msg[6] as u16, crc);
    }

    #[test]
    fn total_len_accounts_for_every_entry() {
        let mut log: EventLog<15> = EventLog::new();
        log.record(1, ErrorKind::RfDrop);
        log.record(2, ErrorKind::CsqError);
        let msg = generate_log_message(&log, 0);
        let total_len = ((msg[2] as u16) << 8) | msg[3] as u16;
        assert_eq!(total_len as usize, HEADER_LEN + 2 * ENTRY_LEN);
        assert_eq!(msg.len(), total_len as usize);
    }
}
