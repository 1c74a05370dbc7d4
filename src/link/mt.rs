// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MT message-type dispatch (spec §4.2 "File write for received MT", §6
//! "MT dispatch by message type").
//!
//! spec §9's Open Questions call out that the original dispatcher walked a
//! single un-reset counter variable across overlapping numeric ranges, and
//! says a faithful port should reproduce the *mapping*, not that
//! arithmetic. `original_source/` kept no files for this system (see
//! `DESIGN.md`), so the concrete byte ranges below are this crate's own
//! table, built to match the *shape* spec §6 describes (a low sentinel
//! block with immediate side effects, a fixed-width root bucket, and four
//! device buckets each stepping in groups of 0x20 through
//! no-subdir/inbox/outbox/sent) rather than a guess at the original's exact
//! numbers.

/// Device directories an MT message can be routed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// The `0x0700..=0x071F` root bucket — no subdirectory stepping.
    Root,
    Modem,
    /// `COPY_PORT3`-tagged range: every routed message here is also copied
    /// to port 3's subdirectory (spec §6).
    Port2,
    Ela,
    Rules,
    SystemLogger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subdir {
    NoSubdir,
    Inbox,
    Outbox,
    Sent,
}

/// Sentinel message types that trigger an immediate side effect instead of
/// a saved file (spec §4.2, §6). All of them answer back with a
/// command-ack message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    RemoteReset,
    RemoteResetAlternate,
    RemoteAckAck,
    ConfigDownloadRequest,
    PowerCycleModem,
    FormatCard,
    PowerCycleCis,
    PurgeRulesImage,
    DeleteRulesFile,
    DownloadCisConfig,
    SystemLogSnapshot,
    ModemLogSnapshot,
    VersionSnapshot,
    GpsLocationSnapshot,
    Reset573Bus,
    GetLogsNow,
    GetLogsAfterFdr,
}

const SENTINEL_BASE: u16 = 0x0F00;
const SENTINELS: [Sentinel; 17] = [
    Sentinel::RemoteReset,
    Sentinel::RemoteResetAlternate,
    Sentinel::RemoteAckAck,
    Sentinel::ConfigDownloadRequest,
    Sentinel::PowerCycleModem,
    Sentinel::FormatCard,
    Sentinel::PowerCycleCis,
    Sentinel::PurgeRulesImage,
    Sentinel::DeleteRulesFile,
    Sentinel::DownloadCisConfig,
    Sentinel::SystemLogSnapshot,
    Sentinel::ModemLogSnapshot,
    Sentinel::VersionSnapshot,
    Sentinel::GpsLocationSnapshot,
    Sentinel::Reset573Bus,
    Sentinel::GetLogsNow,
    Sentinel::GetLogsAfterFdr,
];

const ROOT_RANGE: core::ops::RangeInclusive<u16> = 0x0700..=0x071F;

struct DeviceBucket {
    device: Device,
    base: u16,
    copy_port3: bool,
}

const BUCKET_WIDTH: u16 = 0x20;

const DEVICE_BUCKETS: [DeviceBucket; 5] = [
    DeviceBucket {
        device: Device::Modem,
        base: 0x0000,
        copy_port3: false,
    },
    DeviceBucket {
        device: Device::Port2,
        base: 0x4220,
        copy_port3: true,
    },
    DeviceBucket {
        device: Device::Ela,
        base: 0x0800,
        copy_port3: false,
    },
    DeviceBucket {
        device: Device::Rules,
        base: 0x1000,
        copy_port3: false,
    },
    DeviceBucket {
        device: Device::SystemLogger,
        base: 0x0C00,
        copy_port3: false,
    },
];

/// Where a routed (non-sentinel) MT message lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub device: Device,
    pub subdir: Subdir,
    pub copy_port3: bool,
}

/// Outcome of classifying the message-type tag at offset 2 of an MT
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Sentinel(Sentinel),
    Routed(Route),
    /// A type that matches no known sentinel or bucket. Spec doesn't define
    /// this case explicitly; treated as a routing failure by the caller.
    Unrecognized,
}

/// Classifies the 16-bit message-type tag found at offset 2 of an MT
/// payload.
pub fn classify(msg_type: u16) -> Classification {
    if let Some(idx) = (msg_type.checked_sub(SENTINEL_BASE))
        .filter(|&offset| (offset as usize) < SENTINELS.len())
    {
        return Classification::Sentinel(SENTINELS[idx as usize]);
    }
    if ROOT_RANGE.contains(&msg_type) {
        return Classification::Routed(Route {
            device: Device::Root,
            subdir: Subdir::NoSubdir,
            copy_port3: false,
        });
    }
    for bucket in &DEVICE_BUCKETS {
        let span_end = bucket.base.saturating_add(4 * BUCKET_WIDTH);
        if msg_type >= bucket.base && msg_type < span_end {
            let step = (msg_type - bucket.base) / BUCKET_WIDTH;
            let subdir = match step {
                0 => Subdir::NoSubdir,
                1 => Subdir::Inbox,
                2 => Subdir::Outbox,
                _ => Subdir::Sent,
            };
            return Classification::Routed(Route {
                device: bucket.device,
                subdir,
                copy_port3: bucket.copy_port3,
            });
        }
    }
    Classification::Unrecognized
}
