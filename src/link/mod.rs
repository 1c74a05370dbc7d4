// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The AT/CIS command layer (spec §4.2): the state machine driving the
//! serial link, the closed-set response parsers it dispatches to, and the
//! MT message-type routing table.

pub mod commands;
pub mod mt;
pub mod parse;
pub mod state;

pub use commands::{AtLink, CIS_DOWNLOAD_CONFIG_CAP, MAX_RX_FILE_LEN};
pub use mt::{Classification, Device, Route, Sentinel, Subdir};
pub use state::AtState;
