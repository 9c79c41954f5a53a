//-
// Copyright (c) 2026, the Martlet developers
//
// This file is part of Martlet.
//
// Martlet is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Martlet is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the GNU  General Public  License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Martlet. If not, see <http://www.gnu.org/licenses/>.

//! Response codes from RFC 5321.
//!
//! The module is designed to be wildcard-imported; the `pc` submodule gives
//! short access to the enum values.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum PrimaryCode {
    // In the order RFC 5321 defines them
    CommandSyntaxError = 500,
    ParameterSyntaxError = 501,
    CommandNotImplemented = 502,
    BadSequenceOfCommands = 503,
    HelpMessage = 214,
    ServiceReady = 220,
    ServiceClosing = 221,
    ServiceNotAvailableClosing = 421,
    Ok = 250,
    CannotVerify = 252,
    ActionNotTakenTemporary = 450,
    ActionNotTakenPermanent = 550,
    ExceededStorageAllocation = 552,
    StartMailInput = 354,
    TransactionFailed = 554,
}

pub mod pc {
    pub use super::PrimaryCode::*;
}

impl From<PrimaryCode> for u16 {
    fn from(code: PrimaryCode) -> u16 {
        code as u16
    }
}

/// A complete SMTP reply: the status code of the terminal line and the
/// (possibly multi-line) concatenated text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    pub fn new(code: impl Into<u16>, text: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            text: text.into(),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reply_rendering() {
        assert_eq!(
            "550 No thanks",
            Reply::new(pc::ActionNotTakenPermanent, "No thanks").to_string(),
        );
        assert_eq!("250 OK", Reply::new(250u16, "OK").to_string());
    }
}
