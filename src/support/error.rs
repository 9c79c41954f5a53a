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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection closed by peer")]
    UnexpectedDisconnect,
    #[error("Connection idle timeout expired")]
    IdleTimeout,
    #[error("Line too long")]
    LineTooLong,
    #[error("Malformed reply line: {0:?}")]
    BadReplyLine(String),
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("No MX record for domain {0}")]
    NoMxRecords(String),
    #[error("DNS lookup failed for domain {0}")]
    DnsLookup(String),
    #[error("DNS resolver configuration failed: {0}")]
    DnsConfig(String),
    #[error("Message data exceeds the maximum size")]
    DataTooLarge,
    #[error("Invalid email address {0:?}")]
    InvalidAddress(String),
    #[error("No recipients given")]
    NoRecipients,
    #[error("Server is already running")]
    AlreadyRunning,
    #[error("Cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] io::Error),
}
