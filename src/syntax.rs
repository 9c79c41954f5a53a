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

use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

/// A parsed client command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// (HELO|EHLO) origin-host ignored...
    Helo(String, String),
    /// MAIL FROM:<return-path>, with exactly one mailbox extracted.
    MailFrom(String),
    /// RCPT TO:<forward-path>, with at least one mailbox extracted.
    Recipient(Vec<String>),
    /// DATA
    Data,
    /// RSET
    Reset,
    /// VRFY ignored...
    Verify,
    /// EXPN ignored...
    Expand,
    /// HELP ignored...
    Help,
    /// NOOP ignored...
    Noop,
    /// QUIT
    Quit,
}

/// The verbs the server recognizes, used to key per-verb overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Helo,
    Ehlo,
    Mail,
    Rcpt,
    Data,
    Rset,
    Vrfy,
    Expn,
    Help,
    Noop,
    Quit,
}

impl Command {
    pub fn verb(&self) -> Verb {
        match *self {
            Command::Helo(ref command, _) => {
                if command.eq_ignore_ascii_case("EHLO") {
                    Verb::Ehlo
                } else {
                    Verb::Helo
                }
            },
            Command::MailFrom(..) => Verb::Mail,
            Command::Recipient(..) => Verb::Rcpt,
            Command::Data => Verb::Data,
            Command::Reset => Verb::Rset,
            Command::Verify => Verb::Vrfy,
            Command::Expand => Verb::Expn,
            Command::Help => Verb::Help,
            Command::Noop => Verb::Noop,
            Command::Quit => Verb::Quit,
        }
    }
}

/// Why a command line failed to parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BadCommand {
    /// The verb is not in the recognized set.
    Unknown,
    /// A recognized verb with unusable arguments; the text is the usage
    /// string for the 501 reply.
    Usage(&'static str),
}

pub const MAIL_USAGE: &str = "MAIL FROM: mail addr";
pub const RCPT_USAGE: &str = "RCPT TO: mail addr";

lazy_static! {
    static ref RX_MAIL: Regex =
        Regex::new(r"^(?i)MAIL\s+FROM:\s*(.*)$").unwrap();
    static ref RX_RCPT: Regex = Regex::new(r"^(?i)RCPT\s+TO:\s*(.*)$").unwrap();
    static ref RX_ANGLE_ADDR: Regex = Regex::new("<([^<>]*)>").unwrap();
    static ref RX_BARE_ADDR: Regex =
        Regex::new(r#"[^\s,;<>"]+@[^\s,;<>"]+"#).unwrap();
}

impl FromStr for Command {
    type Err = BadCommand;

    fn from_str(s: &str) -> Result<Self, BadCommand> {
        let mut tokens = s.split_whitespace();
        let verb = tokens.next().unwrap_or("").to_ascii_uppercase();
        match verb.as_str() {
            "HELO" | "EHLO" => Ok(Command::Helo(
                verb.clone(),
                tokens.next().unwrap_or("").to_owned(),
            )),
            "MAIL" => parse_mail(s),
            "RCPT" => parse_rcpt(s),
            "DATA" => Ok(Command::Data),
            "RSET" => Ok(Command::Reset),
            "VRFY" => Ok(Command::Verify),
            "EXPN" => Ok(Command::Expand),
            "HELP" => Ok(Command::Help),
            "NOOP" => Ok(Command::Noop),
            "QUIT" => Ok(Command::Quit),
            _ => Err(BadCommand::Unknown),
        }
    }
}

fn parse_mail(s: &str) -> Result<Command, BadCommand> {
    let cap = RX_MAIL.captures(s).ok_or(BadCommand::Usage(MAIL_USAGE))?;
    let mut mailboxes = extract_mailboxes(cap.get(1).unwrap().as_str());
    if 1 == mailboxes.len() {
        Ok(Command::MailFrom(mailboxes.remove(0)))
    } else {
        Err(BadCommand::Usage(MAIL_USAGE))
    }
}

fn parse_rcpt(s: &str) -> Result<Command, BadCommand> {
    let cap = RX_RCPT.captures(s).ok_or(BadCommand::Usage(RCPT_USAGE))?;
    let mailboxes = extract_mailboxes(cap.get(1).unwrap().as_str());
    if mailboxes.is_empty() {
        Err(BadCommand::Usage(RCPT_USAGE))
    } else {
        Ok(Command::Recipient(mailboxes))
    }
}

/// Extracts the bare mailboxes from an RFC-5322 address or address-list.
///
/// Handles `Display Name <user@domain>`, `<user@domain>`, and bare
/// `user@domain` forms, separated by commas. Quoted local parts containing
/// `@` or `,` are not supported.
pub fn extract_mailboxes(s: &str) -> Vec<String> {
    let mut mailboxes = Vec::new();
    for part in s.split(',') {
        if let Some(cap) = RX_ANGLE_ADDR.captures(part) {
            let addr = cap.get(1).unwrap().as_str().trim();
            if !addr.is_empty() {
                mailboxes.push(addr.to_owned());
            }
        } else if let Some(found) = RX_BARE_ADDR.find(part) {
            mailboxes.push(found.as_str().to_owned());
        }
    }

    mailboxes
}

/// Returns the domain part of `mailbox`: the substring after the final `@`.
pub fn domain_of(mailbox: &str) -> Option<&str> {
    mailbox
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
}
