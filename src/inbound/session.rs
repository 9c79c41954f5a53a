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

use std::mem;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codes::*;
use crate::conn::Conn;
use crate::event::{EventBus, Mail, SessionInfo, Verdict, VerbRequest};
use crate::support::{error::Error, log_prefix::LogPrefix};
use crate::syntax::{BadCommand, Command};

/// The per-transaction state assembled by MAIL/RCPT/DATA.
///
/// Distinct from any headers inside the message body. RSET and HELO/EHLO
/// clear the transaction but keep the HELO identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    pub helo: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub data: Vec<u8>,
}

impl Envelope {
    fn reset(&mut self) {
        self.from = None;
        self.to.clear();
        self.data.clear();
    }
}

pub(super) struct Session<S> {
    conn: Conn<S>,
    bus: Arc<EventBus>,
    info: SessionInfo,
    log_prefix: LogPrefix,
    local_host_name: String,
    max_message_size: usize,
    debug: bool,
    env: Envelope,
    quit: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub(super) fn new(
        conn: Conn<S>,
        bus: Arc<EventBus>,
        info: SessionInfo,
        log_prefix: LogPrefix,
        local_host_name: String,
        max_message_size: usize,
        debug: bool,
    ) -> Self {
        Self {
            conn,
            bus,
            info,
            log_prefix,
            local_host_name,
            max_message_size,
            debug,
            env: Envelope::default(),
            quit: false,
        }
    }

    /// Drives the connection until QUIT, disconnect, or a fatal error.
    ///
    /// The returned string is the reason reported through the `disconnect`
    /// event.
    pub(super) async fn run(&mut self) -> String {
        match self.run_inner().await {
            Ok(()) => "quit".to_owned(),
            Err(Error::IdleTimeout) => "timeout".to_owned(),
            Err(Error::UnexpectedDisconnect) => "disconnected".to_owned(),
            Err(e) => e.to_string(),
        }
    }

    pub(super) async fn close(&mut self) {
        self.conn.close().await;
    }

    async fn run_inner(&mut self) -> Result<(), Error> {
        let greeting = format!("{} Ready.", self.local_host_name);
        self.respond(pc::ServiceReady, &greeting).await?;
        self.bus.emit_client(&self.info);

        while !self.quit {
            self.run_command().await?;
        }

        Ok(())
    }

    async fn run_command(&mut self) -> Result<(), Error> {
        let line = match self.conn.read_command().await {
            Ok(line) => line,
            Err(Error::LineTooLong) => {
                warn!("{} Over-long command line", self.log_prefix);
                return self
                    .respond(pc::CommandSyntaxError, "Line too long")
                    .await;
            },
            Err(e) => return Err(e),
        };

        if line.is_empty() {
            return Ok(());
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(BadCommand::Unknown) => {
                info!(
                    "{} Unknown command {:?}",
                    self.log_prefix,
                    truncated(&line),
                );
                return self
                    .respond(pc::CommandSyntaxError, "Learn to type!")
                    .await;
            },
            Err(BadCommand::Usage(usage)) => {
                let usage = format!("Usage: {}", usage);
                return self
                    .respond(pc::ParameterSyntaxError, &usage)
                    .await;
            },
        };

        if let Some(verdict) = self.verb_override(&command) {
            match verdict {
                Ok(Verdict::Continue) => {},
                Ok(Verdict::Reject(reply)) => {
                    return self.conn.write_line(&reply.to_string()).await;
                },
                Err(e) => return self.internal_error(&e).await,
            }
        }

        match command {
            Command::Helo(command, origin) => {
                self.cmd_helo(command, origin).await
            },
            Command::MailFrom(from) => self.cmd_mail_from(from).await,
            Command::Recipient(recipients) => {
                self.cmd_recipient(recipients).await
            },
            Command::Data => self.cmd_data().await,
            Command::Reset => self.cmd_reset().await,
            Command::Verify | Command::Expand => {
                self.respond(pc::CannotVerify, "Nice try.").await
            },
            Command::Help => {
                self.respond(pc::HelpMessage, "No help available.").await
            },
            Command::Noop => self.respond(pc::CannotVerify, "Ok.").await,
            Command::Quit => self.cmd_quit().await,
        }
    }

    /// Runs the registered override for the command's verb, if any.
    fn verb_override(
        &self,
        command: &Command,
    ) -> Option<Result<Verdict, crate::event::HookError>> {
        let hook = self.bus.verb_hook(command.verb())?;
        let request = VerbRequest {
            peer: self.info.peer,
            helo: self.env.helo.as_deref(),
            from: self.env.from.as_deref(),
            to: &self.env.to,
            command,
        };
        Some(hook(&request))
    }

    /// Writes a reply built from `code` and `text`.
    async fn respond(
        &mut self,
        code: PrimaryCode,
        text: &str,
    ) -> Result<(), Error> {
        self.conn.reply(&Reply::new(code, text).to_string()).await
    }

    async fn internal_error(
        &mut self,
        error: &crate::event::HookError,
    ) -> Result<(), Error> {
        error!("{} Handler failed: {}", self.log_prefix, error);
        if self.debug {
            let text = format!("INTERNAL ERROR {}", error);
            self.respond(pc::CommandSyntaxError, &text).await
        } else {
            self.respond(pc::CommandSyntaxError, "INTERNAL ERROR").await
        }
    }

    async fn cmd_helo(
        &mut self,
        command: String,
        origin: String,
    ) -> Result<(), Error> {
        self.env.reset();
        self.env.helo = Some(origin.clone());
        self.log_prefix.set_helo(origin);
        info!("{} SMTP {}", self.log_prefix, command);
        self.respond(pc::Ok, "Go on.").await
    }

    async fn cmd_mail_from(&mut self, from: String) -> Result<(), Error> {
        if self.env.helo.is_none() {
            return self
                .respond(
                    pc::BadSequenceOfCommands,
                    "Error: send HELO/EHLO first",
                )
                .await;
        }
        if self.env.from.is_some() {
            return self
                .respond(
                    pc::BadSequenceOfCommands,
                    "Error: nested MAIL command",
                )
                .await;
        }

        info!(
            "{} Start mail transaction from <{}>",
            self.log_prefix, from,
        );
        self.env.from = Some(from);
        self.respond(pc::Ok, "OK").await
    }

    async fn cmd_recipient(
        &mut self,
        recipients: Vec<String>,
    ) -> Result<(), Error> {
        if self.env.helo.is_none() {
            return self
                .respond(
                    pc::BadSequenceOfCommands,
                    "Error: send HELO/EHLO first",
                )
                .await;
        }
        if self.env.from.is_none() {
            return self
                .respond(pc::BadSequenceOfCommands, "Error: need MAIL command")
                .await;
        }

        self.env.to.extend(recipients);
        self.respond(pc::Ok, "OK").await
    }

    async fn cmd_data(&mut self) -> Result<(), Error> {
        if self.env.helo.is_none() {
            return self
                .respond(
                    pc::BadSequenceOfCommands,
                    "Error: send HELO/EHLO first",
                )
                .await;
        }
        if self.env.from.is_none() {
            return self
                .respond(pc::BadSequenceOfCommands, "Error: need MAIL command")
                .await;
        }
        if self.env.to.is_empty() {
            return self
                .respond(pc::TransactionFailed, "Error: need RCPT command")
                .await;
        }

        self.respond(pc::StartMailInput, "End data with <CR><LF>.<CR><LF>")
            .await?;

        let data = match self.conn.read_data(self.max_message_size).await {
            Ok(data) => data,
            Err(Error::DataTooLarge) => {
                warn!("{} Message data over the size limit", self.log_prefix);
                self.respond(
                    pc::ExceededStorageAllocation,
                    "Error: too much mail data",
                )
                .await?;
                return Err(Error::DataTooLarge);
            },
            Err(e) => return Err(e),
        };

        self.env.data = data;
        let mail = Mail {
            from: self.env.from.take().unwrap_or_default(),
            to: mem::take(&mut self.env.to),
            data: mem::take(&mut self.env.data),
        };
        // The sink settles before the final reply is written, so a failed
        // delivery never sees a false 250.
        let delivered = self.bus.emit_mail(&mail);
        self.env.reset();

        match delivered {
            Ok(()) => {
                info!(
                    "{} Accepted message of {} bytes for {} recipient(s)",
                    self.log_prefix,
                    mail.data.len(),
                    mail.to.len(),
                );
                self.respond(pc::Ok, "I'll take it").await
            },
            Err(e) => self.internal_error(&e).await,
        }
    }

    async fn cmd_reset(&mut self) -> Result<(), Error> {
        self.env.reset();
        self.respond(pc::Ok, "OK").await
    }

    async fn cmd_quit(&mut self) -> Result<(), Error> {
        self.quit = true;
        let _ = self.respond(pc::ServiceClosing, "Bye.").await;
        Ok(())
    }
}

fn truncated(line: &str) -> &str {
    match line.char_indices().nth(64) {
        Some((ix, _)) => &line[..ix],
        None => line,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn envelope_reset_preserves_helo() {
        let mut env = Envelope {
            helo: Some("mx.earth.com".to_owned()),
            from: Some("zim@earth.com".to_owned()),
            to: vec!["tallest@irk.com".to_owned()],
            data: b"hi\r\n".to_vec(),
        };
        env.reset();
        assert_eq!(
            Envelope {
                helo: Some("mx.earth.com".to_owned()),
                ..Envelope::default()
            },
            env,
        );
    }

    #[test]
    fn long_lines_truncated_for_logging() {
        let line = "x".repeat(200);
        assert_eq!(64, truncated(&line).len());
        assert_eq!("short", truncated("short"));
    }
}
