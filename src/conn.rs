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

use std::time::{Duration, Instant};

use log::debug;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite,
    AsyncWriteExt, BufStream,
};

use crate::codes::Reply;
use crate::support::{error::Error, log_prefix::LogPrefix};

/// Longest accepted command or reply line, including the line ending.
pub const MAX_LINE: usize = 1024;

/// Most continuation lines accepted in a single reply.
const MAX_REPLY_LINES: usize = 100;

/// Default cap on the size of a message body accepted in DATA mode.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// A line-framed SMTP connection endpoint.
///
/// Used by both the inbound server (over an accepted socket) and the
/// outbound client (over a connected one). All operations share a rolling
/// inactivity deadline: every successful read or write pushes it forward,
/// and expiry surfaces as `Error::IdleTimeout`.
pub struct Conn<S> {
    io: BufStream<S>,
    log_prefix: LogPrefix,
    timeout: Option<Duration>,
    deadline: Instant,
    debug: bool,
    closed: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Conn<S> {
    pub fn new(
        stream: S,
        log_prefix: LogPrefix,
        timeout: Option<Duration>,
        debug: bool,
    ) -> Self {
        let mut conn = Self {
            io: BufStream::new(stream),
            log_prefix,
            timeout,
            deadline: Instant::now(),
            debug,
            closed: false,
        };
        conn.bump_deadline();
        conn
    }

    fn bump_deadline(&mut self) {
        if let Some(timeout) = self.timeout {
            self.deadline = Instant::now() + timeout;
        }
    }

    /// Reads up to `MAX_LINE` bytes into `buffer`, stopping after a LF.
    ///
    /// `buffer` is cleared first. An empty buffer on return means EOF.
    async fn read_line_raw(
        &mut self,
        buffer: &mut Vec<u8>,
    ) -> Result<(), Error> {
        buffer.clear();
        let timeout = self.timeout;
        let deadline = self.deadline;
        let mut limited = (&mut self.io).take(MAX_LINE as u64);
        let read = limited.read_until(b'\n', buffer);
        match timeout {
            Some(_) => tokio::time::timeout_at(deadline.into(), read)
                .await
                .map_err(|_| Error::IdleTimeout)??,
            None => read.await?,
        };
        self.bump_deadline();
        Ok(())
    }

    /// Reads one command line, with surrounding whitespace trimmed.
    ///
    /// An overlong line is consumed to its end and reported as
    /// `Error::LineTooLong` so the caller can answer 500 and keep the
    /// session going.
    pub async fn read_command(&mut self) -> Result<String, Error> {
        let mut buffer = Vec::new();
        self.read_line_raw(&mut buffer).await?;
        if buffer.is_empty() {
            return Err(Error::UnexpectedDisconnect);
        }

        if !buffer.ends_with(b"\n") {
            if buffer.len() >= MAX_LINE {
                // Skip the rest of the line
                while !buffer.is_empty() && !buffer.ends_with(b"\n") {
                    self.read_line_raw(&mut buffer).await?;
                }
                return Err(Error::LineTooLong);
            }
            return Err(Error::UnexpectedDisconnect);
        }

        let line = String::from_utf8_lossy(&buffer).trim().to_owned();
        if self.debug {
            debug!("{} >> {:?}", self.log_prefix, line);
        }
        Ok(line)
    }

    /// Reads one complete SMTP reply, accumulating `NNN-` continuation
    /// lines until the terminal `NNN ` line.
    ///
    /// The returned code is that of the terminal line; the text is the
    /// concatenation of every line's text.
    pub async fn read_reply(&mut self) -> Result<Reply, Error> {
        let mut buffer = Vec::new();
        let mut text = String::new();

        for _ in 0..MAX_REPLY_LINES {
            self.read_line_raw(&mut buffer).await?;
            if buffer.is_empty() {
                return Err(Error::UnexpectedDisconnect);
            }
            if !buffer.ends_with(b"\n") {
                return Err(if buffer.len() >= MAX_LINE {
                    Error::LineTooLong
                } else {
                    Error::UnexpectedDisconnect
                });
            }

            let line = String::from_utf8_lossy(&buffer);
            let line = line.trim_end_matches(['\r', '\n']);
            if self.debug {
                debug!("{} >> {:?}", self.log_prefix, line);
            }

            let Some((code, last, comment)) = parse_reply_line(line) else {
                return Err(Error::BadReplyLine(line.to_owned()));
            };

            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(comment);

            if last {
                return Ok(Reply { code, text });
            }
        }

        Err(Error::BadReplyLine("too many continuation lines".to_owned()))
    }

    /// Reads a reply and checks its status code.
    ///
    /// A mismatch is an `Error::UnexpectedReply` carrying the full rendered
    /// reply.
    pub async fn expect_reply(
        &mut self,
        expect: impl Into<u16>,
    ) -> Result<Reply, Error> {
        let expect = expect.into();
        let reply = self.read_reply().await?;
        if reply.code == expect {
            Ok(reply)
        } else {
            Err(Error::UnexpectedReply(reply.to_string()))
        }
    }

    /// Writes `command` followed by CRLF, then expects a reply with status
    /// `expect`.
    pub async fn exchange(
        &mut self,
        command: &str,
        expect: impl Into<u16>,
    ) -> Result<Reply, Error> {
        self.write_line(command).await?;
        self.expect_reply(expect).await
    }

    /// Writes `line` followed by CRLF and flushes.
    pub async fn write_line(&mut self, line: &str) -> Result<(), Error> {
        if self.debug {
            debug!("{} << {:?}", self.log_prefix, line);
        }

        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");
        self.write_and_flush(&bytes).await
    }

    /// Writes `text` as a reply line.
    ///
    /// Text already containing CRLF is written verbatim (used for raw
    /// message bodies); otherwise a CRLF is appended.
    pub async fn reply(&mut self, text: &str) -> Result<(), Error> {
        if text.contains("\r\n") {
            self.write_raw(text.as_bytes()).await
        } else {
            self.write_line(text).await
        }
    }

    /// Writes a `250` reply with `msg`, defaulting to `OK`.
    pub async fn ok(&mut self, msg: Option<&str>) -> Result<(), Error> {
        self.write_line(&format!("250 {}", msg.unwrap_or("OK"))).await
    }

    /// Writes raw bytes without any transformation and flushes.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if self.debug {
            debug!("{} << [{} bytes]", self.log_prefix, bytes.len());
        }
        self.write_and_flush(bytes).await
    }

    async fn write_and_flush(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let timeout = self.timeout;
        let deadline = self.deadline;
        let io = &mut self.io;
        let write = async move {
            io.write_all(bytes).await?;
            io.flush().await?;
            std::io::Result::Ok(())
        };
        match timeout {
            Some(_) => tokio::time::timeout_at(deadline.into(), write)
                .await
                .map_err(|_| Error::IdleTimeout)??,
            None => write.await?,
        }
        self.bump_deadline();
        Ok(())
    }

    /// Reads a DATA-mode message body: lines up to a line containing only
    /// `.`, with dot-unstuffing applied and CRLF preserved between lines.
    ///
    /// Fails with `Error::DataTooLarge` once the body exceeds `max_size`;
    /// the caller answers 552 and closes.
    pub async fn read_data(
        &mut self,
        max_size: usize,
    ) -> Result<Vec<u8>, Error> {
        let timeout = self.timeout;
        let body = read_dot_stuffed(&mut self.io, max_size, timeout).await?;
        self.bump_deadline();
        if self.debug {
            debug!(
                "{} >> [{} bytes of message data]",
                self.log_prefix,
                body.len(),
            );
        }
        Ok(body)
    }

    /// Flushes pending writes on a best-effort basis and shuts the stream
    /// down. Double close is a no-op.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.io.flush().await;
        let _ = self.io.shutdown().await;
    }
}

/// Splits a reply line into (code, is-final, text).
fn parse_reply_line(s: &str) -> Option<(u16, bool, &str)> {
    let code = s.get(0..3)?.parse::<u16>().ok()?;
    let (last, comment) = match s.get(3..4) {
        None => (true, ""),
        Some(" ") => (true, s.get(4..).unwrap_or("")),
        Some("-") => (false, s.get(4..).unwrap_or("")),
        _ => return None,
    };

    Some((code, last, comment))
}

/// Accumulates dot-stuffed DATA lines from `src` until the terminating `.`
/// line, unstuffing as it goes.
///
/// A line beginning with `..` loses exactly one leading dot; the
/// terminating line is not included; bare-LF line endings are normalized
/// to CRLF.
async fn read_dot_stuffed(
    src: &mut (impl AsyncBufRead + Unpin),
    max_size: usize,
    timeout: Option<Duration>,
) -> Result<Vec<u8>, Error> {
    // Room for the line ending and a stuffed dot on top of the longest
    // content line we are willing to keep.
    let line_cap = (max_size + MAX_LINE) as u64;
    let mut body = Vec::new();
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        let mut limited = (&mut *src).take(line_cap);
        let read = limited.read_until(b'\n', &mut buffer);
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| Error::IdleTimeout)??,
            None => read.await?,
        };

        if !buffer.ends_with(b"\n") {
            return Err(if buffer.len() as u64 >= line_cap {
                Error::DataTooLarge
            } else {
                Error::UnexpectedDisconnect
            });
        }

        let line = if buffer.ends_with(b"\r\n") {
            &buffer[..buffer.len() - 2]
        } else {
            &buffer[..buffer.len() - 1]
        };

        if b"." == line {
            return Ok(body);
        }

        let line = if line.starts_with(b"..") { &line[1..] } else { line };
        if body.len() + line.len() + 2 > max_size {
            return Err(Error::DataTooLarge);
        }

        body.extend_from_slice(line);
        body.extend_from_slice(b"\r\n");
    }
}
