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

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codes::pc;
use crate::conn::Conn;
use crate::support::error::Error;

/// Outcome of one SMTP client session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Results {
    /// Recipients the server accepted.
    pub accepted: Vec<String>,
    /// Recipients the server rejected, each with the rejecting reply line.
    pub rejected: Vec<(String, String)>,
    /// The reply to the end-of-data marker; reported for every accepted
    /// recipient.
    pub reply: String,
}

/// Runs one SMTP transaction over `conn`, delivering `data` from `from` to
/// `recipients`.
///
/// Recipient rejections are recorded without aborting the session as long
/// as at least one recipient is accepted; if every recipient is rejected
/// the session aborts with the first rejection. Any other unexpected reply
/// or I/O failure aborts the whole session. The caller is responsible for
/// dot-stuffing `data`; the bytes are written untransformed.
pub async fn execute<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut Conn<S>,
    helo: &str,
    from: &str,
    recipients: &[String],
    data: &[u8],
) -> Result<Results, Error> {
    if recipients.is_empty() {
        return Err(Error::NoRecipients);
    }

    conn.expect_reply(pc::ServiceReady).await?;
    conn.exchange(&format!("HELO {}", helo), pc::Ok).await?;
    conn.exchange(&format!("MAIL FROM:<{}>", from), pc::Ok).await?;

    let mut results = Results::default();
    for recipient in recipients {
        let command = format!("RCPT TO:<{}>", recipient);
        match conn.exchange(&command, pc::Ok).await {
            Ok(_) => results.accepted.push(recipient.clone()),
            Err(Error::UnexpectedReply(line)) => {
                results.rejected.push((recipient.clone(), line));
            },
            Err(e) => return Err(e),
        }
    }

    if results.accepted.is_empty() {
        // Every recipient was rejected; the first rejection is the
        // session's error. The polite QUIT is still attempted.
        quit(conn).await;
        let line = results
            .rejected
            .first()
            .map(|&(_, ref line)| line.clone())
            .unwrap_or_default();
        return Err(Error::UnexpectedReply(line));
    }

    conn.exchange("DATA", pc::StartMailInput).await?;

    conn.write_raw(data).await?;
    if !data.is_empty() && !data.ends_with(b"\r\n") {
        // Keep the end marker on a line of its own. The data itself is
        // never transformed.
        conn.write_raw(b"\r\n").await?;
    }
    let reply = conn.exchange(".", pc::Ok).await?;
    results.reply = reply.to_string();

    quit(conn).await;
    Ok(results)
}

/// The mostly superfluous QUIT; nobody cares what actually happens.
async fn quit<S: AsyncRead + AsyncWrite + Unpin>(conn: &mut Conn<S>) {
    let _ = conn.exchange("QUIT", pc::ServiceClosing).await;
}
