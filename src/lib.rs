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

//! Martlet is an asynchronous SMTP endpoint library built on Tokio.
//!
//! It provides two complementary cores:
//!
//! - an inbound SMTP **server** ([`Server`]) that accepts connections,
//!   drives the command/response state machine, assembles complete mail
//!   transactions, and hands each one to an application-supplied sink; and
//! - an outbound SMTP **client** ([`sendmail`]) that groups recipients by
//!   domain, resolves delivery hosts through DNS MX lookup, pipelines each
//!   domain's recipients through one session, and aggregates per-recipient
//!   outcomes.
//!
//! TLS, authentication, and mail queueing are out of scope; the library
//! speaks plain RFC 5321 over TCP and leaves policy to its caller.
//!
//! ```no_run
//! use martlet::{sendmail, SendRequest, Server};
//!
//! # async fn demo() -> Result<(), martlet::Error> {
//! let server = Server::builder()
//!     .port(2525)
//!     .hostname("mx.example.com")
//!     .on_mail(|mail| {
//!         println!("mail from {} for {:?}", mail.from, mail.to);
//!         Ok(())
//!     })
//!     .build();
//! server.start().await?;
//!
//! let handle = sendmail(
//!     SendRequest::new("sender@example.com")
//!         .to("someone@example.net")
//!         .data(b"Subject: hi\r\n\r\nhello\r\n".to_vec()),
//! )?;
//! let outcome = handle.wait().await;
//! println!("delivered: {:?}, failed: {:?}", outcome.ok, outcome.err);
//! # Ok(())
//! # }
//! ```

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr $(,)?) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod codes;
pub mod conn;
pub mod event;
pub mod inbound;
pub mod outbound;
pub mod support;
pub mod syntax;

pub use crate::codes::Reply;
pub use crate::event::{HookError, Mail, SessionInfo, Verdict, VerbRequest};
pub use crate::inbound::{serve, Server, ServerBuilder};
pub use crate::outbound::{
    sendmail, SendGroup, SendHandle, SendOutcome, SendRequest,
};
pub use crate::support::error::Error;
pub use crate::syntax::Verb;

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        if !std::env::var("TEST_LOG").ok().is_some_and(|v| "1" == v) {
            return;
        }

        let stderr = log4rs::append::console::ConsoleAppender::builder()
            .target(log4rs::append::console::Target::Stderr)
            .encoder(Box::new(log4rs::encode::pattern::PatternEncoder::new(
                "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}",
            )))
            .build();
        let log_config = log4rs::config::Config::builder()
            .appender(
                log4rs::config::Appender::builder()
                    .build("stderr", Box::new(stderr)),
            )
            .build(
                log4rs::config::Root::builder()
                    .appender("stderr")
                    .build(log::LevelFilter::Trace),
            )
            .unwrap();
        let _ = log4rs::init_config(log_config);
    })
}
