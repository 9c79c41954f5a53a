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

//! Typed named-event dispatch for the inbound server.
//!
//! Handlers are registered at construction time through the server builder
//! and the handler lists are immutable during dispatch. The session owning
//! a connection is always the caller, so a failing handler is answered on
//! the right connection by construction.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::codes::Reply;
use crate::support::error::Error;
use crate::syntax::{Command, Verb};

/// Error type for application hooks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Identity of one server connection, passed to connection-scoped events.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    /// Listener-unique id of the connection.
    pub id: u64,
    /// Remote address.
    pub peer: SocketAddr,
}

/// A completed mail transaction, handed to the delivery sink.
///
/// The session keeps no reference to the transaction once it is emitted; a
/// sink that wants to retain it clones what it needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mail {
    pub from: String,
    pub to: Vec<String>,
    pub data: Vec<u8>,
}

/// What a verb override decided.
pub enum Verdict {
    /// Fall through to the built-in behaviour.
    Continue,
    /// Answer the client with this reply; session state is left unchanged.
    Reject(Reply),
}

/// The state a verb override may inspect.
pub struct VerbRequest<'a> {
    pub peer: SocketAddr,
    pub helo: Option<&'a str>,
    pub from: Option<&'a str>,
    pub to: &'a [String],
    pub command: &'a Command,
}

type ClientHook = Box<dyn Fn(&SessionInfo) + Send + Sync>;
type DisconnectHook = Box<dyn Fn(&SessionInfo, &str) + Send + Sync>;
type MailHook = Box<dyn Fn(&Mail) -> Result<(), HookError> + Send + Sync>;
type ErrorHook = Box<dyn Fn(&Error) + Send + Sync>;
pub type VerbHook =
    Box<dyn Fn(&VerbRequest<'_>) -> Result<Verdict, HookError> + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    client: Vec<ClientHook>,
    disconnect: Vec<DisconnectHook>,
    mail: Vec<MailHook>,
    error: Vec<ErrorHook>,
    verb: HashMap<Verb, VerbHook>,
}

impl EventBus {
    pub fn on_client(
        &mut self,
        hook: impl Fn(&SessionInfo) + Send + Sync + 'static,
    ) {
        self.client.push(Box::new(hook));
    }

    pub fn on_disconnect(
        &mut self,
        hook: impl Fn(&SessionInfo, &str) + Send + Sync + 'static,
    ) {
        self.disconnect.push(Box::new(hook));
    }

    pub fn on_mail(
        &mut self,
        hook: impl Fn(&Mail) -> Result<(), HookError> + Send + Sync + 'static,
    ) {
        self.mail.push(Box::new(hook));
    }

    pub fn on_error(&mut self, hook: impl Fn(&Error) + Send + Sync + 'static) {
        self.error.push(Box::new(hook));
    }

    /// Installs `hook` as the acceptance policy for `verb`, replacing any
    /// previous one.
    pub fn on_verb(
        &mut self,
        verb: Verb,
        hook: impl Fn(&VerbRequest<'_>) -> Result<Verdict, HookError>
            + Send
            + Sync
            + 'static,
    ) {
        self.verb.insert(verb, Box::new(hook));
    }

    pub fn emit_client(&self, info: &SessionInfo) {
        for hook in &self.client {
            hook(info);
        }
    }

    pub fn emit_disconnect(&self, info: &SessionInfo, reason: &str) {
        for hook in &self.disconnect {
            hook(info, reason);
        }
    }

    /// Delivers `mail` to every sink in registration order, stopping at the
    /// first failure.
    pub fn emit_mail(&self, mail: &Mail) -> Result<(), HookError> {
        for hook in &self.mail {
            hook(mail)?;
        }

        Ok(())
    }

    pub fn emit_error(&self, error: &Error) {
        for hook in &self.error {
            hook(error);
        }
    }

    pub fn has_mail(&self) -> bool {
        !self.mail.is_empty()
    }

    pub fn verb_hook(&self, verb: Verb) -> Option<&VerbHook> {
        self.verb.get(&verb)
    }
}
