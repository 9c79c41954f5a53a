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

//! The inbound SMTP server: TCP listener, live-connection tracking, and the
//! per-connection sessions.

mod session;

#[cfg(test)]
mod integration_tests;

pub use session::Envelope;

use std::collections::HashMap;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use crate::conn::{Conn, DEFAULT_MAX_MESSAGE_SIZE};
use crate::event::{
    EventBus, HookError, Mail, SessionInfo, Verdict, VerbRequest,
};
use crate::support::{error::Error, log_prefix::LogPrefix};
use crate::syntax::Verb;
use session::Session;

/// Returns the machine's hostname, used as the default greeting identity.
pub(crate) fn default_host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_owned())
}

/// Configures and builds a [`Server`].
///
/// Event handlers are registered here; once the server is built the handler
/// table is fixed.
pub struct ServerBuilder {
    host: Option<IpAddr>,
    port: u16,
    hostname: Option<String>,
    timeout: Option<Duration>,
    max_message_size: usize,
    debug: bool,
    bus: EventBus,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            host: None,
            port: 25,
            hostname: None,
            timeout: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            debug: false,
            bus: EventBus::default(),
        }
    }
}

impl ServerBuilder {
    /// Address to bind; unset means all interfaces.
    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = Some(host);
        self
    }

    /// Port to bind; 0 picks an ephemeral port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// FQDN announced in the 220 greeting; defaults to the local hostname.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Per-connection inactivity timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Cap on the accepted DATA body size; oversize transactions are
    /// answered 552 and the connection is closed.
    pub fn max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Logs each line exchanged and appends handler errors to 500 replies.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn on_client(
        mut self,
        hook: impl Fn(&SessionInfo) + Send + Sync + 'static,
    ) -> Self {
        self.bus.on_client(hook);
        self
    }

    pub fn on_disconnect(
        mut self,
        hook: impl Fn(&SessionInfo, &str) + Send + Sync + 'static,
    ) -> Self {
        self.bus.on_disconnect(hook);
        self
    }

    /// Registers a delivery sink for completed transactions.
    pub fn on_mail(
        mut self,
        hook: impl Fn(&Mail) -> Result<(), HookError> + Send + Sync + 'static,
    ) -> Self {
        self.bus.on_mail(hook);
        self
    }

    pub fn on_error(
        mut self,
        hook: impl Fn(&Error) + Send + Sync + 'static,
    ) -> Self {
        self.bus.on_error(hook);
        self
    }

    /// Overrides the acceptance policy for one verb.
    pub fn on_verb(
        mut self,
        verb: Verb,
        hook: impl Fn(&VerbRequest<'_>) -> Result<Verdict, HookError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.bus.on_verb(verb, hook);
        self
    }

    pub fn build(self) -> Server {
        Server {
            settings: Arc::new(Settings {
                local_host_name: self
                    .hostname
                    .unwrap_or_else(default_host_name),
                timeout: self.timeout,
                max_message_size: self.max_message_size,
                debug: self.debug,
            }),
            host: self.host,
            port: self.port,
            bus: Arc::new(self.bus),
            listening: tokio::sync::Mutex::new(None),
        }
    }
}

struct Settings {
    local_host_name: String,
    timeout: Option<Duration>,
    max_message_size: usize,
    debug: bool,
}

struct LiveConn {
    stop: Arc<Notify>,
    task: tokio::task::JoinHandle<()>,
}

type LiveConnSet = Arc<Mutex<HashMap<u64, LiveConn>>>;

struct Listening {
    local_addr: SocketAddr,
    shutdown: Arc<Notify>,
    accept_task: tokio::task::JoinHandle<()>,
    connections: LiveConnSet,
}

/// The inbound SMTP server.
///
/// Built idle; `start` binds the listener and begins accepting, `stop`
/// closes every live connection and releases the socket. A stopped server
/// may be started again.
pub struct Server {
    settings: Arc<Settings>,
    host: Option<IpAddr>,
    port: u16,
    bus: Arc<EventBus>,
    listening: tokio::sync::Mutex<Option<Listening>>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// Returns the bound local address.
    pub async fn start(&self) -> Result<SocketAddr, Error> {
        let mut listening = self.listening.lock().await;
        if listening.is_some() {
            return Err(Error::AlreadyRunning);
        }

        let bind_addr = SocketAddr::new(
            self.host.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            self.port,
        );
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Listening for SMTP on {}", local_addr);

        let shutdown = Arc::new(Notify::new());
        let connections: LiveConnSet = Arc::new(Mutex::new(HashMap::new()));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.bus),
            Arc::clone(&self.settings),
            Arc::clone(&shutdown),
            Arc::clone(&connections),
        ));

        *listening = Some(Listening {
            local_addr,
            shutdown,
            accept_task,
            connections,
        });
        Ok(local_addr)
    }

    /// Stops accepting, closes every live connection (each fires its own
    /// `disconnect` event), and releases the listening socket.
    pub async fn stop(&self) {
        let Some(listening) = self.listening.lock().await.take() else {
            return;
        };

        listening.shutdown.notify_one();
        let _ = listening.accept_task.await;

        let live = mem::take(&mut *listening.connections.lock().unwrap());
        for conn in live.values() {
            conn.stop.notify_one();
        }
        for (_, conn) in live {
            let _ = conn.task.await;
        }

        info!("SMTP listener on {} stopped", listening.local_addr);
    }

    /// The bound address while the server is running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.lock().await.as_ref().map(|l| l.local_addr)
    }
}

async fn accept_loop(
    listener: TcpListener,
    bus: Arc<EventBus>,
    settings: Arc<Settings>,
    shutdown: Arc<Notify>,
    connections: LiveConnSet,
) {
    let mut next_id = 0u64;

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.notified() => break,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept SMTP connection: {}", e);
                bus.emit_error(&Error::Io(e));
                continue;
            },
        };

        let id = next_id;
        next_id += 1;

        let stop = Arc::new(Notify::new());
        let task = tokio::spawn(run_session(
            stream,
            peer,
            id,
            Arc::clone(&bus),
            Arc::clone(&settings),
            Arc::clone(&stop),
            Arc::clone(&connections),
        ));
        connections.lock().unwrap().insert(id, LiveConn { stop, task });
    }
}

async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    id: u64,
    bus: Arc<EventBus>,
    settings: Arc<Settings>,
    stop: Arc<Notify>,
    connections: LiveConnSet,
) {
    let log_prefix = LogPrefix::new("smtp-in");
    log_prefix.set_peer(peer.to_string());
    info!("{} Connection accepted", log_prefix);

    let conn = Conn::new(
        stream,
        log_prefix.clone(),
        settings.timeout,
        settings.debug,
    );
    let info = SessionInfo { id, peer };
    let mut session = Session::new(
        conn,
        Arc::clone(&bus),
        info.clone(),
        log_prefix.clone(),
        settings.local_host_name.clone(),
        settings.max_message_size,
        settings.debug,
    );

    let reason = tokio::select! {
        reason = session.run() => reason,
        _ = stop.notified() => "server stopped".to_owned(),
    };
    session.close().await;

    // The connection leaves the live set before the disconnect event fires.
    connections.lock().unwrap().remove(&id);
    info!("{} Disconnected: {}", log_prefix, reason);
    bus.emit_disconnect(&info, &reason);
}

/// One-shot convenience: builds a server around a single delivery sink and
/// starts it on `addr`.
pub async fn serve(
    addr: SocketAddr,
    sink: impl Fn(&Mail) -> Result<(), HookError> + Send + Sync + 'static,
) -> Result<Server, Error> {
    let server = Server::builder()
        .host(addr.ip())
        .port(addr.port())
        .on_mail(sink)
        .build();
    server.start().await?;
    Ok(server)
}
