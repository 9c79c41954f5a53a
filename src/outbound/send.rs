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

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Notify};

use super::transact;
use crate::conn::Conn;
use crate::inbound::default_host_name;
use crate::support::{dns, error::Error, log_prefix::LogPrefix};
use crate::syntax;

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// One message submission: the sender, the recipients, the body, and the
/// delivery options.
///
/// `from` and each `to` entry are RFC-5322 addresses or address-lists; the
/// bare mailboxes are extracted at submission. The caller supplies message
/// headers inside `data` and performs any required dot-stuffing.
pub struct SendRequest {
    from: String,
    to: Vec<String>,
    data: Vec<u8>,
    host: Option<String>,
    port: u16,
    helo: Option<String>,
    timeout: Option<Duration>,
    debug: bool,
    group: Option<SendGroup>,
    on_complete: Option<CompletionHook>,
}

type CompletionHook = Box<dyn FnOnce(&SendOutcome) + Send + Sync>;

impl SendRequest {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: Vec::new(),
            data: Vec::new(),
            host: None,
            port: 25,
            helo: None,
            timeout: Some(DEFAULT_SEND_TIMEOUT),
            debug: false,
            group: None,
            on_complete: None,
        }
    }

    /// Adds recipients; may be called multiple times.
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to.push(to.into());
        self
    }

    /// The raw message bytes.
    pub fn data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Delivers everything to this host instead of resolving MX records.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Destination port, default 25.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// HELO identity, default the local hostname.
    pub fn helo(mut self, helo: impl Into<String>) -> Self {
        self.helo = Some(helo.into());
        self
    }

    /// Per-operation inactivity timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Attaches the send to an external synchronization group.
    pub fn group(mut self, group: SendGroup) -> Self {
        self.group = Some(group);
        self
    }

    /// Completion sink, invoked exactly once with the aggregated outcome,
    /// including after cancellation.
    pub fn on_complete(
        mut self,
        hook: impl FnOnce(&SendOutcome) + Send + Sync + 'static,
    ) -> Self {
        self.on_complete = Some(Box::new(hook));
        self
    }
}

/// Aggregated per-recipient results of one send.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendOutcome {
    /// Accepted recipients, keyed by address, with the accepting reply.
    pub ok: HashMap<String, String>,
    /// Failed recipients, keyed by address, with the reply line or error.
    pub err: HashMap<String, String>,
}

impl SendOutcome {
    /// True if every recipient was accepted.
    pub fn is_success(&self) -> bool {
        self.err.is_empty() && !self.ok.is_empty()
    }

    /// Collapses the single-recipient case to an (ok, err) pair.
    pub fn single(&self) -> (Option<&str>, Option<&str>) {
        (
            self.ok.values().next().map(|s| &**s),
            self.err.values().next().map(|s| &**s),
        )
    }
}

/// Tracks a group of independent sends so a caller can await them all.
///
/// Each send takes one `begin` at submission and one `end` at completion;
/// `wait` resolves once the count returns to zero.
#[derive(Clone, Default)]
pub struct SendGroup {
    inner: Arc<GroupInner>,
}

#[derive(Default)]
struct GroupInner {
    active: Mutex<usize>,
    notify: Notify,
}

impl SendGroup {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&self) {
        *self.inner.active.lock().unwrap() += 1;
    }

    fn end(&self) {
        let mut active = self.inner.active.lock().unwrap();
        *active -= 1;
        if 0 == *active {
            self.inner.notify.notify_waiters();
        }
    }

    /// Waits until every send registered with this group has completed.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if 0 == *self.inner.active.lock().unwrap() {
                return;
            }
            notified.await;
        }
    }
}

/// Handle to an in-flight send.
///
/// Dropping the handle before completion cancels the send: every recipient
/// without a settled result reports the error `Cancelled`. The completion
/// sink, if any, still runs exactly once.
#[derive(Debug)]
pub struct SendHandle {
    cancel: Option<oneshot::Sender<()>>,
    done: oneshot::Receiver<SendOutcome>,
    recipients: Vec<String>,
}

impl SendHandle {
    /// Waits for the send to finish and returns the aggregated outcome.
    pub async fn wait(mut self) -> SendOutcome {
        let result = (&mut self.done).await;
        // Completion has settled either way; disarm the drop-cancel.
        self.cancel = None;
        match result {
            Ok(outcome) => outcome,
            Err(_) => {
                let mut outcome = SendOutcome::default();
                for recipient in &self.recipients {
                    outcome.err.insert(
                        recipient.clone(),
                        Error::Cancelled.to_string(),
                    );
                }
                outcome
            },
        }
    }

    /// Cancels the send immediately.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Drop for SendHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

/// Submits `request` for delivery and returns its cancellation handle.
///
/// Must be called within a Tokio runtime. Constructive failures (no valid
/// sender mailbox, no recipients) are reported immediately; everything else
/// arrives through the handle, the completion sink, and the optional
/// [`SendGroup`].
pub fn sendmail(request: SendRequest) -> Result<SendHandle, Error> {
    let from = syntax::extract_mailboxes(&request.from)
        .into_iter()
        .next()
        .ok_or_else(|| Error::InvalidAddress(request.from.clone()))?;

    let mut recipients = Vec::new();
    for to in &request.to {
        let mut extracted = syntax::extract_mailboxes(to);
        if extracted.is_empty() {
            return Err(Error::InvalidAddress(to.clone()));
        }
        recipients.append(&mut extracted);
    }
    if recipients.is_empty() {
        return Err(Error::NoRecipients);
    }

    if let Some(ref group) = request.group {
        group.begin();
    }

    let (cancel_tx, cancel_rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel();
    let handle_recipients = recipients.clone();
    tokio::spawn(run_send(request, from, recipients, cancel_rx, done_tx));

    Ok(SendHandle {
        cancel: Some(cancel_tx),
        done: done_rx,
        recipients: handle_recipients,
    })
}

async fn run_send(
    mut request: SendRequest,
    from: String,
    recipients: Vec<String>,
    mut cancel: oneshot::Receiver<()>,
    done: oneshot::Sender<SendOutcome>,
) {
    let group = request.group.take();
    let on_complete = request.on_complete.take();
    let shared = Mutex::new(SendOutcome::default());

    tokio::select! {
        () = dispatch(&request, &from, &recipients, &shared, None, None) => {},
        _ = &mut cancel => {
            info!("Send to {} recipient(s) cancelled", recipients.len());
        },
    }

    let mut outcome = mem::take(&mut *shared.lock().unwrap());
    // Anything unsettled was cancelled mid-flight.
    for recipient in &recipients {
        if !outcome.ok.contains_key(recipient)
            && !outcome.err.contains_key(recipient)
        {
            outcome
                .err
                .insert(recipient.clone(), Error::Cancelled.to_string());
        }
    }

    if let Some(on_complete) = on_complete {
        on_complete(&outcome);
    }
    let _ = done.send(outcome);
    if let Some(group) = group {
        group.end();
    }
}

type MockResolve<'a> = &'a (dyn Fn(&str) -> Result<Vec<String>, Error> + Sync);
type MockSession<'a> =
    &'a (dyn Fn(&str, u16, &[String]) -> Result<transact::Results, Error>
         + Sync);

/// Groups `recipients` by domain, resolves each group's mail exchange, and
/// runs the per-group sessions concurrently, merging per-recipient results
/// into `outcome` as each session completes.
///
/// An explicit `host` on the request collapses everything into one session.
/// `mock_resolve` and `mock_session` replace DNS and the network session
/// for tests.
async fn dispatch(
    request: &SendRequest,
    from: &str,
    recipients: &[String],
    outcome: &Mutex<SendOutcome>,
    mock_resolve: Option<MockResolve<'_>>,
    mock_session: Option<MockSession<'_>>,
) {
    let helo = request.helo.clone().unwrap_or_else(default_host_name);

    // Group the recipients into distinct destination domains. The domain
    // is compared case-insensitively; the local part is left alone.
    let mut groups = Vec::<(String, Vec<String>)>::new();
    if request.host.is_some() {
        groups.push((String::new(), recipients.to_vec()));
    } else {
        for recipient in recipients {
            let Some(domain) = syntax::domain_of(recipient) else {
                outcome.lock().unwrap().err.insert(
                    recipient.clone(),
                    Error::InvalidAddress(recipient.clone()).to_string(),
                );
                continue;
            };

            let key = domain.to_ascii_lowercase();
            if let Some(&mut (_, ref mut group)) =
                groups.iter_mut().find(|&&mut (ref k, _)| *k == key)
            {
                group.push(recipient.clone());
            } else {
                groups.push((key, vec![recipient.clone()]));
            }
        }
    }

    let resolver = if request.host.is_none() && mock_resolve.is_none() {
        match dns::system_resolver() {
            Ok(resolver) => Some(resolver),
            Err(e) => {
                let mut outcome = outcome.lock().unwrap();
                for &(_, ref group) in &groups {
                    for recipient in group {
                        outcome
                            .err
                            .insert(recipient.clone(), e.to_string());
                    }
                }
                return;
            },
        }
    } else {
        None
    };

    let sessions = groups
        .into_iter()
        .map(|(domain, group)| {
            let helo = &helo;
            let resolver = resolver.as_ref();
            async move {
                let result = deliver_group(
                    request,
                    helo,
                    from,
                    &domain,
                    &group,
                    resolver,
                    mock_resolve,
                    mock_session,
                )
                .await;

                let mut outcome = outcome.lock().unwrap();
                match result {
                    Ok(results) => {
                        for (recipient, line) in results.rejected {
                            outcome.err.insert(recipient, line);
                        }
                        for recipient in results.accepted {
                            outcome.ok.insert(recipient, results.reply.clone());
                        }
                    },
                    Err(e) => {
                        let reason = e.to_string();
                        for recipient in &group {
                            outcome
                                .err
                                .insert(recipient.clone(), reason.clone());
                        }
                    },
                }
            }
        })
        .collect::<Vec<_>>();
    futures::future::join_all(sessions).await;
}

/// Delivers to one domain group: resolve the exchange (unless overridden),
/// connect, and run the transaction.
async fn deliver_group(
    request: &SendRequest,
    helo: &str,
    from: &str,
    domain: &str,
    recipients: &[String],
    resolver: Option<&dns::Resolver>,
    mock_resolve: Option<MockResolve<'_>>,
    mock_session: Option<MockSession<'_>>,
) -> Result<transact::Results, Error> {
    let (host, port) = match request.host {
        Some(ref host) => (host.clone(), request.port),
        None => {
            let exchanges = match (mock_resolve, resolver) {
                (Some(mock_resolve), _) => mock_resolve(domain)?,
                (None, Some(resolver)) => {
                    dns::resolve_mx(resolver, domain).await?
                },
                (None, None) => {
                    return Err(Error::DnsLookup(domain.to_owned()))
                },
            };
            // Only the top-preference exchange is attempted.
            let Some(host) = exchanges.into_iter().next() else {
                return Err(Error::NoMxRecords(domain.to_owned()));
            };
            (host, request.port)
        },
    };

    if let Some(mock_session) = mock_session {
        return mock_session(&host, port, recipients);
    }

    info!(
        "Delivering to {} recipient(s) via {}:{}",
        recipients.len(),
        host,
        port,
    );

    let connect = TcpStream::connect((&*host, port));
    let stream = match request.timeout {
        Some(timeout) => tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| Error::IdleTimeout)??,
        None => connect.await?,
    };

    let log_prefix = LogPrefix::new("smtp-out");
    log_prefix.set_peer(format!("{}:{}", host, port));
    let mut conn =
        Conn::new(stream, log_prefix, request.timeout, request.debug);
    transact::execute(&mut conn, helo, from, recipients, &request.data).await
}
