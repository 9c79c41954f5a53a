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

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::*;
use crate::codes::{pc, Reply};
use crate::outbound::{sendmail, SendRequest};

struct TestServer {
    server: Server,
    addr: SocketAddr,
    mails: Arc<Mutex<Vec<Mail>>>,
    disconnects: Arc<Mutex<Vec<String>>>,
}

async fn start_server(
    configure: impl FnOnce(ServerBuilder) -> ServerBuilder,
) -> TestServer {
    crate::init_test_log();

    let mails = Arc::new(Mutex::new(Vec::new()));
    let disconnects = Arc::new(Mutex::new(Vec::new()));

    let builder = Server::builder()
        .host("127.0.0.1".parse().unwrap())
        .port(0)
        .hostname("mx.example.test")
        .debug(true)
        .on_mail({
            let mails = Arc::clone(&mails);
            move |mail| {
                mails.lock().unwrap().push(mail.clone());
                Ok(())
            }
        })
        .on_disconnect({
            let disconnects = Arc::clone(&disconnects);
            move |_, reason| {
                disconnects.lock().unwrap().push(reason.to_owned())
            }
        });

    let server = configure(builder).build();
    let addr = server.start().await.unwrap();
    TestServer {
        server,
        addr,
        mails,
        disconnects,
    }
}

async fn connect(addr: SocketAddr) -> BufReader<TcpStream> {
    BufReader::new(TcpStream::connect(addr).await.unwrap())
}

async fn read_line(io: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    io.read_line(&mut line).await.unwrap();
    line.trim_end().to_owned()
}

async fn send(io: &mut BufReader<TcpStream>, line: &str) -> String {
    io.write_all(format!("{}\r\n", line).as_bytes()).await.unwrap();
    io.flush().await.unwrap();
    read_line(io).await
}

#[tokio::main(flavor = "current_thread")]
async fn run_simple_transaction() {
    let ts = start_server(|b| b).await;
    let mut io = connect(ts.addr).await;

    assert_eq!("220 mx.example.test Ready.", read_line(&mut io).await);
    assert_eq!("250 Go on.", send(&mut io, "EHLO x").await);
    assert_eq!("250 OK", send(&mut io, "MAIL FROM: <a@b>").await);
    assert_eq!("250 OK", send(&mut io, "RCPT TO: <c@d>").await);
    assert_eq!(
        "354 End data with <CR><LF>.<CR><LF>",
        send(&mut io, "DATA").await,
    );
    io.write_all(b"hello\r\n.\r\n").await.unwrap();
    io.flush().await.unwrap();
    assert_eq!("250 I'll take it", read_line(&mut io).await);
    assert_eq!("221 Bye.", send(&mut io, "QUIT").await);

    let mails = ts.mails.lock().unwrap().clone();
    assert_eq!(
        vec![Mail {
            from: "a@b".to_owned(),
            to: vec!["c@d".to_owned()],
            data: b"hello\r\n".to_vec(),
        }],
        mails,
    );
    ts.server.stop().await;
}

#[test]
fn simple_transaction() {
    run_simple_transaction();
}

#[tokio::main(flavor = "current_thread")]
async fn run_two_recipients() {
    let ts = start_server(|b| b).await;
    let mut io = connect(ts.addr).await;

    read_line(&mut io).await;
    send(&mut io, "EHLO x").await;
    send(&mut io, "MAIL FROM: <a@b>").await;
    assert_eq!("250 OK", send(&mut io, "RCPT TO: <c@d>").await);
    assert_eq!("250 OK", send(&mut io, "RCPT TO: <e@f>").await);
    send(&mut io, "DATA").await;
    io.write_all(b"hello\r\n.\r\n").await.unwrap();
    io.flush().await.unwrap();
    read_line(&mut io).await;

    let mails = ts.mails.lock().unwrap().clone();
    assert_eq!(1, mails.len());
    assert_eq!(vec!["c@d".to_owned(), "e@f".to_owned()], mails[0].to);
    ts.server.stop().await;
}

#[test]
fn two_recipients() {
    run_two_recipients();
}

#[tokio::main(flavor = "current_thread")]
async fn run_rset_discards_transaction() {
    let ts = start_server(|b| b).await;
    let mut io = connect(ts.addr).await;

    read_line(&mut io).await;
    send(&mut io, "HELO x").await;
    assert_eq!("250 OK", send(&mut io, "MAIL FROM:<first@b>").await);
    assert_eq!("250 OK", send(&mut io, "RCPT TO:<never@d>").await);
    assert_eq!("250 OK", send(&mut io, "RSET").await);

    // No fresh HELO is needed; the identity survives the reset.
    assert_eq!("250 OK", send(&mut io, "MAIL FROM:<second@b>").await);
    assert_eq!("250 OK", send(&mut io, "RCPT TO:<real@d>").await);
    send(&mut io, "DATA").await;
    io.write_all(b"after reset\r\n.\r\n").await.unwrap();
    io.flush().await.unwrap();
    assert_eq!("250 I'll take it", read_line(&mut io).await);

    let mails = ts.mails.lock().unwrap().clone();
    assert_eq!(1, mails.len());
    assert_eq!("second@b", mails[0].from);
    assert_eq!(vec!["real@d".to_owned()], mails[0].to);
    ts.server.stop().await;
}

#[test]
fn rset_discards_transaction() {
    run_rset_discards_transaction();
}

#[tokio::main(flavor = "current_thread")]
async fn run_unknown_verb_keeps_session() {
    let ts = start_server(|b| b).await;
    let mut io = connect(ts.addr).await;

    read_line(&mut io).await;
    assert_eq!("500 Learn to type!", send(&mut io, "FOO").await);
    assert_eq!("250 Go on.", send(&mut io, "HELO x").await);
    ts.server.stop().await;
}

#[test]
fn unknown_verb_keeps_session() {
    run_unknown_verb_keeps_session();
}

#[tokio::main(flavor = "current_thread")]
async fn run_mail_syntax() {
    let ts = start_server(|b| b).await;
    let mut io = connect(ts.addr).await;

    read_line(&mut io).await;
    send(&mut io, "HELO x").await;

    // The angle brackets are optional.
    assert_eq!("250 OK", send(&mut io, "MAIL FROM: plain@addr").await);
    send(&mut io, "RSET").await;
    assert_eq!(
        "501 Usage: MAIL FROM: mail addr",
        send(&mut io, "MAIL FROM:").await,
    );
    assert_eq!(
        "501 Usage: RCPT TO: mail addr",
        send(&mut io, "RCPT TO:").await,
    );
    ts.server.stop().await;
}

#[test]
fn mail_syntax() {
    run_mail_syntax();
}

#[tokio::main(flavor = "current_thread")]
async fn run_command_ordering() {
    let ts = start_server(|b| b).await;
    let mut io = connect(ts.addr).await;

    read_line(&mut io).await;
    assert_eq!(
        "503 Error: send HELO/EHLO first",
        send(&mut io, "MAIL FROM:<a@b>").await,
    );
    assert_eq!(
        "503 Error: send HELO/EHLO first",
        send(&mut io, "DATA").await,
    );

    send(&mut io, "HELO x").await;
    assert_eq!(
        "503 Error: need MAIL command",
        send(&mut io, "RCPT TO:<c@d>").await,
    );
    assert_eq!("503 Error: need MAIL command", send(&mut io, "DATA").await);

    send(&mut io, "MAIL FROM:<a@b>").await;
    assert_eq!("554 Error: need RCPT command", send(&mut io, "DATA").await);
    assert_eq!(
        "503 Error: nested MAIL command",
        send(&mut io, "MAIL FROM:<again@b>").await,
    );

    assert_eq!("252 Ok.", send(&mut io, "NOOP").await);
    assert_eq!("214 No help available.", send(&mut io, "HELP").await);
    assert_eq!("252 Nice try.", send(&mut io, "VRFY a@b").await);
    assert_eq!("252 Nice try.", send(&mut io, "EXPN list").await);

    assert!(ts.mails.lock().unwrap().is_empty());
    ts.server.stop().await;
}

#[test]
fn command_ordering() {
    run_command_ordering();
}

#[tokio::main(flavor = "current_thread")]
async fn run_dot_unstuffing() {
    let ts = start_server(|b| b).await;
    let mut io = connect(ts.addr).await;

    read_line(&mut io).await;
    send(&mut io, "HELO x").await;
    send(&mut io, "MAIL FROM:<a@b>").await;
    send(&mut io, "RCPT TO:<c@d>").await;
    send(&mut io, "DATA").await;
    io.write_all(b"..foo\r\n.bar\r\nplain\r\n.\r\n").await.unwrap();
    io.flush().await.unwrap();
    assert_eq!("250 I'll take it", read_line(&mut io).await);

    let mails = ts.mails.lock().unwrap().clone();
    assert_eq!(b".foo\r\n.bar\r\nplain\r\n".to_vec(), mails[0].data);
    ts.server.stop().await;
}

#[test]
fn dot_unstuffing() {
    run_dot_unstuffing();
}

#[tokio::main(flavor = "current_thread")]
async fn run_sink_failure_yields_500() {
    let ts = start_server(|b| {
        b.on_mail(|mail| {
            if mail.from.contains("bad") {
                Err("delivery sink exploded".into())
            } else {
                Ok(())
            }
        })
    })
    .await;
    let mut io = connect(ts.addr).await;

    read_line(&mut io).await;
    send(&mut io, "HELO x").await;
    send(&mut io, "MAIL FROM:<bad@b>").await;
    send(&mut io, "RCPT TO:<c@d>").await;
    send(&mut io, "DATA").await;
    io.write_all(b"doomed\r\n.\r\n").await.unwrap();
    io.flush().await.unwrap();

    let reply = read_line(&mut io).await;
    assert!(
        reply.starts_with("500 INTERNAL ERROR"),
        "unexpected reply: {reply}",
    );

    // The session stays open and a fresh transaction works.
    assert_eq!("252 Ok.", send(&mut io, "NOOP").await);
    assert_eq!("250 OK", send(&mut io, "MAIL FROM:<good@b>").await);
    ts.server.stop().await;
}

#[test]
fn sink_failure_yields_500() {
    run_sink_failure_yields_500();
}

#[tokio::main(flavor = "current_thread")]
async fn run_verb_override_policy() {
    let ts = start_server(|b| {
        b.on_verb(crate::syntax::Verb::Rcpt, |request| {
            let allowed = match *request.command {
                crate::syntax::Command::Recipient(ref recipients) => {
                    recipients.iter().all(|r| r.ends_with("@irk.com"))
                },
                _ => true,
            };
            if allowed {
                Ok(Verdict::Continue)
            } else {
                Ok(Verdict::Reject(Reply::new(
                    pc::ActionNotTakenPermanent,
                    "Relay denied",
                )))
            }
        })
    })
    .await;
    let mut io = connect(ts.addr).await;

    read_line(&mut io).await;
    send(&mut io, "HELO x").await;
    send(&mut io, "MAIL FROM:<zim@earth.com>").await;
    assert_eq!("550 Relay denied", send(&mut io, "RCPT TO:<c@d.com>").await);
    // The rejected recipient never entered the envelope.
    assert_eq!("554 Error: need RCPT command", send(&mut io, "DATA").await);
    assert_eq!(
        "250 OK",
        send(&mut io, "RCPT TO:<tallest@irk.com>").await,
    );
    ts.server.stop().await;
}

#[test]
fn verb_override_policy() {
    run_verb_override_policy();
}

#[tokio::main(flavor = "current_thread")]
async fn run_oversize_data_closes_connection() {
    let ts = start_server(|b| b.max_message_size(64)).await;
    let mut io = connect(ts.addr).await;

    read_line(&mut io).await;
    send(&mut io, "HELO x").await;
    send(&mut io, "MAIL FROM:<a@b>").await;
    send(&mut io, "RCPT TO:<c@d>").await;
    send(&mut io, "DATA").await;

    let big = "x".repeat(128);
    io.write_all(format!("{}\r\n.\r\n", big).as_bytes()).await.unwrap();
    io.flush().await.unwrap();
    assert_eq!("552 Error: too much mail data", read_line(&mut io).await);
    assert_eq!("", read_line(&mut io).await); // closed

    assert!(ts.mails.lock().unwrap().is_empty());
    ts.server.stop().await;
}

#[test]
fn oversize_data_closes_connection() {
    run_oversize_data_closes_connection();
}

#[tokio::main(flavor = "current_thread")]
async fn run_stop_closes_connections_and_restarts() {
    let ts = start_server(|b| b).await;
    let mut io = connect(ts.addr).await;
    read_line(&mut io).await;
    send(&mut io, "HELO x").await;

    ts.server.stop().await;
    assert_eq!("", read_line(&mut io).await); // closed by stop
    assert_eq!(
        vec!["server stopped".to_owned()],
        ts.disconnects.lock().unwrap().clone(),
    );

    // A stopped server can be started again.
    let addr = ts.server.start().await.unwrap();
    let mut io = connect(addr).await;
    assert_eq!("220 mx.example.test Ready.", read_line(&mut io).await);
    ts.server.stop().await;
}

#[test]
fn stop_closes_connections_and_restarts() {
    run_stop_closes_connections_and_restarts();
}

#[tokio::main(flavor = "current_thread")]
async fn run_idle_connection_times_out() {
    let ts = start_server(|b| b.timeout(Duration::from_millis(50))).await;
    let mut io = connect(ts.addr).await;

    read_line(&mut io).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!("", read_line(&mut io).await); // closed

    // Give the session task a moment to finish its bookkeeping.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        vec!["timeout".to_owned()],
        ts.disconnects.lock().unwrap().clone(),
    );
    ts.server.stop().await;
}

#[test]
fn idle_connection_times_out() {
    run_idle_connection_times_out();
}

#[tokio::main(flavor = "current_thread")]
async fn run_client_round_trip() {
    let ts = start_server(|b| b).await;

    let data = b"Subject: round trip\r\n\r\nhello\r\n..stuffed\r\n".to_vec();
    let handle = sendmail(
        SendRequest::new("zim@earth.com")
            .to("Tallest <tallest@irk.com>, gir@irk.com")
            .data(data)
            .host(ts.addr.ip().to_string())
            .port(ts.addr.port())
            .debug(true),
    )
    .unwrap();
    let outcome = handle.wait().await;

    assert!(outcome.err.is_empty(), "errors: {:?}", outcome.err);
    assert_eq!(
        Some("250 I'll take it"),
        outcome.ok.get("tallest@irk.com").map(|s| &**s),
    );
    assert_eq!(
        Some("250 I'll take it"),
        outcome.ok.get("gir@irk.com").map(|s| &**s),
    );

    let mails = ts.mails.lock().unwrap().clone();
    assert_eq!(
        vec![Mail {
            from: "zim@earth.com".to_owned(),
            to: vec!["tallest@irk.com".to_owned(), "gir@irk.com".to_owned()],
            // The receiver unstuffs what the sender's caller stuffed.
            data: b"Subject: round trip\r\n\r\nhello\r\n.stuffed\r\n"
                .to_vec(),
        }],
        mails,
    );
    ts.server.stop().await;
}

#[test]
fn client_round_trip() {
    run_client_round_trip();
}

#[tokio::main(flavor = "current_thread")]
async fn run_serve_facade() {
    crate::init_test_log();

    let mails = Arc::new(Mutex::new(Vec::<Mail>::new()));
    let server = serve("127.0.0.1:0".parse().unwrap(), {
        let mails = Arc::clone(&mails);
        move |mail| {
            mails.lock().unwrap().push(mail.clone());
            Ok(())
        }
    })
    .await
    .unwrap();
    let addr = server.local_addr().await.unwrap();

    let mut io = connect(addr).await;
    read_line(&mut io).await;
    send(&mut io, "HELO x").await;
    send(&mut io, "MAIL FROM:<a@b>").await;
    send(&mut io, "RCPT TO:<c@d>").await;
    send(&mut io, "DATA").await;
    io.write_all(b"one-shot\r\n.\r\n").await.unwrap();
    io.flush().await.unwrap();
    assert_eq!("250 I'll take it", read_line(&mut io).await);

    assert_eq!(1, mails.lock().unwrap().len());
    server.stop().await;
}

#[test]
fn serve_facade() {
    run_serve_facade();
}
