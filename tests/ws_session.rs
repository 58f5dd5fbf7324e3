//! Session against a real local websocket server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use solarlink::wire::{self, Action};
use solarlink::{
    AttemptError, ConnectionState, Device, HandshakeError, NullSink, RetryPolicy, Session, SessionConfig, SessionError,
    TransportError,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

const MAC: &str = "34:B7:00:00:00:01";

type ServerWs = WebSocketStream<TcpStream>;

/// Serve `connections` sockets in order, each with `script`. Returns the URL.
async fn serve<F, Fut>(connections: usize, script: F) -> String
where
    F: Fn(usize, ServerWs) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        for index in 0..connections {
            let (stream, _) = listener.accept().await.expect("accept");
            let ws = accept_async(stream).await.expect("websocket handshake");
            tokio::spawn(script(index, ws));
        }
    });
    format!("ws://{addr}/")
}

async fn next_text(ws: &mut ServerWs) -> Option<String> {
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

async fn send_text(ws: &mut ServerWs, text: String) {
    ws.send(Message::Text(text.into())).await.expect("server send");
}

fn welcome(client_id: &str) -> String {
    format!(r#"{{"code":200,"time_stamp":1717000000,"client_id":"{client_id}"}}"#)
}

fn batch(action: &str, records: &[(i64, &str, &str)]) -> String {
    let data = records
        .iter()
        .map(|(id, unikey, value)| {
            format!(
                r#"{{"name":"{unikey}","unikey":"{unikey}","definition":"[]","product_id":"1","property_id":{id},"machine_id":"9","value":{value},"createtime":"2024-05-29 12:00:00"}}"#
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    format!(r#"{{"code":200,"time_stamp":1717000001,"Action":"{action}","data":[{data}]}}"#)
}

fn config(url: String) -> SessionConfig {
    SessionConfig::default()
        .with_url(url)
        .with_connect_timeout(Duration::from_secs(2))
        .with_handshake_timeout(Duration::from_secs(2))
        .with_command_timeout(Duration::from_secs(2))
        .with_retry(RetryPolicy::never())
}

#[tokio::test]
async fn machine_info_over_real_socket() {
    let url = serve(1, |_, mut ws| async move {
        send_text(&mut ws, welcome("7f0000010b11")).await;
        while let Some(frame) = next_text(&mut ws).await {
            let command = wire::decode_command(&frame).expect("client sends commands");
            assert_eq!(command.mac(), MAC);
            let reply = match command.action() {
                Action::GetMachinInfoOne => batch("getMachinInfoOne", &[(22, "cddl", "1.5"), (21, "dianya", "13.1")]),
                Action::GetMachinInfoTwo => batch("getMachinInfoTwo", &[(35, "moshi", "3")]),
                Action::SetPropertyData => r#"{"code":200,"Action":"setPropertyData","data":[]}"#.to_owned(),
            };
            send_text(&mut ws, reply).await;
        }
    })
    .await;

    let session = Session::new(config(url), Arc::new(NullSink));
    let id = session.connect().await.expect("connect");
    assert_eq!(id.as_str(), "7f0000010b11");

    let device = Device::new(&session, MAC);
    let records = device.machine_info().await.expect("machine info");
    let ids = records.iter().map(|r| r.property_id).collect::<Vec<_>>();
    assert_eq!(ids, vec![21, 22, 35]);
    assert_eq!(records[0].value.as_f64(), Some(13.1));

    assert_eq!(device.charge_mode().await.expect("mode"), wire::ChargeMode::Continuous);

    session.close().await;
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn silent_server_is_retried_then_given_up() {
    let (held_tx, _held_rx) = tokio::sync::mpsc::unbounded_channel::<ServerWs>();
    let url = serve(2, move |_, ws| {
        let held = held_tx.clone();
        async move {
            // Keep the socket open and say nothing.
            held.send(ws).ok();
        }
    })
    .await;

    let config = config(url)
        .with_handshake_timeout(Duration::from_millis(200))
        .with_retry(RetryPolicy::Fixed { delay: Duration::from_millis(50), max_attempts: 2 });
    let session = Session::new(config, Arc::new(NullSink));

    let err = session.connect().await.expect_err("silence should fail");
    let SessionError::Connect { attempts, last_state, last_error, .. } = err else {
        panic!("expected connect error");
    };
    assert_eq!(attempts, 2);
    assert_eq!(last_state, ConnectionState::AwaitingWelcome);
    assert!(matches!(*last_error, AttemptError::Handshake(HandshakeError::Timeout(_))));
    assert_eq!(session.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn refused_port_fails_to_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let session = Session::new(config(format!("ws://{addr}/")), Arc::new(NullSink));
    let err = session.connect().await.expect_err("nothing listens");
    let SessionError::Connect { attempts, last_state, last_error, .. } = err else {
        panic!("expected connect error");
    };
    assert_eq!(attempts, 1);
    assert_eq!(last_state, ConnectionState::Connecting);
    assert!(matches!(*last_error, AttemptError::Transport(TransportError::Connect(_))));
}

#[tokio::test]
async fn server_close_fails_pending_command() {
    let url = serve(1, |_, mut ws| async move {
        send_text(&mut ws, welcome("abc")).await;
        next_text(&mut ws).await;
        ws.close(None).await.ok();
        while ws.next().await.is_some() {}
    })
    .await;

    let session = Session::new(config(url).with_command_timeout(Duration::from_secs(5)), Arc::new(NullSink));
    session.connect().await.expect("connect");

    let err = session
        .send_command_default(&wire::Command::get_machin_info_two(MAC))
        .await
        .expect_err("server hung up");
    assert!(matches!(err, SessionError::ConnectionLost { action: Action::GetMachinInfoTwo, .. }));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.pending_len(), 0);
}

#[tokio::test]
async fn close_sends_close_frame() {
    let (saw_close_tx, saw_close_rx) = oneshot::channel();
    let saw_close_tx = std::sync::Mutex::new(Some(saw_close_tx));
    let url = serve(1, move |_, mut ws| {
        let reporter = saw_close_tx.lock().expect("lock").take();
        async move {
            send_text(&mut ws, welcome("abc")).await;
            let saw_close = matches!(ws.next().await, Some(Ok(Message::Close(_))));
            if let Some(reporter) = reporter {
                reporter.send(saw_close).ok();
            }
        }
    })
    .await;

    let session = Session::new(config(url), Arc::new(NullSink));
    session.connect().await.expect("connect");
    session.close().await;
    session.close().await;

    let saw_close = tokio::time::timeout(Duration::from_secs(5), saw_close_rx)
        .await
        .expect("server should report")
        .expect("reporter kept");
    assert!(saw_close);
    assert_eq!(session.state(), ConnectionState::Closed);
}
