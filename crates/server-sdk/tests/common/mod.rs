//! In-process control plane for integration tests.
//!
//! Accepts WebSocket connections on an ephemeral port, records the
//! connection query, forwards every inbound frame to the test and answers
//! requests through a pluggable responder.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gl_server_sdk::{GeometricBackoff, JitteredGeometricBackoff, SdkSettings, ServerParameters};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// Maps a request frame to an optional reply.  `None` means stay silent.
pub type Responder = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

pub struct ControlPlane {
    pub url: String,
    /// One entry per accepted connection.
    pub conns: mpsc::UnboundedReceiver<PlaneConn>,
    /// Every text frame received on any connection.
    pub frames: mpsc::UnboundedReceiver<Value>,
    pub accepted: Arc<AtomicUsize>,
}

enum Command {
    Send(String),
    DropAbruptly,
}

/// Handle on one accepted connection.
pub struct PlaneConn {
    pub query: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl PlaneConn {
    pub fn push(&self, frame: Value) {
        let _ = self.commands.send(Command::Send(frame.to_string()));
    }

    /// Drop the socket without a close handshake.
    pub fn drop_abruptly(&self) {
        let _ = self.commands.send(Command::DropAbruptly);
    }

    pub fn param(&self, key: &str) -> Option<String> {
        self.query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then(|| v.to_string())
        })
    }
}

impl ControlPlane {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub async fn next_conn(&mut self) -> PlaneConn {
        tokio::time::timeout(Duration::from_secs(5), self.conns.recv())
            .await
            .expect("timeout waiting for a connection")
            .expect("control plane stopped")
    }

    /// Next frame carrying `action`, skipping others.
    pub async fn next_frame(&mut self, action: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            match tokio::time::timeout_at(deadline, self.frames.recv()).await {
                Ok(Some(frame)) if frame["Action"] == action => return frame,
                Ok(Some(_)) => continue,
                Ok(None) => panic!("control plane stopped before {action}"),
                Err(_) => panic!("timeout waiting for {action}"),
            }
        }
    }

    /// Frames already received, without waiting.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            out.push(frame);
        }
        out
    }
}

pub async fn start(responder: Responder) -> ControlPlane {
    start_limited(responder, usize::MAX).await
}

/// Stops listening after `max_connections` accepts, so later connects are
/// refused.
pub async fn start_limited(responder: Responder, max_connections: usize) -> ControlPlane {
    start_with(responder, max_connections, Duration::ZERO).await
}

/// Like [`start_limited`], but every connection after the first waits
/// `handshake_delay` before completing its handshake.
pub async fn start_with(
    responder: Responder,
    max_connections: usize,
    handshake_delay: Duration,
) -> ControlPlane {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (conn_tx, conn_rx) = mpsc::unbounded_channel();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while counter.load(Ordering::SeqCst) < max_connections {
            let Ok((stream, _peer)) = listener.accept().await else {
                break;
            };
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let conn_tx = conn_tx.clone();
            let frame_tx = frame_tx.clone();
            let responder = responder.clone();
            tokio::spawn(async move {
                if index > 0 {
                    tokio::time::sleep(handshake_delay).await;
                }
                let captured = Arc::new(parking_lot::Mutex::new(String::new()));
                let sink_query = captured.clone();
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    *sink_query.lock() = req.uri().query().unwrap_or_default().to_string();
                    Ok(resp)
                };
                let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    return;
                };
                let (mut sink, mut stream) = ws.split();
                let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
                let query = captured.lock().clone();
                let _ = conn_tx.send(PlaneConn {
                    query,
                    commands: cmd_tx,
                });

                loop {
                    tokio::select! {
                        frame = stream.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let Ok(value) = serde_json::from_str::<Value>(&text) else { continue };
                                let _ = frame_tx.send(value.clone());
                                if let Some(reply) = responder(&value) {
                                    if sink.send(Message::Text(reply.to_string())).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                            Some(Ok(_)) => {}
                        },
                        cmd = cmd_rx.recv() => match cmd {
                            Some(Command::Send(text)) => {
                                if sink.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Command::DropAbruptly) => return,
                            None => {}
                        },
                    }
                }
            });
        }
    });

    ControlPlane {
        url: format!("ws://{addr}"),
        conns: conn_rx,
        frames: frame_rx,
        accepted,
    }
}

// ── Responders ───────────────────────────────────────────────────────

/// Success reply for `req`, merged with `extra` fields.
pub fn reply(req: &Value, status: i32, extra: Value) -> Value {
    let mut out = json!({
        "Action": req["Action"],
        "RequestId": req["RequestId"],
        "StatusCode": status,
    });
    if let (Some(out), Some(extra)) = (out.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

pub fn always_ok() -> Responder {
    Arc::new(|req: &Value| Some(reply(req, 200, json!({}))))
}

pub fn silent() -> Responder {
    Arc::new(|_: &Value| None)
}

// ── Settings ─────────────────────────────────────────────────────────

pub fn fast_settings() -> SdkSettings {
    SdkSettings {
        service_call_timeout: Duration::from_millis(300),
        connect_timeout: Duration::from_secs(2),
        connect_backoff: GeometricBackoff {
            max_attempts: 2,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(50),
            backoff_factor: 2,
        },
        send_backoff: JitteredGeometricBackoff {
            max_attempts: 5,
            initial_ceiling: Duration::from_millis(20),
            min_delay: Duration::from_millis(5),
            backoff_factor: 2,
        },
        wait_for_reconnect_attempts: 3,
        wait_for_reconnect_delay: Duration::from_millis(20),
        health_check_interval: Duration::from_secs(60),
        health_check_jitter: Duration::ZERO,
        health_check_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

pub fn server_params(url: &str) -> ServerParameters {
    ServerParameters::new()
        .websocket_url(url)
        .process_id("process-1")
        .host_id("host-1")
        .fleet_id("fleet-1")
        .auth_token("token-1")
}
