//! WebSocket replication proxying.
//!
//! A WebSocket client replicates archives through the gateway: the upgrade
//! opens a replication stream against the swarm adapter and pipes binary
//! frames both ways. Admission of the addressed archive runs concurrently;
//! the pipe is established first, since the replication protocol tolerates
//! empty exchange until the archive's feeds are loaded.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

use dat_gateway_swarm::ReplicationStream;

use crate::state::GatewayState;

/// Read buffer for the swarm side of the pipe.
const PIPE_BUFFER: usize = 16 * 1024;

/// Refuse an upgrade that carries no archive address.
pub fn missing_key(upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(|mut socket| async move {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "Must provide archive key".into(),
            })))
            .await;
    })
}

/// Upgrade and proxy replication for the addressed archive.
pub fn replicate(state: GatewayState, upgrade: WebSocketUpgrade, address: String) -> Response {
    upgrade.on_upgrade(move |socket| run(state, socket, address))
}

async fn run(state: GatewayState, socket: WebSocket, address: String) {
    tracing::debug!(address = %address, "websocket replication opened");

    let stream = state.swarm.replicate();

    // Join the swarm concurrently so the pipe has something to replicate.
    // The registry's admission continues even if this connection dies.
    let admit: JoinHandle<Result<(), String>> = tokio::spawn({
        let state = state.clone();
        let address = address.clone();
        async move {
            let key = state
                .resolver
                .resolve(&address)
                .await
                .map_err(|e| e.to_string())?;
            state
                .registry
                .get_or_admit(key)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
    });

    pump(socket, stream, admit).await;
    tracing::debug!(address = %address, "websocket replication closed");
}

/// Pipe bytes between the client socket and the replication stream until
/// either side closes. Peer errors tear down this connection only.
async fn pump(
    socket: WebSocket,
    stream: ReplicationStream,
    mut admit: JoinHandle<Result<(), String>>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (mut rd, mut wr) = tokio::io::split(stream);
    let mut buf = vec![0u8; PIPE_BUFFER];
    let mut admit_done = false;

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    if wr.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "websocket peer error");
                    break;
                }
            },
            read = rd.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if ws_tx
                        .send(Message::Binary(buf[..n].to_vec()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            },
            result = &mut admit, if !admit_done => {
                admit_done = true;
                if let Ok(Err(reason)) = result {
                    tracing::debug!(reason = %reason, "websocket admission failed");
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::ERROR,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    }
}
