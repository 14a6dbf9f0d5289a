//! Per-connection handler: hello, join the room, then route signals.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use spinshare_common::{ClientFrame, PeerId, PeerRole, RelayFrame};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use crate::room::RoomStore;

/// How long a client has to send its hello.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

struct Hello {
    room_id: String,
    peer_id: PeerId,
    role: PeerRole,
}

/// Handle a single WebSocket connection.
pub async fn handle_connection(ws: WebSocketStream<TcpStream>, addr: SocketAddr, store: RoomStore) {
    let (mut sink, mut stream) = ws.split();

    // 1. Identify the client.
    let Some(Hello {
        room_id,
        peer_id,
        role,
    }) = read_hello(&mut stream, &mut sink, addr).await
    else {
        return;
    };

    // 2. Join the room with a fresh outbound channel.
    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::channel::<RelayFrame>(256);
    if let Err(e) = store.join(&room_id, peer_id.clone(), role, conn_id, tx).await {
        tracing::warn!(peer = %addr, room = %room_id, error = %e, "Join rejected");
        let _ = send_frame(&mut sink, &RelayFrame::Error { message: e.to_string() }).await;
        return;
    }

    tracing::info!(
        peer = %addr,
        room = %room_id,
        peer_id = %peer_id,
        role = ?role,
        "Client joined"
    );

    // 3. Confirm. Anything the join queued for us follows it.
    if send_frame(
        &mut sink,
        &RelayFrame::Ready {
            room_id: room_id.clone(),
        },
    )
    .await
    .is_err()
    {
        store.leave(&room_id, &peer_id, role, conn_id).await;
        return;
    }

    // 4. Routing loop.
    loop {
        tokio::select! {
            // Frames for this client. `None` means the store let go of us:
            // replaced by a newer connection or the room was reaped.
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if send_frame(&mut sink, &frame).await.is_err() {
                        break;
                    }
                }
                None => {
                    tracing::debug!(peer = %addr, room = %room_id, "Dropped by room store");
                    break;
                }
            },

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match ClientFrame::from_json(&text) {
                        Ok(ClientFrame::Signal { to, signal }) => {
                            let event = signal.name();
                            match store.route(&room_id, &peer_id, role, to, signal).await {
                                Ok(reached) => {
                                    tracing::debug!(room = %room_id, from = %peer_id, event, reached, "Routed");
                                }
                                Err(e) => {
                                    tracing::warn!(room = %room_id, from = %peer_id, event, error = %e, "Signal rejected");
                                    let _ = send_frame(&mut sink, &RelayFrame::Error { message: e.to_string() }).await;
                                }
                            }
                        }
                        Ok(ClientFrame::Hello { .. }) => {
                            let _ = send_frame(
                                &mut sink,
                                &RelayFrame::Error { message: "already joined".into() },
                            )
                            .await;
                        }
                        Err(e) => {
                            tracing::debug!(peer = %addr, error = %e, "Bad frame");
                            let _ = send_frame(&mut sink, &RelayFrame::Error { message: e.to_string() }).await;
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // 5. Cleanup.
    tracing::info!(
        peer = %addr,
        room = %room_id,
        peer_id = %peer_id,
        role = ?role,
        "Client disconnected"
    );
    store.leave(&room_id, &peer_id, role, conn_id).await;
}

/// Read and parse the first message as a hello.
async fn read_hello(stream: &mut WsStream, sink: &mut WsSink, addr: SocketAddr) -> Option<Hello> {
    let frame = tokio::time::timeout(HELLO_TIMEOUT, stream.next()).await;

    match frame {
        Ok(Some(Ok(Message::Text(text)))) => match ClientFrame::from_json(&text) {
            Ok(ClientFrame::Hello {
                room_id,
                peer_id,
                role,
            }) => Some(Hello {
                room_id,
                peer_id,
                role,
            }),
            Ok(ClientFrame::Signal { .. }) => {
                tracing::warn!(peer = %addr, "Signal before hello");
                let _ = send_frame(sink, &RelayFrame::Error { message: "expected hello".into() }).await;
                None
            }
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "Invalid hello message");
                let _ = send_frame(sink, &RelayFrame::Error { message: e.to_string() }).await;
                None
            }
        },
        Ok(Some(Ok(_))) => {
            tracing::warn!(peer = %addr, "Expected text hello, got binary");
            None
        }
        Ok(Some(Err(e))) => {
            tracing::warn!(peer = %addr, error = %e, "WS error during hello");
            None
        }
        Ok(None) => {
            tracing::debug!(peer = %addr, "Connection closed before hello");
            None
        }
        Err(_) => {
            tracing::warn!(peer = %addr, "Hello timeout (10s)");
            None
        }
    }
}

/// Send a relay frame as a JSON text message.
async fn send_frame(sink: &mut WsSink, frame: &RelayFrame) -> Result<(), WsError> {
    match frame.to_json() {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode relay frame");
            Ok(())
        }
    }
}
