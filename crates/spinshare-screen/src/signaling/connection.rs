//! Background WebSocket connection loop with auto-reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use spinshare_common::{ClientFrame, RelayFrame, Signal};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::RelayClientConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Why a connected session ended.
enum SessionExit {
    /// Socket dropped; reconnect.
    Dropped,
    /// `disconnect()` was called.
    Shutdown,
    /// Every client handle or the signal receiver is gone.
    ClientGone,
    /// Another sender took over the room; reconnecting would take it back.
    Replaced,
}

enum Step {
    Shutdown,
    Outbound(Option<ClientFrame>),
    Inbound(Option<Result<WsMessage, WsError>>),
}

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

pub(crate) async fn connection_loop(
    config: RelayClientConfig,
    connected: Arc<AtomicBool>,
    signal_tx: mpsc::Sender<Signal>,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientFrame>,
    shutdown: CancellationToken,
) {
    let mut reconnect_delay = config.reconnect_delay_secs;

    loop {
        info!(url = %config.url, room = %config.room_id, "Connecting to relay");

        let attempt = tokio::select! {
            _ = shutdown.cancelled() => return,
            r = tokio::time::timeout(
                CONNECT_TIMEOUT,
                tokio_tungstenite::connect_async(config.url.as_str()),
            ) => r,
        };

        match attempt {
            Ok(Ok((mut ws, _))) => {
                reconnect_delay = config.reconnect_delay_secs;

                // Anything queued while offline is stale.
                while outbound_rx.try_recv().is_ok() {}

                match send_frame(&mut ws, &config.hello()).await {
                    Ok(()) => {
                        connected.store(true, Ordering::Release);
                        let exit =
                            session_loop(&mut ws, &mut outbound_rx, &signal_tx, &shutdown).await;
                        connected.store(false, Ordering::Release);
                        match exit {
                            SessionExit::Dropped => {}
                            SessionExit::Shutdown => {
                                let _ = ws.send(WsMessage::Close(None)).await;
                                info!("Relay connection closed");
                                return;
                            }
                            SessionExit::ClientGone => return,
                            SessionExit::Replaced => {
                                let _ = ws.send(WsMessage::Close(None)).await;
                                error!(room = %config.room_id, "Another sender took over the room; not reconnecting");
                                return;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to send hello"),
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to relay");
            }
            Err(_elapsed) => {
                error!("Relay connection timed out after 15s");
            }
        }

        // Exponential backoff reconnect.
        info!(
            delay = reconnect_delay,
            "Reconnecting in {} seconds", reconnect_delay
        );
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(reconnect_delay)) => {}
        }
        reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay_secs);
    }
}

async fn session_loop<S>(
    ws: &mut S,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientFrame>,
    signal_tx: &mpsc::Sender<Signal>,
    shutdown: &CancellationToken,
) -> SessionExit
where
    S: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Unpin,
{
    loop {
        let step = tokio::select! {
            _ = shutdown.cancelled() => Step::Shutdown,
            frame = outbound_rx.recv() => Step::Outbound(frame),
            msg = ws.next() => Step::Inbound(msg),
        };

        match step {
            Step::Shutdown => return SessionExit::Shutdown,
            Step::Outbound(None) => return SessionExit::ClientGone,
            Step::Outbound(Some(frame)) => {
                if let Err(e) = send_frame(ws, &frame).await {
                    warn!(error = %e, "WebSocket send failed");
                    return SessionExit::Dropped;
                }
            }
            Step::Inbound(Some(Ok(WsMessage::Text(text)))) => match RelayFrame::from_json(&text) {
                Ok(RelayFrame::Ready { room_id }) => {
                    info!(room = %room_id, "Joined relay room");
                }
                Ok(RelayFrame::Signal { signal, .. }) => {
                    if signal_tx.send(signal).await.is_err() {
                        return SessionExit::ClientGone;
                    }
                }
                Ok(frame) if frame.is_sender_replaced() => return SessionExit::Replaced,
                Ok(RelayFrame::Error { message }) => {
                    warn!(%message, "Relay reported an error");
                }
                Err(e) => {
                    debug!(error = %e, "Unrecognized frame from relay");
                }
            },
            Step::Inbound(Some(Ok(WsMessage::Close(_)))) | Step::Inbound(None) => {
                info!("Relay closed connection");
                return SessionExit::Dropped;
            }
            Step::Inbound(Some(Err(e))) => {
                warn!(error = %e, "WebSocket error");
                return SessionExit::Dropped;
            }
            Step::Inbound(Some(Ok(_))) => {}
        }
    }
}

async fn send_frame<S>(ws: &mut S, frame: &ClientFrame) -> Result<(), WsError>
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    match frame.to_json() {
        Ok(json) => ws.send(WsMessage::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "Failed to encode frame");
            Ok(())
        }
    }
}
