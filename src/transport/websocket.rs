//! WebSocket connector built on tokio-tungstenite.
//!
//! Each successful dial splits the socket into a writer task that drains the outbound
//! queue and a reader task that turns frames into [`LinkEvent`]s. Dropping the outbound
//! sender makes the writer flush what is left and send a close frame.

use super::protocol::{ClientEvent, ServerEvent};
use super::{Connector, Link, LinkEvent};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn dial(&self, endpoint: &str) -> BoxFuture<'static, Result<Link, String>> {
        let endpoint = endpoint.to_string();
        Box::pin(async move {
            let (stream, response) = connect_async(endpoint.as_str())
                .await
                .map_err(|e| format!("WebSocket connect to {} failed: {}", endpoint, e))?;
            debug!(status = %response.status(), endpoint = %endpoint, "WebSocket handshake complete");

            let (mut write, mut read) = stream.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<LinkEvent>();

            tokio::spawn(async move {
                while let Some(event) = out_rx.recv().await {
                    let text = match event.to_text() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(event = event.name(), error = %e, "Failed to encode outbound event");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(text)).await {
                        warn!(error = %e, "WebSocket write failed");
                        return;
                    }
                }
                let _ = write.close().await;
                debug!("WebSocket writer finished");
            });

            tokio::spawn(async move {
                let reason = loop {
                    let frame = match read.next().await {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => break e.to_string(),
                        None => break "connection ended".to_string(),
                    };

                    let event = match frame {
                        Message::Text(text) => match ServerEvent::from_text(&text) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(error = %e, "Ignoring malformed text frame");
                                continue;
                            }
                        },
                        Message::Binary(bytes) => ServerEvent::from_binary(bytes),
                        Message::Close(frame) => {
                            break frame
                                .map(|f| format!("closed by remote ({}): {}", f.code, f.reason))
                                .unwrap_or_else(|| "closed by remote".to_string());
                        }
                        _ => continue,
                    };

                    if in_tx.send(LinkEvent::Message(event)).is_err() {
                        return;
                    }
                };
                let _ = in_tx.send(LinkEvent::Closed(reason));
            });

            Ok(Link {
                outbound: out_tx,
                inbound: in_rx,
            })
        })
    }
}
