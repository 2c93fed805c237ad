//! JSON-over-WebSocket bridge between out-of-process clients and the
//! internal [`EventBus`].
//!
//! Every frame on the socket is a JSON object of the form
//!
//! ```text
//! { "topic": "/yolo/detections", "msg": { ...message fields... } }
//! ```
//!
//! * **Inbound** frames addressed to one of the input topics (camera info,
//!   depth image, 2-D detections) are decoded and published on the bus.
//!   Anything else is dropped.
//! * **Outbound**: each connected client holds a subscription on
//!   [`Topic::Detections3d`] for as long as it is connected, so it counts as
//!   an output consumer, and receives every fused batch.
//!
//! The bridge is agnostic about the meaning of the data it routes; it only
//! handles serialisation and transport.

use std::net::SocketAddr;
use std::sync::Arc;

use detect3d_types::{Event, EventPayload, FusionError};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, Topic, TopicNames};

/// One frame on the socket.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireMessage {
    pub topic: String,
    pub msg: serde_json::Value,
}

/// Bridge between WebSocket clients and the internal [`EventBus`].
#[derive(Clone)]
pub struct WsBridge {
    bus: Arc<EventBus>,
    topics: Arc<TopicNames>,
}

impl WsBridge {
    /// Create a new bridge backed by `bus`, using `topics` to translate
    /// between external names and bus topics.
    pub fn new(bus: Arc<EventBus>, topics: TopicNames) -> Self {
        Self {
            bus,
            topics: Arc::new(topics),
        }
    }

    /// Bind `addr` and serve clients until a fatal error.
    ///
    /// # Errors
    ///
    /// Returns [`FusionError::Channel`] if the TCP listener cannot be bound.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), FusionError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| FusionError::Channel(format!("ws bind error on {addr}: {e}")))?;
        info!(%addr, "websocket bridge listening");
        self.serve(listener).await
    }

    /// Accept clients from an already bound `listener`.
    pub async fn serve(self, listener: TcpListener) -> Result<(), FusionError> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), FusionError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| FusionError::Channel(format!("ws handshake from {peer}: {e}")))?;
        debug!(peer = %peer, "ws client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut rx = self.bus.subscribe_to(Topic::Detections3d);

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            let Some(json) = self.encode_outgoing(&event)? else {
                                continue;
                            };
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!(peer = %peer, lagged_by = n, "ws client lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        Some(Ok(Message::Text(text))) => {
                            self.handle_incoming_ws_message(text.as_str());
                        }
                        _ => {}
                    }
                }
            }
        }

        debug!(peer = %peer, "ws client disconnected");
        Ok(())
    }

    fn encode_outgoing(&self, event: &Event) -> Result<Option<String>, FusionError> {
        let EventPayload::Detections3d(batch) = &event.payload else {
            return Ok(None);
        };
        let wire = WireMessage {
            topic: self.topics.detections_3d.clone(),
            msg: serde_json::to_value(batch).map_err(|e| FusionError::Serialization(e.to_string()))?,
        };
        serde_json::to_string(&wire)
            .map(Some)
            .map_err(|e| FusionError::Serialization(e.to_string()))
    }

    /// Decode one inbound text frame and publish it on the bus.
    ///
    /// Returns the topic the frame was published to, or `None` when it was
    /// malformed, addressed to an unknown or output topic, or nobody was
    /// listening.
    fn handle_incoming_ws_message(&self, text: &str) -> Option<Topic> {
        let wire: WireMessage = match serde_json::from_str(text) {
            Ok(wire) => wire,
            Err(e) => {
                debug!(error = %e, "ignoring malformed ws frame");
                return None;
            }
        };

        let Some(topic) = self.topics.resolve(&wire.topic) else {
            debug!(topic = %wire.topic, "ignoring ws frame for unknown topic");
            return None;
        };

        let payload = match topic {
            Topic::CameraInfo => serde_json::from_value(wire.msg).map(EventPayload::CameraInfo),
            Topic::DepthImage => serde_json::from_value(wire.msg).map(EventPayload::DepthImage),
            Topic::Detections2d => serde_json::from_value(wire.msg).map(EventPayload::Detections2d),
            Topic::Detections3d => {
                debug!(topic = %wire.topic, "ignoring inbound frame on output topic");
                return None;
            }
        };

        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                debug!(topic = %wire.topic, error = %e, "ignoring undecodable ws payload");
                return None;
            }
        };

        let event = Event::new(wire.topic, payload);
        match self.bus.publish_to(topic, event) {
            Ok(_) => Some(topic),
            Err(e) => {
                debug!(error = %e, "inbound ws frame had no listener");
                None
            }
        }
    }
}
