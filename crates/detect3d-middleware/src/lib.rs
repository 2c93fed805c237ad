//! `detect3d-middleware` – message transport.
//!
//! Routes depth frames, detection batches and calibration between producers
//! and the fusion node without caring about the data's meaning.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.  Its per-topic subscriber count is the
//!   consumer query used to gate output.
//! - [`ws_bridge`] – JSON-over-WebSocket bridge that lets out-of-process
//!   producers feed the input topics and consumers receive fused batches.

pub mod bus;
pub mod ws_bridge;

pub use bus::{EventBus, Topic, TopicNames, TopicReceiver};
pub use ws_bridge::{WireMessage, WsBridge};
