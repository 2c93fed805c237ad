//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::CameraInfo`] | Calibration of the depth camera, usually once |
//! | [`Topic::DepthImage`] | Raw depth frames (`16UC1` / `32FC1`) |
//! | [`Topic::Detections2d`] | Batches of image-space detections |
//! | [`Topic::Detections3d`] | Fused 3-D detection batches (output) |

use detect3d_types::{Event, FusionError};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 64;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Camera calibration.
    CameraInfo,
    /// Depth frames.
    DepthImage,
    /// 2-D detection batches.
    Detections2d,
    /// 3-D detection batches produced by the fusion node.
    Detections3d,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::CameraInfo,
        Topic::DepthImage,
        Topic::Detections2d,
        Topic::Detections3d,
    ];
}

/// External names of the bus topics, as seen by remote producers and
/// consumers.
///
/// Defaults follow the usual RealSense / YOLO topic layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicNames {
    pub camera_info: String,
    pub depth_image: String,
    pub detections_2d: String,
    pub detections_3d: String,
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            camera_info: "/camera/depth/camera_info".to_string(),
            depth_image: "/camera/depth/image_raw".to_string(),
            detections_2d: "/yolo/detections".to_string(),
            detections_3d: "/yolo/detections_3d".to_string(),
        }
    }
}

impl TopicNames {
    /// External name of `topic`.
    pub fn name_of(&self, topic: Topic) -> &str {
        match topic {
            Topic::CameraInfo => &self.camera_info,
            Topic::DepthImage => &self.depth_image,
            Topic::Detections2d => &self.detections_2d,
            Topic::Detections3d => &self.detections_3d,
        }
    }

    /// Resolve an external name back to its [`Topic`].
    pub fn resolve(&self, name: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| self.name_of(*t) == name)
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    camera_info: broadcast::Sender<Event>,
    depth_image: broadcast::Sender<Event>,
    detections_2d: broadcast::Sender<Event>,
    detections_3d: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero (a [`broadcast::channel`] restriction).
    pub fn new(capacity: usize) -> Self {
        let (camera_info, _) = broadcast::channel(capacity);
        let (depth_image, _) = broadcast::channel(capacity);
        let (detections_2d, _) = broadcast::channel(capacity);
        let (detections_3d, _) = broadcast::channel(capacity);
        Self {
            camera_info,
            depth_image,
            detections_2d,
            detections_3d,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    ///
    /// # Errors
    ///
    /// Returns [`FusionError::Channel`] when no subscriber is listening on
    /// the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, FusionError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| FusionError::Channel(format!("no subscribers for topic {topic:?}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live receivers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::CameraInfo => &self.camera_info,
            Topic::DepthImage => &self.depth_image,
            Topic::Detections2d => &self.detections_2d,
            Topic::Detections3d => &self.detections_3d,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`]. Dropping it decrements the
/// topic's [`subscriber_count`][EventBus::subscriber_count].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
