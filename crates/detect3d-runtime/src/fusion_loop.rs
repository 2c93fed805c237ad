//! [`FusionLoop`] – drives a [`FusionNode`] from the event bus.
//!
//! The loop subscribes to the three input topics and feeds every event to the
//! node, one at a time, until the shutdown signal flips to `true`.  Camera
//! info is always drained before depth frames and detections so a calibration
//! that is already queued applies to the pairs queued behind it.  Depth
//! frames and detection batches take turns, so a backlog on both inputs
//! reaches the synchronizer interleaved rather than one stream at a time.

use detect3d_middleware::{EventBus, Topic, TopicReceiver};
use detect3d_types::Event;
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::{debug, info, warn};

use crate::fusion_node::{DetectionSink, FusionNode};

/// Event loop around a [`FusionNode`].
pub struct FusionLoop<S> {
    node: FusionNode<S>,
    camera_info: TopicReceiver,
    depth_image: TopicReceiver,
    detections: TopicReceiver,
}

impl<S: DetectionSink> FusionLoop<S> {
    /// Subscribe to the input topics of `bus`.
    ///
    /// Events published before this call are not seen by the loop.
    pub fn new(bus: &EventBus, node: FusionNode<S>) -> Self {
        Self {
            node,
            camera_info: bus.subscribe_to(Topic::CameraInfo),
            depth_image: bus.subscribe_to(Topic::DepthImage),
            detections: bus.subscribe_to(Topic::Detections2d),
        }
    }

    pub fn node(&self) -> &FusionNode<S> {
        &self.node
    }

    /// Process events until `shutdown` turns `true` (or its sender is
    /// dropped), then hand the node back.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> FusionNode<S> {
        info!("fusion loop started");
        let mut depth_first = true;
        loop {
            let (first, second) = if depth_first {
                (&mut self.depth_image, &mut self.detections)
            } else {
                (&mut self.detections, &mut self.depth_image)
            };
            let received = tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                event = self.camera_info.recv() => (Topic::CameraInfo, event),
                received = next_input(first, second) => received,
            };

            match received.0 {
                Topic::DepthImage => depth_first = false,
                Topic::Detections2d => depth_first = true,
                _ => {}
            }

            match received {
                (_, Ok(event)) => self.dispatch(event),
                (topic, Err(RecvError::Lagged(skipped))) => {
                    warn!(?topic, skipped, "fusion loop lagged, messages skipped");
                }
                (topic, Err(RecvError::Closed)) => {
                    warn!(?topic, "input channel closed, stopping fusion loop");
                    break;
                }
            }
        }

        let stats = self.node.stats();
        info!(
            cycles = stats.cycles,
            published = stats.published_batches,
            "fusion loop stopped"
        );
        self.node
    }

    fn dispatch(&mut self, event: Event) {
        if let Some(outcome) = self.node.handle_event(event) {
            debug!(?outcome, "fusion cycle finished");
        }
    }
}

/// Next event from whichever of two receivers is ready, `first` winning when
/// both are.
async fn next_input(
    first: &mut TopicReceiver,
    second: &mut TopicReceiver,
) -> (Topic, Result<Event, RecvError>) {
    let (first_topic, second_topic) = (first.topic(), second.topic());
    tokio::select! {
        biased;

        event = first.recv() => (first_topic, event),
        event = second.recv() => (second_topic, event),
    }
}
