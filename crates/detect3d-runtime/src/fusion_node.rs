//! [`FusionNode`] – the fusion controller.
//!
//! Owns the synchronizer and the back-projector, shares the
//! [`CameraModelStore`] and decides what happens to every matched pair:
//!
//! 1. **Calibration gate** – until a camera model is stored the node is in
//!    [`NodeState::AwaitingCalibration`] and discards every pair with a
//!    `NotReady` warning.  The first stored model moves it to
//!    [`NodeState::Ready`] for good.
//! 2. **Back-projection** – frames whose encoding carries no depth are
//!    discarded with an error report; otherwise every detection with a depth
//!    reading becomes a 3-D detection.
//! 3. **Output gate** – a batch is published only when it is non-empty and
//!    the sink has at least one consumer.  Neither case is an error.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use detect3d_runtime::fusion_node::{CycleOutcome, DetectionSink, FusionNode};
//! use detect3d_types::{CameraInfo, DepthFrame, Detection2DArray, Detection3DArray, FusionError, Header};
//!
//! struct Nobody;
//! impl DetectionSink for Nobody {
//!     fn consumer_count(&self) -> usize { 0 }
//!     fn publish(&self, _: Detection3DArray) -> Result<usize, FusionError> { Ok(0) }
//! }
//!
//! let mut node = FusionNode::new(Default::default(), Default::default(), Nobody);
//! node.on_camera_info(&CameraInfo::pinhole(4, 4, 2.0, 2.0, 2.0, 2.0)).unwrap();
//!
//! let header = Header::new(Utc::now(), "camera");
//! assert!(node.on_depth_frame(DepthFrame::from_float32(header.clone(), 4, 4, &[1.0; 16])).is_none());
//! let outcome = node.on_detections(Detection2DArray { header, detections: vec![] });
//! assert_eq!(outcome, Some(CycleOutcome::Empty));
//! ```

use std::sync::Arc;

use detect3d_middleware::{EventBus, Topic};
use detect3d_perception::{ApproximateTimeSynchronizer, BackProjector, CameraModelStore, PinholeCameraModel, SyncConfig};
use detect3d_types::{
    CameraInfo, DepthFrame, Detection2DArray, Detection3DArray, Event, EventPayload, FusionError,
    MatchedPair,
};
use tracing::{debug, error, info, instrument, warn};

use crate::config::FusionConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Output interface
// ─────────────────────────────────────────────────────────────────────────────

/// Where fused batches go.
pub trait DetectionSink {
    /// Number of consumers currently attached to the output.
    fn consumer_count(&self) -> usize;

    /// Hand a batch to the consumers; returns how many received it.
    fn publish(&self, batch: Detection3DArray) -> Result<usize, FusionError>;
}

/// Publishes batches on [`Topic::Detections3d`] of an [`EventBus`].
#[derive(Debug, Clone)]
pub struct BusSink {
    bus: EventBus,
    source: String,
}

impl BusSink {
    /// `source` is the external topic name stamped on each event.
    pub fn new(bus: EventBus, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
        }
    }
}

impl DetectionSink for BusSink {
    fn consumer_count(&self) -> usize {
        self.bus.subscriber_count(Topic::Detections3d)
    }

    fn publish(&self, batch: Detection3DArray) -> Result<usize, FusionError> {
        let event = Event::new(self.source.clone(), EventPayload::Detections3d(batch));
        self.bus.publish_to(Topic::Detections3d, event)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// Calibration state of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    AwaitingCalibration,
    Ready,
}

/// What happened to one matched pair.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// A batch with this many detections was published.
    Published(usize),
    /// Detections were computed but nobody was listening.
    NoConsumers(usize),
    /// No detection had a depth reading.
    Empty,
    /// The pair was discarded before back-projection.
    Rejected(FusionError),
}

/// Running counters, one per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FusionStats {
    pub calibrations: u64,
    pub rejected_calibrations: u64,
    pub cycles: u64,
    pub published_batches: u64,
    pub published_detections: u64,
    pub no_consumers: u64,
    pub empty: u64,
    pub not_ready: u64,
    pub unsupported_encoding: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// FusionNode
// ─────────────────────────────────────────────────────────────────────────────

/// Pairs depth frames with detection batches and publishes 3-D detections.
pub struct FusionNode<S> {
    state: NodeState,
    models: Arc<CameraModelStore>,
    projector: BackProjector,
    sync: ApproximateTimeSynchronizer<DepthFrame, Detection2DArray>,
    sink: S,
    stats: FusionStats,
}

impl<S: DetectionSink> FusionNode<S> {
    pub fn new(sync: SyncConfig, projector: BackProjector, sink: S) -> Self {
        Self {
            state: NodeState::AwaitingCalibration,
            models: Arc::new(CameraModelStore::new()),
            projector,
            sync: ApproximateTimeSynchronizer::new(sync),
            sink,
            stats: FusionStats::default(),
        }
    }

    pub fn from_config(config: &FusionConfig, sink: S) -> Self {
        Self::new(config.sync.to_sync_config(), config.back_projector(), sink)
    }

    /// Shared handle on the camera model store.
    pub fn models(&self) -> Arc<CameraModelStore> {
        Arc::clone(&self.models)
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn stats(&self) -> FusionStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Queued (depth frames, detection batches) awaiting a partner.
    pub fn pending(&self) -> (usize, usize) {
        self.sync.pending()
    }

    /// Build a camera model from `info` and store it (last write wins).
    ///
    /// # Errors
    ///
    /// Returns [`FusionError::InvalidCalibration`] if the message cannot be
    /// turned into a model; the previous model, if any, stays in place.
    pub fn on_camera_info(&mut self, info: &CameraInfo) -> Result<(), FusionError> {
        let model = PinholeCameraModel::from_camera_info(info)?;
        let (width, height, fx, fy) = (model.width(), model.height(), model.fx(), model.fy());
        self.stats.calibrations += 1;
        if self.models.set(model) {
            info!(width, height, fx, fy, "camera info received");
        } else {
            debug!(width, height, fx, fy, "camera model replaced");
        }
        self.state = NodeState::Ready;
        Ok(())
    }

    /// Offer a depth frame to the synchronizer.
    pub fn on_depth_frame(&mut self, frame: DepthFrame) -> Option<CycleOutcome> {
        let (depth, detections) = self.sync.push_first(frame)?;
        Some(self.process(MatchedPair::new(depth, detections)))
    }

    /// Offer a detection batch to the synchronizer.
    pub fn on_detections(&mut self, batch: Detection2DArray) -> Option<CycleOutcome> {
        let (depth, detections) = self.sync.push_second(batch)?;
        Some(self.process(MatchedPair::new(depth, detections)))
    }

    /// Route a bus event to the matching handler.
    pub fn handle_event(&mut self, event: Event) -> Option<CycleOutcome> {
        match event.payload {
            EventPayload::CameraInfo(info) => {
                if let Err(e) = self.on_camera_info(&info) {
                    self.stats.rejected_calibrations += 1;
                    warn!(error = %e, "rejecting camera info");
                }
                None
            }
            EventPayload::DepthImage(frame) => self.on_depth_frame(frame),
            EventPayload::Detections2d(batch) => self.on_detections(batch),
            EventPayload::Detections3d(_) => None,
        }
    }

    /// Run one fusion cycle on a matched pair.
    #[instrument(skip_all, fields(stamp = %pair.header.stamp, detections = pair.detections.len()))]
    pub fn process(&mut self, pair: MatchedPair) -> CycleOutcome {
        self.stats.cycles += 1;

        let model = match self.models.current() {
            Ok(model) => model,
            Err(e) => {
                warn!("camera model not yet available, discarding pair");
                self.stats.not_ready += 1;
                return CycleOutcome::Rejected(e);
            }
        };
        // The store may also have been filled through a shared handle.
        self.state = NodeState::Ready;

        let detections = match self.projector.project(&pair, model.as_ref()) {
            Ok(detections) => detections,
            Err(e) => {
                error!(encoding = %pair.depth.encoding, error = %e, "depth image has no depth info, discarding pair");
                self.stats.unsupported_encoding += 1;
                return CycleOutcome::Rejected(e);
            }
        };

        if detections.is_empty() {
            self.stats.empty += 1;
            return CycleOutcome::Empty;
        }

        let count = detections.len();
        if self.sink.consumer_count() == 0 {
            self.stats.no_consumers += 1;
            return CycleOutcome::NoConsumers(count);
        }

        let batch = Detection3DArray {
            header: pair.header,
            detections,
        };
        match self.sink.publish(batch) {
            Ok(_) => {
                self.stats.published_batches += 1;
                self.stats.published_detections += count as u64;
                debug!(count, "published 3d detections");
                CycleOutcome::Published(count)
            }
            Err(e) => {
                // The last consumer went away between the check and the send.
                debug!(error = %e, "3d detections had no receiver");
                self.stats.no_consumers += 1;
                CycleOutcome::NoConsumers(count)
            }
        }
    }
}
