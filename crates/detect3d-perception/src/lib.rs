//! `detect3d-perception` – depth-backed localisation of 2-D detections.
//!
//! Turns image-space detections into 3-D detections using a depth image and
//! the calibration of the depth camera.
//!
//! # Modules
//!
//! - [`camera_model`] – [`PinholeCameraModel`][camera_model::PinholeCameraModel]
//!   (rectify a pixel, project it to a ray) and
//!   [`CameraModelStore`][camera_model::CameraModelStore], which holds the
//!   latest calibration for concurrent readers.
//! - [`depth`] – [`DepthSampler`][depth::DepthSampler]: reads a depth in
//!   metres from `16UC1` or `32FC1` frames.
//! - [`sync`] – [`ApproximateTimeSynchronizer`][sync::ApproximateTimeSynchronizer]:
//!   pairs depth frames with detection batches by nearest stamp.
//! - [`projection`] – [`BackProjector`][projection::BackProjector]: turns a
//!   matched pair into 3-D detections.

pub mod camera_model;
pub mod depth;
pub mod projection;
pub mod sync;

pub use camera_model::{CameraModel, CameraModelStore, PinholeCameraModel, Pixel};
pub use depth::DepthSampler;
pub use projection::BackProjector;
pub use sync::{ApproximateTimeSynchronizer, Stamped, SyncConfig};
