//! `detect3d-types` – shared message vocabulary.
//!
//! Mirrors the subset of `sensor_msgs` / `vision_msgs` that the fusion
//! pipeline consumes and produces, plus the [`Event`] envelope routed over the
//! internal bus and the crate-wide [`FusionError`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Headers and geometry
// ────────────────────────────────────────────────────────────────────────────

/// Acquisition time and coordinate frame of a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub stamp: DateTime<Utc>,
    /// e.g. `"camera_depth_optical_frame"`
    pub frame_id: String,
}

impl Header {
    pub fn new(stamp: DateTime<Utc>, frame_id: impl Into<String>) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

/// A point in 3-D space (metres in the camera optical frame).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A free 3-D vector (used for bounding-box extents).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Orientation as a unit quaternion (x, y, z, w).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    /// The identity rotation.
    pub fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// Position plus orientation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point3,
    pub orientation: Quaternion,
}

/// A pose in image space: sub-pixel position and in-plane rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// Depth images
// ────────────────────────────────────────────────────────────────────────────

/// Encoding of the samples in a [`DepthFrame`].
///
/// Only two encodings carry depth. Any other tag is preserved in
/// [`DepthEncoding::Unsupported`] so the frame can be rejected explicitly
/// instead of being misread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DepthEncoding {
    /// `16UC1`: unsigned 16-bit, linear scale to metres (usually millimetres).
    Mono16,
    /// `32FC1`: 32-bit float, metres.
    Float32,
    /// Any other encoding tag.
    Unsupported(String),
}

impl DepthEncoding {
    pub const MONO16_TAG: &'static str = "16UC1";
    pub const FLOAT32_TAG: &'static str = "32FC1";

    /// Parse a wire-level encoding tag. Unknown tags never fail; they map to
    /// [`DepthEncoding::Unsupported`].
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            Self::MONO16_TAG | "mono16" => Self::Mono16,
            Self::FLOAT32_TAG => Self::Float32,
            other => Self::Unsupported(other.to_string()),
        }
    }

    pub fn as_tag(&self) -> &str {
        match self {
            Self::Mono16 => Self::MONO16_TAG,
            Self::Float32 => Self::FLOAT32_TAG,
            Self::Unsupported(tag) => tag,
        }
    }

    /// `true` for the encodings the depth sampler can read.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }

    /// Size of one sample in bytes, `None` for unsupported encodings.
    pub fn bytes_per_sample(&self) -> Option<usize> {
        match self {
            Self::Mono16 => Some(2),
            Self::Float32 => Some(4),
            Self::Unsupported(_) => None,
        }
    }
}

impl From<String> for DepthEncoding {
    fn from(tag: String) -> Self {
        Self::from_tag(&tag)
    }
}

impl From<DepthEncoding> for String {
    fn from(encoding: DepthEncoding) -> Self {
        encoding.as_tag().to_string()
    }
}

impl fmt::Display for DepthEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// An uncompressed depth image, laid out like `sensor_msgs/Image`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthFrame {
    pub header: Header,
    /// Image height in pixels (number of rows).
    pub height: u32,
    /// Image width in pixels (number of columns).
    pub width: u32,
    pub encoding: DepthEncoding,
    /// Byte order of multi-byte samples.
    pub is_bigendian: bool,
    /// Length of one row in bytes.
    pub step: u32,
    /// Row-major sample buffer, `step * height` bytes.
    pub data: Vec<u8>,
}

impl DepthFrame {
    /// Build a little-endian `16UC1` frame from raw sensor units.
    pub fn from_mono16(header: Header, width: u32, height: u32, samples: &[u16]) -> Self {
        Self {
            header,
            height,
            width,
            encoding: DepthEncoding::Mono16,
            is_bigendian: false,
            step: width * 2,
            data: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        }
    }

    /// Build a little-endian `32FC1` frame from depths in metres.
    pub fn from_float32(header: Header, width: u32, height: u32, samples: &[f32]) -> Self {
        Self {
            header,
            height,
            width,
            encoding: DepthEncoding::Float32,
            is_bigendian: false,
            step: width * 4,
            data: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Calibration
// ────────────────────────────────────────────────────────────────────────────

/// Camera calibration as published next to a depth stream
/// (`sensor_msgs/CameraInfo` layout, all matrices row-major).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    /// `"plumb_bob"` or `"rational_polynomial"`.
    pub distortion_model: String,
    /// Distortion coefficients (k1, k2, p1, p2, k3[, k4, k5, k6]).
    pub d: Vec<f64>,
    /// Intrinsic matrix of the raw image.
    pub k: [f64; 9],
    /// Rectification rotation.
    pub r: [f64; 9],
    /// Projection matrix of the rectified image.
    pub p: [f64; 12],
}

impl CameraInfo {
    /// Calibration of an ideal, distortion-free pinhole camera whose raw and
    /// rectified images coincide.
    pub fn pinhole(width: u32, height: u32, fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            header: Header::default(),
            height,
            width,
            distortion_model: "plumb_bob".to_string(),
            d: vec![0.0; 5],
            k: [fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0],
            r: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            p: [fx, 0.0, cx, 0.0, 0.0, fy, cy, 0.0, 0.0, 0.0, 1.0, 0.0],
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Detections
// ────────────────────────────────────────────────────────────────────────────

/// One class hypothesis with its score and (optionally filled) pose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectHypothesisWithPose {
    pub class_id: String,
    pub score: f64,
    pub pose: Pose,
}

impl ObjectHypothesisWithPose {
    pub fn new(class_id: impl Into<String>, score: f64) -> Self {
        Self {
            class_id: class_id.into(),
            score,
            pose: Pose::default(),
        }
    }
}

/// Axis-aligned image-space box given by its center and extent in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox2D {
    pub center: Pose2D,
    pub size_x: f64,
    pub size_y: f64,
}

/// Oriented box given by its center pose and extent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox3D {
    pub center: Pose,
    pub size: Vector3,
}

/// A 2-D detection produced by an image-space detector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection2D {
    pub header: Header,
    pub id: String,
    pub results: Vec<ObjectHypothesisWithPose>,
    pub bbox: BoundingBox2D,
}

/// A detection localised in 3-D.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection3D {
    pub header: Header,
    pub id: String,
    pub results: Vec<ObjectHypothesisWithPose>,
    pub bbox: BoundingBox3D,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection2DArray {
    pub header: Header,
    pub detections: Vec<Detection2D>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection3DArray {
    pub header: Header,
    pub detections: Vec<Detection3D>,
}

/// A depth frame and a detection batch that were paired in time.
///
/// The header is the detection batch's header; it is echoed on the 3-D
/// output.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPair {
    pub header: Header,
    pub depth: DepthFrame,
    pub detections: Vec<Detection2D>,
}

impl MatchedPair {
    pub fn new(depth: DepthFrame, batch: Detection2DArray) -> Self {
        Self {
            header: batch.header,
            depth,
            detections: batch.detections,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bus envelope
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the internal bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Logical topic name the payload was received on or is destined for,
    /// e.g. `"/yolo/detections_3d"`.
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh envelope stamped now.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the internal bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    CameraInfo(CameraInfo),
    DepthImage(DepthFrame),
    Detections2d(Detection2DArray),
    Detections3d(Detection3DArray),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error type shared by every crate of the pipeline. None of these are fatal:
/// the caller logs and drops the affected cycle or message.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FusionError {
    #[error("camera model not yet available")]
    NotReady,

    #[error("depth image encoding '{0}' carries no depth")]
    UnsupportedEncoding(String),

    #[error("invalid camera calibration: {0}")]
    InvalidCalibration(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_tags_parse_into_closed_set() {
        assert_eq!(DepthEncoding::from_tag("16UC1"), DepthEncoding::Mono16);
        assert_eq!(DepthEncoding::from_tag("mono16"), DepthEncoding::Mono16);
        assert_eq!(DepthEncoding::from_tag("32FC1"), DepthEncoding::Float32);
        assert_eq!(
            DepthEncoding::from_tag("rgb8"),
            DepthEncoding::Unsupported("rgb8".to_string())
        );
        assert!(!DepthEncoding::from_tag("rgb8").is_supported());
        assert_eq!(DepthEncoding::Float32.bytes_per_sample(), Some(4));
    }

    #[test]
    fn encoding_serializes_as_wire_tag() {
        let json = serde_json::to_string(&DepthEncoding::Mono16).unwrap();
        assert_eq!(json, "\"16UC1\"");
        let back: DepthEncoding = serde_json::from_str("\"bgr8\"").unwrap();
        assert_eq!(back.as_tag(), "bgr8");
    }

    #[test]
    fn mono16_frame_layout() {
        let frame = DepthFrame::from_mono16(Header::default(), 2, 1, &[1000, 0x0102]);
        assert_eq!(frame.step, 4);
        assert_eq!(frame.data, vec![0xE8, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn matched_pair_takes_detection_header() {
        let depth = DepthFrame::from_float32(Header::new(Utc::now(), "depth"), 1, 1, &[1.0]);
        let batch = Detection2DArray {
            header: Header::new(Utc::now(), "rgb"),
            detections: vec![Detection2D::default()],
        };
        let pair = MatchedPair::new(depth, batch);
        assert_eq!(pair.header.frame_id, "rgb");
        assert_eq!(pair.detections.len(), 1);
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "/yolo/detections",
            EventPayload::Detections2d(Detection2DArray {
                header: Header::new(Utc::now(), "camera"),
                detections: vec![Detection2D {
                    id: "person-1".to_string(),
                    results: vec![ObjectHypothesisWithPose::new("person", 0.9)],
                    ..Default::default()
                }],
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
        match back.payload {
            EventPayload::Detections2d(batch) => assert_eq!(batch.detections[0].id, "person-1"),
            _ => panic!("unexpected variant"),
        }
    }

    #[test]
    fn fusion_error_display() {
        let err = FusionError::UnsupportedEncoding("rgb8".to_string());
        assert!(err.to_string().contains("rgb8"));
        assert!(FusionError::NotReady.to_string().contains("camera model"));
    }
}
