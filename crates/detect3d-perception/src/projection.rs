//! Back-projection of 2-D detections into 3-D.
//!
//! For every detection of a [`MatchedPair`] the depth under the bounding-box
//! center is looked up, the center pixel is rectified and turned into a
//! viewing ray, and the ray is scaled so that its `z` equals the measured
//! depth:
//!
//! ```text
//! ray   = project_pixel_to_ray(rectify_point(u, v))
//! point = ray / ray.z * depth
//! ```
//!
//! The resulting point is written into the pose of the first hypothesis and
//! into the `z` of the 3-D box center.  The box center keeps the original
//! pixel `x`/`y` and its size copies the 2-D extent; no depth extent is
//! estimated.
//!
//! Detections without a valid depth reading are left out of the result.

use detect3d_types::{
    BoundingBox3D, Detection2D, Detection3D, FusionError, MatchedPair, Point3, Pose, Vector3,
};
use tracing::trace;

use crate::camera_model::{CameraModel, Pixel};
use crate::depth::DepthSampler;

/// Rays whose `z` is this close to zero are parallel to the image plane and
/// cannot be scaled to a depth.
const MIN_RAY_Z: f64 = 1e-9;

/// Turns matched depth/detection pairs into 3-D detections.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BackProjector {
    sampler: DepthSampler,
}

impl BackProjector {
    pub fn new(sampler: DepthSampler) -> Self {
        Self { sampler }
    }

    pub fn sampler(&self) -> &DepthSampler {
        &self.sampler
    }

    /// Back-project every detection of `pair` that has a depth reading.
    ///
    /// The output keeps the input order.  An empty result is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`FusionError::UnsupportedEncoding`] when the depth frame's
    /// encoding carries no depth.  This is checked once, before any detection
    /// is looked at.
    pub fn project<M: CameraModel + ?Sized>(
        &self,
        pair: &MatchedPair,
        model: &M,
    ) -> Result<Vec<Detection3D>, FusionError> {
        if !pair.depth.encoding.is_supported() {
            return Err(FusionError::UnsupportedEncoding(pair.depth.encoding.to_string()));
        }

        Ok(pair
            .detections
            .iter()
            .filter_map(|detection| self.project_one(pair, detection, model))
            .collect())
    }

    fn project_one<M: CameraModel + ?Sized>(
        &self,
        pair: &MatchedPair,
        detection: &Detection2D,
        model: &M,
    ) -> Option<Detection3D> {
        let center = detection.bbox.center;

        let Some(depth) = self.sampler.sample(&pair.depth, center.x, center.y) else {
            trace!(id = %detection.id, x = center.x, y = center.y, "no depth reading, skipping detection");
            return None;
        };

        let ray = model.project_pixel_to_ray(model.rectify_point(Pixel::new(center.x, center.y)));
        if !ray.z.is_finite() || ray.z.abs() < MIN_RAY_Z {
            trace!(id = %detection.id, "degenerate viewing ray, skipping detection");
            return None;
        }

        let (x, y) = (ray.x / ray.z, ray.y / ray.z);
        let depth = f64::from(depth);
        let point = Point3::new(x * depth, y * depth, depth);

        let mut results = detection.results.clone();
        if let Some(first) = results.first_mut() {
            first.pose.position = point;
        }

        Some(Detection3D {
            header: detection.header.clone(),
            id: detection.id.clone(),
            results,
            bbox: BoundingBox3D {
                center: Pose {
                    position: Point3::new(center.x, center.y, point.z),
                    ..Pose::default()
                },
                size: Vector3::new(detection.bbox.size_x, detection.bbox.size_y, 0.0),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_model::PinholeCameraModel;
    use chrono::Utc;
    use detect3d_types::{
        BoundingBox2D, CameraInfo, DepthEncoding, DepthFrame, Detection2DArray, Header,
        ObjectHypothesisWithPose, Pose2D,
    };

    const W: u32 = 64;
    const H: u32 = 48;

    fn model() -> PinholeCameraModel {
        PinholeCameraModel::from_camera_info(&CameraInfo::pinhole(W, H, 50.0, 50.0, 32.0, 24.0)).unwrap()
    }

    fn detection(id: &str, x: f64, y: f64) -> Detection2D {
        Detection2D {
            header: Header::new(Utc::now(), "camera"),
            id: id.to_string(),
            results: vec![
                ObjectHypothesisWithPose::new("bottle", 0.8),
                ObjectHypothesisWithPose::new("cup", 0.15),
            ],
            bbox: BoundingBox2D {
                center: Pose2D { x, y, theta: 0.0 },
                size_x: 10.0,
                size_y: 20.0,
            },
        }
    }

    /// Float frame with `depth` everywhere except NaN in column 0.
    fn frame(depth: f32) -> DepthFrame {
        let samples: Vec<f32> = (0..W * H)
            .map(|i| if i % W == 0 { f32::NAN } else { depth })
            .collect();
        DepthFrame::from_float32(Header::new(Utc::now(), "camera"), W, H, &samples)
    }

    fn pair(depth: DepthFrame, detections: Vec<Detection2D>) -> MatchedPair {
        MatchedPair::new(
            depth,
            Detection2DArray {
                header: Header::new(Utc::now(), "camera"),
                detections,
            },
        )
    }

    #[test]
    fn principal_point_back_projects_onto_axis() {
        let out = BackProjector::default()
            .project(&pair(frame(2.5), vec![detection("a", 32.0, 24.0)]), &model())
            .unwrap();
        let p = out[0].results[0].pose.position;
        assert!(p.x.abs() < 1e-9);
        assert!(p.y.abs() < 1e-9);
        assert!((p.z - 2.5).abs() < 1e-9);
    }

    #[test]
    fn off_axis_point_scales_ray_to_depth() {
        let out = BackProjector::default()
            .project(&pair(frame(2.0), vec![detection("a", 57.0, 14.0)]), &model())
            .unwrap();
        let p = out[0].results[0].pose.position;
        // ray = ((57-32)/50, (14-24)/50, 1) = (0.5, -0.2, 1)
        assert!((p.x - 1.0).abs() < 1e-9);
        assert!((p.y + 0.4).abs() < 1e-9);
        assert!((p.z - 2.0).abs() < 1e-9);
    }

    #[test]
    fn output_carries_identity_results_and_box() {
        let input = detection("track-7", 40.0, 30.0);
        let out = BackProjector::default()
            .project(&pair(frame(1.5), vec![input.clone()]), &model())
            .unwrap();
        let d = &out[0];
        assert_eq!(d.id, "track-7");
        assert_eq!(d.results.len(), 2);
        assert_eq!(d.results[0].class_id, "bottle");
        assert_eq!(d.results[1], input.results[1]);
        assert_eq!(d.bbox.center.position.x, 40.0);
        assert_eq!(d.bbox.center.position.y, 30.0);
        assert!((d.bbox.center.position.z - 1.5).abs() < 1e-9);
        assert_eq!(d.bbox.size, Vector3::new(10.0, 20.0, 0.0));
    }

    #[test]
    fn detections_without_depth_are_skipped() {
        let detections = vec![
            detection("ok-1", 10.0, 10.0),
            detection("nan", 0.0, 10.0),
            detection("outside", 500.0, 10.0),
            detection("ok-2", 20.0, 5.0),
        ];
        let out = BackProjector::default()
            .project(&pair(frame(3.0), detections), &model())
            .unwrap();
        let ids: Vec<&str> = out.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["ok-1", "ok-2"]);
    }

    #[test]
    fn mono16_frames_are_scaled() {
        let samples = vec![1234u16; (W * H) as usize];
        let depth = DepthFrame::from_mono16(Header::default(), W, H, &samples);
        let out = BackProjector::default()
            .project(&pair(depth, vec![detection("a", 32.0, 24.0)]), &model())
            .unwrap();
        assert!((out[0].results[0].pose.position.z - 1.234).abs() < 1e-6);
    }

    #[test]
    fn unsupported_encoding_rejects_whole_frame() {
        let mut depth = frame(1.0);
        depth.encoding = DepthEncoding::Unsupported("rgb8".to_string());
        let err = BackProjector::default()
            .project(&pair(depth, vec![detection("a", 10.0, 10.0)]), &model())
            .unwrap_err();
        assert_eq!(err, FusionError::UnsupportedEncoding("rgb8".to_string()));
    }

    #[test]
    fn empty_results_still_produce_a_detection() {
        let mut input = detection("bare", 32.0, 24.0);
        input.results.clear();
        let out = BackProjector::default()
            .project(&pair(frame(1.0), vec![input]), &model())
            .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].results.is_empty());
        assert!((out[0].bbox.center.position.z - 1.0).abs() < 1e-9);
    }

    #[test]
    fn no_detections_yields_empty_output() {
        let out = BackProjector::default().project(&pair(frame(1.0), Vec::new()), &model()).unwrap();
        assert!(out.is_empty());
    }
}
