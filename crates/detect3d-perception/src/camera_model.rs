//! Camera model and the store holding the current calibration.
//!
//! [`PinholeCameraModel`] is built from a [`CameraInfo`] message and offers the
//! two operations back-projection needs: undo lens distortion for a raw pixel
//! ([`CameraModel::rectify_point`]) and turn a rectified pixel into a viewing
//! ray ([`CameraModel::project_pixel_to_ray`]).
//!
//! [`CameraModelStore`] keeps the latest model behind an `RwLock`.  Replacing
//! the model swaps one `Arc` for another, so a reader always sees a complete
//! model, either the old one or the new one.
//!
//! # Example
//!
//! ```rust
//! use detect3d_perception::camera_model::{CameraModel, CameraModelStore, Pixel, PinholeCameraModel};
//! use detect3d_types::CameraInfo;
//!
//! let store = CameraModelStore::new();
//! assert!(store.current().is_err());
//!
//! let info = CameraInfo::pinhole(640, 480, 500.0, 500.0, 320.0, 240.0);
//! store.set(PinholeCameraModel::from_camera_info(&info).unwrap());
//!
//! let model = store.current().unwrap();
//! let ray = model.project_pixel_to_ray(model.rectify_point(Pixel::new(320.0, 240.0)));
//! assert!(ray.x.abs() < 1e-9 && ray.y.abs() < 1e-9);
//! ```

use std::sync::{Arc, PoisonError, RwLock};

use detect3d_types::{CameraInfo, FusionError, Vector3};

/// Fixed-point iterations used to invert the distortion polynomial.
const UNDISTORT_ITERATIONS: usize = 20;

/// Convergence threshold on the normalised-coordinate update.
const UNDISTORT_EPSILON: f64 = 1e-12;

const IDENTITY_3X3: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

/// An image coordinate in pixels; sub-pixel values are allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pixel {
    pub u: f64,
    pub v: f64,
}

impl Pixel {
    pub fn new(u: f64, v: f64) -> Self {
        Self { u, v }
    }
}

/// Geometry of a calibrated camera.
pub trait CameraModel: Send + Sync {
    /// Map a pixel of the raw (distorted) image to the rectified image.
    fn rectify_point(&self, raw: Pixel) -> Pixel;

    /// Ray through a rectified pixel, in the camera optical frame, scaled so
    /// that `z == 1`.
    fn project_pixel_to_ray(&self, rectified: Pixel) -> Vector3;
}

/// Supported lens distortion models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistortionModel {
    /// Brown–Conrady: k1, k2, p1, p2, k3.
    PlumbBob,
    /// k1, k2, p1, p2, k3, k4, k5, k6.
    RationalPolynomial,
}

impl DistortionModel {
    fn parse(name: &str) -> Result<Self, FusionError> {
        match name {
            "plumb_bob" | "" => Ok(Self::PlumbBob),
            "rational_polynomial" => Ok(Self::RationalPolynomial),
            other => Err(FusionError::InvalidCalibration(format!(
                "unsupported distortion model '{other}'"
            ))),
        }
    }

    fn max_coefficients(self) -> usize {
        match self {
            Self::PlumbBob => 5,
            Self::RationalPolynomial => 8,
        }
    }
}

/// Pinhole camera with optional radial/tangential distortion.
#[derive(Debug, Clone, PartialEq)]
pub struct PinholeCameraModel {
    width: u32,
    height: u32,
    k: [f64; 9],
    r: [f64; 9],
    p: [f64; 12],
    distortion_model: DistortionModel,
    /// k1, k2, p1, p2, k3, k4, k5, k6 (missing trailing terms are zero).
    d: [f64; 8],
    /// `false` when rectification is the identity mapping.
    needs_rectification: bool,
}

impl PinholeCameraModel {
    /// Build a model from a calibration message.
    ///
    /// An all-zero `r` is read as "no rectification" (identity), which is what
    /// many depth drivers publish.
    ///
    /// # Errors
    ///
    /// Returns [`FusionError::InvalidCalibration`] when a focal length in `k`
    /// or `p` is zero or non-finite, the distortion model is unknown, or too
    /// many coefficients are given for it.
    pub fn from_camera_info(info: &CameraInfo) -> Result<Self, FusionError> {
        let distortion_model = DistortionModel::parse(&info.distortion_model)?;
        if info.d.len() > distortion_model.max_coefficients() {
            return Err(FusionError::InvalidCalibration(format!(
                "{} distortion coefficients given for '{}'",
                info.d.len(),
                info.distortion_model
            )));
        }
        if info.d.iter().any(|c| !c.is_finite()) {
            return Err(FusionError::InvalidCalibration(
                "non-finite distortion coefficient".to_string(),
            ));
        }

        for (name, value) in [("K fx", info.k[0]), ("K fy", info.k[4]), ("P fx", info.p[0]), ("P fy", info.p[5])] {
            if value == 0.0 || !value.is_finite() {
                return Err(FusionError::InvalidCalibration(format!(
                    "{name} must be non-zero and finite, got {value}"
                )));
            }
        }

        let mut d = [0.0; 8];
        d[..info.d.len()].copy_from_slice(&info.d);

        let r = if info.r.iter().all(|v| *v == 0.0) {
            IDENTITY_3X3
        } else {
            info.r
        };

        let same_intrinsics = [0, 1, 2, 4, 5]
            .iter()
            .zip([0, 1, 2, 5, 6])
            .all(|(&ki, pi)| info.k[ki] == info.p[pi]);
        let needs_rectification = d.iter().any(|c| *c != 0.0) || r != IDENTITY_3X3 || !same_intrinsics;

        Ok(Self {
            width: info.width,
            height: info.height,
            k: info.k,
            r,
            p: info.p,
            distortion_model,
            d,
            needs_rectification,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn distortion_model(&self) -> DistortionModel {
        self.distortion_model
    }

    /// Focal length along x of the rectified image.
    pub fn fx(&self) -> f64 {
        self.p[0]
    }

    /// Focal length along y of the rectified image.
    pub fn fy(&self) -> f64 {
        self.p[5]
    }

    /// Principal point of the rectified image.
    pub fn principal_point(&self) -> Pixel {
        Pixel::new(self.p[2], self.p[6])
    }

    /// Distortion factor applied to normalised coordinates at squared radius
    /// `r2`: the radial gain and the tangential offsets.
    fn distortion_terms(&self, x: f64, y: f64) -> (f64, f64, f64) {
        let [k1, k2, p1, p2, k3, k4, k5, k6] = self.d;
        let r2 = x * x + y * y;
        let numerator = 1.0 + ((k3 * r2 + k2) * r2 + k1) * r2;
        let denominator = 1.0 + ((k6 * r2 + k5) * r2 + k4) * r2;
        let delta_x = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let delta_y = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        (numerator / denominator, delta_x, delta_y)
    }
}

impl CameraModel for PinholeCameraModel {
    fn rectify_point(&self, raw: Pixel) -> Pixel {
        if !self.needs_rectification {
            return raw;
        }

        // Raw pixel → distorted normalised coordinates.
        let (fx, fy, cx, cy, skew) = (self.k[0], self.k[4], self.k[2], self.k[5], self.k[1]);
        let y0 = (raw.v - cy) / fy;
        let x0 = (raw.u - cx - skew * y0) / fx;

        // Invert the distortion by fixed-point iteration.
        let (mut x, mut y) = (x0, y0);
        for _ in 0..UNDISTORT_ITERATIONS {
            let (gain, delta_x, delta_y) = self.distortion_terms(x, y);
            let next_x = (x0 - delta_x) / gain;
            let next_y = (y0 - delta_y) / gain;
            let step = (next_x - x).abs().max((next_y - y).abs());
            x = next_x;
            y = next_y;
            if step < UNDISTORT_EPSILON {
                break;
            }
        }

        // Rectification rotation.
        let r = &self.r;
        let rx = r[0] * x + r[1] * y + r[2];
        let ry = r[3] * x + r[4] * y + r[5];
        let rw = r[6] * x + r[7] * y + r[8];
        let (x, y) = (rx / rw, ry / rw);

        // Rectified normalised coordinates → rectified pixel.
        let p = &self.p;
        Pixel::new(p[0] * x + p[1] * y + p[2], p[5] * y + p[6])
    }

    fn project_pixel_to_ray(&self, rectified: Pixel) -> Vector3 {
        let p = &self.p;
        let (fx, fy, cx, cy, tx, ty) = (p[0], p[5], p[2], p[6], p[3], p[7]);
        Vector3::new((rectified.u - cx - tx) / fx, (rectified.v - cy - ty) / fy, 1.0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Store
// ────────────────────────────────────────────────────────────────────────────

/// Holds the camera model once calibration has arrived.
///
/// Last write wins; there is no merging of successive calibrations.
#[derive(Debug)]
pub struct CameraModelStore<M = PinholeCameraModel> {
    current: RwLock<Option<Arc<M>>>,
}

impl<M> Default for CameraModelStore<M> {
    fn default() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }
}

impl<M> CameraModelStore<M> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current model.
    ///
    /// Returns `true` when this was the first model ever stored.
    pub fn set(&self, model: M) -> bool {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        slot.replace(Arc::new(model)).is_none()
    }

    /// The current model.
    ///
    /// # Errors
    ///
    /// Returns [`FusionError::NotReady`] until [`set`][Self::set] has been
    /// called at least once.
    pub fn current(&self) -> Result<Arc<M>, FusionError> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(FusionError::NotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ideal() -> PinholeCameraModel {
        PinholeCameraModel::from_camera_info(&CameraInfo::pinhole(640, 480, 525.0, 525.0, 319.5, 239.5)).unwrap()
    }

    fn distorted_info() -> CameraInfo {
        let mut info = CameraInfo::pinhole(640, 480, 600.0, 610.0, 320.0, 240.0);
        info.d = vec![-0.28, 0.07, 0.001, -0.0005, 0.0];
        info
    }

    /// Forward plumb-bob distortion of a normalised point, projected with K.
    fn distort(info: &CameraInfo, x: f64, y: f64) -> Pixel {
        let (k1, k2, p1, p2, k3) = (info.d[0], info.d[1], info.d[2], info.d[3], info.d[4]);
        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
        let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        Pixel::new(info.k[0] * xd + info.k[2], info.k[4] * yd + info.k[5])
    }

    #[test]
    fn principal_point_projects_to_optical_axis() {
        let model = ideal();
        let ray = model.project_pixel_to_ray(model.principal_point());
        assert!(ray.x.abs() < 1e-12);
        assert!(ray.y.abs() < 1e-12);
        assert!((ray.z - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ray_follows_pinhole_geometry() {
        let model = ideal();
        let ray = model.project_pixel_to_ray(Pixel::new(319.5 + 525.0, 239.5 - 262.5));
        assert!((ray.x - 1.0).abs() < 1e-12);
        assert!((ray.y + 0.5).abs() < 1e-12);
    }

    #[test]
    fn ray_accounts_for_stereo_baseline_term() {
        let mut info = CameraInfo::pinhole(640, 480, 500.0, 500.0, 320.0, 240.0);
        info.p[3] = -25.0; // -fx * baseline
        let model = PinholeCameraModel::from_camera_info(&info).unwrap();
        let ray = model.project_pixel_to_ray(Pixel::new(295.0, 240.0));
        assert!(ray.x.abs() < 1e-12);
    }

    #[test]
    fn rectify_is_identity_without_distortion() {
        let model = ideal();
        let raw = Pixel::new(12.25, 400.75);
        assert_eq!(model.rectify_point(raw), raw);
    }

    #[test]
    fn rectify_inverts_plumb_bob_distortion() {
        let info = distorted_info();
        let model = PinholeCameraModel::from_camera_info(&info).unwrap();

        for (x, y) in [(0.0, 0.0), (0.2, -0.1), (-0.35, 0.25), (0.4, 0.3)] {
            let raw = distort(&info, x, y);
            let rect = model.rectify_point(raw);
            let expected = Pixel::new(info.p[0] * x + info.p[2], info.p[5] * y + info.p[6]);
            assert!((rect.u - expected.u).abs() < 1e-6, "u: {rect:?} vs {expected:?}");
            assert!((rect.v - expected.v).abs() < 1e-6, "v: {rect:?} vs {expected:?}");
        }
    }

    #[test]
    fn zero_rotation_matrix_is_read_as_identity() {
        let mut info = CameraInfo::pinhole(640, 480, 500.0, 500.0, 320.0, 240.0);
        info.r = [0.0; 9];
        let model = PinholeCameraModel::from_camera_info(&info).unwrap();
        let raw = Pixel::new(100.0, 50.0);
        assert_eq!(model.rectify_point(raw), raw);
    }

    #[test]
    fn rational_polynomial_accepts_eight_coefficients() {
        let mut info = CameraInfo::pinhole(640, 480, 500.0, 500.0, 320.0, 240.0);
        info.distortion_model = "rational_polynomial".to_string();
        info.d = vec![0.1, 0.01, 0.0, 0.0, 0.0, 0.1, 0.01, 0.0];
        let model = PinholeCameraModel::from_camera_info(&info).unwrap();
        assert_eq!(model.distortion_model(), DistortionModel::RationalPolynomial);
        let center = model.rectify_point(Pixel::new(320.0, 240.0));
        assert!((center.u - 320.0).abs() < 1e-9 && (center.v - 240.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_calibrations_are_rejected() {
        let mut zero_focal = CameraInfo::pinhole(640, 480, 500.0, 500.0, 320.0, 240.0);
        zero_focal.p[0] = 0.0;
        assert!(matches!(
            PinholeCameraModel::from_camera_info(&zero_focal),
            Err(FusionError::InvalidCalibration(_))
        ));

        let mut unknown_model = CameraInfo::pinhole(640, 480, 500.0, 500.0, 320.0, 240.0);
        unknown_model.distortion_model = "equidistant".to_string();
        assert!(PinholeCameraModel::from_camera_info(&unknown_model).is_err());

        let mut too_many = CameraInfo::pinhole(640, 480, 500.0, 500.0, 320.0, 240.0);
        too_many.d = vec![0.0; 8];
        assert!(PinholeCameraModel::from_camera_info(&too_many).is_err());
    }

    #[test]
    fn store_is_not_ready_until_set() {
        let store: CameraModelStore = CameraModelStore::new();
        assert!(!store.is_ready());
        assert_eq!(store.current().unwrap_err(), FusionError::NotReady);

        assert!(store.set(ideal()));
        assert!(store.is_ready());
        assert!(store.current().is_ok());
    }

    #[test]
    fn store_replace_is_last_write_wins() {
        let store = CameraModelStore::new();
        assert!(store.set(ideal()));

        let replacement = PinholeCameraModel::from_camera_info(&distorted_info()).unwrap();
        assert!(!store.set(replacement.clone()));
        assert_eq!(*store.current().unwrap(), replacement);
    }

    #[test]
    fn readers_see_whole_models_during_replacement() {
        let store = CameraModelStore::new();
        store.set(ideal());
        let a = ideal();
        let b = PinholeCameraModel::from_camera_info(&distorted_info()).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..200 {
                    store.set(if i % 2 == 0 { b.clone() } else { a.clone() });
                }
            });
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..200 {
                        let model = store.current().unwrap();
                        assert!(*model == a || *model == b);
                    }
                });
            }
        });
    }
}
