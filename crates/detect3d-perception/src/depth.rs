//! Depth lookup in a raw depth frame.
//!
//! [`DepthSampler::sample`] reads the sample under a (sub-pixel) image
//! coordinate and converts it to metres:
//!
//! | Encoding | Conversion |
//! |---|---|
//! | `16UC1` | `raw * mono16_scale`; a raw `0` means "no return" |
//! | `32FC1` | `raw` (already metres) |
//!
//! Coordinates are rounded to the nearest pixel.  Anything that cannot be
//! read (outside the image, buffer too short, unsupported encoding) or that
//! reads as NaN/±∞ yields `None`.

use detect3d_types::{DepthEncoding, DepthFrame};

/// Metres per unit of a `16UC1` sample (millimetre depth).
pub const DEFAULT_MONO16_SCALE: f32 = 0.001;

/// Converts depth samples to metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthSampler {
    mono16_scale: f32,
}

impl Default for DepthSampler {
    fn default() -> Self {
        Self::new(DEFAULT_MONO16_SCALE)
    }
}

impl DepthSampler {
    /// Create a sampler with the given metres-per-unit scale for `16UC1`
    /// frames.
    pub fn new(mono16_scale: f32) -> Self {
        Self { mono16_scale }
    }

    pub fn mono16_scale(&self) -> f32 {
        self.mono16_scale
    }

    /// Depth in metres at pixel `(x, y)`, or `None` if there is no valid
    /// reading.
    pub fn sample(&self, frame: &DepthFrame, x: f64, y: f64) -> Option<f32> {
        let bytes = sample_bytes(frame, x, y)?;
        let depth = match frame.encoding {
            DepthEncoding::Mono16 => {
                let raw = if frame.is_bigendian {
                    u16::from_be_bytes([bytes[0], bytes[1]])
                } else {
                    u16::from_le_bytes([bytes[0], bytes[1]])
                };
                if raw == 0 {
                    return None;
                }
                f32::from(raw) * self.mono16_scale
            }
            DepthEncoding::Float32 => {
                let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
                if frame.is_bigendian {
                    f32::from_be_bytes(raw)
                } else {
                    f32::from_le_bytes(raw)
                }
            }
            DepthEncoding::Unsupported(_) => return None,
        };
        depth.is_finite().then_some(depth)
    }
}

/// The bytes of the sample nearest to `(x, y)`, if it lies inside the frame
/// and inside the buffer.
fn sample_bytes(frame: &DepthFrame, x: f64, y: f64) -> Option<&[u8]> {
    let bytes_per_sample = frame.encoding.bytes_per_sample()?;
    let col = x.round();
    let row = y.round();
    if !(col >= 0.0 && row >= 0.0 && col < f64::from(frame.width) && row < f64::from(frame.height)) {
        return None;
    }
    let offset = row as usize * frame.step as usize + col as usize * bytes_per_sample;
    frame.data.get(offset..offset + bytes_per_sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use detect3d_types::Header;

    fn mono16(samples: &[u16]) -> DepthFrame {
        DepthFrame::from_mono16(Header::default(), 3, 2, samples)
    }

    fn float32(samples: &[f32]) -> DepthFrame {
        DepthFrame::from_float32(Header::default(), 3, 2, samples)
    }

    #[test]
    fn mono16_applies_scale() {
        let frame = mono16(&[0, 0, 0, 0, 1500, 0]);
        let depth = DepthSampler::default().sample(&frame, 1.0, 1.0).unwrap();
        assert!((depth - 1.5).abs() < 1e-6);
    }

    #[test]
    fn mono16_custom_scale() {
        let frame = mono16(&[4000, 0, 0, 0, 0, 0]);
        let depth = DepthSampler::new(0.00025).sample(&frame, 0.0, 0.0).unwrap();
        assert!((depth - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mono16_zero_is_no_reading() {
        let frame = mono16(&[0; 6]);
        assert_eq!(DepthSampler::default().sample(&frame, 2.0, 1.0), None);
    }

    #[test]
    fn mono16_big_endian() {
        let mut frame = mono16(&[0; 6]);
        frame.is_bigendian = true;
        frame.data[0] = 0x07;
        frame.data[1] = 0xD0; // 2000
        let depth = DepthSampler::default().sample(&frame, 0.0, 0.0).unwrap();
        assert!((depth - 2.0).abs() < 1e-6);
    }

    #[test]
    fn float32_reads_metres_directly() {
        let frame = float32(&[0.0, 0.0, 3.25, 0.0, 0.0, 0.0]);
        assert_eq!(DepthSampler::default().sample(&frame, 2.0, 0.0), Some(3.25));
    }

    #[test]
    fn float32_non_finite_is_no_reading() {
        let frame = float32(&[f32::NAN, f32::INFINITY, f32::NEG_INFINITY, 1.0, 1.0, 1.0]);
        let sampler = DepthSampler::default();
        assert_eq!(sampler.sample(&frame, 0.0, 0.0), None);
        assert_eq!(sampler.sample(&frame, 1.0, 0.0), None);
        assert_eq!(sampler.sample(&frame, 2.0, 0.0), None);
    }

    #[test]
    fn sub_pixel_coordinates_round_to_nearest() {
        let frame = float32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let sampler = DepthSampler::default();
        assert_eq!(sampler.sample(&frame, 1.4, 0.2), Some(2.0));
        assert_eq!(sampler.sample(&frame, 1.6, 0.6), Some(6.0));
        assert_eq!(sampler.sample(&frame, -0.4, 1.4), Some(4.0));
    }

    #[test]
    fn out_of_bounds_is_no_reading() {
        let frame = float32(&[1.0; 6]);
        let sampler = DepthSampler::default();
        assert_eq!(sampler.sample(&frame, -1.0, 0.0), None);
        assert_eq!(sampler.sample(&frame, 2.6, 0.0), None);
        assert_eq!(sampler.sample(&frame, 0.0, 2.0), None);
        assert_eq!(sampler.sample(&frame, f64::NAN, 0.0), None);
    }

    #[test]
    fn short_buffer_is_no_reading() {
        let mut frame = float32(&[1.0; 6]);
        frame.data.truncate(10);
        assert_eq!(DepthSampler::default().sample(&frame, 2.0, 1.0), None);
        assert_eq!(DepthSampler::default().sample(&frame, 1.0, 0.0), Some(1.0));
    }

    #[test]
    fn row_padding_follows_step() {
        // 2x2 float image with 4 bytes of padding at the end of each row.
        let mut data = Vec::new();
        for row in [[1.0f32, 2.0], [3.0, 4.0]] {
            for v in row {
                data.extend_from_slice(&v.to_le_bytes());
            }
            data.extend_from_slice(&[0; 4]);
        }
        let frame = DepthFrame {
            header: Header::default(),
            height: 2,
            width: 2,
            encoding: DepthEncoding::Float32,
            is_bigendian: false,
            step: 12,
            data,
        };
        assert_eq!(DepthSampler::default().sample(&frame, 0.0, 1.0), Some(3.0));
        assert_eq!(DepthSampler::default().sample(&frame, 1.0, 1.0), Some(4.0));
    }

    #[test]
    fn unsupported_encoding_is_no_reading() {
        let mut frame = float32(&[1.0; 6]);
        frame.encoding = DepthEncoding::Unsupported("rgb8".to_string());
        assert_eq!(DepthSampler::default().sample(&frame, 0.0, 0.0), None);
    }
}
