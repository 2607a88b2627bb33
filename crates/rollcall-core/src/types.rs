use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of components in a face descriptor.
pub const DESCRIPTOR_DIM: usize = 128;

/// Size in bytes of a stored descriptor (little-endian `f64` per component).
pub const DESCRIPTOR_BYTES: usize = DESCRIPTOR_DIM * std::mem::size_of::<f64>();

/// Default Euclidean tolerance for a positive match. Smaller is stricter.
pub const DEFAULT_TOLERANCE: f64 = 0.6;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Map a box found on a downscaled frame back onto the full-size frame.
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor blob is {actual} bytes, expected {DESCRIPTOR_BYTES}")]
    InvalidLength { actual: usize },
    #[error("descriptor has {actual} components, expected {DESCRIPTOR_DIM}")]
    InvalidDimension { actual: usize },
}

/// Fixed-length face descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Descriptor {
    values: Vec<f64>,
}

impl Descriptor {
    pub fn new(values: Vec<f64>) -> Result<Self, DescriptorError> {
        if values.len() != DESCRIPTOR_DIM {
            return Err(DescriptorError::InvalidDimension {
                actual: values.len(),
            });
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Euclidean distance between two descriptors.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Encode as raw little-endian IEEE-754 doubles.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Decode a blob written by [`to_le_bytes`](Self::to_le_bytes). Bit-exact.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, DescriptorError> {
        if bytes.len() != DESCRIPTOR_BYTES {
            return Err(DescriptorError::InvalidLength {
                actual: bytes.len(),
            });
        }
        let values = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();
        Ok(Self { values })
    }
}

/// An enrolled student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub student_id: String,
    pub name: String,
    pub course: String,
}

impl Identity {
    /// Label drawn next to a recognised face.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.student_id)
    }
}

/// One gallery row: an identity and its enrolled descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub identity: Identity,
    pub descriptor: Descriptor,
}

/// Outcome of comparing one probe against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Matched { identity: Identity, distance: f64 },
    Unmatched,
}

impl MatchResult {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            MatchResult::Matched { identity, .. } => Some(identity),
            MatchResult::Unmatched => None,
        }
    }
}

/// Strategy for comparing a probe descriptor against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Descriptor, gallery: &[GalleryEntry], tolerance: f64) -> MatchResult;
}

/// The first gallery entry (in enumeration order) within tolerance wins,
/// even if a later entry is closer.
pub struct FirstWithinTolerance;

impl Matcher for FirstWithinTolerance {
    fn compare(&self, probe: &Descriptor, gallery: &[GalleryEntry], tolerance: f64) -> MatchResult {
        for entry in gallery {
            let distance = probe.euclidean_distance(&entry.descriptor);
            if distance <= tolerance {
                return MatchResult::Matched {
                    identity: entry.identity.clone(),
                    distance,
                };
            }
        }
        MatchResult::Unmatched
    }
}

/// The closest gallery entry within tolerance wins. Ties keep the earlier entry.
pub struct NearestWithinTolerance;

impl Matcher for NearestWithinTolerance {
    fn compare(&self, probe: &Descriptor, gallery: &[GalleryEntry], tolerance: f64) -> MatchResult {
        let mut best: Option<(usize, f64)> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let distance = probe.euclidean_distance(&entry.descriptor);
            if !(distance <= tolerance) {
                continue;
            }
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        match best {
            Some((idx, distance)) => MatchResult::Matched {
                identity: gallery[idx].identity.clone(),
                distance,
            },
            None => MatchResult::Unmatched,
        }
    }
}

/// Configurable choice of [`Matcher`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    #[default]
    First,
    Nearest,
}

impl MatchPolicy {
    pub fn matcher(self) -> Box<dyn Matcher + Send + Sync> {
        match self {
            MatchPolicy::First => Box::new(FirstWithinTolerance),
            MatchPolicy::Nearest => Box::new(NearestWithinTolerance),
        }
    }
}

impl FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(MatchPolicy::First),
            "nearest" => Ok(MatchPolicy::Nearest),
            other => Err(format!("unknown match policy: {other} (expected first or nearest)")),
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::First => f.write_str("first"),
            MatchPolicy::Nearest => f.write_str("nearest"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Descriptor whose first component is `x`, rest zero.
    fn desc(x: f64) -> Descriptor {
        let mut values = vec![0.0; DESCRIPTOR_DIM];
        values[0] = x;
        Descriptor::new(values).unwrap()
    }

    fn entry(id: &str, x: f64) -> GalleryEntry {
        GalleryEntry {
            identity: Identity {
                student_id: id.into(),
                name: format!("Student {id}"),
                course: "CS".into(),
            },
            descriptor: desc(x),
        }
    }

    #[test]
    fn test_euclidean_distance() {
        let mut a = vec![0.0; DESCRIPTOR_DIM];
        let mut b = vec![0.0; DESCRIPTOR_DIM];
        a[0] = 3.0;
        b[1] = 4.0;
        let a = Descriptor::new(a).unwrap();
        let b = Descriptor::new(b).unwrap();
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-12);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_descriptor_rejects_wrong_dimension() {
        assert_eq!(
            Descriptor::new(vec![0.0; 3]),
            Err(DescriptorError::InvalidDimension { actual: 3 })
        );
    }

    #[test]
    fn test_descriptor_bytes_bit_exact() {
        let values: Vec<f64> = (0..DESCRIPTOR_DIM)
            .map(|i| (i as f64 * 0.1).sin() / 3.0 + f64::EPSILON * i as f64)
            .collect();
        let original = Descriptor::new(values).unwrap();
        let bytes = original.to_le_bytes();
        assert_eq!(bytes.len(), DESCRIPTOR_BYTES);

        let decoded = Descriptor::from_le_bytes(&bytes).unwrap();
        for (a, b) in original.values().iter().zip(decoded.values()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_descriptor_bytes_little_endian() {
        let bytes = desc(1.0).to_le_bytes();
        assert_eq!(&bytes[..8], &1.0f64.to_le_bytes());
    }

    #[test]
    fn test_descriptor_rejects_short_blob() {
        let err = Descriptor::from_le_bytes(&[0u8; 100]).unwrap_err();
        assert_eq!(err, DescriptorError::InvalidLength { actual: 100 });
    }

    #[test]
    fn test_first_within_tolerance_prefers_gallery_order() {
        // Distances 0.3 then 0.1: the earlier entry wins.
        let gallery = vec![entry("far", 0.3), entry("near", 0.1)];
        let result = FirstWithinTolerance.compare(&desc(0.0), &gallery, 0.6);
        match result {
            MatchResult::Matched { identity, distance } => {
                assert_eq!(identity.student_id, "far");
                assert!((distance - 0.3).abs() < 1e-12);
            }
            MatchResult::Unmatched => panic!("expected a match"),
        }
    }

    #[test]
    fn test_first_within_tolerance_skips_out_of_range() {
        let gallery = vec![entry("a", 0.9), entry("b", 0.5)];
        let result = FirstWithinTolerance.compare(&desc(0.0), &gallery, 0.6);
        assert_eq!(result.identity().map(|i| i.student_id.as_str()), Some("b"));
    }

    #[test]
    fn test_tolerance_is_inclusive() {
        let gallery = vec![entry("edge", 0.5)];
        let result = FirstWithinTolerance.compare(&desc(0.0), &gallery, 0.5);
        assert!(result.identity().is_some());
    }

    #[test]
    fn test_nearest_within_tolerance_prefers_closest() {
        let gallery = vec![entry("far", 0.3), entry("near", 0.1), entry("out", 1.05)];
        let result = NearestWithinTolerance.compare(&desc(0.0), &gallery, 0.6);
        assert_eq!(result.identity().map(|i| i.student_id.as_str()), Some("near"));
    }

    #[test]
    fn test_no_match_beyond_tolerance() {
        let gallery = vec![entry("a", 0.7)];
        assert_eq!(
            FirstWithinTolerance.compare(&desc(0.0), &gallery, 0.6),
            MatchResult::Unmatched
        );
        assert_eq!(
            NearestWithinTolerance.compare(&desc(0.0), &gallery, 0.6),
            MatchResult::Unmatched
        );
    }

    #[test]
    fn test_empty_gallery_always_unmatched() {
        for x in [0.0, 0.5, -3.0, 100.0] {
            assert_eq!(FirstWithinTolerance.compare(&desc(x), &[], 0.6), MatchResult::Unmatched);
            assert_eq!(NearestWithinTolerance.compare(&desc(x), &[], 10.0), MatchResult::Unmatched);
        }
    }

    #[test]
    fn test_scaled_bounding_box() {
        let bbox = BoundingBox {
            x: 10.0,
            y: 20.0,
            width: 30.0,
            height: 40.0,
            confidence: 0.8,
            landmarks: Some([(1.0, 2.0); 5]),
        };
        let big = bbox.scaled(4.0);
        assert_eq!((big.x, big.y, big.width, big.height), (40.0, 80.0, 120.0, 160.0));
        assert_eq!(big.confidence, 0.8);
        assert_eq!(big.landmarks, Some([(4.0, 8.0); 5]));
    }

    #[test]
    fn test_match_policy_parse() {
        assert_eq!("first".parse::<MatchPolicy>(), Ok(MatchPolicy::First));
        assert_eq!("Nearest".parse::<MatchPolicy>(), Ok(MatchPolicy::Nearest));
        assert!("closest".parse::<MatchPolicy>().is_err());
        assert_eq!(MatchPolicy::default(), MatchPolicy::First);
    }

    #[test]
    fn test_identity_label() {
        let identity = Identity {
            student_id: "S-01".into(),
            name: "Ada".into(),
            course: "Math".into(),
        };
        assert_eq!(identity.label(), "Ada (S-01)");
    }
}
