use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A single grayscale frame: a still photo or one sample of a live stream.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            sequence: 0,
        }
    }

    /// Convert a decoded photo to a grayscale frame.
    pub fn from_image(image: &DynamicImage) -> Self {
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();
        Self::new(gray.into_raw(), width, height)
    }

    /// Whether the pixel buffer covers `width * height`.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() >= (self.width as usize) * (self.height as usize)
    }
}

/// Face descriptor produced by the recognition network.
///
/// Immutable once produced. Two descriptors are only comparable when they
/// come from the same extractor configuration, see [`is_comparable_with`](Self::is_comparable_with).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    values: Vec<f32>,
    /// Model that produced this descriptor (e.g., "sface_2021dec").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_version: Option<String>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>, model_version: Option<String>) -> Self {
        Self {
            values,
            model_version,
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn model_version(&self) -> Option<&str> {
        self.model_version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Same dimensionality, and the same model when both sides are tagged.
    pub fn is_comparable_with(&self, other: &Descriptor) -> bool {
        if self.values.len() != other.values.len() {
            return false;
        }
        match (self.model_version(), other.model_version()) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Euclidean distance. Lower = more similar.
    ///
    /// Accumulated in f64 so that rounding cannot pull a pair across the
    /// acceptance threshold.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(&a, &b)| (f64::from(a) - f64::from(b)).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// Opaque identity key assigned on first enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(Uuid);

impl IdentityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IdentityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for IdentityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Warehouse areas an identity is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkArea {
    Intake,
    Refurb,
    Picking,
    Packing,
    Shipping,
}

impl WorkArea {
    pub const ALL: [WorkArea; 5] = [
        WorkArea::Intake,
        WorkArea::Refurb,
        WorkArea::Picking,
        WorkArea::Packing,
        WorkArea::Shipping,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkArea::Intake => "Intake",
            WorkArea::Refurb => "Refurb",
            WorkArea::Picking => "Picking",
            WorkArea::Packing => "Packing",
            WorkArea::Shipping => "Shipping",
        }
    }
}

impl fmt::Display for WorkArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkArea {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkArea::ALL
            .into_iter()
            .find(|area| area.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown work area {s:?}"))
    }
}

/// An enrolled (or enrollable) person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub first_name: String,
    pub last_name: String,
    pub bonus_number: String,
    pub payroll_number: String,
    #[serde(default)]
    pub work_areas: Vec<WorkArea>,
    /// Enrollment photo as a PNG data URL, see [`crate::photo`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default)]
    pub descriptor: Option<Descriptor>,
    /// When the current descriptor was captured.
    #[serde(default)]
    pub enrolled_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn has_photo(&self) -> bool {
        self.photo.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Only identities with a non-empty descriptor can ever be matched.
    pub fn is_matchable(&self) -> bool {
        self.descriptor.as_ref().is_some_and(|d| !d.is_empty())
    }
}

/// Outcome of matching one live descriptor against the roster.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    NoMatch,
    Matched { identity: Identity, distance: f64 },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            MatchResult::Matched { identity, .. } => Some(identity),
            MatchResult::NoMatch => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec(), None)
    }

    #[test]
    fn test_euclidean_identical() {
        let a = desc(&[0.1, 0.2, 0.3]);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_euclidean_known_value() {
        let a = desc(&[0.0, 0.0]);
        let b = desc(&[3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_euclidean_does_not_round_below_boundary() {
        // True distance is 0.5000000014; an f32 sum lands on 0.49999997.
        let a = desc(&[0.20785807, 0.05019851, 0.23638651]);
        let b = desc(&[0.55303764, 0.207454, 0.5621499]);
        let distance = a.euclidean_distance(&b);
        assert!(distance >= 0.5, "distance {distance} rounded below 0.5");
        assert!((distance - 0.5).abs() < 1e-7);
    }

    #[test]
    fn test_comparable_requires_same_length() {
        let a = desc(&[0.0, 0.0]);
        let b = desc(&[0.0, 0.0, 0.0]);
        assert!(!a.is_comparable_with(&b));
    }

    #[test]
    fn test_comparable_model_tags() {
        let a = Descriptor::new(vec![0.0; 4], Some("sface_2021dec".into()));
        let b = Descriptor::new(vec![0.0; 4], Some("w600k_r50".into()));
        let untagged = desc(&[0.0; 4]);
        assert!(!a.is_comparable_with(&b));
        assert!(a.is_comparable_with(&untagged));
    }

    #[test]
    fn test_identity_matchable() {
        let mut identity = Identity {
            id: IdentityId::new(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            bonus_number: "123".into(),
            payroll_number: "12345678".into(),
            work_areas: vec![WorkArea::Picking],
            photo: None,
            descriptor: None,
            enrolled_at: None,
        };
        assert!(!identity.is_matchable());
        identity.descriptor = Some(desc(&[]));
        assert!(!identity.is_matchable());
        identity.descriptor = Some(desc(&[0.5]));
        assert!(identity.is_matchable());
        assert_eq!(identity.display_name(), "Ada Lovelace");
        assert!(!identity.has_photo());
    }

    #[test]
    fn test_identity_without_new_fields_deserializes() {
        let json = r#"{
            "id": "6f1c2b1e-8f7a-4f55-9a53-0b8f3c8d2a10",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "bonus_number": "123",
            "payroll_number": "12345678"
        }"#;
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert!(identity.work_areas.is_empty());
        assert!(!identity.has_photo());
        assert!(!identity.is_matchable());
    }

    #[test]
    fn test_work_area_parse() {
        assert_eq!("packing".parse::<WorkArea>(), Ok(WorkArea::Packing));
        assert_eq!(" Intake ".parse::<WorkArea>(), Ok(WorkArea::Intake));
        assert!("Receiving".parse::<WorkArea>().is_err());
        assert_eq!(WorkArea::Refurb.to_string(), "Refurb");
    }

    #[test]
    fn test_frame_from_image() {
        let img = DynamicImage::new_rgb8(4, 3);
        let frame = Frame::from_image(&img);
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.data.len(), 12);
        assert!(frame.is_well_formed());
    }

    #[test]
    fn test_identity_id_parse_roundtrip() {
        let id = IdentityId::new();
        let parsed: IdentityId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
