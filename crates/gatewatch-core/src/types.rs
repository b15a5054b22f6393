use serde::{Deserialize, Serialize};

/// Label reported for faces that match no enrolled identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence, when the detector reports one.
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Face embedding vector. Dimension is fixed by the detector that produced it
/// (128 for dlib-style encoders, 512 for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Callers must compare embeddings of equal dimension; extra trailing
    /// components of the longer vector are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// An enrolled person: a unique name plus the reference samples captured at
/// enrollment. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub(crate) name: String,
    pub(crate) samples: Vec<Embedding>,
}

impl Identity {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn samples(&self) -> &[Embedding] {
        &self.samples
    }
}

/// Ordered set of enrolled identities. Order is enrollment order and decides
/// ties during matching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    pub(crate) identities: Vec<Identity>,
}

impl Gallery {
    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn get(&self, name: &str) -> Option<&Identity> {
        self.identities.iter().find(|i| i.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Embedding dimension of the first stored sample, if any.
    pub fn dim(&self) -> Option<usize> {
        self.identities
            .iter()
            .flat_map(|i| i.samples.first())
            .map(Embedding::dim)
            .next()
    }
}

/// Outcome of matching one probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    Known { name: String, distance: f32 },
    Unknown,
}

impl Identification {
    /// Display label: the identity name or [`UNKNOWN_LABEL`].
    pub fn label(&self) -> &str {
        match self {
            Identification::Known { name, .. } => name,
            Identification::Unknown => UNKNOWN_LABEL,
        }
    }

    pub fn distance(&self) -> Option<f32> {
        match self {
            Identification::Known { distance, .. } => Some(*distance),
            Identification::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Identification::Unknown)
    }
}

/// Per-face, per-frame classification. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub bbox: BoundingBox,
    pub identification: Identification,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_identification_label() {
        let known = Identification::Known { name: "alice".into(), distance: 0.2 };
        assert_eq!(known.label(), "alice");
        assert_eq!(known.distance(), Some(0.2));
        assert!(!known.is_unknown());

        assert_eq!(Identification::Unknown.label(), UNKNOWN_LABEL);
        assert_eq!(Identification::Unknown.distance(), None);
    }

    #[test]
    fn test_embedding_serializes_as_plain_list() {
        let e = Embedding::new(vec![0.5, -1.25]);
        assert_eq!(serde_json::to_string(&e).unwrap(), "[0.5,-1.25]");
    }
}
