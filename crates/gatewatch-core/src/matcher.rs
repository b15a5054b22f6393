//! Nearest-neighbour identification against the enrolled gallery.

use crate::types::{Embedding, Gallery, Identification};

/// Default maximum Euclidean distance for a positive match.
pub const DEFAULT_TOLERANCE: f32 = 0.5;

/// Strategy for classifying a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn classify(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> Identification;
}

/// Euclidean nearest-neighbour matcher.
///
/// Each identity scores the minimum distance over its samples; the identity
/// with the smallest score wins if that score is within tolerance. Ties go to
/// the identity enrolled first.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn classify(&self, probe: &Embedding, gallery: &Gallery, tolerance: f32) -> Identification {
        let mut best: Option<(usize, f32)> = None;

        for (i, identity) in gallery.identities().iter().enumerate() {
            let Some(dist) = nearest_sample(probe, identity.samples()) else {
                continue;
            };
            // Strict comparison keeps the earlier identity on exact ties.
            let is_better = match best {
                None => true,
                Some((_, best_dist)) => dist < best_dist,
            };
            if is_better {
                best = Some((i, dist));
            }
        }

        match best {
            Some((idx, dist)) if dist <= tolerance => Identification::Known {
                name: gallery.identities()[idx].name().to_string(),
                distance: dist,
            },
            _ => Identification::Unknown,
        }
    }
}

/// Minimum distance from `probe` to any comparable sample, or `None` when the
/// identity has no sample of the probe's dimension.
fn nearest_sample(probe: &Embedding, samples: &[Embedding]) -> Option<f32> {
    samples
        .iter()
        .filter(|s| s.dim() == probe.dim())
        .map(|s| probe.euclidean_distance(s))
        .filter(|d| !d.is_nan())
        .fold(None, |acc: Option<f32>, d| match acc {
            Some(m) if m <= d => Some(m),
            _ => Some(d),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn identity(name: &str, samples: &[&[f32]]) -> Identity {
        Identity {
            name: name.into(),
            samples: samples.iter().map(|s| emb(s)).collect(),
        }
    }

    fn gallery(identities: Vec<Identity>) -> Gallery {
        Gallery { identities }
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let result = EuclideanMatcher.classify(&emb(&[0.0, 0.0]), &Gallery::default(), 10.0);
        assert_eq!(result, Identification::Unknown);
    }

    #[test]
    fn test_picks_nearest_identity_over_all_samples() {
        let g = gallery(vec![
            identity("alice", &[&[1.0, 0.0], &[0.9, 0.1]]),
            identity("bob", &[&[0.0, 1.0], &[0.15, 0.0]]),
        ]);

        // bob's second sample is the globally nearest
        let result = EuclideanMatcher.classify(&emb(&[0.1, 0.0]), &g, DEFAULT_TOLERANCE);
        match result {
            Identification::Known { name, distance } => {
                assert_eq!(name, "bob");
                assert!((distance - 0.05).abs() < 1e-6);
            }
            Identification::Unknown => panic!("expected a match"),
        }
    }

    #[test]
    fn test_tolerance_boundary_is_inclusive() {
        let g = gallery(vec![identity("alice", &[&[0.0, 0.0]])]);

        let at = EuclideanMatcher.classify(&emb(&[0.5, 0.0]), &g, 0.5);
        assert_eq!(at, Identification::Known { name: "alice".into(), distance: 0.5 });

        let beyond = EuclideanMatcher.classify(&emb(&[0.5001, 0.0]), &g, 0.5);
        assert_eq!(beyond, Identification::Unknown);
    }

    #[test]
    fn test_tie_goes_to_first_enrolled() {
        let g = gallery(vec![
            identity("first", &[&[1.0, 0.0]]),
            identity("second", &[&[-1.0, 0.0]]),
        ]);

        let result = EuclideanMatcher.classify(&emb(&[0.0, 0.0]), &g, 2.0);
        assert_eq!(result.label(), "first");
    }

    #[test]
    fn test_skips_identity_without_samples() {
        let g = gallery(vec![
            identity("ghost", &[]),
            identity("alice", &[&[0.0, 0.0]]),
        ]);

        let result = EuclideanMatcher.classify(&emb(&[0.1, 0.0]), &g, 0.5);
        assert_eq!(result.label(), "alice");
    }

    #[test]
    fn test_skips_samples_of_other_dimension() {
        let g = gallery(vec![
            identity("short", &[&[0.0]]),
            identity("alice", &[&[0.3, 0.0]]),
        ]);

        let result = EuclideanMatcher.classify(&emb(&[0.0, 0.0]), &g, 0.5);
        assert_eq!(result.label(), "alice");
    }

    #[test]
    fn test_classify_is_deterministic() {
        let g = gallery(vec![
            identity("alice", &[&[0.2, 0.1, 0.7]]),
            identity("bob", &[&[0.3, 0.3, 0.3]]),
        ]);
        let probe = emb(&[0.25, 0.2, 0.5]);

        let first = EuclideanMatcher.classify(&probe, &g, 0.5);
        for _ in 0..10 {
            assert_eq!(EuclideanMatcher.classify(&probe, &g, 0.5), first);
        }
    }
}
