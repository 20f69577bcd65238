//! Classifier boundary: captured image in, [`IdentityOutcome`] out.

use crate::gallery::Gallery;
use crate::outcome::IdentityOutcome;
use crate::types::{CosineMatcher, Embedding, MatchResult, Matcher};
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("embedder error: {0}")]
    Embedder(String),
    #[error("classifier panicked")]
    Panicked,
}

/// Capability that turns a decoded captured image into an identity outcome.
///
/// Calls are blocking and CPU- or IO-bound; the daemon runs them on a
/// dedicated thread. An `Err` is reported to clients as a classification
/// error, never as a crash.
pub trait IdentityClassifier: Send {
    fn classify(&mut self, image: &DynamicImage) -> Result<IdentityOutcome, ClassifyError>;
}

/// Face detection + embedding extraction. Returns one embedding per face
/// found in the image, possibly none.
pub trait FaceEmbedder: Send {
    fn embed(&mut self, image: &DynamicImage) -> Result<Vec<Embedding>, ClassifyError>;
}

/// Classifier that matches every face an embedder finds against a gallery.
pub struct GalleryClassifier<E> {
    embedder: E,
    gallery: Gallery,
    threshold: f32,
}

impl<E: FaceEmbedder> GalleryClassifier<E> {
    pub fn new(embedder: E, gallery: Gallery, threshold: f32) -> Self {
        Self {
            embedder,
            gallery,
            threshold,
        }
    }
}

impl<E: FaceEmbedder> IdentityClassifier for GalleryClassifier<E> {
    fn classify(&mut self, image: &DynamicImage) -> Result<IdentityOutcome, ClassifyError> {
        let faces = self.embedder.embed(image)?;
        if faces.is_empty() {
            tracing::info!("no face detected in captured image");
            return Ok(IdentityOutcome::NoFaceFound);
        }

        // Best result across every face in the frame.
        let mut best: Option<MatchResult> = None;
        for face in &faces {
            let result = CosineMatcher.compare(face, self.gallery.models(), self.threshold);
            let is_better = match &best {
                None => true,
                Some(prev) => {
                    (result.matched && !prev.matched)
                        || (result.matched == prev.matched && result.similarity > prev.similarity)
                }
            };
            if is_better {
                best = Some(result);
            }
        }

        match best {
            Some(MatchResult {
                matched: true,
                identity: Some(identity),
                similarity,
                ..
            }) => {
                tracing::info!(%identity, similarity, faces = faces.len(), "face recognized");
                Ok(IdentityOutcome::Matched(identity))
            }
            other => {
                let similarity = other.map(|r| r.similarity).unwrap_or(0.0);
                tracing::info!(similarity, faces = faces.len(), "face not recognized");
                Ok(IdentityOutcome::UnknownPerson)
            }
        }
    }
}
