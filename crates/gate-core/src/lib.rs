//! gate-core — Identity classification boundary for the door gate.
//!
//! Defines the outcome of classifying one captured image, the classifier
//! capability the daemon drives, and the embedding gallery used to turn
//! face embeddings into named identities.

pub mod classifier;
pub mod gallery;
pub mod outcome;
pub mod types;

pub use classifier::{ClassifyError, FaceEmbedder, GalleryClassifier, IdentityClassifier};
pub use gallery::{Gallery, GalleryError};
pub use outcome::IdentityOutcome;
pub use types::{CosineMatcher, Embedding, FaceModel, MatchResult, Matcher};

/// Default encoding database directory, relative to the working directory.
pub fn default_db_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("./db")
}
