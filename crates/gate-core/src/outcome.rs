use serde::{Serialize, Serializer};
use std::fmt;

const NO_FACE_FOUND: &str = "no_persons_found";
const UNKNOWN_PERSON: &str = "unknown_person";
const CLASSIFICATION_ERROR: &str = "error";

/// Result of classifying one captured image.
///
/// Exactly one variant holds per classification. Only [`Matched`](Self::Matched)
/// may lead to actuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// A face matched the enrolled identity with this label.
    Matched(String),
    /// No face was detected in the image.
    NoFaceFound,
    /// At least one face was found but none matched the gallery.
    UnknownPerson,
    /// The classifier failed; the image was not classified.
    ClassificationError,
}

impl IdentityOutcome {
    /// Wire value of the `match` field in a recognition response.
    pub fn as_match_str(&self) -> &str {
        match self {
            IdentityOutcome::Matched(identity) => identity,
            IdentityOutcome::NoFaceFound => NO_FACE_FOUND,
            IdentityOutcome::UnknownPerson => UNKNOWN_PERSON,
            IdentityOutcome::ClassificationError => CLASSIFICATION_ERROR,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, IdentityOutcome::Matched(_))
    }
}

impl fmt::Display for IdentityOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_match_str())
    }
}

impl Serialize for IdentityOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_match_str())
    }
}
