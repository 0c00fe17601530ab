use thiserror::Error;

use crate::family::FamilyId;

/// Fatal conditions that abort a detection call.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("invalid input frame: {0}")]
    InvalidInput(String),
}

/// Rejected configuration. The previously active configuration stays in place.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown marker family '{0}'")]
    UnknownFamily(String),

    #[error("family {0} is not registered")]
    NotRegistered(FamilyId),

    #[error("invalid {family} parameters: {message}")]
    Malformed { family: FamilyId, message: String },

    #[error("invalid id selection '{0}'")]
    IdSet(String),

    #[error("invalid detector parameters: {0}")]
    Detector(String),

    #[error("config parse error: {0}")]
    Parse(String),
}

/// Correspondence sets from which no transform can be solved.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("need at least 4 correspondences, got {0}")]
    TooFewPoints(usize),

    #[error("correspondences are collinear or coincident")]
    Collinear,

    #[error("linear system is singular")]
    Singular,
}
