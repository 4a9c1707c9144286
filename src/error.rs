//! Error types shared by the build pipeline and the reader

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T, E = IndexError> = std::result::Result<T, E>;

/// Build stages, used to report which part of a build failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Scan,
    Sort,
    Postings,
    Dictionaries,
    Reviews,
    Finalize,
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BuildStage::Scan => "scan",
            BuildStage::Sort => "sort",
            BuildStage::Postings => "postings",
            BuildStage::Dictionaries => "dictionaries",
            BuildStage::Reviews => "reviews",
            BuildStage::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum IndexError {
    /// Malformed encoded data, truncated or inconsistent index files
    #[error("Corrupt data: {0}")]
    CorruptData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The memory budget does not allow the build to make progress
    #[error("Resources exhausted: {0}")]
    ResourceExhausted(String),

    /// A review record violates a precondition of the build
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Build failed during the {stage} stage: {source}")]
    Build {
        stage: BuildStage,
        #[source]
        source: Box<IndexError>,
    },
}

impl IndexError {
    pub fn corrupt<S: Into<String>>(message: S) -> Self {
        IndexError::CorruptData(message.into())
    }

    /// Attach the build stage to an error (errors that already carry
    /// a stage are left untouched)
    pub fn at_stage(self, stage: BuildStage) -> Self {
        match self {
            IndexError::Build { .. } => self,
            other => IndexError::Build {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Returns the stage where a build failed, if any
    pub fn stage(&self) -> Option<BuildStage> {
        match self {
            IndexError::Build { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Maps an I/O error raised while decoding an in-memory buffer:
/// running out of bytes means the data is truncated
pub(crate) fn decoding_error(e: std::io::Error) -> IndexError {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof => IndexError::corrupt("unexpected end of encoded data"),
        _ => IndexError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::corrupt("bad header");
        assert_eq!(err.to_string(), "Corrupt data: bad header");
    }

    #[test]
    fn test_stage_is_kept() {
        let err = IndexError::ResourceExhausted("fan-in".to_string()).at_stage(BuildStage::Sort);
        assert_eq!(err.stage(), Some(BuildStage::Sort));

        // A second stage does not override the first one
        let err = err.at_stage(BuildStage::Finalize);
        assert_eq!(err.stage(), Some(BuildStage::Sort));
        assert!(err.to_string().starts_with("Build failed during the sort stage"));
    }
}
