//! Error types for the phenology pipeline.

use thiserror::Error;

/// Main error type for pheno-core operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Insufficient data: needed at least {needed} valid points, found {found}")]
    InsufficientData { needed: usize, found: usize },

    #[error("Singular design matrix: rank {rank} < {columns} columns")]
    SingularSystem { rank: usize, columns: usize },

    #[error("Model shape mismatch: expected {expected} coefficients, found {found}")]
    ModelShape { expected: usize, found: usize },

    #[error(
        "Cannot align zone grid {}x{} to metric grid {}x{}: {reason}",
        zones.0, zones.1, metric.0, metric.1
    )]
    Alignment {
        metric: (usize, usize),
        zones: (usize, usize),
        reason: String,
    },

    #[error("Zone {class_id} has no contributing pixels")]
    EmptyZone { class_id: u16 },

    #[error(
        "Grid size mismatch: expected {}x{}, got {}x{}",
        expected.0, expected.1, found.0, found.1
    )]
    GridMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("At pixel ({row}, {col}): {source}")]
    Pixel {
        row: usize,
        col: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Run cancelled after {completed_chunks} of {total_chunks} chunks")]
    Cancelled {
        completed_chunks: usize,
        total_chunks: usize,
    },
}

impl Error {
    /// True for per-pixel numerical failures that resolve to an undefined
    /// record instead of aborting the run.
    pub fn is_pixel_recoverable(&self) -> bool {
        matches!(self, Error::InsufficientData { .. } | Error::SingularSystem { .. })
    }

    /// Attach pixel coordinates to a fatal error.
    pub fn at_pixel(self, row: usize, col: usize) -> Self {
        Error::Pixel {
            row,
            col,
            source: Box::new(self),
        }
    }

    pub(crate) fn invalid(name: &'static str, value: impl ToString, reason: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for pheno-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_kinds() {
        assert!(Error::InsufficientData { needed: 8, found: 3 }.is_pixel_recoverable());
        assert!(Error::SingularSystem { rank: 1, columns: 7 }.is_pixel_recoverable());
        assert!(!Error::ModelShape { expected: 7, found: 5 }.is_pixel_recoverable());
    }

    #[test]
    fn pixel_context_in_message() {
        let err = Error::ModelShape { expected: 7, found: 5 }.at_pixel(3, 9);
        let msg = err.to_string();
        assert!(msg.contains("(3, 9)"), "{msg}");
        assert!(msg.contains("expected 7"), "{msg}");
    }

    #[test]
    fn alignment_reports_both_shapes() {
        let err = Error::Alignment {
            metric: (4, 2),
            zones: (0, 0),
            reason: "zone grid is empty".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0x0") && msg.contains("4x2"), "{msg}");
    }
}
