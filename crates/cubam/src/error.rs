//! Error type shared by the dataset loader, models and evaluation helpers.

use crate::model::{EntityKind, ModelVariant};

// ── Error type ─────────────────────────────────────────────────────────────

/// Errors returned by the aggregation engine.
///
/// Numeric degeneracy during the image step is not an error; it is reported
/// through [`crate::StepReport`].
#[derive(Debug)]
pub enum CubamError {
    /// Malformed label file or record set.
    DataFormat {
        /// 1-based line number, when the error comes from a text source.
        line: Option<usize>,
        /// Human-readable description.
        message: String,
    },
    /// Underlying I/O failure while reading or writing a label file.
    Io(std::io::Error),
    /// A parameter vector length disagrees with the declared cardinality.
    DimensionMismatch {
        /// Which vector was checked (e.g. "worker parameters").
        what: &'static str,
        /// Declared length.
        expected: usize,
        /// Supplied length.
        got: usize,
    },
    /// Requested model variant name is not implemented.
    UnknownVariant(String),
    /// Estimated and ground-truth sequences do not line up.
    EvaluationPrecondition(String),
    /// The model variant does not provide this capability.
    Unsupported {
        /// Variant that was asked.
        variant: ModelVariant,
        /// Operation name.
        operation: &'static str,
    },
    /// Entity id outside `0..count`.
    EntityOutOfRange {
        /// Worker or image.
        kind: EntityKind,
        /// Requested id.
        id: usize,
        /// Number of entities of that kind.
        count: usize,
    },
    /// Parameter value outside its valid domain.
    InvalidParameter(String),
    /// Kernel call issued before a dataset was loaded.
    DataNotLoaded,
}

impl CubamError {
    pub(crate) fn data_format(line: Option<usize>, message: impl Into<String>) -> Self {
        Self::DataFormat {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn check_len(what: &'static str, expected: usize, got: usize) -> Result<()> {
        if expected == got {
            Ok(())
        } else {
            Err(Self::DimensionMismatch {
                what,
                expected,
                got,
            })
        }
    }
}

impl std::fmt::Display for CubamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataFormat {
                line: Some(line),
                message,
            } => write!(f, "data format error at line {}: {}", line, message),
            Self::DataFormat {
                line: None,
                message,
            } => write!(f, "data format error: {}", message),
            Self::Io(e) => write!(f, "i/o error: {}", e),
            Self::DimensionMismatch {
                what,
                expected,
                got,
            } => write!(
                f,
                "dimension mismatch for {}: expected length {}, got {}",
                what, expected, got
            ),
            Self::UnknownVariant(name) => write!(f, "unknown model variant '{}'", name),
            Self::EvaluationPrecondition(msg) => write!(f, "evaluation precondition: {}", msg),
            Self::Unsupported { variant, operation } => {
                write!(f, "{} does not support {}", variant, operation)
            }
            Self::EntityOutOfRange { kind, id, count } => {
                write!(f, "{} id {} out of range (count {})", kind, id, count)
            }
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {}", msg),
            Self::DataNotLoaded => write!(f, "no label data loaded"),
        }
    }
}

impl std::error::Error for CubamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CubamError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CubamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mentions_lengths() {
        let e = CubamError::check_len("image parameters", 4, 3).unwrap_err();
        let msg = e.to_string();
        assert!(msg.contains("image parameters"), "{}", msg);
        assert!(msg.contains('4') && msg.contains('3'), "{}", msg);
    }

    #[test]
    fn unsupported_names_variant() {
        let e = CubamError::Unsupported {
            variant: ModelVariant::Majority,
            operation: "gradient",
        };
        assert_eq!(e.to_string(), "majority does not support gradient");
    }
}
