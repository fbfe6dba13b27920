use thiserror::Error;

/// Failures raised while generating, validating, or enqueueing a kernel.
///
/// Device-limit violations are not errors; they are reported as
/// [`crate::validity::TemplateStatus`] values so a parameter search can check
/// them cheaply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    /// The kernel shape cannot express the statement at all. Not retryable:
    /// the caller has to pick another shape or parameter set.
    #[error("generator cannot apply the given template to the given statement: {message}")]
    TemplateMismatch { message: String },
    #[error("malformed statement: {message}")]
    MalformedStatement { message: String },
    #[error("invalid kernel argument: {message}")]
    Argument { message: String },
    #[error("runtime failure: {message}")]
    Runtime { message: String },
}

impl GeneratorError {
    pub fn template_mismatch(message: impl Into<String>) -> Self {
        GeneratorError::TemplateMismatch {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        GeneratorError::MalformedStatement {
            message: message.into(),
        }
    }

    pub fn argument(message: impl Into<String>) -> Self {
        GeneratorError::Argument {
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        GeneratorError::Runtime {
            message: message.into(),
        }
    }

    pub fn is_template_mismatch(&self) -> bool {
        matches!(self, GeneratorError::TemplateMismatch { .. })
    }
}

pub type GeneratorResult<T> = Result<T, GeneratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_mismatch_carries_diagnostic() {
        let err = GeneratorError::template_mismatch("matrix operands are not supported");
        assert!(err.is_template_mismatch());
        assert!(err
            .to_string()
            .ends_with("to the given statement: matrix operands are not supported"));
    }

    #[test]
    fn malformed_is_not_a_template_mismatch() {
        let err = GeneratorError::malformed("node 3 out of range");
        assert!(!err.is_template_mismatch());
        assert_eq!(err.to_string(), "malformed statement: node 3 out of range");
    }
}
