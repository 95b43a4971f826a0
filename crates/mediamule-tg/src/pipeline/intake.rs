//! Validation shared by every kind of job input. Nothing in here touches
//! the network, so a rejected input never costs an external call.

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub(crate) enum IntakeErrorKind {
    Validation,
    LimitExceeded,
    EmptyInput,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum IntakeError {
    #[error("{message}")]
    Malformed { message: String },

    #[error("{what}")]
    Empty { what: String },

    #[error("Maksimal {max} {unit_name}, diterima {actual}")]
    TooManyUnits {
        unit_name: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("{unit}: text tidak boleh kosong")]
    EmptyDescriptor { unit: String },

    #[error("{unit}: text max {max} karakter (diterima {actual})")]
    DescriptorTooLong {
        unit: String,
        max: usize,
        actual: usize,
    },

    #[error("{unit}: duration harus lebih dari 0 dan maksimal {max} detik (diterima {actual})")]
    InvalidDuration { unit: String, max: f64, actual: f64 },

    #[error("Link gak valid, beb! ({url})")]
    InvalidUrl { url: String },
}

impl IntakeError {
    pub(crate) fn kind(&self) -> IntakeErrorKind {
        match self {
            Self::Malformed { .. }
            | Self::EmptyDescriptor { .. }
            | Self::InvalidDuration { .. }
            | Self::InvalidUrl { .. } => IntakeErrorKind::Validation,
            Self::TooManyUnits { .. } | Self::DescriptorTooLong { .. } => {
                IntakeErrorKind::LimitExceeded
            }
            Self::Empty { .. } => IntakeErrorKind::EmptyInput,
        }
    }
}

/// Shape limits of a job input
#[derive(Debug, Clone, Copy)]
pub(crate) struct IntakeLimits {
    pub(crate) unit_name: &'static str,
    pub(crate) max_units: usize,
    pub(crate) max_descriptor_chars: usize,
}

impl IntakeLimits {
    pub(crate) fn check_unit_count(&self, actual: usize) -> Result<(), IntakeError> {
        if actual == 0 {
            return Err(IntakeError::Empty {
                what: format!("Perlu minimal 1 {}", self.unit_name),
            });
        }
        if actual > self.max_units {
            return Err(IntakeError::TooManyUnits {
                unit_name: self.unit_name,
                max: self.max_units,
                actual,
            });
        }
        Ok(())
    }

    /// Returns the trimmed descriptor if it is valid. `unit` is the
    /// human-readable label of the unit used in the error message.
    pub(crate) fn check_descriptor(&self, unit: String, text: &str) -> Result<String, IntakeError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(IntakeError::EmptyDescriptor { unit });
        }

        let actual = text.chars().count();
        if actual > self.max_descriptor_chars {
            return Err(IntakeError::DescriptorTooLong {
                unit,
                max: self.max_descriptor_chars,
                actual,
            });
        }

        Ok(text.to_owned())
    }
}
