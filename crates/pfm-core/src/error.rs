/// Errors raised by the pure engine.
///
/// Only configuration problems are errors here; degenerate inputs (empty
/// candidate sets, zero vectors) have well-defined defaults instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid configuration: {what} = {value}")]
    InvalidConfiguration { what: String, value: String },
}

impl CoreError {
    pub fn invalid(what: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidConfiguration {
            what: what.into(),
            value: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
