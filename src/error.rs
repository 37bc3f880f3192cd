use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetaQueryError {
    #[error("Parse error: {message} (at '{fragment}')")]
    Parse { message: String, fragment: String },
    #[error("Type error: value '{value}' of field '{field}' is not a valid {expected}")]
    Type {
        field: String,
        value: String,
        expected: String,
    },
    #[error("Contradiction: '{left}' AND '{right}' cannot both hold")]
    Contradiction { left: String, right: String },
    #[error("Unsupported combination: '{left}' AND '{right}'")]
    UnsupportedCombination { left: String, right: String },
    #[error("Store error: {0}")]
    Store(String),
    #[error("Field definition error: {0}")]
    FieldDefinition(String),
    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MetaQueryError>;

impl MetaQueryError {
    pub fn parse(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            fragment: fragment.into(),
        }
    }
    pub fn contradiction(left: impl ToString, right: impl ToString) -> Self {
        Self::Contradiction {
            left: left.to_string(),
            right: right.to_string(),
        }
    }
    /// Prefix the terms named by a merge failure with their field.
    pub fn on_field(self, field: &str) -> Self {
        match self {
            Self::Contradiction { left, right } => Self::Contradiction {
                left: format!("{field} {left}"),
                right: format!("{field} {right}"),
            },
            Self::UnsupportedCombination { left, right } => Self::UnsupportedCombination {
                left: format!("{field} {left}"),
                right: format!("{field} {right}"),
            },
            other => other,
        }
    }
}

// Helper conversions
impl From<rusqlite::Error> for MetaQueryError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<config::ConfigError> for MetaQueryError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<serde_json::Error> for MetaQueryError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse(e.to_string(), "json")
    }
}
