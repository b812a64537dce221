use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("{operation} failed: {message}")]
    WarehouseError { operation: String, message: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Secrets error: {message}")]
    SecretsError { message: String },

    #[error("Notification error: {message}")]
    NotificationError { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Warehouse,
    Storage,
    Network,
    Data,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn warehouse(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        EtlError::WarehouseError {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        EtlError::ProcessingError {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        EtlError::StorageError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::ConfigError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::ConfigValidationError { .. }
            | EtlError::SecretsError { .. } => ErrorCategory::Configuration,
            EtlError::WarehouseError { .. } => ErrorCategory::Warehouse,
            EtlError::StorageError { .. } => ErrorCategory::Storage,
            EtlError::HttpError(_) | EtlError::NotificationError { .. } => ErrorCategory::Network,
            EtlError::SerializationError(_)
            | EtlError::YamlError(_)
            | EtlError::ArrowError(_)
            | EtlError::ParquetError(_)
            | EtlError::ProcessingError { .. }
            | EtlError::ValidationError { .. } => ErrorCategory::Data,
            EtlError::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Warehouse | ErrorCategory::Storage | ErrorCategory::Data => {
                ErrorSeverity::High
            }
            ErrorCategory::Configuration | ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the environment variables, the secret store contents and the command-line flags"
            }
            ErrorCategory::Warehouse => {
                "Verify warehouse connectivity, credentials and that the referenced tables exist"
            }
            ErrorCategory::Storage => "Verify the bucket exists and the IAM role can read and write it",
            ErrorCategory::Network => "Retry later; check network reachability of the remote service",
            ErrorCategory::Data => "Inspect the source data and the transformation for unexpected values",
            ErrorCategory::System => "Check file permissions and available disk space",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            EtlError::MissingConfigError { field } => {
                format!("Configuration value {} is required but was not provided", field)
            }
            EtlError::InvalidConfigValueError { field, reason, .. } => {
                format!("Configuration value {} is invalid: {}", field, reason)
            }
            EtlError::WarehouseError { operation, .. } => {
                format!("Warehouse operation '{}' failed", operation)
            }
            other => other.to_string(),
        }
    }
}

impl From<sea_orm::DbErr> for EtlError {
    fn from(err: sea_orm::DbErr) -> Self {
        EtlError::warehouse("Database operation", err)
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
