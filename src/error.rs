use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for shotgun operations
#[derive(Error, Debug)]
pub enum ShotgunError {
    /// IO error when reading, probing or writing files
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Generation was requested without a template
    #[error("No template provided")]
    MissingTemplate,

    /// Refused to write an empty prompt
    #[error("Refusing to write empty prompt content")]
    EmptyContent,

    /// Output directory does not exist
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// Output path exists but is not a directory
    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Output directory failed the write probe
    #[error("Directory is not writable: {path}: {source}")]
    NotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing the prompt file failed after the directory was validated
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Rejected configuration value
    #[error("Invalid configuration: {field} must be greater than zero (got {value})")]
    InvalidConfig { field: &'static str, value: u64 },

    /// Cooperative cancellation was observed
    #[error("Operation cancelled")]
    Cancelled,

    /// Template renderer failure
    #[error("Template rendering failed: {message}")]
    Render { message: String },

    /// Background generation ended without delivering a result
    #[error("Prompt generation aborted: {reason}")]
    GenerationAborted { reason: String },

    /// Regex compilation error
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ShotgunError {
    /// True when the error is the cancellation signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ShotgunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ShotgunError::DirectoryNotFound {
            path: PathBuf::from("/test/dir"),
        };
        assert_eq!(format!("{err}"), "Directory not found: /test/dir");

        let err = ShotgunError::NotADirectory {
            path: PathBuf::from("/test/file.txt"),
        };
        assert_eq!(format!("{err}"), "Not a directory: /test/file.txt");

        let err = ShotgunError::InvalidConfig {
            field: "max_file_size",
            value: 0,
        };
        assert_eq!(
            format!("{err}"),
            "Invalid configuration: max_file_size must be greater than zero (got 0)"
        );

        let err = ShotgunError::NotWritable {
            path: PathBuf::from("/ro"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(format!("{err}").contains("/ro"));
        assert!(format!("{err}").contains("denied"));

        assert_eq!(format!("{}", ShotgunError::Cancelled), "Operation cancelled");
        assert_eq!(
            format!("{}", ShotgunError::MissingTemplate),
            "No template provided"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "test");
        let err: ShotgunError = io_err.into();
        assert!(matches!(err, ShotgunError::Io(_)));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: ShotgunError = json_err.into();
        assert!(matches!(err, ShotgunError::Json(_)));
    }

    #[test]
    fn test_cancelled_flag() {
        assert!(ShotgunError::Cancelled.is_cancelled());
    }
}
