// Error taxonomy for hostprep

use std::path::PathBuf;

use thiserror::Error;

/// All error types surfaced by the runner and its collaborators.
#[derive(Debug, Error)]
pub enum PrepError {
    /// SSH connection or channel errors
    #[error("SSH error on {host}: {message}")]
    Ssh {
        host: String,
        message: String,
        suggestion: Option<String>,
    },

    /// Module execution errors (transport worked, the action did not)
    #[error("module '{module}' failed on {host}: {message}")]
    Module {
        module: &'static str,
        task: String,
        host: String,
        message: String,
        stderr: Option<String>,
    },

    /// Template rendering errors (unresolved or malformed references)
    #[error("template error in '{expression}': {message}")]
    Template { expression: String, message: String },

    /// Inventory errors
    #[error("inventory error: {message}")]
    Inventory { message: String },

    /// I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
    },

    /// Local command execution errors
    #[error("runtime error: {message}")]
    Runtime { message: String },
}

impl PrepError {
    /// Whether the error means the host could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, PrepError::Ssh { .. })
    }

    /// Operator hint attached to the error, if any.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            PrepError::Ssh { suggestion, .. } => suggestion.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_error_is_unreachable() {
        let err = PrepError::Ssh {
            host: "web1".to_string(),
            message: "connection refused".to_string(),
            suggestion: Some("Ensure SSH service is running on the target".to_string()),
        };

        assert!(err.is_unreachable());
        assert_eq!(
            err.suggestion(),
            Some("Ensure SSH service is running on the target")
        );
        assert!(err.to_string().contains("web1"));
    }

    #[test]
    fn test_template_error_display() {
        let err = PrepError::Template {
            expression: "{{ shell_out.stdout }}".to_string(),
            message: "undefined variable 'shell_out'".to_string(),
        };

        assert!(!err.is_unreachable());
        assert!(err.to_string().contains("shell_out"));
    }
}
