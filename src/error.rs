//! Error types for module resolution and image compilation

use std::sync::Arc;

use thiserror::Error;

/// Result type for module operations
pub type Result<T> = std::result::Result<T, ModuleError>;

/// Remediation command named in deprecated digest errors
pub const UPDATE_COMMAND: &str = "mod update";

/// Module, lock file, and image errors
///
/// Everything except [`ModuleError::Internal`] is a user/input error.
/// The type is `Clone` so memoized failures can be replayed to every caller.
#[derive(Error, Debug, Clone)]
pub enum ModuleError {
    #[error("invalid module name {0:?}: must be in the form registry/owner/name")]
    InvalidModuleFullName(String),

    #[error("invalid module reference {0:?}: must be in the form registry/owner/name[:ref]")]
    InvalidModuleRef(String),

    #[error("invalid digest {digest:?}: {reason}")]
    InvalidDigest { digest: String, reason: String },

    #[error(
        "{} digests are no longer supported, run \"{}\" to regenerate your lock file",
        .digest_type,
        UPDATE_COMMAND
    )]
    DeprecatedDigest { digest_type: String },

    #[error("duplicate module {0:?} attempted to be added to lock file")]
    DuplicateModule(String),

    #[error("duplicate module ID {0:?} in module set")]
    DuplicateModuleId(String),

    #[error("{}", missing_field_message(.field, .module.as_deref()))]
    MissingField {
        field: &'static str,
        module: Option<String>,
    },

    #[error("unknown file version: {0:?}")]
    UnknownFileVersion(String),

    #[error("invalid as version {version}: {message}")]
    InvalidLockFile { version: String, message: String },

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("{path}: duplicate path, present in both {first} and {second}")]
    DuplicatePath {
        path: String,
        first: String,
        second: String,
    },

    #[error("{file}: import {import:?} was not found")]
    ImportNotFound { file: String, import: String },

    #[error("import cycle detected: {}", .cycle.join(" -> "))]
    ImportCycle { cycle: Vec<String> },

    #[error("{second}: symbol {symbol:?} is already defined in {first}")]
    DuplicateSymbol {
        symbol: String,
        first: String,
        second: String,
    },

    #[error("{file}: {reference:?} is not defined")]
    UnresolvedReference { file: String, reference: String },

    #[error("{path}:{line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("operation canceled")]
    Canceled,

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ModuleError {
    /// Build an internal invariant violation
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True if this error signals a bug rather than bad input
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<std::io::Error> for ModuleError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

fn missing_field_message(field: &str, module: Option<&str>) -> String {
    match module {
        Some(module) => format!("no {} specified for module {}", field, module),
        None => format!("{} missing", field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_is_distinguishable() {
        let err = ModuleError::internal("unknown file version 7");
        assert!(err.is_internal());
        assert!(err.to_string().starts_with("internal error:"));
        assert!(!ModuleError::Canceled.is_internal());
    }

    #[test]
    fn test_cycle_message_lists_chain() {
        let err = ModuleError::ImportCycle {
            cycle: vec!["a.proto".into(), "b.proto".into(), "a.proto".into()],
        };
        assert_eq!(
            err.to_string(),
            "import cycle detected: a.proto -> b.proto -> a.proto"
        );
    }

    #[test]
    fn test_missing_field_messages() {
        let err = ModuleError::MissingField { field: "remote", module: None };
        assert_eq!(err.to_string(), "remote missing");
        let err = ModuleError::MissingField {
            field: "commit",
            module: Some("buf.build/acme/weather".into()),
        };
        assert_eq!(err.to_string(), "no commit specified for module buf.build/acme/weather");
    }
}
