//! 安全协作者：凭据解密、路径校验与命令白名单。
//!
//! # Security Collaborator
//!
//! The orchestration core does not own credential storage. It consumes a
//! [`SecurityValidator`] that can decrypt a named credential right before an
//! adapter call, and that surrounding layers use for path and command checks.
//!
//! Adapters never hold a [`Credential`] beyond the call that needed it; the
//! only long-lived secret-derived state is the enterprise auth token cache in
//! [`crate::drivers::token`].

mod standard;

pub use standard::{StandardSecurity, DEFAULT_ALLOWED_COMMANDS, KEYRING_SERVICE};

use crate::{Error, ErrorContext, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Plaintext secret scoped to a single backend call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// External security collaborator.
pub trait SecurityValidator: Send + Sync {
    /// Resolve `path` against `base_dir`, rejecting anything that escapes it.
    fn validate_path(&self, path: &str, base_dir: &str) -> std::result::Result<PathBuf, String>;

    /// Accept an allow-listed command or explain why it was rejected.
    fn sanitize_command(&self, command: &str) -> std::result::Result<String, String>;

    /// Decrypt the named credential. Called immediately before each backend call.
    fn decrypt_credential(&self, name: &str) -> Result<Credential>;
}

/// In-memory credential source, mainly for tests and embedding applications
/// that already hold decrypted secrets.
#[derive(Default)]
pub struct StaticSecurity {
    secrets: HashMap<String, String>,
    inner: StandardSecurity,
}

impl StaticSecurity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), secret.into());
        self
    }
}

impl SecurityValidator for StaticSecurity {
    fn validate_path(&self, path: &str, base_dir: &str) -> std::result::Result<PathBuf, String> {
        self.inner.validate_path(path, base_dir)
    }

    fn sanitize_command(&self, command: &str) -> std::result::Result<String, String> {
        self.inner.sanitize_command(command)
    }

    fn decrypt_credential(&self, name: &str) -> Result<Credential> {
        self.secrets
            .get(name)
            .map(|s| Credential::new(s.clone()))
            .ok_or_else(|| missing_credential(name, "static_security"))
    }
}

pub(crate) fn missing_credential(name: &str, source: &str) -> Error {
    Error::configuration_with_context(
        format!("credential '{}' is not available", name),
        ErrorContext::new()
            .with_field_path(format!("credentials.{}", name))
            .with_source(source),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let c = Credential::new("sk-very-secret");
        assert_eq!(format!("{:?}", c), "Credential(***)");
        assert_eq!(c.expose(), "sk-very-secret");
    }

    #[test]
    fn test_static_security_lookup() {
        let sec = StaticSecurity::new().with_secret("OPENAI_API_KEY", "sk-123");
        assert_eq!(
            sec.decrypt_credential("OPENAI_API_KEY").unwrap().expose(),
            "sk-123"
        );
        let err = sec.decrypt_credential("GEMINI_API_KEY").unwrap_err();
        assert!(err.is_config_invalid());
    }
}
