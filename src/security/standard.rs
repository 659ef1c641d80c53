use keyring::Entry;
use once_cell::sync::Lazy;
use regex::Regex;
use std::env;
use std::path::{Component, Path, PathBuf};

use super::{missing_credential, Credential, SecurityValidator};
use crate::Result;

pub const KEYRING_SERVICE: &str = "omni-orchestrator";

pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "ls", "pwd", "cat", "echo", "git", "kubectl", "docker", "terraform", "helm",
];

static DANGEROUS_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"[;&|`$]", "command chaining or substitution"),
        (r">\s*/dev", "writing to a device"),
        (r"rm\s+-rf", "recursive forced removal"),
    ]
    .into_iter()
    .filter_map(|(p, why)| Regex::new(p).ok().map(|re| (re, why)))
    .collect()
});

/// Credential lookup through the OS keyring, then the environment.
pub struct StandardSecurity {
    allowed_commands: Vec<String>,
}

impl StandardSecurity {
    pub fn new() -> Self {
        Self {
            allowed_commands: DEFAULT_ALLOWED_COMMANDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn with_allowed_commands(mut self, commands: Vec<String>) -> Self {
        self.allowed_commands = commands;
        self
    }
}

impl Default for StandardSecurity {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityValidator for StandardSecurity {
    fn validate_path(&self, path: &str, base_dir: &str) -> std::result::Result<PathBuf, String> {
        let base = normalize(Path::new(base_dir));
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            Path::new(base_dir).join(candidate)
        };
        let target = normalize(&joined);
        if !target.starts_with(&base) {
            return Err("Path traversal detected".to_string());
        }
        Ok(target)
    }

    fn sanitize_command(&self, command: &str) -> std::result::Result<String, String> {
        let trimmed = command.trim();
        let Some(base_cmd) = trimmed.split_whitespace().next() else {
            return Err("Empty command".to_string());
        };
        if !self.allowed_commands.iter().any(|c| c == base_cmd) {
            return Err(format!("Command '{}' not allowed", base_cmd));
        }
        for (re, why) in DANGEROUS_PATTERNS.iter() {
            if re.is_match(trimmed) {
                return Err(format!("Dangerous pattern detected: {}", why));
            }
        }
        Ok(trimmed.to_string())
    }

    fn decrypt_credential(&self, name: &str) -> Result<Credential> {
        // 1. Keyring
        if let Ok(entry) = Entry::new(KEYRING_SERVICE, name) {
            if let Ok(secret) = entry.get_password() {
                if !secret.trim().is_empty() {
                    return Ok(Credential::new(secret));
                }
            }
        }

        // 2. Environment variable of the same name
        match env::var(name) {
            Ok(v) if !v.trim().is_empty() => Ok(Credential::new(v)),
            _ => Err(missing_credential(name, "standard_security")),
        }
    }
}

/// Lexical normalization: resolves `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_inside_base_is_accepted() {
        let sec = StandardSecurity::new();
        let p = sec.validate_path("src/main.rs", "/srv/project").unwrap();
        assert_eq!(p, PathBuf::from("/srv/project/src/main.rs"));
    }

    #[test]
    fn test_path_traversal_is_rejected() {
        let sec = StandardSecurity::new();
        assert!(sec.validate_path("../../etc/passwd", "/srv/project").is_err());
        assert!(sec.validate_path("/etc/passwd", "/srv/project").is_err());
        assert!(sec.validate_path("a/../../b", "/srv/project").is_err());
    }

    #[test]
    fn test_allowed_command_passes() {
        let sec = StandardSecurity::new();
        assert_eq!(
            sec.sanitize_command("  kubectl get pods ").unwrap(),
            "kubectl get pods"
        );
    }

    #[test]
    fn test_disallowed_and_dangerous_commands() {
        let sec = StandardSecurity::new();
        assert!(sec.sanitize_command("").is_err());
        assert!(sec.sanitize_command("curl http://x").is_err());
        assert!(sec.sanitize_command("ls; rm -rf /").is_err());
        assert!(sec.sanitize_command("echo $(whoami)").is_err());
        assert!(sec.sanitize_command("cat foo > /dev/sda").is_err());
    }

    #[test]
    fn test_env_credential_fallback() {
        std::env::set_var("OMNI_TEST_ONLY_CREDENTIAL", "abc123def456");
        let sec = StandardSecurity::new();
        let c = sec.decrypt_credential("OMNI_TEST_ONLY_CREDENTIAL").unwrap();
        assert_eq!(c.expose(), "abc123def456");
        assert!(sec
            .decrypt_credential("OMNI_TEST_ONLY_CREDENTIAL_ABSENT")
            .is_err());
    }
}
