use crate::error::{MutationError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings of one mutation session, read from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionConfig {
    /// Files or packages to mutate.
    #[serde(deserialize_with = "one_or_many")]
    pub module_path: Vec<PathBuf>,

    /// Target Python version, forwarded to the parser.
    #[serde(default)]
    pub python_version: String,

    /// Globs of modules never mutated.
    #[serde(default)]
    pub excluded_modules: Vec<String>,

    /// Operators to apply, in order. Empty selects the whole catalog.
    #[serde(default)]
    pub operators: Vec<String>,

    /// Only mutate lines changed since this git reference.
    #[serde(default, alias = "git-branch", skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,

    // Stored for the execution component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path) => vec![path],
        OneOrMany::Many(paths) => paths,
    })
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MutationError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SessionConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.module_path.is_empty() {
            return Err(MutationError::Config(
                "module-path must name at least one file or directory".to_string(),
            ));
        }
        if let Some(timeout) = self.timeout {
            if !(timeout > 0.0) {
                return Err(MutationError::Config(format!(
                    "timeout must be positive, got {}",
                    timeout
                )));
            }
        }
        if matches!(self.baseline.as_deref(), Some(b) if b.trim().is_empty()) {
            return Err(MutationError::Config("baseline must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn template() -> &'static str {
        r#"# Files or packages to mutate.
module-path = "src"

# Forwarded to the parser.
python-version = "3.12"

# Globs of modules to leave alone.
excluded-modules = ["src/**/test_*.py"]

# Operators to apply; leave empty for all of them (see `py-mutation operators`).
operators = []

# Only mutate lines changed since this git reference.
# baseline = "main"

test-command = "python -m pytest -x tests"
timeout = 30.0
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config = SessionConfig::from_toml_str(r#"module-path = "pkg""#).unwrap();
        assert_eq!(config.module_path, vec![PathBuf::from("pkg")]);
        assert!(config.python_version.is_empty());
        assert!(config.operators.is_empty());
        assert!(config.baseline.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = SessionConfig::from_toml_str(
            r#"
            module-path = ["pkg", "tools/cli.py"]
            python-version = "3.11"
            excluded-modules = ["pkg/vendor/*"]
            operators = ["ReplaceLtWithLtE"]
            git-branch = "origin/main"
            test-command = "pytest"
            timeout = 12.5
            "#,
        )
        .unwrap();
        assert_eq!(config.module_path.len(), 2);
        assert_eq!(config.python_version, "3.11");
        assert_eq!(config.excluded_modules, vec!["pkg/vendor/*"]);
        assert_eq!(config.baseline.as_deref(), Some("origin/main"));
        assert_eq!(config.timeout, Some(12.5));
    }

    #[test]
    fn test_template_parses() {
        let config = SessionConfig::from_toml_str(SessionConfig::template()).unwrap();
        assert_eq!(config.module_path, vec![PathBuf::from("src")]);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(SessionConfig::from_toml_str("python-version = \"3\"").is_err());
        assert!(SessionConfig::from_toml_str("module-path = []").is_err());
        assert!(SessionConfig::from_toml_str("module-path = \"a\"\ntimeout = -1.0").is_err());
        assert!(SessionConfig::from_toml_str("module-path = \"a\"\nbaseline = \" \"").is_err());
    }

    #[test]
    fn test_json_round_trip_for_storage() {
        let config = SessionConfig::from_toml_str("module-path = \"a\"\nbaseline = \"main\"").unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let restored: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, config);
    }
}
