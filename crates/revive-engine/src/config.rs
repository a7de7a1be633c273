//! Engine configuration (revive.toml)
//!
//! ```toml
//! include = ["app.*"]
//! exclude = ["app.generated.*"]
//! verify-reloads = true
//! field-incompatibility = "discard-and-default"
//! system-prefixes = ["core."]
//! ```

use std::path::Path;

use glob::Pattern;
use serde::Deserialize;
use thiserror::Error;

use crate::reload::field_store::FieldIncompatibility;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A name pattern does not compile
    #[error("Invalid name pattern '{pattern}': {message}")]
    Pattern {
        /// The offending pattern
        pattern: String,
        /// Parser message
        message: String,
    },

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Validation(String),
}

fn default_system_prefixes() -> Vec<String> {
    vec!["core.".to_string()]
}

fn default_max_call_depth() -> usize {
    512
}

/// Engine options
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct EngineOptions {
    /// Name patterns eligible for management (empty = everything)
    pub include: Vec<String>,
    /// Name patterns never managed, checked after `include`
    pub exclude: Vec<String>,
    /// Reject unsafe structural changes on reload
    pub verify_reloads: bool,
    /// Policy for stored field values that no longer fit their declared type
    pub field_incompatibility: FieldIncompatibility,
    /// Also rewrite call sites whose owner has a system prefix
    pub rewrite_system_types: bool,
    /// Name prefixes of system types: never managed
    #[serde(default = "default_system_prefixes")]
    pub system_prefixes: Vec<String>,
    /// Interpreter call depth limit
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            verify_reloads: true,
            field_incompatibility: FieldIncompatibility::default(),
            rewrite_system_types: false,
            system_prefixes: default_system_prefixes(),
            max_call_depth: default_max_call_depth(),
        }
    }
}

impl EngineOptions {
    /// Load options from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse options from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let options: EngineOptions = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    /// Check patterns compile and limits are sane
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.type_filter()?;
        if self.max_call_depth == 0 {
            return Err(ConfigError::Validation("max-call-depth must be positive".to_string()));
        }
        Ok(())
    }

    /// Add an include pattern
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include.push(pattern.into());
        self
    }

    /// Add an exclude pattern
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    /// Enable or disable reload verification
    pub fn verify_reloads(mut self, enabled: bool) -> Self {
        self.verify_reloads = enabled;
        self
    }

    /// Set the field incompatibility policy
    pub fn field_incompatibility(mut self, policy: FieldIncompatibility) -> Self {
        self.field_incompatibility = policy;
        self
    }

    /// Set the call depth limit
    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Compile the include/exclude patterns
    pub fn type_filter(&self) -> Result<TypeFilter, ConfigError> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|e| ConfigError::Pattern {
                        pattern: p.clone(),
                        message: e.msg.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(TypeFilter {
            include: compile(&self.include)?,
            exclude: compile(&self.exclude)?,
            system_prefixes: self.system_prefixes.clone(),
        })
    }

    /// Whether a call site naming `owner` is left untouched by the rewriter
    pub fn is_system_type(&self, owner: &str) -> bool {
        !self.rewrite_system_types && self.system_prefixes.iter().any(|p| owner.starts_with(p.as_str()))
    }
}

/// Compiled eligibility patterns
#[derive(Debug, Clone)]
pub struct TypeFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    system_prefixes: Vec<String>,
}

impl TypeFilter {
    /// Whether a type may be managed
    pub fn is_eligible(&self, name: &str) -> bool {
        if self.system_prefixes.iter().any(|p| name.starts_with(p.as_str())) {
            return false;
        }
        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(name));
        included && !self.exclude.iter().any(|p| p.matches(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = EngineOptions::default();
        assert!(options.verify_reloads);
        assert_eq!(options.field_incompatibility, FieldIncompatibility::DiscardAndDefault);
        assert!(options.is_system_type("core.String"));
        assert!(!options.is_system_type("app.A"));
    }

    #[test]
    fn test_parse_toml() {
        let options = EngineOptions::from_toml_str(
            r#"
            include = ["app.*"]
            exclude = ["app.gen.*"]
            verify-reloads = false
            field-incompatibility = "error"
            "#,
        )
        .unwrap();
        assert!(!options.verify_reloads);
        assert_eq!(options.field_incompatibility, FieldIncompatibility::Error);
        assert_eq!(options.system_prefixes, vec!["core."]);

        let filter = options.type_filter().unwrap();
        assert!(filter.is_eligible("app.model.User"));
        assert!(!filter.is_eligible("app.gen.Proxy"));
        assert!(!filter.is_eligible("lib.Util"));
        assert!(!filter.is_eligible("core.Object"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            EngineOptions::from_toml_str("verify = true"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        assert!(matches!(
            EngineOptions::from_toml_str("include = [\"app.[\"]"),
            Err(ConfigError::Pattern { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "exclude = [\"app.Legacy*\"]\nmax-call-depth = 64").unwrap();
        let options = EngineOptions::from_file(file.path()).unwrap();
        assert_eq!(options.max_call_depth, 64);
        let filter = options.type_filter().unwrap();
        assert!(!filter.is_eligible("app.LegacyThing"));
        assert!(filter.is_eligible("app.Thing"));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            EngineOptions::from_file(Path::new("/nonexistent/revive.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
