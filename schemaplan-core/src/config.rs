use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{PlanError, Result};

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// What the compiled `Let` evaluates to once every binding has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingResult {
    /// The reference produced by the last statement.
    #[default]
    Last,
    /// An array with the reference produced by every statement.
    All,
}

impl std::str::FromStr for BindingResult {
    type Err = PlanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "last" => Ok(BindingResult::Last),
            "all" => Ok(BindingResult::All),
            _ => Err(PlanError::ConfigError(format!(
                "Invalid result mode '{}'. Use 'last' or 'all'.",
                s
            ))),
        }
    }
}

impl fmt::Display for BindingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingResult::Last => write!(f, "last"),
            BindingResult::All => write!(f, "all"),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct PlannerConfig {
    pub planner: PlannerSettings,
    pub stubs: StubSettings,
    pub output: OutputSettings,
}

/// Transaction compilation settings.
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    /// Bindings are named `{prefix}{position}`.
    pub binding_prefix: String,
    pub result: BindingResult,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            binding_prefix: "var".to_string(),
            result: BindingResult::Last,
        }
    }
}

/// Placeholder values used when a resource has to be stubbed to break a cycle.
#[derive(Debug, Clone)]
pub struct StubSettings {
    pub issuer: String,
    pub jwks_uri: String,
}

impl Default for StubSettings {
    fn default() -> Self {
        Self {
            issuer: "https://faunadb-auth0.auth0.com/".to_string(),
            jwks_uri: "https://faunadb-auth0.auth0.com/.well-known/jwks.json".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub migrations_dir: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("fauna/migrations"),
        }
    }
}

// ── TOML deserialization structs ──

#[derive(Deserialize, Default)]
struct TomlConfig {
    planner: Option<TomlPlannerSettings>,
    stubs: Option<TomlStubSettings>,
    output: Option<TomlOutputSettings>,
}

#[derive(Deserialize, Default)]
struct TomlPlannerSettings {
    binding_prefix: Option<String>,
    result: Option<String>,
}

#[derive(Deserialize, Default)]
struct TomlStubSettings {
    issuer: Option<String>,
    jwks_uri: Option<String>,
}

#[derive(Deserialize, Default)]
struct TomlOutputSettings {
    migrations_dir: Option<String>,
}

/// CLI overrides that take highest priority.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub binding_prefix: Option<String>,
    pub result: Option<String>,
    pub migrations_dir: Option<PathBuf>,
}

impl PlannerConfig {
    /// Load configuration with the following priority (highest wins):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. TOML config file
    /// 4. Built-in defaults
    pub fn load(config_path: Option<&str>, overrides: &CliOverrides) -> Result<Self> {
        let mut config = PlannerConfig::default();

        // Layer 3: TOML config file
        let toml_path = config_path.unwrap_or("schemaplan.toml");
        if let Ok(content) = std::fs::read_to_string(toml_path) {
            let toml_config: TomlConfig = toml::from_str(&content).map_err(|e| {
                PlanError::ConfigError(format!("Failed to parse config file '{}': {}", toml_path, e))
            })?;
            config.apply_toml(toml_config)?;
            tracing::debug!(path = %toml_path, "Loaded config file");
        } else if config_path.is_some() {
            // If explicitly specified, error if not found
            return Err(PlanError::ConfigError(format!(
                "Config file '{}' not found",
                toml_path
            )));
        }

        // Layer 2: Environment variables
        config.apply_env()?;

        // Layer 1: CLI overrides
        config.apply_cli(overrides)?;

        validate_identifier(&config.planner.binding_prefix)?;

        Ok(config)
    }

    fn apply_toml(&mut self, toml: TomlConfig) -> Result<()> {
        if let Some(p) = toml.planner {
            if let Some(v) = p.binding_prefix { self.planner.binding_prefix = v; }
            if let Some(v) = p.result { self.planner.result = v.parse()?; }
        }

        if let Some(s) = toml.stubs {
            if let Some(v) = s.issuer { self.stubs.issuer = v; }
            if let Some(v) = s.jwks_uri { self.stubs.jwks_uri = v; }
        }

        if let Some(o) = toml.output {
            if let Some(v) = o.migrations_dir { self.output.migrations_dir = PathBuf::from(v); }
        }

        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("SCHEMAPLAN_BINDING_PREFIX") {
            self.planner.binding_prefix = v;
        }
        if let Ok(v) = std::env::var("SCHEMAPLAN_RESULT") {
            self.planner.result = v.parse()?;
        }
        if let Ok(v) = std::env::var("SCHEMAPLAN_STUB_ISSUER") {
            self.stubs.issuer = v;
        }
        if let Ok(v) = std::env::var("SCHEMAPLAN_STUB_JWKS_URI") {
            self.stubs.jwks_uri = v;
        }
        if let Ok(v) = std::env::var("SCHEMAPLAN_MIGRATIONS_DIR") {
            self.output.migrations_dir = PathBuf::from(v);
        }
        Ok(())
    }

    fn apply_cli(&mut self, overrides: &CliOverrides) -> Result<()> {
        if let Some(ref v) = overrides.binding_prefix {
            self.planner.binding_prefix = v.clone();
        }
        if let Some(ref v) = overrides.result {
            self.planner.result = v.parse()?;
        }
        if let Some(ref v) = overrides.migrations_dir {
            self.output.migrations_dir = v.clone();
        }
        Ok(())
    }
}

/// Binding names end up as variable names inside the compiled query.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PlanError::ConfigError(
            "Identifier cannot be empty".to_string(),
        ));
    }
    if !IDENTIFIER_RE.is_match(name) {
        return Err(PlanError::ConfigError(format!(
            "Identifier '{}' is not valid. Use letters, digits and '_', not starting with a digit.",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlannerConfig::default();
        assert_eq!(config.planner.binding_prefix, "var");
        assert_eq!(config.planner.result, BindingResult::Last);
        assert_eq!(config.output.migrations_dir, PathBuf::from("fauna/migrations"));
        assert!(config.stubs.jwks_uri.starts_with(&config.stubs.issuer));
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
[planner]
binding_prefix = "step"
result = "all"

[stubs]
issuer = "https://issuer.example.com/"
jwks_uri = "https://issuer.example.com/jwks.json"

[output]
migrations_dir = "db/fauna"
"#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        let mut config = PlannerConfig::default();
        config.apply_toml(toml_config).unwrap();

        assert_eq!(config.planner.binding_prefix, "step");
        assert_eq!(config.planner.result, BindingResult::All);
        assert_eq!(config.stubs.issuer, "https://issuer.example.com/");
        assert_eq!(config.stubs.jwks_uri, "https://issuer.example.com/jwks.json");
        assert_eq!(config.output.migrations_dir, PathBuf::from("db/fauna"));
    }

    #[test]
    fn test_toml_invalid_result() {
        let toml_config: TomlConfig = toml::from_str("[planner]\nresult = \"first\"\n").unwrap();
        let mut config = PlannerConfig::default();
        assert!(matches!(
            config.apply_toml(toml_config),
            Err(PlanError::ConfigError(_))
        ));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = PlannerConfig::default();
        let overrides = CliOverrides {
            binding_prefix: Some("b".to_string()),
            result: Some("ALL".to_string()),
            migrations_dir: Some(PathBuf::from("out")),
        };

        config.apply_cli(&overrides).unwrap();

        assert_eq!(config.planner.binding_prefix, "b");
        assert_eq!(config.planner.result, BindingResult::All);
        assert_eq!(config.output.migrations_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let result = PlannerConfig::load(Some("/nonexistent/schemaplan.toml"), &CliOverrides::default());
        assert!(matches!(result, Err(PlanError::ConfigError(_))));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schemaplan.toml");
        std::fs::write(&path, "[planner]\nbinding_prefix = \"tx\"\n").unwrap();

        let config = PlannerConfig::load(path.to_str(), &CliOverrides::default()).unwrap();
        assert_eq!(config.planner.binding_prefix, "tx");
    }

    #[test]
    fn test_load_rejects_bad_prefix() {
        let overrides = CliOverrides {
            binding_prefix: Some("1bad".to_string()),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schemaplan.toml");
        std::fs::write(&path, "").unwrap();
        assert!(PlannerConfig::load(path.to_str(), &overrides).is_err());
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("var").is_ok());
        assert!(validate_identifier("_step2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("9lives").is_err());
        assert!(validate_identifier("with space").is_err());
    }
}
