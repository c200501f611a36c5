use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration with strongly-typed global sections
/// and a flexible per-component configuration bag.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Base directory for relative paths (log files). Normalized to an absolute path.
    #[serde(default = "default_home_dir")]
    pub home_dir: String,
    /// Logging configuration (optional, uses defaults if None).
    pub logging: Option<LoggingConfig>,
    /// Component manager policy.
    #[serde(default)]
    pub manager: ManagerConfig,
    /// Directory containing per-component YAML files (optional).
    #[serde(default)]
    pub components_dir: Option<String>,
    /// Per-component configuration bag: component name → arbitrary JSON/YAML value.
    #[serde(default)]
    pub components: HashMap<String, serde_json::Value>,
}

/// Startup/shutdown policy of the component manager.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct ManagerConfig {
    /// Default limit for a single component's construction. `None` waits forever.
    /// A component's own `construction-timeout` key takes precedence.
    #[serde(with = "humantime_serde")]
    pub construction_timeout: Option<Duration>,
    /// How long one component's `stop()` may take before teardown moves on.
    #[serde(with = "humantime_serde")]
    pub teardown_grace: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            construction_timeout: None,
            teardown_grace: Duration::from_secs(10),
        }
    }
}

/// Logging configuration - maps subsystem (target prefix) names to their logging settings.
/// Key "default" is the catch-all for logs that don't match explicit subsystems.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    #[serde(default)]
    pub file: String, // "logs/compkit.log"
    #[serde(default)]
    pub file_level: String,
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>, // How many files to keep
    #[serde(default)]
    pub max_size_mb: Option<u64>, // Max size of the file in MB
}

fn default_home_dir() -> String {
    ".".to_string()
}

/// Create a default logging configuration.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: "logs/compkit.log".to_string(),
            file_level: "debug".to_string(),
            max_age_days: Some(7),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            logging: Some(default_logging_config()),
            manager: ManagerConfig::default(),
            components_dir: None,
            components: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    /// Also normalizes `home_dir` into an absolute path and creates the directory.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        // Optional sections stay None unless explicitly provided by YAML/ENV.
        let base = AppConfig {
            logging: None,
            ..AppConfig::default()
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(config_path.as_ref()))
            // Example: APP__MANAGER__TEARDOWN_GRACE=5s maps to manager.teardown_grace
            .merge(Env::prefixed("APP__").split("__"));

        let mut config: AppConfig = figment
            .extract()
            .with_context(|| "Failed to extract config from figment".to_string())?;

        normalize_home_dir_inplace(&mut config.home_dir).context("Failed to resolve home_dir")?;

        if let Some(dir) = config.components_dir.clone() {
            let dir = Path::new(&config.home_dir).join(dir);
            merge_component_files(&mut config.components, dir)?;
        }

        Ok(config)
    }

    /// Load configuration from file or create with default values.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => {
                let mut c = Self::default();
                normalize_home_dir_inplace(&mut c.home_dir)
                    .context("Failed to resolve home_dir (defaults)")?;
                Ok(c)
            }
        }
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(timeout) = args.construction_timeout {
            self.manager.construction_timeout = Some(timeout);
        }

        // Set logging level based on verbose flags for "default" section.
        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(default_section) = logging.get_mut("default") {
            default_section.console_level = match args.verbose {
                0 => default_section.console_level.clone(), // keep
                1 => "debug".to_string(),
                _ => "trace".to_string(),
            };
        }
    }
}

/// Command line arguments structure.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub construction_timeout: Option<Duration>,
    pub print_config: bool,
    pub verbose: u8,
}

fn normalize_home_dir_inplace(home_dir: &mut String) -> Result<()> {
    let raw = if home_dir.trim().is_empty() {
        ".".to_string()
    } else {
        home_dir.clone()
    };

    let path = PathBuf::from(raw);
    let resolved = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .context("current directory is not accessible")?
            .join(path)
    };

    std::fs::create_dir_all(&resolved)
        .with_context(|| format!("cannot create home_dir '{}'", resolved.display()))?;

    *home_dir = resolved.to_string_lossy().to_string();
    Ok(())
}

/// Merge `<components_dir>/<name>.yaml` files into the bag; a file wins over an inline block.
fn merge_component_files(
    bag: &mut HashMap<String, serde_json::Value>,
    dir: impl AsRef<Path>,
) -> Result<()> {
    use std::fs;
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if ext != "yml" && ext != "yaml" {
            continue;
        }
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_string();
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("cannot read component file '{}'", path.display()))?;
        let val: serde_yaml::Value = serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid YAML in '{}'", path.display()))?;
        let json = serde_json::to_value(val)?;
        bag.insert(name, json);
    }
    Ok(())
}

#[cfg(test)]
#[path = "config/tests.rs"]
mod tests;
