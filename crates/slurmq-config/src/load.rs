//! Config file resolution, loading and saving.

use crate::types::SlurmqConfig;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use thiserror::Error;
use toml::{Table, Value};

/// Env var naming an explicit config file.
pub const CONFIG_ENV: &str = "SLURMQ_CONFIG";

/// Env var holding the log filter (read by the binary, never an override).
pub const LOG_ENV: &str = "SLURMQ_LOG";

const ENV_PREFIX: &str = "SLURMQ_";
const NESTED_SEPARATOR: &str = "__";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid TOML in {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid config value: {0}")]
    Invalid(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("No cluster specified and no default_cluster configured")]
    NoClusterSelected,
    #[error("Unknown cluster '{name}' (configured: {known})")]
    UnknownCluster { name: String, known: String },
    #[error("Invalid config key '{0}'; expected dotted form like clusters.stella.quota_limit")]
    InvalidKey(String),
}

/// Resolves which config file to use.
///
/// Holds the explicit path (from `--config`) so that resolution state lives in
/// a value the caller owns rather than in a process-wide global.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    explicit: Option<Utf8PathBuf>,
}

impl ConfigPaths {
    pub fn new(explicit: Option<Utf8PathBuf>) -> Self {
        Self { explicit }
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> Option<Utf8PathBuf> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve using `env` to look up variables.
    ///
    /// Priority: explicit path, `SLURMQ_CONFIG`, then the XDG default.
    pub fn resolve_with<F>(&self, env: F) -> Option<Utf8PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.explicit {
            return Some(path.clone());
        }
        if let Some(path) = env(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Some(Utf8PathBuf::from(path));
        }
        default_config_path_with(env)
    }
}

/// XDG-compliant default location: `$XDG_CONFIG_HOME/slurmq/config.toml`,
/// else `$HOME/.config/slurmq/config.toml`.
pub fn default_config_path_with<F>(env: F) -> Option<Utf8PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    let base = match env("XDG_CONFIG_HOME").filter(|p| !p.is_empty()) {
        Some(xdg) => Utf8PathBuf::from(xdg),
        None => Utf8PathBuf::from(env("HOME")?).join(".config"),
    };
    Some(base.join("slurmq").join("config.toml"))
}

impl SlurmqConfig {
    /// Load config from the resolved path with process env overrides applied.
    pub fn load(paths: &ConfigPaths) -> Result<Self, ConfigError> {
        let path = paths.resolve();
        Self::load_from(path.as_deref(), std::env::vars())
    }

    /// Load config from `path` (missing file = defaults) and apply `SLURMQ_*`
    /// overrides taken from `vars`.
    pub fn load_from<I>(path: Option<&Utf8Path>, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut table = match path {
            Some(p) if p.exists() => read_table(p)?,
            Some(p) => {
                tracing::debug!("Config file {} not found, using defaults", p);
                Table::new()
            }
            None => Table::new(),
        };

        apply_env_overrides(&mut table, vars);

        Ok(Value::Table(table).try_into()?)
    }

    /// Parse a TOML document without env overrides.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write config as TOML, creating parent directories if needed.
    pub fn save(&self, path: &Utf8Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, self.to_toml()?).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Set one dotted key (e.g. `clusters.stella.quota_limit`) in the file at
    /// `path` and write it back.
    ///
    /// The file is left untouched unless the edited document is still a
    /// valid config.
    pub fn set_in_file(path: &Utf8Path, key: &str, raw: &str) -> Result<Self, ConfigError> {
        let segments: Vec<String> = key.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(ConfigError::InvalidKey(key.to_string()));
        }

        let mut table = read_table(path)?;
        set_nested(&mut table, &segments, parse_raw_value(raw));
        let config: Self = Value::Table(table).try_into()?;
        config.save(path)?;
        Ok(config)
    }
}

/// Read a file and parse it as a TOML table.
pub fn read_table(path: &Utf8Path) -> Result<Table, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    content.parse::<Table>().map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `SLURMQ_KEY` and `SLURMQ_SECTION__KEY` variables onto a TOML table.
pub fn apply_env_overrides<I>(table: &mut Table, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, raw) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        if key == CONFIG_ENV || key == LOG_ENV || rest.is_empty() {
            continue;
        }

        let path: Vec<String> = rest
            .split(NESTED_SEPARATOR)
            .map(str::to_lowercase)
            .collect();
        if path.iter().any(String::is_empty) {
            continue;
        }

        tracing::debug!("Config override from {}", key);
        set_nested(table, &path, parse_raw_value(&raw));
    }
}

fn set_nested(table: &mut Table, path: &[String], value: Value) {
    let (last, parents) = match path.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = table;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert(Value::Table(Table::new()));
        if !entry.is_table() {
            *entry = Value::Table(Table::new());
        }
        current = match entry {
            Value::Table(t) => t,
            _ => return,
        };
    }
    current.insert(last.clone(), value);
}

/// Interpret a raw string as a TOML value (bool, number, array), else a string.
fn parse_raw_value(raw: &str) -> Value {
    format!("value = {raw}")
        .parse::<Table>()
        .ok()
        .and_then(|mut t| t.remove("value"))
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CancelOrder, ClusterConfig, OutputFormat};
    use std::collections::HashMap;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
default_cluster = "stella"

[clusters.stella]
name = "Stella HPC"
account = "research-group"
qos = ["high-priority", "normal"]
partitions = ["gpu", "gpu-large"]
quota_limit = 500
rolling_window_days = 30

[clusters.other]
name = "Other Cluster"
qos = ["standard"]
quota_limit = 200

[monitoring]
warning_threshold = 0.9

[enforcement]
enabled = false
dry_run = true
grace_period_hours = 24
cancel_order = "fifo"
exempt_job_prefixes = ["debug_", "test_"]

[display]
output_format = "json"
"#;

    fn no_env() -> Vec<(String, String)> {
        Vec::new()
    }

    fn write_config(dir: &TempDir, content: &str) -> Utf8PathBuf {
        let path = Utf8Path::from_path(dir.path()).unwrap().join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_from_toml() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, SAMPLE);
        let config = SlurmqConfig::load_from(Some(&path), no_env()).unwrap();

        assert_eq!(config.default_cluster, "stella");
        let stella = &config.clusters["stella"];
        assert_eq!(stella.qos, vec!["high-priority", "normal"]);
        assert_eq!(stella.partitions.len(), 2);
        assert_eq!(config.clusters["other"].quota_limit, 200);
        assert_eq!(config.clusters["other"].rolling_window_days, 30);
        assert_eq!(config.monitoring.warning_threshold, 0.9);
        assert_eq!(config.monitoring.critical_threshold, 1.0);
        assert_eq!(config.enforcement.cancel_order, CancelOrder::Fifo);
        assert_eq!(config.display.output_format, OutputFormat::Json);
    }

    #[test]
    fn test_missing_file_returns_defaults() {
        let temp = TempDir::new().unwrap();
        let path = Utf8Path::from_path(temp.path()).unwrap().join("nope.toml");
        let config = SlurmqConfig::load_from(Some(&path), no_env()).unwrap();
        assert_eq!(config, SlurmqConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, "this is [[[not valid toml");
        let result = SlurmqConfig::load_from(Some(&path), no_env());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_unknown_cancel_order_is_error() {
        let result = SlurmqConfig::from_toml_str("[enforcement]\ncancel_order = \"random\"\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_env_overrides() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, SAMPLE);
        let vars = vec![
            ("SLURMQ_DEFAULT_CLUSTER".to_string(), "other".to_string()),
            ("SLURMQ_DISPLAY__OUTPUT_FORMAT".to_string(), "plain".to_string()),
            ("SLURMQ_ENFORCEMENT__ENABLED".to_string(), "true".to_string()),
            ("SLURMQ_CLUSTERS__OTHER__QUOTA_LIMIT".to_string(), "250".to_string()),
            ("SLURMQ_CONFIG".to_string(), "/ignored.toml".to_string()),
            ("HOME".to_string(), "/home/x".to_string()),
        ];
        let config = SlurmqConfig::load_from(Some(&path), vars).unwrap();

        assert_eq!(config.default_cluster, "other");
        assert_eq!(config.display.output_format, OutputFormat::Plain);
        assert!(config.enforcement.enabled);
        assert_eq!(config.clusters["other"].quota_limit, 250);
    }

    #[test]
    fn test_env_override_array() {
        let vars = vec![(
            "SLURMQ_ENFORCEMENT__EXEMPT_USERS".to_string(),
            r#"["admin", "root"]"#.to_string(),
        )];
        let config = SlurmqConfig::load_from(None, vars).unwrap();
        assert_eq!(config.enforcement.exempt_users, vec!["admin", "root"]);
    }

    #[test]
    fn test_parse_raw_value() {
        assert_eq!(parse_raw_value("true"), Value::Boolean(true));
        assert_eq!(parse_raw_value("42"), Value::Integer(42));
        assert_eq!(parse_raw_value("0.75"), Value::Float(0.75));
        assert_eq!(parse_raw_value("json"), Value::String("json".to_string()));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = Utf8Path::from_path(temp.path())
            .unwrap()
            .join("nested")
            .join("config.toml");

        let mut config = SlurmqConfig {
            default_cluster: "stella".to_string(),
            ..SlurmqConfig::default()
        };
        let mut stella = ClusterConfig::new("Stella HPC");
        stella.quota_limit = 750;
        config.clusters.insert("stella".to_string(), stella);

        config.save(&path).unwrap();
        let loaded = SlurmqConfig::load_from(Some(&path), no_env()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_set_in_file() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, SAMPLE);

        let config =
            SlurmqConfig::set_in_file(&path, "clusters.stella.quota_limit", "750").unwrap();
        assert_eq!(config.clusters["stella"].quota_limit, 750);

        SlurmqConfig::set_in_file(&path, "enforcement.dry_run", "false").unwrap();
        let reloaded = SlurmqConfig::load_from(Some(&path), no_env()).unwrap();
        assert_eq!(reloaded.clusters["stella"].quota_limit, 750);
        assert!(!reloaded.enforcement.dry_run);
        assert_eq!(reloaded.enforcement.cancel_order, CancelOrder::Fifo);
    }

    #[test]
    fn test_set_in_file_rejects_bad_values() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, SAMPLE);
        let before = fs::read_to_string(&path).unwrap();

        let result = SlurmqConfig::set_in_file(&path, "enforcement.cancel_order", "random");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        let result = SlurmqConfig::set_in_file(&path, "clusters..quota_limit", "1");
        assert!(matches!(result, Err(ConfigError::InvalidKey(_))));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);

        let missing = Utf8Path::from_path(temp.path()).unwrap().join("nope.toml");
        let result = SlurmqConfig::set_in_file(&missing, "default_cluster", "x");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_config_path_resolution() {
        let env: HashMap<&str, &str> = [("HOME", "/home/testuser")].into();
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());
        assert_eq!(
            ConfigPaths::default().resolve_with(lookup),
            Some(Utf8PathBuf::from("/home/testuser/.config/slurmq/config.toml"))
        );

        let env: HashMap<&str, &str> =
            [("HOME", "/home/testuser"), ("XDG_CONFIG_HOME", "/custom/config")].into();
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());
        assert_eq!(
            ConfigPaths::default().resolve_with(lookup),
            Some(Utf8PathBuf::from("/custom/config/slurmq/config.toml"))
        );

        let env: HashMap<&str, &str> = [(CONFIG_ENV, "/tmp/custom.toml")].into();
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());
        assert_eq!(
            ConfigPaths::default().resolve_with(lookup),
            Some(Utf8PathBuf::from("/tmp/custom.toml"))
        );

        let explicit = ConfigPaths::new(Some("/etc/slurmq.toml".into()));
        assert_eq!(
            explicit.resolve_with(lookup),
            Some(Utf8PathBuf::from("/etc/slurmq.toml"))
        );
    }
}
