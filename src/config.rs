//! Configuration types for the S3 ClamAV scanner.

use crate::status::DEFAULT_SCAN_TAG_NAME;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Longest tag key S3 accepts.
const MAX_TAG_KEY_LEN: usize = 128;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Tagging policy.
    #[serde(default)]
    pub settings: Settings,

    /// Size limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Verdict tag.
    #[serde(default)]
    pub tagging: TaggingConfig,

    /// clamscan invocation.
    #[serde(default)]
    pub clamscan: ClamscanConfig,

    /// Local scratch storage.
    #[serde(default)]
    pub staging: StagingConfig,
}

/// Global settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Only tag objects found to be infected.
    ///
    /// Keeps tag-change notifications limited to infected files. Must be
    /// false for a bucket policy to deny reads while a scan is running, since
    /// only then is `SCANNING` written.
    #[serde(default = "default_true")]
    pub only_tag_infected: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            only_tag_infected: true,
        }
    }
}

impl Settings {
    /// Whether every verdict, including `SCANNING`, is written.
    pub fn report_all_statuses(&self) -> bool {
        !self.only_tag_infected
    }
}

/// Size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Largest object scanned, in bytes. Also passed to clamscan.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_max_bytes() -> u64 {
    100_000_000 // fits the 512MB Lambda /tmp with room for clamscan temp files
}

/// Verdict tag configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaggingConfig {
    /// Tag key holding the verdict.
    #[serde(default = "default_tag_name")]
    pub tag_name: String,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            tag_name: default_tag_name(),
        }
    }
}

fn default_tag_name() -> String {
    DEFAULT_SCAN_TAG_NAME.to_string()
}

/// clamscan configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClamscanConfig {
    /// clamscan executable, resolved through `PATH` when relative.
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// Virus definitions directory.
    #[serde(default = "default_database_dir")]
    pub database_dir: PathBuf,

    /// Directory clamscan unpacks archives into.
    #[serde(default = "default_tmp")]
    pub temp_dir: PathBuf,

    /// Pass `-v` to clamscan.
    #[serde(default = "default_true")]
    pub verbose: bool,

    /// Time kept in reserve after the scan for tagging and cleanup.
    #[serde(default = "default_safety_margin")]
    pub safety_margin_ms: u64,
}

impl Default for ClamscanConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            database_dir: default_database_dir(),
            temp_dir: default_tmp(),
            verbose: true,
            safety_margin_ms: default_safety_margin(),
        }
    }
}

impl ClamscanConfig {
    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }
}

fn default_executable() -> PathBuf {
    PathBuf::from("clamscan")
}

fn default_database_dir() -> PathBuf {
    PathBuf::from("/var/task/clamav_defs")
}

fn default_safety_margin() -> u64 {
    10_000 // 10 seconds
}

/// Local scratch storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StagingConfig {
    /// Directory objects are downloaded into.
    #[serde(default = "default_tmp")]
    pub dir: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self { dir: default_tmp() }
    }
}

fn default_tmp() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Config::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables looked up through `lookup`.
    ///
    /// Recognized: `ONLY_TAG_INFECTED`, `MAX_BYTES`, `SCAN_TAG_NAME`,
    /// `CLAMSCAN_PATH`, `CLAMAV_DEFINITIONS_DIR`, `CLAMSCAN_TEMP_DIR`,
    /// `STAGING_DIR` and `SCAN_SAFETY_MARGIN_MS`.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ONLY_TAG_INFECTED") {
            self.settings.only_tag_infected = parse_bool(&value)
                .with_context(|| format!("parsing ONLY_TAG_INFECTED value `{}`", value))?;
        }
        if let Some(value) = lookup("MAX_BYTES") {
            self.limits.max_bytes = value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("parsing MAX_BYTES value `{}`", value))?;
        }
        if let Some(value) = lookup("SCAN_TAG_NAME") {
            self.tagging.tag_name = value;
        }
        if let Some(value) = lookup("CLAMSCAN_PATH") {
            self.clamscan.executable = PathBuf::from(value);
        }
        if let Some(value) = lookup("CLAMAV_DEFINITIONS_DIR") {
            self.clamscan.database_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("CLAMSCAN_TEMP_DIR") {
            self.clamscan.temp_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("STAGING_DIR") {
            self.staging.dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("SCAN_SAFETY_MARGIN_MS") {
            self.clamscan.safety_margin_ms = value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("parsing SCAN_SAFETY_MARGIN_MS value `{}`", value))?;
        }
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.limits.max_bytes == 0 {
            anyhow::bail!("limits.max_bytes must be greater than 0");
        }

        let tag_name = &self.tagging.tag_name;
        if tag_name.trim().is_empty() {
            anyhow::bail!("tagging.tag_name must not be empty");
        }
        if tag_name.chars().count() > MAX_TAG_KEY_LEN {
            anyhow::bail!("tagging.tag_name must be at most {} characters", MAX_TAG_KEY_LEN);
        }

        if self.clamscan.executable.as_os_str().is_empty() {
            anyhow::bail!("clamscan.executable must not be empty");
        }

        Ok(())
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# S3 ClamAV Scanner Configuration
# Environment variables override these values at startup.

settings:
  only_tag_infected: true      # ONLY_TAG_INFECTED; false also writes SCANNING/CLEAN/ERROR

limits:
  max_bytes: 100000000         # MAX_BYTES; larger objects are tagged FILE_SIZE_EXCEEDED

tagging:
  tag_name: "scan-status"      # SCAN_TAG_NAME

clamscan:
  executable: "clamscan"       # CLAMSCAN_PATH
  database_dir: "/var/task/clamav_defs"
  temp_dir: "/tmp"
  verbose: true
  safety_margin_ms: 10000      # reserved before the invocation deadline

staging:
  dir: "/tmp"                  # STAGING_DIR; ${VAR} references are expanded
"#
        .to_string()
    }
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => anyhow::bail!("expected a boolean, got `{}`", other),
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let var_value = std::env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
