//! Configuration management
//!
//! One YAML file selected by `-c` on the command line. Every section has
//! full defaults so a minimal config only names what differs; validation
//! runs once at startup and any failure there is fatal.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CarrierError, Result};
use crate::notify::{NotifierSpec, NotifySet};
use crate::paths::{validate_template, PathGen};
use crate::schedule::Schedule;

// =============================================================================
// Top level
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// Address the main listener binds to
    pub listen: String,
    /// Optional diagnostics address; empty disables the endpoint
    pub listen_debug: Option<String>,
    /// Route the process log to a file instead of stderr
    pub log_file: Option<PathBuf>,
    /// Bound on waiting for a destination lock
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,
    /// Optional path for the dump/restore state blob
    pub state_file: Option<PathBuf>,

    pub files: FilesConfig,
    pub links: LinksConfig,
    pub buffers: BuffersConfig,
    pub workers: WorkersConfig,
    pub compression: CompressionConfig,
    pub logrotate: LogrotateConfig,
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FilesConfig {
    /// Root directory all live and rotated files land under; must exist
    pub root: PathBuf,
    /// Live-name template ({dir}, {name}, {group} plus strftime fields)
    pub name: String,
    /// Rotation-name template
    pub rotation: String,
    /// Octal directory mode for created parents
    pub root_mode: String,
    pub before: NotifierSpec,
    pub after: NotifierSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LinksConfig {
    /// Root of the symlink view; empty disables symlinks entirely
    pub root: PathBuf,
    pub name: String,
    pub rotation: String,
    pub before: NotifierSpec,
    pub after: NotifierSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BuffersConfig {
    /// headerJobs channel capacity
    pub connections: usize,
    /// dumpJobs channel capacity
    pub dumps: usize,
    /// rotateJobs channel capacity
    pub logrotates: usize,
    /// Input buffer nominal size per destination
    pub input: usize,
    /// Frame buffer nominal size per destination (compressed stacks)
    pub framing: usize,
    /// Retained for config compatibility; the zstd stack emits
    /// self-contained frames and loads no dictionary
    #[serde(rename = "ZSTDict")]
    pub zst_dict: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WorkersConfig {
    pub router: usize,
    pub dumper: usize,
    pub logrotater: usize,
    /// Period of the background flush ticker
    #[serde(with = "humantime_serde")]
    pub flusher_sleep: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompressionConfig {
    pub method: CompressionMethod,
    pub level: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum CompressionMethod {
    #[default]
    Raw,
    ZStd,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LogrotateConfig {
    pub method: LogrotateMethod,
    /// Cron expression; required unless method is OnDemand
    pub schedule: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum LogrotateMethod {
    #[default]
    OnDemand,
    Periodic,
    Both,
}

// =============================================================================
// Defaults
// =============================================================================

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/logcarrier"),
            name: "{dir}/{name}".to_string(),
            rotation: "{dir}/{name}-%Y%m%d_%H%M%S".to_string(),
            root_mode: "0755".to_string(),
            before: NotifierSpec::default(),
            after: NotifierSpec::default(),
        }
    }
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            name: "{dir}/{name}".to_string(),
            rotation: "{dir}/{name}-%Y%m%d_%H%M%S".to_string(),
            before: NotifierSpec::default(),
            after: NotifierSpec::default(),
        }
    }
}

impl Default for BuffersConfig {
    fn default() -> Self {
        Self {
            connections: 1024,
            dumps: 1024,
            logrotates: 256,
            input: 64 * 1024,
            framing: 256 * 1024,
            zst_dict: 16 * 1024,
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            router: 8,
            dumper: 16,
            logrotater: 2,
            flusher_sleep: Duration::from_secs(30),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            method: CompressionMethod::Raw,
            level: 3,
        }
    }
}

impl Default for LogrotateConfig {
    fn default() -> Self {
        Self {
            method: LogrotateMethod::OnDemand,
            schedule: String::new(),
        }
    }
}

// =============================================================================
// Loading and validation
// =============================================================================

/// Reads, parses and validates a config file
pub fn load(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| CarrierError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: Config = serde_yaml::from_str(&content).map_err(|e| CarrierError::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Startup validation; any failure here is config-invalid and fatal
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &'static str, reason: String| CarrierError::ConfigValidation {
            field,
            reason,
        };

        if self.listen.is_empty() {
            return Err(invalid("Listen", "listen address is empty".into()));
        }
        if !self.files.root.is_dir() {
            return Err(invalid(
                "Files.Root",
                format!("directory {} does not exist", self.files.root.display()),
            ));
        }
        if self.links.enabled() && !self.links.root.is_dir() {
            return Err(invalid(
                "Links.Root",
                format!("directory {} does not exist", self.links.root.display()),
            ));
        }

        validate_template(&self.files.name).map_err(|e| invalid("Files.Name", e))?;
        validate_template(&self.files.rotation).map_err(|e| invalid("Files.Rotation", e))?;
        if self.files.name == self.files.rotation {
            return Err(invalid(
                "Files.Rotation",
                "live and rotation templates must differ".into(),
            ));
        }
        if self.links.enabled() {
            validate_template(&self.links.name).map_err(|e| invalid("Links.Name", e))?;
            validate_template(&self.links.rotation).map_err(|e| invalid("Links.Rotation", e))?;
        }

        parse_octal_mode(&self.files.root_mode)
            .ok_or_else(|| invalid("Files.RootMode", format!("`{}` is not an octal mode", self.files.root_mode)))?;

        self.files.before.build()?;
        self.files.after.build()?;
        self.links.before.build()?;
        self.links.after.build()?;

        if self.workers.router == 0 || self.workers.dumper == 0 || self.workers.logrotater == 0 {
            return Err(invalid("Workers", "pool sizes must be at least 1".into()));
        }
        if self.workers.flusher_sleep.is_zero() {
            return Err(invalid("Workers.FlusherSleep", "flush period must be non-zero".into()));
        }
        if self.buffers.connections == 0 || self.buffers.dumps == 0 || self.buffers.logrotates == 0
        {
            return Err(invalid("Buffers", "channel capacities must be at least 1".into()));
        }
        if self.wait_timeout.is_zero() {
            return Err(invalid("WaitTimeout", "wait timeout must be non-zero".into()));
        }

        if !(0..=22).contains(&self.compression.level) {
            return Err(invalid(
                "Compression.Level",
                format!("zstd level {} out of range", self.compression.level),
            ));
        }
        if self.logrotate.method != LogrotateMethod::OnDemand {
            Schedule::parse(&self.logrotate.schedule)?;
        }

        Ok(())
    }

    /// Path generator for the file view
    pub fn file_paths(&self) -> Arc<PathGen> {
        Arc::new(PathGen::templates(
            self.files.root.clone(),
            self.files.name.clone(),
            self.files.rotation.clone(),
        ))
    }

    /// Path generator for the symlink view; void when links are disabled
    pub fn link_paths(&self) -> Arc<PathGen> {
        if self.links.enabled() {
            Arc::new(PathGen::templates(
                self.links.root.clone(),
                self.links.name.clone(),
                self.links.rotation.clone(),
            ))
        } else {
            Arc::new(PathGen::void())
        }
    }

    /// The four notifiers, built from their specs
    ///
    /// `validate` has already proven the specs complete.
    pub fn notifiers(&self) -> Result<Arc<NotifySet>> {
        Ok(Arc::new(NotifySet {
            file_before: Arc::new(self.files.before.build()?),
            file_after: Arc::new(self.files.after.build()?),
            link_before: Arc::new(self.links.before.build()?),
            link_after: Arc::new(self.links.after.build()?),
        }))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:1466".to_string(),
            listen_debug: None,
            log_file: None,
            wait_timeout: Duration::from_secs(30),
            state_file: None,
            files: FilesConfig::default(),
            links: LinksConfig::default(),
            buffers: BuffersConfig::default(),
            workers: WorkersConfig::default(),
            compression: CompressionConfig::default(),
            logrotate: LogrotateConfig::default(),
        }
    }
}

impl FilesConfig {
    /// Directory mode for mkdir, parsed from the validated octal string
    pub fn dirmode(&self) -> u32 {
        parse_octal_mode(&self.root_mode).unwrap_or(0o755)
    }
}

impl LinksConfig {
    pub fn enabled(&self) -> bool {
        !self.root.as_os_str().is_empty()
    }
}

fn parse_octal_mode(s: &str) -> Option<u32> {
    let digits = s.strip_prefix("0o").unwrap_or(s);
    u32::from_str_radix(digits, 8).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.listen, "0.0.0.0:1466");
        assert_eq!(config.wait_timeout, Duration::from_secs(30));
        assert_eq!(config.buffers.input, 64 * 1024);
        assert_eq!(config.workers.router, 8);
        assert_eq!(config.compression.method, CompressionMethod::Raw);
        assert_eq!(config.logrotate.method, LogrotateMethod::OnDemand);
        assert!(!config.links.enabled());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
Listen: "127.0.0.1:7777"
Compression:
  Method: ZStd
  Level: 6
Buffers:
  Input: 1024
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.listen, "127.0.0.1:7777");
        assert_eq!(config.compression.method, CompressionMethod::ZStd);
        assert_eq!(config.compression.level, 6);
        assert_eq!(config.buffers.input, 1024);
        // Untouched sections keep their defaults.
        assert_eq!(config.buffers.dumps, 1024);
        assert_eq!(config.workers.dumper, 16);
    }

    #[test]
    fn test_duration_fields_parse_humantime() {
        let yaml = r#"
WaitTimeout: 5s
Workers:
  FlusherSleep: 2m
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.wait_timeout, Duration::from_secs(5));
        assert_eq!(config.workers.flusher_sleep, Duration::from_secs(120));
    }

    #[test]
    fn test_validate_missing_root() {
        let mut config = Config::default();
        config.files.root = PathBuf::from("/definitely/not/here");
        assert!(matches!(
            config.validate(),
            Err(CarrierError::ConfigValidation { field: "Files.Root", .. })
        ));
    }

    #[test]
    fn test_validate_periodic_needs_schedule() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.files.root = tmp.path().to_path_buf();
        config.logrotate.method = LogrotateMethod::Periodic;
        assert!(config.validate().is_err());

        config.logrotate.schedule = "0 0 * * * *".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_template() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.files.root = tmp.path().to_path_buf();
        config.files.rotation = "{dir}/{name}-%".to_string();
        assert!(matches!(
            config.validate(),
            Err(CarrierError::ConfigValidation { field: "Files.Rotation", .. })
        ));
    }

    #[test]
    fn test_validate_identical_templates() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.files.root = tmp.path().to_path_buf();
        config.files.rotation = config.files.name.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_root_mode() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.files.root = tmp.path().to_path_buf();
        config.files.root_mode = "rwxr-xr-x".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_link_paths_void_when_disabled() {
        let config = Config::default();
        assert!(config.link_paths().is_void());
    }

    #[test]
    fn test_load_rejects_unparseable_yaml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.yaml");
        std::fs::write(&path, "Listen: [unclosed").unwrap();
        assert!(matches!(
            load(&path),
            Err(CarrierError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            load(Path::new("/no/such/config.yaml")),
            Err(CarrierError::ConfigRead { .. })
        ));
    }
}
