//! Configuration file handling for ~/.tapeline/config.ini.
//!
//! Loads and saves operator configuration with sensible defaults. CLI
//! arguments override config file values when specified.

use ini::Ini;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default tape record size in bytes. Every write issued to the drive must
/// be a multiple of this, matching the drive's physical block size.
pub const DEFAULT_RECORD_SIZE: usize = 4096;

/// Default per-file size cap in bytes; larger source files are skipped.
pub const DEFAULT_SIZE_CAP_BYTES: u64 = 12_000_000;

/// Default generic SCSI device for the media changer.
pub const DEFAULT_CHANGER_DEVICE: &str = "/dev/sg4";

/// Default external binary used to drive the changer.
pub const DEFAULT_MTX_BINARY: &str = "mtx";

/// Default catalog credentials file (single line: `<user> <password> <dbname>`).
pub const DEFAULT_AUTH_FILE: &str = "dbAuthen.txt";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}'")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

/// Catalog connection settings.
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    /// Path to the single-line credentials file.
    pub auth_file: String,
    /// PostgreSQL host.
    pub host: String,
    /// PostgreSQL port.
    pub port: u16,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            auth_file: DEFAULT_AUTH_FILE.to_string(),
            host: "localhost".to_string(),
            port: 5432,
        }
    }
}

/// Source filesystem settings.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Where the distributed filesystem is mounted (NFS gateway or fuse-dfs);
    /// source paths resolve beneath it.
    pub mount: String,
    /// Walk roots, rotated across firings of the same schedule class.
    pub roots: Vec<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            mount: "/hdfs".to_string(),
            roots: vec!["/".to_string()],
        }
    }
}

/// Tape drive settings.
#[derive(Debug, Clone)]
pub struct TapeSettings {
    /// Kernel write granularity for the character device.
    pub record_size: usize,
    /// Files larger than this are skipped by the incremental policy.
    pub size_cap_bytes: u64,
}

impl Default for TapeSettings {
    fn default() -> Self {
        Self {
            record_size: DEFAULT_RECORD_SIZE,
            size_cap_bytes: DEFAULT_SIZE_CAP_BYTES,
        }
    }
}

/// Media changer settings.
#[derive(Debug, Clone)]
pub struct ChangerSettings {
    /// Generic SCSI device path shared by both drives.
    pub device: String,
    /// The mtx binary to invoke.
    pub mtx_binary: String,
}

impl Default for ChangerSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_CHANGER_DEVICE.to_string(),
            mtx_binary: DEFAULT_MTX_BINARY.to_string(),
        }
    }
}

/// One schedule class: a label naming a recurrence and its period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleClass {
    /// Label stored in PathSpec rows, e.g. "Hourly".
    pub name: String,
    /// Seconds between firings.
    pub period_secs: u64,
}

/// Complete tapeline configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub catalog: CatalogSettings,
    pub source: SourceSettings,
    pub tape: TapeSettings,
    pub changer: ChangerSettings,
    /// Schedule classes, one recurring firing per class per pipeline.
    pub schedules: Vec<ScheduleClass>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            catalog: CatalogSettings::default(),
            source: SourceSettings::default(),
            tape: TapeSettings::default(),
            changer: ChangerSettings::default(),
            schedules: vec![ScheduleClass {
                name: "2Mins".to_string(),
                period_secs: 120,
            }],
        }
    }
}

impl ConfigFile {
    /// Load configuration from the default path (~/.tapeline/config.ini).
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load() -> Result<Self, ConfigFileError> {
        let path = config_file_path();
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        Self::parse_ini(&ini)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        std::fs::write(path, self.to_config_string())
            .map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Create the default config file if it doesn't exist.
    ///
    /// Returns the path to the config file.
    pub fn ensure_exists() -> Result<PathBuf, ConfigFileError> {
        let path = config_file_path();
        if !path.exists() {
            let config = Self::default();
            config.save_to(&path)?;
        }
        Ok(path)
    }

    fn parse_ini(ini: &Ini) -> Result<Self, ConfigFileError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("catalog")) {
            if let Some(v) = section.get("auth_file") {
                config.catalog.auth_file = v.to_string();
            }
            if let Some(v) = section.get("host") {
                config.catalog.host = v.to_string();
            }
            if let Some(v) = section.get("port") {
                config.catalog.port =
                    v.parse()
                        .map_err(|_| ConfigFileError::InvalidValue {
                            section: "catalog".to_string(),
                            key: "port".to_string(),
                            value: v.to_string(),
                        })?;
            }
        }

        if let Some(section) = ini.section(Some("source")) {
            if let Some(v) = section.get("mount") {
                config.source.mount = v.to_string();
            }
            if let Some(v) = section.get("roots") {
                config.source.roots = v
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if config.source.roots.is_empty() {
                    return Err(ConfigFileError::InvalidValue {
                        section: "source".to_string(),
                        key: "roots".to_string(),
                        value: v.to_string(),
                    });
                }
            }
        }

        if let Some(section) = ini.section(Some("tape")) {
            if let Some(v) = section.get("record_size") {
                config.tape.record_size =
                    v.parse()
                        .map_err(|_| ConfigFileError::InvalidValue {
                            section: "tape".to_string(),
                            key: "record_size".to_string(),
                            value: v.to_string(),
                        })?;
            }
            if let Some(v) = section.get("size_cap_bytes") {
                config.tape.size_cap_bytes =
                    v.parse()
                        .map_err(|_| ConfigFileError::InvalidValue {
                            section: "tape".to_string(),
                            key: "size_cap_bytes".to_string(),
                            value: v.to_string(),
                        })?;
            }
        }

        if let Some(section) = ini.section(Some("changer")) {
            if let Some(v) = section.get("device") {
                config.changer.device = v.to_string();
            }
            if let Some(v) = section.get("mtx_binary") {
                config.changer.mtx_binary = v.to_string();
            }
        }

        if let Some(section) = ini.section(Some("schedules")) {
            let mut schedules = Vec::new();
            for (name, period) in section.iter() {
                let period_secs =
                    period
                        .parse()
                        .map_err(|_| ConfigFileError::InvalidValue {
                            section: "schedules".to_string(),
                            key: name.to_string(),
                            value: period.to_string(),
                        })?;
                schedules.push(ScheduleClass {
                    name: name.to_string(),
                    period_secs,
                });
            }
            if !schedules.is_empty() {
                config.schedules = schedules;
            }
        }

        Ok(config)
    }

    fn to_config_string(&self) -> String {
        let mut out = String::new();
        out.push_str("; Tapeline configuration\n");
        out.push_str("\n[catalog]\n");
        out.push_str(&format!("auth_file = {}\n", self.catalog.auth_file));
        out.push_str(&format!("host = {}\n", self.catalog.host));
        out.push_str(&format!("port = {}\n", self.catalog.port));
        out.push_str("\n[source]\n");
        out.push_str(&format!("mount = {}\n", self.source.mount));
        out.push_str(&format!("roots = {}\n", self.source.roots.join(",")));
        out.push_str("\n[tape]\n");
        out.push_str(&format!("record_size = {}\n", self.tape.record_size));
        out.push_str(&format!("size_cap_bytes = {}\n", self.tape.size_cap_bytes));
        out.push_str("\n[changer]\n");
        out.push_str(&format!("device = {}\n", self.changer.device));
        out.push_str(&format!("mtx_binary = {}\n", self.changer.mtx_binary));
        out.push_str("\n[schedules]\n");
        for schedule in &self.schedules {
            out.push_str(&format!("{} = {}\n", schedule.name, schedule.period_secs));
        }
        out
    }
}

/// Get the path to the config directory (~/.tapeline).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tapeline")
}

/// Get the path to the config file (~/.tapeline/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
