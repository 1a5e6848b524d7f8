//! Settings layering for the CLI
//!
//! Flags win over the `--config` file (or `~/.config/ptp-collector/config.toml`
//! when no file is named), which wins over `COLLECTOR_*` environment
//! variables, which win over the built-in defaults.

use crate::{ClusterArgs, CollectArgs, OutputArgs, VerifyArgs};
use anyhow::{Context, Result};
use collector_lib::error::CollectorError;
use config::{Config, Environment, File, ValueKind};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "COLLECTOR";

/// Every setting a command may read
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorSettings {
    #[serde(default)]
    pub kubeconfig: Option<String>,

    #[serde(default)]
    pub nodename: Option<String>,

    #[serde(default)]
    pub interface: Option<String>,

    /// Output file; stdout when empty
    #[serde(default)]
    pub output: String,

    #[serde(default)]
    pub use_analyser_format: bool,

    #[serde(default = "default_duration")]
    pub duration: String,

    /// Poll interval in seconds
    #[serde(default = "default_rate")]
    pub rate: u64,

    /// Device info emission interval in seconds
    #[serde(default = "default_announce")]
    pub announce: u64,

    #[serde(default)]
    pub collectors: Vec<String>,

    #[serde(default)]
    pub logs_output: Option<String>,

    #[serde(default)]
    pub log_timestamps: bool,

    #[serde(default = "default_tempdir")]
    pub tempdir: String,

    #[serde(default)]
    pub keep: bool,
}

fn default_duration() -> String {
    "1000s".to_string()
}

fn default_rate() -> u64 {
    1
}

fn default_announce() -> u64 {
    60
}

fn default_tempdir() -> String {
    ".".to_string()
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            nodename: None,
            interface: None,
            output: String::new(),
            use_analyser_format: false,
            duration: default_duration(),
            rate: default_rate(),
            announce: default_announce(),
            collectors: Vec::new(),
            logs_output: None,
            log_timestamps: false,
            tempdir: default_tempdir(),
            keep: false,
        }
    }
}

/// Flag values that were actually given, keyed by setting name
#[derive(Debug, Default)]
pub struct Overrides(Vec<(&'static str, ValueKind)>);

impl Overrides {
    fn set<V: Into<ValueKind>>(&mut self, key: &'static str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.0.push((key, value.into()));
        }
        self
    }

    /// Boolean flags can only be switched on from the command line
    fn flag(&mut self, key: &'static str, value: bool) -> &mut Self {
        self.set(key, value.then_some(true))
    }
}

pub fn cluster_overrides(args: &ClusterArgs) -> Overrides {
    let mut overrides = Overrides::default();
    overrides
        .set("kubeconfig", args.kubeconfig.clone())
        .set("nodename", args.nodename.clone());
    overrides
}

fn add_output(overrides: &mut Overrides, args: &OutputArgs) {
    overrides
        .set("output", args.output.clone())
        .flag("use_analyser_format", args.use_analyser_format);
}

pub fn collect_overrides(args: &CollectArgs) -> Overrides {
    let mut overrides = cluster_overrides(&args.cluster);
    add_output(&mut overrides, &args.output);
    overrides
        .set("interface", args.interface.clone())
        .set("duration", args.duration.clone())
        .set("rate", args.rate.map(|r| r as i64))
        .set("announce", args.announce.map(|a| a as i64))
        .set("collectors", (!args.collectors.is_empty()).then(|| args.collectors.clone()))
        .set("logs_output", args.logs_output.clone())
        .flag("log_timestamps", args.log_timestamps)
        .set("tempdir", args.tempdir.clone())
        .flag("keep", args.keep);
    overrides
}

pub fn verify_overrides(args: &VerifyArgs) -> Overrides {
    let mut overrides = cluster_overrides(&args.cluster);
    add_output(&mut overrides, &args.output);
    overrides.set("interface", args.interface.clone());
    overrides
}

impl CollectorSettings {
    /// Merge defaults, environment, the optional file and the given flags
    pub fn load(file: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("collectors"),
        );
        if let Some(path) = file {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }
        for (key, value) in overrides.0 {
            builder = builder
                .set_override(key, value)
                .with_context(|| format!("Invalid value for {}", key))?;
        }
        let settings = builder
            .build()
            .context("Failed to load settings")?
            .try_deserialize()
            .map_err(|e| CollectorError::MissingInput(format!("invalid settings: {}", e)))?;
        Ok(settings)
    }

    /// Settings file read when `--config` is not given
    pub fn default_path() -> Option<PathBuf> {
        let path = dirs_next::home_dir()?
            .join(".config")
            .join("ptp-collector")
            .join("config.toml");
        path.is_file().then_some(path)
    }

    pub fn require_kubeconfig(&self) -> Result<PathBuf> {
        match self.kubeconfig.as_deref() {
            Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => Err(CollectorError::MissingInput(
                "a kubeconfig is required (--kubeconfig or COLLECTOR_KUBECONFIG)".to_string(),
            )
            .into()),
        }
    }

    pub fn require_interface(&self) -> Result<&str> {
        match self.interface.as_deref() {
            Some(interface) if !interface.is_empty() => Ok(interface),
            _ => Err(CollectorError::MissingInput(
                "an interface is required (--interface or COLLECTOR_INTERFACE)".to_string(),
            )
            .into()),
        }
    }

    pub fn node_name(&self) -> Option<&str> {
        self.nodename.as_deref().filter(|n| !n.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = CollectorSettings::load(None, Overrides::default()).unwrap();
        assert_eq!(settings.duration, "1000s");
        assert_eq!(settings.rate, 1);
        assert_eq!(settings.announce, 60);
        assert_eq!(settings.tempdir, ".");
        assert!(settings.collectors.is_empty());
    }

    #[test]
    fn test_flags_win_over_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "interface = \"ens2f0\"\nrate = 5\nduration = \"10m\"").unwrap();

        let mut overrides = Overrides::default();
        overrides.set("interface", Some("ens7f0")).flag("keep", true);
        let settings = CollectorSettings::load(Some(file.path()), overrides).unwrap();

        assert_eq!(settings.interface.as_deref(), Some("ens7f0"));
        assert_eq!(settings.rate, 5);
        assert_eq!(settings.duration, "10m");
        assert!(settings.keep);
    }

    #[test]
    fn test_missing_required_values() {
        let settings = CollectorSettings::default();
        let err = settings.require_kubeconfig().unwrap_err();
        assert!(err.downcast_ref::<CollectorError>().is_some());
        assert!(settings.require_interface().is_err());
        assert_eq!(settings.node_name(), None);
    }
}
