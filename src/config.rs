//! Run configuration parsing and validation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::context::TransportKind;
use crate::options::LaunchOptions;
use crate::payload::descriptor::{PayloadDescriptor, DEFAULT_SYMBOLIC_NAME};
use crate::{HarnessError, Result};

/// Payload (probe) section of the run configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProbeConfig {
    /// Host that owns the entry point.
    pub entry_host: String,
    /// Entry-point method.
    pub entry_method: String,
    /// Symbolic name of the generated artifact.
    #[serde(default = "default_symbolic_name")]
    pub symbolic_name: String,
    /// Directories whose files are packed into the payload, in order.
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    /// Extra manifest headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_symbolic_name() -> String {
    DEFAULT_SYMBOLIC_NAME.into()
}

fn default_port() -> u16 {
    1099
}

fn default_lookup_timeout_ms() -> u64 {
    10_000
}

fn default_stop_grace_ms() -> u64 {
    5_000
}

/// Run configuration parsed from `exam.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HarnessConfig {
    /// Child binary hosting the module container.
    pub container_binary: PathBuf,
    /// Container platform flavour.
    pub platform: String,
    /// Container platform version.
    #[serde(default)]
    pub version: Option<String>,
    /// Child working directory; a temporary directory is used when absent.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Communication port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Invocation channel transport.
    #[serde(default)]
    pub transport: TransportKind,
    /// Server discovery deadline; 0 retries forever.
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    /// Per-call deadline for deployment calls and remote invocations; 0
    /// waits indefinitely.
    #[serde(default)]
    pub invocation_timeout_ms: u64,
    /// Grace period between terminate and kill when stopping the child.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Extra vm options.
    #[serde(default)]
    pub vm_options: Vec<String>,
    /// Boot delegation packages.
    #[serde(default)]
    pub boot_delegation: Vec<String>,
    /// Packages exported by the system artifact.
    #[serde(default)]
    pub system_packages: Vec<String>,
    /// Artifact locations installed at child startup.
    #[serde(default)]
    pub provision: Vec<String>,
    /// Options passed through verbatim.
    #[serde(default)]
    pub raw_options: Vec<String>,
    /// Payload definition.
    pub probe: ProbeConfig,
}

impl HarnessConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| HarnessError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Launch options accumulated from the configuration.
    #[must_use]
    pub fn launch_options(&self) -> LaunchOptions {
        let mut options = LaunchOptions::new().platform(&self.platform);
        if let Some(ref version) = self.version {
            options = options.version(version);
        }
        for option in &self.vm_options {
            options = options.vm_option(option);
        }
        for package in &self.boot_delegation {
            options = options.boot_delegation(package);
        }
        for package in &self.system_packages {
            options = options.system_package(package);
        }
        for location in &self.provision {
            options = options.provision(location);
        }
        for option in &self.raw_options {
            options = options.raw_option(option);
        }
        options
    }

    /// Payload descriptor for the configured probe.
    #[must_use]
    pub fn descriptor(&self) -> PayloadDescriptor {
        let mut descriptor =
            PayloadDescriptor::new(&self.probe.entry_host, &self.probe.entry_method)
                .with_symbolic_name(&self.probe.symbolic_name);
        for (key, value) in &self.probe.headers {
            descriptor = descriptor.with_header(key, value);
        }
        descriptor
    }

    /// Discovery deadline.
    #[must_use]
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    /// Per-call invocation deadline.
    #[must_use]
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_millis(self.invocation_timeout_ms)
    }

    /// Stop grace period.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.platform.trim().is_empty() {
            return Err(HarnessError::Config("platform must not be empty".into()));
        }

        if self.port == 0 {
            return Err(HarnessError::Config("port must be greater than zero".into()));
        }

        if self.probe.entry_host.trim().is_empty() || self.probe.entry_method.trim().is_empty() {
            return Err(HarnessError::Config(
                "probe.entry_host and probe.entry_method must not be empty".into(),
            ));
        }

        if let Some(missing) = self.probe.sources.iter().find(|dir| !dir.is_dir()) {
            return Err(HarnessError::Config(format!(
                "probe source {} is not a directory",
                missing.display()
            )));
        }

        // Descriptor headers must survive manifest encoding.
        self.descriptor()
            .to_manifest()
            .map_err(|err| HarnessError::Config(format!("probe headers invalid: {err}")))?;

        Ok(())
    }
}
