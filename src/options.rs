//! Launch option builder and its child-side parser.
//!
//! The controller accumulates platform selection, vm options, provisioning
//! entries and raw pass-through options, then renders them as the ordered
//! argument list handed to the child process. The child parses the same
//! list back with [`ParsedLaunchOptions::parse`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::context::ConnectorContext;
use crate::{HarnessError, Result};

/// System property carrying the communication port inside `--vmOptions`.
pub const PORT_PROPERTY: &str = "exam.communication.port";

/// Ordered launch option accumulator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    platform: Option<String>,
    version: Option<String>,
    vm_options: Vec<String>,
    boot_delegation: Vec<String>,
    system_packages: Vec<String>,
    provision: Vec<String>,
    raw_options: Vec<String>,
}

impl LaunchOptions {
    /// Empty option set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the container platform flavour.
    #[must_use]
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Select the container platform version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Append a vm option (e.g. `-Xmx256m`).
    #[must_use]
    pub fn vm_option(mut self, option: impl Into<String>) -> Self {
        self.vm_options.push(option.into());
        self
    }

    /// Append a package to the boot delegation list.
    #[must_use]
    pub fn boot_delegation(mut self, package: impl Into<String>) -> Self {
        self.boot_delegation.push(package.into());
        self
    }

    /// Append a package exported by the system artifact.
    #[must_use]
    pub fn system_package(mut self, package: impl Into<String>) -> Self {
        self.system_packages.push(package.into());
        self
    }

    /// Append an artifact location installed and started at child startup.
    #[must_use]
    pub fn provision(mut self, location: impl Into<String>) -> Self {
        self.provision.push(location.into());
        self
    }

    /// Append an option passed through verbatim.
    #[must_use]
    pub fn raw_option(mut self, option: impl Into<String>) -> Self {
        self.raw_options.push(option.into());
        self
    }

    /// Render the ordered argument list for a run.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Config` if no platform was selected.
    pub fn build(&self, context: &ConnectorContext) -> Result<Vec<String>> {
        let platform = self
            .platform
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| HarnessError::Config("no container platform selected".into()))?;

        let mut args = vec![format!("--platform={}", platform.to_lowercase())];
        if let Some(ref version) = self.version {
            args.push(format!("--version={version}"));
        }
        args.push(format!(
            "--workingDirectory={}",
            context.working_directory().display()
        ));

        let mut vm = format!("--vmOptions=-D{PORT_PROPERTY}={}", context.port());
        for option in &self.vm_options {
            vm.push(' ');
            vm.push_str(option);
        }
        args.push(vm);

        if !self.boot_delegation.is_empty() {
            args.push(format!("--bootDelegation={}", self.boot_delegation.join(",")));
        }
        if !self.system_packages.is_empty() {
            args.push(format!("--systemPackages={}", self.system_packages.join(",")));
        }

        args.extend(self.provision.iter().cloned());
        args.extend(self.raw_options.iter().cloned());
        Ok(args)
    }
}

/// Launch options as seen by the child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLaunchOptions {
    /// `--platform` value.
    pub platform: Option<String>,
    /// `--version` value.
    pub version: Option<String>,
    /// `--workingDirectory` value.
    pub working_directory: Option<PathBuf>,
    /// Whitespace-separated `--vmOptions` tokens that are not `-D` properties.
    pub vm_options: Vec<String>,
    /// `-Dkey=value` properties from `--vmOptions`.
    pub system_properties: BTreeMap<String, String>,
    /// Arguments not starting with `-`: artifact locations to provision.
    pub provision: Vec<String>,
    /// Remaining `-` and `--` options, kept verbatim.
    pub other: Vec<String>,
}

impl ParsedLaunchOptions {
    /// Parse an argument list produced by [`LaunchOptions::build`] (or
    /// written by hand). Unknown options are kept in [`Self::other`].
    #[must_use]
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = Self::default();

        for arg in args {
            let arg = arg.as_ref();
            let Some(option) = arg.strip_prefix("--") else {
                if arg.starts_with('-') {
                    parsed.other.push(arg.to_owned());
                } else if !arg.trim().is_empty() {
                    parsed.provision.push(arg.to_owned());
                }
                continue;
            };

            match option.split_once('=') {
                Some(("platform", value)) => parsed.platform = Some(value.to_owned()),
                Some(("version", value)) => parsed.version = Some(value.to_owned()),
                Some(("workingDirectory", value)) => {
                    parsed.working_directory = Some(PathBuf::from(value));
                }
                Some(("vmOptions", value)) => parsed.absorb_vm_options(value),
                _ => parsed.other.push(arg.to_owned()),
            }
        }

        parsed
    }

    /// Communication port from the `-Dexam.communication.port` property.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.system_properties
            .get(PORT_PROPERTY)
            .and_then(|raw| raw.parse().ok())
    }

    fn absorb_vm_options(&mut self, value: &str) {
        for token in value.split_whitespace() {
            match token.strip_prefix("-D").and_then(|p| p.split_once('=')) {
                Some((key, val)) => {
                    self.system_properties.insert(key.to_owned(), val.to_owned());
                }
                None => self.vm_options.push(token.to_owned()),
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
