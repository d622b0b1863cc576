//! Payload descriptor and the manifest it is written as.
//!
//! The manifest is the first archive entry, [`MANIFEST_PATH`], holding one
//! `key: value` header per line. Recognized keys are [`ENTRY_HOST`],
//! [`ENTRY_METHOD`] and [`SYMBOLIC_NAME`]; the container additionally reads
//! [`FRAGMENT_HOST`] and [`ACTIVATION_POLICY`].

use crate::{HarnessError, Result};

/// Archive path of the manifest entry.
pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";
/// Header naming the entry-point host.
pub const ENTRY_HOST: &str = "entry-host";
/// Header naming the entry-point method.
pub const ENTRY_METHOD: &str = "entry-method";
/// Header naming the artifact.
pub const SYMBOLIC_NAME: &str = "symbolic-name";
/// Header marking the artifact as a fragment of the named host.
pub const FRAGMENT_HOST: &str = "fragment-host";
/// Header selecting the activation policy (`eager` or `lazy`).
pub const ACTIVATION_POLICY: &str = "activation-policy";

/// Default symbolic name of generated payloads.
pub const DEFAULT_SYMBOLIC_NAME: &str = "exam.probe";

/// Metadata identifying which entry point inside a payload is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDescriptor {
    /// Host (suite) that owns the entry point.
    pub entry_host: String,
    /// Entry-point method within the host.
    pub entry_method: String,
    /// Symbolic name of the generated artifact.
    pub symbolic_name: String,
    extra_headers: Vec<(String, String)>,
}

impl PayloadDescriptor {
    /// Descriptor with the default symbolic name.
    #[must_use]
    pub fn new(entry_host: impl Into<String>, entry_method: impl Into<String>) -> Self {
        Self {
            entry_host: entry_host.into(),
            entry_method: entry_method.into(),
            symbolic_name: DEFAULT_SYMBOLIC_NAME.to_owned(),
            extra_headers: Vec::new(),
        }
    }

    /// Override the symbolic name.
    #[must_use]
    pub fn with_symbolic_name(mut self, symbolic_name: impl Into<String>) -> Self {
        self.symbolic_name = symbolic_name.into();
        self
    }

    /// Add a header beyond the three recognized keys.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((key.into(), value.into()));
        self
    }

    /// Manifest holding the descriptor fields followed by extra headers.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Payload` if a key or value cannot be encoded.
    pub fn to_manifest(&self) -> Result<Manifest> {
        let mut manifest = Manifest::default();
        manifest.insert(ENTRY_HOST, &self.entry_host)?;
        manifest.insert(ENTRY_METHOD, &self.entry_method)?;
        manifest.insert(SYMBOLIC_NAME, &self.symbolic_name)?;
        for (key, value) in &self.extra_headers {
            manifest.insert(key, value)?;
        }
        Ok(manifest)
    }
}

/// Ordered `key: value` header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    headers: Vec<(String, String)>,
}

impl Manifest {
    /// Insert or replace a header.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Payload` if the key is empty or contains `:`,
    /// or either side contains a line break.
    pub fn insert(&mut self, key: &str, value: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() || key.contains(':') || key.contains(['\n', '\r']) {
            return Err(HarnessError::Payload(format!("invalid manifest key '{key}'")));
        }
        if value.contains(['\n', '\r']) {
            return Err(HarnessError::Payload(format!(
                "manifest value for '{key}' contains a line break"
            )));
        }

        match self.headers.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.trim().to_owned(),
            None => self.headers.push((key.to_owned(), value.trim().to_owned())),
        }
        Ok(())
    }

    /// Parse a rendered manifest.
    ///
    /// Blank lines are ignored.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::ArtifactInstall` for lines without a `:`
    /// separator.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut manifest = Self::default();
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (key, value) = line.split_once(':').ok_or_else(|| {
                HarnessError::ArtifactInstall(format!("malformed manifest line {}", index + 1))
            })?;
            manifest
                .insert(key, value)
                .map_err(|err| HarnessError::ArtifactInstall(err.to_string()))?;
        }
        Ok(manifest)
    }

    /// Render as `key: value` lines.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.headers {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    /// Header value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Artifact symbolic name.
    #[must_use]
    pub fn symbolic_name(&self) -> Option<&str> {
        self.get(SYMBOLIC_NAME)
    }

    /// Declared entry point as `(host, method)`.
    #[must_use]
    pub fn entry_point(&self) -> Option<(&str, &str)> {
        Some((self.get(ENTRY_HOST)?, self.get(ENTRY_METHOD)?))
    }

    /// Whether the artifact attaches to a host instead of starting itself.
    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.get(FRAGMENT_HOST).is_some_and(|host| !host.is_empty())
    }

    /// Whether activation is deferred until first use.
    #[must_use]
    pub fn is_lazy(&self) -> bool {
        self.get(ACTIVATION_POLICY)
            .is_some_and(|policy| policy.eq_ignore_ascii_case("lazy"))
    }

    /// Iterate headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
