//! Bridge configuration stored as TOML (default `dropconvert.toml`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::process::DEFAULT_OUTPUT_LIMIT_BYTES;

/// Bridge configuration (TOML).
///
/// Missing fields default to the values a stock Windows + Python host needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Working directory of the conversion entrypoint. Defaults to the process cwd.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Parent directory for per-conversion exchange artifacts. Defaults to the OS temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_dir: Option<PathBuf>,

    /// Bound on captured stdout/stderr per stream, in bytes.
    pub output_limit_bytes: usize,

    pub interpreter: InterpreterConfig,
    pub primary: PackageConfig,
    pub secondary: ToolConfig,
    pub entrypoint: EntrypointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Command names probed through the executable search path, in order.
    pub candidates: Vec<String>,
    pub version_arg: String,
    pub probe_timeout_ms: u64,
    /// Probed by file existence after the platform's conventional install locations.
    pub extra_install_paths: Vec<PathBuf>,
    /// Environment applied to every child launched through the interpreter.
    pub encoding_env: BTreeMap<String, String>,
}

/// The interpreter-hosted package the entrypoint imports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PackageConfig {
    pub package: String,
    /// Optional-extras flavor passed as `package[extras]`. Empty for none.
    pub extras: String,
    /// Class the preflight check instantiates after importing. Empty to import only.
    pub entry_class: String,
    pub check_timeout_ms: u64,
    pub install_timeout_ms: u64,
}

/// Native tool installed through the platform package manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    pub enabled: bool,
    pub command: String,
    pub version_arg: String,
    pub manager: String,
    pub package_id: String,
    pub check_timeout_ms: u64,
    pub install_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EntrypointConfig {
    /// Script run by the interpreter. Relative paths resolve against `working_dir`.
    pub script: PathBuf,
    pub timeout_ms: u64,
    /// Import and instantiate the primary package before every conversion.
    pub preflight_check: bool,
    pub preflight_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            exchange_dir: None,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            interpreter: InterpreterConfig::default(),
            primary: PackageConfig::default(),
            secondary: ToolConfig::default(),
            entrypoint: EntrypointConfig::default(),
        }
    }
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            candidates: ["python", "python3", "python.exe", "python3.exe"]
                .into_iter()
                .map(String::from)
                .collect(),
            version_arg: "--version".to_string(),
            probe_timeout_ms: 5_000,
            extra_install_paths: Vec::new(),
            encoding_env: BTreeMap::from([("PYTHONIOENCODING".to_string(), "utf-8".to_string())]),
        }
    }
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            package: "markitdown".to_string(),
            extras: "all".to_string(),
            entry_class: "MarkItDown".to_string(),
            check_timeout_ms: 5_000,
            install_timeout_ms: 60_000,
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "ffmpeg".to_string(),
            version_arg: "-version".to_string(),
            manager: "winget".to_string(),
            package_id: "Gyan.FFmpeg".to_string(),
            check_timeout_ms: 5_000,
            install_timeout_ms: 120_000,
        }
    }
}

impl Default for EntrypointConfig {
    fn default() -> Self {
        Self {
            script: PathBuf::from("scripts").join("convert_files.py"),
            timeout_ms: 30_000,
            preflight_check: false,
            preflight_timeout_ms: 30_000,
        }
    }
}

impl InterpreterConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl PackageConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_millis(self.install_timeout_ms)
    }

    /// Module name used by `import`: distribution names may use `-`, modules may not.
    pub fn import_name(&self) -> String {
        self.package.replace('-', "_")
    }

    /// Interpreter code for the preflight check: import, then instantiate
    /// `entry_class` if one is configured.
    pub fn preflight_code(&self) -> String {
        let name = self.import_name();
        if self.entry_class.is_empty() {
            format!("import {name}")
        } else {
            format!("import {name}; {name}.{}()", self.entry_class)
        }
    }

    /// Requirement string for the package installer, e.g. `markitdown[all]`.
    pub fn requirement(&self) -> String {
        if self.extras.is_empty() {
            self.package.clone()
        } else {
            format!("{}[{}]", self.package, self.extras)
        }
    }
}

impl ToolConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_millis(self.install_timeout_ms)
    }
}

impl EntrypointConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn preflight_timeout(&self) -> Duration {
        Duration::from_millis(self.preflight_timeout_ms)
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.interpreter.candidates.is_empty()
            && self.interpreter.extra_install_paths.is_empty()
            && !cfg!(windows)
        {
            return Err(anyhow!(
                "interpreter.candidates or interpreter.extra_install_paths must be non-empty"
            ));
        }
        if self
            .interpreter
            .candidates
            .iter()
            .any(|candidate| candidate.trim().is_empty())
        {
            return Err(anyhow!("interpreter.candidates must not contain empty names"));
        }
        if self.interpreter.probe_timeout_ms == 0 {
            return Err(anyhow!("interpreter.probe_timeout_ms must be > 0"));
        }
        if !is_package_token(&self.primary.package) {
            return Err(anyhow!(
                "primary.package must be a non-empty name of letters, digits, '.', '_' or '-'"
            ));
        }
        if !self.primary.extras.is_empty() && !is_package_token(&self.primary.extras) {
            return Err(anyhow!(
                "primary.extras must contain only letters, digits, '.', '_' or '-'"
            ));
        }
        if !self.primary.entry_class.is_empty() && !is_identifier(&self.primary.entry_class) {
            return Err(anyhow!(
                "primary.entry_class must be an identifier of letters, digits or '_'"
            ));
        }
        if self.primary.check_timeout_ms == 0 || self.primary.install_timeout_ms == 0 {
            return Err(anyhow!("primary timeouts must be > 0"));
        }
        if self.secondary.enabled {
            if self.secondary.command.trim().is_empty() || self.secondary.manager.trim().is_empty()
            {
                return Err(anyhow!("secondary.command and secondary.manager must be set"));
            }
            if !is_package_token(&self.secondary.package_id) {
                return Err(anyhow!(
                    "secondary.package_id must contain only letters, digits, '.', '_' or '-'"
                ));
            }
            if self.secondary.check_timeout_ms == 0 || self.secondary.install_timeout_ms == 0 {
                return Err(anyhow!("secondary timeouts must be > 0"));
            }
        }
        if self.entrypoint.script.as_os_str().is_empty() {
            return Err(anyhow!("entrypoint.script must be set"));
        }
        if self.entrypoint.timeout_ms == 0 || self.entrypoint.preflight_timeout_ms == 0 {
            return Err(anyhow!("entrypoint timeouts must be > 0"));
        }
        Ok(())
    }

    /// Working directory for the entrypoint, falling back to the process cwd.
    pub fn resolved_working_dir(&self) -> Result<PathBuf> {
        match &self.working_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().context("read current directory"),
        }
    }

    pub fn resolved_exchange_dir(&self) -> PathBuf {
        self.exchange_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Package names, extras and package ids end up inside interpreter code
/// (`import <name>`) and package-manager arguments, so they are kept to a
/// conservative character set.
pub fn is_package_token(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !value.starts_with(['-', '.'])
}

fn is_identifier(value: &str) -> bool {
    value
        .chars()
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BridgeConfig::default()`.
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    if !path.exists() {
        let cfg = BridgeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BridgeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &BridgeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
