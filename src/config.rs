//! Configuration loading and validation.
//!
//! Loads gateway configuration from `./viewguard.toml` (or
//! `$VIEWGUARD_CONFIG_PATH`, or an explicit `--config` path).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > credentials `.env` file > config file > defaults.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::credentials::{self, EngineCredentials, PASSWORD_KEY, USERNAME_KEY};
use crate::disclosure::NoAnswerMatcher;
use crate::engine::http::answer_endpoint;
use crate::policy::{DisclaimMode, PolicyRegistry};

/// Default config file name in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "viewguard.toml";

// ── Top-level config ────────────────────────────────────────────

/// Top-level gateway configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener and logging settings.
    pub server: ServerConfig,
    /// Query engine connection settings.
    pub engine: EngineConfig,
    /// Role policy.
    pub policy: PolicyConfig,
    /// Filesystem paths.
    pub paths: PathsConfig,
}

impl GatewayConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// With `explicit_path`, the file must exist. Otherwise the path is
    /// `$VIEWGUARD_CONFIG_PATH` or `./viewguard.toml`, and a missing file
    /// yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the
    /// credentials file is invalid.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit_path, |key| std::env::var(key).ok())
    }

    /// Load using a custom env resolver (for testing).
    ///
    /// # Errors
    ///
    /// See [`GatewayConfig::load`].
    pub fn load_with(
        explicit_path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::read_file(path)?,
            None => {
                let path = Self::config_path_with(&env);
                match std::fs::read_to_string(&path) {
                    Ok(contents) => {
                        tracing::info!(path = %path.display(), "loading config from file");
                        Self::from_toml(&contents)?
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        tracing::info!("no config file found, using defaults");
                        Self::default()
                    }
                    Err(e) => {
                        return Err(anyhow::anyhow!(
                            "failed to read config file {}: {e}",
                            path.display()
                        ))
                    }
                }
            }
        };

        if let Some(env_file) = config.paths.env_file.clone() {
            let vars = credentials::load_env_file(&env_file)?;
            config.apply_credential_vars(&vars);
        }
        config.apply_overrides(env);
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
        tracing::info!(path = %path.display(), "loading config from file");
        Self::from_toml(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    /// Resolve config path using a custom env resolver.
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("VIEWGUARD_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    fn apply_credential_vars(&mut self, vars: &BTreeMap<String, String>) {
        if let Some(v) = vars.get(USERNAME_KEY) {
            self.engine.username = Some(v.clone());
        }
        if let Some(v) = vars.get(PASSWORD_KEY) {
            self.engine.password = Some(v.clone());
        }
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in tests).
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Server.
        if let Some(v) = env("VIEWGUARD_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = env("VIEWGUARD_LOG_LEVEL") {
            self.server.log_level = v;
        }

        // Engine.
        if let Some(v) = env("VIEWGUARD_ENGINE_URL") {
            self.engine.base_url = Some(v);
        }
        if let Some(v) = env(USERNAME_KEY) {
            self.engine.username = Some(v);
        }
        if let Some(v) = env(PASSWORD_KEY) {
            self.engine.password = Some(v);
        }
        if let Some(v) = env("VIEWGUARD_ENGINE_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.engine.timeout_secs = n,
                Err(_) => tracing::warn!(
                    var = "VIEWGUARD_ENGINE_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Policy.
        if let Some(v) = env("VIEWGUARD_DISCLAIM_MODE") {
            match v.parse() {
                Ok(mode) => self.policy.disclaim_mode = mode,
                Err(_) => tracing::warn!(
                    var = "VIEWGUARD_DISCLAIM_MODE",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("VIEWGUARD_DEFAULT_ROLE") {
            self.policy.default_role = Some(v);
        }

        // Paths.
        if let Some(v) = env("VIEWGUARD_AUDIT_LOG") {
            self.paths.audit_log = PathBuf::from(v);
        }
    }

    /// Parse a TOML string into config (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has unknown shapes.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: GatewayConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Check the config for problems that would only surface at request time.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.policy_registry()?;
        self.no_answer_matcher()?;
        if self.engine.timeout_secs == 0 {
            anyhow::bail!("engine.timeout_secs must be greater than zero");
        }
        if let Some(url) = self.engine.base_url.as_deref() {
            answer_endpoint(url)?;
        }
        Ok(())
    }

    /// Build the policy registry.
    ///
    /// # Errors
    ///
    /// Returns an error if no roles are configured or the default role is unknown.
    pub fn policy_registry(&self) -> Result<PolicyRegistry> {
        let roles: BTreeMap<String, Vec<String>> = self
            .policy
            .roles
            .iter()
            .map(|(role, views)| (role.clone(), views.clone()))
            .collect();
        PolicyRegistry::new(&roles, self.policy.default_role.as_deref())
            .context("invalid [policy] section")
    }

    /// Build the no-answer matcher including configured extra patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if an extra pattern is not a valid regex.
    pub fn no_answer_matcher(&self) -> Result<NoAnswerMatcher> {
        NoAnswerMatcher::with_extra(&self.policy.no_answer_patterns)
            .context("invalid policy.no_answer_patterns entry")
    }

    /// Engine URL and credentials, when all are present.
    pub fn engine_target(&self) -> Option<(&str, EngineCredentials)> {
        let url = self
            .engine
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())?;
        let creds = EngineCredentials::from_parts(
            self.engine.username.as_deref(),
            self.engine.password.as_deref(),
        )?;
        Some((url, creds))
    }
}

// ── Server config ───────────────────────────────────────────────

/// HTTP listener and logging settings (`[server]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind: String,
    /// Tracing log level filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory for rotated JSON logs; stderr only when unset.
    pub logs_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            log_level: "info".to_string(),
            logs_dir: None,
        }
    }
}

// ── Engine config ───────────────────────────────────────────────

/// Query engine connection settings (`[engine]`).
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine base URL; requests fail with 503 while unset.
    pub base_url: Option<String>,
    /// Basic auth username.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
    /// Bounded timeout for one engine call.
    pub timeout_secs: u64,
    /// Prior conversation messages folded into each question.
    pub history_messages: usize,
}

impl EngineConfig {
    /// Engine call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "__REDACTED__"))
            .field("timeout_secs", &self.timeout_secs)
            .field("history_messages", &self.history_messages)
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            username: None,
            password: None,
            timeout_secs: 90,
            history_messages: 10,
        }
    }
}

// ── Policy config ───────────────────────────────────────────────

/// Role policy (`[policy]`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Role applied to unrecognized callers; the smallest grant when unset.
    pub default_role: Option<String>,
    /// Handling of answers that used views outside the role's grant.
    pub disclaim_mode: DisclaimMode,
    /// Extra regexes recognizing "no answer" replies.
    pub no_answer_patterns: Vec<String>,
    /// Role → allowed view identifiers.
    pub roles: HashMap<String, Vec<String>>,
}

// ── Paths config ────────────────────────────────────────────────

/// Filesystem paths (`[paths]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Audit log JSONL path.
    pub audit_log: PathBuf,
    /// Private `.env` file holding engine credentials.
    pub env_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            audit_log: PathBuf::from("viewguard-audit.jsonl"),
            env_file: None,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────
