use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pool::PoolConfig;

/// Default config file template with comments, used by [`init_config`].
const DEFAULT_CONFIG_TEMPLATE: &str = r#"# html2pdf configuration file
# See: https://github.com/Nunley-Media-Group/html2pdf

# Browser discovery
# [chrome]
# path = "/path/to/chrome"

# Connection pool sizing
# [pool]
# min-connections = 1
# max-connections = 4
# base-port = 9222
# idle-timeout-seconds = 300
"#;

// ---------------------------------------------------------------------------
// Config structs (parsed from TOML)
// ---------------------------------------------------------------------------

/// Represents the parsed TOML config file. All fields optional.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigFile {
    pub chrome: ChromeConfig,
    pub pool: PoolConfigFile,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChromeConfig {
    pub path: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PoolConfigFile {
    pub min_connections: Option<usize>,
    pub max_connections: Option<usize>,
    pub base_port: Option<u16>,
    pub idle_timeout_seconds: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved config (all defaults filled in)
// ---------------------------------------------------------------------------

/// Fully resolved configuration, ready to build a [`PoolConfig`] from.
#[derive(Debug, Serialize)]
pub struct ResolvedConfig {
    pub config_path: Option<PathBuf>,
    pub chrome_path: Option<String>,
    pub min_connections: usize,
    pub max_connections: usize,
    pub base_port: u16,
    pub idle_timeout_seconds: u64,
    pub acquire_timeout_seconds: u64,
}

impl ResolvedConfig {
    /// Build a [`PoolConfig`], resolving the browser path through the
    /// precedence chain: explicit argument → config file → `CHROME_PATH`
    /// env var → `chrome.path` env var → auto-discovery.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::chrome::ChromeError`] if every step of the
    /// browser-path resolution chain fails.
    pub fn build_pool_config(
        &self,
        explicit_browser_path: Option<&Path>,
    ) -> Result<PoolConfig, crate::chrome::ChromeError> {
        let browser_path = resolve_browser_path(self, explicit_browser_path)?;
        Ok(PoolConfig {
            browser_path,
            base_port: self.base_port,
            min_sessions: self.min_connections,
            max_sessions: self.max_connections,
            idle_timeout: Duration::from_secs(self.idle_timeout_seconds),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_seconds),
        })
    }
}

/// Resolve the browser executable path per §6's precedence chain.
///
/// # Errors
///
/// Returns [`crate::chrome::ChromeError::NotFound`] if no step yields a
/// usable path and auto-discovery also fails.
pub fn resolve_browser_path(
    resolved: &ResolvedConfig,
    explicit: Option<&Path>,
) -> Result<PathBuf, crate::chrome::ChromeError> {
    if let Some(p) = explicit {
        return crate::chrome::resolve(Some(p));
    }
    if let Some(p) = &resolved.chrome_path {
        return crate::chrome::resolve(Some(Path::new(p)));
    }
    if let Ok(p) = std::env::var("CHROME_PATH") {
        return crate::chrome::resolve(Some(Path::new(&p)));
    }
    // `chrome.path` has no first-class Rust system-property equivalent;
    // honored as a second environment variable (DESIGN.md open question).
    if let Ok(p) = std::env::var("chrome.path") {
        return crate::chrome::resolve(Some(Path::new(&p)));
    }
    crate::chrome::resolve(None)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading/writing config file.
    Io(std::io::Error),
    /// Config file already exists (for config init).
    AlreadyExists(PathBuf),
    /// Could not determine config directory.
    NoConfigDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config file error: {e}"),
            Self::AlreadyExists(p) => {
                write!(f, "config file already exists: {}", p.display())
            }
            Self::NoConfigDir => write!(f, "could not determine config directory"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ConfigError> for crate::error::AppError {
    fn from(e: ConfigError) -> Self {
        use crate::error::ExitCode;
        match e {
            ConfigError::Io(io_err) => {
                let message = format!("config file error: {io_err}");
                Self::with_source(message, ExitCode::GeneralError, io_err)
            }
            other => Self::new(other.to_string(), ExitCode::GeneralError),
        }
    }
}

// ---------------------------------------------------------------------------
// Config file search
// ---------------------------------------------------------------------------

/// Find the first config file that exists, checking locations in priority order.
///
/// Search order:
/// 1. `explicit_path` (caller-supplied)
/// 2. `$HTML2PDF_CONFIG` environment variable
/// 3. `./.html2pdf.toml` (project-local)
/// 4. `<config_dir>/html2pdf/config.toml` (XDG / platform config dir)
/// 5. `~/.html2pdf.toml` (home directory fallback)
#[must_use]
pub fn find_config_file(explicit_path: Option<&Path>) -> Option<PathBuf> {
    find_config_file_with(explicit_path, std::env::var("HTML2PDF_CONFIG").ok())
}

/// Testable variant of [`find_config_file`] that accepts an explicit env value.
#[must_use]
pub fn find_config_file_with(
    explicit_path: Option<&Path>,
    env_config: Option<String>,
) -> Option<PathBuf> {
    if let Some(p) = explicit_path {
        if p.exists() {
            return Some(p.to_path_buf());
        }
    }

    if let Some(env_path) = env_config {
        let p = PathBuf::from(env_path);
        if p.exists() {
            return Some(p);
        }
    }

    let local = PathBuf::from(".html2pdf.toml");
    if local.exists() {
        return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let xdg = config_dir.join("html2pdf").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".html2pdf.toml");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load and parse a config file. Returns the file path (if found) and the parsed config.
///
/// On parse errors, prints a warning to stderr and returns `ConfigFile::default()`.
#[must_use]
pub fn load_config(explicit_path: Option<&Path>) -> (Option<PathBuf>, ConfigFile) {
    let path = find_config_file(explicit_path);
    match &path {
        Some(p) => {
            let config = load_config_from(p);
            (path, config)
        }
        None => (None, ConfigFile::default()),
    }
}

/// Load and parse a config file from a specific path.
///
/// On parse errors, prints a warning to stderr and returns `ConfigFile::default()`.
#[must_use]
pub fn load_config_from(path: &Path) -> ConfigFile {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "warning: could not read config file {}: {e}",
                path.display()
            );
            return ConfigFile::default();
        }
    };

    parse_config(&contents, path)
}

/// Parse TOML content into a `ConfigFile`.
///
/// Uses a two-pass strategy: first tries strict parsing (to detect unknown keys),
/// then falls back to lenient parsing if strict fails due to unknown fields.
#[must_use]
pub fn parse_config(contents: &str, path: &Path) -> ConfigFile {
    match toml::from_str::<StrictConfigFile>(contents) {
        Ok(strict) => strict.into(),
        Err(strict_err) => match toml::from_str::<ConfigFile>(contents) {
            Ok(config) => {
                eprintln!(
                    "warning: unknown keys in config file {}: {strict_err}",
                    path.display()
                );
                config
            }
            Err(parse_err) => {
                eprintln!(
                    "warning: could not parse config file {}: {parse_err}",
                    path.display()
                );
                ConfigFile::default()
            }
        },
    }
}

/// Strict variant used for the first-pass parse to detect unknown keys.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictConfigFile {
    #[serde(default)]
    chrome: StrictChromeConfig,
    #[serde(default)]
    pool: StrictPoolConfig,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictChromeConfig {
    path: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct StrictPoolConfig {
    min_connections: Option<usize>,
    max_connections: Option<usize>,
    base_port: Option<u16>,
    idle_timeout_seconds: Option<u64>,
}

impl From<StrictConfigFile> for ConfigFile {
    fn from(s: StrictConfigFile) -> Self {
        Self {
            chrome: ChromeConfig { path: s.chrome.path },
            pool: PoolConfigFile {
                min_connections: s.pool.min_connections,
                max_connections: s.pool.max_connections,
                base_port: s.pool.base_port,
                idle_timeout_seconds: s.pool.idle_timeout_seconds,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Config resolution
// ---------------------------------------------------------------------------

/// Default debugging port (§6).
const DEFAULT_BASE_PORT: u16 = 9222;
/// Default minimum pool size.
const DEFAULT_MIN_CONNECTIONS: usize = 1;
/// Default maximum pool size.
const DEFAULT_MAX_CONNECTIONS: usize = 4;
/// Default idle-eviction window.
const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 300;
/// Default acquire wait deadline; not a config key, matches the command
/// timeout used elsewhere in the system.
const DEFAULT_ACQUIRE_TIMEOUT_SECONDS: u64 = 30;

/// Resolve a config file into a fully-populated `ResolvedConfig` with all defaults.
#[must_use]
pub fn resolve_config(file: &ConfigFile, config_path: Option<PathBuf>) -> ResolvedConfig {
    let base_port = file.pool.base_port.unwrap_or(DEFAULT_BASE_PORT);
    let base_port = if base_port == 0 { DEFAULT_BASE_PORT } else { base_port };

    ResolvedConfig {
        config_path,
        chrome_path: file.chrome.path.clone(),
        min_connections: file.pool.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS),
        max_connections: file.pool.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
        base_port,
        idle_timeout_seconds: file
            .pool
            .idle_timeout_seconds
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECONDS),
        acquire_timeout_seconds: DEFAULT_ACQUIRE_TIMEOUT_SECONDS,
    }
}

// ---------------------------------------------------------------------------
// Config init
// ---------------------------------------------------------------------------

/// Default path for config init: `<config_dir>/html2pdf/config.toml`.
///
/// # Errors
///
/// Returns `ConfigError::NoConfigDir` if the platform config directory cannot be determined.
pub fn default_init_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|d| d.join("html2pdf").join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Create a default config file at the given path (or the default XDG path).
///
/// # Errors
///
/// - `ConfigError::AlreadyExists` if the file already exists
/// - `ConfigError::Io` on I/O failure
/// - `ConfigError::NoConfigDir` if no target path and platform config dir unknown
pub fn init_config(target_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = match target_path {
        Some(p) => p.to_path_buf(),
        None => default_init_path()?,
    };

    init_config_to(&path)
}

/// Testable variant of [`init_config`] that writes to an explicit path.
///
/// # Errors
///
/// - `ConfigError::AlreadyExists` if the file already exists
/// - `ConfigError::Io` on I/O failure
pub fn init_config_to(path: &Path) -> Result<PathBuf, ConfigError> {
    if path.exists() {
        return Err(ConfigError::AlreadyExists(path.to_path_buf()));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(path.to_path_buf())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_full_config() {
        let toml = r#"
[chrome]
path = "/usr/bin/chromium"

[pool]
min-connections = 2
max-connections = 8
base-port = 9333
idle-timeout-seconds = 60
"#;
        let config = parse_config(toml, Path::new("test.toml"));
        assert_eq!(config.chrome.path.as_deref(), Some("/usr/bin/chromium"));
        assert_eq!(config.pool.min_connections, Some(2));
        assert_eq!(config.pool.max_connections, Some(8));
        assert_eq!(config.pool.base_port, Some(9333));
        assert_eq!(config.pool.idle_timeout_seconds, Some(60));
    }

    #[test]
    fn parse_empty_config() {
        let config = parse_config("", Path::new("test.toml"));
        assert!(config.chrome.path.is_none());
        assert!(config.pool.min_connections.is_none());
    }

    #[test]
    fn parse_partial_config() {
        let toml = "[pool]\nbase-port = 9333\n";
        let config = parse_config(toml, Path::new("test.toml"));
        assert_eq!(config.pool.base_port, Some(9333));
        assert!(config.pool.min_connections.is_none());
        assert!(config.chrome.path.is_none());
    }

    #[test]
    fn parse_invalid_toml_returns_default() {
        let config = parse_config("this is not valid toml [[[", Path::new("test.toml"));
        assert!(config.chrome.path.is_none());
        assert!(config.pool.base_port.is_none());
    }

    #[test]
    fn parse_unknown_keys_warns_but_keeps_known() {
        let toml = r#"
[pool]
base-port = 9333
unknown_key = "hello"
"#;
        let config = parse_config(toml, Path::new("test.toml"));
        assert_eq!(config.pool.base_port, Some(9333));
    }

    #[test]
    fn resolve_defaults() {
        let config = ConfigFile::default();
        let resolved = resolve_config(&config, None);
        assert_eq!(resolved.base_port, DEFAULT_BASE_PORT);
        assert_eq!(resolved.min_connections, DEFAULT_MIN_CONNECTIONS);
        assert_eq!(resolved.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(resolved.idle_timeout_seconds, DEFAULT_IDLE_TIMEOUT_SECONDS);
        assert!(resolved.chrome_path.is_none());
        assert!(resolved.config_path.is_none());
    }

    #[test]
    fn resolve_overrides() {
        let config = ConfigFile {
            chrome: ChromeConfig {
                path: Some("/usr/bin/chromium".into()),
            },
            pool: PoolConfigFile {
                min_connections: Some(3),
                max_connections: Some(10),
                base_port: Some(9444),
                idle_timeout_seconds: Some(120),
            },
        };
        let path = PathBuf::from("/tmp/test.toml");
        let resolved = resolve_config(&config, Some(path.clone()));
        assert_eq!(resolved.chrome_path.as_deref(), Some("/usr/bin/chromium"));
        assert_eq!(resolved.min_connections, 3);
        assert_eq!(resolved.max_connections, 10);
        assert_eq!(resolved.base_port, 9444);
        assert_eq!(resolved.idle_timeout_seconds, 120);
        assert_eq!(resolved.config_path, Some(path));
    }

    #[test]
    fn resolve_base_port_zero_uses_default() {
        let config = ConfigFile {
            pool: PoolConfigFile {
                base_port: Some(0),
                ..PoolConfigFile::default()
            },
            ..ConfigFile::default()
        };
        let resolved = resolve_config(&config, None);
        assert_eq!(resolved.base_port, DEFAULT_BASE_PORT);
    }

    #[test]
    fn init_config_creates_file() {
        let dir = std::env::temp_dir().join("html2pdf-test-config-init");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("config.toml");

        let result = init_config_to(&path);
        assert!(result.is_ok());
        assert!(path.exists());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[chrome]"));
        assert!(contents.contains("[pool]"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn init_config_refuses_overwrite() {
        let dir = std::env::temp_dir().join("html2pdf-test-config-overwrite");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "existing").unwrap();

        let result = init_config_to(&path);
        assert!(matches!(result, Err(ConfigError::AlreadyExists(_))));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "existing");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn find_config_with_explicit_path() {
        let dir = std::env::temp_dir().join("html2pdf-test-find-explicit");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("my-config.toml");
        std::fs::write(&path, "").unwrap();

        let found = find_config_file_with(Some(&path), None);
        assert_eq!(found, Some(path.clone()));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn find_config_with_env_var() {
        let dir = std::env::temp_dir().join("html2pdf-test-find-env");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("env-config.toml");
        std::fs::write(&path, "").unwrap();

        let found = find_config_file_with(None, Some(path.to_string_lossy().into_owned()));
        assert_eq!(found, Some(path.clone()));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn find_config_explicit_takes_priority_over_env() {
        let dir = std::env::temp_dir().join("html2pdf-test-find-priority");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let explicit = dir.join("explicit.toml");
        let env = dir.join("env.toml");
        std::fs::write(&explicit, "").unwrap();
        std::fs::write(&env, "").unwrap();

        let found =
            find_config_file_with(Some(&explicit), Some(env.to_string_lossy().into_owned()));
        assert_eq!(found, Some(explicit.clone()));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn find_config_nonexistent_returns_none() {
        let found = find_config_file_with(
            Some(Path::new("/nonexistent/path.toml")),
            Some("/also/nonexistent.toml".into()),
        );
        if let Some(ref p) = found {
            assert_ne!(p, &PathBuf::from("/nonexistent/path.toml"));
            assert_ne!(p, &PathBuf::from("/also/nonexistent.toml"));
        }
    }

    #[test]
    fn load_config_from_nonexistent_returns_default() {
        let config = load_config_from(Path::new("/nonexistent/config.toml"));
        assert!(config.chrome.path.is_none());
    }

    #[test]
    fn config_error_display() {
        assert!(
            ConfigError::NoConfigDir
                .to_string()
                .contains("config directory")
        );

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(ConfigError::Io(io_err).to_string().contains("denied"));

        let path = PathBuf::from("/tmp/test.toml");
        let msg = ConfigError::AlreadyExists(path).to_string();
        assert!(msg.contains("already exists"));
        assert!(msg.contains("/tmp/test.toml"));
    }

    #[test]
    fn config_serializes_to_json() {
        let config = ConfigFile::default();
        let resolved = resolve_config(&config, None);
        let json = serde_json::to_string(&resolved).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["base_port"], 9222);
        assert_eq!(parsed["min_connections"], 1);
    }
}
