//! Configuration management for YADS.
//!
//! Two layers live here: [`Config`] resolves the on-disk locations YADS uses,
//! and [`Settings`] is the flat `KEY="value"` file at `~/.yads/config`.

use crate::validate;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable to override the YADS home directory
const HOME_ENV: &str = "YADS_HOME";

pub const WEB_SERVER: &str = "WEB_SERVER";
pub const PHP_VERSION: &str = "PHP_VERSION";
pub const DATABASE: &str = "DATABASE";
pub const DOMAIN: &str = "DOMAIN";
pub const SSL_EMAIL: &str = "SSL_EMAIL";
pub const CLOUDFLARE_TOKEN: &str = "CLOUDFLARE_TOKEN";
pub const TUNNEL_NAME: &str = "TUNNEL_NAME";
pub const INSTALL_MODE: &str = "INSTALL_MODE";
pub const PROJECTS_DIR: &str = "PROJECTS_DIR";
pub const VSCODE_PORT: &str = "VSCODE_PORT";
pub const VSCODE_PASSWORD: &str = "VSCODE_PASSWORD";
pub const DB_USER: &str = "DB_USER";
pub const DB_PASSWORD: &str = "DB_PASSWORD";
pub const DB_HOST: &str = "DB_HOST";
pub const REDIS_ENABLED: &str = "REDIS_ENABLED";
pub const TEMPLATES_REPO: &str = "TEMPLATES_REPO";

/// Built-in defaults for keys that have one.
const DEFAULTS: &[(&str, &str)] = &[
    (WEB_SERVER, "nginx"),
    (PHP_VERSION, "8.2"),
    (DATABASE, "mysql"),
    (TUNNEL_NAME, "yads"),
    (INSTALL_MODE, "native"),
    (VSCODE_PORT, "8443"),
    (VSCODE_PASSWORD, "yads"),
    (DB_USER, "yads"),
    (DB_PASSWORD, "yads"),
    (DB_HOST, "127.0.0.1"),
    (REDIS_ENABLED, "true"),
];

/// Resolved filesystem locations for YADS.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory (~/.yads)
    pub home_dir: PathBuf,
    /// Flat settings file
    pub config_file: PathBuf,
    /// Cache of the remote template repository
    pub templates_dir: PathBuf,
    /// Where container volume backups land by default
    pub backups_dir: PathBuf,
    /// Generated docker-compose file used in docker mode
    pub compose_file: PathBuf,
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Creates the home directory if it doesn't exist.
    pub fn load() -> Result<Self> {
        let home_dir = match std::env::var_os(HOME_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".yads"),
        };

        fs::create_dir_all(&home_dir)?;
        Ok(Self::with_home(home_dir))
    }

    /// Build a configuration rooted at an explicit directory.
    pub fn with_home(home_dir: PathBuf) -> Self {
        Self {
            config_file: home_dir.join("config"),
            templates_dir: home_dir.join("templates"),
            backups_dir: home_dir.join("backups"),
            compose_file: home_dir.join("docker-compose.yml"),
            home_dir,
        }
    }

    /// Load settings from the config file, or empty settings if it doesn't exist yet.
    pub fn settings(&self) -> Result<Settings> {
        if self.config_file.exists() {
            Settings::load(&self.config_file)
        } else {
            Ok(Settings::default())
        }
    }

    /// Directory holding projects, honoring `PROJECTS_DIR`.
    pub fn projects_dir(&self, settings: &Settings) -> PathBuf {
        settings
            .get(PROJECTS_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.home_dir.join("projects"))
    }
}

/// Web server flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebServer {
    Nginx,
    Apache,
}

impl WebServer {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebServer::Nginx => "nginx",
            WebServer::Apache => "apache",
        }
    }

    /// Systemd unit name on Debian-family hosts.
    pub fn unit(&self) -> &'static str {
        match self {
            WebServer::Nginx => "nginx",
            WebServer::Apache => "apache2",
        }
    }
}

/// How the stack is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    Native,
    Docker,
}

/// Flat `KEY="value"` settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    /// Load settings from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Write settings to a file path, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())?;
        debug!("Saved {} settings to {}", self.values.len(), path.display());
        Ok(())
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut values = BTreeMap::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);

            let parse_err = || Error::ConfigParse {
                line: idx + 1,
                content: raw.to_string(),
            };

            let (key, value) = line.split_once('=').ok_or_else(parse_err)?;
            let key = key.trim();
            if !is_valid_key(key) {
                return Err(parse_err());
            }
            let value = unquote(value.trim()).ok_or_else(parse_err)?;
            values.insert(key.to_string(), value);
        }

        Ok(Self { values })
    }

    pub fn render(&self) -> String {
        let mut out = String::from("# YADS configuration\n");
        for (key, value) in &self.values {
            let _ = writeln!(out, "{}=\"{}\"", key, escape(value));
        }
        out
    }

    /// Explicitly stored value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Stored value, falling back to the built-in default.
    pub fn get_or_default(&self, key: &str) -> Option<&str> {
        self.get(key).or_else(|| default_for(key))
    }

    /// Set a key, validating keys and values that have constraints.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if !is_valid_key(key) {
            return Err(Error::Other(format!(
                "Invalid config key '{}': use uppercase letters, digits and underscores",
                key
            )));
        }
        check_value(key, value)?;
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn unset(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    /// Stored values merged over defaults, in key order.
    pub fn effective(&self) -> BTreeMap<String, String> {
        let mut merged: BTreeMap<String, String> = DEFAULTS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        merged.extend(self.values.clone());
        merged
    }

    pub fn web_server(&self) -> Result<WebServer> {
        match self.get_or_default(WEB_SERVER).unwrap_or("nginx") {
            "nginx" => Ok(WebServer::Nginx),
            "apache" | "apache2" => Ok(WebServer::Apache),
            other => Err(invalid(WEB_SERVER, other)),
        }
    }

    pub fn install_mode(&self) -> Result<InstallMode> {
        match self.get_or_default(INSTALL_MODE).unwrap_or("native") {
            "native" => Ok(InstallMode::Native),
            "docker" => Ok(InstallMode::Docker),
            other => Err(invalid(INSTALL_MODE, other)),
        }
    }

    pub fn php_version(&self) -> &str {
        self.get_or_default(PHP_VERSION).unwrap_or("8.2")
    }

    pub fn domain(&self) -> Option<&str> {
        self.get(DOMAIN).filter(|d| !d.is_empty())
    }

    pub fn redis_enabled(&self) -> bool {
        matches!(
            self.get_or_default(REDIS_ENABLED),
            Some("true" | "yes" | "1")
        )
    }
}

fn default_for(key: &str) -> Option<&'static str> {
    DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn invalid(key: &str, value: &str) -> Error {
    Error::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn check_value(key: &str, value: &str) -> Result<()> {
    let allowed: &[&str] = match key {
        WEB_SERVER => &["nginx", "apache"],
        DATABASE => &["mysql", "postgresql"],
        INSTALL_MODE => &["native", "docker"],
        REDIS_ENABLED => &["true", "false"],
        DOMAIN => return validate::domain(value),
        VSCODE_PORT => {
            return value
                .parse::<u16>()
                .map(|_| ())
                .map_err(|_| invalid(key, value))
        }
        _ => return Ok(()),
    };

    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(invalid(key, value))
    }
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '$' => out.push_str("\\$"),
            '`' => out.push_str("\\`"),
            c => out.push(c),
        }
    }
    out
}

/// Strip shell-style quoting from a value. Returns `None` on unterminated quotes.
fn unquote(value: &str) -> Option<String> {
    if let Some(inner) = value.strip_prefix('"') {
        let mut out = String::new();
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next()? {
                    'n' => out.push('\n'),
                    other => out.push(other),
                },
                '"' => {
                    // Only trailing whitespace or a comment may follow the closing quote.
                    let rest = chars.as_str().trim();
                    return (rest.is_empty() || rest.starts_with('#')).then_some(out);
                }
                c => out.push(c),
            }
        }
        None
    } else if let Some(inner) = value.strip_prefix('\'') {
        inner.strip_suffix('\'').map(str::to_string)
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_quoted_unquoted_and_comments() {
        let content = r#"
# comment
WEB_SERVER="apache"
PHP_VERSION=8.3
DOMAIN='example.com'
export TUNNEL_NAME="dev" # trailing
"#;
        let settings = Settings::parse(content).unwrap();
        assert_eq!(settings.get(WEB_SERVER), Some("apache"));
        assert_eq!(settings.get(PHP_VERSION), Some("8.3"));
        assert_eq!(settings.get(DOMAIN), Some("example.com"));
        assert_eq!(settings.get(TUNNEL_NAME), Some("dev"));
    }

    #[test]
    fn rejects_malformed_lines() {
        let err = Settings::parse("WEB_SERVER\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse { line: 1, .. }));

        let err = Settings::parse("\nKEY=\"unterminated\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse { line: 2, .. }));

        assert!(Settings::parse("lower=1").is_err());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config");

        let mut settings = Settings::default();
        settings.set(WEB_SERVER, "nginx").unwrap();
        settings.set(DOMAIN, "example.com").unwrap();
        settings.set(CLOUDFLARE_TOKEN, "tok\"en$with`chars\\").unwrap();
        settings.set("CUSTOM_KEY", "line one\nline two").unwrap();
        settings.set("EMPTY", "").unwrap();

        settings.save(&path).unwrap();
        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn defaults_apply_only_when_unset() {
        let mut settings = Settings::default();
        assert_eq!(settings.get(PHP_VERSION), None);
        assert_eq!(settings.php_version(), "8.2");
        assert_eq!(settings.web_server().unwrap(), WebServer::Nginx);
        assert!(settings.redis_enabled());

        settings.set(PHP_VERSION, "8.1").unwrap();
        settings.set(REDIS_ENABLED, "false").unwrap();
        assert_eq!(settings.php_version(), "8.1");
        assert!(!settings.redis_enabled());
        assert_eq!(settings.effective().get(PHP_VERSION).unwrap(), "8.1");
    }

    #[test]
    fn set_validates_constrained_keys() {
        let mut settings = Settings::default();
        assert!(settings.set(WEB_SERVER, "lighttpd").is_err());
        assert!(settings.set(DOMAIN, "not a domain").is_err());
        assert!(settings.set(VSCODE_PORT, "99999").is_err());
        assert!(settings.set("bad-key", "x").is_err());
        assert!(settings.set(DATABASE, "postgresql").is_ok());
    }

    #[test]
    fn unset_removes_key() {
        let mut settings = Settings::default();
        settings.set(TUNNEL_NAME, "x").unwrap();
        assert!(settings.unset(TUNNEL_NAME));
        assert!(!settings.unset(TUNNEL_NAME));
        assert_eq!(settings.get_or_default(TUNNEL_NAME), Some("yads"));
    }

    #[test]
    fn projects_dir_honors_setting() {
        let config = Config::with_home(PathBuf::from("/tmp/yads-home"));
        let mut settings = Settings::default();
        assert_eq!(
            config.projects_dir(&settings),
            PathBuf::from("/tmp/yads-home/projects")
        );
        settings.set(PROJECTS_DIR, "/srv/projects").unwrap();
        assert_eq!(config.projects_dir(&settings), PathBuf::from("/srv/projects"));
    }
}
