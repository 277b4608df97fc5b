//! Docker Compose file generation and the `docker compose` wrapper.

use crate::config::{self, Settings, WebServer};
use crate::exec::{CommandRunner, CommandSpec};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const WEB_SERVICE: &str = "web";
pub const PHP_SERVICE: &str = "php";
pub const DB_SERVICE: &str = "db";
pub const REDIS_SERVICE: &str = "redis";
pub const TUNNEL_SERVICE: &str = "cloudflared";
pub const VSCODE_SERVICE: &str = "vscode";

/// Compose project name; volumes and containers are prefixed with it.
pub const PROJECT_NAME: &str = "yads";

/// Server config for the nginx service, written next to the compose file.
pub const NGINX_CONF: &str = "nginx-default.conf";

/// A docker-compose document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    pub services: BTreeMap<String, ComposeService>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, Option<serde_yaml::Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeService {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub test: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
}

impl HealthCheck {
    fn shell(cmd: &str) -> Self {
        Self {
            test: vec!["CMD-SHELL".to_string(), cmd.to_string()],
            interval: "10s".to_string(),
            timeout: "5s".to_string(),
            retries: 5,
        }
    }
}

impl ComposeFile {
    /// Build the stack for the given settings.
    pub fn for_settings(settings: &Settings, projects_dir: &Path) -> Result<Self> {
        let mut file = ComposeFile::default();
        let php = settings.php_version();
        let projects = format!("{}:/var/www/html", projects_dir.display());
        let db_user = settings.get_or_default(config::DB_USER).unwrap_or("yads");
        let db_password = settings.get_or_default(config::DB_PASSWORD).unwrap_or("yads");

        match settings.web_server()? {
            WebServer::Nginx => {
                file.services.insert(
                    PHP_SERVICE.to_string(),
                    ComposeService {
                        image: format!("php:{}-fpm", php),
                        volumes: vec![projects.clone()],
                        restart: Some("unless-stopped".to_string()),
                        ..Default::default()
                    },
                );
                file.services.insert(
                    WEB_SERVICE.to_string(),
                    ComposeService {
                        image: "nginx:alpine".to_string(),
                        ports: vec!["80:80".to_string(), "443:443".to_string()],
                        volumes: vec![
                            projects.clone(),
                            format!("./{}:/etc/nginx/conf.d/default.conf:ro", NGINX_CONF),
                        ],
                        depends_on: vec![PHP_SERVICE.to_string()],
                        restart: Some("unless-stopped".to_string()),
                        ..Default::default()
                    },
                );
            }
            WebServer::Apache => {
                file.services.insert(
                    WEB_SERVICE.to_string(),
                    ComposeService {
                        image: format!("php:{}-apache", php),
                        ports: vec!["80:80".to_string(), "443:443".to_string()],
                        volumes: vec![projects.clone()],
                        restart: Some("unless-stopped".to_string()),
                        ..Default::default()
                    },
                );
            }
        }

        let db = match settings.get_or_default(config::DATABASE).unwrap_or("mysql") {
            "mysql" => {
                file.volumes.insert("db_data".to_string(), None);
                ComposeService {
                    image: "mysql:8.0".to_string(),
                    ports: vec!["3306:3306".to_string()],
                    volumes: vec!["db_data:/var/lib/mysql".to_string()],
                    environment: BTreeMap::from([
                        ("MYSQL_ROOT_PASSWORD".to_string(), db_password.to_string()),
                        ("MYSQL_USER".to_string(), db_user.to_string()),
                        ("MYSQL_PASSWORD".to_string(), db_password.to_string()),
                    ]),
                    healthcheck: Some(HealthCheck::shell(
                        "mysqladmin ping -h localhost --silent",
                    )),
                    restart: Some("unless-stopped".to_string()),
                    ..Default::default()
                }
            }
            "postgresql" => {
                file.volumes.insert("db_data".to_string(), None);
                ComposeService {
                    image: "postgres:16".to_string(),
                    ports: vec!["5432:5432".to_string()],
                    volumes: vec!["db_data:/var/lib/postgresql/data".to_string()],
                    environment: BTreeMap::from([
                        ("POSTGRES_USER".to_string(), db_user.to_string()),
                        ("POSTGRES_PASSWORD".to_string(), db_password.to_string()),
                    ]),
                    healthcheck: Some(HealthCheck::shell(&format!("pg_isready -U {}", db_user))),
                    restart: Some("unless-stopped".to_string()),
                    ..Default::default()
                }
            }
            other => {
                return Err(Error::InvalidSetting {
                    key: config::DATABASE.to_string(),
                    value: other.to_string(),
                })
            }
        };
        file.services.insert(DB_SERVICE.to_string(), db);

        if settings.redis_enabled() {
            file.services.insert(
                REDIS_SERVICE.to_string(),
                ComposeService {
                    image: "redis:7-alpine".to_string(),
                    ports: vec!["6379:6379".to_string()],
                    healthcheck: Some(HealthCheck::shell("redis-cli ping")),
                    restart: Some("unless-stopped".to_string()),
                    ..Default::default()
                },
            );
        }

        if let Some(token) = settings.get(config::CLOUDFLARE_TOKEN).filter(|t| !t.is_empty()) {
            file.services.insert(
                TUNNEL_SERVICE.to_string(),
                ComposeService {
                    image: "cloudflare/cloudflared:latest".to_string(),
                    command: Some(vec![
                        "tunnel".to_string(),
                        "--no-autoupdate".to_string(),
                        "run".to_string(),
                    ]),
                    environment: BTreeMap::from([("TUNNEL_TOKEN".to_string(), token.to_string())]),
                    depends_on: vec![WEB_SERVICE.to_string()],
                    restart: Some("unless-stopped".to_string()),
                    ..Default::default()
                },
            );
        }

        let vscode_port = settings.get_or_default(config::VSCODE_PORT).unwrap_or("8443");
        file.services.insert(
            VSCODE_SERVICE.to_string(),
            ComposeService {
                image: "codercom/code-server:latest".to_string(),
                ports: vec![format!("{}:8080", vscode_port)],
                volumes: vec![format!("{}:/home/coder/projects", projects_dir.display())],
                environment: BTreeMap::from([(
                    "PASSWORD".to_string(),
                    settings
                        .get_or_default(config::VSCODE_PASSWORD)
                        .unwrap_or("yads")
                        .to_string(),
                )]),
                restart: Some("unless-stopped".to_string()),
                ..Default::default()
            },
        );

        Ok(file)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_yaml()?)?;
        info!("Wrote compose file to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// Which compose executable is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeProgram {
    /// `docker compose` (v2 plugin)
    Plugin,
    /// `docker-compose` (standalone v1 binary)
    Standalone,
}

impl ComposeProgram {
    /// Prefer the docker plugin, fall back to the standalone binary.
    pub fn detect(runner: &dyn CommandRunner) -> Self {
        let plugin = runner
            .output(&CommandSpec::new("docker").args(["compose", "version"]))
            .map(|o| o.success())
            .unwrap_or(false);
        if plugin {
            ComposeProgram::Plugin
        } else {
            ComposeProgram::Standalone
        }
    }
}

/// One row of `docker compose ps`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ComposePsEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub health: String,
    #[serde(default)]
    pub status: String,
}

/// Wrapper around `docker compose` for the YADS stack.
pub struct Compose<'a> {
    runner: &'a dyn CommandRunner,
    file: PathBuf,
    program: ComposeProgram,
}

impl<'a> Compose<'a> {
    pub fn new(runner: &'a dyn CommandRunner, file: PathBuf, program: ComposeProgram) -> Self {
        Self {
            runner,
            file,
            program,
        }
    }

    /// Build a client, detecting which compose executable to use.
    pub fn detect(runner: &'a dyn CommandRunner, file: PathBuf) -> Self {
        let program = ComposeProgram::detect(runner);
        debug!("Using compose program {:?}", program);
        Self::new(runner, file, program)
    }

    pub fn runner(&self) -> &'a dyn CommandRunner {
        self.runner
    }

    /// Base command with the compose file selected.
    pub fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = match self.program {
            ComposeProgram::Plugin => CommandSpec::new("docker").arg("compose"),
            ComposeProgram::Standalone => CommandSpec::new("docker-compose"),
        };
        spec.args(["-p", PROJECT_NAME, "-f"])
            .arg(self.file.display().to_string())
            .args(args)
    }

    pub fn up(&self, services: &[String]) -> Result<()> {
        self.runner
            .run_interactive(&self.command(["up", "-d"]).args(services.iter().cloned()))
    }

    pub fn down(&self) -> Result<()> {
        self.runner.run_interactive(&self.command(["down"]))
    }

    pub fn restart(&self, service: Option<&str>) -> Result<()> {
        self.runner
            .run_interactive(&self.command(["restart"]).args(service))
    }

    pub fn scale(&self, service: &str, replicas: u32) -> Result<()> {
        self.runner.run_interactive(&self.command([
            "up".to_string(),
            "-d".to_string(),
            "--no-recreate".to_string(),
            "--scale".to_string(),
            format!("{}={}", service, replicas),
            service.to_string(),
        ]))
    }

    pub fn logs(&self, service: Option<&str>, follow: bool, tail: Option<u32>) -> Result<()> {
        let mut spec = self.command(["logs"]);
        if follow {
            spec = spec.arg("-f");
        }
        if let Some(n) = tail {
            spec = spec.arg("--tail").arg(n.to_string());
        }
        self.runner.run_interactive(&spec.args(service))
    }

    /// Service names declared in the compose file.
    pub fn services(&self) -> Result<Vec<String>> {
        let out = self.runner.run(&self.command(["config", "--services"]))?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Containers of the project as reported by compose.
    pub fn ps(&self) -> Result<Vec<ComposePsEntry>> {
        let out = self
            .runner
            .run(&self.command(["ps", "--all", "--format", "json"]))?;
        parse_ps(&out.stdout)
    }
}

/// Parse `docker compose ps --format json` output.
///
/// Newer compose releases print one object per line, older ones a single array.
pub fn parse_ps(output: &str) -> Result<Vec<ComposePsEntry>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, RecordingRunner};

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        let mut s = Settings::default();
        for (k, v) in pairs {
            s.set(k, v).unwrap();
        }
        s
    }

    #[test]
    fn nginx_stack_has_php_fpm_and_mysql() {
        let file = ComposeFile::for_settings(&Settings::default(), Path::new("/srv/p")).unwrap();

        assert_eq!(file.services[WEB_SERVICE].image, "nginx:alpine");
        assert_eq!(
            file.services[WEB_SERVICE].volumes,
            vec![
                "/srv/p:/var/www/html",
                "./nginx-default.conf:/etc/nginx/conf.d/default.conf:ro",
            ]
        );
        assert_eq!(file.services[PHP_SERVICE].image, "php:8.2-fpm");
        assert_eq!(file.services[PHP_SERVICE].volumes, vec!["/srv/p:/var/www/html"]);
        assert_eq!(file.services[DB_SERVICE].image, "mysql:8.0");
        assert!(file.services.contains_key(REDIS_SERVICE));
        assert!(!file.services.contains_key(TUNNEL_SERVICE));
        assert_eq!(file.services[VSCODE_SERVICE].ports, vec!["8443:8080"]);
        assert!(file.volumes.contains_key("db_data"));
    }

    #[test]
    fn apache_postgres_stack_without_redis() {
        let s = settings(&[
            (config::WEB_SERVER, "apache"),
            (config::DATABASE, "postgresql"),
            (config::PHP_VERSION, "8.3"),
            (config::REDIS_ENABLED, "false"),
            (config::CLOUDFLARE_TOKEN, "abc123"),
        ]);
        let file = ComposeFile::for_settings(&s, Path::new("/srv/p")).unwrap();

        assert_eq!(file.services[WEB_SERVICE].image, "php:8.3-apache");
        assert!(!file.services.contains_key(PHP_SERVICE));
        assert_eq!(file.services[DB_SERVICE].image, "postgres:16");
        assert!(!file.services.contains_key(REDIS_SERVICE));
        assert_eq!(
            file.services[TUNNEL_SERVICE].environment["TUNNEL_TOKEN"],
            "abc123"
        );
    }

    #[test]
    fn compose_file_survives_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker-compose.yml");
        let file = ComposeFile::for_settings(&Settings::default(), Path::new("/srv/p")).unwrap();
        file.write(&path).unwrap();

        let yaml = fs::read_to_string(&path).unwrap();
        assert!(yaml.contains("image: nginx:alpine"));
        assert!(!yaml.contains("command:"));
        assert_eq!(ComposeFile::load(&path).unwrap(), file);
    }

    #[test]
    fn plugin_and_standalone_commands() {
        let runner = RecordingRunner::new();
        let plugin = Compose::new(&runner, PathBuf::from("/y/dc.yml"), ComposeProgram::Plugin);
        plugin.scale("php", 3).unwrap();
        let standalone =
            Compose::new(&runner, PathBuf::from("/y/dc.yml"), ComposeProgram::Standalone);
        standalone.restart(Some("web")).unwrap();

        assert_eq!(
            runner.command_lines(),
            vec![
                "docker compose -p yads -f /y/dc.yml up -d --no-recreate --scale php=3 php",
                "docker-compose -p yads -f /y/dc.yml restart web",
            ]
        );
    }

    #[test]
    fn detect_falls_back_to_standalone() {
        let runner = RecordingRunner::new();
        runner.fail(&["docker", "compose", "version"], 1, "unknown command");
        assert_eq!(ComposeProgram::detect(&runner), ComposeProgram::Standalone);

        let runner = RecordingRunner::new();
        assert_eq!(ComposeProgram::detect(&runner), ComposeProgram::Plugin);
    }

    #[test]
    fn parses_ps_lines_and_arrays() {
        let lines = concat!(
            r#"{"Name":"yads-web-1","Service":"web","State":"running","Health":"","Status":"Up 2 minutes"}"#,
            "\n",
            r#"{"Name":"yads-db-1","Service":"db","State":"running","Health":"healthy","Status":"Up"}"#,
            "\n"
        );
        let entries = parse_ps(lines).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].health, "healthy");

        let array = r#"[{"Name":"yads-web-1","Service":"web","State":"exited"}]"#;
        let entries = parse_ps(array).unwrap();
        assert_eq!(entries[0].state, "exited");

        assert!(parse_ps("  \n").unwrap().is_empty());
    }

    #[test]
    fn services_lists_config_output() {
        let runner = RecordingRunner::new();
        runner.respond(
            &["docker", "compose", "-p", "yads", "-f", "/y/dc.yml", "config", "--services"],
            CommandOutput::ok("web\nphp\n\ndb\n"),
        );
        let compose = Compose::new(&runner, PathBuf::from("/y/dc.yml"), ComposeProgram::Plugin);
        assert_eq!(compose.services().unwrap(), vec!["web", "php", "db"]);
    }
}
