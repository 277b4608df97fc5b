//! Stack installation on a bare host or through Docker Compose.

use crate::compose::{Compose, ComposeFile, NGINX_CONF};
use crate::domains;
use crate::config::{self, Config, Settings, WebServer};
use crate::exec::{self, CommandRunner, CommandSpec};
use crate::os::{OsInfo, PackageManager};
use crate::{Error, Result};
use serde::Serialize;
use tracing::info;

const COMPOSER_INSTALLER_URL: &str = "https://getcomposer.org/installer";
const CODE_SERVER_INSTALL_URL: &str = "https://code-server.dev/install.sh";
const DOCKER_INSTALL_URL: &str = "https://get.docker.com";
const CLOUDFLARED_RELEASES: &str =
    "https://github.com/cloudflare/cloudflared/releases/latest/download";

const APT_PHP_EXTENSIONS: [&str; 10] = [
    "fpm", "cli", "mysql", "pgsql", "curl", "mbstring", "xml", "zip", "gd", "redis",
];

const DNF_PHP_PACKAGES: [&str; 8] = [
    "php",
    "php-fpm",
    "php-cli",
    "php-mysqlnd",
    "php-pgsql",
    "php-mbstring",
    "php-xml",
    "php-gd",
];

/// External tools YADS may drive, in the order they are reported.
pub const TOOLS: &[&str] = &[
    "docker",
    "docker-compose",
    "mysql",
    "psql",
    "certbot",
    "cloudflared",
    "code-server",
    "composer",
    "npm",
    "pip3",
    "git",
];

/// A named group of commands run in order.
#[derive(Debug, Clone)]
pub struct InstallStep {
    pub name: String,
    pub commands: Vec<CommandSpec>,
}

impl InstallStep {
    fn new(name: impl Into<String>, commands: Vec<CommandSpec>) -> Self {
        Self {
            name: name.into(),
            commands,
        }
    }

    pub fn run(&self, runner: &dyn CommandRunner) -> Result<()> {
        info!("Install step: {}", self.name);
        for command in &self.commands {
            runner.run_interactive(command)?;
        }
        Ok(())
    }
}

/// Ordered install steps for one host.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub steps: Vec<InstallStep>,
}

/// Distribution-specific names for one stack component.
struct Packages {
    web: Vec<String>,
    php: Vec<String>,
    database: Vec<String>,
    redis: Vec<String>,
}

impl InstallPlan {
    /// Native install: packages, helper tools and service units.
    pub fn for_settings(settings: &Settings, os: &OsInfo) -> Result<Self> {
        let pm = os.package_manager()?;
        let packages = packages_for(settings, pm)?;
        let mut steps = Vec::new();

        steps.push(InstallStep::new("Refresh package index", vec![pm.update()]));
        steps.push(InstallStep::new(
            "Base tools",
            vec![pm.install(["curl", "ca-certificates", "git", "unzip"])],
        ));
        steps.push(InstallStep::new("Web server", vec![pm.install(packages.web)]));

        let mut php = Vec::new();
        if pm == PackageManager::Apt && os.id == "ubuntu" {
            php.push(pm.install(["software-properties-common"]));
            php.push(
                CommandSpec::new("add-apt-repository")
                    .args(["-y", "ppa:ondrej/php"])
                    .privileged(),
            );
            php.push(pm.update());
        }
        php.push(pm.install(packages.php));
        steps.push(InstallStep::new(
            format!("PHP {}", settings.php_version()),
            php,
        ));

        let mut db = vec![pm.install(packages.database)];
        if pm == PackageManager::Dnf && database_kind(settings) == "postgresql" {
            db.push(
                CommandSpec::new("postgresql-setup")
                    .arg("--initdb")
                    .privileged(),
            );
        }
        steps.push(InstallStep::new("Database server", db));

        if settings.redis_enabled() {
            steps.push(InstallStep::new("Redis", vec![pm.install(packages.redis)]));
        }

        steps.push(InstallStep::new(
            "Composer",
            vec![
                CommandSpec::new("curl").args([
                    "-fsSL",
                    COMPOSER_INSTALLER_URL,
                    "-o",
                    "/tmp/composer-setup.php",
                ]),
                CommandSpec::new("php")
                    .args([
                        "/tmp/composer-setup.php",
                        "--install-dir=/usr/local/bin",
                        "--filename=composer",
                    ])
                    .privileged(),
            ],
        ));

        steps.push(InstallStep::new("Cloudflare tunnel", cloudflared_commands(pm)));

        steps.push(InstallStep::new(
            "VS Code server",
            vec![
                CommandSpec::new("curl").args([
                    "-fsSL",
                    CODE_SERVER_INSTALL_URL,
                    "-o",
                    "/tmp/code-server-install.sh",
                ]),
                CommandSpec::new("sh").arg("/tmp/code-server-install.sh"),
            ],
        ));

        let mut enable = CommandSpec::new("systemctl")
            .args(["enable", "--now"])
            .privileged();
        for unit in service_units(settings, os)? {
            enable = enable.arg(unit);
        }
        steps.push(InstallStep::new("Enable services", vec![enable]));

        Ok(Self { steps })
    }

    /// Docker install: engine (when missing), compose file, `compose up`.
    pub fn docker(settings: &Settings, config: &Config, docker_present: bool) -> Result<Self> {
        let mut steps = Vec::new();
        if !docker_present {
            steps.push(InstallStep::new(
                "Docker engine",
                vec![
                    CommandSpec::new("curl").args([
                        "-fsSL",
                        DOCKER_INSTALL_URL,
                        "-o",
                        "/tmp/get-docker.sh",
                    ]),
                    CommandSpec::new("sh").arg("/tmp/get-docker.sh").privileged(),
                ],
            ));
        }
        // Fail early on settings the compose file can't express.
        ComposeFile::for_settings(settings, &config.projects_dir(settings))?;
        Ok(Self { steps })
    }

    /// Removal of the packages a native install added.
    pub fn uninstall(settings: &Settings, os: &OsInfo) -> Result<Self> {
        let pm = os.package_manager()?;
        let packages = packages_for(settings, pm)?;

        let mut stop = CommandSpec::new("systemctl")
            .args(["disable", "--now"])
            .privileged();
        for unit in service_units(settings, os)? {
            stop = stop.arg(unit);
        }

        let mut all = packages.web;
        all.extend(packages.php);
        all.extend(packages.database);
        if settings.redis_enabled() {
            all.extend(packages.redis);
        }
        all.push("cloudflared".to_string());
        all.push("code-server".to_string());

        Ok(Self {
            steps: vec![
                InstallStep::new("Stop services", vec![stop]),
                InstallStep::new("Remove packages", vec![pm.remove(all)]),
            ],
        })
    }

    pub fn execute(&self, runner: &dyn CommandRunner) -> Result<()> {
        for step in &self.steps {
            step.run(runner)?;
        }
        Ok(())
    }
}

/// Write the compose file and bring the stack up.
pub fn docker_up(settings: &Settings, config: &Config, compose: &Compose<'_>) -> Result<()> {
    let file = ComposeFile::for_settings(settings, &config.projects_dir(settings))?;
    std::fs::create_dir_all(config.projects_dir(settings))?;
    file.write(&config.compose_file)?;
    if settings.web_server()? == WebServer::Nginx {
        let conf = config.compose_file.with_file_name(NGINX_CONF);
        std::fs::write(&conf, domains::render_compose_nginx())?;
        info!("Wrote nginx config to {}", conf.display());
    }
    compose.up(&[])
}

fn database_kind(settings: &Settings) -> &str {
    settings.get_or_default(config::DATABASE).unwrap_or("mysql")
}

fn packages_for(settings: &Settings, pm: PackageManager) -> Result<Packages> {
    let v = settings.php_version();
    let web = settings.web_server()?;
    let db = database_kind(settings);

    let packages = match pm {
        PackageManager::Apt => Packages {
            web: match web {
                WebServer::Nginx => vec!["nginx".to_string()],
                WebServer::Apache => vec![
                    "apache2".to_string(),
                    format!("libapache2-mod-php{}", v),
                ],
            },
            php: APT_PHP_EXTENSIONS
                .iter()
                .map(|ext| format!("php{}-{}", v, ext))
                .collect(),
            database: match db {
                "mysql" => vec!["mysql-server".to_string(), "mysql-client".to_string()],
                "postgresql" => vec!["postgresql".to_string(), "postgresql-contrib".to_string()],
                other => return Err(invalid_db(other)),
            },
            redis: vec!["redis-server".to_string()],
        },
        PackageManager::Dnf => Packages {
            web: match web {
                WebServer::Nginx => vec!["nginx".to_string()],
                WebServer::Apache => vec!["httpd".to_string()],
            },
            php: DNF_PHP_PACKAGES.iter().map(|p| p.to_string()).collect(),
            database: match db {
                "mysql" => vec!["mysql-server".to_string()],
                "postgresql" => vec![
                    "postgresql-server".to_string(),
                    "postgresql-contrib".to_string(),
                ],
                other => return Err(invalid_db(other)),
            },
            redis: vec!["redis".to_string()],
        },
    };
    Ok(packages)
}

fn invalid_db(value: &str) -> Error {
    Error::InvalidSetting {
        key: config::DATABASE.to_string(),
        value: value.to_string(),
    }
}

fn cloudflared_commands(pm: PackageManager) -> Vec<CommandSpec> {
    let arch = match std::env::consts::ARCH {
        "aarch64" => "arm64",
        "arm" => "arm",
        _ => "amd64",
    };
    match pm {
        PackageManager::Apt => {
            let url = format!("{}/cloudflared-linux-{}.deb", CLOUDFLARED_RELEASES, arch);
            vec![
                CommandSpec::new("curl").args([
                    "-fsSL",
                    url.as_str(),
                    "-o",
                    "/tmp/cloudflared.deb",
                ]),
                CommandSpec::new("dpkg")
                    .args(["-i", "/tmp/cloudflared.deb"])
                    .privileged(),
            ]
        }
        PackageManager::Dnf => {
            let arch = if arch == "amd64" { "x86_64" } else { "aarch64" };
            let url = format!("{}/cloudflared-linux-{}.rpm", CLOUDFLARED_RELEASES, arch);
            vec![CommandSpec::new("dnf")
                .args(["install", "-y", url.as_str()])
                .privileged()]
        }
    }
}

/// Systemd units that make up the native stack.
pub fn service_units(settings: &Settings, os: &OsInfo) -> Result<Vec<String>> {
    let pm = os.package_manager()?;
    let v = settings.php_version();
    let mut units = Vec::new();

    units.push(match (pm, settings.web_server()?) {
        (PackageManager::Dnf, WebServer::Apache) => "httpd".to_string(),
        (_, web) => web.unit().to_string(),
    });
    units.push(match pm {
        PackageManager::Apt => format!("php{}-fpm", v),
        PackageManager::Dnf => "php-fpm".to_string(),
    });
    units.push(match (pm, database_kind(settings)) {
        (PackageManager::Dnf, "mysql") => "mysqld".to_string(),
        (_, "mysql") => "mysql".to_string(),
        (_, "postgresql") => "postgresql".to_string(),
        (_, other) => return Err(invalid_db(other)),
    });
    if settings.redis_enabled() {
        units.push(match pm {
            PackageManager::Apt => "redis-server".to_string(),
            PackageManager::Dnf => "redis".to_string(),
        });
    }
    Ok(units)
}

/// `systemctl <action>` over the native units.
pub fn systemctl(action: &str, units: &[String]) -> CommandSpec {
    CommandSpec::new("systemctl")
        .arg(action)
        .args(units.iter().cloned())
        .privileged()
}

/// Whether a unit reports `active`.
pub fn unit_active(runner: &dyn CommandRunner, unit: &str) -> bool {
    runner
        .output(&CommandSpec::new("systemctl").args(["is-active", "--quiet", unit]))
        .map(|o| o.success())
        .unwrap_or(false)
}

/// Availability of one external tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub name: String,
    pub available: bool,
}

/// Report which external tools are installed.
pub fn check_tools() -> Vec<ToolStatus> {
    TOOLS
        .iter()
        .map(|name| ToolStatus {
            name: name.to_string(),
            available: exec::tool_available(name),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::ComposeProgram;
    use crate::exec::RecordingRunner;

    fn ubuntu() -> OsInfo {
        OsInfo::parse("ID=ubuntu\nID_LIKE=debian\nVERSION_ID=\"22.04\"\n")
    }

    fn fedora() -> OsInfo {
        OsInfo::parse("ID=fedora\nVERSION_ID=39\n")
    }

    fn step<'a>(plan: &'a InstallPlan, name: &str) -> &'a InstallStep {
        plan.steps
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("missing step {name}"))
    }

    #[test]
    fn ubuntu_plan_adds_php_ppa_and_versioned_packages() {
        let plan = InstallPlan::for_settings(&Settings::default(), &ubuntu()).unwrap();
        let php = step(&plan, "PHP 8.2");
        let lines: Vec<String> = php.commands.iter().map(|c| c.argv().join(" ")).collect();

        assert!(lines.contains(&"add-apt-repository -y ppa:ondrej/php".to_string()));
        let install = lines.last().unwrap();
        assert!(install.starts_with("apt-get install -y php8.2-fpm"));
        assert!(install.contains("php8.2-mysql"));
    }

    #[test]
    fn plan_follows_settings() {
        let mut settings = Settings::default();
        settings.set(config::WEB_SERVER, "apache").unwrap();
        settings.set(config::DATABASE, "postgresql").unwrap();
        settings.set(config::REDIS_ENABLED, "false").unwrap();

        let plan = InstallPlan::for_settings(&settings, &ubuntu()).unwrap();
        let names: Vec<&str> = plan.steps.iter().map(|s| s.name.as_str()).collect();
        assert!(!names.contains(&"Redis"));

        let web = step(&plan, "Web server").commands[0].argv();
        assert!(web.contains(&"apache2".to_string()));
        let db = step(&plan, "Database server").commands[0].argv();
        assert!(db.contains(&"postgresql".to_string()));

        let enable = step(&plan, "Enable services").commands[0].argv();
        assert_eq!(
            enable,
            vec!["systemctl", "enable", "--now", "apache2", "php8.2-fpm", "postgresql"]
        );
    }

    #[test]
    fn fedora_plan_uses_dnf_and_initializes_postgres() {
        let mut settings = Settings::default();
        settings.set(config::DATABASE, "postgresql").unwrap();
        let plan = InstallPlan::for_settings(&settings, &fedora()).unwrap();

        assert_eq!(plan.steps[0].commands[0].argv(), vec!["dnf", "makecache", "-y"]);
        let db = step(&plan, "Database server");
        assert_eq!(db.commands[1].argv(), vec!["postgresql-setup", "--initdb"]);
        assert!(!step(&plan, "PHP 8.2")
            .commands
            .iter()
            .any(|c| c.program == "add-apt-repository"));
    }

    #[test]
    fn execute_runs_every_command_in_order() {
        let runner = RecordingRunner::new();
        let plan = InstallPlan::for_settings(&Settings::default(), &ubuntu()).unwrap();
        plan.execute(&runner).unwrap();

        let lines = runner.command_lines();
        assert_eq!(lines[0], "apt-get update");
        assert!(lines.last().unwrap().starts_with("systemctl enable --now nginx"));
        let total: usize = plan.steps.iter().map(|s| s.commands.len()).sum();
        assert_eq!(lines.len(), total);
    }

    #[test]
    fn execute_stops_at_first_failure() {
        let runner = RecordingRunner::new();
        runner.fail(&["apt-get", "update"], 100, "");
        let plan = InstallPlan::for_settings(&Settings::default(), &ubuntu()).unwrap();

        assert!(plan.execute(&runner).is_err());
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn docker_plan_installs_engine_only_when_missing() {
        let config = Config::with_home(std::path::PathBuf::from("/tmp/yads"));
        let settings = Settings::default();
        assert!(InstallPlan::docker(&settings, &config, true).unwrap().steps.is_empty());
        assert_eq!(
            InstallPlan::docker(&settings, &config, false).unwrap().steps[0].name,
            "Docker engine"
        );
    }

    #[test]
    fn uninstall_removes_installed_packages() {
        let plan = InstallPlan::uninstall(&Settings::default(), &ubuntu()).unwrap();
        let remove = plan.steps[1].commands[0].argv();
        assert_eq!(&remove[..3], &["apt-get", "remove", "-y"]);
        assert!(remove.contains(&"nginx".to_string()));
        assert!(remove.contains(&"redis-server".to_string()));
        assert!(remove.contains(&"cloudflared".to_string()));
    }

    #[test]
    fn check_tools_reports_every_tool() {
        let report = check_tools();
        assert_eq!(report.len(), TOOLS.len());
        assert_eq!(report[0].name, "docker");
    }

    #[test]
    fn docker_up_writes_compose_and_nginx_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_home(dir.path().to_path_buf());
        let settings = Settings::default();
        let runner = RecordingRunner::new();
        let compose = Compose::new(&runner, config.compose_file.clone(), ComposeProgram::Plugin);

        docker_up(&settings, &config, &compose).unwrap();

        assert!(config.compose_file.is_file());
        let nginx = std::fs::read_to_string(dir.path().join(NGINX_CONF)).unwrap();
        assert!(nginx.contains("fastcgi_pass php:9000;"));
        let lines = runner.command_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("up -d"));
    }
}
