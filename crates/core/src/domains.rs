//! Subdomains, virtual hosts, TLS certificates and tunnel routing.

use crate::compose::PHP_SERVICE;
use crate::config::{self, Config, Settings, WebServer};
use crate::exec::{self, CommandRunner, CommandSpec};
use crate::os::PackageManager;
use crate::validate;
use crate::{Error, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const HOSTS_BEGIN: &str = "# BEGIN yads";
const HOSTS_END: &str = "# END yads";
const CLOUDFLARED_UNIT: &str = "/etc/systemd/system/cloudflared.service";

/// `<project>.<domain>`, validating both parts.
pub fn subdomain_for(project: &str, domain: &str) -> Result<String> {
    validate::project_name(project)?;
    validate::domain(domain)?;
    Ok(format!("{}.{}", project.to_lowercase(), domain.to_lowercase()))
}

/// Public URL for a project, or a localhost URL when no domain is configured.
pub fn project_url(project: &str, settings: &Settings) -> Result<String> {
    match settings.domain() {
        Some(domain) => Ok(format!("https://{}", subdomain_for(project, domain)?)),
        None => Ok(format!("http://{}.localhost", project.to_lowercase())),
    }
}

/// Validate and store the base domain.
pub fn setup_domain(settings: &mut Settings, domain: &str) -> Result<()> {
    validate::domain(domain)?;
    settings.set(config::DOMAIN, &domain.to_lowercase())
}

/// A project virtual host on a native install.
#[derive(Debug, Clone, Copy)]
pub struct Vhost<'a> {
    pub web: WebServer,
    /// Distribution family; decides file layout and the PHP-FPM socket
    pub family: PackageManager,
    pub host: &'a str,
    pub root: &'a Path,
    pub php_version: &'a str,
}

/// Where a vhost file lives and, on Debian layouts, the symlink enabling it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhostPaths {
    pub available: PathBuf,
    pub enabled: Option<PathBuf>,
}

impl Vhost<'_> {
    pub fn paths(&self) -> VhostPaths {
        let host = self.host;
        match (self.family, self.web) {
            (PackageManager::Apt, WebServer::Nginx) => VhostPaths {
                available: PathBuf::from(format!("/etc/nginx/sites-available/{host}")),
                enabled: Some(PathBuf::from(format!("/etc/nginx/sites-enabled/{host}"))),
            },
            (PackageManager::Apt, WebServer::Apache) => VhostPaths {
                available: PathBuf::from(format!("/etc/apache2/sites-available/{host}.conf")),
                enabled: Some(PathBuf::from(format!("/etc/apache2/sites-enabled/{host}.conf"))),
            },
            (PackageManager::Dnf, WebServer::Nginx) => VhostPaths {
                available: PathBuf::from(format!("/etc/nginx/conf.d/{host}.conf")),
                enabled: None,
            },
            (PackageManager::Dnf, WebServer::Apache) => VhostPaths {
                available: PathBuf::from(format!("/etc/httpd/conf.d/{host}.conf")),
                enabled: None,
            },
        }
    }

    /// PHP-FPM socket of the distribution's packages.
    pub fn fpm_upstream(&self) -> String {
        match self.family {
            PackageManager::Apt => format!("unix:/run/php/php{}-fpm.sock", self.php_version),
            PackageManager::Dnf => "unix:/run/php-fpm/www.sock".to_string(),
        }
    }

    pub fn render(&self) -> String {
        let root = self.root.display().to_string();
        match self.web {
            WebServer::Nginx => nginx_server("listen 80;", self.host, &root, &self.fpm_upstream()),
            WebServer::Apache => {
                let log_dir = match self.family {
                    PackageManager::Apt => "${APACHE_LOG_DIR}",
                    PackageManager::Dnf => "logs",
                };
                apache_vhost(self.host, &root, log_dir)
            }
        }
    }

    /// Write, enable and load the vhost.
    pub fn install(&self, runner: &dyn CommandRunner, config: &Config) -> Result<()> {
        let paths = self.paths();
        let staging = config.home_dir.join("staging");
        exec::write_privileged(runner, &staging, &paths.available, &self.render())?;

        match (self.web, &paths.enabled) {
            (WebServer::Apache, Some(_)) => {
                runner.run(&CommandSpec::new("a2ensite").arg(self.site_name()).privileged())?;
            }
            (WebServer::Nginx, Some(enabled)) => {
                runner.run(
                    &CommandSpec::new("ln")
                        .arg("-sf")
                        .arg(paths.available.display().to_string())
                        .arg(enabled.display().to_string())
                        .privileged(),
                )?;
            }
            (_, None) => {}
        }
        self.test_config(runner)?;
        self.reload(runner)?;
        info!("Virtual host for {} enabled", self.host);
        Ok(())
    }

    /// Disable and delete the vhost.
    pub fn remove(&self, runner: &dyn CommandRunner) -> Result<()> {
        let paths = self.paths();
        if self.web == WebServer::Apache && paths.enabled.is_some() {
            runner.run(&CommandSpec::new("a2dissite").arg(self.site_name()).privileged())?;
        }
        let mut rm = CommandSpec::new("rm").arg("-f");
        if let Some(enabled) = &paths.enabled {
            rm = rm.arg(enabled.display().to_string());
        }
        runner.run(&rm.arg(paths.available.display().to_string()).privileged())?;
        self.reload(runner)?;
        info!("Virtual host for {} removed", self.host);
        Ok(())
    }

    fn site_name(&self) -> String {
        format!("{}.conf", self.host)
    }

    fn test_config(&self, runner: &dyn CommandRunner) -> Result<()> {
        let spec = match (self.web, self.family) {
            (WebServer::Nginx, _) => CommandSpec::new("nginx").arg("-t"),
            (WebServer::Apache, PackageManager::Apt) => {
                CommandSpec::new("apache2ctl").arg("configtest")
            }
            (WebServer::Apache, PackageManager::Dnf) => CommandSpec::new("httpd").arg("-t"),
        };
        runner.run(&spec.privileged())?;
        Ok(())
    }

    fn reload(&self, runner: &dyn CommandRunner) -> Result<()> {
        let unit = match (self.web, self.family) {
            (WebServer::Apache, PackageManager::Dnf) => "httpd",
            (web, _) => web.unit(),
        };
        runner.run(&CommandSpec::new("systemctl").args(["reload", unit]).privileged())?;
        Ok(())
    }
}

/// Default server of the compose stack's nginx container.
///
/// `<project>.<anything>` is served from `/var/www/html/<project>`; PHP goes
/// to the `php` service.
pub fn render_compose_nginx() -> String {
    nginx_server(
        "listen 80 default_server;",
        r"~^(?<project>[a-z0-9-]+)\.",
        "/var/www/html/$project",
        &format!("{}:9000", PHP_SERVICE),
    )
}

fn nginx_server(listen: &str, server_name: &str, root: &str, upstream: &str) -> String {
    format!(
        r#"server {{
    {listen}
    server_name {server_name};
    root {root};
    index index.php index.html;

    location / {{
        try_files $uri $uri/ /index.php?$query_string;
    }}

    location ~ \.php$ {{
        try_files $uri =404;
        fastcgi_split_path_info ^(.+\.php)(/.+)$;
        include fastcgi_params;
        fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;
        fastcgi_pass {upstream};
    }}

    location ~ /\.(?!well-known) {{
        deny all;
    }}
}}
"#
    )
}

fn apache_vhost(host: &str, root: &str, log_dir: &str) -> String {
    format!(
        r#"<VirtualHost *:80>
    ServerName {host}
    DocumentRoot {root}

    <Directory {root}>
        AllowOverride All
        Require all granted
    </Directory>

    ErrorLog {log_dir}/{host}-error.log
    CustomLog {log_dir}/{host}-access.log combined
</VirtualHost>
"#
    )
}

/// Obtain a certificate for `host` via certbot's web server plugin.
pub fn issue_certificate(
    runner: &dyn CommandRunner,
    web: WebServer,
    host: &str,
    email: Option<&str>,
) -> Result<()> {
    let mut spec = CommandSpec::new("certbot")
        .arg(format!("--{}", web.as_str()))
        .args(["-d", host, "--non-interactive", "--agree-tos"])
        .privileged();
    spec = match email {
        Some(email) => spec.args(["-m", email]),
        None => spec.arg("--register-unsafely-without-email"),
    };
    runner.run_interactive(&spec)?;
    info!("Certificate issued for {}", host);
    Ok(())
}

/// Route `host` to the named cloudflared tunnel.
pub fn route_tunnel(runner: &dyn CommandRunner, tunnel: &str, host: &str) -> Result<()> {
    if tunnel.is_empty() {
        return Err(Error::Other("Tunnel name is empty".to_string()));
    }
    runner.run(&CommandSpec::new("cloudflared").args(["tunnel", "route", "dns", tunnel, host]))?;
    info!("Routed {} through tunnel {}", host, tunnel);
    Ok(())
}

/// Install cloudflared as a host service using a tunnel token.
///
/// Returns false without running anything when the unit already exists.
pub fn install_tunnel_service(runner: &dyn CommandRunner, token: &str) -> Result<bool> {
    install_tunnel_unit(runner, token, Path::new(CLOUDFLARED_UNIT))
}

fn install_tunnel_unit(runner: &dyn CommandRunner, token: &str, unit: &Path) -> Result<bool> {
    if unit.exists() {
        info!("cloudflared service already installed at {}", unit.display());
        return Ok(false);
    }
    runner.run(
        &CommandSpec::new("cloudflared")
            .args(["service", "install"])
            .secret_arg(token)
            .privileged(),
    )?;
    Ok(true)
}

/// Managed block of `/etc/hosts` entries.
#[derive(Debug)]
pub struct HostsSection {
    path: PathBuf,
}

impl Default for HostsSection {
    fn default() -> Self {
        Self::new()
    }
}

impl HostsSection {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from("/etc/hosts"),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.path)?)
    }

    /// Replace the managed block (or append one) so it maps `hosts` to loopback.
    pub fn update_content(&self, current: &str, hosts: &[String]) -> String {
        let mut section = String::new();
        section.push_str(HOSTS_BEGIN);
        section.push('\n');
        for host in hosts {
            let _ = writeln!(section, "127.0.0.1 {host}");
        }
        section.push_str(HOSTS_END);

        if let Some(start) = current.find(HOSTS_BEGIN) {
            if let Some(end_idx) = current[start..].find(HOSTS_END) {
                let end = start + end_idx + HOSTS_END.len();
                let mut output = String::from(&current[..start]);
                output.push_str(&section);
                output.push_str(&current[end..]);
                return output;
            }
        }

        let mut output = String::from(current);
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&section);
        output.push('\n');
        output
    }

    /// Hosts currently listed in the managed block.
    pub fn managed_hosts(content: &str) -> Vec<String> {
        let Some(start) = content.find(HOSTS_BEGIN) else {
            return Vec::new();
        };
        content[start + HOSTS_BEGIN.len()..]
            .lines()
            .take_while(|l| l.trim() != HOSTS_END)
            .filter_map(|l| l.split_whitespace().nth(1))
            .map(str::to_string)
            .collect()
    }

    /// Rewrite the hosts file through the runner (needs root).
    pub fn write(
        &self,
        runner: &dyn CommandRunner,
        staging_dir: &Path,
        content: &str,
    ) -> Result<()> {
        exec::write_privileged(runner, staging_dir, &self.path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::RecordingRunner;

    #[test]
    fn subdomain_combines_and_lowercases() {
        assert_eq!(subdomain_for("Blog", "Example.com").unwrap(), "blog.example.com");
        assert!(subdomain_for("bad_name", "example.com").is_err());
        assert!(subdomain_for("blog", "localhost").is_err());
    }

    #[test]
    fn project_url_depends_on_domain() {
        let mut settings = Settings::default();
        assert_eq!(project_url("shop", &settings).unwrap(), "http://shop.localhost");
        setup_domain(&mut settings, "Dev-Box.io").unwrap();
        assert_eq!(settings.get(config::DOMAIN), Some("dev-box.io"));
        assert_eq!(project_url("shop", &settings).unwrap(), "https://shop.dev-box.io");
    }

    fn vhost<'a>(web: WebServer, family: PackageManager, root: &'a Path) -> Vhost<'a> {
        Vhost {
            web,
            family,
            host: "a1.example.com",
            root,
            php_version: "8.3",
        }
    }

    #[test]
    fn nginx_vhost_points_at_distribution_fpm_socket() {
        let root = Path::new("/srv/a1");
        let debian = vhost(WebServer::Nginx, PackageManager::Apt, root).render();
        assert!(debian.contains("server_name a1.example.com;"));
        assert!(debian.contains("root /srv/a1;"));
        assert!(debian.contains("fastcgi_pass unix:/run/php/php8.3-fpm.sock;"));
        assert!(!debian.contains("snippets/"));

        let fedora = vhost(WebServer::Nginx, PackageManager::Dnf, root).render();
        assert!(fedora.contains("fastcgi_pass unix:/run/php-fpm/www.sock;"));
    }

    #[test]
    fn apache_vhost_has_document_root() {
        let root = Path::new("/srv/a1");
        let debian = vhost(WebServer::Apache, PackageManager::Apt, root).render();
        assert!(debian.starts_with("<VirtualHost *:80>"));
        assert!(debian.contains("DocumentRoot /srv/a1"));
        assert!(debian.contains("${APACHE_LOG_DIR}/a1.example.com-error.log"));

        let fedora = vhost(WebServer::Apache, PackageManager::Dnf, root).render();
        assert!(fedora.contains("ErrorLog logs/a1.example.com-error.log"));
    }

    #[test]
    fn vhost_paths_follow_distribution_layout() {
        let root = Path::new("/srv/a1");
        let paths = vhost(WebServer::Nginx, PackageManager::Dnf, root).paths();
        assert_eq!(paths.available, PathBuf::from("/etc/nginx/conf.d/a1.example.com.conf"));
        assert_eq!(paths.enabled, None);

        let paths = vhost(WebServer::Apache, PackageManager::Dnf, root).paths();
        assert_eq!(paths.available, PathBuf::from("/etc/httpd/conf.d/a1.example.com.conf"));

        let paths = vhost(WebServer::Apache, PackageManager::Apt, root).paths();
        assert_eq!(
            paths.enabled,
            Some(PathBuf::from("/etc/apache2/sites-enabled/a1.example.com.conf"))
        );
    }

    #[test]
    fn install_nginx_vhost_on_debian() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_home(dir.path().to_path_buf());
        let runner = RecordingRunner::new();

        vhost(WebServer::Nginx, PackageManager::Apt, Path::new("/srv/a1"))
            .install(&runner, &config)
            .unwrap();

        let lines = runner.command_lines();
        assert!(lines[0].starts_with("install -m 644"));
        assert!(lines[0].ends_with("/etc/nginx/sites-available/a1.example.com"));
        assert_eq!(
            lines[1],
            "ln -sf /etc/nginx/sites-available/a1.example.com /etc/nginx/sites-enabled/a1.example.com"
        );
        assert_eq!(lines[2], "nginx -t");
        assert_eq!(lines[3], "systemctl reload nginx");

        let staged = fs::read_to_string(dir.path().join("staging").join("a1.example.com")).unwrap();
        assert!(staged.contains("server_name a1.example.com;"));
    }

    #[test]
    fn install_apache_vhost_on_debian_uses_a2ensite() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_home(dir.path().to_path_buf());
        let runner = RecordingRunner::new();

        vhost(WebServer::Apache, PackageManager::Apt, Path::new("/srv/a1"))
            .install(&runner, &config)
            .unwrap();

        let lines = runner.command_lines();
        assert!(lines[0].ends_with("/etc/apache2/sites-available/a1.example.com.conf"));
        assert_eq!(
            &lines[1..],
            &[
                "a2ensite a1.example.com.conf",
                "apache2ctl configtest",
                "systemctl reload apache2",
            ]
        );
    }

    #[test]
    fn install_apache_vhost_on_fedora_drops_into_conf_d() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_home(dir.path().to_path_buf());
        let runner = RecordingRunner::new();

        vhost(WebServer::Apache, PackageManager::Dnf, Path::new("/srv/a1"))
            .install(&runner, &config)
            .unwrap();

        let lines = runner.command_lines();
        assert!(lines[0].ends_with("/etc/httpd/conf.d/a1.example.com.conf"));
        assert_eq!(&lines[1..], &["httpd -t", "systemctl reload httpd"]);
        assert!(!lines.iter().any(|l| l.starts_with("a2ensite")));
    }

    #[test]
    fn remove_vhost_disables_then_deletes() {
        let root = Path::new("/srv/a1");
        let runner = RecordingRunner::new();
        vhost(WebServer::Apache, PackageManager::Apt, root)
            .remove(&runner)
            .unwrap();
        assert_eq!(
            runner.command_lines(),
            vec![
                "a2dissite a1.example.com.conf",
                "rm -f /etc/apache2/sites-enabled/a1.example.com.conf /etc/apache2/sites-available/a1.example.com.conf",
                "systemctl reload apache2",
            ]
        );

        let runner = RecordingRunner::new();
        vhost(WebServer::Nginx, PackageManager::Dnf, root)
            .remove(&runner)
            .unwrap();
        assert_eq!(
            runner.command_lines(),
            vec![
                "rm -f /etc/nginx/conf.d/a1.example.com.conf",
                "systemctl reload nginx",
            ]
        );
    }

    #[test]
    fn compose_nginx_forwards_php_to_fpm_service() {
        let conf = render_compose_nginx();
        assert!(conf.contains("listen 80 default_server;"));
        assert!(conf.contains("root /var/www/html/$project;"));
        assert!(conf.contains("fastcgi_pass php:9000;"));
    }

    #[test]
    fn certbot_arguments() {
        let runner = RecordingRunner::new();
        let email = Some("me@example.com");
        issue_certificate(&runner, WebServer::Apache, "a1.example.com", email).unwrap();
        issue_certificate(&runner, WebServer::Nginx, "a1.example.com", None).unwrap();

        assert_eq!(
            runner.command_lines(),
            vec![
                "certbot --apache -d a1.example.com --non-interactive --agree-tos -m me@example.com",
                "certbot --nginx -d a1.example.com --non-interactive --agree-tos --register-unsafely-without-email",
            ]
        );
        assert!(runner.calls().iter().all(|c| c.privileged));
    }

    #[test]
    fn tunnel_route_arguments() {
        let runner = RecordingRunner::new();
        route_tunnel(&runner, "yads", "a1.example.com").unwrap();
        assert_eq!(
            runner.command_lines(),
            vec!["cloudflared tunnel route dns yads a1.example.com"]
        );
        assert!(route_tunnel(&runner, "", "a1.example.com").is_err());
    }

    #[test]
    fn tunnel_service_installs_once_and_hides_token() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("cloudflared.service");
        let runner = RecordingRunner::new();

        assert!(install_tunnel_unit(&runner, "tok3n", &unit).unwrap());
        let calls = runner.calls();
        assert_eq!(calls[0].argv(), vec!["cloudflared", "service", "install", "tok3n"]);
        assert!(!calls[0].to_string().contains("tok3n"));

        fs::write(&unit, "[Unit]\n").unwrap();
        assert!(!install_tunnel_unit(&runner, "tok3n", &unit).unwrap());
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn hosts_section_append_and_replace() {
        let hosts = HostsSection::with_path(PathBuf::from("/tmp/hosts"));
        let content = "127.0.0.1 localhost";
        let updated = hosts.update_content(content, &["a.localhost".to_string()]);
        assert!(updated.starts_with("127.0.0.1 localhost\n# BEGIN yads\n"));
        assert!(updated.ends_with("# END yads\n"));

        let replaced = hosts.update_content(&updated, &["b.localhost".to_string()]);
        assert!(!replaced.contains("a.localhost"));
        assert_eq!(replaced.matches(HOSTS_BEGIN).count(), 1);
        assert_eq!(HostsSection::managed_hosts(&replaced), vec!["b.localhost"]);
    }

    #[test]
    fn managed_hosts_empty_without_block() {
        assert!(HostsSection::managed_hosts("127.0.0.1 localhost\n").is_empty());
    }
}
