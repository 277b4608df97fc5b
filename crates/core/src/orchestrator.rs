//! Container lifecycle helpers: monitor, scale, auto-scale, health-check, backup.

use crate::compose::{Compose, ComposePsEntry, PROJECT_NAME};
use crate::exec::{CommandRunner, CommandSpec};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// One row of `docker stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "CPUPerc", default)]
    pub cpu: String,
    #[serde(rename = "MemUsage", default)]
    pub mem_usage: String,
    #[serde(rename = "MemPerc", default)]
    pub mem: String,
    #[serde(rename = "NetIO", default)]
    pub net_io: String,
    #[serde(rename = "BlockIO", default)]
    pub block_io: String,
}

impl ContainerStats {
    pub fn cpu_percent(&self) -> f64 {
        parse_percent(&self.cpu)
    }

    pub fn mem_percent(&self) -> f64 {
        parse_percent(&self.mem)
    }
}

fn parse_percent(value: &str) -> f64 {
    value.trim().trim_end_matches('%').trim().parse().unwrap_or(0.0)
}

/// Thresholds for [`Orchestrator::auto_scale`].
#[derive(Debug, Clone, PartialEq)]
pub struct AutoScalePolicy {
    /// Services eligible for scaling
    pub services: Vec<String>,
    pub scale_up_cpu: f64,
    pub scale_down_cpu: f64,
    pub min_replicas: u32,
    pub max_replicas: u32,
}

impl Default for AutoScalePolicy {
    fn default() -> Self {
        Self {
            services: vec![crate::compose::PHP_SERVICE.to_string()],
            scale_up_cpu: 80.0,
            scale_down_cpu: 20.0,
            min_replicas: 1,
            max_replicas: 5,
        }
    }
}

/// A scaling change computed by [`decide`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleDecision {
    pub service: String,
    pub current: u32,
    pub target: u32,
    pub avg_cpu: f64,
}

/// Health of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub service: String,
    pub container: String,
    pub state: String,
    pub health: String,
}

impl HealthReport {
    /// Running, and not reported unhealthy by its healthcheck.
    pub fn healthy(&self) -> bool {
        self.state == "running" && self.health != "unhealthy" && self.health != "starting"
    }
}

/// Container operations for the YADS compose project.
pub struct Orchestrator<'a> {
    compose: &'a Compose<'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(compose: &'a Compose<'a>) -> Self {
        Self { compose }
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.compose.runner()
    }

    /// Resource usage snapshot for every running container.
    pub fn monitor(&self) -> Result<Vec<ContainerStats>> {
        let out = self.runner().run(&CommandSpec::new("docker").args([
            "stats",
            "--no-stream",
            "--format",
            "{{json .}}",
        ]))?;
        parse_stats(&out.stdout)
    }

    /// Compose containers of the project.
    pub fn ps(&self) -> Result<Vec<ComposePsEntry>> {
        self.compose.ps()
    }

    /// Set the replica count of a service.
    pub fn scale(&self, service: &str, replicas: u32) -> Result<()> {
        if replicas == 0 {
            return Err(Error::Other(
                "Replica count must be at least 1 (use 'yads stop' to stop services)".to_string(),
            ));
        }
        self.ensure_service(service)?;
        self.compose.scale(service, replicas)?;
        info!("Scaled {} to {} replica(s)", service, replicas);
        Ok(())
    }

    fn ensure_service(&self, service: &str) -> Result<()> {
        // A dry run has no real service list to check against.
        if self.runner().is_dry_run() {
            return Ok(());
        }
        let services = self.compose.services()?;
        if services.iter().any(|s| s == service) {
            Ok(())
        } else {
            Err(Error::ServiceNotFound(service.to_string()))
        }
    }

    /// One auto-scaling pass: measure, decide, apply.
    pub fn auto_scale(&self, policy: &AutoScalePolicy) -> Result<Vec<ScaleDecision>> {
        let containers = self.compose.ps()?;
        let stats = self.monitor()?;
        let decisions = decide(policy, &containers, &stats);

        for decision in &decisions {
            info!(
                "Auto-scaling {} from {} to {} (avg CPU {:.1}%)",
                decision.service, decision.current, decision.target, decision.avg_cpu
            );
            self.compose.scale(&decision.service, decision.target)?;
        }
        if decisions.is_empty() {
            debug!("Auto-scale: no changes needed");
        }
        Ok(decisions)
    }

    /// Container state and healthcheck status.
    pub fn health_check(&self) -> Result<Vec<HealthReport>> {
        Ok(self
            .compose
            .ps()?
            .into_iter()
            .map(|c| HealthReport {
                service: c.service,
                container: c.name,
                state: c.state,
                health: c.health,
            })
            .collect())
    }

    pub fn logs(&self, service: Option<&str>, follow: bool, tail: Option<u32>) -> Result<()> {
        self.compose.logs(service, follow, tail)
    }

    pub fn restart(&self, service: Option<&str>) -> Result<()> {
        if let Some(service) = service {
            self.ensure_service(service)?;
        }
        self.compose.restart(service)
    }

    /// Remove stopped containers, dangling images and unused networks.
    pub fn cleanup(&self) -> Result<String> {
        let out = self
            .runner()
            .run(&CommandSpec::new("docker").args(["system", "prune", "-f"]))?;
        Ok(out.stdout)
    }

    /// Volumes that belong to the compose project.
    pub fn volumes(&self) -> Result<Vec<String>> {
        let out = self.runner().run(&CommandSpec::new("docker").args([
            "volume",
            "ls",
            "--format",
            "{{.Name}}",
        ]))?;
        let prefix = format!("{}_", PROJECT_NAME);
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|v| v.starts_with(&prefix))
            .map(str::to_string)
            .collect())
    }

    /// Archive a volume into `dest_dir` as `<volume>-<unix time>.tar.gz`.
    pub fn backup_volume(&self, volume: &str, dest_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dest_dir)?;
        let dest_dir = dest_dir.canonicalize()?;
        let file_name = format!("{}-{}.tar.gz", volume, unix_now());

        self.runner().run(&CommandSpec::new("docker").args([
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:/data:ro", volume),
            "-v".to_string(),
            format!("{}:/backup", dest_dir.display()),
            "alpine".to_string(),
            "tar".to_string(),
            "czf".to_string(),
            format!("/backup/{}", file_name),
            "-C".to_string(),
            "/data".to_string(),
            ".".to_string(),
        ]))?;

        let archive = dest_dir.join(file_name);
        info!("Backed up volume {} to {:?}", volume, archive);
        Ok(archive)
    }

    /// Archive every project volume; failures are logged and skipped.
    pub fn backup_all(&self, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut archives = Vec::new();
        for volume in self.volumes()? {
            match self.backup_volume(&volume, dest_dir) {
                Ok(path) => archives.push(path),
                Err(e) => warn!("Failed to back up volume '{}': {}", volume, e),
            }
        }
        Ok(archives)
    }

    /// Extract an archive made by [`Orchestrator::backup_volume`] into a volume.
    pub fn restore_volume(&self, volume: &str, archive: &Path) -> Result<()> {
        if !archive.is_file() {
            return Err(Error::Other(format!(
                "Backup archive not found: {}",
                archive.display()
            )));
        }
        let archive = archive.canonicalize()?;
        let (dir, file) = match (archive.parent(), archive.file_name()) {
            (Some(dir), Some(file)) => (dir.to_path_buf(), file.to_string_lossy().into_owned()),
            _ => return Err(Error::Other(format!("Invalid archive path {:?}", archive))),
        };

        self.runner().run(&CommandSpec::new("docker").args([
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:/data", volume),
            "-v".to_string(),
            format!("{}:/backup:ro", dir.display()),
            "alpine".to_string(),
            "tar".to_string(),
            "xzf".to_string(),
            format!("/backup/{}", file),
            "-C".to_string(),
            "/data".to_string(),
        ]))?;
        info!("Restored volume {} from {:?}", volume, archive);
        Ok(())
    }
}

/// Parse `docker stats --format '{{json .}}'` output.
pub fn parse_stats(output: &str) -> Result<Vec<ContainerStats>> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).map_err(Error::from))
        .collect()
}

/// Compute scaling decisions from current replicas and CPU usage.
///
/// Each eligible service moves by at most one replica per pass. A service
/// outside the policy bounds steps back toward them regardless of load.
pub fn decide(
    policy: &AutoScalePolicy,
    containers: &[ComposePsEntry],
    stats: &[ContainerStats],
) -> Vec<ScaleDecision> {
    let cpu_by_container: BTreeMap<&str, f64> = stats
        .iter()
        .map(|s| (s.name.as_str(), s.cpu_percent()))
        .collect();

    let mut decisions = Vec::new();
    for service in &policy.services {
        let running: Vec<&ComposePsEntry> = containers
            .iter()
            .filter(|c| &c.service == service && c.state == "running")
            .collect();
        if running.is_empty() {
            continue;
        }

        let current = running.len() as u32;
        let total: f64 = running
            .iter()
            .map(|c| cpu_by_container.get(c.name.as_str()).copied().unwrap_or(0.0))
            .sum();
        let avg_cpu = total / current as f64;
        let min = policy.min_replicas.max(1);
        let max = policy.max_replicas.max(min);

        let target = if current > max {
            current - 1
        } else if current < min {
            current + 1
        } else if avg_cpu > policy.scale_up_cpu {
            (current + 1).min(max)
        } else if avg_cpu < policy.scale_down_cpu {
            current.saturating_sub(1).max(min)
        } else {
            current
        };

        if target != current {
            decisions.push(ScaleDecision {
                service: service.clone(),
                current,
                target,
                avg_cpu,
            });
        }
    }
    decisions
}

/// Status code returned by a GET of `url`, without following redirects.
pub async fn http_status(url: &str, timeout: Duration) -> Result<u16> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let resp = client.get(url).send().await?;
    Ok(resp.status().as_u16())
}

/// Probe an HTTP endpoint; any 2xx/3xx answer counts as healthy.
pub async fn probe_http(url: &str, timeout: Duration) -> bool {
    match http_status(url, timeout).await {
        Ok(status) => (200..400).contains(&status),
        Err(e) => {
            debug!("Probe of {} failed: {}", url, e);
            false
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::ComposeProgram;
    use crate::exec::{CommandOutput, RecordingRunner};

    const FILE: &str = "/y/dc.yml";

    fn entry(name: &str, service: &str, state: &str) -> ComposePsEntry {
        ComposePsEntry {
            name: name.to_string(),
            service: service.to_string(),
            state: state.to_string(),
            ..Default::default()
        }
    }

    fn stat(name: &str, cpu: &str) -> ContainerStats {
        ContainerStats {
            name: name.to_string(),
            cpu: cpu.to_string(),
            ..Default::default()
        }
    }

    fn compose(runner: &RecordingRunner) -> Compose<'_> {
        Compose::new(runner, PathBuf::from(FILE), ComposeProgram::Plugin)
    }

    #[test]
    fn parses_docker_stats() {
        let output = concat!(
            r#"{"BlockIO":"0B / 0B","CPUPerc":"12.50%","Container":"abc","MemPerc":"3.10%","MemUsage":"31MiB / 1GiB","Name":"yads-php-1","NetIO":"1kB / 2kB","PIDs":"3"}"#,
            "\n\n",
            r#"{"CPUPerc":"--","Name":"yads-web-1"}"#,
        );
        let stats = parse_stats(output).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].cpu_percent(), 12.5);
        assert_eq!(stats[0].mem_percent(), 3.1);
        assert_eq!(stats[1].cpu_percent(), 0.0);
    }

    #[test]
    fn decide_scales_up_down_and_respects_bounds() {
        let policy = AutoScalePolicy {
            services: vec!["php".to_string(), "worker".to_string()],
            max_replicas: 2,
            ..Default::default()
        };
        let containers = vec![
            entry("yads-php-1", "php", "running"),
            entry("yads-worker-1", "worker", "running"),
            entry("yads-worker-2", "worker", "running"),
        ];

        let hot = vec![
            stat("yads-php-1", "95%"),
            stat("yads-worker-1", "99%"),
            stat("yads-worker-2", "90%"),
        ];
        let decisions = decide(&policy, &containers, &hot);
        assert_eq!(
            decisions,
            vec![ScaleDecision {
                service: "php".to_string(),
                current: 1,
                target: 2,
                avg_cpu: 95.0,
            }]
        );

        let cold = vec![
            stat("yads-php-1", "1%"),
            stat("yads-worker-1", "5%"),
            stat("yads-worker-2", "3%"),
        ];
        let decisions = decide(&policy, &containers, &cold);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].service, "worker");
        assert_eq!(decisions[0].target, 1);
    }

    #[test]
    fn decide_moves_one_replica_toward_bounds() {
        let policy = AutoScalePolicy::default();
        let containers: Vec<ComposePsEntry> = (1..=8)
            .map(|i| entry(&format!("yads-php-{i}"), "php", "running"))
            .collect();
        let stats: Vec<ContainerStats> = (1..=8)
            .map(|i| stat(&format!("yads-php-{i}"), "50%"))
            .collect();

        let decisions = decide(&policy, &containers, &stats);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].current, 8);
        assert_eq!(decisions[0].target, 7);

        // Even when hot, an over-provisioned service only shrinks.
        let hot: Vec<ContainerStats> = (1..=8)
            .map(|i| stat(&format!("yads-php-{i}"), "99%"))
            .collect();
        assert_eq!(decide(&policy, &containers, &hot)[0].target, 7);

        let policy = AutoScalePolicy {
            min_replicas: 3,
            ..Default::default()
        };
        let decisions = decide(&policy, &containers[..1], &stats[..1]);
        assert_eq!(decisions[0].target, 2);
    }

    #[test]
    fn decide_ignores_stopped_and_unlisted_services() {
        let policy = AutoScalePolicy::default();
        let containers = vec![
            entry("yads-php-1", "php", "exited"),
            entry("yads-db-1", "db", "running"),
        ];
        let stats = vec![stat("yads-db-1", "100%")];
        assert!(decide(&policy, &containers, &stats).is_empty());
    }

    #[test]
    fn scale_checks_service_exists() {
        let runner = RecordingRunner::new();
        runner.respond(
            &["docker", "compose", "-p", "yads", "-f", FILE, "config", "--services"],
            CommandOutput::ok("web\nphp\n"),
        );
        let compose = compose(&runner);
        let orchestrator = Orchestrator::new(&compose);

        assert!(matches!(orchestrator.scale("nope", 2), Err(Error::ServiceNotFound(_))));
        assert!(orchestrator.scale("php", 0).is_err());
        orchestrator.scale("php", 3).unwrap();
        assert_eq!(
            runner.command_lines().last().unwrap(),
            "docker compose -p yads -f /y/dc.yml up -d --no-recreate --scale php=3 php"
        );
    }

    #[test]
    fn dry_run_scale_skips_service_lookup() {
        let runner = crate::exec::DryRunRunner;
        let compose = Compose::new(&runner, PathBuf::from(FILE), ComposeProgram::Plugin);
        let orchestrator = Orchestrator::new(&compose);
        orchestrator.scale("php", 3).unwrap();
        orchestrator.restart(Some("web")).unwrap();
    }

    #[test]
    fn auto_scale_applies_decisions() {
        let runner = RecordingRunner::new();
        runner.respond(
            &["docker", "compose", "-p", "yads", "-f", FILE, "ps"],
            CommandOutput::ok(r#"{"Name":"yads-php-1","Service":"php","State":"running"}"#),
        );
        runner.respond(
            &["docker", "stats"],
            CommandOutput::ok(r#"{"Name":"yads-php-1","CPUPerc":"88.0%"}"#),
        );
        let compose = compose(&runner);
        let decisions = Orchestrator::new(&compose)
            .auto_scale(&AutoScalePolicy::default())
            .unwrap();

        assert_eq!(decisions.len(), 1);
        let expected = "docker compose -p yads -f /y/dc.yml up -d --no-recreate --scale php=2 php";
        assert!(runner.command_lines().iter().any(|l| l == expected));
    }

    #[test]
    fn health_reports_follow_compose_state() {
        let runner = RecordingRunner::new();
        runner.respond(
            &["docker", "compose", "-p", "yads", "-f", FILE, "ps"],
            CommandOutput::ok(concat!(
                r#"{"Name":"yads-db-1","Service":"db","State":"running","Health":"unhealthy"}"#,
                "\n",
                r#"{"Name":"yads-web-1","Service":"web","State":"running","Health":""}"#,
            )),
        );
        let compose = compose(&runner);
        let reports = Orchestrator::new(&compose).health_check().unwrap();
        assert!(!reports[0].healthy());
        assert!(reports[1].healthy());
    }

    #[test]
    fn backup_volume_mounts_destination() {
        let dir = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let compose = compose(&runner);
        let archive = Orchestrator::new(&compose)
            .backup_volume("yads_db_data", dir.path())
            .unwrap();

        let name = archive.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("yads_db_data-") && name.ends_with(".tar.gz"));
        let argv = runner.calls()[0].argv();
        assert_eq!(&argv[..5], &["docker", "run", "--rm", "-v", "yads_db_data:/data:ro"]);
        assert_eq!(argv[6], format!("{}:/backup", dir.path().canonicalize().unwrap().display()));
        assert_eq!(argv[10], format!("/backup/{}", name));
    }

    #[test]
    fn volumes_filters_project_prefix() {
        let runner = RecordingRunner::new();
        runner.respond(
            &["docker", "volume", "ls"],
            CommandOutput::ok("yads_db_data\nother_data\nyads_cache\n"),
        );
        let compose = compose(&runner);
        assert_eq!(
            Orchestrator::new(&compose).volumes().unwrap(),
            vec!["yads_db_data", "yads_cache"]
        );
    }

    #[test]
    fn restore_requires_existing_archive() {
        let runner = RecordingRunner::new();
        let compose = compose(&runner);
        let err = Orchestrator::new(&compose)
            .restore_volume("yads_db_data", Path::new("/nonexistent/archive.tar.gz"))
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn probe_accepts_redirects() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(
                    b"HTTP/1.1 302 Found\r\nLocation: /login\r\n\
                      Content-Length: 0\r\nConnection: close\r\n\r\n",
                )
                .await
                .unwrap();
        });

        let url = format!("http://{}/", addr);
        assert!(probe_http(&url, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn probe_unreachable_endpoint_is_unhealthy() {
        assert!(!probe_http("http://127.0.0.1:9/", Duration::from_millis(500)).await);
    }
}
