//! Project scaffolding and lifecycle.
//!
//! A project is a directory under the projects dir. Disabling renames it to
//! `<name>.disabled`; enabling renames it back.

use crate::config::{self, Settings};
use crate::domains;
use crate::exec::{CommandRunner, CommandSpec};
use crate::templates::{self, ProjectType, TemplateFetcher};
use crate::validate;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const DISABLED_SUFFIX: &str = ".disabled";
const ENV_FILE: &str = ".env";

/// A project found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
    pub enabled: bool,
}

/// Where a created project's files came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// Directory in the cached template repository
    Remote(PathBuf),
    Builtin(ProjectType),
}

/// Options for [`ProjectManager::create`].
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Built-in project type or the name of a cached remote template
    pub template: String,
    /// Run composer/npm/pip after scaffolding
    pub install_dependencies: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            template: ProjectType::default().to_string(),
            install_dependencies: false,
        }
    }
}

/// Outcome of a create call.
#[derive(Debug, Clone)]
pub struct CreatedProject {
    pub project: Project,
    pub url: String,
    pub source: TemplateSource,
    /// Directory a web server should serve
    pub document_root: PathBuf,
}

/// Manages the projects directory.
pub struct ProjectManager<'a> {
    projects_dir: PathBuf,
    runner: &'a dyn CommandRunner,
    templates: Option<&'a TemplateFetcher>,
}

impl<'a> ProjectManager<'a> {
    pub fn new(projects_dir: PathBuf, runner: &'a dyn CommandRunner) -> Self {
        Self {
            projects_dir,
            runner,
            templates: None,
        }
    }

    /// Prefer cached remote templates over the built-in scaffolds.
    pub fn with_templates(mut self, templates: &'a TemplateFetcher) -> Self {
        self.templates = Some(templates);
        self
    }

    fn enabled_path(&self, name: &str) -> PathBuf {
        self.projects_dir.join(name)
    }

    fn disabled_path(&self, name: &str) -> PathBuf {
        self.projects_dir.join(format!("{}{}", name, DISABLED_SUFFIX))
    }

    /// Locate a project in either state.
    pub fn find(&self, name: &str) -> Result<Project> {
        validate::project_name(name)?;
        let enabled = self.enabled_path(name);
        if enabled.is_dir() {
            return Ok(Project {
                name: name.to_string(),
                path: enabled,
                enabled: true,
            });
        }
        let disabled = self.disabled_path(name);
        if disabled.is_dir() {
            return Ok(Project {
                name: name.to_string(),
                path: disabled,
                enabled: false,
            });
        }
        Err(Error::ProjectNotFound(name.to_string()))
    }

    /// Scaffold a new project and write its `.env`.
    pub fn create(
        &self,
        name: &str,
        settings: &Settings,
        options: &CreateOptions,
    ) -> Result<CreatedProject> {
        validate::project_name(name)?;
        if self.enabled_path(name).exists() || self.disabled_path(name).exists() {
            return Err(Error::ProjectExists(name.to_string()));
        }
        let source = self.resolve_template(&options.template)?;

        let path = self.enabled_path(name);
        let url = domains::project_url(name, settings)?;
        fs::create_dir_all(&path)?;

        if let Err(e) = self.populate(name, &path, settings, options, &source, &url) {
            // Leave no half-created project behind.
            fs::remove_dir_all(&path).ok();
            return Err(e);
        }

        info!("Created {} project '{}' at {:?}", options.template, name, path);
        let document_root = document_root(&path, &source);
        Ok(CreatedProject {
            project: Project {
                name: name.to_string(),
                path,
                enabled: true,
            },
            url,
            source,
            document_root,
        })
    }

    /// A cached remote template wins over a built-in type of the same name.
    fn resolve_template(&self, template: &str) -> Result<TemplateSource> {
        if let Some(dir) = self.templates.and_then(|t| t.cached_template(template)) {
            return Ok(TemplateSource::Remote(dir));
        }
        match template.parse::<ProjectType>() {
            Ok(kind) => Ok(TemplateSource::Builtin(kind)),
            Err(e) => {
                let cached = match self.templates {
                    Some(t) => t.list()?,
                    None => Vec::new(),
                };
                if cached.is_empty() {
                    Err(e)
                } else {
                    Err(Error::Other(format!(
                        "{}. Cached templates: {}",
                        e,
                        cached.join(", ")
                    )))
                }
            }
        }
    }

    fn populate(
        &self,
        name: &str,
        path: &Path,
        settings: &Settings,
        options: &CreateOptions,
        source: &TemplateSource,
        url: &str,
    ) -> Result<()> {
        match source {
            TemplateSource::Remote(dir) => {
                debug!("Copying template from {:?}", dir);
                templates::copy_dir_recursive(dir, path)?;
            }
            TemplateSource::Builtin(kind) => {
                for command in kind.bootstrap_commands(path) {
                    self.runner.run_interactive(&command)?;
                }
                for (relative, body) in kind.scaffold_files(name) {
                    let file = path.join(relative);
                    if let Some(parent) = file.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(file, body)?;
                }
            }
        }

        let env = render_env(name, &options.template.to_lowercase(), settings, url);
        fs::write(path.join(ENV_FILE), env)?;

        if options.install_dependencies {
            self.install_dependencies(path)?;
        }
        Ok(())
    }

    /// Run the package manager matching each manifest present in the project.
    pub fn install_dependencies(&self, path: &Path) -> Result<Vec<String>> {
        let mut ran = Vec::new();
        for command in dependency_commands(path) {
            self.runner.run_interactive(&command)?;
            ran.push(command.program.clone());
        }
        Ok(ran)
    }

    /// All projects, enabled and disabled, sorted by name.
    pub fn list(&self) -> Result<Vec<Project>> {
        let mut projects = Vec::new();
        if !self.projects_dir.exists() {
            return Ok(projects);
        }

        for entry in fs::read_dir(&self.projects_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let (name, enabled) = match file_name.strip_suffix(DISABLED_SUFFIX) {
                Some(base) => (base, false),
                None => (file_name, true),
            };
            if !validate::is_valid_project_name(name) {
                continue;
            }
            projects.push(Project {
                name: name.to_string(),
                path: path.clone(),
                enabled,
            });
        }

        projects.sort_by(|a, b| a.name.cmp(&b.name).then(b.enabled.cmp(&a.enabled)));
        Ok(projects)
    }

    /// Rename to `<name>.disabled`. Already-disabled projects are left as is.
    pub fn disable(&self, name: &str) -> Result<Project> {
        let project = self.find(name)?;
        if !project.enabled {
            debug!("Project '{}' already disabled", name);
            return Ok(project);
        }
        let target = self.disabled_path(name);
        if target.exists() {
            return Err(Error::Other(format!(
                "Cannot disable '{}': {} already exists",
                name,
                target.display()
            )));
        }
        fs::rename(&project.path, &target)?;
        info!("Disabled project '{}'", name);
        Ok(Project {
            path: target,
            enabled: false,
            ..project
        })
    }

    /// Rename back from `<name>.disabled`. Enabled projects are left as is.
    pub fn enable(&self, name: &str) -> Result<Project> {
        let project = self.find(name)?;
        if project.enabled {
            debug!("Project '{}' already enabled", name);
            return Ok(project);
        }
        let target = self.enabled_path(name);
        fs::rename(&project.path, &target)?;
        info!("Enabled project '{}'", name);
        Ok(Project {
            path: target,
            enabled: true,
            ..project
        })
    }

    /// Delete the project directory in whichever state it is.
    pub fn remove(&self, name: &str) -> Result<Project> {
        let project = self.find(name)?;
        fs::remove_dir_all(&project.path)?;
        info!("Removed project '{}'", name);
        Ok(project)
    }

    /// Key/value pairs from the project's `.env`.
    pub fn env(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let project = self.find(name)?;
        let env_path = project.path.join(ENV_FILE);
        if !env_path.exists() {
            return Ok(BTreeMap::new());
        }
        Ok(parse_env(&fs::read_to_string(env_path)?))
    }
}

/// Served directory: the type's document root, or `public/` when a remote
/// template ships one.
fn document_root(path: &Path, source: &TemplateSource) -> PathBuf {
    match source {
        TemplateSource::Builtin(kind) => path.join(kind.document_root()),
        TemplateSource::Remote(_) if path.join("public").is_dir() => path.join("public"),
        TemplateSource::Remote(_) => path.to_path_buf(),
    }
}

/// Generate the `.env` contents for a new project.
pub fn render_env(name: &str, kind: &str, settings: &Settings, url: &str) -> String {
    let database = settings.get_or_default(config::DATABASE).unwrap_or("mysql");
    let (connection, port) = match database {
        "postgresql" => ("pgsql", "5432"),
        _ => ("mysql", "3306"),
    };

    let mut out = String::from("# Generated by yads\n");
    let _ = writeln!(out, "APP_NAME={}", name);
    let _ = writeln!(out, "APP_TYPE={}", kind);
    let _ = writeln!(out, "APP_ENV=local");
    let _ = writeln!(out, "APP_URL={}", url);
    out.push('\n');
    let _ = writeln!(out, "DB_CONNECTION={}", connection);
    let _ = writeln!(
        out,
        "DB_HOST={}",
        settings.get_or_default(config::DB_HOST).unwrap_or("127.0.0.1")
    );
    let _ = writeln!(out, "DB_PORT={}", port);
    let _ = writeln!(out, "DB_DATABASE={}", name.replace('-', "_"));
    let _ = writeln!(
        out,
        "DB_USERNAME={}",
        settings.get_or_default(config::DB_USER).unwrap_or("yads")
    );
    let _ = writeln!(
        out,
        "DB_PASSWORD={}",
        settings.get_or_default(config::DB_PASSWORD).unwrap_or("yads")
    );
    if settings.redis_enabled() {
        out.push('\n');
        let _ = writeln!(out, "REDIS_HOST=127.0.0.1");
        let _ = writeln!(out, "REDIS_PORT=6379");
    }
    out
}

fn parse_env(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().trim_matches('"').to_string()))
        .collect()
}

/// Dependency install commands for the manifests present in `path`.
pub fn dependency_commands(path: &Path) -> Vec<CommandSpec> {
    let mut commands = Vec::new();
    if path.join("composer.json").exists() && !path.join("vendor").exists() {
        commands.push(
            CommandSpec::new("composer")
                .args(["install", "--no-interaction"])
                .current_dir(path),
        );
    }
    if path.join("package.json").exists() {
        commands.push(CommandSpec::new("npm").arg("install").current_dir(path));
    }
    if path.join("requirements.txt").exists() {
        commands.push(
            CommandSpec::new("pip3")
                .args(["install", "-r", "requirements.txt"])
                .current_dir(path),
        );
    }
    commands
}
