//! Project templates: built-in scaffolds and a remote git template repository.

use crate::exec::CommandSpec;
use crate::{Error, Result};
use git2::{FetchOptions, Progress, RemoteCallbacks, Repository};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

const WORDPRESS_TARBALL: &str = "https://wordpress.org/latest.tar.gz";

/// Kind of project to scaffold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectType {
    #[default]
    Php,
    Laravel,
    Wordpress,
    Node,
    Python,
    Static,
}

impl ProjectType {
    pub const ALL: [ProjectType; 6] = [
        ProjectType::Php,
        ProjectType::Laravel,
        ProjectType::Wordpress,
        ProjectType::Node,
        ProjectType::Python,
        ProjectType::Static,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Php => "php",
            ProjectType::Laravel => "laravel",
            ProjectType::Wordpress => "wordpress",
            ProjectType::Node => "node",
            ProjectType::Python => "python",
            ProjectType::Static => "static",
        }
    }

    /// Directory, relative to the project root, that the web server serves.
    pub fn document_root(&self) -> &'static str {
        match self {
            ProjectType::Php | ProjectType::Laravel => "public",
            _ => "",
        }
    }

    /// Files written for the built-in scaffold.
    pub fn scaffold_files(&self, name: &str) -> Vec<(&'static str, String)> {
        match self {
            ProjectType::Php => vec![
                (
                    "public/index.php",
                    format!(
                        "<?php\n\n$app = getenv('APP_NAME') ?: '{name}';\necho \"<h1>{{$app}}</h1>\";\necho '<p>PHP ' . PHP_VERSION . '</p>';\n"
                    ),
                ),
                (
                    "composer.json",
                    format!(
                        "{{\n    \"name\": \"yads/{name}\",\n    \"type\": \"project\",\n    \"require\": {{}}\n}}\n"
                    ),
                ),
            ],
            ProjectType::Node => vec![
                (
                    "package.json",
                    format!(
                        "{{\n  \"name\": \"{name}\",\n  \"version\": \"0.1.0\",\n  \"private\": true,\n  \"main\": \"index.js\",\n  \"scripts\": {{\n    \"start\": \"node index.js\"\n  }}\n}}\n"
                    ),
                ),
                (
                    "index.js",
                    format!(
                        "const http = require('http');\n\nconst port = process.env.PORT || 3000;\n\nhttp\n  .createServer((req, res) => {{\n    res.writeHead(200, {{ 'Content-Type': 'text/plain' }});\n    res.end('{name}\\n');\n  }})\n  .listen(port, () => console.log(`listening on ${{port}}`));\n"
                    ),
                ),
            ],
            ProjectType::Python => vec![
                ("requirements.txt", "flask\n".to_string()),
                (
                    "app.py",
                    format!(
                        "import os\n\nfrom flask import Flask\n\napp = Flask(__name__)\n\n\n@app.route(\"/\")\ndef index():\n    return os.environ.get(\"APP_NAME\", \"{name}\")\n\n\nif __name__ == \"__main__\":\n    app.run(port=int(os.environ.get(\"PORT\", 5000)))\n"
                    ),
                ),
            ],
            ProjectType::Static => vec![(
                "index.html",
                format!(
                    "<!doctype html>\n<html>\n  <head><title>{name}</title></head>\n  <body><h1>{name}</h1></body>\n</html>\n"
                ),
            )],
            ProjectType::Laravel | ProjectType::Wordpress => Vec::new(),
        }
    }

    /// Commands that generate the scaffold in place of static files.
    pub fn bootstrap_commands(&self, dir: &Path) -> Vec<CommandSpec> {
        match self {
            ProjectType::Laravel => vec![CommandSpec::new("composer")
                .args(["create-project", "--prefer-dist", "laravel/laravel", "."])
                .current_dir(dir)],
            ProjectType::Wordpress => vec![
                CommandSpec::new("curl")
                    .args(["-fsSL", WORDPRESS_TARBALL, "-o", "wordpress.tar.gz"])
                    .current_dir(dir),
                CommandSpec::new("tar")
                    .args(["xzf", "wordpress.tar.gz", "--strip-components=1"])
                    .current_dir(dir),
                CommandSpec::new("rm")
                    .args(["-f", "wordpress.tar.gz"])
                    .current_dir(dir),
            ],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ProjectType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                Error::Other(format!(
                    "Unknown project type '{}'. Available types: {}",
                    s,
                    ProjectType::ALL.map(|t| t.as_str()).join(", ")
                ))
            })
    }
}

/// Fetches project templates from a git repository.
///
/// The repository holds one top-level directory per template name.
pub struct TemplateFetcher {
    repo_url: String,
    cache_dir: PathBuf,
    branch: Option<String>,
}

impl TemplateFetcher {
    pub fn new(repo_url: String, cache_dir: PathBuf, branch: Option<String>) -> Self {
        Self {
            repo_url,
            cache_dir,
            branch,
        }
    }

    /// Whether a clone of the template repository exists locally.
    pub fn is_cached(&self) -> bool {
        self.cache_dir.join(".git").exists()
    }

    /// Directory of a cached template, if present.
    pub fn cached_template(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return None;
        }
        let dir = self.cache_dir.join(name);
        (self.is_cached() && dir.is_dir()).then_some(dir)
    }

    /// Template names available in the local clone.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if !self.is_cached() {
            return Ok(names);
        }
        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|s| s.starts_with('.'))
                .unwrap_or(true);
            if !hidden && path.is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Clone the repository, or bring an existing clone up to date.
    pub fn update(&self) -> Result<()> {
        if self.is_cached() {
            debug!("Updating template repository at {:?}", self.cache_dir);
            self.pull_repo()
        } else {
            if self.cache_dir.exists() {
                fs::remove_dir_all(&self.cache_dir)?;
            }
            if let Some(parent) = self.cache_dir.parent() {
                fs::create_dir_all(parent)?;
            }
            debug!("Cloning template repository to {:?}", self.cache_dir);
            self.clone_repo()
        }
    }

    fn is_local(&self) -> bool {
        self.repo_url.starts_with('/') || self.repo_url.starts_with("file://")
    }

    fn clone_repo(&self) -> Result<()> {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.transfer_progress(|progress| {
            print_progress(&progress);
            true
        });

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);
        // The local transport can't serve shallow fetches.
        if !self.is_local() {
            fetch_options.depth(1);
        }

        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(fetch_options);
        if let Some(branch) = &self.branch {
            builder.branch(branch);
        }

        builder.clone(&self.repo_url, &self.cache_dir).map_err(|e| {
            Error::Other(format!(
                "Failed to clone templates from {}: {}",
                self.repo_url, e
            ))
        })?;

        info!("Templates cloned from {}", self.repo_url);
        Ok(())
    }

    fn pull_repo(&self) -> Result<()> {
        let repo = Repository::open(&self.cache_dir)
            .map_err(|e| Error::Other(format!("Failed to open template cache: {}", e)))?;
        let mut remote = repo.find_remote("origin")?;

        let mut callbacks = RemoteCallbacks::new();
        callbacks.transfer_progress(|progress| {
            print_progress(&progress);
            true
        });
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(callbacks);

        let refspec = self.branch.as_deref().unwrap_or("HEAD");
        remote
            .fetch(&[refspec], Some(&mut fetch_options), None)
            .map_err(|e| Error::Other(format!("Failed to fetch templates: {}", e)))?;

        let fetch_head = repo.find_reference("FETCH_HEAD")?;
        let fetch_commit = repo.reference_to_annotated_commit(&fetch_head)?;
        let (analysis, _) = repo.merge_analysis(&[&fetch_commit])?;

        if analysis.is_up_to_date() {
            debug!("Templates already up to date");
        } else {
            let commit = repo.find_commit(fetch_commit.id())?;
            repo.reset(commit.as_object(), git2::ResetType::Hard, None)?;
            debug!("Templates reset to {}", fetch_commit.id());
        }
        Ok(())
    }
}

fn print_progress(progress: &Progress) {
    let received = progress.received_objects();
    let total = progress.total_objects();
    if total > 0 {
        debug!(
            "Receiving objects: {}% ({}/{})",
            (received * 100) / total,
            received,
            total
        );
    }
}

/// Recursively copy a directory, skipping `.git`.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.file_name().map(|n| n == ".git").unwrap_or(false) {
            continue;
        }

        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use tempfile::TempDir;

    fn init_template_repo(dir: &Path) {
        let repo = Repository::init(dir).unwrap();
        fs::create_dir_all(dir.join("symfony").join("public")).unwrap();
        fs::write(dir.join("symfony/public/index.php"), "<?php echo 'sf';\n").unwrap();
        fs::create_dir_all(dir.join("vue")).unwrap();
        fs::write(dir.join("vue/package.json"), "{}\n").unwrap();

        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("yads", "yads@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "templates", &tree, &[])
            .unwrap();
    }

    #[test]
    fn parses_project_types() {
        assert_eq!("laravel".parse::<ProjectType>().unwrap(), ProjectType::Laravel);
        assert_eq!("Node".parse::<ProjectType>().unwrap(), ProjectType::Node);
        let err = "rails".parse::<ProjectType>().unwrap_err();
        assert!(err.to_string().contains("php, laravel, wordpress, node, python, static"));
    }

    #[test]
    fn scaffolds_mention_project_name() {
        for t in [ProjectType::Php, ProjectType::Node, ProjectType::Python, ProjectType::Static] {
            let files = t.scaffold_files("acme");
            assert!(!files.is_empty());
            assert!(files.iter().any(|(_, body)| body.contains("acme")), "{t}");
        }
        assert!(ProjectType::Laravel.scaffold_files("acme").is_empty());
        assert_eq!(ProjectType::Wordpress.bootstrap_commands(Path::new("/p")).len(), 3);
    }

    #[test]
    fn copy_skips_git_directory() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join(".git")).unwrap();
        fs::write(src.path().join(".git/HEAD"), "ref").unwrap();
        fs::create_dir_all(src.path().join("a/b")).unwrap();
        fs::write(src.path().join("a/b/c.txt"), "c").unwrap();

        copy_dir_recursive(src.path(), &dst.path().join("out")).unwrap();
        assert!(dst.path().join("out/a/b/c.txt").exists());
        assert!(!dst.path().join("out/.git").exists());
    }

    #[test]
    fn clones_and_lists_templates() {
        let origin = TempDir::new().unwrap();
        init_template_repo(origin.path());
        let cache = TempDir::new().unwrap();
        let cache_dir = cache.path().join("templates");

        let fetcher = TemplateFetcher::new(
            origin.path().display().to_string(),
            cache_dir.clone(),
            None,
        );
        assert!(!fetcher.is_cached());
        assert!(fetcher.list().unwrap().is_empty());

        fetcher.update().unwrap();
        assert!(fetcher.is_cached());
        assert_eq!(fetcher.list().unwrap(), vec!["symfony", "vue"]);
        assert_eq!(fetcher.cached_template("vue"), Some(cache_dir.join("vue")));
        assert_eq!(fetcher.cached_template("rails"), None);
        assert_eq!(fetcher.cached_template("../templates"), None);
        assert_eq!(fetcher.cached_template(".git"), None);

        // A second update pulls into the existing clone.
        fetcher.update().unwrap();
        assert!(cache_dir.join("symfony/public/index.php").exists());
    }
}
