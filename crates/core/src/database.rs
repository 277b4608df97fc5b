//! Database helpers for MySQL and PostgreSQL.
//!
//! On a native install the local server is administered over its socket
//! (`sudo mysql`, `sudo -u postgres psql`). In docker mode the same clients run
//! inside the `db` service through `docker compose exec`.

use crate::compose::{Compose, DB_SERVICE};
use crate::config::{self, Settings};
use crate::exec::{CommandRunner, CommandSpec};
use crate::validate;
use crate::{Error, Result};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

const MYSQL_SYSTEM_DBS: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];
const POSTGRES_SYSTEM_DBS: &[&str] = &["postgres"];

/// Database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Mysql,
    Postgresql,
}

impl DbKind {
    /// Engine configured in settings (`DATABASE`).
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings
            .get_or_default(config::DATABASE)
            .unwrap_or("mysql")
            .parse()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DbKind::Mysql => "mysql",
            DbKind::Postgresql => "postgresql",
        }
    }
}

impl fmt::Display for DbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DbKind::Mysql),
            "postgresql" | "postgres" | "pgsql" | "pg" => Ok(DbKind::Postgresql),
            other => Err(Error::Other(format!(
                "Unknown database type '{}'. Use 'mysql' or 'postgresql'",
                other
            ))),
        }
    }
}

/// Where the database server runs.
pub enum DbTarget<'a> {
    Host,
    Container(&'a Compose<'a>),
}

/// Runs administrative commands against the configured database server.
pub struct DatabaseManager<'a> {
    runner: &'a dyn CommandRunner,
    target: DbTarget<'a>,
    user: String,
    password: String,
}

impl<'a> DatabaseManager<'a> {
    pub fn new(runner: &'a dyn CommandRunner, target: DbTarget<'a>, settings: &Settings) -> Self {
        Self {
            runner,
            target,
            user: settings
                .get_or_default(config::DB_USER)
                .unwrap_or("yads")
                .to_string(),
            password: settings
                .get_or_default(config::DB_PASSWORD)
                .unwrap_or("yads")
                .to_string(),
        }
    }

    /// Build the invocation of a client tool (`mysql`, `pg_dump`, ...).
    fn client(&self, kind: DbKind, tool: &str, args: &[&str]) -> CommandSpec {
        match &self.target {
            DbTarget::Host => match kind {
                DbKind::Mysql => CommandSpec::new(tool).args(args.iter().copied()).privileged(),
                DbKind::Postgresql => CommandSpec::new("sudo")
                    .args(["-u", "postgres", tool])
                    .args(args.iter().copied()),
            },
            DbTarget::Container(compose) => {
                let (env, auth): (String, Vec<String>) = match kind {
                    // The container's root password is DB_PASSWORD.
                    DbKind::Mysql => (
                        format!("MYSQL_PWD={}", self.password),
                        vec!["-uroot".to_string()],
                    ),
                    DbKind::Postgresql => (
                        format!("PGPASSWORD={}", self.password),
                        vec!["-U".to_string(), self.user.clone()],
                    ),
                };
                compose
                    .command(["exec", "-T", "-e"])
                    .arg(env)
                    .arg(DB_SERVICE)
                    .arg(tool)
                    .args(auth)
                    .args(args.iter().copied())
            }
        }
    }

    fn sql(&self, kind: DbKind, statement: &str) -> CommandSpec {
        match kind {
            DbKind::Mysql => self.client(kind, "mysql", &["-N", "-B", "-e", statement]),
            DbKind::Postgresql => {
                self.client(kind, "psql", &["-At", "-d", "postgres", "-c", statement])
            }
        }
    }

    pub fn create(&self, name: &str, kind: DbKind) -> Result<()> {
        validate::database_name(name)?;
        let statement = match kind {
            DbKind::Mysql => format!(
                "CREATE DATABASE IF NOT EXISTS `{}` CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
                name
            ),
            DbKind::Postgresql => format!("CREATE DATABASE \"{}\"", name),
        };
        self.runner.run(&self.sql(kind, &statement))?;
        if kind == DbKind::Mysql && matches!(self.target, DbTarget::Container(_)) {
            let grant = format!("GRANT ALL PRIVILEGES ON `{}`.* TO '{}'@'%'", name, self.user);
            self.runner.run(&self.sql(kind, &grant))?;
        }
        info!("Created {} database '{}'", kind, name);
        Ok(())
    }

    pub fn drop(&self, name: &str, kind: DbKind) -> Result<()> {
        validate::database_name(name)?;
        let statement = match kind {
            DbKind::Mysql => format!("DROP DATABASE IF EXISTS `{}`", name),
            DbKind::Postgresql => format!("DROP DATABASE IF EXISTS \"{}\"", name),
        };
        self.runner.run(&self.sql(kind, &statement))?;
        info!("Dropped {} database '{}'", kind, name);
        Ok(())
    }

    /// User databases, excluding the server's system databases.
    pub fn list(&self, kind: DbKind) -> Result<Vec<String>> {
        let (statement, system) = match kind {
            DbKind::Mysql => ("SHOW DATABASES", MYSQL_SYSTEM_DBS),
            DbKind::Postgresql => (
                "SELECT datname FROM pg_database WHERE datistemplate = false ORDER BY datname",
                POSTGRES_SYSTEM_DBS,
            ),
        };
        let out = self.runner.run(&self.sql(kind, statement))?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !system.contains(&l))
            .map(str::to_string)
            .collect())
    }

    /// Dump a database into `file`.
    pub fn backup(&self, name: &str, file: &Path, kind: DbKind) -> Result<()> {
        validate::database_name(name)?;
        if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let spec = match kind {
            DbKind::Mysql => self.client(
                kind,
                "mysqldump",
                &["--single-transaction", "--routines", "--triggers", name],
            ),
            DbKind::Postgresql => self.client(kind, "pg_dump", &["--no-owner", name]),
        };
        let result = self.runner.run(&spec.stdout_file(file));
        if result.is_err() {
            // No partial dump file on failure.
            std::fs::remove_file(file).ok();
        }
        result?;
        info!("Backed up {} database '{}' to {:?}", kind, name, file);
        Ok(())
    }

    /// Load a dump from `file` into an existing database.
    pub fn restore(&self, name: &str, file: &Path, kind: DbKind) -> Result<()> {
        validate::database_name(name)?;
        if !file.is_file() {
            return Err(Error::Other(format!(
                "Backup file not found: {}",
                file.display()
            )));
        }
        let spec = match kind {
            DbKind::Mysql => self.client(kind, "mysql", &[name]),
            DbKind::Postgresql => {
                self.client(kind, "psql", &["-v", "ON_ERROR_STOP=1", "-q", "-d", name])
            }
        };
        self.runner.run(&spec.stdin_file(file))?;
        info!("Restored {} database '{}' from {:?}", kind, name, file);
        Ok(())
    }
}
