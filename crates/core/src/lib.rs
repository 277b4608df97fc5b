//! YADS Core Library
//!
//! This crate provides the core functionality for managing a local
//! development server: stack installation, projects, domains, containers
//! and databases. Every external tool is driven through [`CommandRunner`].

pub mod compose;
pub mod config;
pub mod database;
pub mod domains;
pub mod error;
pub mod exec;
pub mod install;
pub mod orchestrator;
pub mod os;
pub mod project;
pub mod templates;
pub mod validate;

// Re-exports for convenience
pub use compose::{Compose, ComposeFile};
pub use config::{Config, InstallMode, Settings, WebServer};
pub use database::{DatabaseManager, DbKind, DbTarget};
pub use error::{Error, Result};
pub use exec::{CommandRunner, CommandSpec, DryRunRunner, RecordingRunner, SystemRunner};
pub use orchestrator::{AutoScalePolicy, Orchestrator};
pub use project::{CreateOptions, Project, ProjectManager};
pub use templates::{ProjectType, TemplateFetcher};
