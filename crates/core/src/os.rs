//! Host operating system detection.

use crate::exec::CommandSpec;
use crate::{Error, Result};
use std::fs;
use std::path::Path;

const OS_RELEASE: &str = "/etc/os-release";

/// Facts read from `/etc/os-release`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OsInfo {
    pub id: String,
    pub id_like: Vec<String>,
    pub version_id: String,
    pub version_codename: String,
    pub pretty_name: String,
}

/// Package manager family used to install the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
}

impl OsInfo {
    pub fn parse(content: &str) -> Self {
        let mut info = OsInfo::default();
        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
            match key.trim() {
                "ID" => info.id = value.to_lowercase(),
                "ID_LIKE" => {
                    info.id_like = value
                        .split_whitespace()
                        .map(|s| s.to_lowercase())
                        .collect()
                }
                "VERSION_ID" => info.version_id = value,
                "VERSION_CODENAME" => info.version_codename = value,
                "PRETTY_NAME" => info.pretty_name = value,
                _ => {}
            }
        }
        info
    }

    /// Pick the package manager for this distribution.
    pub fn package_manager(&self) -> Result<PackageManager> {
        let families =
            std::iter::once(self.id.as_str()).chain(self.id_like.iter().map(String::as_str));
        for family in families {
            match family {
                "debian" | "ubuntu" | "linuxmint" | "pop" | "raspbian" => {
                    return Ok(PackageManager::Apt)
                }
                "fedora" | "rhel" | "centos" | "rocky" | "almalinux" => {
                    return Ok(PackageManager::Dnf)
                }
                _ => {}
            }
        }
        Err(Error::UnsupportedOs(if self.pretty_name.is_empty() {
            self.id.clone()
        } else {
            self.pretty_name.clone()
        }))
    }

    pub fn display_name(&self) -> &str {
        if self.pretty_name.is_empty() {
            &self.id
        } else {
            &self.pretty_name
        }
    }
}

/// Read OS facts from the default location.
pub fn detect_os() -> Result<OsInfo> {
    detect_os_from(Path::new(OS_RELEASE))
}

pub fn detect_os_from(path: &Path) -> Result<OsInfo> {
    if !path.exists() {
        return Err(Error::UnsupportedOs(format!(
            "{} not found (only Linux hosts are supported)",
            path.display()
        )));
    }
    Ok(OsInfo::parse(&fs::read_to_string(path)?))
}

impl PackageManager {
    /// Command that refreshes package indexes.
    pub fn update(&self) -> CommandSpec {
        match self {
            PackageManager::Apt => CommandSpec::new("apt-get").arg("update").privileged(),
            PackageManager::Dnf => CommandSpec::new("dnf").args(["makecache", "-y"]).privileged(),
        }
    }

    /// Command that installs the given packages non-interactively.
    pub fn install<I, S>(&self, packages: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self {
            PackageManager::Apt => CommandSpec::new("apt-get")
                .args(["install", "-y"])
                .args(packages)
                .env("DEBIAN_FRONTEND", "noninteractive")
                .privileged(),
            PackageManager::Dnf => CommandSpec::new("dnf")
                .args(["install", "-y"])
                .args(packages)
                .privileged(),
        }
    }

    /// Command that removes the given packages.
    pub fn remove<I, S>(&self, packages: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self {
            PackageManager::Apt => CommandSpec::new("apt-get")
                .args(["remove", "-y"])
                .args(packages)
                .env("DEBIAN_FRONTEND", "noninteractive")
                .privileged(),
            PackageManager::Dnf => CommandSpec::new("dnf")
                .args(["remove", "-y"])
                .args(packages)
                .privileged(),
        }
    }
}
