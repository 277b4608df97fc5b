//! Name and domain validation.

use crate::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

static PROJECT_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]$").unwrap());

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9-]{1,61}[a-zA-Z0-9]\.[a-zA-Z]{2,}$").unwrap()
});

static DATABASE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*[a-zA-Z0-9]$").unwrap());

/// Returns true if `name` is usable as a project directory and subdomain label.
pub fn is_valid_project_name(name: &str) -> bool {
    PROJECT_NAME_RE.is_match(name)
}

/// Returns true if `domain` is a second-level domain such as `example.com`.
pub fn is_valid_domain(domain: &str) -> bool {
    DOMAIN_RE.is_match(domain)
}

pub fn is_valid_database_name(name: &str) -> bool {
    DATABASE_NAME_RE.is_match(name)
}

pub fn project_name(name: &str) -> Result<()> {
    if is_valid_project_name(name) {
        Ok(())
    } else {
        Err(Error::InvalidProjectName(name.to_string()))
    }
}

pub fn domain(domain: &str) -> Result<()> {
    if is_valid_domain(domain) {
        Ok(())
    } else {
        Err(Error::InvalidDomain(domain.to_string()))
    }
}

pub fn database_name(name: &str) -> Result<()> {
    if is_valid_database_name(name) {
        Ok(())
    } else {
        Err(Error::InvalidDatabaseName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_project_names() {
        for name in ["blog", "my-app", "App2", "a1", "shop-v2-api"] {
            assert!(is_valid_project_name(name), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_bad_project_names() {
        for name in ["", "a", "-app", "app-", "my_app", "my app", "app.local", "../etc"] {
            assert!(!is_valid_project_name(name), "{name:?} should be invalid");
        }
    }

    #[test]
    fn accepts_typical_domains() {
        for domain in ["example.com", "my-site.dev", "abc.io", "dev-box01.local"] {
            assert!(is_valid_domain(domain), "{domain} should be valid");
        }
    }

    #[test]
    fn rejects_bad_domains() {
        for domain in [
            "",
            "localhost",
            "ab.com",
            "-example.com",
            "example-.com",
            "example.c",
            "sub.example.com",
            "exa_mple.com",
        ] {
            assert!(!is_valid_domain(domain), "{domain:?} should be invalid");
        }
    }

    #[test]
    fn database_names_allow_underscores() {
        assert!(is_valid_database_name("my_app_db"));
        assert!(!is_valid_database_name("_db"));
        assert!(!is_valid_database_name("db;drop"));
    }

    #[test]
    fn validation_errors_carry_the_input() {
        let err = project_name("bad_name").unwrap_err();
        assert!(err.to_string().contains("bad_name"));
        let err = domain("nope").unwrap_err();
        assert!(matches!(err, Error::InvalidDomain(d) if d == "nope"));
    }
}
