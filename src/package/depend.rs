// src/package/depend.rs

//! Dependency, conflict and provision strings
//!
//! All of them share one syntax: `name[op version][: description]`, e.g.
//! `glibc>=2.34`, `sh`, `python: for scripts`.

use crate::version::vercmp;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Version operator of a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepMod {
    Any,
    Eq,
    Ge,
    Le,
    Gt,
    Lt,
}

impl DepMod {
    pub fn as_str(&self) -> &str {
        match self {
            DepMod::Any => "",
            DepMod::Eq => "=",
            DepMod::Ge => ">=",
            DepMod::Le => "<=",
            DepMod::Gt => ">",
            DepMod::Lt => "<",
        }
    }

    fn accepts(self, ord: Ordering) -> bool {
        match self {
            DepMod::Any => true,
            DepMod::Eq => ord == Ordering::Equal,
            DepMod::Ge => ord != Ordering::Less,
            DepMod::Le => ord != Ordering::Greater,
            DepMod::Gt => ord == Ordering::Greater,
            DepMod::Lt => ord == Ordering::Less,
        }
    }
}

/// A parsed dependency expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Depend {
    pub name: String,
    pub depmod: DepMod,
    pub version: Option<String>,
    pub description: Option<String>,
}

impl Depend {
    /// Parse a string like "glibc>=2.34" or "python: for scripts"
    pub fn parse(s: &str) -> Self {
        let (expr, description) = match s.split_once(": ") {
            Some((e, d)) => (e.trim(), Some(d.trim().to_string())),
            None => (s.trim(), None),
        };

        for (op, depmod) in [
            (">=", DepMod::Ge),
            ("<=", DepMod::Le),
            ("=", DepMod::Eq),
            ("<", DepMod::Lt),
            (">", DepMod::Gt),
        ] {
            if let Some(pos) = expr.find(op) {
                return Self {
                    name: expr[..pos].to_string(),
                    depmod,
                    version: Some(expr[pos + op.len()..].to_string()),
                    description,
                };
            }
        }

        Self {
            name: expr.to_string(),
            depmod: DepMod::Any,
            version: None,
            description,
        }
    }

    /// Check a version against this dependency's constraint
    pub fn version_matches(&self, version: &str) -> bool {
        match &self.version {
            None => true,
            Some(wanted) => self.depmod.accepts(vercmp(version, wanted)),
        }
    }

    /// Whether a package called `name` at `version`, providing `provides`,
    /// satisfies this dependency
    pub fn satisfied_by(
        &self,
        name: &str,
        version: &str,
        provides: &[Depend],
        ignore_version: bool,
    ) -> bool {
        if name == self.name && (ignore_version || self.version_matches(version)) {
            return true;
        }

        provides.iter().any(|provision| {
            if provision.name != self.name {
                return false;
            }
            if ignore_version || self.depmod == DepMod::Any {
                return true;
            }
            // An unversioned provision only satisfies unversioned dependencies
            match (&provision.version, provision.depmod) {
                (Some(v), DepMod::Eq) => self.version_matches(v),
                _ => false,
            }
        })
    }
}

impl fmt::Display for Depend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ref version) = self.version {
            write!(f, "{}{}", self.depmod.as_str(), version)?;
        }
        if let Some(ref description) = self.description {
            write!(f, ": {}", description)?;
        }
        Ok(())
    }
}
