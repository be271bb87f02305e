//! Stage permission check
//!
//! Pool selection may trigger a stage from nearline (archival) storage.
//! Whether a requester is allowed to do that is decided here, once per pin
//! attempt, and the decision is passed into the pool-selection request as a
//! constraint.
//!
//! Rules are given as a semicolon-separated list. Each rule is a
//! distinguished-name pattern, optionally followed by whitespace and a
//! storage-class pattern; both are anchored regular expressions:
//!
//! ```text
//! .*\/CN=robot.* data:tape@osm;.*\/OU=physics\/.*
//! ```
//!
//! A requester may stage if any rule matches their DN and, when the rule
//! carries one, the file's storage class. Requesters without a DN are never
//! matched by rules and can only stage when staging is allowed for all.

use regex::Regex;

use crate::models::{FileAttributes, Owner};

/// A single compiled stage-permission rule.
#[derive(Debug, Clone)]
pub struct StageRule {
    dn: Regex,
    storage_class: Option<Regex>,
}

impl StageRule {
    pub fn new(dn_pattern: &str, storage_class_pattern: Option<&str>) -> Result<Self, regex::Error> {
        Ok(Self {
            dn: anchored(dn_pattern)?,
            storage_class: storage_class_pattern.map(anchored).transpose()?,
        })
    }

    fn matches(&self, dn: &str, storage_class: Option<&str>) -> bool {
        if !self.dn.is_match(dn) {
            return false;
        }
        match (&self.storage_class, storage_class) {
            (None, _) => true,
            (Some(re), Some(class)) => re.is_match(class),
            (Some(_), None) => false,
        }
    }
}

fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})$", pattern))
}

/// Compiled stage-permission decision function.
#[derive(Debug, Clone)]
pub struct StagePermission {
    allow_all: bool,
    rules: Vec<StageRule>,
}

impl StagePermission {
    /// Allow staging for every requester.
    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            rules: Vec::new(),
        }
    }

    /// Deny staging for every requester.
    pub fn deny_all() -> Self {
        Self {
            allow_all: false,
            rules: Vec::new(),
        }
    }

    pub fn new(rules: Vec<StageRule>) -> Self {
        Self {
            allow_all: false,
            rules,
        }
    }

    /// Parse the semicolon-separated rule list from configuration.
    pub fn from_rules(rules: &str, allow_all: bool) -> Result<Self, anyhow::Error> {
        if allow_all {
            return Ok(Self::allow_all());
        }
        let mut compiled = Vec::new();
        for line in rules.split(';').map(str::trim).filter(|l| !l.is_empty()) {
            let mut parts = line.split_whitespace();
            let dn = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("Empty stage rule"))?;
            let storage_class = parts.next();
            if parts.next().is_some() {
                anyhow::bail!("Stage rule has more than two fields: {}", line);
            }
            compiled.push(
                StageRule::new(dn, storage_class)
                    .map_err(|e| anyhow::anyhow!("Invalid stage rule '{}': {}", line, e))?,
            );
        }
        Ok(Self::new(compiled))
    }

    /// Decide whether `owner` may stage the file described by `attributes`.
    pub fn can_stage(&self, owner: &Owner, attributes: &FileAttributes) -> bool {
        if self.allow_all {
            return true;
        }
        let Some(dn) = owner.dn.as_deref() else {
            return false;
        };
        let storage_class = attributes.storage_class.as_deref();
        self.rules.iter().any(|r| r.matches(dn, storage_class))
    }
}
