//! Module identity
//!
//! A module is named `registry/owner/name`. A reference to a module at a
//! revision appends an optional `:ref` (branch, tag, or commit label).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{ModuleError, Result};

/// Fully-qualified module name: `registry/owner/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleFullName {
    registry: String,
    owner: String,
    name: String,
}

impl ModuleFullName {
    /// Create a full name from its components, validating each one
    pub fn new(registry: &str, owner: &str, name: &str) -> Result<Self> {
        let joined = format!("{}/{}/{}", registry, owner, name);
        let invalid = || ModuleError::InvalidModuleFullName(joined.clone());
        let registry = non_blank(registry).ok_or_else(invalid)?;
        let owner = non_blank(owner).ok_or_else(invalid)?;
        let name = non_blank(name).ok_or_else(invalid)?;
        Ok(Self {
            registry: registry.to_string(),
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Parse `registry/owner/name`
    pub fn parse(s: &str) -> Result<Self> {
        let segments: Vec<&str> = s.split('/').collect();
        if segments.len() != 3 {
            return Err(ModuleError::InvalidModuleFullName(s.to_string()));
        }
        Self::new(segments[0], segments[1], segments[2])
            .map_err(|_| ModuleError::InvalidModuleFullName(s.to_string()))
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ModuleFullName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.registry, self.owner, self.name)
    }
}

impl FromStr for ModuleFullName {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ModuleFullName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ModuleFullName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A module at an optional revision: `registry/owner/name[:ref]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleRef {
    full_name: ModuleFullName,
    reference: Option<String>,
}

impl ModuleRef {
    /// Create a reference; an empty or blank `reference` means none
    pub fn new(full_name: ModuleFullName, reference: Option<&str>) -> Self {
        Self {
            full_name,
            reference: reference.and_then(non_blank).map(String::from),
        }
    }

    /// Parse `registry/owner/name[:ref]`
    ///
    /// The registry is split off at the first `/`, then the remainder may
    /// carry at most one `:`. An empty ref after the colon is invalid.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || ModuleError::InvalidModuleRef(s.to_string());

        let (registry, rest) = s.split_once('/').ok_or_else(invalid)?;
        let colon_split: Vec<&str> = rest.split(':').collect();
        let reference = match colon_split.len() {
            1 => None,
            2 => Some(non_blank(colon_split[1]).ok_or_else(invalid)?.to_string()),
            _ => return Err(invalid()),
        };
        let full_name = ModuleFullName::parse(&format!("{}/{}", registry, colon_split[0]))
            .map_err(|_| invalid())?;

        Ok(Self { full_name, reference })
    }

    pub fn full_name(&self) -> &ModuleFullName {
        &self.full_name
    }

    /// The revision label, if any
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference {
            Some(reference) => write!(f, "{}:{}", self.full_name, reference),
            None => write!(f, "{}", self.full_name),
        }
    }
}

impl FromStr for ModuleRef {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn non_blank(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
