//! Agent identity normalization.
//!
//! Workers and task producers spell the same agent many ways
//! (`agent_build.sh`, `build_agent`, `/opt/agents/Agent_Build.sh`, `build`).
//! [`AgentIdentity::parse`] maps every spelling to one canonical name; two
//! spellings are equivalent iff they normalize to the same canonical name.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Script suffixes stripped when none are configured.
pub const DEFAULT_SUFFIXES: [&str; 4] = [".sh", ".py", ".bash", ".exe"];

/// Alias → canonical name table plus the suffixes to strip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasTable {
    pub suffixes: Vec<String>,
    pub aliases: BTreeMap<String, String>,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self {
            suffixes: DEFAULT_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            aliases: BTreeMap::new(),
        }
    }
}

impl AliasTable {
    pub fn with_alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), canonical.into());
        self
    }

    /// The normalization rule; see the module docs.
    pub fn canonicalize(&self, raw: &str) -> String {
        let name = self.base_name(raw);
        // aliases may themselves be written in any spelling
        self.aliases
            .iter()
            .find(|(alias, _)| self.base_name(alias) == name)
            .map(|(_, canonical)| self.base_name(canonical))
            .unwrap_or(name)
    }

    /// Lowercase, last path component, one script suffix and one
    /// `agent_`/`_agent` affix removed.
    fn base_name(&self, raw: &str) -> String {
        let lowered = raw.trim().to_lowercase();
        let mut name = lowered.rsplit(['/', '\\']).next().unwrap_or_default();

        if let Some(stripped) = self
            .suffixes
            .iter()
            .find_map(|suffix| name.strip_suffix(suffix.to_lowercase().as_str()))
        {
            name = stripped;
        }

        strip_agent_affix(name).to_string()
    }

    /// All spellings declared as aliases of `canonical`.
    pub fn aliases_of(&self, canonical: &str) -> Vec<String> {
        self.aliases
            .iter()
            .filter(|(_, target)| self.canonicalize(target) == canonical)
            .map(|(alias, _)| alias.clone())
            .collect()
    }
}

fn strip_agent_affix(name: &str) -> &str {
    for prefix in ["agent_", "agent-"] {
        if let Some(rest) = name.strip_prefix(prefix)
            && !rest.is_empty()
        {
            return rest;
        }
    }
    for suffix in ["_agent", "-agent"] {
        if let Some(rest) = name.strip_suffix(suffix)
            && !rest.is_empty()
        {
            return rest;
        }
    }
    name
}

/// A worker's identity after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentIdentity {
    raw: String,
    canonical: String,
}

impl AgentIdentity {
    pub fn parse(raw: &str, table: &AliasTable) -> Self {
        Self {
            raw: raw.to_string(),
            canonical: table.canonicalize(raw),
        }
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Does a task addressed to `target` belong to this identity?
    pub fn matches(&self, target: &str, table: &AliasTable) -> bool {
        !self.canonical.is_empty() && table.canonicalize(target) == self.canonical
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}
