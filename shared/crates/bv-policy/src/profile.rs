//! Role profile JSON shape and on-disk discovery (spec §4.2 "Role profile").

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use bv_common::error::BvError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FieldVisibility {
    #[serde(default)]
    pub visible_fields: Vec<String>,
    #[serde(default)]
    pub rationale_visible: bool,
}

fn default_max_edges() -> usize {
    50
}

fn default_max_events() -> usize {
    20
}

fn default_max_cited_ids() -> usize {
    12
}

fn default_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleProfile {
    pub role: String,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub domain_scopes: Vec<String>,
    #[serde(default)]
    pub edge_allowlist: Vec<String>,
    pub sensitivity_ceiling: String,
    #[serde(default)]
    pub alias_max_hops: Option<u32>,
    #[serde(default)]
    pub extra_visible: Vec<String>,
    /// Keyed by node type (`DECISION` | `EVENT`).
    #[serde(default)]
    pub field_visibility: BTreeMap<String, FieldVisibility>,

    /// Gateway budget-gate inputs (spec §4.10 "per-policy budgets"); not
    /// enumerated among spec §6's global env surface, so these live on the
    /// role profile itself with conservative defaults when a profile omits
    /// them.
    #[serde(default = "default_max_edges")]
    pub max_edges: usize,
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_max_cited_ids")]
    pub max_cited_ids: usize,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

/// Discovers `role-<slug>.json` files under `$POLICY_DIR` (or a supplied
/// default directory), matching the original's on-disk registry convention.
pub struct PolicyRegistry {
    dir: PathBuf,
}

fn slugify(role: &str) -> String {
    role.to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

impl PolicyRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        PolicyRegistry { dir: dir.into() }
    }

    pub fn path_for_role(&self, role: &str) -> PathBuf {
        self.dir.join(format!("role-{}.json", slugify(role)))
    }

    pub fn load(&self, role: &str) -> Result<RoleProfile, BvError> {
        let path = self.path_for_role(role);
        self.load_path(&path, role)
    }

    fn load_path(&self, path: &Path, role: &str) -> Result<RoleProfile, BvError> {
        let raw = std::fs::read_to_string(path).map_err(|_| {
            BvError::Policy(format!("unknown_role: no profile for role '{role}'"))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| BvError::Policy(format!("malformed role profile '{role}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_profile(dir: &Path, role: &str, body: &str) {
        std::fs::write(dir.join(format!("role-{role}.json")), body).unwrap();
    }

    #[test]
    fn loads_profile_by_slugified_role_name() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(
            dir.path(),
            "engineer",
            r#"{"role":"engineer","namespaces":["eng"],"domain_scopes":["eng/*"],
               "edge_allowlist":["LED_TO","CAUSAL"],"sensitivity_ceiling":"high",
               "extra_visible":[],"field_visibility":{}}"#,
        );
        let reg = PolicyRegistry::new(dir.path());
        let profile = reg.load("engineer").unwrap();
        assert_eq!(profile.role, "engineer");
        assert_eq!(profile.sensitivity_ceiling, "high");
    }

    #[test]
    fn unknown_role_is_policy_error() {
        let dir = tempfile::tempdir().unwrap();
        let reg = PolicyRegistry::new(dir.path());
        let err = reg.load("ghost").unwrap_err();
        assert_eq!(err.code(), "policy_error");
    }
}
