use std::{collections::HashSet, path::Path};

use async_trait::async_trait;
use serde::Deserialize;

use super::{Policy, PolicyDetail, PolicyError, PolicyParameter};

/// Name that selects every stored policy.
pub const ALL_POLICIES: &str = "ALL";

/// Source of policy definitions.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Load policies by name, in the order requested. An empty list or a
    /// list containing `ALL` selects every policy.
    async fn load_policies(&self, names: &[String]) -> Result<Vec<Policy>, PolicyError>;

    /// Details of a policy ordered by priority.
    async fn details(&self, policy: &str) -> Result<Vec<PolicyDetail>, PolicyError>;

    async fn parameters(&self, policy: &str) -> Result<Vec<PolicyParameter>, PolicyError>;
}

/// Policy store backed by TOML `[[policies]]` tables.
#[derive(Debug, Clone, Default)]
pub struct TomlPolicyStore {
    policies: Vec<Policy>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    #[serde(default)]
    policies: Vec<Policy>,
}

impl TomlPolicyStore {
    pub fn new(policies: Vec<Policy>) -> Result<Self, PolicyError> {
        let mut seen = HashSet::new();
        for policy in &policies {
            policy.validate()?;
            if !seen.insert(policy.name.to_ascii_lowercase()) {
                return Err(PolicyError::Invalid(format!(
                    "duplicate policy name '{}'",
                    policy.name
                )));
            }
        }
        Ok(Self { policies })
    }

    /// Parse a standalone policy file.
    pub fn from_str(contents: &str) -> Result<Self, PolicyError> {
        let file: PolicyFile = toml::from_str(contents)?;
        Self::new(file.policies)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| PolicyError::Io(e, path.as_ref().to_path_buf()))?;
        Self::from_str(&contents)
    }

    /// Policies declared inline in the config plus those in `policies_file`.
    pub fn from_config(config: &crate::config::ArchivistConfig) -> Result<Self, PolicyError> {
        let mut policies = config.policies.clone();
        if let Some(path) = &config.policies_file {
            policies.extend(Self::from_file(path)?.policies);
        }
        Self::new(policies)
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    fn find(&self, name: &str) -> Result<&Policy, PolicyError> {
        self.policies
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| PolicyError::NotFound(name.to_string()))
    }
}

#[async_trait]
impl PolicyStore for TomlPolicyStore {
    async fn load_policies(&self, names: &[String]) -> Result<Vec<Policy>, PolicyError> {
        if names.is_empty() || names.iter().any(|n| n.eq_ignore_ascii_case(ALL_POLICIES)) {
            return Ok(self.policies.clone());
        }
        names
            .iter()
            .map(|name| self.find(name).cloned())
            .collect()
    }

    async fn details(&self, policy: &str) -> Result<Vec<PolicyDetail>, PolicyError> {
        Ok(self.find(policy)?.ordered_details())
    }

    async fn parameters(&self, policy: &str) -> Result<Vec<PolicyParameter>, PolicyError> {
        Ok(self.find(policy)?.params.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICIES: &str = r#"
        [[policies]]
        name = "payroll"
        kind = "archive"
        strategy = "ALL_OR_NOTHING"

        [[policies.details]]
        table = "pay_detail"
        filter = "pay_id IN (SELECT pay_id FROM pay WHERE #WHERE.pay#)"
        priority = 2

        [[policies.details]]
        table = "pay"
        filter = "pay_date < #AGING_DATE#"
        priority = 1

        [[policies.params]]
        name = "region"
        value = "north"

        [[policies]]
        name = "skills"
        kind = "purge"
        enabled = false
        strategy = "EVERY_POLICY_DETAIL"

        [[policies.details]]
        table = "skill"
        filter = "expired = 1"
    "#;

    #[tokio::test]
    async fn test_load_all_policies() {
        let store = TomlPolicyStore::from_str(POLICIES).unwrap();
        let all = store.load_policies(&[]).await.unwrap();
        assert_eq!(all.len(), 2);
        let all = store.load_policies(&["all".to_string()]).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_load_by_name_preserves_request_order() {
        let store = TomlPolicyStore::from_str(POLICIES).unwrap();
        let loaded = store
            .load_policies(&["skills".to_string(), "PAYROLL".to_string()])
            .await
            .unwrap();
        let names: Vec<_> = loaded.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["skills", "payroll"]);
    }

    #[tokio::test]
    async fn test_unknown_policy_is_not_found() {
        let store = TomlPolicyStore::from_str(POLICIES).unwrap();
        let err = store
            .load_policies(&["missing".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::NotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_details_ordered_by_priority() {
        let store = TomlPolicyStore::from_str(POLICIES).unwrap();
        let details = store.details("payroll").await.unwrap();
        assert_eq!(details[0].table, "pay");
        assert_eq!(details[1].table, "pay_detail");
        let params = store.parameters("payroll").await.unwrap();
        assert_eq!(params[0].value, "north");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let doubled = format!("{POLICIES}\n{}", POLICIES.replace("skills", "other"));
        assert!(TomlPolicyStore::from_str(&doubled).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.toml");
        std::fs::write(&path, POLICIES).unwrap();
        let store = TomlPolicyStore::from_file(&path).unwrap();
        assert_eq!(store.policies().len(), 2);
    }
}
