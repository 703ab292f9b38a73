//! Rule file loader -- reads YAML rule files from disk.
//!
//! Scans a directory for `.yml`/`.yaml` files in name order. A file that fails to
//! load is logged and skipped; exceeding the rule count limit fails the whole load.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::CorrelationError;

use super::types::CorrelationRule;

/// Size and count limits applied while loading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLimits {
    pub max_rules: usize,
    pub max_file_bytes: u64,
}

impl Default for LoadLimits {
    fn default() -> Self {
        Self {
            max_rules: 1_000,
            max_file_bytes: 1024 * 1024,
        }
    }
}

/// Rule file loader
pub struct RuleLoader;

impl RuleLoader {
    /// Loads every YAML rule file in `dir`.
    ///
    /// # Errors
    /// - the directory cannot be read
    /// - more than `limits.max_rules` rules load
    pub async fn load_directory(
        dir: impl AsRef<Path>,
        limits: LoadLimits,
    ) -> Result<Vec<CorrelationRule>, CorrelationError> {
        let dir = dir.as_ref();

        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
            CorrelationError::load(dir.display(), format!("failed to read directory: {e}"))
        })?;

        let mut paths: Vec<PathBuf> = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            CorrelationError::load(dir.display(), format!("failed to read directory entry: {e}"))
        })? {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml");
            if is_yaml {
                paths.push(path);
            }
        }
        paths.sort();

        let mut rules = Vec::new();
        let mut seen_ids = HashSet::new();
        for path in paths {
            match Self::load_file(&path, limits.max_file_bytes).await {
                Ok(rule) => {
                    if !seen_ids.insert(rule.id.clone()) {
                        tracing::warn!(
                            rule_id = %rule.id,
                            path = %path.display(),
                            "duplicate rule id, skipping"
                        );
                        continue;
                    }
                    rules.push(rule);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load rule file, skipping"
                    );
                }
            }

            if rules.len() > limits.max_rules {
                return Err(CorrelationError::load(
                    dir.display(),
                    format!("too many rules: max {}", limits.max_rules),
                ));
            }
        }

        tracing::info!(
            dir = %dir.display(),
            count = rules.len(),
            "loaded correlation rules"
        );
        Ok(rules)
    }

    /// Loads a single rule file, refusing files larger than `max_bytes`.
    pub async fn load_file(
        path: impl AsRef<Path>,
        max_bytes: u64,
    ) -> Result<CorrelationRule, CorrelationError> {
        let path = path.as_ref();

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            CorrelationError::load(path.display(), format!("failed to read file metadata: {e}"))
        })?;
        if metadata.len() > max_bytes {
            return Err(CorrelationError::load(
                path.display(),
                format!(
                    "file too large: {} bytes (max: {max_bytes})",
                    metadata.len()
                ),
            ));
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            CorrelationError::load(path.display(), format!("failed to read file: {e}"))
        })?;

        Self::parse_yaml(&content, &path.display().to_string())
    }

    /// Parses and validates one rule.
    pub fn parse_yaml(yaml: &str, source: &str) -> Result<CorrelationRule, CorrelationError> {
        let rule: CorrelationRule = serde_yaml::from_str(yaml)
            .map_err(|e| CorrelationError::load(source, format!("YAML parse error: {e}")))?;
        rule.validate()?;
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironstream_core::types::Severity;

    const BRUTE: &str = r#"
id: ssh_brute_force
name: SSH brute force
severity: high
event_types: [auth_failure]
temporal:
  window_secs: 300
  threshold: 5
cooldown_secs: 60
dedup_key: "{user_id}"
mitre_technique: T1110
"#;

    #[test]
    fn parse_valid_yaml() {
        let rule = RuleLoader::parse_yaml(BRUTE, "brute.yml").unwrap();
        assert_eq!(rule.id, "ssh_brute_force");
        assert_eq!(rule.severity, Severity::High);
        assert_eq!(rule.temporal.unwrap().threshold, Some(5));
        assert_eq!(rule.mitre_technique.as_deref(), Some("T1110"));
    }

    #[test]
    fn parse_invalid_yaml_returns_error() {
        let err = RuleLoader::parse_yaml("not: [valid: yaml: {{{", "bad.yml").unwrap_err();
        assert!(matches!(err, CorrelationError::RuleLoad { ref path, .. } if path == "bad.yml"));
    }

    #[test]
    fn parse_runs_validation() {
        let yaml = "id: r\nname: R\ntemporal:\n  window_secs: 0\n  threshold: 1\n";
        let err = RuleLoader::parse_yaml(yaml, "r.yml").unwrap_err();
        assert!(matches!(err, CorrelationError::RuleValidation { .. }));
    }

    #[tokio::test]
    async fn load_directory_skips_bad_files_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yml"), BRUTE).unwrap();
        std::fs::write(dir.path().join("b.yaml"), BRUTE).unwrap();
        std::fs::write(dir.path().join("c.yml"), "id: [").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(
            dir.path().join("d.yml"),
            "id: other\nname: Other\nseverity: low\n",
        )
        .unwrap();

        let rules = RuleLoader::load_directory(dir.path(), LoadLimits::default())
            .await
            .unwrap();
        let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ssh_brute_force", "other"]);
    }

    #[tokio::test]
    async fn oversized_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.yml"), BRUTE).unwrap();
        let limits = LoadLimits {
            max_rules: 10,
            max_file_bytes: 16,
        };
        let rules = RuleLoader::load_directory(dir.path(), limits).await.unwrap();
        assert!(rules.is_empty());
        assert!(RuleLoader::load_file(dir.path().join("big.yml"), 16).await.is_err());
    }

    #[tokio::test]
    async fn too_many_rules_fails() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            std::fs::write(
                dir.path().join(format!("r{i}.yml")),
                format!("id: r{i}\nname: R{i}\n"),
            )
            .unwrap();
        }
        let limits = LoadLimits {
            max_rules: 2,
            ..LoadLimits::default()
        };
        let err = RuleLoader::load_directory(dir.path(), limits).await.unwrap_err();
        assert!(err.to_string().contains("too many rules"));
    }

    #[tokio::test]
    async fn load_nonexistent_directory_returns_error() {
        let result =
            RuleLoader::load_directory("/nonexistent/path/rules", LoadLimits::default()).await;
        assert!(result.is_err());
    }
}
