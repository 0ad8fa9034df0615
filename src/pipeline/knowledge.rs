use std::collections::HashMap;
use std::path::Path;

use crate::models::pipeline::RealismConstraints;

/// Scene rules shipped with the binary.
const EMBEDDED_RULES: &str = include_str!("../../knowledge/scene_rules.json");

/// Read-only scene-type → realism-constraints knowledge base.
///
/// Built once at startup and shared by handle; lookups never fail and
/// never return an empty rule set.
pub struct KnowledgeBase {
    entries: HashMap<String, RealismConstraints>,
}

impl KnowledgeBase {
    /// Knowledge base from the embedded scene rules.
    pub fn builtin() -> Self {
        // The embedded asset is validated by tests; a parse failure here is
        // a broken build, not a runtime condition.
        Self::from_json_str(EMBEDDED_RULES).expect("embedded scene rules are valid JSON")
    }

    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        let entries: HashMap<String, RealismConstraints> = serde_json::from_str(raw)?;
        Ok(Self { entries })
    }

    /// Load an operator-supplied rules file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KnowledgeError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_json_str(&raw)?)
    }

    /// Retrieve constraints for a scene type.
    ///
    /// Unknown scene types resolve to the `default` entry; a knowledge file
    /// without one still yields generic constraints. Total by contract.
    pub fn retrieve(&self, scene_type: &str) -> RealismConstraints {
        let key = scene_type.trim().to_lowercase();
        self.entries
            .get(&key)
            .or_else(|| self.entries.get("default"))
            .cloned()
            .unwrap_or_else(generic_constraints)
    }

    pub fn scene_types(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

fn generic_constraints() -> RealismConstraints {
    RealismConstraints {
        scene_rules: vec![
            "lighting should be physically consistent across the frame".to_string(),
            "textures should contain natural micro-variation".to_string(),
        ],
        avoid_patterns: vec![
            "overly smooth gradients".to_string(),
            "synthetic texture uniformity".to_string(),
        ],
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("failed to read knowledge file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid knowledge file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_rules_parse() {
        let kb = KnowledgeBase::builtin();
        assert!(kb.scene_types().contains(&"portrait"));
        assert!(kb.scene_types().contains(&"default"));
    }

    #[test]
    fn portrait_rules_cover_skin_texture() {
        let kb = KnowledgeBase::builtin();
        let constraints = kb.retrieve("portrait");
        assert!(constraints
            .scene_rules
            .iter()
            .any(|r| r.contains("skin should have subtle texture variations")));
        assert!(!constraints.avoid_patterns.is_empty());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let kb = KnowledgeBase::builtin();
        assert_eq!(kb.retrieve("Portrait"), kb.retrieve("portrait"));
        assert_eq!(kb.retrieve("  LANDSCAPE "), kb.retrieve("landscape"));
    }

    #[test]
    fn unknown_scene_types_never_fail() {
        let kb = KnowledgeBase::builtin();
        for scene in ["unknown", "underwater-macro", "", "日落", "a".repeat(500).as_str()] {
            let constraints = kb.retrieve(scene);
            assert!(!constraints.scene_rules.is_empty());
        }
    }

    #[test]
    fn knowledge_file_without_default_still_yields_rules() {
        let kb = KnowledgeBase::from_json_str(
            r#"{"portrait": {"scene_rules": ["a"], "avoid_patterns": ["b"]}}"#,
        )
        .unwrap();
        let constraints = kb.retrieve("landscape");
        assert!(!constraints.scene_rules.is_empty());
    }
}
