use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};

/// Severity of a detected fake signal.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Overall priority of an enhancement strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Strength of a single enhancement operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Strength {
    VeryLow,
    Low,
    Medium,
}

/// The three enhancement modules an operation may target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModuleKind {
    Lighting,
    Texture,
    Noise,
}

/// Whether an operation applies to the whole frame or a region.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Locality {
    Global,
    Local,
}

/// Stage 1 output: scene type, attributes, and AI-generation likelihood.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct SceneClassification {
    #[garde(length(min = 1, max = 100))]
    pub primary_scene: String,

    #[garde(skip)]
    #[serde(default)]
    pub secondary_attributes: Vec<String>,

    #[garde(range(min = 0.0, max = 1.0))]
    pub ai_likelihood: f64,
}

impl SceneClassification {
    /// Fallback returned when the vision model cannot produce a parsable
    /// classification after the repair retry.
    pub fn unknown() -> Self {
        Self {
            primary_scene: "unknown".to_string(),
            secondary_attributes: Vec::new(),
            ai_likelihood: 0.5,
        }
    }
}

/// Stage 2 output item: one suspected AI artifact, in detection order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FakeSignal {
    pub signal: String,
    pub severity: Severity,
}

/// Stage 3 output: scene-specific realism rules from the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealismConstraints {
    #[serde(default)]
    pub scene_rules: Vec<String>,
    #[serde(default)]
    pub avoid_patterns: Vec<String>,
}

/// A single enhancement operation within a strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub module: ModuleKind,
    pub action: String,
    pub strength: Strength,
    pub locality: Locality,
}

/// Stage 4 output: the enhancement strategy produced by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct Strategy {
    #[garde(length(min = 1, max = 500))]
    pub goal: String,

    #[garde(skip)]
    pub priority: Priority,

    #[garde(skip)]
    #[serde(default)]
    pub operations: Vec<Operation>,

    #[garde(skip)]
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// One instruction for an enhancement module.
///
/// Parameters use a `BTreeMap` so identical strategies serialize to
/// byte-identical plans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleInstruction {
    pub action: String,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub target_region: Option<String>,
}

/// Stage 5 output: per-module instruction lists.
///
/// All three modules are always present; a module with no operations has an
/// empty list, never an absent field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPlan {
    pub lighting_module: Vec<ModuleInstruction>,
    pub texture_module: Vec<ModuleInstruction>,
    pub noise_module: Vec<ModuleInstruction>,
}

impl ExecutionPlan {
    pub fn instruction_count(&self) -> usize {
        self.lighting_module.len() + self.texture_module.len() + self.noise_module.len()
    }
}

/// Stage 6 output: before/after realism estimate.
///
/// `after >= before` is not enforced; the model may report a regression and
/// its values are preserved exactly as produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct RealismScore {
    #[garde(range(min = 0.0, max = 1.0))]
    pub before: f64,

    #[garde(range(min = 0.0, max = 1.0))]
    pub after: f64,

    #[garde(range(min = 0.0, max = 1.0))]
    pub confidence: f64,

    #[garde(skip)]
    #[serde(default)]
    pub notes: String,
}

/// Per-stage degraded flags.
///
/// A degraded stage fell back to a default or heuristic output after its
/// repair retry; it still counts as success for pipeline sequencing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageFlags {
    pub classifier: bool,
    pub detector: bool,
    pub retriever: bool,
    pub strategy: bool,
    pub planner: bool,
    pub scorer: bool,
}

impl StageFlags {
    pub fn any(&self) -> bool {
        self.classifier
            || self.detector
            || self.retriever
            || self.strategy
            || self.planner
            || self.scorer
    }
}

/// Final aggregate of all pipeline stage outputs for one job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineResult {
    pub scene_classification: SceneClassification,
    pub fake_signals: Vec<FakeSignal>,
    pub realism_constraints: RealismConstraints,
    pub strategy: Strategy,
    pub execution_plan: ExecutionPlan,
    pub realism_score: RealismScore,
    pub degraded_stages: StageFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_use_snake_case_wire_forms() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
        assert_eq!(
            serde_json::to_string(&Strength::VeryLow).unwrap(),
            "\"very_low\""
        );
        assert_eq!(
            serde_json::to_string(&ModuleKind::Lighting).unwrap(),
            "\"lighting\""
        );
        let loc: Locality = serde_json::from_str("\"local\"").unwrap();
        assert_eq!(loc, Locality::Local);
    }

    #[test]
    fn classification_rejects_out_of_range_likelihood() {
        let c = SceneClassification {
            primary_scene: "portrait".to_string(),
            secondary_attributes: vec![],
            ai_likelihood: 1.4,
        };
        assert!(c.validate().is_err());

        let ok = SceneClassification::unknown();
        assert!(ok.validate().is_ok());
        assert_eq!(ok.primary_scene, "unknown");
        assert_eq!(ok.ai_likelihood, 0.5);
    }

    #[test]
    fn strategy_with_unknown_module_fails_to_parse() {
        let raw = r#"{
            "goal": "reduce smoothness",
            "priority": "low",
            "operations": [
                {"module": "sharpen", "action": "x", "strength": "low", "locality": "global"}
            ],
            "constraints": []
        }"#;
        assert!(serde_json::from_str::<Strategy>(raw).is_err());
    }

    #[test]
    fn stage_flags_default_to_clean() {
        let flags = StageFlags::default();
        assert!(!flags.any());
        let degraded = StageFlags {
            strategy: true,
            ..Default::default()
        };
        assert!(degraded.any());
    }
}
