use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::models::pipeline::{
    ExecutionPlan, Locality, ModuleInstruction, ModuleKind, Operation, Strategy, Strength,
};

/// Keyword → region pins for local operations. Only explicit region names
/// pin a region; material hints like "skin" stay in the parameters so the
/// downstream editor keeps auto-detection for them. First match wins.
const REGION_KEYWORDS: &[(&str, &str)] = &[
    ("face", "face"),
    ("facial", "face"),
    ("sky", "sky"),
    ("background", "background"),
];

const DEFAULT_REGION: &str = "auto_detect";

/// Stage 5: translate a strategy into per-module instruction lists.
///
/// Pure and deterministic: no external calls, ordered maps, stable
/// iteration. Identical strategies yield byte-identical plans.
pub fn plan(strategy: &Strategy) -> ExecutionPlan {
    let mut plan = ExecutionPlan::default();

    for operation in &strategy.operations {
        let instruction = instruction_for(operation);
        match operation.module {
            ModuleKind::Lighting => plan.lighting_module.push(instruction),
            ModuleKind::Texture => plan.texture_module.push(instruction),
            ModuleKind::Noise => plan.noise_module.push(instruction),
        }
    }

    plan
}

fn instruction_for(operation: &Operation) -> ModuleInstruction {
    let mut parameters = strength_parameters(operation.strength);

    match operation.module {
        ModuleKind::Lighting => lighting_parameters(operation, &mut parameters),
        ModuleKind::Texture => texture_parameters(operation, &mut parameters),
        ModuleKind::Noise => noise_parameters(operation, &mut parameters),
    }

    let target_region = match operation.locality {
        Locality::Global => None,
        Locality::Local => Some(infer_region(&operation.action).to_string()),
    };

    ModuleInstruction {
        action: operation.action.clone(),
        parameters,
        target_region,
    }
}

fn strength_parameters(strength: Strength) -> BTreeMap<String, Value> {
    let (intensity, probability) = match strength {
        Strength::VeryLow => (0.1, 0.3),
        Strength::Low => (0.25, 0.5),
        Strength::Medium => (0.4, 0.7),
    };
    let mut params = BTreeMap::new();
    params.insert("intensity".to_string(), json!(intensity));
    params.insert("probability".to_string(), json!(probability));
    params
}

fn lighting_parameters(operation: &Operation, params: &mut BTreeMap<String, Value>) {
    let action = operation.action.to_lowercase();
    params.insert("type".to_string(), json!("lighting_adjustment"));

    if action.contains("shadow") {
        params.insert("shadow_variation".to_string(), json!(true));
        let softness = if operation.strength == Strength::VeryLow { 0.2 } else { 0.4 };
        params.insert("shadow_softness".to_string(), json!(softness));
    }
    if action.contains("highlight") {
        params.insert("highlight_variation".to_string(), json!(true));
        let bloom = if operation.strength == Strength::VeryLow { 0.1 } else { 0.2 };
        params.insert("highlight_bloom".to_string(), json!(bloom));
    }
    if action.contains("falloff") {
        params.insert("falloff_randomization".to_string(), json!(true));
    }
    if action.contains("inconsisten") {
        params.insert("consistency_break".to_string(), json!(true));
    }
}

fn texture_parameters(operation: &Operation, params: &mut BTreeMap<String, Value>) {
    let action = operation.action.to_lowercase();
    params.insert("type".to_string(), json!("texture_enhancement"));

    if action.contains("micro") || action.contains("pore") {
        params.insert("add_micro_detail".to_string(), json!(true));
        params.insert("detail_scale".to_string(), json!("fine"));
    }
    if action.contains("variation") {
        params.insert("add_variation".to_string(), json!(true));
    }
    if action.contains("imperfection") {
        params.insert("add_imperfections".to_string(), json!(true));
        params.insert("imperfection_type".to_string(), json!("natural"));
    }
    if action.contains("skin") {
        params.insert("target_material".to_string(), json!("skin"));
    }
    if action.contains("surface") {
        params.insert("target_material".to_string(), json!("surface"));
    }
}

fn noise_parameters(operation: &Operation, params: &mut BTreeMap<String, Value>) {
    let action = operation.action.to_lowercase();
    params.insert("type".to_string(), json!("noise_injection"));

    if action.contains("sensor") {
        params.insert("noise_type".to_string(), json!("sensor"));
        params.insert("pattern".to_string(), json!("gaussian"));
    }
    if action.contains("film") || action.contains("grain") {
        params.insert("noise_type".to_string(), json!("film_grain"));
        params.insert("pattern".to_string(), json!("organic"));
    }
    if action.contains("shadow") {
        params.insert("target_tones".to_string(), json!("shadows"));
    }
    if action.contains("highlight") {
        params.insert("target_tones".to_string(), json!("highlights"));
    }
    if action.contains("chroma") || action.contains("color") {
        params.insert("include_chroma".to_string(), json!(true));
    }

    if !params.contains_key("noise_type") {
        params.insert("noise_type".to_string(), json!("subtle"));
        params.insert("pattern".to_string(), json!("natural"));
    }
}

fn infer_region(action: &str) -> &'static str {
    let action = action.to_lowercase();
    REGION_KEYWORDS
        .iter()
        .find(|(keyword, _)| action.contains(keyword))
        .map(|(_, region)| *region)
        .unwrap_or(DEFAULT_REGION)
}
