use garde::Validate;
use tracing::warn;

use crate::models::pipeline::{
    FakeSignal, Priority, RealismConstraints, SceneClassification, Strategy,
};
use crate::pipeline::{text_call, StageFatal, StageOutput};
use crate::services::llm::{parse_json_response, LanguageModel};

const SYSTEM_PROMPT: &str = "\
You are a realism enhancement director. Your job is to create strategies \
for improving the perceived realism of images.

CRITICAL RULES:
1. PRESERVE identity, composition, and intent of the original image.
2. REDUCE \"AI-like perfection\" by introducing real-world imperfections.
3. AVOID cinematic, stylized, or aesthetic exaggeration.
4. PREFER subtle, local, and physically plausible changes.
5. Think like a realism director, not an artist.

You must return ONLY valid JSON, no other text.";

/// Safe default emitted when the model cannot produce a valid strategy
/// after the repair retry. Always structurally valid and renderable.
pub fn fallback_strategy() -> Strategy {
    Strategy {
        goal: "maintain realism".to_string(),
        priority: Priority::Low,
        operations: Vec::new(),
        constraints: vec![
            "preserve facial identity".to_string(),
            "maintain overall composition".to_string(),
        ],
    }
}

/// Stage 4: generate an enhancement strategy from the aggregated analysis.
///
/// Schema violations get one repair retry carrying the validation error;
/// a second failure degrades to the safe default instead of aborting.
pub async fn generate(
    llm: &dyn LanguageModel,
    classification: &SceneClassification,
    signals: &[FakeSignal],
    constraints: &RealismConstraints,
) -> Result<StageOutput<Strategy>, StageFatal> {
    let prompt = build_prompt(classification, signals, constraints);
    let reply = text_call(llm, SYSTEM_PROMPT, &prompt).await?;

    let first_error = match parse_reply(&reply) {
        Ok(strategy) => return Ok(StageOutput::ok(strategy)),
        Err(e) => e,
    };

    warn!(error = %first_error, "strategy output invalid, retrying with validation error");
    let repair_prompt = format!(
        "{prompt}\n\nYour previous reply failed validation: {first_error}. \
         Output ONLY the JSON object with the exact schema shown above, nothing else."
    );
    let reply = text_call(llm, SYSTEM_PROMPT, &repair_prompt).await?;

    match parse_reply(&reply) {
        Ok(strategy) => Ok(StageOutput::ok(strategy)),
        Err(e) => {
            warn!(error = %e, "strategy still invalid, falling back to safe default");
            Ok(StageOutput::degraded(fallback_strategy()))
        }
    }
}

fn build_prompt(
    classification: &SceneClassification,
    signals: &[FakeSignal],
    constraints: &RealismConstraints,
) -> String {
    let classification_json =
        serde_json::to_string_pretty(classification).unwrap_or_else(|_| "{}".to_string());
    let signals_json = serde_json::to_string_pretty(signals).unwrap_or_else(|_| "[]".to_string());
    let rules_json =
        serde_json::to_string_pretty(&constraints.scene_rules).unwrap_or_else(|_| "[]".to_string());
    let avoid_json = serde_json::to_string_pretty(&constraints.avoid_patterns)
        .unwrap_or_else(|_| "[]".to_string());

    format!(
        "Based on the following analysis, create a realism enhancement strategy.\n\n\
         SCENE CLASSIFICATION:\n{classification_json}\n\n\
         DETECTED FAKE SIGNALS:\n{signals_json}\n\n\
         REALISM CONSTRAINTS:\n\
         Scene Rules: {rules_json}\n\
         Avoid Patterns: {avoid_json}\n\n\
         ---\n\n\
         Create a strategy with:\n\
         1. GOAL: a brief statement of the overall enhancement goal.\n\
         2. PRIORITY: \"low\", \"medium\", or \"high\", based on issue severity.\n\
         3. OPERATIONS: specific enhancement operations, each with:\n\
            - module: \"lighting\", \"texture\", or \"noise\"\n\
            - action: what to do (specific, no model names)\n\
            - strength: \"very_low\", \"low\", or \"medium\"\n\
            - locality: \"global\" or \"local\"\n\
         4. CONSTRAINTS: things that must not change (identity, composition, \
         color scheme, intent).\n\n\
         Return your strategy as JSON in this exact format:\n\
         {{\n\
           \"goal\": \"<overall enhancement goal>\",\n\
           \"priority\": \"low\" | \"medium\" | \"high\",\n\
           \"operations\": [\n\
             {{ \"module\": \"lighting\" | \"texture\" | \"noise\", \"action\": \"<action>\", \
         \"strength\": \"very_low\" | \"low\" | \"medium\", \"locality\": \"global\" | \"local\" }}\n\
           ],\n\
           \"constraints\": [\"<constraint1>\", \"<constraint2>\"]\n\
         }}\n\n\
         Return ONLY the JSON object, no explanations or markdown."
    )
}

fn parse_reply(reply: &str) -> Result<Strategy, String> {
    let value = parse_json_response(reply).map_err(|e| e.to_string())?;
    let strategy: Strategy = serde_json::from_value(value).map_err(|e| e.to_string())?;
    strategy.validate().map_err(|e| e.to_string())?;
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pipeline::{Locality, ModuleKind, Strength};

    #[test]
    fn parses_valid_strategy() {
        let reply = r#"{
            "goal": "add subtle skin texture",
            "priority": "medium",
            "operations": [
                {"module": "texture", "action": "add subtle skin pore detail", "strength": "low", "locality": "local"}
            ],
            "constraints": ["preserve facial identity"]
        }"#;
        let s = parse_reply(reply).unwrap();
        assert_eq!(s.priority, Priority::Medium);
        assert_eq!(s.operations.len(), 1);
        assert_eq!(s.operations[0].module, ModuleKind::Texture);
        assert_eq!(s.operations[0].strength, Strength::Low);
        assert_eq!(s.operations[0].locality, Locality::Local);
    }

    #[test]
    fn rejects_unknown_enum_members() {
        let reply = r#"{
            "goal": "x",
            "priority": "urgent",
            "operations": [],
            "constraints": []
        }"#;
        assert!(parse_reply(reply).is_err());
    }

    #[test]
    fn rejects_empty_goal() {
        let reply = r#"{"goal": "", "priority": "low", "operations": [], "constraints": []}"#;
        assert!(parse_reply(reply).is_err());
    }

    #[test]
    fn fallback_is_structurally_valid() {
        let s = fallback_strategy();
        assert!(s.validate().is_ok());
        assert!(s.operations.is_empty());
        assert_eq!(s.priority, Priority::Low);
        assert!(s
            .constraints
            .iter()
            .any(|c| c == "preserve facial identity"));
    }

    #[test]
    fn prompt_embeds_analysis_data() {
        let classification = SceneClassification {
            primary_scene: "portrait".to_string(),
            secondary_attributes: vec!["studio lighting".to_string()],
            ai_likelihood: 0.75,
        };
        let signals = vec![FakeSignal {
            signal: "over-smooth skin".to_string(),
            severity: crate::models::pipeline::Severity::Medium,
        }];
        let constraints = RealismConstraints {
            scene_rules: vec!["skin should have subtle texture variations".to_string()],
            avoid_patterns: vec!["airbrushed skin".to_string()],
        };
        let prompt = build_prompt(&classification, &signals, &constraints);
        assert!(prompt.contains("portrait"));
        assert!(prompt.contains("over-smooth skin"));
        assert!(prompt.contains("skin should have subtle texture variations"));
    }
}
