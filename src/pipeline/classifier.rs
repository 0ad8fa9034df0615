use garde::Validate;
use tracing::warn;

use crate::models::pipeline::SceneClassification;
use crate::pipeline::{vision_call, StageFatal, StageOutput};
use crate::services::llm::{parse_json_response, LanguageModel};

const SYSTEM_PROMPT: &str = "\
You are an expert image analyst specializing in scene classification and \
AI-generated image detection.

IMPORTANT RULES:
1. Never describe or infer the identity of any person in the image.
2. Focus only on scene type, technical attributes, and AI-generation likelihood.
3. Be objective and technical in your analysis.

You must return ONLY valid JSON, no other text.";

const CLASSIFICATION_PROMPT: &str = "\
Analyze this image and provide a scene classification.

1. PRIMARY SCENE TYPE - choose the most appropriate: portrait, landscape, \
interior, product, street, architecture, food, abstract, or other.

2. SECONDARY ATTRIBUTES - list relevant technical attributes such as \
lighting conditions, composition style, color palette, and depth of field.

3. AI-GENERATION LIKELIHOOD (0.0 to 1.0) - estimate the probability this \
image is AI-generated based on texture consistency, edge sharpness \
patterns, lighting physics, and common AI artifacts.

Return your analysis as JSON in this exact format:
{
  \"primary_scene\": \"<scene_type>\",
  \"secondary_attributes\": [\"<attribute1>\", \"<attribute2>\"],
  \"ai_likelihood\": <float between 0.0 and 1.0>
}

Return ONLY the JSON object, no explanations or markdown.";

/// Stage 1: classify scene type, attributes, and AI likelihood.
///
/// Malformed model output gets one stricter retry; a second failure
/// degrades to the `unknown` classification instead of aborting the job.
/// Transport failures escalate as fatal after the built-in retry.
pub async fn classify(
    llm: &dyn LanguageModel,
    image_base64: &str,
) -> Result<StageOutput<SceneClassification>, StageFatal> {
    let reply = vision_call(llm, SYSTEM_PROMPT, CLASSIFICATION_PROMPT, image_base64).await?;

    let first_error = match parse_reply(&reply) {
        Ok(classification) => return Ok(StageOutput::ok(classification)),
        Err(e) => e,
    };

    warn!(error = %first_error, "classification output invalid, retrying with strict instruction");
    let strict_prompt = format!(
        "{CLASSIFICATION_PROMPT}\n\nYour previous reply could not be used ({first_error}). \
         Output ONLY the JSON object with the exact fields shown above, nothing else."
    );
    let reply = vision_call(llm, SYSTEM_PROMPT, &strict_prompt, image_base64).await?;

    match parse_reply(&reply) {
        Ok(classification) => Ok(StageOutput::ok(classification)),
        Err(e) => {
            warn!(error = %e, "classification still invalid, falling back to unknown scene");
            Ok(StageOutput::degraded(SceneClassification::unknown()))
        }
    }
}

fn parse_reply(reply: &str) -> Result<SceneClassification, String> {
    let value = parse_json_response(reply).map_err(|e| e.to_string())?;
    let classification: SceneClassification =
        serde_json::from_value(value).map_err(|e| e.to_string())?;
    classification.validate().map_err(|e| e.to_string())?;
    Ok(classification)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_classification() {
        let reply = r#"{"primary_scene": "portrait", "secondary_attributes": ["studio lighting"], "ai_likelihood": 0.75}"#;
        let c = parse_reply(reply).unwrap();
        assert_eq!(c.primary_scene, "portrait");
        assert_eq!(c.ai_likelihood, 0.75);
    }

    #[test]
    fn parses_fenced_classification_with_missing_attributes() {
        let reply = "```json\n{\"primary_scene\": \"landscape\", \"ai_likelihood\": 0.2}\n```";
        let c = parse_reply(reply).unwrap();
        assert_eq!(c.primary_scene, "landscape");
        assert!(c.secondary_attributes.is_empty());
    }

    #[test]
    fn rejects_out_of_range_likelihood() {
        let reply = r#"{"primary_scene": "portrait", "ai_likelihood": 1.7}"#;
        assert!(parse_reply(reply).is_err());
    }

    #[test]
    fn rejects_prose_reply() {
        assert!(parse_reply("This looks like a portrait to me.").is_err());
    }
}
