use serde::Deserialize;
use std::str::FromStr;
use tracing::warn;

use crate::models::pipeline::{FakeSignal, SceneClassification, Severity};
use crate::pipeline::{vision_call, StageFatal, StageOutput};
use crate::services::llm::{parse_json_response, LanguageModel};

const SYSTEM_PROMPT: &str = "\
You are an expert at detecting AI-generated image artifacts.

IMPORTANT RULES:
1. Never describe or infer the identity of any person in the image.
2. Focus only on technical artifacts and realism issues.
3. Be specific about the location and nature of detected issues.

You must return ONLY valid JSON, no other text.";

const DETECTION_PROMPT: &str = "\
Analyze this image for signs of AI generation or digital manipulation.
The scene has been classified as \"{scene}\".

Look for common artifacts across these dimensions:
- SKIN: unnaturally smooth or plastic-looking skin, missing pores, \
airbrushed complexion.
- LIGHTING: inconsistent light direction, missing or incorrect shadows, \
physically impossible highlights.
- TEXTURE: over-uniform surfaces, missing micro-variation, too-perfect \
gradients, repetitive patterns.
- GEOMETRY: extra or missing fingers, distorted anatomy, impossible \
perspectives, unnatural facial symmetry.
- COLOR: oversaturation, HDR-like appearance, inconsistent color \
temperature.

For each issue found, rate its severity:
- \"low\": minor, barely noticeable
- \"medium\": noticeable upon inspection
- \"high\": obviously artificial, immediately visible

Return your analysis as JSON:
{
  \"fake_signals\": [
    { \"signal\": \"<description of the specific issue>\", \"severity\": \"low\" | \"medium\" | \"high\" }
  ]
}

If no issues are detected, return an empty array.
Return ONLY the JSON object, no explanations or markdown.";

#[derive(Deserialize)]
struct DetectionReply {
    #[serde(default)]
    fake_signals: Vec<RawSignal>,
}

#[derive(Deserialize)]
struct RawSignal {
    signal: String,
    #[serde(default)]
    severity: Option<String>,
}

/// Stage 2: detect suspected AI artifacts, scoped by the scene type the
/// classifier produced.
///
/// Returns signals in detection order, capped at `max_signals`. Zero
/// signals is a valid success ("no obvious artifacts found"). Unparsable
/// output after the repair retry degrades to an empty list.
pub async fn detect(
    llm: &dyn LanguageModel,
    image_base64: &str,
    classification: &SceneClassification,
    max_signals: usize,
) -> Result<StageOutput<Vec<FakeSignal>>, StageFatal> {
    let prompt = DETECTION_PROMPT.replace("{scene}", &classification.primary_scene);
    let reply = vision_call(llm, SYSTEM_PROMPT, &prompt, image_base64).await?;

    let first_error = match parse_reply(&reply, max_signals) {
        Ok(signals) => return Ok(StageOutput::ok(signals)),
        Err(e) => e,
    };

    warn!(error = %first_error, "detection output invalid, retrying with strict instruction");
    let strict_prompt = format!(
        "{prompt}\n\nYour previous reply could not be used ({first_error}). \
         Output ONLY the JSON object, nothing else."
    );
    let reply = vision_call(llm, SYSTEM_PROMPT, &strict_prompt, image_base64).await?;

    match parse_reply(&reply, max_signals) {
        Ok(signals) => Ok(StageOutput::ok(signals)),
        Err(e) => {
            warn!(error = %e, "detection still invalid, falling back to zero signals");
            Ok(StageOutput::degraded(Vec::new()))
        }
    }
}

fn parse_reply(reply: &str, max_signals: usize) -> Result<Vec<FakeSignal>, String> {
    let value = parse_json_response(reply).map_err(|e| e.to_string())?;
    let parsed: DetectionReply = serde_json::from_value(value).map_err(|e| e.to_string())?;

    // Unknown severity strings coerce to low rather than dropping the signal.
    let signals = parsed
        .fake_signals
        .into_iter()
        .filter(|raw| !raw.signal.trim().is_empty())
        .take(max_signals)
        .map(|raw| FakeSignal {
            severity: raw
                .severity
                .as_deref()
                .map(str::to_lowercase)
                .and_then(|s| Severity::from_str(&s).ok())
                .unwrap_or(Severity::Low),
            signal: raw.signal,
        })
        .collect();

    Ok(signals)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signals_in_detection_order() {
        let reply = r#"{"fake_signals": [
            {"signal": "over-smooth skin", "severity": "medium"},
            {"signal": "shadow direction mismatch", "severity": "high"},
            {"signal": "uniform bokeh", "severity": "low"}
        ]}"#;
        let signals = parse_reply(reply, 10).unwrap();
        assert_eq!(signals.len(), 3);
        assert_eq!(signals[0].signal, "over-smooth skin");
        assert_eq!(signals[0].severity, Severity::Medium);
        assert_eq!(signals[1].severity, Severity::High);
    }

    #[test]
    fn empty_signal_list_is_valid() {
        let signals = parse_reply(r#"{"fake_signals": []}"#, 10).unwrap();
        assert!(signals.is_empty());
    }

    #[test]
    fn caps_signal_count() {
        let items: Vec<String> = (0..25)
            .map(|i| format!(r#"{{"signal": "artifact {i}", "severity": "low"}}"#))
            .collect();
        let reply = format!(r#"{{"fake_signals": [{}]}}"#, items.join(","));
        let signals = parse_reply(&reply, 10).unwrap();
        assert_eq!(signals.len(), 10);
        assert_eq!(signals[0].signal, "artifact 0");
    }

    #[test]
    fn unknown_severity_coerces_to_low() {
        let reply = r#"{"fake_signals": [{"signal": "odd highlight", "severity": "critical"}]}"#;
        let signals = parse_reply(reply, 10).unwrap();
        assert_eq!(signals[0].severity, Severity::Low);
    }

    #[test]
    fn prompt_carries_scene_context() {
        let prompt = DETECTION_PROMPT.replace("{scene}", "portrait");
        assert!(prompt.contains("classified as \"portrait\""));
        assert!(!prompt.contains("{scene}"));
    }

    #[test]
    fn blank_signals_are_dropped() {
        let reply = r#"{"fake_signals": [{"signal": "  ", "severity": "high"}]}"#;
        assert!(parse_reply(reply, 10).unwrap().is_empty());
    }
}
