use garde::Validate;
use tracing::warn;

use crate::models::pipeline::{
    ExecutionPlan, FakeSignal, RealismScore, SceneClassification, Severity, Strategy,
};
use crate::pipeline::{text_call, StageOutput};
use crate::services::llm::{parse_json_response, LanguageModel};

const SYSTEM_PROMPT: &str = "\
You are a realism assessor. Estimate how realistic an image currently \
appears and how realistic it will appear after the planned enhancements \
are applied. Be conservative and technical.

You must return ONLY valid JSON, no other text.";

/// Confidence reported when the heuristic fallback produces the score.
const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Stage 6: estimate before/after realism.
///
/// Unlike the earlier model-backed stages, scoring never fails the job:
/// any model failure, transport included, falls back to a heuristic
/// estimate with low confidence and a degraded flag. Model-produced
/// scores are preserved exactly, regressions included.
pub async fn score(
    llm: &dyn LanguageModel,
    classification: &SceneClassification,
    signals: &[FakeSignal],
    strategy: &Strategy,
    plan: &ExecutionPlan,
) -> StageOutput<RealismScore> {
    let prompt = build_prompt(classification, signals, strategy, plan);

    let reply = match text_call(llm, SYSTEM_PROMPT, &prompt).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "scoring call failed, using heuristic estimate");
            return StageOutput::degraded(heuristic_score(classification, signals, plan));
        }
    };

    let first_error = match parse_reply(&reply) {
        Ok(score) => return StageOutput::ok(score),
        Err(e) => e,
    };

    warn!(error = %first_error, "score output invalid, retrying with strict instruction");
    let strict_prompt = format!(
        "{prompt}\n\nYour previous reply could not be used ({first_error}). \
         Output ONLY the JSON object, nothing else."
    );
    match text_call(llm, SYSTEM_PROMPT, &strict_prompt).await {
        Ok(reply) => match parse_reply(&reply) {
            Ok(score) => StageOutput::ok(score),
            Err(e) => {
                warn!(error = %e, "score still invalid, using heuristic estimate");
                StageOutput::degraded(heuristic_score(classification, signals, plan))
            }
        },
        Err(e) => {
            warn!(error = %e, "scoring retry failed, using heuristic estimate");
            StageOutput::degraded(heuristic_score(classification, signals, plan))
        }
    }
}

fn build_prompt(
    classification: &SceneClassification,
    signals: &[FakeSignal],
    strategy: &Strategy,
    plan: &ExecutionPlan,
) -> String {
    let classification_json =
        serde_json::to_string_pretty(classification).unwrap_or_else(|_| "{}".to_string());
    let signals_json = serde_json::to_string_pretty(signals).unwrap_or_else(|_| "[]".to_string());

    format!(
        "Estimate realism scores for an image and its enhancement plan.\n\n\
         SCENE CLASSIFICATION:\n{classification_json}\n\n\
         DETECTED FAKE SIGNALS:\n{signals_json}\n\n\
         ENHANCEMENT GOAL: {goal}\n\
         PLANNED INSTRUCTIONS: {instruction_count}\n\n\
         Return JSON in this exact format:\n\
         {{\n\
           \"before\": <float 0.0-1.0, realism before enhancement>,\n\
           \"after\": <float 0.0-1.0, expected realism after enhancement>,\n\
           \"confidence\": <float 0.0-1.0>,\n\
           \"notes\": \"<brief assessment>\"\n\
         }}\n\n\
         Return ONLY the JSON object, no explanations or markdown.",
        goal = strategy.goal,
        instruction_count = plan.instruction_count(),
    )
}

fn parse_reply(reply: &str) -> Result<RealismScore, String> {
    let value = parse_json_response(reply).map_err(|e| e.to_string())?;
    let score: RealismScore = serde_json::from_value(value).map_err(|e| e.to_string())?;
    score.validate().map_err(|e| e.to_string())?;
    Ok(score)
}

/// Heuristic estimate from AI likelihood, signal severity, and the number
/// of planned instructions.
fn heuristic_score(
    classification: &SceneClassification,
    signals: &[FakeSignal],
    plan: &ExecutionPlan,
) -> RealismScore {
    let penalty: f64 = signals
        .iter()
        .map(|s| match s.severity {
            Severity::Low => 0.03,
            Severity::Medium => 0.07,
            Severity::High => 0.12,
        })
        .sum();
    let penalty = penalty.min(0.5);

    let before = (1.0 - classification.ai_likelihood - penalty).max(0.0);
    let after = (before + 0.1 * plan.instruction_count() as f64).min(1.0);

    RealismScore {
        before,
        after,
        confidence: FALLBACK_CONFIDENCE,
        notes: format!(
            "Heuristic estimate: derived from AI likelihood {:.2} and {} detected artifact(s); \
             scoring model unavailable.",
            classification.ai_likelihood,
            signals.len()
        ),
    }
}
