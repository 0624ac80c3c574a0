//! Segment planning through an LLM.
//!
//! The LLM output is checked against the `SegmentPlan` shape before use.
//! Only two repairs are applied: every `seconds` is overwritten with the
//! configured segment length, and surplus segments are dropped.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use vchain_models::{SegmentPlan, VideoModel, MIN_SEGMENT_PROMPT_CHARS};

use crate::error::{ChainError, WorkerResult};
use crate::llm::PlanningLlm;

const SYSTEM_PROMPT: &str = "You are a film director planning one continuous shot that is \
generated as a chain of short video clips. Each clip starts from the exact final frame of \
the previous clip. Keep the same subject identity, wardrobe, lighting, color palette, lens \
and visual style across every clip. Respond with strict JSON only, no prose and no markdown.";

/// Turns one base prompt into ordered segment prompts.
#[derive(Clone)]
pub struct SegmentPlanner {
    llm: Arc<dyn PlanningLlm>,
}

impl SegmentPlanner {
    pub fn new(llm: Arc<dyn PlanningLlm>) -> Self {
        Self { llm }
    }

    /// Plan exactly `num_segments` segments of `seconds_per_segment` each.
    pub async fn plan(
        &self,
        base_prompt: &str,
        seconds_per_segment: u32,
        num_segments: u32,
        model: VideoModel,
    ) -> WorkerResult<Vec<SegmentPlan>> {
        let user = build_user_prompt(base_prompt, seconds_per_segment, num_segments, model);
        let text = self
            .llm
            .complete(SYSTEM_PROMPT, &user)
            .await
            .map_err(|e| ChainError::planning_failed(e.to_string()))?;

        debug!(chars = text.len(), "Received segment plan");
        parse_plan(&text, seconds_per_segment, num_segments).map_err(ChainError::planning_failed)
    }
}

/// User message for the planning request.
pub fn build_user_prompt(
    base_prompt: &str,
    seconds_per_segment: u32,
    num_segments: u32,
    model: VideoModel,
) -> String {
    format!(
        r#"Base idea: {base_prompt}

Split this idea into exactly {num_segments} consecutive segments of {seconds_per_segment} seconds each for the {model} video model.

Rules:
- Segment 1 opens the scene. Every later segment begins from the literal last frame of the segment before it.
- Describe subject, setting, camera movement, lighting and mood in every prompt; never rely on "as before".
- Each prompt must be at least {min_chars} characters.

Return a JSON object of this exact shape and nothing else:
{{"segments": [{{"title": "short title", "seconds": {seconds_per_segment}, "prompt": "detailed generation prompt"}}]}}"#,
        base_prompt = base_prompt,
        num_segments = num_segments,
        seconds_per_segment = seconds_per_segment,
        model = model,
        min_chars = MIN_SEGMENT_PROMPT_CHARS,
    )
}

/// Remove one surrounding markdown code fence, if present.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (```json) up to the first newline
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse and validate LLM output into exactly `num_segments` plans.
pub fn parse_plan(
    text: &str,
    seconds_per_segment: u32,
    num_segments: u32,
) -> Result<Vec<SegmentPlan>, String> {
    let value: Value = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| format!("plan is not valid JSON: {}", e))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            if map.len() != 1 {
                return Err("plan object must contain only a \"segments\" array".to_string());
            }
            match map.remove("segments") {
                Some(Value::Array(items)) => items,
                _ => return Err("plan object must contain a \"segments\" array".to_string()),
            }
        }
        _ => return Err("plan must be a JSON array or an object with \"segments\"".to_string()),
    };

    let mut plans = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let n = i + 1;
        let plan: SegmentPlan =
            serde_json::from_value(item).map_err(|e| format!("segment {}: {}", n, e))?;
        if plan.title.trim().is_empty() {
            return Err(format!("segment {}: title is empty", n));
        }
        let prompt_chars = plan.prompt.trim().chars().count();
        if prompt_chars < MIN_SEGMENT_PROMPT_CHARS {
            return Err(format!(
                "segment {}: prompt has {} characters, need at least {}",
                n, prompt_chars, MIN_SEGMENT_PROMPT_CHARS
            ));
        }
        plans.push(plan);
    }

    let wanted = num_segments as usize;
    if plans.len() < wanted {
        return Err(format!(
            "expected {} segments, got {}",
            num_segments,
            plans.len()
        ));
    }
    if plans.len() > wanted {
        warn!(
            expected = wanted,
            received = plans.len(),
            "Planner returned extra segments, truncating"
        );
        plans.truncate(wanted);
    }

    for plan in &mut plans {
        plan.seconds = seconds_per_segment;
    }
    Ok(plans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn segment(title: &str, seconds: u32) -> Value {
        serde_json::json!({
            "title": title,
            "seconds": seconds,
            "prompt": format!("{} - a wide tracking shot along a misty harbor at dawn, soft light", title),
        })
    }

    #[test]
    fn test_parse_plan_overrides_seconds() {
        let text = serde_json::json!({"segments": [segment("a", 4), segment("b", 12), segment("c", 8)]}).to_string();
        let plans = parse_plan(&text, 8, 3).unwrap();
        assert_eq!(plans.len(), 3);
        assert!(plans.iter().all(|p| p.seconds == 8));
        assert_eq!(plans[1].title, "b");
    }

    #[test]
    fn test_parse_plan_truncates_extra_segments() {
        let text = serde_json::json!([segment("a", 8), segment("b", 8), segment("c", 8), segment("d", 8)]).to_string();
        let plans = parse_plan(&text, 8, 2).unwrap();
        assert_eq!(
            plans.iter().map(|p| p.title.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_parse_plan_rejects_too_few() {
        let text = serde_json::json!([segment("a", 8)]).to_string();
        let err = parse_plan(&text, 8, 3).unwrap_err();
        assert_eq!(err, "expected 3 segments, got 1");
    }

    #[test]
    fn test_parse_plan_is_strict() {
        let mut extra = segment("a", 8);
        extra["mood"] = Value::String("calm".to_string());
        let text = serde_json::json!([extra, segment("b", 8)]).to_string();
        assert!(parse_plan(&text, 8, 2).unwrap_err().contains("unknown field"));

        let short = serde_json::json!([{"title": "a", "seconds": 8, "prompt": "too short"}, segment("b", 8)]);
        assert!(parse_plan(&short.to_string(), 8, 2).unwrap_err().contains("segment 1"));

        let untitled = serde_json::json!([segment(" ", 8), segment("b", 8)]);
        assert!(parse_plan(&untitled.to_string(), 8, 2).unwrap_err().contains("title is empty"));

        let wrapped = serde_json::json!({"segments": [segment("a", 8)], "notes": "x"});
        assert!(parse_plan(&wrapped.to_string(), 8, 1).is_err());

        assert!(parse_plan("Here is your plan!", 8, 1).is_err());
    }

    #[test]
    fn test_parse_plan_strips_code_fence() {
        let text = format!(
            "```json\n{}\n```",
            serde_json::json!([segment("a", 8), segment("b", 8)])
        );
        assert_eq!(parse_plan(&text, 8, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_user_prompt_mentions_counts() {
        let prompt = build_user_prompt("A fox crosses a frozen lake", 4, 5, VideoModel::Sora2Pro);
        assert!(prompt.contains("exactly 5 consecutive segments of 4 seconds"));
        assert!(prompt.contains("sora-2-pro"));
    }

    struct FixedLlm(Result<String, String>);

    #[async_trait]
    impl PlanningLlm for FixedLlm {
        async fn complete(&self, _system: &str, _user: &str) -> WorkerResult<String> {
            self.0.clone().map_err(ChainError::api_failed)
        }
    }

    #[tokio::test]
    async fn test_llm_errors_become_planning_failed() {
        let planner = SegmentPlanner::new(Arc::new(FixedLlm(Err("timeout".to_string()))));
        let err = planner.plan("A fox crosses a frozen lake", 8, 2, VideoModel::Sora2).await.unwrap_err();
        assert!(matches!(err, ChainError::PlanningFailed(ref m) if m.contains("timeout")));
    }

    #[tokio::test]
    async fn test_invalid_output_becomes_planning_failed() {
        let planner = SegmentPlanner::new(Arc::new(FixedLlm(Ok("[]".to_string()))));
        let err = planner.plan("A fox crosses a frozen lake", 8, 2, VideoModel::Sora2).await.unwrap_err();
        assert!(matches!(err, ChainError::PlanningFailed(_)));
    }
}
