use watcher_insights::InsightMetrics;
use watcher_store::model::Valence;

/// The fields `store_insight` needs out of a model response, independent
/// of whether the response parsed cleanly or fell back to plain text.
pub struct ParsedResponse {
    pub content: String,
    pub metrics: InsightMetrics,
    pub valence: Valence,
    pub supersedes: Option<String>,
    pub conflicts_with: Vec<String>,
    pub fell_back: bool,
}

/// Parse a model response per §4.E.3: expect a JSON object, possibly
/// fenced in a code block. On any failure, fall back to treating the raw
/// text as `content` with the graceful-fallback metrics — the resulting
/// insight still satisfies every invariant.
pub fn parse_llm_response(raw: &str) -> ParsedResponse {
    if let Some(parsed) = try_parse(raw) {
        return parsed;
    }
    let (metrics, valence) = watcher_insights::fallback_metrics();
    ParsedResponse {
        content: raw.trim().to_string(),
        metrics,
        valence,
        supersedes: None,
        conflicts_with: Vec::new(),
        fell_back: true,
    }
}

fn try_parse(raw: &str) -> Option<ParsedResponse> {
    let json_str = extract_json(raw);
    let value: serde_json::Value = serde_json::from_str(&json_str).ok()?;
    let content = value.get("content")?.as_str()?.to_string();

    let metrics = InsightMetrics {
        strength_adjustment: value.get("strength_adjustment").and_then(|v| v.as_f64()).unwrap_or(1.0),
        confidence: value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.5),
        importance: value.get("importance").and_then(|v| v.as_f64()).unwrap_or(0.5),
        novelty: value.get("novelty").and_then(|v| v.as_f64()).unwrap_or(0.5),
    };

    let valence_obj = value.get("valence");
    let valence = Valence {
        joy: valence_obj.and_then(|v| v.get("joy")).and_then(|v| v.as_f64()),
        concern: valence_obj.and_then(|v| v.get("concern")).and_then(|v| v.as_f64()),
        curiosity: valence_obj.and_then(|v| v.get("curiosity")).and_then(|v| v.as_f64()),
        warmth: valence_obj.and_then(|v| v.get("warmth")).and_then(|v| v.as_f64()),
        tension: valence_obj.and_then(|v| v.get("tension")).and_then(|v| v.as_f64()),
    };

    let supersedes = value.get("supersedes").and_then(|v| v.as_str()).map(|s| s.to_string());
    let conflicts_with = value
        .get("conflicts_with")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default();

    Some(ParsedResponse { content, metrics, valence, supersedes, conflicts_with, fell_back: false })
}

/// Strip a ` ```json ... ``` ` or bare ` ``` ... ``` ` fence if present.
fn extract_json(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };
    let after_fence = &trimmed[start + 3..];
    let after_lang = after_fence.strip_prefix("json").unwrap_or(after_fence);
    let after_lang = after_lang.trim_start_matches('\n');
    match after_lang.find("```") {
        Some(end) => after_lang[..end].trim().to_string(),
        None => after_lang.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_object() {
        let raw = r#"{"content": "hello", "confidence": 0.9, "valence": {"joy": 0.7}}"#;
        let parsed = parse_llm_response(raw);
        assert_eq!(parsed.content, "hello");
        assert_eq!(parsed.metrics.confidence, 0.9);
        assert_eq!(parsed.valence.joy, Some(0.7));
        assert!(!parsed.fell_back);
    }

    #[test]
    fn parses_json_fenced_in_code_block() {
        let raw = "Here you go:\n```json\n{\"content\": \"fenced\", \"valence\": {\"curiosity\": 0.4}}\n```";
        let parsed = parse_llm_response(raw);
        assert_eq!(parsed.content, "fenced");
        assert!(!parsed.fell_back);
    }

    #[test]
    fn unparseable_response_falls_back_gracefully() {
        let raw = "I don't know how to respond to that in JSON.";
        let parsed = parse_llm_response(raw);
        assert!(parsed.fell_back);
        assert_eq!(parsed.content, raw);
        assert_eq!(parsed.metrics.strength_adjustment, 1.0);
        assert!(parsed.valence.has_any());
    }
}
