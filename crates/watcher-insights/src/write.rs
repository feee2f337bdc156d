use watcher_store::insights::NewInsight;
use watcher_store::model::{CrossLinks, Insight, Valence, VisibilityScope};
use watcher_store::{SpendOutcome, Store};

use crate::error::{InsightsError, Result};

/// Quantitative metrics supplied by the producing layer, pre-validation.
pub struct InsightMetrics {
    pub strength_adjustment: f64,
    pub confidence: f64,
    pub importance: f64,
    pub novelty: f64,
}

/// Result of [`store_insight`]: either the spend was funded and the insight
/// committed with it, or the topic had no salience left to spend and
/// nothing was written.
pub enum StoreInsightOutcome {
    Stored { spent: f64, insight: Insight },
    InsufficientSalience,
}

/// `store_insight(run_id, topic_key, category, content, metrics, valence,
/// scope_max, cross_links)` per §4.D. The spend that funds this insight and
/// the insight's insert happen as one transaction (§5, §8): either both
/// land or neither does, so a failed insert never leaves an orphan spend
/// entry. `requested_spend` is clamped to the topic's balance inside that
/// transaction; the insight's `salience_spent`/`strength` reflect the
/// clamped amount, not the request.
#[allow(clippy::too_many_arguments)]
pub fn store_insight(
    store: &Store,
    run_id: &str,
    topic_key: &str,
    category: &str,
    content: &str,
    metrics: InsightMetrics,
    valence: Valence,
    scope_max: VisibilityScope,
    cross_links: CrossLinks,
    requested_spend: f64,
    retention_rate: f64,
    spend_reason: &str,
    supersedes: Option<String>,
    conflicts_with: Vec<String>,
    synthesis_sources: Vec<String>,
) -> Result<StoreInsightOutcome> {
    validate(&metrics, &valence)?;

    let run_id = run_id.to_string();
    let topic_key_owned = topic_key.to_string();
    let category = category.to_string();
    let content = content.to_string();
    let strength_adjustment = metrics.strength_adjustment;
    let confidence = metrics.confidence;
    let importance = metrics.importance;
    let novelty = metrics.novelty;

    let outcome = store.spend_and_insert_insight(topic_key, requested_spend, retention_rate, spend_reason, move |spent| {
        NewInsight {
            topic_key: topic_key_owned,
            category,
            content,
            sources_scope_max: scope_max,
            run_id,
            salience_spent: spent,
            strength_adjustment,
            strength: spent * strength_adjustment,
            confidence,
            importance,
            novelty,
            valence,
            supersedes,
            cross_links,
            conflicts_with,
            synthesis_sources,
        }
    })?;

    Ok(match outcome {
        SpendOutcome::Funded { spent, insight } => StoreInsightOutcome::Stored { spent, insight },
        SpendOutcome::InsufficientSalience => StoreInsightOutcome::InsufficientSalience,
    })
}

fn validate(metrics: &InsightMetrics, valence: &Valence) -> Result<()> {
    if !valence.has_any() {
        return Err(InsightsError::Invalid(
            "at least one emotional-valence field must be non-null".to_string(),
        ));
    }
    for (name, value) in [
        ("joy", valence.joy),
        ("concern", valence.concern),
        ("curiosity", valence.curiosity),
        ("warmth", valence.warmth),
        ("tension", valence.tension),
    ] {
        if let Some(v) = value {
            if !(0.0..=1.0).contains(&v) {
                return Err(InsightsError::Invalid(format!("valence field {name} out of [0,1]: {v}")));
            }
        }
    }
    if !(0.1..=10.0).contains(&metrics.strength_adjustment) {
        return Err(InsightsError::Invalid(format!(
            "strength_adjustment out of [0.1, 10]: {}",
            metrics.strength_adjustment
        )));
    }
    for (name, value) in [
        ("confidence", metrics.confidence),
        ("importance", metrics.importance),
        ("novelty", metrics.novelty),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(InsightsError::Invalid(format!("{name} out of [0,1]: {value}")));
        }
    }
    Ok(())
}

/// Graceful-fallback metrics for unparseable model responses (§4.E.3).
pub fn fallback_metrics() -> (InsightMetrics, Valence) {
    (
        InsightMetrics {
            strength_adjustment: 1.0,
            confidence: 0.5,
            importance: 0.5,
            novelty: 0.5,
        },
        Valence {
            curiosity: Some(0.5),
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_insight_with_no_valence_set() {
        let metrics = InsightMetrics { strength_adjustment: 1.0, confidence: 0.5, importance: 0.5, novelty: 0.5 };
        let result = validate(&metrics, &Valence::default());
        assert!(result.is_err());
    }

    #[test]
    fn rejects_strength_adjustment_out_of_range() {
        let metrics = InsightMetrics { strength_adjustment: 11.0, confidence: 0.5, importance: 0.5, novelty: 0.5 };
        let valence = Valence { joy: Some(0.5), ..Default::default() };
        assert!(validate(&metrics, &valence).is_err());
    }

    #[test]
    fn fallback_metrics_satisfy_all_invariants() {
        let (metrics, valence) = fallback_metrics();
        assert!(validate(&metrics, &valence).is_ok());
    }
}
