use chrono::{DateTime, Utc};
use serde::Serialize;
use watcher_store::model::Insight;
use watcher_store::Store;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Recent,
    Balanced,
    Deep,
    /// Weighted identically to `Balanced`; distinguished by also surfacing
    /// insights that are part of an unresolved conflict set.
    Comprehensive,
}

impl Profile {
    fn weights(&self) -> (f64, f64) {
        match self {
            Profile::Recent => (0.8, 0.2),
            Profile::Balanced => (0.5, 0.5),
            Profile::Deep => (0.3, 0.7),
            Profile::Comprehensive => (0.5, 0.5),
        }
    }
}

impl std::str::FromStr for Profile {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "recent" => Ok(Profile::Recent),
            "balanced" => Ok(Profile::Balanced),
            "deep" => Ok(Profile::Deep),
            "comprehensive" => Ok(Profile::Comprehensive),
            other => Err(format!("unknown retrieval profile: {other}")),
        }
    }
}

/// Strength label buckets attached to each returned insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthBucket {
    Strong,
    Clear,
    Fading,
    Distant,
}

impl StrengthBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrengthBucket::Strong => "strong",
            StrengthBucket::Clear => "clear",
            StrengthBucket::Fading => "fading",
            StrengthBucket::Distant => "distant",
        }
    }

    pub fn of(strength: f64) -> Self {
        if strength >= 8.0 {
            StrengthBucket::Strong
        } else if strength >= 5.0 {
            StrengthBucket::Clear
        } else if strength >= 2.0 {
            StrengthBucket::Fading
        } else {
            StrengthBucket::Distant
        }
    }
}

/// An insight with the presentation fields the retriever attaches: a
/// human-relative age string and a strength bucket label.
#[derive(Serialize)]
pub struct RetrievedInsight {
    pub insight: Insight,
    pub age: String,
    pub strength_bucket: StrengthBucket,
}

/// `(topic_key, profile, limit, include_quarantined)` per §4.D.
pub struct RetrievalRequest<'a> {
    pub topic_key: &'a str,
    pub profile: Profile,
    pub limit: u32,
    pub include_quarantined: bool,
}

/// Fetch insights for one topic following the recency/strength split of
/// the requested profile, attaching presentation fields. `now` is passed
/// in so age strings are stable across a single retrieval.
pub fn retrieve(store: &Store, request: &RetrievalRequest<'_>, now: DateTime<Utc>) -> Result<Vec<RetrievedInsight>> {
    let (w_r, w_s) = request.profile.weights();
    let l_r = (request.limit as f64 * w_r).round() as u32;
    let l_s = request.limit.saturating_sub(l_r);

    let recency_hits = store.list_insights_by_topic_recency(request.topic_key, l_r, request.include_quarantined)?;
    let exclude_ids: Vec<String> = recency_hits.iter().map(|i| i.id.clone()).collect();
    let strength_hits = store.list_insights_by_topic_strength_excluding(
        request.topic_key,
        l_s,
        request.include_quarantined,
        &exclude_ids,
    )?;

    // Whichever axis the profile weights more heavily leads the result —
    // `recent` surfaces its recency picks first, `deep` its strength picks.
    let combined: Vec<Insight> = if w_s > w_r {
        strength_hits.into_iter().chain(recency_hits).collect()
    } else {
        recency_hits.into_iter().chain(strength_hits).collect()
    };
    Ok(combined.into_iter().map(|insight| annotate(insight, now)).collect())
}

/// Global retrieval for `user:<id>`: the global topic's own insights split
/// 50/50 with insights pulled from every `server:*:user:<id>` topic.
pub fn retrieve_global_user(
    store: &Store,
    user_id: &str,
    profile: Profile,
    limit: u32,
    include_quarantined: bool,
    now: DateTime<Utc>,
) -> Result<Vec<RetrievedInsight>> {
    let global_limit = limit / 2;
    let server_limit = limit - global_limit;

    let global_key = format!("user:{user_id}");
    let global_hits = retrieve(
        store,
        &RetrievalRequest { topic_key: &global_key, profile, limit: global_limit, include_quarantined },
        now,
    )?;

    let mut server_hits = Vec::new();
    for topic in store.list_topics_by_category("user")? {
        if topic.scope == "global" {
            continue;
        }
        if !topic.key.ends_with(&format!(":user:{user_id}")) {
            continue;
        }
        let per_topic_limit = server_limit;
        let hits = retrieve(
            store,
            &RetrievalRequest { topic_key: &topic.key, profile, limit: per_topic_limit, include_quarantined },
            now,
        )?;
        server_hits.extend(hits);
    }
    server_hits.truncate(server_limit as usize);

    let mut combined = global_hits;
    combined.extend(server_hits);
    Ok(combined)
}

/// Attach the presentation fields (age, strength bucket) a `readable=true`
/// HTTP response renders alongside the raw insight.
pub fn annotate(insight: Insight, now: DateTime<Utc>) -> RetrievedInsight {
    let bucket = StrengthBucket::of(insight.strength);
    let age = match DateTime::parse_from_rfc3339(&insight.created_at) {
        Ok(created) => age_string(now - created.with_timezone(&Utc)),
        Err(_) => "unknown".to_string(),
    };
    RetrievedInsight { insight, age, strength_bucket: bucket }
}

fn age_string(delta: chrono::Duration) -> String {
    let minutes = delta.num_minutes();
    let hours = delta.num_hours();
    let days = delta.num_days();

    if minutes < 60 {
        plural(minutes.max(0), "minute")
    } else if hours < 24 {
        plural(hours, "hour")
    } else if days < 7 {
        plural(days, "day")
    } else if days < 30 {
        plural(days / 7, "week")
    } else if days < 365 {
        plural(days / 30, "month")
    } else {
        plural(days / 365, "year")
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit} ago")
    } else {
        format!("{n} {unit}s ago")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strength_buckets_match_thresholds() {
        assert_eq!(StrengthBucket::of(9.0), StrengthBucket::Strong);
        assert_eq!(StrengthBucket::of(5.0), StrengthBucket::Clear);
        assert_eq!(StrengthBucket::of(2.0), StrengthBucket::Fading);
        assert_eq!(StrengthBucket::of(0.5), StrengthBucket::Distant);
    }

    #[test]
    fn age_string_picks_coarsest_sensible_unit() {
        assert_eq!(age_string(chrono::Duration::minutes(5)), "5 minutes ago");
        assert_eq!(age_string(chrono::Duration::hours(3)), "3 hours ago");
        assert_eq!(age_string(chrono::Duration::days(2)), "2 days ago");
        assert_eq!(age_string(chrono::Duration::days(14)), "2 weeks ago");
    }

    #[test]
    fn profile_weights_split_limit_correctly() {
        let (w_r, w_s) = Profile::Deep.weights();
        assert_eq!(w_r, 0.3);
        assert_eq!(w_s, 0.7);
    }
}
