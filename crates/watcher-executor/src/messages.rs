use chrono::{DateTime, Utc};
use watcher_store::model::Message;
use watcher_store::Store;
use watcher_topics::{Category, TopicKey};

use crate::error::Result;

/// `fetch_messages` message selection per §4.E.2, dispatched on the
/// target topic's category.
pub fn fetch_messages_for_topic(store: &Store, topic: &TopicKey, lookback_hours: u32, limit: u32) -> Result<Vec<Message>> {
    let cutoff = Utc::now() - chrono::Duration::hours(lookback_hours as i64);
    // Over-fetch since the store only limits by count, not by window; the
    // window filter is applied afterward.
    let over_fetch = limit.saturating_mul(4).max(limit);

    let raw = match topic.category {
        Category::User => store.list_user_thread_messages(&topic.parts[0], over_fetch)?,
        Category::Channel => store.list_channel_messages(&topic.parts[0], over_fetch)?,
        Category::Thread => store.list_thread_messages(&topic.parts[0], over_fetch)?,
        Category::Dyad => {
            store.list_dyad_interaction_messages(&topic.parts[0], &topic.parts[1], over_fetch)?
        }
        Category::UserInChannel => store
            .list_channel_messages(&topic.parts[0], over_fetch)?
            .into_iter()
            .filter(|m| m.author_id.as_deref() == Some(topic.parts[1].as_str()))
            .collect(),
        Category::DyadInChannel => {
            store.list_dyad_messages(&topic.parts[0], &topic.parts[1], &topic.parts[2], over_fetch)?
        }
        Category::Subject => fetch_subject_messages(store, topic, over_fetch)?,
        Category::Role | Category::Emoji | Category::SelfTopic => Vec::new(),
    };

    let mut filtered = within_window(raw, cutoff);
    dedup_by_id(&mut filtered);
    filtered.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    filtered.truncate(limit as usize);
    Ok(filtered)
}

/// Subject topics select messages in two phases: those explicitly linked
/// via the subject-source join, then recent messages from whichever
/// channels originally surfaced the subject.
fn fetch_subject_messages(store: &Store, topic: &TopicKey, limit: u32) -> Result<Vec<Message>> {
    let rendered = topic.render();
    let links = store.list_sources_for_subject(&rendered)?;

    let mut out = Vec::new();
    let mut source_topics: Vec<String> = Vec::new();
    for (message_id, source_topic_key, _run_id) in &links {
        if let Some(message) = store.get_message(message_id)? {
            out.push(message);
        }
        if !source_topics.contains(source_topic_key) {
            source_topics.push(source_topic_key.clone());
        }
    }

    for source_key in source_topics {
        if let Ok(parsed) = TopicKey::parse(&source_key) {
            if parsed.category == Category::Channel {
                out.extend(store.list_channel_messages(&parsed.parts[0], limit)?);
            }
        }
    }
    Ok(out)
}

fn within_window(messages: Vec<Message>, cutoff: DateTime<Utc>) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|m| {
            DateTime::parse_from_rfc3339(&m.created_at)
                .map(|dt| dt.with_timezone(&Utc) >= cutoff)
                .unwrap_or(false)
        })
        .collect()
}

fn dedup_by_id(messages: &mut Vec<Message>) {
    let mut seen = std::collections::HashSet::new();
    messages.retain(|m| seen.insert(m.id.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use watcher_store::messages::NewMessage;
    use watcher_store::model::VisibilityScope;

    #[test]
    fn channel_topic_selects_messages_in_window() {
        let store = Store::open_in_memory().expect("open");
        store
            .insert_message(NewMessage {
                id: "m-1",
                channel_id: "c-1",
                server_id: Some("srv-1"),
                author_id: Some("u-1"),
                content: "hi",
                created_at: &Utc::now().to_rfc3339(),
                visibility_scope: VisibilityScope::Public,
                reply_target_id: None,
                thread_id: None,
                has_media: false,
                has_link: false,
            })
            .expect("insert");

        let topic = TopicKey::server_channel("srv-1", "c-1");
        let hits = fetch_messages_for_topic(&store, &topic, 24, 10).expect("fetch");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn dyad_topic_requires_interaction_not_just_shared_authorship() {
        let store = Store::open_in_memory().expect("open");
        let base = Utc::now();
        // u-1 and u-2 never reply to each other and never share a thread,
        // so this pair isn't a dyad even though both post in the channel.
        store
            .insert_message(NewMessage {
                id: "m-1",
                channel_id: "c-1",
                server_id: Some("srv-1"),
                author_id: Some("u-1"),
                content: "hello",
                created_at: &base.to_rfc3339(),
                visibility_scope: VisibilityScope::Public,
                reply_target_id: None,
                thread_id: None,
                has_media: false,
                has_link: false,
            })
            .expect("insert");
        store
            .insert_message(NewMessage {
                id: "m-2",
                channel_id: "c-1",
                server_id: Some("srv-1"),
                author_id: Some("u-2"),
                content: "unrelated",
                created_at: &base.to_rfc3339(),
                visibility_scope: VisibilityScope::Public,
                reply_target_id: None,
                thread_id: None,
                has_media: false,
                has_link: false,
            })
            .expect("insert");

        let topic = TopicKey::dyad("u-1", "u-2");
        let hits = fetch_messages_for_topic(&store, &topic, 24, 10).expect("fetch");
        assert!(hits.is_empty());

        // u-2 replies to u-1: that exchange now counts.
        store
            .insert_message(NewMessage {
                id: "m-3",
                channel_id: "c-1",
                server_id: Some("srv-1"),
                author_id: Some("u-2"),
                content: "replying",
                created_at: &base.to_rfc3339(),
                visibility_scope: VisibilityScope::Public,
                reply_target_id: Some("m-1"),
                thread_id: None,
                has_media: false,
                has_link: false,
            })
            .expect("insert");

        let hits = fetch_messages_for_topic(&store, &topic, 24, 10).expect("fetch");
        let ids: Vec<_> = hits.iter().map(|m| m.id.as_str()).collect();
        assert!(ids.contains(&"m-1"));
        assert!(ids.contains(&"m-3"));
        assert!(!ids.contains(&"m-2"));
    }

    #[test]
    fn self_topic_never_returns_messages() {
        let store = Store::open_in_memory().expect("open");
        let topic = TopicKey::self_aspect("core");
        let hits = fetch_messages_for_topic(&store, &topic, 24, 10).expect("fetch");
        assert!(hits.is_empty());
    }
}
