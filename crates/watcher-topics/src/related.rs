use watcher_store::Store;

use crate::error::Result;
use crate::key::{Category, TopicKey};

/// Derive the related-topic set for `key` per the §4.B table. Exact
/// lookup only — no fuzzy matching across categories. Categories with no
/// entry in the table return an empty set.
pub fn related_topics(store: &Store, key: &TopicKey) -> Result<Vec<TopicKey>> {
    match (key.category, &key.scope) {
        (Category::User, Some(server)) => {
            let user = &key.parts[0];
            let mut out = Vec::new();

            for topic in store.list_topics_by_category_and_scope("dyad", server)? {
                if topic.key.contains(user) {
                    if let Ok(parsed) = TopicKey::parse(&topic.key) {
                        if parsed.parts.iter().any(|p| p == user) {
                            out.push(parsed);
                        }
                    }
                }
            }
            for topic in store.list_topics_by_category_and_scope("user_in_channel", server)? {
                if let Ok(parsed) = TopicKey::parse(&topic.key) {
                    if parsed.parts.get(1).map(|p| p == user).unwrap_or(false) {
                        out.push(parsed);
                    }
                }
            }
            out.push(TopicKey::user(user.clone()));
            Ok(out)
        }
        (Category::Channel, Some(server)) => {
            let channel = &key.parts[0];
            let mut out = Vec::new();

            for topic in store.list_topics_by_category_and_scope("user_in_channel", server)? {
                if let Ok(parsed) = TopicKey::parse(&topic.key) {
                    if parsed.parts.first().map(|p| p == channel).unwrap_or(false) {
                        out.push(parsed);
                    }
                }
            }
            for thread_id in store.list_thread_ids_for_channel(channel)? {
                out.push(TopicKey::server_thread(server.clone(), thread_id));
            }
            Ok(out)
        }
        (Category::Dyad, Some(server)) => {
            let a = &key.parts[0];
            let b = &key.parts[1];
            Ok(vec![
                TopicKey::server_user(server.clone(), a.clone()),
                TopicKey::server_user(server.clone(), b.clone()),
                TopicKey::dyad(a.clone(), b.clone()),
            ])
        }
        (Category::User, None) => {
            let user = &key.parts[0];
            let mut out = Vec::new();

            for topic in store.list_topics_by_category("user")? {
                if let Ok(parsed) = TopicKey::parse(&topic.key) {
                    if parsed.scope.is_some() && parsed.parts.first().map(|p| p == user).unwrap_or(false) {
                        out.push(parsed);
                    }
                }
            }
            for topic in store.list_topics_by_category("dyad")? {
                if let Ok(parsed) = TopicKey::parse(&topic.key) {
                    if parsed.scope.is_none() && parsed.parts.iter().any(|p| p == user) {
                        out.push(parsed);
                    }
                }
            }
            Ok(out)
        }
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watcher_store::Store;

    #[test]
    fn server_dyad_relates_to_its_two_users_and_the_global_dyad() {
        let store = Store::open_in_memory().expect("open");
        let key = TopicKey::server_dyad("srv-1", "a", "b");
        let related = related_topics(&store, &key).expect("related");
        let rendered: Vec<String> = related.iter().map(|k| k.render()).collect();
        assert!(rendered.contains(&"server:srv-1:user:a".to_string()));
        assert!(rendered.contains(&"server:srv-1:user:b".to_string()));
        assert!(rendered.contains(&"dyad:a:b".to_string()));
    }

    #[test]
    fn channel_and_role_have_no_default_relations() {
        let store = Store::open_in_memory().expect("open");
        let key = TopicKey::server_role("srv-1", "r-1");
        assert!(related_topics(&store, &key).expect("related").is_empty());
    }
}
