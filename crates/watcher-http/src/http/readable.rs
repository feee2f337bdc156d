//! The `readable` query flag shared by every introspection endpoint.
//!
//! `readable` only affects presentation (id→name substitution) and not core
//! semantics (§6). The core has no display-name directory of its
//! own (that lives with the external chat adapter), so the substitution
//! available here is purely structural: turning a topic's machine-parseable
//! key into a short human label, the way an operator reading a dashboard
//! would rather see "user u-42 in server srv-1" than the raw key.

use watcher_topics::{Category, TopicKey};

/// Render `key` as a human-readable label if it parses, falling back to the
/// raw string otherwise (an unparseable key is a caller/data bug, not
/// something this presentation layer should hide).
pub fn humanize_key(key: &str) -> String {
    match TopicKey::parse(key) {
        Ok(parsed) => humanize(&parsed),
        Err(_) => key.to_string(),
    }
}

fn humanize(key: &TopicKey) -> String {
    let scope = key.scope.as_deref();
    let body = match key.category {
        Category::User => format!("user {}", key.parts[0]),
        Category::Dyad => format!("{} & {}", key.parts[0], key.parts[1]),
        Category::Channel => format!("channel {}", key.parts[0]),
        Category::Thread => format!("thread {}", key.parts[0]),
        Category::Role => format!("role {}", key.parts[0]),
        Category::UserInChannel => format!("user {} in channel {}", key.parts[1], key.parts[0]),
        Category::DyadInChannel => format!("{} & {} in channel {}", key.parts[1], key.parts[2], key.parts[0]),
        Category::Subject => format!("subject \"{}\"", key.parts[0]),
        Category::Emoji => format!("emoji {}", key.parts[0]),
        Category::SelfTopic => format!("self:{}", key.parts[0]),
    };
    match scope {
        Some(server) => format!("{body} (server {server})"),
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanizes_server_scoped_user() {
        assert_eq!(humanize_key("server:srv-1:user:u-1"), "user u-1 (server srv-1)");
    }

    #[test]
    fn humanizes_global_dyad() {
        assert_eq!(humanize_key("dyad:a:b"), "a & b");
    }

    #[test]
    fn falls_back_to_raw_key_on_parse_failure() {
        assert_eq!(humanize_key("not-a-real-key"), "not-a-real-key");
    }
}
