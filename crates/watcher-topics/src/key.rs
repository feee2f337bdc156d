use crate::error::{Result, TopicsError};

/// The ten recognized topic categories of the key grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    User,
    Dyad,
    Channel,
    Thread,
    Role,
    UserInChannel,
    DyadInChannel,
    Subject,
    Emoji,
    SelfTopic,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::User => "user",
            Category::Dyad => "dyad",
            Category::Channel => "channel",
            Category::Thread => "thread",
            Category::Role => "role",
            Category::UserInChannel => "user_in_channel",
            Category::DyadInChannel => "dyad_in_channel",
            Category::Subject => "subject",
            Category::Emoji => "emoji",
            Category::SelfTopic => "self",
        }
    }
}

/// A parsed, validated topic key. Either global (`scope == None`) or
/// server-scoped (`scope == Some(server_id)`), matching the grammar table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicKey {
    pub category: Category,
    pub scope: Option<String>,
    /// Category-specific identifier segments, in canonical order (dyad
    /// members pre-sorted).
    pub parts: Vec<String>,
}

impl TopicKey {
    pub fn user(id: impl Into<String>) -> Self {
        Self { category: Category::User, scope: None, parts: vec![id.into()] }
    }

    pub fn server_user(server: impl Into<String>, id: impl Into<String>) -> Self {
        Self { category: Category::User, scope: Some(server.into()), parts: vec![id.into()] }
    }

    pub fn dyad(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = sorted_pair(a.into(), b.into());
        Self { category: Category::Dyad, scope: None, parts: vec![a, b] }
    }

    pub fn server_dyad(server: impl Into<String>, a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = sorted_pair(a.into(), b.into());
        Self { category: Category::Dyad, scope: Some(server.into()), parts: vec![a, b] }
    }

    pub fn server_channel(server: impl Into<String>, id: impl Into<String>) -> Self {
        Self { category: Category::Channel, scope: Some(server.into()), parts: vec![id.into()] }
    }

    pub fn server_thread(server: impl Into<String>, id: impl Into<String>) -> Self {
        Self { category: Category::Thread, scope: Some(server.into()), parts: vec![id.into()] }
    }

    pub fn server_role(server: impl Into<String>, id: impl Into<String>) -> Self {
        Self { category: Category::Role, scope: Some(server.into()), parts: vec![id.into()] }
    }

    pub fn server_user_in_channel(server: impl Into<String>, channel: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            category: Category::UserInChannel,
            scope: Some(server.into()),
            parts: vec![channel.into(), user.into()],
        }
    }

    pub fn server_dyad_in_channel(
        server: impl Into<String>,
        channel: impl Into<String>,
        a: impl Into<String>,
        b: impl Into<String>,
    ) -> Self {
        let (a, b) = sorted_pair(a.into(), b.into());
        Self {
            category: Category::DyadInChannel,
            scope: Some(server.into()),
            parts: vec![channel.into(), a, b],
        }
    }

    pub fn server_subject(server: impl Into<String>, name: impl Into<String>) -> Self {
        Self { category: Category::Subject, scope: Some(server.into()), parts: vec![name.into()] }
    }

    pub fn server_emoji(server: impl Into<String>, id: impl Into<String>) -> Self {
        Self { category: Category::Emoji, scope: Some(server.into()), parts: vec![id.into()] }
    }

    pub fn self_aspect(aspect: impl Into<String>) -> Self {
        Self { category: Category::SelfTopic, scope: None, parts: vec![aspect.into()] }
    }

    pub fn server_self_aspect(server: impl Into<String>, aspect: impl Into<String>) -> Self {
        Self { category: Category::SelfTopic, scope: Some(server.into()), parts: vec![aspect.into()] }
    }

    pub fn is_global(&self) -> bool {
        self.scope.is_none()
    }

    /// Render to the storage key string per the grammar table in §3.
    pub fn render(&self) -> String {
        let body = match self.category {
            Category::User => format!("user:{}", self.parts[0]),
            Category::Dyad => format!("dyad:{}:{}", self.parts[0], self.parts[1]),
            Category::Channel => format!("channel:{}", self.parts[0]),
            Category::Thread => format!("thread:{}", self.parts[0]),
            Category::Role => format!("role:{}", self.parts[0]),
            Category::UserInChannel => format!("user_in_channel:{}:{}", self.parts[0], self.parts[1]),
            Category::DyadInChannel => {
                format!("dyad_in_channel:{}:{}:{}", self.parts[0], self.parts[1], self.parts[2])
            }
            Category::Subject => format!("subject:{}", self.parts[0]),
            Category::Emoji => format!("emoji:{}", self.parts[0]),
            Category::SelfTopic => format!("self:{}", self.parts[0]),
        };
        match &self.scope {
            Some(server) => format!("server:{server}:{body}"),
            None => body,
        }
    }

    /// Parse a storage key string back into a `TopicKey`, rejecting any
    /// string that does not match one of the grammar's listed forms.
    pub fn parse(key: &str) -> Result<Self> {
        let (scope, rest) = if let Some(stripped) = key.strip_prefix("server:") {
            let mut parts = stripped.splitn(2, ':');
            let server = parts.next().filter(|s| !s.is_empty());
            let rest = parts.next();
            match (server, rest) {
                (Some(server), Some(rest)) => (Some(server.to_string()), rest),
                _ => return Err(TopicsError::MalformedKey(key.to_string())),
            }
        } else {
            (None, key)
        };

        let mut segs = rest.splitn(2, ':');
        let category_str = segs.next().ok_or_else(|| TopicsError::MalformedKey(key.to_string()))?;
        let tail = segs.next().unwrap_or("");
        let tail_parts: Vec<String> = if tail.is_empty() {
            vec![]
        } else {
            tail.split(':').map(|s| s.to_string()).collect()
        };

        let (category, expected_len, global_allowed) = match category_str {
            "user" => (Category::User, 1, true),
            "dyad" => (Category::Dyad, 2, true),
            "channel" => (Category::Channel, 1, false),
            "thread" => (Category::Thread, 1, false),
            "role" => (Category::Role, 1, false),
            "user_in_channel" => (Category::UserInChannel, 2, false),
            "dyad_in_channel" => (Category::DyadInChannel, 3, false),
            "subject" => (Category::Subject, 1, false),
            "emoji" => (Category::Emoji, 1, false),
            "self" => (Category::SelfTopic, 1, true),
            _ => return Err(TopicsError::MalformedKey(key.to_string())),
        };

        if tail_parts.len() != expected_len || tail_parts.iter().any(|p| p.is_empty()) {
            return Err(TopicsError::MalformedKey(key.to_string()));
        }
        if scope.is_none() && !global_allowed {
            return Err(TopicsError::MalformedKey(key.to_string()));
        }

        let parts = if category == Category::Dyad {
            let (a, b) = sorted_pair(tail_parts[0].clone(), tail_parts[1].clone());
            vec![a, b]
        } else if category == Category::DyadInChannel {
            let (a, b) = sorted_pair(tail_parts[1].clone(), tail_parts[2].clone());
            vec![tail_parts[0].clone(), a, b]
        } else {
            tail_parts
        };

        Ok(Self { category, scope, parts })
    }
}

fn sorted_pair(a: String, b: String) -> (String, String) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dyad_ids_are_sorted_regardless_of_construction_order() {
        let k1 = TopicKey::dyad("zeta", "alpha");
        let k2 = TopicKey::dyad("alpha", "zeta");
        assert_eq!(k1.render(), k2.render());
        assert_eq!(k1.render(), "dyad:alpha:zeta");
    }

    #[test]
    fn server_user_round_trips() {
        let key = TopicKey::server_user("srv-1", "u-1");
        let rendered = key.render();
        assert_eq!(rendered, "server:srv-1:user:u-1");
        let parsed = TopicKey::parse(&rendered).expect("parse");
        assert_eq!(parsed, key);
    }

    #[test]
    fn channel_has_no_global_form() {
        assert!(TopicKey::parse("channel:c-1").is_err());
        assert!(TopicKey::parse("server:srv-1:channel:c-1").is_ok());
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(TopicKey::parse("user").is_err());
        assert!(TopicKey::parse("bogus:x").is_err());
        assert!(TopicKey::parse("server::user:u-1").is_err());
    }
}
