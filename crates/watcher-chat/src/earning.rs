use tracing::{debug, warn};
use watcher_core::config::{EarnWeights, LedgerConfig};
use watcher_ledger::Ledger;
use watcher_store::messages::NewMessage;
use watcher_store::model::VisibilityScope;
use watcher_store::Store;
use watcher_topics::TopicKey;

use crate::error::Result;
use crate::types::{is_anonymous, ChatEvent, ObservedMessage, ObservedReaction, ObservedThread};

/// Applies the earning-rules table of §6: persist the observation, then
/// credit every topic the event touches. One instance is built per tick
/// of the event loop and is cheap to construct — it borrows everything.
pub struct EarningProcessor<'a> {
    store: &'a Store,
    ledger: Ledger<'a>,
    config: &'a LedgerConfig,
    weights: &'a EarnWeights,
}

impl<'a> EarningProcessor<'a> {
    pub fn new(store: &'a Store, ledger: Ledger<'a>, config: &'a LedgerConfig) -> Self {
        Self { store, ledger, config, weights: &config.earn_weights }
    }

    pub fn process(&self, event: &ChatEvent) -> Result<()> {
        match event {
            ChatEvent::MessageAdded(msg) => self.on_message_added(msg),
            ChatEvent::MessageDeleted { id } => self.on_message_deleted(id),
            ChatEvent::ReactionAdded(r) => self.on_reaction(r, self.weights.reaction),
            ChatEvent::ReactionRemoved(r) => self.on_reaction(r, -self.weights.reaction),
            ChatEvent::ThreadCreated(t) => self.on_thread_created(t),
        }
    }

    fn on_message_added(&self, msg: &ObservedMessage) -> Result<()> {
        let (stored, is_new) = self.store.insert_message(NewMessage {
            id: &msg.id,
            channel_id: &msg.channel_id,
            server_id: msg.server_id.as_deref(),
            author_id: msg.author_id.as_deref(),
            content: &msg.content,
            created_at: &msg.created_at,
            visibility_scope: msg.visibility_scope,
            reply_target_id: msg.reply_target_id.as_deref(),
            thread_id: msg.thread_id.as_deref(),
            has_media: msg.has_media,
            has_link: msg.has_link,
        })?;

        if !is_new {
            debug!(message_id = %stored.id, "message already observed, skipping duplicate earn");
            return Ok(());
        }

        let boost = if msg.has_media || msg.has_link { self.weights.media_boost_factor } else { 1.0 };

        if let Some(server) = &msg.server_id {
            if let Some(author) = &msg.author_id {
                if !is_anonymous(author) {
                    let distinct_servers = self.store.record_user_server_activity(author, server)?;
                    watcher_ledger::warm_on_multi_server(self.store, self.config, author, distinct_servers)?;
                }
            }
        }

        if msg.visibility_scope == VisibilityScope::Dm {
            if let Some(author) = &msg.author_id {
                if !is_anonymous(author) {
                    watcher_ledger::warm_on_first_dm(self.store, self.config, author)?;
                }
            }
        }

        let base = if msg.visibility_scope == VisibilityScope::Dm {
            self.weights.dm_message
        } else {
            self.weights.message
        };
        let amount = base * boost;

        let author = match &msg.author_id {
            Some(author) if !is_anonymous(author) => author.clone(),
            Some(_) => {
                debug!(message_id = %stored.id, "anonymous author, skipping individual earn");
                return self.earn_channel_and_thread(msg, amount);
            }
            None => {
                debug!(message_id = %stored.id, "no author id, skipping individual earn");
                return self.earn_channel_and_thread(msg, amount);
            }
        };

        let author_key = match &msg.server_id {
            Some(server) => TopicKey::server_user(server, &author),
            None => TopicKey::user(&author),
        };
        self.ledger.earn(&author_key, amount, "message_added", None)?;

        self.earn_channel_and_thread(msg, amount)?;

        if let Some(reply_to) = &msg.reply_target_id {
            if let Some(parent) = self.store.get_message(reply_to)? {
                if let (Some(server), Some(parent_author)) = (&msg.server_id, &parent.author_id) {
                    if parent_author != &author && !is_anonymous(parent_author) {
                        let dyad = TopicKey::server_dyad(server, &author, parent_author);
                        self.ledger.earn(&dyad, self.weights.reply, "message_reply", Some(&author_key))?;
                    }
                }
            }
        }

        if let Some(server) = &msg.server_id {
            for mentioned in &msg.mentions {
                if mentioned == &author || is_anonymous(mentioned) {
                    continue;
                }
                let mention_key = TopicKey::server_user(server, mentioned);
                self.ledger.earn(&mention_key, self.weights.mention, "message_mention", Some(&author_key))?;
            }
        } else if !msg.mentions.is_empty() {
            warn!(message_id = %stored.id, "mentions present on a DM message with no server scope, skipping mention earn");
        }

        Ok(())
    }

    fn earn_channel_and_thread(&self, msg: &ObservedMessage, amount: f64) -> Result<()> {
        let Some(server) = &msg.server_id else {
            return Ok(());
        };
        let channel_key = TopicKey::server_channel(server, &msg.channel_id);
        self.ledger.earn(&channel_key, amount, "message_added", None)?;

        if let Some(thread_id) = &msg.thread_id {
            let thread_key = TopicKey::server_thread(server, thread_id);
            self.ledger.earn(&thread_key, amount, "message_added", None)?;
        }
        Ok(())
    }

    fn on_message_deleted(&self, id: &str) -> Result<()> {
        self.store.mark_message_deleted(id)?;
        Ok(())
    }

    fn on_reaction(&self, reaction: &ObservedReaction, amount: f64) -> Result<()> {
        let Some(message) = self.store.get_message(&reaction.message_id)? else {
            debug!(message_id = %reaction.message_id, "reaction on unknown message, skipping earn");
            return Ok(());
        };
        let Some(server) = &message.server_id else {
            debug!(message_id = %reaction.message_id, "reaction on a DM message, skipping earn");
            return Ok(());
        };

        if is_anonymous(&reaction.actor_id) {
            debug!(actor = %reaction.actor_id, "anonymous reactor, skipping all reaction earns");
            return Ok(());
        }
        let Some(author) = &message.author_id else {
            debug!(message_id = %reaction.message_id, "reaction on a message with no author, skipping earn");
            return Ok(());
        };
        if is_anonymous(author) {
            debug!(message_id = %reaction.message_id, "anonymous author, skipping all reaction earns");
            return Ok(());
        }

        let actor_key = TopicKey::server_user(server, &reaction.actor_id);
        self.ledger.earn(&actor_key, amount, "reaction", None)?;

        let author_key = TopicKey::server_user(server, author);
        self.ledger.earn(&author_key, amount, "reaction", None)?;

        if author != &reaction.actor_id {
            let dyad = TopicKey::server_dyad(server, author, &reaction.actor_id);
            self.ledger.earn(&dyad, amount, "reaction", None)?;
        }

        if reaction.is_custom {
            let emoji_key = TopicKey::server_emoji(server, &reaction.emoji);
            self.ledger.earn(&emoji_key, amount, "reaction", None)?;
        }

        Ok(())
    }

    fn on_thread_created(&self, thread: &ObservedThread) -> Result<()> {
        let Some(server) = &thread.server_id else {
            debug!(thread_id = %thread.id, "thread created outside a server, skipping earn");
            return Ok(());
        };

        let thread_key = TopicKey::server_thread(server, &thread.id);
        self.ledger.earn(&thread_key, self.weights.thread_create, "thread_created", None)?;

        if !is_anonymous(&thread.creator_id) {
            let creator_key = TopicKey::server_user(server, &thread.creator_id);
            self.ledger.earn(&creator_key, self.weights.thread_create, "thread_created", None)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use watcher_core::config::LedgerConfig;
    use watcher_topics::TopicRegistry;

    fn setup() -> (Arc<Store>, TopicRegistry, LedgerConfig) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let topics = TopicRegistry::new(store.clone());
        (store, topics, LedgerConfig::default())
    }

    fn sample_message(id: &str) -> ObservedMessage {
        ObservedMessage {
            id: id.to_string(),
            channel_id: "chan-1".to_string(),
            server_id: Some("server-1".to_string()),
            author_id: Some("user-a".to_string()),
            content: "hello".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            visibility_scope: VisibilityScope::Public,
            reply_target_id: None,
            thread_id: None,
            has_media: false,
            has_link: false,
            mentions: vec![],
        }
    }

    #[test]
    fn message_added_credits_author_and_channel() {
        let (store, topics, cfg) = setup();
        let ledger = Ledger::new(&store, &topics, &cfg);
        let processor = EarningProcessor::new(&store, ledger, &cfg);

        processor.process(&ChatEvent::MessageAdded(sample_message("m1"))).unwrap();

        let author_balance = store.topic_balance(&TopicKey::server_user("server-1", "user-a").render()).unwrap();
        let channel_balance = store.topic_balance(&TopicKey::server_channel("server-1", "chan-1").render()).unwrap();
        assert!(author_balance > 0.0);
        assert!(channel_balance > 0.0);
    }

    #[test]
    fn processing_the_same_message_id_twice_does_not_double_earn() {
        let (store, topics, cfg) = setup();
        let ledger = Ledger::new(&store, &topics, &cfg);
        let processor = EarningProcessor::new(&store, ledger, &cfg);

        processor.process(&ChatEvent::MessageAdded(sample_message("m-dup"))).unwrap();
        let balance_after_first = store.topic_balance(&TopicKey::server_user("server-1", "user-a").render()).unwrap();

        processor.process(&ChatEvent::MessageAdded(sample_message("m-dup"))).unwrap();
        let balance_after_second = store.topic_balance(&TopicKey::server_user("server-1", "user-a").render()).unwrap();

        assert_eq!(balance_after_first, balance_after_second);
    }

    #[test]
    fn anonymous_author_skips_individual_earn_but_channel_still_earns() {
        let (store, topics, cfg) = setup();
        let ledger = Ledger::new(&store, &topics, &cfg);
        let processor = EarningProcessor::new(&store, ledger, &cfg);

        let mut msg = sample_message("m2");
        msg.author_id = Some("anon:1".to_string());
        processor.process(&ChatEvent::MessageAdded(msg)).unwrap();

        let channel_balance = store.topic_balance(&TopicKey::server_channel("server-1", "chan-1").render()).unwrap();
        assert!(channel_balance > 0.0);
    }

    #[test]
    fn media_message_earns_more_than_plain_text() {
        let (store, topics, cfg) = setup();
        let ledger = Ledger::new(&store, &topics, &cfg);
        let processor = EarningProcessor::new(&store, ledger, &cfg);

        let mut msg = sample_message("m3");
        msg.has_media = true;
        msg.author_id = Some("user-b".to_string());
        processor.process(&ChatEvent::MessageAdded(msg)).unwrap();

        let balance = store.topic_balance(&TopicKey::server_user("server-1", "user-b").render()).unwrap();
        assert!(balance > cfg.earn_weights.message);
    }

    #[test]
    fn message_deleted_soft_deletes_without_earning() {
        let (store, topics, cfg) = setup();
        let ledger = Ledger::new(&store, &topics, &cfg);
        let processor = EarningProcessor::new(&store, ledger, &cfg);

        let (stored, _) = store
            .insert_message(NewMessage {
                id: "m-del-1",
                channel_id: "chan-1",
                server_id: Some("server-1"),
                author_id: Some("user-a"),
                content: "bye",
                created_at: "2026-01-01T00:00:00Z",
                visibility_scope: VisibilityScope::Public,
                reply_target_id: None,
                thread_id: None,
                has_media: false,
                has_link: false,
            })
            .unwrap();

        processor.process(&ChatEvent::MessageDeleted { id: stored.id.clone() }).unwrap();

        let fetched = store.get_message(&stored.id).unwrap().unwrap();
        assert!(fetched.deleted_at.is_some());
    }

    #[test]
    fn first_dm_message_warms_the_global_user_topic() {
        let (store, topics, cfg) = setup();
        let ledger = Ledger::new(&store, &topics, &cfg);
        let processor = EarningProcessor::new(&store, ledger, &cfg);

        let mut msg = sample_message("m-dm");
        msg.server_id = None;
        msg.channel_id = "dm-channel".to_string();
        msg.visibility_scope = VisibilityScope::Dm;
        processor.process(&ChatEvent::MessageAdded(msg)).unwrap();

        let balance = store.topic_balance(&TopicKey::user("user-a").render()).unwrap();
        assert!(balance > cfg.warm_threshold, "expected global user topic to be warm after first DM");
    }

    #[test]
    fn activity_in_two_distinct_servers_warms_the_global_user_topic() {
        let (store, topics, cfg) = setup();
        let ledger = Ledger::new(&store, &topics, &cfg);
        let processor = EarningProcessor::new(&store, ledger, &cfg);

        let mut msg = sample_message("m-s1");
        msg.server_id = Some("server-1".to_string());
        processor.process(&ChatEvent::MessageAdded(msg)).unwrap();
        assert_eq!(store.topic_balance(&TopicKey::user("user-a").render()).unwrap(), 0.0);

        let mut msg = sample_message("m-s2");
        msg.server_id = Some("server-2".to_string());
        processor.process(&ChatEvent::MessageAdded(msg)).unwrap();

        let balance = store.topic_balance(&TopicKey::user("user-a").render()).unwrap();
        assert!(balance > cfg.warm_threshold, "expected global user topic to be warm after second server");
    }

    #[test]
    fn reaction_on_dm_message_is_skipped() {
        let (store, topics, cfg) = setup();
        let ledger = Ledger::new(&store, &topics, &cfg);
        let processor = EarningProcessor::new(&store, ledger, &cfg);

        let (stored, _) = store
            .insert_message(NewMessage {
                id: "m-dm-reaction-1",
                channel_id: "dm-1",
                server_id: None,
                author_id: Some("user-a"),
                content: "hi",
                created_at: "2026-01-01T00:00:00Z",
                visibility_scope: VisibilityScope::Dm,
                reply_target_id: None,
                thread_id: None,
                has_media: false,
                has_link: false,
            })
            .unwrap();

        // Should not error even though there's no server scope to earn into.
        processor
            .process(&ChatEvent::ReactionAdded(ObservedReaction {
                message_id: stored.id,
                actor_id: "user-b".to_string(),
                emoji: "thumbsup".to_string(),
                is_custom: false,
            }))
            .unwrap();
    }

    #[test]
    fn anonymous_reactor_custom_emoji_earns_nothing_at_all() {
        let (store, topics, cfg) = setup();
        let ledger = Ledger::new(&store, &topics, &cfg);
        let processor = EarningProcessor::new(&store, ledger, &cfg);

        let (stored, _) = store
            .insert_message(NewMessage {
                id: "m-anon-reaction-1",
                channel_id: "chan-1",
                server_id: Some("server-1"),
                author_id: Some("user-a"),
                content: "hi",
                created_at: "2026-01-01T00:00:00Z",
                visibility_scope: VisibilityScope::Public,
                reply_target_id: None,
                thread_id: None,
                has_media: false,
                has_link: false,
            })
            .unwrap();

        processor
            .process(&ChatEvent::ReactionAdded(ObservedReaction {
                message_id: stored.id,
                actor_id: "anon:1".to_string(),
                emoji: "party_parrot".to_string(),
                is_custom: true,
            }))
            .unwrap();

        let author_balance = store.topic_balance(&TopicKey::server_user("server-1", "user-a").render()).unwrap();
        let emoji_balance = store.topic_balance(&TopicKey::server_emoji("server-1", "party_parrot").render()).unwrap();
        assert_eq!(author_balance, 0.0, "anonymous reactor must not credit the author either");
        assert_eq!(emoji_balance, 0.0, "anonymous reactor must not credit the custom emoji topic");
    }
}
