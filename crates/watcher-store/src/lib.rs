pub mod calls;
pub mod connection;
pub mod error;
pub mod insights;
pub mod ledger;
pub mod messages;
pub mod migrations;
pub mod model;
pub mod runs;
pub mod scheduler_state;
pub mod subject_source;
pub mod topics;
pub mod user_server;

pub use calls::NewCall;
pub use connection::Store;
pub use error::{Result, StoreError};
pub use insights::NewInsight;
pub use ledger::SpendOutcome;
pub use messages::NewMessage;
pub use runs::RunStatsSummary;
pub use subject_source::SubjectSourceLink;

#[cfg(test)]
mod tests {
    use super::*;
    use model::{TxnKind, VisibilityScope};

    #[test]
    fn migrations_apply_cleanly_in_memory() {
        let store = Store::open_in_memory().expect("open");
        let topic = store.upsert_topic("user:abc", "user", "global", false).expect("upsert");
        assert_eq!(topic.key, "user:abc");
        assert!(!topic.provisional);
    }

    #[test]
    fn ledger_balance_sums_entries() {
        let store = Store::open_in_memory().expect("open");
        store.upsert_topic("user:abc", "user", "global", false).expect("upsert");
        store
            .append_ledger_entry("user:abc", TxnKind::Earn, 1.0, "message", None)
            .expect("earn");
        store
            .append_ledger_entry("user:abc", TxnKind::Spend, -0.3, "insight", None)
            .expect("spend");
        assert_eq!(store.topic_balance("user:abc").expect("balance"), 0.7);
    }

    fn sample_new_message(id: &str) -> NewMessage<'_> {
        NewMessage {
            id,
            channel_id: "chan-1",
            server_id: Some("srv-1"),
            author_id: Some("user:abc"),
            content: "hello",
            created_at: "2026-01-01T00:00:00Z",
            visibility_scope: VisibilityScope::Public,
            reply_target_id: None,
            thread_id: None,
            has_media: false,
            has_link: false,
        }
    }

    #[test]
    fn messages_round_trip_and_soft_delete() {
        let store = Store::open_in_memory().expect("open");
        let (msg, is_new) = store.insert_message(sample_new_message("m-1")).expect("insert");
        assert!(is_new);
        assert_eq!(msg.id, "m-1");
        assert!(store.get_message(&msg.id).expect("get").is_some());
        store.mark_message_deleted(&msg.id).expect("delete");
        let reloaded = store.get_message(&msg.id).expect("get").unwrap();
        assert!(reloaded.deleted_at.is_some());
    }

    #[test]
    fn inserting_the_same_message_id_twice_is_a_no_op() {
        let store = Store::open_in_memory().expect("open");
        let (first, is_new) = store.insert_message(sample_new_message("m-dup")).expect("insert");
        assert!(is_new);
        let (second, is_new_again) = store.insert_message(sample_new_message("m-dup")).expect("insert");
        assert!(!is_new_again);
        assert_eq!(first.id, second.id);
        assert_eq!(first.ingested_at, second.ingested_at);
    }

    #[test]
    fn user_server_activity_counts_distinct_servers() {
        let store = Store::open_in_memory().expect("open");
        let count = store.record_user_server_activity("user:abc", "srv-1").expect("record");
        assert_eq!(count, 1);
        let count = store.record_user_server_activity("user:abc", "srv-2").expect("record");
        assert_eq!(count, 2);
        let count = store.record_user_server_activity("user:abc", "srv-2").expect("record");
        assert_eq!(count, 2);
    }

    #[test]
    fn scheduler_state_round_trips_and_survives_restart() {
        let store = Store::open_in_memory().expect("open");
        assert!(store.get_scheduler_state("reflect_user").expect("get").is_none());
        store
            .record_layer_fire("reflect_user", Some("2026-01-02T00:00:00Z"))
            .expect("record fire");
        let state = store.get_scheduler_state("reflect_user").expect("get").unwrap();
        assert!(state.last_fired_at.is_some());
        assert_eq!(state.next_fire_at.as_deref(), Some("2026-01-02T00:00:00Z"));
    }
}
