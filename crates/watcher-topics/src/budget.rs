use watcher_store::model::Topic;
use watcher_store::Store;

use crate::error::Result;
use crate::key::Category;
use crate::key::TopicKey;

/// The six budget groups of §4.B, used by selection (§4.C) to partition a
/// reflection run's total budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BudgetGroup {
    Social,
    Global,
    Spaces,
    Semantic,
    Culture,
    SelfGroup,
}

impl BudgetGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetGroup::Social => "social",
            BudgetGroup::Global => "global",
            BudgetGroup::Spaces => "spaces",
            BudgetGroup::Semantic => "semantic",
            BudgetGroup::Culture => "culture",
            BudgetGroup::SelfGroup => "self",
        }
    }

    /// Parse a layer's `target_category` field back into a group. Used by
    /// the scheduler, which addresses groups by name rather than by topic.
    pub fn parse(raw: &str) -> Option<BudgetGroup> {
        match raw {
            "social" => Some(BudgetGroup::Social),
            "global" => Some(BudgetGroup::Global),
            "spaces" => Some(BudgetGroup::Spaces),
            "semantic" => Some(BudgetGroup::Semantic),
            "culture" => Some(BudgetGroup::Culture),
            "self" => Some(BudgetGroup::SelfGroup),
            _ => None,
        }
    }
}

/// Classify a topic key into its budget group per the §4.B table.
pub fn classify(key: &TopicKey) -> BudgetGroup {
    match (key.category, key.is_global()) {
        (Category::SelfTopic, _) => BudgetGroup::SelfGroup,
        (Category::User, true) => BudgetGroup::Global,
        (Category::Dyad, true) => BudgetGroup::Global,
        (Category::User, false) => BudgetGroup::Social,
        (Category::Dyad, false) => BudgetGroup::Social,
        (Category::UserInChannel, false) => BudgetGroup::Social,
        (Category::DyadInChannel, false) => BudgetGroup::Social,
        (Category::Channel, false) => BudgetGroup::Spaces,
        (Category::Thread, false) => BudgetGroup::Spaces,
        (Category::Subject, false) => BudgetGroup::Semantic,
        (Category::Role, false) => BudgetGroup::Semantic,
        (Category::Emoji, false) => BudgetGroup::Culture,
        // Every remaining combination (e.g. channel with no scope) is
        // unreachable once a key has passed `TopicKey::parse`.
        _ => BudgetGroup::Social,
    }
}

/// All topics currently stored that classify into `group`, used by budget
/// selection to enumerate candidates without a denormalized group column.
pub fn topics_in_group(store: &Store, group: BudgetGroup) -> Result<Vec<Topic>> {
    let mut out = Vec::new();
    match group {
        BudgetGroup::Global => {
            for category in ["user", "dyad"] {
                out.extend(
                    store
                        .list_topics_by_category(category)?
                        .into_iter()
                        .filter(|t| t.scope == "global"),
                );
            }
        }
        BudgetGroup::Social => {
            for category in ["user", "dyad", "user_in_channel", "dyad_in_channel"] {
                out.extend(
                    store
                        .list_topics_by_category(category)?
                        .into_iter()
                        .filter(|t| t.scope != "global"),
                );
            }
        }
        BudgetGroup::Spaces => {
            for category in ["channel", "thread"] {
                out.extend(store.list_topics_by_category(category)?);
            }
        }
        BudgetGroup::Semantic => {
            for category in ["subject", "role"] {
                out.extend(store.list_topics_by_category(category)?);
            }
        }
        BudgetGroup::Culture => {
            out.extend(store.list_topics_by_category("emoji")?);
        }
        BudgetGroup::SelfGroup => {
            out.extend(store.list_topics_by_category("self")?);
        }
    }
    Ok(out)
}
