use std::collections::HashSet;

use lantern_core::types::{ChatMessage, Message, MessageId};
use lantern_session::ConversationStore;

/// Outcome of a pruning pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    /// Messages still flagged for inclusion, the current user turn among them
    pub retained: usize,
    pub excluded: usize,
    /// Character total of the included messages after pruning
    pub total_token: usize,
}

/// Build the chronological history for a turn.
///
/// Skips the placeholder, empty messages and anything excluded from context.
pub fn build_context(messages_newest_first: &[Message], placeholder_id: &str) -> Vec<ChatMessage> {
    messages_newest_first
        .iter()
        .rev()
        .filter(|m| m.id != placeholder_id && m.has_text() && m.include_in_context)
        .map(Message::to_chat_message)
        .collect()
}

/// Ids that survive pruning: the current user message plus the `keep_latest`
/// most recent other messages with text.
///
/// Eligibility ignores the existing include flags, so a message excluded by
/// an earlier pass can come back if it is among the most recent.
pub fn select_survivors(
    chronological: &[Message],
    current_user_id: &str,
    placeholder_id: &str,
    keep_latest: usize,
) -> HashSet<MessageId> {
    let eligible: Vec<&Message> = chronological
        .iter()
        .filter(|m| m.id != placeholder_id && m.id != current_user_id && m.has_text())
        .collect();

    let skip = eligible.len().saturating_sub(keep_latest);
    let mut survivors: HashSet<MessageId> =
        eligible[skip..].iter().map(|m| m.id.clone()).collect();
    survivors.insert(current_user_id.to_string());
    survivors
}

/// Exclude all but the most recent context from future requests and annotate
/// every message with the resulting character total.
///
/// The placeholder text is reset so the retry starts from an empty reply.
pub fn prune_context(
    store: &ConversationStore,
    current_user_id: &str,
    placeholder_id: &str,
    keep_latest: usize,
) -> PruneReport {
    store.update_by_id(placeholder_id, |m| m.text.clear());

    let survivors = select_survivors(
        &store.chronological(),
        current_user_id,
        placeholder_id,
        keep_latest,
    );

    let mut retained = 0;
    let mut excluded = 0;
    store.update_all(|m| {
        if m.id == placeholder_id || !m.has_text() {
            return;
        }
        m.include_in_context = survivors.contains(&m.id);
        if m.include_in_context {
            retained += 1;
        } else {
            excluded += 1;
        }
    });

    let total_token = store.total_token();
    store.update_all(|m| m.remain_tokens = Some(total_token));

    PruneReport {
        retained,
        excluded,
        total_token,
    }
}
