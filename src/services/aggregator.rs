use crate::domain::{Message, ThreadSummary};
use std::collections::HashMap;
use uuid::Uuid;

/// Label used when a conversation has no reply yet and the counterpart's
/// display label cannot be resolved from any message in the group.
pub const FALLBACK_LABEL: &str = "user";

/// Collapses a flat message set into per-conversation thread summaries as
/// seen by `me`.
///
/// The caller must have filtered the input to messages involving `me`;
/// grouping is by conversation key alone, so a conversation key therefore
/// means "this conversation from my perspective", not a globally unique
/// thread. If three or more parties ever message under one key, their
/// messages to and from `me` collapse into a single thread labelled with
/// whichever counterpart was seen most recently.
///
/// Deterministic: ordering inside each group is by `created_at` descending
/// with the id as tie-break, and the output is ordered by the latest
/// message per thread with the same tie-break, so any permutation of the
/// input yields the same sequence.
#[must_use]
pub fn aggregate<'a, I>(messages: I, me: Uuid, my_label: Option<&str>) -> Vec<ThreadSummary>
where
    I: IntoIterator<Item = &'a Message>,
{
    let mut groups: HashMap<Uuid, Vec<&Message>> = HashMap::new();
    for message in messages {
        groups.entry(message.conversation_key).or_default().push(message);
    }

    let mut threads: Vec<ThreadSummary> = groups
        .into_iter()
        .filter_map(|(conversation_key, mut group)| {
            // Newest first; id ascending keeps equal timestamps stable.
            group.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

            let latest = (*group.first()?).clone();
            let has_unread = group.iter().any(|m| m.is_unread_for(me));
            let counterpart_label = resolve_counterpart_label(&group, me, my_label);

            // A store row can record `me` on both sides; such a group
            // resolves to my own label and is not a conversation.
            if my_label.is_some() && my_label == Some(counterpart_label.as_str()) {
                return None;
            }

            Some(ThreadSummary { conversation_key, latest, has_unread, counterpart_label })
        })
        .collect();

    threads.sort_by(|a, b| {
        b.latest.created_at.cmp(&a.latest.created_at).then(a.latest.id.cmp(&b.latest.id))
    });

    threads
}

/// Newest-to-oldest scan for the display label of the first message not
/// authored by `me` (rows with no sender id recorded count as the other
/// side). When only `me` has spoken, the recipient's label is the only
/// fallback, and the one label resolvable locally is my own; anything else
/// gets the sentinel.
fn resolve_counterpart_label(group: &[&Message], me: Uuid, my_label: Option<&str>) -> String {
    if let Some(label) = group.iter().find(|m| m.from_user != Some(me)).and_then(|m| m.from_label.clone()) {
        return label;
    }

    if group.iter().any(|m| m.to_user == Some(me))
        && let Some(label) = my_label
    {
        return label.to_string();
    }

    FALLBACK_LABEL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn msg(
        id: u128,
        created_at: i64,
        conversation_key: Uuid,
        from: Option<Uuid>,
        to: Option<Uuid>,
        from_label: Option<&str>,
        read_at: Option<i64>,
    ) -> Message {
        Message {
            id: Uuid::from_u128(id),
            created_at: OffsetDateTime::from_unix_timestamp(created_at).expect("valid timestamp"),
            conversation_key,
            from_user: from,
            to_user: to,
            from_label: from_label.map(str::to_string),
            body: format!("body {id}"),
            read_at: read_at.map(|t| OffsetDateTime::from_unix_timestamp(t).expect("valid timestamp")),
        }
    }

    fn me() -> Uuid {
        Uuid::from_u128(1)
    }

    fn other() -> Uuid {
        Uuid::from_u128(2)
    }

    #[test]
    fn two_message_conversation_summarizes_latest_and_unread() {
        let key = Uuid::from_u128(100);
        let messages = vec![
            msg(10, 1000, key, Some(me()), Some(other()), Some("me@example.com"), None),
            msg(11, 2000, key, Some(other()), Some(me()), Some("bob@example.com"), None),
        ];

        let threads = aggregate(&messages, me(), Some("me@example.com"));

        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].conversation_key, key);
        assert_eq!(threads[0].latest.id, Uuid::from_u128(11));
        assert!(threads[0].has_unread);
        assert_eq!(threads[0].counterpart_label, "bob@example.com");
    }

    #[test]
    fn input_order_does_not_change_output() {
        let key_a = Uuid::from_u128(100);
        let key_b = Uuid::from_u128(101);
        let mut messages = vec![
            msg(10, 1000, key_a, Some(other()), Some(me()), Some("a@example.com"), Some(1500)),
            msg(11, 3000, key_a, Some(me()), Some(other()), Some("me@example.com"), None),
            msg(12, 2000, key_b, Some(other()), Some(me()), Some("b@example.com"), None),
            msg(13, 2500, key_b, Some(me()), Some(other()), Some("me@example.com"), None),
        ];

        let forward = aggregate(&messages, me(), Some("me@example.com"));
        messages.reverse();
        let backward = aggregate(&messages, me(), Some("me@example.com"));

        let keys = |threads: &[ThreadSummary]| threads.iter().map(|t| t.conversation_key).collect::<Vec<_>>();
        assert_eq!(keys(&forward), keys(&backward));
        assert_eq!(keys(&forward), vec![key_a, key_b]);
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let key = Uuid::from_u128(100);
        let messages = vec![
            msg(20, 1000, key, Some(other()), Some(me()), Some("first@example.com"), None),
            msg(21, 1000, key, Some(other()), Some(me()), Some("second@example.com"), None),
        ];

        let threads = aggregate(&messages, me(), None);
        assert_eq!(threads[0].latest.id, Uuid::from_u128(20));
        assert_eq!(threads[0].counterpart_label, "first@example.com");
    }

    #[test]
    fn unreplied_conversation_gets_sentinel_label() {
        let key = Uuid::from_u128(100);
        let messages =
            vec![msg(30, 1000, key, Some(me()), Some(other()), Some("me@example.com"), None)];

        let threads = aggregate(&messages, me(), Some("me@example.com"));
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].counterpart_label, FALLBACK_LABEL);
        assert!(!threads[0].has_unread);
    }

    #[test]
    fn self_conversation_is_dropped() {
        let key = Uuid::from_u128(100);
        let messages = vec![msg(40, 1000, key, Some(me()), Some(me()), Some("me@example.com"), None)];

        let threads = aggregate(&messages, me(), Some("me@example.com"));
        assert!(threads.is_empty());
    }

    #[test]
    fn read_messages_clear_unread_flag() {
        let key = Uuid::from_u128(100);
        let messages = vec![
            msg(50, 1000, key, Some(other()), Some(me()), Some("bob@example.com"), Some(1100)),
            msg(51, 2000, key, Some(other()), Some(me()), Some("bob@example.com"), Some(2100)),
        ];

        let threads = aggregate(&messages, me(), None);
        assert!(!threads[0].has_unread);
    }

    #[test]
    fn multi_party_key_collapses_to_latest_counterpart() {
        let key = Uuid::from_u128(100);
        let third = Uuid::from_u128(3);
        let messages = vec![
            msg(60, 1000, key, Some(other()), Some(me()), Some("bob@example.com"), None),
            msg(61, 2000, key, Some(third), Some(me()), Some("carol@example.com"), None),
        ];

        let threads = aggregate(&messages, me(), None);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].counterpart_label, "carol@example.com");
    }
}
