use crate::types::{ConversationMessage, ConversationRole, ConversationThread};

/// Rough token estimate: ~4 characters per token, matching the cheap
/// estimators used by chat-API clients when no tokenizer is vendored.
pub fn estimate_tokens(content: &str) -> usize {
    (content.chars().count() / 4).max(1)
}

impl ConversationThread {
    pub fn new(id: impl Into<String>, bounds: crate::types::ConversationBounds) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            token_estimate: 0,
            bounds,
        }
    }

    /// Appends a message, then prunes if any bound is exceeded.
    pub fn append(&mut self, message: ConversationMessage) {
        self.token_estimate += estimate_tokens(&message.content);
        self.messages.push(message);
        self.prune();
    }

    /// Pruning policy:
    /// 1. Never drop the first message if it is a system message.
    /// 2. Never drop the most recent `preserved_recent` messages.
    /// 3. Drop oldest remaining messages first; also drop messages older
    ///    than `max_age`.
    /// 4. After each drop, recompute `token_estimate`; stop when all bounds
    ///    are satisfied.
    pub fn prune(&mut self) {
        loop {
            if self.within_bounds() {
                return;
            }
            let droppable_start = self.first_non_system_index();
            let droppable_end = self.messages.len().saturating_sub(self.bounds.preserved_recent);

            if droppable_start >= droppable_end {
                // Nothing left we're allowed to drop; bounds may stay violated
                // (e.g. a single oversized recent message).
                return;
            }

            if let Some(stale_idx) = self.oldest_stale_index(droppable_start, droppable_end) {
                self.remove_at(stale_idx);
                continue;
            }

            self.remove_at(droppable_start);
        }
    }

    fn within_bounds(&self) -> bool {
        self.messages.len() <= self.bounds.max_messages && self.token_estimate <= self.bounds.max_tokens
    }

    fn first_non_system_index(&self) -> usize {
        match self.messages.first() {
            Some(m) if m.role == ConversationRole::System => 1,
            _ => 0,
        }
    }

    fn oldest_stale_index(&self, start: usize, end: usize) -> Option<usize> {
        let now = chrono::Utc::now();
        (start..end).find(|&i| {
            chrono::DateTime::parse_from_rfc3339(&self.messages[i].timestamp)
                .map(|ts| (now - ts.with_timezone(&chrono::Utc)).num_seconds() > self.bounds.max_age_seconds)
                .unwrap_or(false)
        })
    }

    fn remove_at(&mut self, index: usize) {
        let removed = self.messages.remove(index);
        self.token_estimate = self.token_estimate.saturating_sub(estimate_tokens(&removed.content));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConversationBounds;

    fn msg(role: ConversationRole, content: &str, timestamp: &str) -> ConversationMessage {
        ConversationMessage {
            role,
            content: content.to_string(),
            tool_calls: Vec::new(),
            timestamp: timestamp.to_string(),
        }
    }

    #[test]
    fn system_message_always_preserved() {
        let bounds = ConversationBounds {
            max_messages: 3,
            max_tokens: 1_000_000,
            preserved_recent: 1,
            preserved_system: 1,
            max_age_seconds: 3600,
        };
        let mut thread = ConversationThread::new("t1", bounds);
        thread.append(msg(ConversationRole::System, "you are an agent", "2026-01-01T00:00:00Z"));
        for i in 0..10 {
            thread.append(msg(ConversationRole::User, &format!("turn {i}"), "2026-01-01T00:00:10Z"));
        }
        assert_eq!(thread.messages.first().unwrap().role, ConversationRole::System);
        assert!(thread.messages.len() <= bounds_len(&thread));
    }

    fn bounds_len(thread: &ConversationThread) -> usize {
        thread.bounds.max_messages
    }

    #[test]
    fn preserved_recent_survive_pruning() {
        let bounds = ConversationBounds {
            max_messages: 5,
            max_tokens: 1_000_000,
            preserved_recent: 3,
            preserved_system: 1,
            max_age_seconds: 3600,
        };
        let mut thread = ConversationThread::new("t1", bounds);
        for i in 0..20 {
            thread.append(msg(ConversationRole::User, &format!("turn {i}"), "2026-01-01T00:00:10Z"));
        }
        let tail: Vec<&str> = thread.messages[thread.messages.len() - 3..]
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(tail, vec!["turn 17", "turn 18", "turn 19"]);
    }

    #[test]
    fn token_estimate_never_exceeds_max_after_pruning() {
        let bounds = ConversationBounds {
            max_messages: 1000,
            max_tokens: 50,
            preserved_recent: 2,
            preserved_system: 1,
            max_age_seconds: 3600,
        };
        let mut thread = ConversationThread::new("t1", bounds);
        for i in 0..50 {
            thread.append(msg(
                ConversationRole::User,
                &format!("this is turn number {i} with some padding text"),
                "2026-01-01T00:00:10Z",
            ));
        }
        assert!(thread.token_estimate <= 50 || thread.messages.len() <= bounds.preserved_recent + 1);
    }

    #[test]
    fn append_at_exactly_max_messages_triggers_one_drop() {
        let bounds = ConversationBounds {
            max_messages: 5,
            max_tokens: 1_000_000,
            preserved_recent: 1,
            preserved_system: 0,
            max_age_seconds: 3600,
        };
        let mut thread = ConversationThread::new("t1", bounds);
        for i in 0..5 {
            thread.append(msg(ConversationRole::User, &format!("turn {i}"), "2026-01-01T00:00:10Z"));
        }
        assert_eq!(thread.messages.len(), 5);
        thread.append(msg(ConversationRole::User, "turn 5", "2026-01-01T00:00:10Z"));
        assert_eq!(thread.messages.len(), 5);
    }
}
