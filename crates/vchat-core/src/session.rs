//! Chat session state
//!
//! Owned by one `ChatSession` controller and mutated only through it.
//! Readers get clones of this value.

use serde::{Deserialize, Serialize};

use crate::{Message, WireMessage};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub transcript: Vec<Message>,
    /// True exactly while one request is in flight
    pub is_loading: bool,
    pub error: Option<String>,
    /// Profile id used when `send` gets no override
    pub selected_model: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.transcript.iter().find(|m| m.id == id)
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.transcript.iter_mut().find(|m| m.id == id)
    }

    pub fn last(&self) -> Option<&Message> {
        self.transcript.last()
    }

    pub fn len(&self) -> usize {
        self.transcript.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }

    /// Append a user turn and its reply placeholder as one unit
    pub fn push_exchange(&mut self, user: Message, placeholder: Message) {
        self.transcript.push(user);
        self.transcript.push(placeholder);
    }

    pub fn append_to(&mut self, id: &str, delta: &str) -> bool {
        match self.message_mut(id) {
            Some(msg) => {
                msg.append(delta);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let idx = self.transcript.iter().position(|m| m.id == id)?;
        Some(self.transcript.remove(idx))
    }

    /// Drop a placeholder that never received content. Partial replies stay.
    pub fn discard_if_empty(&mut self, id: &str) -> bool {
        if self.message(id).is_some_and(Message::is_empty) {
            self.remove(id);
            return true;
        }
        false
    }

    /// Transcript reduced to the role/content pairs the completion endpoint expects
    pub fn wire_history(&self) -> Vec<WireMessage> {
        self.transcript.iter().map(WireMessage::from).collect()
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }

    pub fn clear(&mut self) {
        self.transcript.clear();
        self.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    #[test]
    fn exchange_is_user_then_placeholder() {
        let mut state = SessionState::new();
        state.push_exchange(Message::user("hi", None), Message::placeholder(None));

        assert_eq!(state.len(), 2);
        assert_eq!(state.transcript[0].role, Role::User);
        assert_eq!(state.transcript[1].role, Role::Assistant);
        assert!(state.transcript[1].is_empty());
    }

    #[test]
    fn discard_if_empty_keeps_partial_content() {
        let mut state = SessionState::new();
        let empty = Message::placeholder(None);
        let partial = Message::placeholder(None);
        let (empty_id, partial_id) = (empty.id.clone(), partial.id.clone());
        state.push_exchange(Message::user("a", None), empty);
        state.push_exchange(Message::user("b", None), partial);
        state.append_to(&partial_id, "half an ans");

        assert!(state.discard_if_empty(&empty_id));
        assert!(!state.discard_if_empty(&partial_id));
        assert_eq!(state.len(), 3);
        assert_eq!(state.last().map(|m| m.content.as_str()), Some("half an ans"));
    }

    #[test]
    fn wire_history_keeps_order() {
        let mut state = SessionState::new();
        state.push_exchange(Message::user("one", None), Message::placeholder(None));
        let reply_id = state.transcript[1].id.clone();
        state.append_to(&reply_id, "two");

        let history = state.wire_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "one");
        assert_eq!(history[1].content, "two");
    }

    #[test]
    fn append_to_unknown_id_is_a_no_op() {
        let mut state = SessionState::new();
        assert!(!state.append_to("missing", "x"));
        assert!(state.is_empty());
    }
}
