use serde::{Deserialize, Serialize};

use crate::types::conversation::Conversation;

/// Client-side persisted state: the conversation list and the active pointer.
///
/// `items` keeps insertion order so "first conversation" is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalState {
    #[serde(default)]
    pub active_id: Option<String>,
    pub items: Vec<Conversation>,
}

impl LocalState {
    /// State holding exactly one empty conversation, which is active
    pub fn fresh(now_ms: i64) -> Self {
        let conv = Conversation::new(now_ms);
        Self {
            active_id: Some(conv.id.clone()),
            items: vec![conv],
        }
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.items.iter_mut().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn active_mut(&mut self) -> Option<&mut Conversation> {
        let id = self.active_id.clone()?;
        self.get_mut(&id)
    }

    /// Insert or replace by id
    pub fn upsert(&mut self, conv: Conversation) {
        match self.get_mut(&conv.id) {
            Some(existing) => *existing = conv,
            None => self.items.push(conv),
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Conversation> {
        let pos = self.items.iter().position(|c| c.id == id)?;
        Some(self.items.remove(pos))
    }

    pub fn first_id(&self) -> Option<String> {
        self.items.first().map(|c| c.id.clone())
    }

    /// Restore the invariants: `items` is never empty and `active_id`
    /// references a member of `items`. Returns true if anything changed.
    pub fn repair(&mut self, now_ms: i64) -> bool {
        let mut changed = false;
        if self.items.is_empty() {
            let conv = Conversation::new(now_ms);
            self.active_id = Some(conv.id.clone());
            self.items.push(conv);
            changed = true;
        }
        let dangling = match self.active_id.as_deref() {
            Some(id) => !self.contains(id),
            None => true,
        };
        if dangling {
            self.active_id = self.first_id();
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_invariants() {
        let state = LocalState::fresh(1);
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.active().map(|c| c.id.clone()), state.first_id());
    }

    #[test]
    fn test_repair_empty_items() {
        let mut state = LocalState {
            active_id: None,
            items: vec![],
        };
        assert!(state.repair(3));
        assert_eq!(state.items.len(), 1);
        assert!(state.active().is_some());
    }

    #[test]
    fn test_repair_dangling_active_picks_first() {
        let a = Conversation::new(1);
        let b = Conversation::new(2);
        let mut state = LocalState {
            active_id: Some("missing".into()),
            items: vec![a.clone(), b],
        };
        assert!(state.repair(3));
        assert_eq!(state.active_id.as_deref(), Some(a.id.as_str()));
        assert!(!state.repair(4));
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut state = LocalState::fresh(1);
        let mut conv = state.items[0].clone();
        conv.title = "Renamed".into();
        state.upsert(conv);
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items[0].title, "Renamed");
    }
}
