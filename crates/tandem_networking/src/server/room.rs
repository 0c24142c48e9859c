//! Roster and stored state of one room.

use std::collections::HashMap;

/// One room on the hub.
#[derive(Debug, Default)]
pub(super) struct Room {
    members: Vec<String>,
    /// Encoded envelopes in first-seen order; later messages for the same
    /// guid replace the earlier one in place.
    state: Vec<String>,
    state_index: HashMap<String, usize>,
}

impl Room {
    pub(super) fn members(&self) -> &[String] {
        &self.members
    }

    pub(super) fn add_member(&mut self, peer: &str) {
        if !self.members.iter().any(|m| m == peer) {
            self.members.push(peer.to_owned());
        }
    }

    pub(super) fn remove_member(&mut self, peer: &str) {
        self.members.retain(|m| m != peer);
    }

    pub(super) fn state(&self) -> &[String] {
        &self.state
    }

    pub(super) fn state_len(&self) -> usize {
        self.state.len()
    }

    pub(super) fn store(&mut self, guid: String, text: String) {
        match self.state_index.get(&guid) {
            Some(&slot) => self.state[slot] = text,
            None => {
                self.state_index.insert(guid, self.state.len());
                self.state.push(text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_replaces_in_place() {
        let mut room = Room::default();
        room.store("a".into(), "1".into());
        room.store("b".into(), "2".into());
        room.store("a".into(), "3".into());
        assert_eq!(room.state(), ["3", "2"]);
    }

    #[test]
    fn test_members_are_unique() {
        let mut room = Room::default();
        room.add_member("peer-1");
        room.add_member("peer-1");
        room.add_member("peer-2");
        room.remove_member("peer-1");
        assert_eq!(room.members(), ["peer-2"]);
    }
}
