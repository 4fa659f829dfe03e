use crate::player::PlayerId;

/// Members of one lobby. The lobby's name is its key in the relay's lobby map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lobby {
    /// Member ids in join order.
    pub members: Vec<PlayerId>,
}

impl Lobby {
    pub fn new(founder: PlayerId) -> Self {
        Self {
            members: vec![founder],
        }
    }

    /// Append a member unless already present.
    pub fn add(&mut self, id: PlayerId) {
        if !self.contains(&id) {
            self.members.push(id);
        }
    }

    pub fn remove(&mut self, id: &str) {
        self.members.retain(|m| m != id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|m| m == id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
