use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use vetting_workflow::ParticipantId;

/// Durable set of participants barred from joining.
///
/// Filled by critical-violation escalation, emptied only by explicit
/// reactivation from the final authority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictedSet {
    ids: BTreeSet<ParticipantId>,
}

impl RestrictedSet {
    /// Returns `false` if the participant was already restricted
    pub fn restrict(&mut self, id: ParticipantId) -> bool {
        self.ids.insert(id)
    }

    /// Returns `false` if the participant was not restricted
    pub fn reactivate(&mut self, id: &ParticipantId) -> bool {
        self.ids.remove(id)
    }

    #[must_use]
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.ids.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticipantId> {
        self.ids.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restrict_and_reactivate() {
        let mut set = RestrictedSet::default();
        let id = ParticipantId::from("r1");
        assert!(set.restrict(id.clone()));
        assert!(!set.restrict(id.clone()));
        assert!(set.contains(&id));
        assert!(set.reactivate(&id));
        assert!(!set.reactivate(&id));
        assert!(set.is_empty());
    }
}
