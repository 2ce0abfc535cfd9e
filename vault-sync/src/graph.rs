//! The reference graph (§3, §9): two flat maps keyed by uuid, so collection
//! mutation stays O(1) and no cycle-handling is needed for item↔item
//! references.

use std::collections::{HashMap, HashSet};

/// Forward and inverse indices over item→item references.
///
/// Invariant: for every pair `(a, b)`, `a ∈ inverse[b] ⇔ b ∈ forward[a]`.
#[derive(Debug, Default, Clone)]
pub struct ReferenceGraph {
    forward: HashMap<String, HashSet<String>>,
    inverse: HashMap<String, HashSet<String>>,
}

impl ReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward_refs(&self, uuid: &str) -> Vec<String> {
        self.forward.get(uuid).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn inverse_refs(&self, uuid: &str) -> Vec<String> {
        self.inverse.get(uuid).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// Replace `uuid`'s forward references with `referents`, maintaining the
    /// inverse index (§4.5 step 3: "replace forward[uuid] with the current
    /// reference list and append uuid to the inverse index of each referent").
    pub fn set_forward_refs(&mut self, uuid: &str, referents: impl IntoIterator<Item = String>) {
        let new_set: HashSet<String> = referents.into_iter().collect();

        if let Some(old_set) = self.forward.get(uuid).cloned() {
            for old_referent in old_set.difference(&new_set) {
                if let Some(back) = self.inverse.get_mut(old_referent) {
                    back.remove(uuid);
                    if back.is_empty() {
                        self.inverse.remove(old_referent);
                    }
                }
            }
        }

        for referent in &new_set {
            self.inverse.entry(referent.clone()).or_default().insert(uuid.to_string());
        }

        if new_set.is_empty() {
            self.forward.remove(uuid);
        } else {
            self.forward.insert(uuid.to_string(), new_set);
        }
    }

    /// Detach `uuid` from both indices entirely (§4.5 step 2, deletion).
    pub fn remove(&mut self, uuid: &str) {
        if let Some(old_set) = self.forward.remove(uuid) {
            for referent in old_set {
                if let Some(back) = self.inverse.get_mut(&referent) {
                    back.remove(uuid);
                    if back.is_empty() {
                        self.inverse.remove(&referent);
                    }
                }
            }
        }
        if let Some(back) = self.inverse.remove(uuid) {
            for referrer in back {
                if let Some(fwd) = self.forward.get_mut(&referrer) {
                    fwd.remove(uuid);
                    if fwd.is_empty() {
                        self.forward.remove(&referrer);
                    }
                }
            }
        }
    }

    /// Rewrite every occurrence of `old_uuid` as `new_uuid` across both
    /// indices, used only by UUID alternation (§4.5).
    pub fn rename(&mut self, old_uuid: &str, new_uuid: &str) {
        if let Some(fwd) = self.forward.remove(old_uuid) {
            self.forward.insert(new_uuid.to_string(), fwd.clone());
            for referent in &fwd {
                if let Some(back) = self.inverse.get_mut(referent) {
                    if back.remove(old_uuid) {
                        back.insert(new_uuid.to_string());
                    }
                }
            }
        }
        if let Some(back) = self.inverse.remove(old_uuid) {
            self.inverse.insert(new_uuid.to_string(), back.clone());
            for referrer in &back {
                if let Some(fwd) = self.forward.get_mut(referrer) {
                    if fwd.remove(old_uuid) {
                        fwd.insert(new_uuid.to_string());
                    }
                }
            }
        }
    }

    /// Verify the bidirectional invariant holds; used by tests.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        for (a, referents) in &self.forward {
            for b in referents {
                if !self.inverse.get(b).map(|s| s.contains(a)).unwrap_or(false) {
                    return false;
                }
            }
        }
        for (b, referrers) in &self.inverse {
            for a in referrers {
                if !self.forward.get(a).map(|s| s.contains(b)).unwrap_or(false) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_forward_refs_maintains_inverse_index() {
        let mut g = ReferenceGraph::new();
        g.set_forward_refs("note-1", ["tag-1".to_string(), "tag-2".to_string()]);
        assert!(g.is_consistent());
        assert_eq!(g.inverse_refs("tag-1"), vec!["note-1".to_string()]);
        assert_eq!(g.inverse_refs("tag-2"), vec!["note-1".to_string()]);
    }

    #[test]
    fn replacing_with_empty_refs_clears_inverse_entries() {
        let mut g = ReferenceGraph::new();
        g.set_forward_refs("tag-1", ["note-1".to_string()]);
        g.set_forward_refs("tag-1", Vec::<String>::new());
        assert!(g.is_consistent());
        assert!(g.inverse_refs("note-1").is_empty());
        assert!(g.forward_refs("tag-1").is_empty());
    }

    #[test]
    fn remove_detaches_uuid_from_both_indices() {
        let mut g = ReferenceGraph::new();
        g.set_forward_refs("note-1", ["tag-1".to_string()]);
        g.remove("note-1");
        assert!(g.is_consistent());
        assert!(g.forward_refs("note-1").is_empty());
        assert!(g.inverse_refs("tag-1").is_empty());
    }

    #[test]
    fn rename_preserves_all_inverse_relationships() {
        let mut g = ReferenceGraph::new();
        g.set_forward_refs("tag-1", ["note-a".to_string()]);
        g.rename("note-a", "note-a-prime");
        assert!(g.is_consistent());
        assert_eq!(g.forward_refs("tag-1"), vec!["note-a-prime".to_string()]);
        assert!(g.inverse_refs("note-a").is_empty());
        assert_eq!(g.inverse_refs("note-a-prime"), vec!["tag-1".to_string()]);
    }
}
