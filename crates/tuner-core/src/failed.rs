use std::collections::HashSet;

/// Track ids that failed to play this session.  Membership keeps a track out
/// of the selection pool until it is removed or the set is cleared.
#[derive(Debug, Clone, Default)]
pub struct FailedTracks {
    ids: HashSet<String>,
}

impl FailedTracks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the id was not already present.
    pub fn add(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn has(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Sorted copy, for snapshots.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ids.iter().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_semantics() {
        let mut failed = FailedTracks::new();
        assert!(failed.add("music-2"));
        assert!(!failed.add("music-2"));
        assert!(failed.has("music-2"));
        assert_eq!(failed.len(), 1);

        assert!(failed.remove("music-2"));
        assert!(!failed.has("music-2"));

        failed.add("b");
        failed.add("a");
        assert_eq!(failed.ids(), vec!["a", "b"]);
        failed.clear();
        assert!(failed.is_empty());
    }
}
