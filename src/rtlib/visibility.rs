use std::{
    collections::HashSet,
    sync::Mutex,
};

/// Process-wide record of which paths the UI currently wants. Membership is
/// advisory; in-flight work re-checks it at its next checkpoint.
#[derive(Debug, Default)]
pub struct VisibilitySet {
    paths: Mutex<HashSet<String>>,
}

impl VisibilitySet {
    pub fn mark_visible(&self, path: &str) {
        self.paths.lock().unwrap().insert(path.to_string());
    }
    pub fn mark_invisible(&self, path: &str) {
        self.paths.lock().unwrap().remove(path);
    }
    pub fn is_visible(&self, path: &str) -> bool {
        self.paths.lock().unwrap().contains(path)
    }
    pub fn clear(&self) {
        self.paths.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_check() {
        let vis = VisibilitySet::default();
        assert!(!vis.is_visible("/data/a.mp4"));
        vis.mark_visible("/data/a.mp4");
        assert!(vis.is_visible("/data/a.mp4"));
        vis.mark_invisible("/data/a.mp4");
        assert!(!vis.is_visible("/data/a.mp4"));
        // removing an absent path is a no-op
        vis.mark_invisible("/data/a.mp4");
        vis.mark_visible("/data/a.mp4");
        vis.mark_visible("/data/b.mp4");
        vis.clear();
        assert!(!vis.is_visible("/data/b.mp4"));
    }
}
