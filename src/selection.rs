//! Selected object keys with single or multi-select mode.

use std::collections::BTreeSet;
use tracing::debug;

/// Set of selected keys.
///
/// With multi-select disabled the set never holds more than one key:
/// toggling another key replaces the selection, toggling the sole member
/// clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    keys: BTreeSet<String>,
    multi_select: bool,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toggle(&mut self, key: &str) {
        if self.multi_select {
            if !self.keys.remove(key) {
                self.keys.insert(key.to_string());
            }
        } else if self.keys.len() == 1 && self.keys.contains(key) {
            self.keys.clear();
        } else {
            self.keys.clear();
            self.keys.insert(key.to_string());
        }
    }

    /// Switch mode. Disabling with more than one key selected clears the set.
    pub fn set_multi_select(&mut self, enabled: bool) {
        if !enabled && self.keys.len() > 1 {
            debug!("[Actions] Multi-select disabled, clearing {} keys", self.keys.len());
            self.keys.clear();
        }
        self.multi_select = enabled;
    }

    pub fn is_multi_select(&self) -> bool {
        self.multi_select
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Drop keys no longer present, e.g. after a delete
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.keys.retain(|k| keep(k));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The selected key when exactly one is selected
    pub fn single(&self) -> Option<&str> {
        if self.keys.len() == 1 {
            self.keys.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    /// Selected keys in key order
    pub fn keys(&self) -> Vec<String> {
        self.keys.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_mode_replaces() {
        let mut selection = SelectionSet::new();
        selection.toggle("x");
        selection.toggle("y");
        assert_eq!(selection.keys(), vec!["y"]);
        assert_eq!(selection.single(), Some("y"));
    }

    #[test]
    fn test_single_mode_click_to_deselect() {
        let mut selection = SelectionSet::new();
        selection.toggle("x");
        selection.toggle("x");
        assert!(selection.is_empty());
    }

    #[test]
    fn test_enable_multi_select_keeps_and_adds() {
        let mut selection = SelectionSet::new();
        selection.toggle("x");
        selection.toggle("y");
        selection.set_multi_select(true);
        selection.toggle("z");
        assert_eq!(selection.keys(), vec!["y", "z"]);
        assert_eq!(selection.single(), None);

        selection.toggle("y");
        assert_eq!(selection.keys(), vec!["z"]);
    }

    #[test]
    fn test_disable_multi_select_clears_multiple() {
        let mut selection = SelectionSet::new();
        selection.set_multi_select(true);
        selection.toggle("a");
        selection.toggle("b");
        selection.set_multi_select(false);
        assert!(selection.is_empty());

        selection.set_multi_select(true);
        selection.toggle("a");
        selection.set_multi_select(false);
        assert_eq!(selection.keys(), vec!["a"]);
    }

    #[test]
    fn test_retain() {
        let mut selection = SelectionSet::new();
        selection.set_multi_select(true);
        selection.toggle("a");
        selection.toggle("b");
        selection.retain(|k| k != "a");
        assert_eq!(selection.keys(), vec!["b"]);
    }
}
