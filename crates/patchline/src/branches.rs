//! Branch filtering: restricting a patch log to a fixed set of top-level
//! keys.
//!
//! Membership is decided by comparing the first full path segment against the
//! key set: `/torrents` and `/torrents/3/progress` name the `torrents`
//! branch, `/torrentsExtra` does not. Retained paths are rewritten to the
//! root-relative form (`.` prefix) so that applying them to a partial mirror
//! object still addresses the right node.

use indexmap::IndexSet;
use patchline_pointer::first_segment;

#[derive(Debug, Clone)]
pub struct BranchFilter {
    keys: IndexSet<String>,
}

impl BranchFilter {
    /// Builds a filter from top-level key names. Order is preserved (it is
    /// echoed verbatim in the wire `branches` field); duplicates collapse.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// True when the pointer's first full segment is one of the filter keys.
    pub fn matches(&self, pointer: &str) -> bool {
        match first_segment(pointer) {
            Some(segment) => self.keys.contains(segment.as_str()),
            None => false,
        }
    }

    /// Rewrites a retained path to its root-relative form: `/a/x` -> `./a/x`.
    pub fn rewrite(&self, pointer: &str) -> String {
        format!(".{pointer}")
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.iter().cloned().collect()
    }
}
