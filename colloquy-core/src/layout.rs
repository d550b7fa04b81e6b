//! Root type names inside the shared document.

use yrs::{ArrayRef, Doc, MapRef};

/// Prefix shared by every root this layer owns.
pub const DEFAULT_PREFIX: &str = "__tiptapcollab__";

/// Names of the shared roots, derived from one prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLayout {
    prefix: String,
}

impl DocumentLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn threads_key(&self) -> String {
        format!("{}threads", self.prefix)
    }

    pub fn versions_key(&self) -> String {
        format!("{}versions", self.prefix)
    }

    pub fn config_key(&self) -> String {
        format!("{}config", self.prefix)
    }

    pub fn users_key(&self) -> String {
        format!("{}users", self.prefix)
    }

    /// Threads root. Must not be called while a transaction is open.
    pub fn threads(&self, doc: &Doc) -> ArrayRef {
        doc.get_or_insert_array(self.threads_key().as_str())
    }

    /// Versions root. Must not be called while a transaction is open.
    pub fn versions(&self, doc: &Doc) -> ArrayRef {
        doc.get_or_insert_array(self.versions_key().as_str())
    }

    /// Config root. Must not be called while a transaction is open.
    pub fn config(&self, doc: &Doc) -> MapRef {
        doc.get_or_insert_map(self.config_key().as_str())
    }
}

impl Default for DocumentLayout {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keys() {
        let layout = DocumentLayout::default();
        assert_eq!(layout.threads_key(), "__tiptapcollab__threads");
        assert_eq!(layout.versions_key(), "__tiptapcollab__versions");
        assert_eq!(layout.config_key(), "__tiptapcollab__config");
        assert_eq!(layout.users_key(), "__tiptapcollab__users");
    }

    #[test]
    fn test_custom_prefix() {
        let layout = DocumentLayout::new("app_");
        assert_eq!(layout.prefix(), "app_");
        assert_eq!(layout.threads_key(), "app_threads");
    }
}
