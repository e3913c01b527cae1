//! System documents: named, versioned records of opaque fields.

use crate::error::{LsfError, Result};
use std::collections::BTreeMap;

/// Field name to raw bytes.
pub type Content = BTreeMap<String, Vec<u8>>;

/// A snapshot of a stored document.
///
/// Changing fields only marks the snapshot dirty; nothing reaches the store
/// until the snapshot is submitted with `Registrar::update_document`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    id: String,
    version: u64,
    content: Content,
    dirty: bool,
}

impl Document {
    /// Build a clean snapshot. Used by store implementations.
    pub fn from_parts(id: impl Into<String>, version: u64, content: Content) -> Self {
        Self {
            id: id.into(),
            version,
            content,
            dirty: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Store version this snapshot was taken at.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    /// True if the snapshot has unsubmitted changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, field: &str) -> Option<&[u8]> {
        self.content.get(field).map(Vec::as_slice)
    }

    /// Field value as UTF-8, `None` if absent or not valid UTF-8.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(|raw| std::str::from_utf8(raw).ok())
    }

    /// Set a field. Setting a field to its current value leaves the snapshot clean.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Vec<u8>>) {
        let field = field.into();
        let value = value.into();
        if self.content.get(&field) != Some(&value) {
            self.content.insert(field, value);
            self.dirty = true;
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<Vec<u8>> {
        let removed = self.content.remove(field);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.content.keys().map(String::as_str)
    }

    pub(crate) fn mark_clean(&mut self, version: u64) {
        self.version = version;
        self.dirty = false;
    }
}

/// Check that `id` is usable as a document id.
///
/// Ids are non-empty and limited to ASCII alphanumerics, `.`, `-` and `_`,
/// since they double as file names.
pub fn validate_document_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(LsfError::illegal_argument("document id is empty"));
    }
    if id.starts_with('.') {
        return Err(LsfError::illegal_argument(format!(
            "document id {:?} must not start with '.'",
            id
        )));
    }
    if let Some(bad) = id
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '.' || *ch == '-' || *ch == '_'))
    {
        return Err(LsfError::illegal_argument(format!(
            "document id {:?} contains invalid character {:?}",
            id, bad
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_marks_dirty_only_on_change() {
        let mut content = Content::new();
        content.insert("host".to_string(), b"localhost".to_vec());
        let mut doc = Document::from_parts("remote.r1.remote", 1, content);

        doc.set("host", "localhost");
        assert!(!doc.is_dirty());

        doc.set("host", "example.org");
        assert!(doc.is_dirty());
        assert_eq!(doc.get_str("host"), Some("example.org"));
    }

    #[test]
    fn test_remove_missing_field_is_clean() {
        let mut doc = Document::from_parts("d", 1, Content::new());
        assert!(doc.remove("missing").is_none());
        assert!(!doc.is_dirty());
    }

    #[test]
    fn test_mark_clean_advances_version() {
        let mut doc = Document::from_parts("d", 3, Content::new());
        doc.set("a", "1");
        doc.mark_clean(4);
        assert_eq!(doc.version(), 4);
        assert!(!doc.is_dirty());
    }

    #[test]
    fn test_validate_document_id() {
        assert!(validate_document_id("stream.nginx-01.stream").is_ok());
        assert!(validate_document_id("a_b").is_ok());
        for bad in ["", ".hidden", "a/b", "..", "with space", "ümlaut"] {
            assert!(
                matches!(validate_document_id(bad), Err(LsfError::IllegalArgument(_))),
                "{:?}",
                bad
            );
        }
    }
}
