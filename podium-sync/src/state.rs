//! Client-local view of the shared presentation.
//!
//! `SyncStateStore` holds {page, document, viewer count, presenter flag}
//! plus the page count learned when the document loads. Inbound messages
//! go through [`SyncStateStore::apply`]; every mutation is conditional on
//! the value actually changing, and returns the [`StateChange`] it made so
//! the caller triggers exactly one render or notice per real change. An
//! echo of a change the presenter already applied locally is a no-op.

use std::fmt;

use crate::protocol::Message;

/// Opaque identity of the shared document (the server-generated filename).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef(String);

impl DocumentRef {
    pub fn new(filename: impl Into<String>) -> Self {
        Self(filename.into())
    }

    pub fn filename(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A mutation that actually happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Page { from: u32, to: u32 },
    Document { document: DocumentRef, page: u32 },
    ViewerCount { count: u32 },
    Role { is_presenter: bool },
}

/// Document-related fields, captured for rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub document: Option<DocumentRef>,
    pub page: u32,
    pub page_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStateStore {
    page: u32,
    document: Option<DocumentRef>,
    /// Known once the current document has loaded
    page_count: Option<u32>,
    viewer_count: u32,
    is_presenter: bool,
}

impl Default for SyncStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStateStore {
    pub fn new() -> Self {
        Self {
            page: 1,
            document: None,
            page_count: None,
            viewer_count: 0,
            is_presenter: false,
        }
    }

    /// Apply one inbound message.
    pub fn apply(&mut self, msg: &Message) -> Option<StateChange> {
        match msg {
            Message::PageChange { page } => self.set_page(*page),
            Message::NewPdf {
                filename,
                current_page,
            } => self.replace_document(DocumentRef::new(filename.as_str()), *current_page),
            Message::UserCount { count } => self.set_viewer_count(*count),
            Message::AdminStatus { is_presenter } => self.set_presenter(*is_presenter),
            Message::Auth { .. } | Message::Error { .. } => None,
        }
    }

    /// Move to `page` if it differs and lies within the loaded document.
    pub fn set_page(&mut self, page: u32) -> Option<StateChange> {
        if page == self.page {
            return None;
        }
        if !self.in_bounds(page) {
            log::warn!(
                "Rejecting page {page}: outside 1..={}",
                self.page_count.unwrap_or(0)
            );
            return None;
        }
        let from = self.page;
        self.page = page;
        Some(StateChange::Page { from, to: page })
    }

    /// Replace the shared document wholesale.
    ///
    /// Naming the current document again only moves the page.
    pub fn replace_document(&mut self, document: DocumentRef, page: u32) -> Option<StateChange> {
        if self.document.as_ref() == Some(&document) {
            return self.set_page(page);
        }
        self.document = Some(document.clone());
        self.page = page.max(1);
        self.page_count = None;
        Some(StateChange::Document {
            document,
            page: self.page,
        })
    }

    /// Record the page count of a freshly loaded document.
    ///
    /// A page beyond the end falls back to the first page.
    pub fn document_loaded(&mut self, document: &DocumentRef, page_count: u32) -> Option<StateChange> {
        if self.document.as_ref() != Some(document) {
            return None;
        }
        self.page_count = Some(page_count);
        if self.page > page_count {
            let from = self.page;
            self.page = 1;
            return Some(StateChange::Page { from, to: 1 });
        }
        None
    }

    pub fn set_viewer_count(&mut self, count: u32) -> Option<StateChange> {
        if count == self.viewer_count {
            return None;
        }
        self.viewer_count = count;
        Some(StateChange::ViewerCount { count })
    }

    pub fn set_presenter(&mut self, is_presenter: bool) -> Option<StateChange> {
        if is_presenter == self.is_presenter {
            return None;
        }
        self.is_presenter = is_presenter;
        Some(StateChange::Role { is_presenter })
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            document: self.document.clone(),
            page: self.page,
            page_count: self.page_count,
        }
    }

    /// Roll the document fields back to a snapshot.
    pub fn restore(&mut self, snapshot: DocumentSnapshot) {
        self.document = snapshot.document;
        self.page = snapshot.page;
        self.page_count = snapshot.page_count;
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn document(&self) -> Option<&DocumentRef> {
        self.document.as_ref()
    }

    pub fn page_count(&self) -> Option<u32> {
        self.page_count
    }

    pub fn viewer_count(&self) -> u32 {
        self.viewer_count
    }

    pub fn is_presenter(&self) -> bool {
        self.is_presenter
    }

    fn in_bounds(&self, page: u32) -> bool {
        page >= 1 && self.page_count.map_or(true, |count| page <= count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(pages: u32) -> SyncStateStore {
        let mut store = SyncStateStore::new();
        let doc = DocumentRef::new("deck.pdf");
        store.replace_document(doc.clone(), 1);
        store.document_loaded(&doc, pages);
        store
    }

    #[test]
    fn test_defaults() {
        let store = SyncStateStore::new();
        assert_eq!(store.page(), 1);
        assert!(store.document().is_none());
        assert_eq!(store.viewer_count(), 0);
        assert!(!store.is_presenter());
    }

    #[test]
    fn test_repeated_messages_mutate_once() {
        let mut store = loaded(5);
        for msg in [
            Message::UserCount { count: 4 },
            Message::page_change(3),
            Message::AdminStatus { is_presenter: true },
        ] {
            assert!(store.apply(&msg).is_some(), "{msg:?} first time");
            assert!(store.apply(&msg).is_none(), "{msg:?} second time");
        }
        assert_eq!(store.viewer_count(), 4);
        assert_eq!(store.page(), 3);
        assert!(store.is_presenter());
    }

    #[test]
    fn test_page_change_reports_transition() {
        let mut store = loaded(5);
        assert_eq!(
            store.apply(&Message::page_change(4)),
            Some(StateChange::Page { from: 1, to: 4 })
        );
    }

    #[test]
    fn test_page_out_of_bounds_rejected() {
        let mut store = loaded(3);
        assert!(store.set_page(0).is_none());
        assert!(store.set_page(4).is_none());
        assert_eq!(store.page(), 1);
    }

    #[test]
    fn test_page_accepted_while_count_unknown() {
        let mut store = SyncStateStore::new();
        store.replace_document(DocumentRef::new("deck.pdf"), 1);
        assert!(store.set_page(9).is_some());
    }

    #[test]
    fn test_local_change_then_echo_is_noop() {
        let mut store = loaded(5);
        assert!(store.set_page(2).is_some());
        assert!(store.apply(&Message::page_change(2)).is_none());
    }

    #[test]
    fn test_new_pdf_replaces_document_and_page() {
        let mut store = loaded(5);
        store.set_page(4);
        let change = store.apply(&Message::new_pdf("other.pdf", 2));
        assert_eq!(
            change,
            Some(StateChange::Document {
                document: DocumentRef::new("other.pdf"),
                page: 2
            })
        );
        assert_eq!(store.page(), 2);
        assert_eq!(store.page_count(), None);
    }

    #[test]
    fn test_new_pdf_echo_is_noop() {
        let mut store = SyncStateStore::new();
        store.replace_document(DocumentRef::new("deck.pdf"), 1);
        assert!(store.apply(&Message::new_pdf("deck.pdf", 1)).is_none());
    }

    #[test]
    fn test_document_loaded_clamps_page() {
        let mut store = SyncStateStore::new();
        let doc = DocumentRef::new("deck.pdf");
        store.replace_document(doc.clone(), 7);
        assert_eq!(
            store.document_loaded(&doc, 3),
            Some(StateChange::Page { from: 7, to: 1 })
        );
        assert_eq!(store.page_count(), Some(3));
    }

    #[test]
    fn test_document_loaded_for_other_document_ignored() {
        let mut store = SyncStateStore::new();
        store.replace_document(DocumentRef::new("deck.pdf"), 1);
        assert!(store.document_loaded(&DocumentRef::new("old.pdf"), 3).is_none());
        assert_eq!(store.page_count(), None);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut store = loaded(5);
        store.set_page(3);
        let snapshot = store.snapshot();

        store.replace_document(DocumentRef::new("broken.pdf"), 1);
        store.restore(snapshot);

        assert_eq!(store.document(), Some(&DocumentRef::new("deck.pdf")));
        assert_eq!(store.page(), 3);
        assert_eq!(store.page_count(), Some(5));
    }

    #[test]
    fn test_error_and_auth_do_not_mutate() {
        let mut store = loaded(2);
        let before = store.clone();
        assert!(store.apply(&Message::error("nope")).is_none());
        assert!(store.apply(&Message::auth("pw")).is_none());
        assert_eq!(store, before);
    }
}
