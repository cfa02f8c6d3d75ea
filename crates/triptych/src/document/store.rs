//! Document registry using Rope for efficient text operations.
//!
//! Closing is two-phase: a document the oracle is still reading (lock count
//! above zero) survives `close` and is deleted at the final `release`.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use ropey::Rope;
use tower_lsp::lsp_types::{TextDocumentContentChangeEvent, Url};

use triptych_atlas::position::position_to_offset;

/// What happened to a document, delivered synchronously to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentEventKind {
    Opened,
    Changed,
    Closed,
}

#[derive(Debug, Clone)]
pub struct DocumentEvent {
    pub uri: Url,
    pub version: i32,
    pub kind: DocumentEventKind,
}

type Listener = Box<dyn Fn(&DocumentEvent) + Send + Sync>;

/// A document managed by the LSP server.
#[derive(Debug)]
pub struct Document {
    /// Document URI
    pub uri: Url,
    /// Document version, strictly increasing across edits
    pub version: i32,
    /// Document content stored as a rope for efficient editing
    pub content: Rope,
    /// Language ID (e.g., "triptych", "typescript")
    pub language_id: String,
    /// Materialized text, valid for the version it was built at
    text_cache: Mutex<Option<(i32, Arc<str>)>>,
}

impl Document {
    /// Create a new document.
    pub fn new(uri: Url, content: String, version: i32, language_id: String) -> Self {
        Self {
            uri,
            version,
            content: Rope::from_str(&content),
            language_id,
            text_cache: Mutex::new(None),
        }
    }

    /// Get the document content as shared text, cached per version.
    pub fn text(&self) -> Arc<str> {
        let mut cache = self.text_cache.lock();
        if let Some((version, text)) = cache.as_ref() {
            if *version == self.version {
                return text.clone();
            }
        }
        let text: Arc<str> = Arc::from(self.content.to_string());
        *cache = Some((self.version, text.clone()));
        text
    }

    /// Get the number of lines in the document.
    pub fn line_count(&self) -> usize {
        self.content.len_lines()
    }

    /// Splice `text` over the byte range `start..end` and bump the version.
    pub fn update(&mut self, text: &str, start: usize, end: usize) {
        if let (Ok(start_char), Ok(end_char)) = (
            self.content.try_byte_to_char(start),
            self.content.try_byte_to_char(end),
        ) {
            self.content.remove(start_char..end_char);
            self.content.insert(start_char, text);
            self.version += 1;
            *self.text_cache.get_mut() = None;
        }
    }

    /// Apply an incremental change to the document.
    pub fn apply_change(&mut self, change: &TextDocumentContentChangeEvent, new_version: i32) {
        if let Some(range) = change.range {
            let start_offset = position_to_offset(&self.content, range.start);
            let end_offset = position_to_offset(&self.content, range.end);

            if let (Some(start), Some(end)) = (start_offset, end_offset) {
                // Convert byte offsets to char indices
                if let (Ok(start_char), Ok(end_char)) = (
                    self.content.try_byte_to_char(start),
                    self.content.try_byte_to_char(end),
                ) {
                    self.content.remove(start_char..end_char);
                    self.content.insert(start_char, &change.text);
                }
            }
        } else {
            // Full content replacement
            self.content = Rope::from_str(&change.text);
        }
        self.version = new_version;
        *self.text_cache.get_mut() = None;
    }

    /// Replace the whole content, as on re-open.
    fn replace(&mut self, content: String, version: i32) {
        self.content = Rope::from_str(&content);
        self.version = version;
        *self.text_cache.get_mut() = None;
    }
}

/// Registry slot: the document plus close bookkeeping.
#[derive(Debug)]
pub struct DocumentEntry {
    document: Document,
    locks: u32,
    close_requested: bool,
}

impl DocumentEntry {
    fn new(document: Document) -> Self {
        Self {
            document,
            locks: 0,
            close_requested: false,
        }
    }
}

impl std::ops::Deref for DocumentEntry {
    type Target = Document;

    fn deref(&self) -> &Document {
        &self.document
    }
}

/// Thread-safe document registry.
pub struct DocumentRegistry {
    documents: DashMap<Url, DocumentEntry>,
    listeners: RwLock<Vec<Listener>>,
}

impl Default for DocumentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentRegistry {
    /// Create a new document registry.
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register an event listener. Listeners run synchronously in
    /// registration order and must not re-enter the registry.
    pub fn on_event(&self, listener: impl Fn(&DocumentEvent) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    fn emit(&self, uri: Url, version: i32, kind: DocumentEventKind) {
        let event = DocumentEvent { uri, version, kind };
        for listener in self.listeners.read().iter() {
            listener(&event);
        }
    }

    /// Open a document, or refresh one that is already present.
    ///
    /// Emits `Opened` only on creation, then `Changed` either way.
    pub fn open(&self, uri: Url, content: String, version: i32, language_id: String) {
        let created = match self.documents.entry(uri.clone()) {
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                entry.document.replace(content, version);
                entry.close_requested = false;
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(DocumentEntry::new(Document::new(
                    uri.clone(),
                    content,
                    version,
                    language_id,
                )));
                true
            }
        };
        if created {
            self.emit(uri.clone(), version, DocumentEventKind::Opened);
        }
        self.emit(uri, version, DocumentEventKind::Changed);
    }

    /// Apply a batch of changes at the given version. Returns the version,
    /// or `None` if the document is unknown.
    pub fn update(
        &self,
        uri: &Url,
        changes: &[TextDocumentContentChangeEvent],
        version: i32,
    ) -> Option<i32> {
        let applied = match self.documents.get_mut(uri) {
            None => false,
            Some(mut entry) => {
                for change in changes {
                    entry.document.apply_change(change, version);
                }
                true
            }
        };
        if !applied {
            return None;
        }
        self.emit(uri.clone(), version, DocumentEventKind::Changed);
        Some(version)
    }

    /// Close a document. Deletion is deferred while locks are held; the
    /// `Closed` event fires immediately either way.
    pub fn close(&self, uri: &Url) {
        let version = match self.documents.get_mut(uri) {
            None => return,
            Some(mut entry) => {
                if entry.locks > 0 {
                    entry.close_requested = true;
                    let version = entry.document.version;
                    drop(entry);
                    self.emit(uri.clone(), version, DocumentEventKind::Closed);
                    return;
                }
                entry.document.version
            }
        };
        self.documents.remove(uri);
        self.emit(uri.clone(), version, DocumentEventKind::Closed);
    }

    /// Take a read lock on a document, keeping it alive across `close`.
    /// Returns `false` if the document is unknown.
    pub fn lock(&self, uri: &Url) -> bool {
        match self.documents.get_mut(uri) {
            None => false,
            Some(mut entry) => {
                entry.locks += 1;
                true
            }
        }
    }

    /// Release a lock taken with [`lock`](Self::lock). The document is
    /// deleted here if a close was requested while it was locked.
    pub fn release(&self, uri: &Url) {
        let delete = match self.documents.get_mut(uri) {
            None => false,
            Some(mut entry) => {
                entry.locks = entry.locks.saturating_sub(1);
                entry.locks == 0 && entry.close_requested
            }
        };
        if delete {
            self.documents.remove(uri);
        }
    }

    /// Get a document by URI.
    pub fn get(&self, uri: &Url) -> Option<dashmap::mapref::one::Ref<'_, Url, DocumentEntry>> {
        self.documents.get(uri)
    }

    /// Check if a document exists.
    pub fn contains(&self, uri: &Url) -> bool {
        self.documents.contains_key(uri)
    }

    /// Get all document URIs.
    pub fn uris(&self) -> Vec<Url> {
        self.documents.iter().map(|r| r.key().clone()).collect()
    }

    /// Get the number of open documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
