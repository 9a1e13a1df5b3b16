//! Indexable documents and the payload interpretation boundary.
//!
//! Producers hand the system opaque payloads; an [`Interpreter`] converts
//! each payload exactly once into an [`Indexable`], the uniform
//! representation both the memory and the disk pipelines consume.

use std::sync::Arc;

use crate::analysis::Analyzer;
use crate::engine::Document;
use crate::error::Result;
use crate::Uid;

/// One document to add, with an optional analyzer override applied to all
/// of its fields.
#[derive(Debug, Clone)]
pub struct IndexRequest {
    /// The document fields.
    pub document: Document,

    /// Analyzer override; `None` uses the index default.
    pub analyzer: Option<Arc<dyn Analyzer>>,
}

impl IndexRequest {
    /// Create a request using the index's default analyzer.
    pub fn new(document: Document) -> Self {
        IndexRequest {
            document,
            analyzer: None,
        }
    }

    /// Create a request with an analyzer override.
    pub fn with_analyzer(document: Document, analyzer: Arc<dyn Analyzer>) -> Self {
        IndexRequest {
            document,
            analyzer: Some(analyzer),
        }
    }
}

/// The interpreted form of one payload.
///
/// Applying an indexable always removes any prior row for its uid first;
/// the `requests` are then added, so an update is a delete followed by an
/// insert from the caller's point of view. At most one live row exists per
/// uid at any time.
#[derive(Debug, Clone)]
pub struct Indexable {
    /// Logical document identifier.
    pub uid: Uid,

    /// Pure deletion: remove the uid's row, add nothing.
    pub deleted: bool,

    /// Ignore this event entirely.
    pub skip: bool,

    /// Documents to add for this uid. May be empty, which makes an update
    /// behave like a delete.
    pub requests: Vec<IndexRequest>,
}

impl Indexable {
    /// An insert or update of one document.
    pub fn insert(uid: Uid, document: Document) -> Self {
        Indexable {
            uid,
            deleted: false,
            skip: false,
            requests: vec![IndexRequest::new(document)],
        }
    }

    /// An insert or update adding several documents for one uid.
    pub fn insert_all(uid: Uid, requests: Vec<IndexRequest>) -> Self {
        Indexable {
            uid,
            deleted: false,
            skip: false,
            requests,
        }
    }

    /// A deletion of whatever row currently holds `uid`.
    pub fn delete(uid: Uid) -> Self {
        Indexable {
            uid,
            deleted: true,
            skip: false,
            requests: Vec::new(),
        }
    }

    /// An event that should be ignored.
    pub fn skip(uid: Uid) -> Self {
        Indexable {
            uid,
            deleted: false,
            skip: true,
            requests: Vec::new(),
        }
    }
}

/// Converts a native payload into its indexable form.
///
/// Called exactly once per event by the delegating consumer. A failed
/// conversion drops only that event; the rest of the batch proceeds.
pub trait Interpreter<V>: Send + Sync {
    /// Interpret one payload.
    fn interpret(&self, payload: &V) -> Result<Indexable>;
}
