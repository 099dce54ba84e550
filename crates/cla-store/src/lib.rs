//! cla-store: the signing-record store behind a CLA service.
//!
//! Links bind a CLA template to an org (optionally one repository). Each
//! link document embeds its signing records and, for corporation links, its
//! manager accounts. Those arrays are only ever mutated through single-step
//! filtered updates (`array_ops`), never by rewriting the whole document.
//!
//! Backends implement [`store::DocumentStore`]; this crate ships the
//! in-memory [`store_memory::MemoryStore`], and `cla-store-postgres` the
//! JSONB one. The only cross-request serialization is the first corporate
//! signature of a link, guarded by an injected [`lock::LockProvider`].

pub mod array_ops;
pub mod cla;
pub mod collection;
pub mod config;
pub mod corp_flow;
pub mod corporation;
pub mod doc_ops;
pub mod document;
pub mod error;
pub mod filters;
pub mod individual;
pub mod links;
pub mod lock;
pub mod managers;
pub mod org_email;
pub mod pdf;
pub mod storage;
pub mod store;
pub mod store_memory;
pub mod types;
pub mod verification;

pub use collection::Collection;
pub use config::SigningConfig;
pub use corp_flow::{CorporationSigningFlow, CorporationSigningRequest};
pub use document::{DocFilter, DocId, Document, ElemFilter, Fields, Projection, Update};
pub use error::{DbError, DbErrorKind, ErrorCode, ModelError, ModelResult};
pub use lock::{LocalLockProvider, LockError, LockGuard, LockKey, LockProvider};
pub use storage::{ClaStorage, SigningPageInfo};
pub use store::DocumentStore;
pub use store_memory::MemoryStore;
