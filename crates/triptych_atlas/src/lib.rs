//! Atlas - coordinate translation for triptych documents.
//!
//! Everything the workspace knows about positions lives here: byte spans,
//! offset/position conversion over both `&str` and `ropey::Rope`, the trace
//! table a transpile emits, and the [`DocumentMapper`] seam every feature
//! goes through to translate results between a document and text derived
//! from it.

pub mod mapper;
pub mod position;
pub mod span;
pub mod trace;

pub use mapper::{DocumentMapper, FragmentMapper, IdentityMapper, TraceMapper};
pub use span::TextSpan;
pub use trace::{TraceEntry, TraceTable};
