//! Calque - scanning and TSX projection for triptych documents.
//!
//! [`scan`] splits a document into frontmatter, top-level script/style
//! blocks, and the markup between them. [`transpile`] projects the whole
//! document into a single TSX module whose line structure matches the
//! original, with a trace table mapping offsets both ways.

pub mod scan;
pub mod transpile;

pub use scan::{
    scan, BlockInventory, BlockKind, ScanIrregularity, ScriptKind, TagInformation, VOID_ELEMENTS,
};
pub use transpile::{transpile, Transpilation, TranspileOptions};
