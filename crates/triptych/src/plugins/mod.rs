//! Feature plugins dispatched by the host.
//!
//! Registration order here is precedence order: markup, style, directive,
//! then the oracle-backed typescript plugin.

pub mod directive;
pub mod markup;
pub mod style;
pub mod typescript;

pub use directive::DirectivePlugin;
pub use markup::MarkupPlugin;
pub use style::StylePlugin;
pub use typescript::TypescriptPlugin;
