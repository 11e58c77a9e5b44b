//! `tagloom_core` is the core library for the tagloom XML template engine. It reads a well-formed XML template annotated with reserved `tl:` directives and embedded expressions, binds it against a layered data universe, and renders text.
//!
//! ## Processing Pipeline
//!
//! ```text
//! Template source
//!   → quick-xml events (open / close / text)
//!   → Tree builder (arena of nodes, inert subtrees folded into text)
//!   → Compiled-tree cache (optional, keyed by source freshness)
//!   → Render pass (scope stack + expression evaluator, emits slot anchors)
//!   → Slot reconciler (splices queued plugs over slot anchors)
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Engine settings and `tagloom.toml` discovery, including `[data]` files mounted into the universe.
//! - [`functions`]: The function library seen by expressions: native functions and pluggable factories.
//! - [`slots`]: Slot and plug bookkeeping and the reconciliation pass.
//!
//! ## Key Types
//!
//! - [`View`]: Loads a template, holds mounted data and registered collaborators, renders.
//! - [`Template`]: A built template: its node [`Tree`], namespace prefix and default translation source.
//! - [`ScopeStack`]: The layered name → value universe consulted while rendering.
//! - [`Value`]: Values produced by expressions and mounted as data; host objects take part through [`DataObject`].
//! - [`CompileCache`]: Persists built trees under a cache root.
//!
//! ## Directives
//!
//! Plain elements take the attributes `tl:macro`, `tl:walk`, `tl:cond`, `tl:call`, `tl:plug` (with `tl:append`), `tl:slot`, `tl:text`, `tl:mute`, `tl:void` and, on the root, `tl:doctype`. Other attribute values interpolate `{expression}` segments. The reserved elements are `tl:attr`, `tl:cdata`, `tl:dictionary`, `tl:feed`, `tl:include`, `tl:mount`, `tl:param`, `tl:trans` and `tl:val`.
//!
//! The prefix is `tl:` unless the first element declares another one with an `xmlns:<prefix>` attribute whose value contains `tagloom`.
//!
//! ## Quick Start
//!
//! ```rust
//! use tagloom_core::View;
//!
//! let mut view = View::default();
//! view.load_string(r#"<p class="greeting">Hello <tl:val value="upper(name)"/></p>"#);
//! view.mount("name", "world");
//!
//! assert_eq!(view.render()?, r#"<p class="greeting">Hello WORLD</p>"#);
//! # Ok::<(), tagloom_core::TagloomError>(())
//! ```

pub use builder::*;
pub use compile_cache::CompileCache;
pub use compile_cache::LoadedTemplate;
pub use compile_cache::load_template;
pub use config::*;
pub use directives::*;
pub use error::*;
pub use functions::FunctionCall;
pub use functions::FunctionFactory;
pub use functions::FunctionMap;
pub use functions::FunctionRegistry;
pub use functions::TemplateFunction;
pub use lexer::Evaluator;
pub use lexer::evaluate;
pub use node::*;
pub use parser::*;
pub use scope::*;
pub use slots::Plug;
pub use slots::Slot;
pub use value::*;
pub use view::*;
pub use xml_document::*;

mod builder;
mod compile_cache;
pub mod config;
mod directives;
#[allow(unused_assignments)]
mod error;
pub mod functions;
pub(crate) mod lexer;
mod node;
mod parser;
mod render;
mod scope;
pub mod slots;
pub(crate) mod tokens;
mod value;
mod view;
mod xml_document;

#[cfg(test)]
mod __fixtures;
#[cfg(test)]
mod __tests;
