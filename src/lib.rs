//! Selectors over live UI node trees, and an engine that keeps a rule set evaluated against
//! the tree as change notifications arrive.
//!
//! ```text
//! [text="Skip" && clickable=true]
//! @[clickable=true] > [id="com.example:id/ad_close"]
//! [id="title"] - [clickable=true]{0,1}
//! ```
//!
//! A selector is parsed once ([`Selector::parse`]), checked against a closed [`Schema`], and
//! matched through a [`transform::Transform`] over whatever tree the host exposes with
//! [`transform::TreeAdapter`].

pub mod config;
pub mod eval;
pub mod parser;
pub mod pattern;
pub mod rule;
pub mod scheduler;
pub mod schema;
pub mod selector;
pub mod snapshot;
pub mod transform;

pub use parser::{ErrorKind, SelectorError};
pub use schema::Schema;
pub use selector::{MatchOption, Selector};
