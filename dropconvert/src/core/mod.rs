//! Pure data model and path rules.
//!
//! Nothing in here launches processes or writes files; the side-effecting
//! components build on these types.

pub mod path_rules;
pub mod types;
