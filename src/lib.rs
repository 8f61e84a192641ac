//! Production chain resolution and build-opportunity ranking for industrialists.
//!
//! [`domain`] holds the expander and the economics evaluator, [`infra`] the
//! recipe data and market collaborators, [`util`] the process plumbing.

pub mod domain;
pub mod infra;
pub mod util;
