//! Crate-internal tests that span several modules.
pub(crate) mod helpers;

mod construction;
