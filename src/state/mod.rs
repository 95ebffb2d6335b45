//! Client-side state owned by this crate.
//!
//! SYSTEM CONTEXT
//! ==============
//! `session` is the single authority for "who is logged in"; `cache` is the
//! seam through which logout drops server-derived data held elsewhere.

pub mod cache;
pub mod session;
