//!
//! Traits Module
//!
//! The seams of the marker where collaborators plug in.
//!
//! - [`model`]: the language-model collaborator every agent stage calls.
//! - [`response_log`]: durable, append-only storage for a unit's events.
//! - [`extractor`]: one strategy in the score-extraction chain.
//!
//! Implement these traits to swap providers, storage backends or extraction rules.

pub mod extractor;
pub mod model;
pub mod response_log;
