//! Heuristic page optimizer.
//!
//! A [`session::Session`] owns a parsed [`dom::Document`] and rewrites it in
//! passes: offscreen images are deferred, blocking scripts get `defer`,
//! third-party origins are preconnected, content containers skip offscreen
//! rendering, and content hidden behind entrance animations is revealed.
//! Passes are scheduled from mutation records and idle periods and every
//! visited element is marked so later passes skip it.

pub mod config;
pub mod dom;
pub mod early;
pub mod geometry;
pub mod guard;
pub mod hints;
pub mod images;
pub mod marks;
pub mod mutation;
pub mod perf;
pub mod pipeline;
pub mod reveal;
pub mod scheduler;
pub mod scripts;
pub mod selector;
pub mod serialize;
pub mod session;
pub mod style;
pub mod visibility;
pub mod worker;
