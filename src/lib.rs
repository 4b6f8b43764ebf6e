//! routemap compiles a catalogue of URL route patterns into one compact
//! JSON artifact that a small runtime can use to resolve a request path
//! with a single regular-expression dispatch.
//!
//! # Architecture Overview
//!
//! ```text
//!   route files ──▶ routes (line / JSON grammar)
//!                      │
//!                      ▼
//!                  compile ──▶ affix grouping ──▶ nfa overlap check
//!                      │
//!                      ├──▶ constant-portion tree ──▶ regex optimizer
//!                      │
//!                      ▼
//!                  JSON artifact ──▶ matcher (runtime dispatch)
//!
//!   filter: tag-expression language applied during compilation
//! ```

// Compiler pipeline
pub mod compile;
pub mod nfa;
pub mod routes;

// Input surfaces
pub mod config;
pub mod filter;

// Runtime
pub mod matcher;

pub use compile::{get_route_regexps, process_route_file, route_regexps_to_json};
pub use config::Options;
pub use matcher::{RouteMatch, Router};
pub use routes::{parse_route_files, sort_route_errors, CasePolicy, RouteError};
