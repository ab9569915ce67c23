//! Partial JSON repair and parsing for streamed structured output.

pub mod partial;
pub mod repair;

pub use partial::{parse_partial_json, ParseState, PartialJson};
pub use repair::fix_json;
