//! Stepweave: multi-step LLM generation with tools, streaming and
//! structured output.
//!
//! Providers plug in through [`provider::ModelProvider`]. The engine runs
//! the step loop on top: tool calls are resolved and executed, truncated
//! answers are continued, and streamed runs are stitched into one output.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use stepweave::prelude::*;
//!
//! # async fn example(model: Arc<dyn ModelProvider>) -> stepweave::error::Result<()> {
//! let result = generate_text(
//!     GenerateTextOptions::builder()
//!         .model(model)
//!         .prompt("Hello!")
//!         .max_steps(3)
//!         .build(),
//! )
//! .await?;
//! println!("{}", result.text);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod generation;
pub mod json;
pub mod output;
pub mod prelude;
pub mod prompt;
pub mod provider;
pub mod schema;
pub mod stream;
pub mod telemetry;
pub mod tools;
pub mod types;
pub mod util;
