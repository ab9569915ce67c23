//! Text, streaming, and structured output generation.
//!
//! Every entry point runs the same step loop: call the model, resolve and
//! execute tool calls, decide the next step, repeat until done.

mod recorder;
pub mod object;
pub mod step;
pub mod stream;
pub mod text;
mod tool_stream;

pub use object::{
    generate_object, stream_object, GenerateObjectOptions, ObjectMode, ObjectStreamPart,
    RepairText, StreamObjectOptions, StreamObjectResult,
};
pub use step::{remove_text_after_last_whitespace, split_on_last_whitespace};
pub use stream::{stream_text, StreamTextOptions, StreamTextResult};
pub use text::{generate_text, GenerateTextOptions, StepCallback};
