//! Stream plumbing: stitching step streams, replaying them to several
//! readers, transforming them, and encoding them for the wire.

pub mod replay;
pub mod stitch;
pub mod transform;
pub mod wire;

pub use replay::ReplayLog;
pub use stitch::{stitchable_stream, StitchHandle};
pub use transform::{
    apply_transforms, Chunking, FilterTransform, PartStream, SmoothStream, StreamTransform,
    TransformContext,
};
pub use wire::{
    format_data_stream_part, parse_data_stream_part, to_data_stream, to_data_stream_part,
    DataStreamOptions, DataStreamPart, WireUsage,
};
