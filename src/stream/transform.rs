//! Transformations applied to the stitched full stream.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use regex::Regex;

use super::stitch::StitchHandle;
use crate::types::StreamPart;

pub type PartStream = BoxStream<'static, StreamPart>;

/// Handle given to transforms for controlling the run.
#[derive(Clone)]
pub struct TransformContext {
    stitch: StitchHandle<StreamPart>,
}

impl TransformContext {
    pub(crate) fn new(stitch: StitchHandle<StreamPart>) -> Self {
        Self { stitch }
    }

    /// End the output immediately. No further steps are streamed.
    pub fn stop_stream(&self) {
        self.stitch.terminate();
    }
}

/// Trait for transforming the full stream.
pub trait StreamTransform: Send + Sync {
    fn transform(&self, stream: PartStream, ctx: TransformContext) -> PartStream;
}

/// Apply transforms in order, the first one closest to the source.
pub fn apply_transforms(
    stream: PartStream,
    transforms: &[Arc<dyn StreamTransform>],
    ctx: &TransformContext,
) -> PartStream {
    transforms
        .iter()
        .fold(stream, |stream, transform| transform.transform(stream, ctx.clone()))
}

/// Filter parts based on a predicate.
pub struct FilterTransform {
    predicate: Arc<dyn Fn(&StreamPart) -> bool + Send + Sync>,
}

impl FilterTransform {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&StreamPart) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl StreamTransform for FilterTransform {
    fn transform(&self, stream: PartStream, _ctx: TransformContext) -> PartStream {
        let predicate = self.predicate.clone();
        Box::pin(stream.filter(move |part| futures::future::ready(predicate(part))))
    }
}

/// How [`SmoothStream`] cuts text.
#[derive(Debug, Clone)]
pub enum Chunking {
    Word,
    Line,
    Pattern(Regex),
}

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+\s+").expect("word chunking regex must compile"));
static LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\n]*\n").expect("line chunking regex must compile"));

impl Chunking {
    fn regex(&self) -> Regex {
        match self {
            Chunking::Word => WORD.clone(),
            Chunking::Line => LINE.clone(),
            Chunking::Pattern(re) => re.clone(),
        }
    }
}

/// Re-chunk text deltas into words or lines, optionally pacing them.
///
/// Buffered text is flushed before any non-text part and at the end.
pub struct SmoothStream {
    delay: Option<Duration>,
    chunking: Chunking,
}

impl SmoothStream {
    pub fn new(delay: Option<Duration>, chunking: Chunking) -> Self {
        Self { delay, chunking }
    }
}

impl Default for SmoothStream {
    fn default() -> Self {
        Self::new(Some(Duration::from_millis(10)), Chunking::Word)
    }
}

impl StreamTransform for SmoothStream {
    fn transform(&self, stream: PartStream, _ctx: TransformContext) -> PartStream {
        let delay = self.delay;
        let chunker = self.chunking.regex();
        Box::pin(async_stream::stream! {
            let mut buffer = String::new();
            let mut inner = std::pin::pin!(stream);

            while let Some(part) = inner.next().await {
                let StreamPart::TextDelta(text) = part else {
                    if !buffer.is_empty() {
                        yield StreamPart::TextDelta(std::mem::take(&mut buffer));
                    }
                    yield part;
                    continue;
                };

                buffer.push_str(&text);
                while let Some(end) = chunker.find(&buffer).map(|m| m.end()).filter(|end| *end > 0) {
                    let chunk: String = buffer.drain(..end).collect();
                    yield StreamPart::TextDelta(chunk);
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                }
            }

            if !buffer.is_empty() {
                yield StreamPart::TextDelta(buffer);
            }
        })
    }
}
