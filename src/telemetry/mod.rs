//! Span recording capability passed explicitly into each engine entry point.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

/// Records spans for one engine call.
pub trait Tracer: Send + Sync {
    /// Open a span. Attributes are set up front; more can be added later.
    fn start_span(&self, name: &str, attributes: &[(&str, Value)]) -> Box<dyn Span>;
}

/// An open span. Dropping without `end` leaves the span unfinished.
pub trait Span: Send + Sync {
    fn set_attribute(&mut self, key: &str, value: Value);
    fn add_event(&mut self, name: &str, attributes: &[(&str, Value)]);
    fn record_error(&mut self, error: &dyn std::error::Error);
    fn end(&mut self);
}

/// Tracer that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

struct NoopSpan;

impl Tracer for NoopTracer {
    fn start_span(&self, _name: &str, _attributes: &[(&str, Value)]) -> Box<dyn Span> {
        Box::new(NoopSpan)
    }
}

impl Span for NoopSpan {
    fn set_attribute(&mut self, _key: &str, _value: Value) {}
    fn add_event(&mut self, _name: &str, _attributes: &[(&str, Value)]) {}
    fn record_error(&mut self, _error: &dyn std::error::Error) {}
    fn end(&mut self) {}
}

/// Tracer that reports spans as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

struct LogSpan {
    name: String,
    started: Instant,
    attributes: serde_json::Map<String, Value>,
    ended: bool,
}

impl Tracer for LogTracer {
    fn start_span(&self, name: &str, attributes: &[(&str, Value)]) -> Box<dyn Span> {
        tracing::debug!(span = name, "span started");
        Box::new(LogSpan {
            name: name.to_string(),
            started: Instant::now(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            ended: false,
        })
    }
}

impl Span for LogSpan {
    fn set_attribute(&mut self, key: &str, value: Value) {
        self.attributes.insert(key.to_string(), value);
    }

    fn add_event(&mut self, name: &str, attributes: &[(&str, Value)]) {
        let attributes = Value::Object(
            attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        );
        tracing::debug!(span = %self.name, event = name, attributes = %attributes, "span event");
    }

    fn record_error(&mut self, error: &dyn std::error::Error) {
        tracing::warn!(span = %self.name, error = %error, "span error");
    }

    fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        let attributes = Value::Object(std::mem::take(&mut self.attributes));
        tracing::debug!(
            span = %self.name,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            attributes = %attributes,
            "span ended"
        );
    }
}

/// Tracer to use when the caller supplied none.
pub fn resolve_tracer(tracer: Option<Arc<dyn Tracer>>) -> Arc<dyn Tracer> {
    tracer.unwrap_or_else(|| Arc::new(NoopTracer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_tracer_accepts_full_span_lifecycle() {
        let tracer = resolve_tracer(None);
        let mut span = tracer.start_span("stepweave.test", &[("a", Value::from(1))]);

        span.set_attribute("b", Value::from("x"));
        span.add_event("first-chunk", &[]);
        span.end();
    }

    #[test]
    fn log_span_end_is_idempotent() {
        let mut span = LogTracer.start_span("stepweave.test", &[]);

        span.end();
        span.end();
    }
}
