//! Structured output generation, in one shot or streamed as partial objects.

use std::sync::Arc;

use async_trait::async_trait;
use bon::Builder;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::WeaveConfig;
use crate::error::{SharedError, WeaveError};
use crate::json::parse_partial_json;
use crate::output::{inject_json_instruction, FinalContext, Output, OutputKind, OutputStrategy, PartialInput};
use crate::prompt::{standardize_prompt, Prompt, StandardizedPrompt};
use crate::provider::{
    CallMode, CallOptions, GenerateResponse, ModelProvider, ModelStreamPart, ResponseInfo,
    StreamResponse, ToolDefinition,
};
use crate::stream::ReplayLog;
use crate::telemetry::{resolve_tracer, Tracer};
use crate::types::{
    CallWarning, FinishReason, GenerateObjectResult, GenerationSettings, ResponseMetadata, Usage,
};
use crate::util::deferred::{deferred, Deferred, Resolver};
use crate::util::id::object_response_id;
use crate::util::retry::RetryPolicy;

const DEFAULT_TOOL_NAME: &str = "json";
const DEFAULT_TOOL_DESCRIPTION: &str = "Respond with a JSON object.";

/// How the model is asked for JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ObjectMode {
    /// Response-format JSON, with schema instructions in the system prompt
    /// when the provider lacks structured outputs.
    #[default]
    Json,
    /// Arguments of a forced tool call.
    Tool,
}

/// Hook that gets one chance to fix object text that failed to parse or
/// validate.
#[async_trait]
pub trait RepairText: Send + Sync {
    /// Return replacement text, or `None` to surface the original error.
    async fn repair(&self, text: &str, error: &WeaveError) -> Result<Option<String>, WeaveError>;
}

/// Options for [`generate_object`].
#[derive(Clone, Builder)]
pub struct GenerateObjectOptions {
    pub model: Arc<dyn ModelProvider>,
    #[builder(into)]
    pub prompt: Prompt,
    pub output: Output,
    #[builder(default)]
    pub mode: ObjectMode,
    pub schema_name: Option<String>,
    pub schema_description: Option<String>,
    #[builder(default)]
    pub settings: GenerationSettings,
    pub max_retries: Option<u32>,
    pub repair_text: Option<Arc<dyn RepairText>>,
    #[builder(default)]
    pub abort: CancellationToken,
    pub tracer: Option<Arc<dyn Tracer>>,
    pub config: Option<WeaveConfig>,
}

/// Options for [`stream_object`].
#[derive(Clone, Builder)]
pub struct StreamObjectOptions {
    pub model: Arc<dyn ModelProvider>,
    #[builder(into)]
    pub prompt: Prompt,
    pub output: Output,
    #[builder(default)]
    pub mode: ObjectMode,
    pub schema_name: Option<String>,
    pub schema_description: Option<String>,
    #[builder(default)]
    pub settings: GenerationSettings,
    pub max_retries: Option<u32>,
    #[builder(default)]
    pub abort: CancellationToken,
    pub tracer: Option<Arc<dyn Tracer>>,
    pub config: Option<WeaveConfig>,
}

/// Check that the output shape, mode and schema naming fit together.
fn validate_object_input(
    output: &Output,
    mode: ObjectMode,
    schema_name: Option<&str>,
    schema_description: Option<&str>,
) -> Result<(), WeaveError> {
    let label = match output {
        Output::NoSchema => {
            if mode == ObjectMode::Tool {
                return Err(WeaveError::invalid_argument(
                    "mode",
                    r#"Mode must be "json" for no-schema output."#,
                ));
            }
            "no-schema"
        }
        Output::Enum { .. } => "enum",
        Output::Object { .. } | Output::Array { .. } => return Ok(()),
    };
    if schema_description.is_some() {
        return Err(WeaveError::invalid_argument(
            "schemaDescription",
            format!("Schema description is not supported for {label} output."),
        ));
    }
    if schema_name.is_some() {
        return Err(WeaveError::invalid_argument(
            "schemaName",
            format!("Schema name is not supported for {label} output."),
        ));
    }
    Ok(())
}

/// Everything needed to issue the object call, fixed before the first attempt.
struct ObjectCall {
    strategy: Arc<dyn OutputStrategy>,
    mode: ObjectMode,
    call: CallOptions,
    retry: RetryPolicy,
}

/// Borrowed view of the options shared by both object entry points.
struct ObjectSpec<'a> {
    prompt: &'a Prompt,
    output: &'a Output,
    mode: ObjectMode,
    schema_name: Option<&'a str>,
    schema_description: Option<&'a str>,
    settings: &'a GenerationSettings,
    max_retries: Option<u32>,
    config: Option<&'a WeaveConfig>,
    abort: &'a CancellationToken,
}

impl GenerateObjectOptions {
    fn spec(&self) -> ObjectSpec<'_> {
        ObjectSpec {
            prompt: &self.prompt,
            output: &self.output,
            mode: self.mode,
            schema_name: self.schema_name.as_deref(),
            schema_description: self.schema_description.as_deref(),
            settings: &self.settings,
            max_retries: self.max_retries,
            config: self.config.as_ref(),
            abort: &self.abort,
        }
    }
}

impl StreamObjectOptions {
    fn spec(&self) -> ObjectSpec<'_> {
        ObjectSpec {
            prompt: &self.prompt,
            output: &self.output,
            mode: self.mode,
            schema_name: self.schema_name.as_deref(),
            schema_description: self.schema_description.as_deref(),
            settings: &self.settings,
            max_retries: self.max_retries,
            config: self.config.as_ref(),
            abort: &self.abort,
        }
    }
}

fn prepare_object_call(
    model: &dyn ModelProvider,
    spec: ObjectSpec<'_>,
) -> Result<ObjectCall, WeaveError> {
    let ObjectSpec {
        prompt,
        output,
        mode,
        schema_name,
        schema_description,
        settings,
        max_retries,
        config,
        abort,
    } = spec;
    validate_object_input(output, mode, schema_name, schema_description)?;
    let strategy = output.strategy()?;
    let settings = settings.validate()?;
    let mut prompt: StandardizedPrompt = standardize_prompt(prompt)?;

    let config = match config {
        Some(config) => config,
        None => WeaveConfig::global(),
    };
    let mut retry = config.retry_policy();
    if let Some(max_retries) = max_retries {
        retry.max_retries = max_retries;
    }

    let schema = strategy.json_schema();
    let mode_spec = match mode {
        ObjectMode::Json => {
            if schema.is_none() || !model.supports_structured_outputs() {
                prompt.system = Some(inject_json_instruction(
                    prompt.system.as_deref(),
                    schema.as_ref(),
                ));
            }
            CallMode::ObjectJson {
                schema,
                name: schema_name.map(str::to_string),
                description: schema_description.map(str::to_string),
            }
        }
        ObjectMode::Tool => CallMode::ObjectTool {
            tool: ToolDefinition {
                name: schema_name.unwrap_or(DEFAULT_TOOL_NAME).to_string(),
                description: schema_description
                    .unwrap_or(DEFAULT_TOOL_DESCRIPTION)
                    .to_string(),
                parameters: schema.unwrap_or_else(|| json!({})),
            },
        },
    };

    Ok(ObjectCall {
        strategy,
        mode,
        call: CallOptions {
            messages: prompt.model_messages(),
            mode: mode_spec,
            settings,
            abort: abort.clone(),
        },
        retry,
    })
}

fn object_metadata(info: Option<&ResponseInfo>, model: &dyn ModelProvider) -> ResponseMetadata {
    let info = info.cloned().unwrap_or_default();
    ResponseMetadata {
        id: info.id.unwrap_or_else(object_response_id),
        timestamp: info.timestamp.unwrap_or_else(chrono::Utc::now),
        model_id: info.model_id.unwrap_or_else(|| model.model_id().to_string()),
        messages: Vec::new(),
    }
}

/// Generate a JSON value shaped by `output`.
///
/// Text that does not parse or validate is handed to the `repair_text`
/// hook once before [`WeaveError::NoObjectGenerated`] is returned.
pub async fn generate_object(
    options: GenerateObjectOptions,
) -> Result<GenerateObjectResult, WeaveError> {
    let model = options.model.as_ref();
    let prepared = prepare_object_call(model, options.spec())?;
    let tracer = resolve_tracer(options.tracer.clone());

    let mut span = tracer.start_span(
        "stepweave.generate_object",
        &[
            ("stepweave.model.provider", json!(model.provider_name())),
            ("stepweave.model.id", json!(model.model_id())),
            ("stepweave.settings.output", json!(prepared.strategy.kind().to_string())),
            ("stepweave.settings.mode", json!(prepared.mode.to_string())),
        ],
    );

    let result = run_generate_object(&options, &prepared).await;
    match &result {
        Ok(result) => {
            span.set_attribute(
                "stepweave.response.finish_reason",
                json!(result.finish_reason.to_string()),
            );
            span.set_attribute("stepweave.usage.total_tokens", json!(result.usage.total_tokens));
        }
        Err(e) => span.record_error(e),
    }
    span.end();
    result
}

async fn run_generate_object(
    options: &GenerateObjectOptions,
    prepared: &ObjectCall,
) -> Result<GenerateObjectResult, WeaveError> {
    let model = options.model.as_ref();
    let call = &prepared.call;

    debug!(mode = %prepared.mode, output = %prepared.strategy.kind(), "generate_object: calling provider");
    let response: GenerateResponse = prepared
        .retry
        .execute(&call.abort, move || async move {
            tokio::select! {
                biased;
                _ = call.abort.cancelled() => Err(WeaveError::Aborted),
                outcome = model.do_generate(call) => outcome,
            }
        })
        .await?;

    let metadata = object_metadata(response.response.as_ref(), model);
    let (text, missing) = match prepared.mode {
        ObjectMode::Json => (
            response.text.clone(),
            "No object generated: the model did not return a response.",
        ),
        ObjectMode::Tool => (
            response.tool_calls.first().map(|call| call.args.clone()),
            "No object generated: the tool was not called.",
        ),
    };
    let Some(text) = text else {
        return Err(WeaveError::NoObjectGenerated {
            message: missing.into(),
            text: None,
            usage: Some(response.usage),
            finish_reason: Some(response.finish_reason),
            cause: None,
        });
    };

    let context = FinalContext {
        text: text.clone(),
        usage: response.usage,
        finish_reason: Some(response.finish_reason),
    };
    let (object, raw_text) = match process_object_text(prepared.strategy.as_ref(), &text, &context) {
        Ok(object) => (object, text),
        Err(error) => {
            let (Some(repair), WeaveError::NoObjectGenerated { cause: Some(cause), .. }) =
                (&options.repair_text, &error)
            else {
                return Err(error);
            };
            if !matches!(
                cause.as_ref(),
                WeaveError::Serialization(_) | WeaveError::TypeValidation { .. }
            ) {
                return Err(error);
            }
            debug!(error = %cause, "generate_object: attempting text repair");
            let Some(repaired) = repair.repair(&text, cause).await? else {
                return Err(error);
            };
            let context = FinalContext {
                text: repaired.clone(),
                ..context
            };
            let object = process_object_text(prepared.strategy.as_ref(), &repaired, &context)?;
            (object, repaired)
        }
    };

    Ok(GenerateObjectResult {
        object,
        raw_text,
        finish_reason: response.finish_reason,
        usage: response.usage,
        warnings: response.warnings,
        request: response.request,
        response: metadata,
    })
}

/// Parse and validate complete object text.
fn process_object_text(
    strategy: &dyn OutputStrategy,
    text: &str,
    context: &FinalContext,
) -> Result<Value, WeaveError> {
    let value: Value = serde_json::from_str(text).map_err(|e| WeaveError::NoObjectGenerated {
        message: "No object generated: could not parse the response.".into(),
        text: Some(text.to_string()),
        usage: Some(context.usage),
        finish_reason: context.finish_reason,
        cause: Some(Box::new(WeaveError::Serialization(e))),
    })?;
    strategy
        .validate_final(Some(value), context)
        .map_err(|e| WeaveError::NoObjectGenerated {
            message: "No object generated: response did not match schema.".into(),
            text: Some(text.to_string()),
            usage: Some(context.usage),
            finish_reason: context.finish_reason,
            cause: Some(Box::new(e)),
        })
}

/// One event of a streamed object generation.
#[derive(Debug, Clone)]
pub enum ObjectStreamPart {
    /// A new validated partial object.
    Object(Value),
    /// Text to keep the emitted JSON in step with the partial objects.
    TextDelta(String),
    Finish {
        finish_reason: FinishReason,
        usage: Usage,
        response: ResponseMetadata,
    },
    Error(SharedError),
}

struct ObjectResolvers {
    object: Resolver<Value>,
    usage: Resolver<Usage>,
    finish_reason: Resolver<FinishReason>,
    response: Resolver<ResponseMetadata>,
    warnings: Resolver<Vec<CallWarning>>,
    request: Resolver<Option<Value>>,
}

impl ObjectResolvers {
    fn reject_all(&self, error: SharedError) {
        self.object.reject(error.clone());
        self.usage.reject(error.clone());
        self.finish_reason.reject(error.clone());
        self.response.reject(error.clone());
        self.warnings.reject(error.clone());
        self.request.reject(error);
    }
}

/// Handle to a running [`stream_object`] call.
pub struct StreamObjectResult {
    log: ReplayLog<ObjectStreamPart>,
    strategy: Arc<dyn OutputStrategy>,
    object: Deferred<Value>,
    usage: Deferred<Usage>,
    finish_reason: Deferred<FinishReason>,
    response: Deferred<ResponseMetadata>,
    warnings: Deferred<Vec<CallWarning>>,
    request: Deferred<Option<Value>>,
}

impl std::fmt::Debug for StreamObjectResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamObjectResult")
            .field("output", &self.strategy.kind())
            .field("closed", &self.log.is_closed())
            .finish_non_exhaustive()
    }
}

impl StreamObjectResult {
    pub fn full_stream(&self) -> BoxStream<'static, ObjectStreamPart> {
        self.log.subscribe()
    }

    /// Each new partial object.
    pub fn partial_object_stream(&self) -> BoxStream<'static, Value> {
        Box::pin(self.log.subscribe().filter_map(|part| {
            futures::future::ready(match part {
                ObjectStreamPart::Object(object) => Some(object),
                _ => None,
            })
        }))
    }

    /// JSON text matching the partial objects.
    pub fn text_stream(&self) -> BoxStream<'static, String> {
        Box::pin(self.log.subscribe().filter_map(|part| {
            futures::future::ready(match part {
                ObjectStreamPart::TextDelta(text) => Some(text),
                _ => None,
            })
        }))
    }

    /// Each completed array element, exactly once. Array output only.
    pub fn element_stream(&self) -> Result<BoxStream<'static, Value>, WeaveError> {
        if !self.strategy.supports_element_stream() {
            return Err(WeaveError::UnsupportedFunctionality(format!(
                "element streams in {} mode",
                self.strategy.kind()
            )));
        }
        let parts = self.log.subscribe();
        Ok(Box::pin(async_stream::stream! {
            let mut parts = std::pin::pin!(parts);
            let mut published = 0usize;
            while let Some(part) = parts.next().await {
                let ObjectStreamPart::Object(Value::Array(elements)) = part else {
                    continue;
                };
                for element in elements.into_iter().skip(published) {
                    published += 1;
                    yield element;
                }
            }
        }))
    }

    /// The final validated object.
    pub async fn object(&self) -> Result<Value, SharedError> {
        self.object.get().await
    }

    pub async fn usage(&self) -> Result<Usage, SharedError> {
        self.usage.get().await
    }

    pub async fn finish_reason(&self) -> Result<FinishReason, SharedError> {
        self.finish_reason.get().await
    }

    pub async fn response(&self) -> Result<ResponseMetadata, SharedError> {
        self.response.get().await
    }

    pub async fn warnings(&self) -> Result<Vec<CallWarning>, SharedError> {
        self.warnings.get().await
    }

    pub async fn request(&self) -> Result<Option<Value>, SharedError> {
        self.request.get().await
    }
}

/// Stream a JSON value shaped by `output`, publishing partial objects as
/// the text arrives.
///
/// Enum output cannot be streamed and is rejected up front. Must be called
/// inside a Tokio runtime.
pub fn stream_object(options: StreamObjectOptions) -> Result<StreamObjectResult, WeaveError> {
    let model = options.model.clone();
    let prepared = prepare_object_call(model.as_ref(), options.spec())?;
    if prepared.strategy.kind() == OutputKind::Enum {
        return Err(WeaveError::UnsupportedFunctionality(
            "partial results in enum mode".into(),
        ));
    }
    let tracer = resolve_tracer(options.tracer);

    let (object, object_rx) = deferred();
    let (usage, usage_rx) = deferred();
    let (finish_reason, finish_reason_rx) = deferred();
    let (response, response_rx) = deferred();
    let (warnings, warnings_rx) = deferred();
    let (request, request_rx) = deferred();
    let resolvers = ObjectResolvers {
        object,
        usage,
        finish_reason,
        response,
        warnings,
        request,
    };

    let log = ReplayLog::new();
    let result = StreamObjectResult {
        log: log.clone(),
        strategy: prepared.strategy.clone(),
        object: object_rx,
        usage: usage_rx,
        finish_reason: finish_reason_rx,
        response: response_rx,
        warnings: warnings_rx,
        request: request_rx,
    };

    tokio::spawn(async move {
        let mut span = tracer.start_span(
            "stepweave.stream_object",
            &[
                ("stepweave.model.provider", json!(model.provider_name())),
                ("stepweave.model.id", json!(model.model_id())),
                ("stepweave.settings.output", json!(prepared.strategy.kind().to_string())),
                ("stepweave.settings.mode", json!(prepared.mode.to_string())),
            ],
        );

        let outcome = drive_object_stream(model.as_ref(), &prepared, &log, &resolvers).await;
        let error = match outcome {
            Ok(None) => None,
            Ok(Some(error)) => Some(error),
            Err(e) => {
                span.record_error(&e);
                let error = Arc::new(e);
                log.push(ObjectStreamPart::Error(error.clone()));
                Some(error)
            }
        };

        let error = error.unwrap_or_else(|| {
            Arc::new(WeaveError::no_object(
                "No object generated: the model did not return a response.",
            ))
        });
        resolvers.reject_all(error);
        log.close();
        span.end();
    });

    Ok(result)
}

/// Read the provider stream into `log`. Returns the last error part seen,
/// which settles whatever deferreds the stream left open.
async fn drive_object_stream(
    model: &dyn ModelProvider,
    prepared: &ObjectCall,
    log: &ReplayLog<ObjectStreamPart>,
    resolvers: &ObjectResolvers,
) -> Result<Option<SharedError>, WeaveError> {
    let call = &prepared.call;
    let StreamResponse {
        stream,
        warnings,
        request,
    } = prepared
        .retry
        .execute(&call.abort, move || async move {
            tokio::select! {
                biased;
                _ = call.abort.cancelled() => Err(WeaveError::Aborted),
                outcome = model.do_stream(call) => outcome,
            }
        })
        .await?;
    resolvers.warnings.resolve(warnings);
    resolvers.request.resolve(request);

    let mut stream = std::pin::pin!(stream);
    let mut info = ResponseInfo::default();
    let mut accumulated = String::new();
    let mut text_delta = String::new();
    let mut latest_json: Option<Value> = None;
    let mut latest_object: Option<Value> = None;
    let mut is_first_delta = true;
    let mut last_error: Option<SharedError> = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = call.abort.cancelled() => return Err(WeaveError::Aborted),
            next = stream.next() => next,
        };
        let Some(part) = next else {
            break;
        };

        let chunk = match (prepared.mode, part) {
            (_, Err(e)) | (_, Ok(ModelStreamPart::Error(e))) => {
                let error = Arc::new(e);
                log.push(ObjectStreamPart::Error(error.clone()));
                last_error = Some(error);
                continue;
            }
            (ObjectMode::Json, Ok(ModelStreamPart::TextDelta(text))) => text,
            (ObjectMode::Tool, Ok(ModelStreamPart::ToolCallDelta { args_text_delta, .. })) => {
                args_text_delta
            }
            (_, Ok(ModelStreamPart::ResponseMetadata(update))) => {
                info.id = update.id.or(info.id);
                info.timestamp = update.timestamp.or(info.timestamp);
                info.model_id = update.model_id.or(info.model_id);
                continue;
            }
            (_, Ok(ModelStreamPart::Finish { finish_reason, usage })) => {
                if !text_delta.is_empty() {
                    log.push(ObjectStreamPart::TextDelta(std::mem::take(&mut text_delta)));
                }
                let metadata = object_metadata(Some(&info), model);
                log.push(ObjectStreamPart::Finish {
                    finish_reason,
                    usage,
                    response: metadata.clone(),
                });
                resolvers.usage.resolve(usage);
                resolvers.finish_reason.resolve(finish_reason);
                resolvers.response.resolve(metadata);

                let context = FinalContext {
                    text: accumulated.clone(),
                    usage,
                    finish_reason: Some(finish_reason),
                };
                match prepared.strategy.validate_final(latest_json.clone(), &context) {
                    Ok(object) => {
                        resolvers.object.resolve(object);
                    }
                    Err(e) => {
                        warn!(error = %e, "stream_object: final object did not validate");
                        resolvers.object.reject(Arc::new(WeaveError::NoObjectGenerated {
                            message: "No object generated: response did not match schema.".into(),
                            text: Some(accumulated.clone()),
                            usage: Some(usage),
                            finish_reason: Some(finish_reason),
                            cause: Some(Box::new(e)),
                        }));
                    }
                }
                continue;
            }
            _ => continue,
        };

        accumulated.push_str(&chunk);
        text_delta.push_str(&chunk);

        let parsed = parse_partial_json(Some(&accumulated));
        let Some(current) = parsed.value.as_ref() else {
            continue;
        };
        if latest_json.as_ref() == Some(current) {
            continue;
        }
        let validated = prepared.strategy.validate_partial(PartialInput {
            value: current,
            text_delta: &text_delta,
            latest: latest_object.as_ref(),
            is_first_delta,
            is_final_delta: parsed.is_complete(),
        });
        let Ok(output) = validated else {
            continue;
        };
        if latest_object.as_ref() == Some(&output.partial) {
            continue;
        }

        latest_json = parsed.value.clone();
        latest_object = Some(output.partial.clone());
        log.push(ObjectStreamPart::Object(output.partial));
        log.push(ObjectStreamPart::TextDelta(output.text_delta));
        text_delta.clear();
        is_first_delta = false;
    }

    Ok(last_error)
}
