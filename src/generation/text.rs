//! Text generation with a multi-step tool loop.

use std::sync::Arc;

use bon::Builder;
use futures::future::try_join_all;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::step::{
    append_to_last_message, check_max_steps, next_step_type, regular_mode, response_metadata,
    step_text, to_response_messages, StepOutcome,
};
use crate::config::WeaveConfig;
use crate::error::WeaveError;
use crate::prompt::{standardize_prompt, Prompt};
use crate::provider::{CallOptions, GenerateResponse, ModelProvider};
use crate::telemetry::{resolve_tracer, Tracer};
use crate::tools::{execute_tools, resolve_tool_call, ToolCallRepair, ToolChoice, ToolSet};
use crate::types::{
    reasoning_text, GenerateTextResult, GenerationSettings, ModelMessage, StepResult, StepType,
    Usage,
};
use crate::util::id::message_id;
use crate::util::retry::RetryPolicy;

/// Called once per completed step. A returned error is logged, not raised.
pub type StepCallback = Arc<dyn Fn(&StepResult) -> Result<(), WeaveError> + Send + Sync>;

/// Options for [`generate_text`]. Unset limits fall back to [`WeaveConfig`].
#[derive(Clone, Builder)]
pub struct GenerateTextOptions {
    pub model: Arc<dyn ModelProvider>,
    #[builder(into)]
    pub prompt: Prompt,
    #[builder(default)]
    pub settings: GenerationSettings,
    #[builder(default)]
    pub tools: ToolSet,
    pub tool_choice: Option<ToolChoice>,
    /// Advertise only these tools to the model.
    pub active_tools: Option<Vec<String>>,
    pub max_steps: Option<u32>,
    pub continue_steps: Option<bool>,
    pub max_retries: Option<u32>,
    pub repair_tool_call: Option<Arc<dyn ToolCallRepair>>,
    pub on_step_finish: Option<StepCallback>,
    #[builder(default)]
    pub abort: CancellationToken,
    pub tracer: Option<Arc<dyn Tracer>>,
    pub config: Option<WeaveConfig>,
}

/// Loop limits after applying config defaults.
#[derive(Debug, Clone)]
pub(crate) struct LoopLimits {
    pub max_steps: u32,
    pub continue_steps: bool,
    pub retry: RetryPolicy,
}

impl LoopLimits {
    pub(crate) fn resolve(
        config: Option<&WeaveConfig>,
        max_steps: Option<u32>,
        continue_steps: Option<bool>,
        max_retries: Option<u32>,
    ) -> Result<Self, WeaveError> {
        let config = match config {
            Some(config) => config,
            None => WeaveConfig::global(),
        };
        let max_steps = max_steps.unwrap_or(config.max_steps);
        check_max_steps(max_steps)?;
        let mut retry = config.retry_policy();
        if let Some(max_retries) = max_retries {
            retry.max_retries = max_retries;
        }
        Ok(Self {
            max_steps,
            continue_steps: continue_steps.unwrap_or(config.continue_steps),
            retry,
        })
    }
}

/// Generate text, looping through tool calls and continuations.
///
/// Each step issues one model call. Tool calls are resolved (with one
/// repair attempt) and executed concurrently; the loop continues while
/// every call has a result and the step budget allows.
pub async fn generate_text(options: GenerateTextOptions) -> Result<GenerateTextResult, WeaveError> {
    let limits = LoopLimits::resolve(
        options.config.as_ref(),
        options.max_steps,
        options.continue_steps,
        options.max_retries,
    )?;
    let tracer = resolve_tracer(options.tracer.clone());

    let mut span = tracer.start_span(
        "stepweave.generate_text",
        &[
            ("stepweave.model.provider", json!(options.model.provider_name())),
            ("stepweave.model.id", json!(options.model.model_id())),
            ("stepweave.settings.max_steps", json!(limits.max_steps)),
        ],
    );

    let result = run_steps(&options, &limits, tracer.as_ref()).await;

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

async fn run_steps(
    options: &GenerateTextOptions,
    limits: &LoopLimits,
    tracer: &dyn Tracer,
) -> Result<GenerateTextResult, WeaveError> {
    let settings = options.settings.validate()?;
    let prompt = standardize_prompt(&options.prompt)?;
    let model = options.model.as_ref();
    let mode = regular_mode(
        &options.tools,
        options.tool_choice.as_ref(),
        options.active_tools.as_deref(),
    );

    let mut response_messages: Vec<ModelMessage> = Vec::new();
    let mut steps: Vec<StepResult> = Vec::new();
    let mut usage = Usage::default();
    let mut text = String::new();
    let mut sources = Vec::new();
    let mut step_type = StepType::Initial;

    loop {
        let step_input: Vec<ModelMessage> = prompt
            .messages
            .iter()
            .chain(&response_messages)
            .cloned()
            .collect();
        let mut messages = Vec::with_capacity(step_input.len() + 1);
        if let Some(system) = &prompt.system {
            messages.push(ModelMessage::system(system));
        }
        messages.extend(step_input.iter().cloned());

        let call = CallOptions {
            messages,
            mode: mode.clone(),
            settings: settings.clone(),
            abort: options.abort.clone(),
        };

        debug!(step = steps.len(), step_type = %step_type, "generate_text: calling provider");
        let response = call_model(model, &call, &limits.retry, tracer).await?;

        let tool_calls = try_join_all(response.tool_calls.iter().map(|request| {
            resolve_tool_call(
                request,
                &options.tools,
                options.repair_tool_call.as_deref(),
                prompt.system.as_deref(),
                &step_input,
            )
        }))
        .await?;

        let tool_results = if options.tools.is_empty() {
            Vec::new()
        } else {
            execute_tools(
                &tool_calls,
                &options.tools,
                Arc::new(step_input),
                &options.abort,
                tracer,
            )
            .await?
        };

        usage += response.usage;
        let next = next_step_type(StepOutcome {
            completed_steps: steps.len() as u32 + 1,
            max_steps: limits.max_steps,
            continue_steps: limits.continue_steps,
            finish_reason: response.finish_reason,
            tool_calls: tool_calls.len(),
            tool_results: tool_results.len(),
        });

        let generated = response.text.clone().unwrap_or_default();
        let current_text = step_text(step_type, &text, &generated, next);
        if step_type == StepType::Continue || next == StepType::Continue {
            text.push_str(&current_text);
        } else {
            text = current_text.clone();
        }
        if step_type == StepType::Continue {
            append_to_last_message(&mut response_messages, &current_text);
        } else {
            response_messages.extend(to_response_messages(
                &current_text,
                &response.files,
                &response.reasoning,
                &tool_calls,
                &tool_results,
                message_id(),
            ));
        }
        sources.extend(response.sources.iter().cloned());

        let mut metadata = response_metadata(response.response.as_ref(), model);
        metadata.messages = response_messages.clone();

        let step = StepResult {
            step_type,
            text: current_text,
            reasoning: reasoning_text(&response.reasoning),
            reasoning_details: response.reasoning.clone(),
            files: response.files.clone(),
            sources: response.sources.clone(),
            tool_calls,
            tool_results,
            finish_reason: response.finish_reason,
            usage: response.usage,
            warnings: response.warnings.clone(),
            request: response.request.clone(),
            response: metadata,
            is_continued: next == StepType::Continue,
        };

        if let Some(callback) = &options.on_step_finish {
            if let Err(e) = callback(&step) {
                warn!(step = steps.len(), error = %e, "step callback failed");
            }
        }
        debug!(step = steps.len(), next = %next, "generate_text: step finished");
        steps.push(step);

        if next == StepType::Done {
            break;
        }
        step_type = next;
    }

    let Some(last) = steps.last().cloned() else {
        return Err(WeaveError::InvalidState("no step was executed".into()));
    };
    Ok(GenerateTextResult {
        text,
        reasoning: last.reasoning,
        reasoning_details: last.reasoning_details,
        files: last.files,
        sources,
        tool_calls: last.tool_calls,
        tool_results: last.tool_results,
        finish_reason: last.finish_reason,
        usage,
        warnings: last.warnings,
        steps,
        response: last.response,
    })
}

/// One model call under the retry policy, raced against the abort token.
async fn call_model(
    model: &dyn ModelProvider,
    call: &CallOptions,
    retry: &RetryPolicy,
    tracer: &dyn Tracer,
) -> Result<GenerateResponse, WeaveError> {
    retry
        .execute(&call.abort, move || async move {
            let mut span = tracer.start_span(
                "stepweave.generate_text.do_generate",
                &[("stepweave.model.id", json!(model.model_id()))],
            );
            let outcome = tokio::select! {
                biased;
                _ = call.abort.cancelled() => Err(WeaveError::Aborted),
                outcome = model.do_generate(call) => outcome,
            };
            match &outcome {
                Ok(response) => {
                    span.set_attribute(
                        "stepweave.response.finish_reason",
                        json!(response.finish_reason.to_string()),
                    );
                    span.set_attribute(
                        "stepweave.usage.prompt_tokens",
                        json!(response.usage.prompt_tokens),
                    );
                    span.set_attribute(
                        "stepweave.usage.completion_tokens",
                        json!(response.usage.completion_tokens),
                    );
                }
                Err(e) => span.record_error(e),
            }
            span.end();
            outcome
        })
        .await
}
