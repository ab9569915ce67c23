//! Interceptors layered around a [`ModelProvider`].

use std::sync::Arc;

use async_trait::async_trait;

use super::{CallOptions, GenerateResponse, ModelProvider, StreamResponse};
use crate::error::WeaveError;

/// Which provider entry point a call goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CallKind {
    Generate,
    Stream,
}

/// Wraps provider calls. Every hook defaults to passing the call through.
#[async_trait]
pub trait ProviderMiddleware: Send + Sync {
    /// Rewrite the options before the call reaches `wrap_*`.
    async fn transform_options(
        &self,
        options: CallOptions,
        _kind: CallKind,
    ) -> Result<CallOptions, WeaveError> {
        Ok(options)
    }

    async fn wrap_generate(
        &self,
        options: &CallOptions,
        next: &dyn ModelProvider,
    ) -> Result<GenerateResponse, WeaveError> {
        next.do_generate(options).await
    }

    async fn wrap_stream(
        &self,
        options: &CallOptions,
        next: &dyn ModelProvider,
    ) -> Result<StreamResponse, WeaveError> {
        next.do_stream(options).await
    }
}

struct WrappedProvider {
    inner: Arc<dyn ModelProvider>,
    middleware: Arc<dyn ProviderMiddleware>,
}

#[async_trait]
impl ModelProvider for WrappedProvider {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn supports_structured_outputs(&self) -> bool {
        self.inner.supports_structured_outputs()
    }

    async fn do_generate(&self, options: &CallOptions) -> Result<GenerateResponse, WeaveError> {
        let options = self
            .middleware
            .transform_options(options.clone(), CallKind::Generate)
            .await?;
        self.middleware
            .wrap_generate(&options, self.inner.as_ref())
            .await
    }

    async fn do_stream(&self, options: &CallOptions) -> Result<StreamResponse, WeaveError> {
        let options = self
            .middleware
            .transform_options(options.clone(), CallKind::Stream)
            .await?;
        self.middleware.wrap_stream(&options, self.inner.as_ref()).await
    }
}

/// Compose middlewares around `model`. The first middleware is outermost.
pub fn wrap_provider(
    model: Arc<dyn ModelProvider>,
    middlewares: Vec<Arc<dyn ProviderMiddleware>>,
) -> Arc<dyn ModelProvider> {
    middlewares
        .into_iter()
        .rev()
        .fold(model, |inner, middleware| {
            Arc::new(WrappedProvider { inner, middleware })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelMessage;
    use std::sync::Mutex;

    struct Echo;

    #[async_trait]
    impl ModelProvider for Echo {
        fn provider_name(&self) -> &str {
            "echo"
        }

        fn model_id(&self) -> &str {
            "echo-1"
        }

        async fn do_generate(&self, options: &CallOptions) -> Result<GenerateResponse, WeaveError> {
            let text = options
                .messages
                .iter()
                .map(|m| m.text())
                .collect::<Vec<_>>()
                .join("|");
            Ok(GenerateResponse {
                text: Some(text),
                ..Default::default()
            })
        }

        async fn do_stream(&self, _options: &CallOptions) -> Result<StreamResponse, WeaveError> {
            Err(WeaveError::UnsupportedFunctionality("streaming".into()))
        }
    }

    struct Tag {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ProviderMiddleware for Tag {
        async fn transform_options(
            &self,
            mut options: CallOptions,
            kind: CallKind,
        ) -> Result<CallOptions, WeaveError> {
            self.log.lock().unwrap().push(format!("{}:{kind}", self.name));
            options.messages.push(ModelMessage::user(self.name));
            Ok(options)
        }

        async fn wrap_generate(
            &self,
            options: &CallOptions,
            next: &dyn ModelProvider,
        ) -> Result<GenerateResponse, WeaveError> {
            let mut response = next.do_generate(options).await?;
            response.text = response.text.map(|t| format!("{}({t})", self.name));
            Ok(response)
        }
    }

    #[tokio::test]
    async fn first_middleware_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let model = wrap_provider(
            Arc::new(Echo),
            vec![
                Arc::new(Tag { name: "outer", log: log.clone() }),
                Arc::new(Tag { name: "inner", log: log.clone() }),
            ],
        );

        let response = model.do_generate(&CallOptions::default()).await.unwrap();

        assert_eq!(response.text.as_deref(), Some("outer(inner(outer|inner))"));
        assert_eq!(*log.lock().unwrap(), vec!["outer:generate", "inner:generate"]);
        assert_eq!(model.model_id(), "echo-1");
    }

    #[tokio::test]
    async fn default_hooks_pass_through() {
        struct Nothing;
        impl ProviderMiddleware for Nothing {}

        let model = wrap_provider(Arc::new(Echo), vec![Arc::new(Nothing)]);

        let err = model.do_stream(&CallOptions::default()).await.unwrap_err();

        assert!(matches!(err, WeaveError::UnsupportedFunctionality(_)));
    }
}
