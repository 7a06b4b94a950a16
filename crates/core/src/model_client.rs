use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use steward_model::{
    ModelFinishReason, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent, ToolCallRequest,
};
use tracing::Instrument;

type SendRequestResult = Result<ModelReply, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type HandlerFn =
    Arc<dyn Fn(ModelRequest) -> BoxedSendRequestFuture + Send + Sync>;

/// How transient model failures are retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound of the delay between two attempts.
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(8),
        }
    }
}

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub(crate) struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("sending a request with {} messages", req.messages.len());
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request once and collects the whole response.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(&self, req: ModelRequest) -> SendRequestResult {
        (self.handler_fn)(req).await
    }

    /// Sends a request, retrying transient failures with exponential
    /// backoff. Returns the last error once the budget is spent or a
    /// non-transient error occurs.
    pub async fn send_with_retry(
        &self,
        req: ModelRequest,
        policy: &RetryPolicy,
    ) -> SendRequestResult {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(policy.initial_interval)
            .with_max_interval(policy.max_interval)
            .with_max_elapsed_time(None)
            .build();
        let mut attempt = 0;
        loop {
            let err = match self.send_request(req.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(err) => err,
            };
            if !err.kind().is_transient() || attempt >= policy.max_retries {
                return Err(err);
            }
            attempt += 1;
            let delay = backoff.next_backoff().unwrap_or(policy.max_interval);
            warn!(
                "model request failed ({:?}): {err}, retry {attempt}/{} in {delay:?}",
                err.kind(),
                policy.max_retries
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ModelReply {
    /// The concatenated message deltas.
    pub content: String,
    /// Tool calls requested by the model, in emission order.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(Box::new(err));
        }
    };

    let mut reply = ModelReply::default();
    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(Box::new(err));
            }
        };

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => {
                reply.content.push_str(&msg);
            }
            ModelResponseEvent::ToolCall(req) => {
                reply.tool_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                reply.finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use steward_model::{ErrorKind, ModelMessage};
    use steward_test_model::{PresetEvent, PresetResponse, TestModelProvider};

    use super::*;

    fn request() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_user_input_step();
        model_provider.add_assistant_response_step(
            PresetResponse::with_events([
                PresetEvent::MessageDelta("How ".to_owned()),
                PresetEvent::MessageDelta("are ".to_owned()),
                PresetEvent::MessageDelta("you?".to_owned()),
            ]),
        );

        let model_client = ModelClient::new(model_provider);
        for _ in 0..3 {
            let reply = model_client.send_request(request()).await.unwrap();
            assert_eq!(reply.content, "How are you?");
            assert!(reply.tool_calls.is_empty());
            assert_eq!(reply.finish_reason, Some(ModelFinishReason::Stop));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_failures() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_user_input_step();
        model_provider.add_assistant_response_step(
            PresetResponse::text("finally")
                .with_failures(2)
                .with_failure_kind(ErrorKind::RateLimitExceeded),
        );
        let model_client = ModelClient::new(model_provider.clone());

        let reply = model_client
            .send_with_retry(request(), &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(reply.content, "finally");
        assert_eq!(model_provider.received_requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_and_permanent_errors() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_user_input_step();
        model_provider
            .add_assistant_response_step(PresetResponse::text("").with_failures(0));
        let model_client = ModelClient::new(model_provider.clone());
        let policy = RetryPolicy {
            max_retries: 2,
            ..Default::default()
        };
        let err = model_client
            .send_with_retry(request(), &policy)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(model_provider.received_requests().len(), 3);

        let mut model_provider = TestModelProvider::default();
        model_provider.add_user_input_step();
        model_provider.add_assistant_response_step(
            PresetResponse::text("")
                .with_failures(1)
                .with_failure_kind(ErrorKind::Moderated),
        );
        let model_client = ModelClient::new(model_provider.clone());
        let err = model_client
            .send_with_retry(request(), &policy)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Moderated);
        assert_eq!(model_provider.received_requests().len(), 1);
    }
}
