use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::task::{self, Poll, ready};
use std::time::Duration;

use serde_json::json;
use steward_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
    ToolCallRequest,
};
use tokio::time::{Sleep, sleep};

#[derive(Debug)]
struct FakeModelProviderError(ErrorKind);

impl Display for FakeModelProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Error for FakeModelProviderError {}

impl ModelProviderError for FakeModelProviderError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Echoes the last message word by word. A user message starting with
/// `calc ` is answered with a single calculator tool call instead.
#[derive(Debug)]
struct FakeModelResponse {
    fake_items: VecDeque<ModelResponseEvent>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl FakeModelResponse {
    fn new(last: &ModelMessage) -> Self {
        let mut fake_items = VecDeque::new();
        match last {
            ModelMessage::User(text) if text.starts_with("calc ") => {
                fake_items.push_back(ModelResponseEvent::ToolCall(
                    ToolCallRequest {
                        id: "call:0".to_owned(),
                        name: "calculator".to_owned(),
                        arguments: json!({ "expression": &text[5..] }),
                    },
                ));
                fake_items.push_back(ModelResponseEvent::Completed(
                    ModelFinishReason::ToolCalls,
                ));
            }
            ModelMessage::User(text) | ModelMessage::System(text) => {
                push_words(&mut fake_items, &format!("You said {text}"));
            }
            ModelMessage::Tool(result) => {
                push_words(
                    &mut fake_items,
                    &format!("The tool said {}", result.content),
                );
            }
            ModelMessage::Assistant(_) => {
                push_words(&mut fake_items, "Go on");
            }
        }
        Self {
            fake_items,
            sleep: None,
        }
    }
}

fn push_words(items: &mut VecDeque<ModelResponseEvent>, text: &str) {
    let mut words = text.split(' ').peekable();
    while let Some(word) = words.next() {
        let mut word = word.to_owned();
        if words.peek().is_some() {
            word.push(' ');
        }
        items.push_back(ModelResponseEvent::MessageDelta(word));
    }
    items.push_back(ModelResponseEvent::Completed(ModelFinishReason::Stop));
}

impl ModelResponse for FakeModelResponse {
    type Error = FakeModelProviderError;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;
            return Poll::Ready(Ok(this.fake_items.pop_front()));
        }
        this.sleep = Some(Box::pin(sleep(Duration::from_millis(1))));
        Pin::new(this).poll_next_event(cx)
    }
}

struct FakeModelProvider;

impl ModelProvider for FakeModelProvider {
    type Error = FakeModelProviderError;
    type Response = FakeModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let result = match req.messages.last() {
            Some(last) => Ok(FakeModelResponse::new(last)),
            None => Err(FakeModelProviderError(ErrorKind::InvalidRequest)),
        };
        ready(result)
    }
}

async fn collect(
    mut resp: FakeModelResponse,
) -> (String, Vec<ToolCallRequest>, Option<ModelFinishReason>) {
    let mut text = String::new();
    let mut tool_calls = vec![];
    let mut finish_reason = None;
    loop {
        let event = std::future::poll_fn(|cx| {
            Pin::new(&mut resp).poll_next_event(cx)
        })
        .await
        .unwrap();
        match event {
            Some(ModelResponseEvent::MessageDelta(delta)) => {
                text.push_str(&delta)
            }
            Some(ModelResponseEvent::ToolCall(req)) => tool_calls.push(req),
            Some(ModelResponseEvent::Completed(reason)) => {
                finish_reason = Some(reason)
            }
            None => break,
        }
    }
    (text, tool_calls, finish_reason)
}

#[tokio::test]
async fn test_completion() {
    let provider = FakeModelProvider;
    let req = ModelRequest {
        messages: vec![ModelMessage::User("Good morning".to_string())],
        ..Default::default()
    };
    let resp = provider.send_request(&req).await.unwrap();
    let (text, tool_calls, finish_reason) = collect(resp).await;

    assert_eq!(text, "You said Good morning");
    assert!(tool_calls.is_empty());
    assert_eq!(finish_reason, Some(ModelFinishReason::Stop));
}

#[tokio::test]
async fn test_tool_call() {
    let provider = FakeModelProvider;
    let req = ModelRequest {
        messages: vec![ModelMessage::User("calc 1 + 2".to_string())],
        ..Default::default()
    };
    let resp = provider.send_request(&req).await.unwrap();
    let (text, tool_calls, finish_reason) = collect(resp).await;

    assert!(text.is_empty());
    assert_eq!(tool_calls.len(), 1);
    assert!(tool_calls[0].is_well_formed());
    assert_eq!(tool_calls[0].arguments, json!({ "expression": "1 + 2" }));
    assert_eq!(finish_reason, Some(ModelFinishReason::ToolCalls));
}

#[tokio::test]
async fn test_error() {
    let provider = FakeModelProvider;
    let req = ModelRequest::default();
    let result = provider.send_request(&req).await;
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert!(!err.kind().is_transient());
}

#[test]
fn test_malformed_tool_call() {
    let req = ToolCallRequest {
        id: String::new(),
        name: "calculator".to_owned(),
        arguments: json!({}),
    };
    assert!(!req.is_well_formed());

    let req = ToolCallRequest {
        id: "call_1".to_owned(),
        name: "calculator".to_owned(),
        arguments: json!("{\"expression\": "),
    };
    assert!(!req.is_well_formed());

    let req = ToolCallRequest {
        arguments: json!({ "expression": "1 + 1" }),
        ..req
    };
    assert!(req.is_well_formed());
}
