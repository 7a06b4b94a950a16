use std::error::Error;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// An error from a model backend, classified so the reasoning loop can
/// decide between retrying and giving up.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns how the failure should be treated.
    fn kind(&self) -> ErrorKind;
}

/// A chat model backend the agent sends its transcripts to.
///
/// Every request carries the whole conversation and the tool catalogue,
/// so a provider keeps no per-thread state and one instance serves all
/// threads concurrently.
///
/// Sending the same request twice must be harmless: requests that failed
/// with a transient [`ErrorKind`] are retried.
pub trait ModelProvider: Send + Sync {
    /// The failure type of this backend.
    type Error: ModelProviderError;

    /// The streamed reply of this backend.
    type Response: ModelResponse<Error = Self::Error>;

    /// Sends one step of a turn to the model.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}
