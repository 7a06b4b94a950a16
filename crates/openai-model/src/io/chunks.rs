#[cfg(test)]
use std::collections::VecDeque;

use bytes::Bytes;
use reqwest::Response;

/// Reading the next piece of a completion body failed, usually because
/// the connection dropped mid-stream.
#[derive(Debug, PartialEq, Eq)]
pub struct Error(pub String);

/// The raw bytes of a streamed chat completion, in the pieces the
/// transport delivers them. Piece boundaries carry no meaning, the SSE
/// decoder reassembles lines across them.
pub enum Chunks {
    Body(Response),
    #[cfg(test)]
    Scripted(VecDeque<Bytes>),
}

impl Chunks {
    pub fn from_response(response: Response) -> Self {
        Chunks::Body(response)
    }

    /// Replays fixed pieces, split wherever a test needs them.
    #[cfg(test)]
    pub fn scripted<I: IntoIterator<Item = Bytes>>(pieces: I) -> Self {
        Chunks::Scripted(pieces.into_iter().collect())
    }

    /// Returns the next piece, or `None` once the body is complete.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        match self {
            Chunks::Body(response) => {
                response.chunk().await.map_err(|err| Error(err.to_string()))
            }
            #[cfg(test)]
            Chunks::Scripted(pieces) => Ok(pieces.pop_front()),
        }
    }
}
