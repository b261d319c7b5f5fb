use thiserror::Error;

use crate::models::MessageId;

/// Failure to decode one inbound frame. Scoped to that frame only.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingKind,
    #[error("malformed `{kind}` event: {source}")]
    Shape {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Local validation failures. None of these reach the network.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComposeError {
    #[error("message content is empty")]
    EmptyContent,
    #[error("emoji is empty")]
    EmptyEmoji,
    #[error("message {0} is not in the timeline")]
    UnknownMessage(MessageId),
    #[error("message {0} has been deleted")]
    Deleted(MessageId),
    #[error("delete of message {0} was not confirmed")]
    NotConfirmed(MessageId),
    #[error("message {0} belongs to someone else")]
    NotOwner(MessageId),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid channel address: {0}")]
    Address(String),
    #[error("websocket failure: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("handshake did not finish within {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("unexpected response: {0}")]
    Body(String),
    #[error("cannot read upload file: {0}")]
    File(#[from] std::io::Error),
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("network fetch of {url} failed: {reason}")]
    Network { url: String, reason: String },
    #[error("{0} is neither reachable nor cached")]
    Unavailable(String),
    #[error("invalid asset url: {0}")]
    Url(#[from] url::ParseError),
}
