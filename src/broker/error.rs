//! Broker client error types.

use std::fmt;

/// Errors raised by a broker backend.
#[derive(Debug)]
pub enum BrokerError {
    /// Could not establish the client connection
    Connect(String),
    /// Could not create a producer
    Producer(String),
    /// Could not create a consumer / subscription
    Consumer(String),
    /// Publishing a message failed
    Send(String),
    /// Receiving a message failed (a timeout is not an error)
    Receive(String),
    /// Acknowledging a message failed
    Acknowledge(String),
    /// Removing the subscription failed
    Unsubscribe(String),
    /// Closing a resource failed
    Close(String),
    /// The service URL could not be parsed
    InvalidUrl(String),
    /// The service URL names a backend this build does not provide
    UnsupportedScheme(String),
    /// Other error
    Other(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connect failed: {}", e),
            Self::Producer(e) => write!(f, "producer creation failed: {}", e),
            Self::Consumer(e) => write!(f, "consumer creation failed: {}", e),
            Self::Send(e) => write!(f, "send failed: {}", e),
            Self::Receive(e) => write!(f, "receive failed: {}", e),
            Self::Acknowledge(e) => write!(f, "acknowledge failed: {}", e),
            Self::Unsubscribe(e) => write!(f, "unsubscribe failed: {}", e),
            Self::Close(e) => write!(f, "close failed: {}", e),
            Self::InvalidUrl(url) => write!(f, "invalid service url: {}", url),
            Self::UnsupportedScheme(scheme) => {
                write!(f, "unsupported broker scheme '{}'", scheme)
            }
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
