//! HTTP control API
//!
//! Components register their handlers through `RouteRegistrar`, so they do
//! not depend on the HTTP server itself.

use derive_more::Display;
use tiny_http::Method;

pub mod server;

#[derive(Debug, Display)]
pub enum WebError {
    Io(std::io::Error),
    NotFound,
}

impl From<std::io::Error> for WebError {
    fn from(err: std::io::Error) -> Self {
        WebError::Io(err)
    }
}

impl std::error::Error for WebError {}

pub type Result<T> = std::result::Result<T, WebError>;

/// A request as seen by a route handler
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: Method, url: &str, body: &[u8]) -> HttpRequest {
        HttpRequest {
            method,
            url: url.to_string(),
            body: body.to_vec(),
        }
    }
}

/// Status, optional content type and body of a handler's answer
#[derive(Clone, Debug, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub body: String,
}

impl HttpReply {
    pub fn ok() -> HttpReply {
        HttpReply {
            status: 200,
            content_type: None,
            body: String::new(),
        }
    }

    pub fn json(body: String) -> HttpReply {
        HttpReply {
            status: 200,
            content_type: Some("application/json"),
            body,
        }
    }

    pub fn error(status: u16, text: String) -> HttpReply {
        HttpReply {
            status,
            content_type: Some("text/plain; charset=utf-8"),
            body: text,
        }
    }
}

pub type RouteHandler = Box<dyn Fn(&HttpRequest) -> HttpReply + Send + Sync>;

/// Anything that can route `method path` to a handler
pub trait RouteRegistrar: Send + Sync {
    fn register(&self, method: Method, path: &str, handler: RouteHandler);
}
