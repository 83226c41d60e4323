//! Request dispatch.
//!
//! Decodes a request frame, hands the payload to the configured
//! [`Handler`] and turns its [`Outcome`] into one of four response shapes:
//!
//! | Outcome        | Response body             |
//! |----------------|---------------------------|
//! | `Success`      | `{"answer":"ok"}`         |
//! | `NotFound`     | `{"answer":"not_found"}`  |
//! | `Failure(_)`   | `{"answer":"fail"}`       |
//! | `Data(value)`  | `value`, serialized as-is |
//!
//! Decode errors, handler errors and handler panics all become `Failure`.
//! Clients only ever see the category, never the cause.

use crate::runtime::frame::{self, FrameError};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{trace, warn};

/// Error type handlers may fail with.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What a handler made of one request.
#[derive(Debug)]
pub enum Outcome {
    /// The request was carried out; nothing to return.
    Success,
    /// The request referred to something that does not exist.
    NotFound,
    /// A result document to return verbatim.
    Data(Value),
    /// The request could not be carried out.
    Failure(HandlerError),
}

/// Application logic plugged into the server.
///
/// Called once per request, sequentially, from the serve loop. A handler
/// never sees the connection, only the decoded payload.
pub trait Handler {
    fn handle(&mut self, request: Value) -> Result<Outcome, HandlerError>;
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn handle(&mut self, request: Value) -> Result<Outcome, HandlerError> {
        (**self).handle(request)
    }
}

/// Handler backed by a closure. See [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

/// Build a [`Handler`] from a closure.
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: FnMut(Value) -> Result<Outcome, HandlerError>,
{
    HandlerFn { f }
}

impl<F> Handler for HandlerFn<F>
where
    F: FnMut(Value) -> Result<Outcome, HandlerError>,
{
    fn handle(&mut self, request: Value) -> Result<Outcome, HandlerError> {
        (self.f)(request)
    }
}

/// The response shape sent back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Ok,
    NotFound,
    Fail,
    Data,
}

impl Answer {
    /// Body of the control answers; `None` for `Data`.
    fn control(self) -> Option<&'static str> {
        match self {
            Answer::Ok => Some("ok"),
            Answer::NotFound => Some("not_found"),
            Answer::Fail => Some("fail"),
            Answer::Data => None,
        }
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.control().unwrap_or("data"))
    }
}

#[derive(Serialize)]
struct Control {
    answer: &'static str,
}

/// An encoded response frame.
#[derive(Debug, Clone)]
pub struct Response {
    pub answer: Answer,
    pub frame: Bytes,
}

impl Response {
    fn control(answer: Answer) -> Self {
        let body = Control {
            answer: answer.control().unwrap_or("fail"),
        };
        // A fixed one-field struct always serializes.
        let frame = frame::encode_json(&body)
            .unwrap_or_else(|_| Bytes::from_static(b"{\"answer\":\"fail\"}\0"));
        Response { answer, frame }
    }

    fn data(value: &Value) -> Result<Self, FrameError> {
        Ok(Response {
            answer: Answer::Data,
            frame: frame::encode_json(value)?,
        })
    }
}

/// Decode a request frame, run the handler and encode the response.
///
/// Never fails: every problem past the transport collapses into the
/// `fail` answer.
pub fn dispatch<H: Handler + ?Sized>(request: &[u8], handler: &mut H) -> Response {
    let outcome = match decode_request(request) {
        Ok(payload) => invoke(handler, payload),
        Err(e) => Outcome::Failure(e),
    };

    respond(outcome)
}

/// Map an outcome to its response frame.
pub fn respond(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Success => Response::control(Answer::Ok),
        Outcome::NotFound => Response::control(Answer::NotFound),
        Outcome::Data(value) => Response::data(&value).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to encode handler data");
            Response::control(Answer::Fail)
        }),
        Outcome::Failure(cause) => {
            warn!(cause = %cause, "Exception in handler");
            Response::control(Answer::Fail)
        }
    }
}

fn decode_request(request: &[u8]) -> Result<Value, HandlerError> {
    let payload = frame::decode(request)?;
    let text = std::str::from_utf8(payload)?;
    trace!(payload = text, "Decoded request");
    Ok(serde_json::from_str(text)?)
}

fn invoke<H: Handler + ?Sized>(handler: &mut H, payload: Value) -> Outcome {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(payload))) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(cause)) => Outcome::Failure(cause),
        Err(panic) => Outcome::Failure(panic_message(panic).into()),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("handler panicked: {}", detail)
}
