//! Echo application.
//!
//! Returns every request document unchanged, which makes it useful for
//! checking the transport without any application state:
//!
//! ```text
//! Request:  {"action":"ping"}\0
//! Response: {"action":"ping"}\0
//! ```

use crate::runtime::{Handler, HandlerError, Outcome};
use serde_json::Value;

/// Stateless echo handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

impl Handler for Echo {
    fn handle(&mut self, request: Value) -> Result<Outcome, HandlerError> {
        Ok(Outcome::Data(request))
    }
}
