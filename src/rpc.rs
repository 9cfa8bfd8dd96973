//! RPC bridge between page script and host callbacks.
//!
//! # Protocol
//!
//! ```text
//! page: sum(2, 3)
//!   -> window.external.invoke('{"id":5,"method":"sum","params":[2,3]}')
//!   -> Bindings::on_message -> callback("5", "[2,3]")
//! host: resolve("5", 0, "5")
//!   -> dispatch -> eval("window._rpc[5].resolve(5); window._rpc[5] = undefined")
//! ```
//!
//! Sequence numbers are allocated by the page (`window._rpc.nextSeq`), start
//! at 1 and are never reused within a document.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::engine::MessageHandler;
use crate::json::{self, JsonError, Lookup};

/// Host side of a binding: `(sequence, params_json)`.
pub type BindingFn = dyn Fn(&str, &str);

// =============================================================================
// Scripts
// =============================================================================

/// Page-side shim that exposes `window[name]` as a promise-returning
/// function forwarding to `window.external.invoke`.
pub fn shim_script(name: &str) -> String {
    let name = json::json_escape(name);
    format!(
        r#"(function() {{ var name = {name};
      var RPC = window._rpc = (window._rpc || {{nextSeq: 1}});
      window[name] = function() {{
        var seq = RPC.nextSeq++;
        var promise = new Promise(function(resolve, reject) {{
          RPC[seq] = {{
            resolve: resolve,
            reject: reject,
          }};
        }});
        window.external.invoke(JSON.stringify({{
          id: seq,
          method: name,
          params: Array.prototype.slice.call(arguments),
        }}));
        return promise;
      }}
    }})()"#
    )
}

/// Script settling the promise for `seq`. A zero `status` resolves, anything
/// else rejects. `result` is inserted verbatim and must be valid JSON.
pub fn resolve_script(seq: &str, status: i32, result: &str) -> String {
    let settle = if status == 0 { "resolve" } else { "reject" };
    format!("window._rpc[{seq}].{settle}({result}); window._rpc[{seq}] = undefined")
}

// =============================================================================
// Message Envelope
// =============================================================================

/// A decoded `{id, method, params}` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sequence number as written by the page, e.g. `5`.
    pub id: String,
    pub method: String,
    /// Raw JSON array of arguments.
    pub params: String,
}

impl Message {
    pub fn parse(text: &str) -> Result<Self, JsonError> {
        let id = json::parse_field(text, Lookup::Key("id"))?;
        let method = json::parse_field(text, Lookup::Key("method"))?;
        let params = match json::parse_field(text, Lookup::Key("params")) {
            Ok(params) => params,
            Err(JsonError::NotFound) => String::from("[]"),
            Err(err) => return Err(err),
        };
        Ok(Message { id, method, params })
    }
}

// =============================================================================
// Binding Registry
// =============================================================================

/// Name -> callback registry. Lives on the loop thread.
#[derive(Default)]
pub struct Bindings {
    entries: RefCell<HashMap<String, Rc<BindingFn>>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `name`, replacing any previous entry.
    pub fn insert(&self, name: &str, callback: Rc<BindingFn>) {
        if self
            .entries
            .borrow_mut()
            .insert(name.to_owned(), callback)
            .is_some()
        {
            log::debug!("binding '{}' replaced", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn lookup(&self, name: &str) -> Option<Rc<BindingFn>> {
        self.entries.borrow().get(name).cloned()
    }
}

impl MessageHandler for Bindings {
    fn on_message(&self, message: &str) {
        let message = match Message::parse(message) {
            Ok(message) => message,
            Err(err) => {
                log::debug!("dropping malformed RPC message: {}", err);
                return;
            }
        };
        // Cloned out so the callback may bind re-entrantly.
        let Some(callback) = self.lookup(&message.method) else {
            log::debug!("dropping call to unbound method '{}'", message.method);
            return;
        };
        callback(&message.id, &message.params);
    }
}
