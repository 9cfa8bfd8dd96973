//! Seam between the RPC layer and a native window + browser backend.
//!
//! A backend owns exactly one window and one web view. It knows nothing
//! about bindings: every page message is forwarded untouched to the
//! [`MessageHandler`] it was built with.

use std::os::raw::{c_int, c_void};
use std::sync::Arc;

use crate::error::Error;

/// Name of the page -> host script message channel.
pub const MESSAGE_CHANNEL: &str = "external";

// =============================================================================
// Size Hints
// =============================================================================

/// How `set_size` interprets width and height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum SizeHint {
    /// Default size, user resizable.
    #[default]
    None = 0,
    /// Minimum bounds.
    Min = 1,
    /// Maximum bounds.
    Max = 2,
    /// Size can not be changed by the user.
    Fixed = 3,
}

impl TryFrom<c_int> for SizeHint {
    type Error = Error;

    fn try_from(value: c_int) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SizeHint::None),
            1 => Ok(SizeHint::Min),
            2 => Ok(SizeHint::Max),
            3 => Ok(SizeHint::Fixed),
            other => Err(Error::InvalidHint(other)),
        }
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Receives every string the page posts through `window.external.invoke`.
pub trait MessageHandler {
    fn on_message(&self, message: &str);
}

/// Unit of work posted to the loop thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The thread-safe half of a backend.
pub trait LoopProxy: Send + Sync {
    /// Ask the running loop to return.
    fn terminate(&self);

    /// Run `task` once on the loop thread, at high idle priority.
    fn post(&self, task: Task);
}

/// The loop-thread half of a backend. None of these methods may be called
/// from another thread.
pub trait Engine {
    /// Toolkit window object (`GtkWindow*` for the GTK backend).
    fn window(&self) -> *mut c_void;

    /// Block until the loop is terminated.
    fn run(&self);

    fn proxy(&self) -> Arc<dyn LoopProxy>;

    fn set_title(&self, title: &str);

    fn set_size(&self, width: i32, height: i32, hint: SizeHint);

    fn navigate(&self, url: &str);

    /// Inject `js` at document start into the top frame of every page
    /// loaded from now on.
    fn init(&self, js: &str);

    /// Evaluate `js` in the current page. The result is discarded.
    fn eval(&self, js: &str);
}

/// Script every backend injects at creation so pages can reach the host.
/// `post` is the backend-specific expression that delivers `s`.
pub fn external_invoke_script(post: &str) -> String {
    format!("window.external={{invoke:function(s){{{post}}}}}")
}
