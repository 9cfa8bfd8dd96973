//! GTK 4 + WebKitGTK 6 backend.
//!
//! # Architecture
//!
//! ```text
//! page script → window.external.invoke(s)
//!             → webkit.messageHandlers.external → UserContentManager signal
//!             → MessageHandler::on_message (RPC bridge)
//! ```

use std::os::raw::c_void;
use std::rc::Rc;
use std::sync::Arc;

use glib::translate::from_glib_none;
use gtk4::prelude::*;
use webkit6::prelude::*;
use webkit6::{
    UserContentInjectedFrames, UserContentManager, UserScript, UserScriptInjectionTime, WebView,
};

use crate::engine::{
    external_invoke_script, Engine, LoopProxy, MessageHandler, SizeHint, Task, MESSAGE_CHANNEL,
};
use crate::error::{Error, Result};

// =============================================================================
// Loop Proxy
// =============================================================================

struct GtkProxy {
    main_loop: glib::MainLoop,
}

impl LoopProxy for GtkProxy {
    fn terminate(&self) {
        self.main_loop.quit();
    }

    fn post(&self, task: Task) {
        // Always queued, never invoked inline, even on the owning thread.
        let mut task = Some(task);
        glib::idle_add_full(glib::Priority::HIGH_IDLE, move || {
            if let Some(task) = task.take() {
                task();
            }
            glib::ControlFlow::Break
        });
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct GtkEngine {
    window: gtk4::Window,
    webview: WebView,
    manager: UserContentManager,
    proxy: Arc<GtkProxy>,
    owns_window: bool,
}

impl GtkEngine {
    /// Create the window (or adopt `parent`, a `GtkWindow*`) and the web
    /// view inside it, and wire page messages to `handler`.
    pub fn new(debug: bool, parent: *mut c_void, handler: Rc<dyn MessageHandler>) -> Result<Self> {
        gtk4::init().map_err(|e| Error::Toolkit(e.to_string()))?;

        let owns_window = parent.is_null();
        let window: gtk4::Window = if owns_window {
            gtk4::Window::new()
        } else {
            // Safety: caller contract, `parent` is a live GtkWindow.
            unsafe { from_glib_none(parent as *mut gtk4::ffi::GtkWindow) }
        };

        let main_loop = glib::MainLoop::new(None, false);
        {
            let main_loop = main_loop.clone();
            window.connect_destroy(move |_| main_loop.quit());
        }

        let webview = WebView::new();
        let manager = match connect_messages(&webview, handler) {
            Ok(manager) => manager,
            Err(e) => {
                if owns_window {
                    window.destroy();
                }
                return Err(e);
            }
        };

        if let Some(settings) = WebViewExt::settings(&webview) {
            settings.set_javascript_can_access_clipboard(true);
            if debug {
                settings.set_enable_write_console_messages_to_stdout(true);
                settings.set_enable_developer_extras(true);
            }
        }

        window.set_child(Some(&webview));
        webview.grab_focus();

        let engine = GtkEngine {
            window,
            webview,
            manager,
            proxy: Arc::new(GtkProxy { main_loop }),
            owns_window,
        };
        engine.init(&external_invoke_script(&format!(
            "window.webkit.messageHandlers.{}.postMessage(s);",
            MESSAGE_CHANNEL
        )));
        engine.window.present();

        log::debug!("webview created (debug: {})", debug);
        Ok(engine)
    }
}

/// Route messages posted on the external channel to `handler`.
fn connect_messages(
    webview: &WebView,
    handler: Rc<dyn MessageHandler>,
) -> Result<UserContentManager> {
    let manager = webview
        .user_content_manager()
        .ok_or_else(|| Error::Toolkit("web view has no user content manager".into()))?;

    manager.connect_script_message_received(Some(MESSAGE_CHANNEL), move |_, value| {
        handler.on_message(&value.to_str());
    });
    if !manager.register_script_message_handler(MESSAGE_CHANNEL, None) {
        return Err(Error::Toolkit(format!(
            "failed to register script message handler '{}'",
            MESSAGE_CHANNEL
        )));
    }
    Ok(manager)
}

impl Drop for GtkEngine {
    fn drop(&mut self) {
        if self.owns_window {
            self.window.destroy();
        } else {
            self.window.set_child(None::<&gtk4::Widget>);
        }
    }
}

impl Engine for GtkEngine {
    fn window(&self) -> *mut c_void {
        self.window.as_ptr() as *mut c_void
    }

    fn run(&self) {
        self.proxy.main_loop.run();
    }

    fn proxy(&self) -> Arc<dyn LoopProxy> {
        Arc::clone(&self.proxy) as Arc<dyn LoopProxy>
    }

    fn set_title(&self, title: &str) {
        self.window.set_title(Some(title));
    }

    fn set_size(&self, width: i32, height: i32, hint: SizeHint) {
        self.window.set_resizable(hint != SizeHint::Fixed);
        match hint {
            SizeHint::None => self.window.set_default_size(width, height),
            SizeHint::Min | SizeHint::Fixed => self.window.set_size_request(width, height),
            SizeHint::Max => {
                // GTK 4 dropped geometry hints; there is no maximum size.
                log::warn!("maximum size hint is not supported, ignoring {}x{}", width, height);
            }
        }
    }

    fn navigate(&self, url: &str) {
        self.webview.load_uri(url);
    }

    fn init(&self, js: &str) {
        let script = UserScript::new(
            js,
            UserContentInjectedFrames::TopFrame,
            UserScriptInjectionTime::Start,
            &[],
            &[],
        );
        self.manager.add_script(&script);
    }

    fn eval(&self, js: &str) {
        self.webview
            .evaluate_javascript(js, None, None, webkit6::gio::Cancellable::NONE, |result| {
                if let Err(e) = result {
                    log::debug!("script evaluation failed: {}", e);
                }
            });
    }
}
