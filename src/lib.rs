//! WebKitGTK Webview Backend for Qliphoth
//!
//! This crate hosts HTML/JS user interfaces in a native window and lets
//! page script call host functions asynchronously through a small RPC
//! bridge. Everything is reachable through a C ABI so non-Rust hosts can
//! link it directly.
//!
//! # Architecture
//!
//! ```text
//! page: await window.sum(2, 3)
//!   → window.external.invoke('{"id":1,"method":"sum","params":[2,3]}')
//!   → backend message channel → json scanner → binding registry
//!   → host callback(seq, params) … webview_return(seq, status, result)
//!   → dispatch to loop thread → eval("window._rpc[1].resolve(5); …")
//! ```
//!
//! # Usage
//!
//! ```no_run
//! # #[cfg(feature = "gtk")]
//! # fn main() -> qliphoth_webview::Result<()> {
//! use qliphoth_webview::{SizeHint, Webview};
//!
//! let view = Webview::new(true, std::ptr::null_mut())?;
//! view.set_title("Calculator");
//! view.set_size(480, 320, SizeHint::None);
//! view.bind_json("sum", |(a, b): (i64, i64)| Ok::<_, String>(a + b));
//! view.navigate("data:text/html,<script>sum(2,3).then(alert)</script>");
//! view.run();
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "gtk"))]
//! # fn main() {}
//! ```

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
#[cfg(feature = "gtk")]
pub mod gtk;
pub mod headless;
pub mod json;
pub mod rpc;
pub mod webview;

pub use config::Config;
pub use engine::{Engine, LoopProxy, MessageHandler, SizeHint};
pub use error::{Error, Result};
pub use webview::{Dispatcher, Webview};

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};

/// Host callback for `webview_dispatch`.
pub type DispatchFn = extern "C" fn(w: *mut WebviewHandle, arg: *mut c_void);

/// Host callback for `webview_bind`: `(seq, params_json, arg)`.
pub type BindFn = extern "C" fn(seq: *const c_char, req: *const c_char, arg: *mut c_void);

// =============================================================================
// Helper Functions
// =============================================================================

fn c_str_to_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // Safety: non-null; the caller guarantees a valid NUL-terminated string.
    unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() }
}

/// What a C host holds as `webview_t`.
///
/// The view itself may only be touched on the loop thread; functions
/// callable from any thread go through `dispatcher`, which is `Sync`.
pub struct WebviewHandle {
    view: Webview,
    dispatcher: Dispatcher,
}

impl WebviewHandle {
    pub fn new(view: Webview) -> Self {
        let dispatcher = view.dispatcher();
        WebviewHandle { view, dispatcher }
    }

    /// Leak into the pointer handed to C; reclaimed by `webview_destroy`.
    pub fn into_raw(self) -> *mut WebviewHandle {
        Box::into_raw(Box::new(self))
    }
}

/// Borrow the webview behind a handle on the loop thread.
fn view<'a>(w: *mut WebviewHandle, location: &str) -> Option<&'a Webview> {
    if w.is_null() {
        log::debug!("{}: null handle", location);
        return None;
    }
    // Safety: handles come from `webview_create` and stay valid until
    // `webview_destroy`; the caller is on the loop thread.
    Some(unsafe { &(*w).view })
}

/// Borrow only the thread-safe part of a handle.
fn dispatcher<'a>(w: *mut WebviewHandle, location: &str) -> Option<&'a Dispatcher> {
    if w.is_null() {
        log::debug!("{}: null handle", location);
        return None;
    }
    // Safety: as for `view`; no reference to the view itself is formed.
    Some(unsafe { &(*w).dispatcher })
}

/// Raw pointer the host promised may cross to the loop thread.
struct SendPtr<T>(*mut T);

// Safety: `webview_dispatch` documents that `arg` is handed to the loop
// thread; thread-safety of the pointee is the host's responsibility. The
// handle itself is only dereferenced there while its loop runs.
unsafe impl<T> Send for SendPtr<T> {}

// =============================================================================
// FFI Functions - Lifecycle
// =============================================================================

/// Create a webview. Non-zero `debug` enables developer tools. A non-null
/// `window` must be a `GtkWindow*` to embed into; otherwise a new window is
/// created. Returns null on failure.
#[cfg(feature = "gtk")]
#[no_mangle]
pub extern "C" fn webview_create(debug: c_int, window: *mut c_void) -> *mut WebviewHandle {
    match Webview::new(debug != 0, window) {
        Ok(view) => WebviewHandle::new(view).into_raw(),
        Err(e) => {
            log::error!("webview_create: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Destroy a webview, closing its window. The handle is invalid afterwards.
#[no_mangle]
pub extern "C" fn webview_destroy(w: *mut WebviewHandle) {
    if w.is_null() {
        log::debug!("webview_destroy: null handle");
        return;
    }
    // Safety: the handle was produced by `Box::into_raw` and is destroyed once.
    drop(unsafe { Box::from_raw(w) });
}

/// Run the main loop until `webview_terminate`.
#[no_mangle]
pub extern "C" fn webview_run(w: *mut WebviewHandle) {
    if let Some(view) = view(w, "webview_run") {
        view.run();
    }
}

/// Stop the main loop. Safe to call from any thread.
#[no_mangle]
pub extern "C" fn webview_terminate(w: *mut WebviewHandle) {
    if let Some(dispatcher) = dispatcher(w, "webview_terminate") {
        dispatcher.terminate();
    }
}

/// Schedule `f(w, arg)` on the loop thread. Safe to call from any thread.
#[no_mangle]
pub extern "C" fn webview_dispatch(
    w: *mut WebviewHandle,
    f: Option<DispatchFn>,
    arg: *mut c_void,
) {
    let Some(dispatcher) = dispatcher(w, "webview_dispatch") else {
        return;
    };
    let Some(f) = f else {
        log::debug!("webview_dispatch: null callback");
        return;
    };
    let handle = SendPtr(w);
    let arg = SendPtr(arg);
    dispatcher.dispatch(move |_| {
        let (handle, arg) = (handle, arg);
        f(handle.0, arg.0)
    });
}

/// Native window pointer (`GtkWindow*` for the GTK backend).
#[no_mangle]
pub extern "C" fn webview_get_window(w: *mut WebviewHandle) -> *mut c_void {
    view(w, "webview_get_window")
        .map(Webview::window)
        .unwrap_or(std::ptr::null_mut())
}

// =============================================================================
// FFI Functions - Window
// =============================================================================

#[no_mangle]
pub extern "C" fn webview_set_title(w: *mut WebviewHandle, title: *const c_char) {
    if let Some(view) = view(w, "webview_set_title") {
        view.set_title(&c_str_to_string(title));
    }
}

/// `hints`: 0 none, 1 min, 2 max, 3 fixed.
#[no_mangle]
pub extern "C" fn webview_set_size(
    w: *mut WebviewHandle,
    width: c_int,
    height: c_int,
    hints: c_int,
) {
    let Some(view) = view(w, "webview_set_size") else {
        return;
    };
    match SizeHint::try_from(hints) {
        Ok(hint) => view.set_size(width, height, hint),
        Err(e) => log::warn!("webview_set_size: {}", e),
    }
}

// =============================================================================
// FFI Functions - Content
// =============================================================================

/// Load `url`. An empty URL shows a placeholder page; `data:text/html,`
/// documents are re-encoded.
#[no_mangle]
pub extern "C" fn webview_navigate(w: *mut WebviewHandle, url: *const c_char) {
    if let Some(view) = view(w, "webview_navigate") {
        view.navigate(&c_str_to_string(url));
    }
}

/// Inject `js` at document start of every page loaded from now on.
#[no_mangle]
pub extern "C" fn webview_init(w: *mut WebviewHandle, js: *const c_char) {
    if let Some(view) = view(w, "webview_init") {
        view.init(&c_str_to_string(js));
    }
}

/// Evaluate `js` in the current page; the result is ignored.
#[no_mangle]
pub extern "C" fn webview_eval(w: *mut WebviewHandle, js: *const c_char) {
    if let Some(view) = view(w, "webview_eval") {
        view.eval(&c_str_to_string(js));
    }
}

// =============================================================================
// FFI Functions - RPC
// =============================================================================

/// Expose `f` to page script as `window[name]`. `f` receives the call's
/// sequence id, a JSON array of its arguments and `arg`, and must answer
/// with `webview_return`.
#[no_mangle]
pub extern "C" fn webview_bind(
    w: *mut WebviewHandle,
    name: *const c_char,
    f: Option<BindFn>,
    arg: *mut c_void,
) {
    let Some(view) = view(w, "webview_bind") else {
        return;
    };
    let Some(f) = f else {
        log::debug!("webview_bind: null callback");
        return;
    };
    view.bind(&c_str_to_string(name), move |seq, params| {
        match (CString::new(seq), CString::new(params)) {
            (Ok(seq), Ok(params)) => f(seq.as_ptr(), params.as_ptr(), arg),
            _ => log::error!("webview_bind: call {} carries an interior NUL", seq),
        }
    });
}

/// Settle call `seq`: status 0 resolves with `result`, anything else
/// rejects with it. `result` must be valid JSON. Safe to call from any
/// thread.
#[no_mangle]
pub extern "C" fn webview_return(
    w: *mut WebviewHandle,
    seq: *const c_char,
    status: c_int,
    result: *const c_char,
) {
    if let Some(dispatcher) = dispatcher(w, "webview_return") {
        dispatcher.resolve(&c_str_to_string(seq), status, &c_str_to_string(result));
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use parking_lot::Mutex;
    use serial_test::serial;

    /// Calls observed by `record_call`.
    static CALLS: Lazy<Mutex<Vec<(String, String, usize)>>> = Lazy::new(|| Mutex::new(Vec::new()));

    /// Dispatches observed by `record_dispatch`.
    static DISPATCHED: Lazy<Mutex<Vec<usize>>> = Lazy::new(|| Mutex::new(Vec::new()));

    fn cstr(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    fn create_headless() -> (*mut WebviewHandle, headless::Inspector) {
        let (view, inspector) = headless::create().unwrap();
        (WebviewHandle::new(view).into_raw(), inspector)
    }

    fn reset_state() {
        CALLS.lock().clear();
        DISPATCHED.lock().clear();
    }

    extern "C" fn record_call(seq: *const c_char, req: *const c_char, arg: *mut c_void) {
        CALLS
            .lock()
            .push((c_str_to_string(seq), c_str_to_string(req), arg as usize));
    }

    extern "C" fn record_dispatch(w: *mut WebviewHandle, arg: *mut c_void) {
        DISPATCHED.lock().push(arg as usize);
        webview_terminate(w);
    }

    extern "C" fn answer_call(seq: *const c_char, _req: *const c_char, arg: *mut c_void) {
        webview_return(arg as *mut WebviewHandle, seq, 0, cstr("42").as_ptr());
    }

    #[test]
    #[serial]
    fn test_bind_and_receive_call() {
        reset_state();
        let (w, inspector) = create_headless();
        let name = cstr("sum");
        webview_bind(w, name.as_ptr(), Some(record_call), 7 as *mut c_void);

        inspector.deliver(r#"{"id":5,"method":"sum","params":[2,3]}"#);
        inspector.deliver(r#"{"id":6,"method":"missing","params":[]}"#);

        assert_eq!(*CALLS.lock(), vec![("5".to_owned(), "[2,3]".to_owned(), 7)]);
        assert_eq!(inspector.init_scripts().last(), Some(&rpc::shim_script("sum")));
        webview_destroy(w);
    }

    #[test]
    #[serial]
    fn test_return_resolves_and_rejects() {
        reset_state();
        let (w, inspector) = create_headless();
        webview_return(w, cstr("5").as_ptr(), 0, cstr("5").as_ptr());
        webview_return(w, cstr("9").as_ptr(), 1, cstr(r#"{"error":"no"}"#).as_ptr());
        webview_dispatch(w, Some(record_dispatch), 1 as *mut c_void);

        webview_run(w);

        assert_eq!(
            inspector.evaluated(),
            vec![
                "window._rpc[5].resolve(5); window._rpc[5] = undefined".to_owned(),
                r#"window._rpc[9].reject({"error":"no"}); window._rpc[9] = undefined"#.to_owned(),
            ]
        );
        assert_eq!(*DISPATCHED.lock(), vec![1]);
        webview_destroy(w);
    }

    #[test]
    #[serial]
    fn test_callback_answers_through_return() {
        reset_state();
        let (w, inspector) = create_headless();
        webview_bind(w, cstr("answer").as_ptr(), Some(answer_call), w as *mut c_void);

        inspector.deliver(r#"{"id":1,"method":"answer","params":[]}"#);
        webview_dispatch(w, Some(record_dispatch), 2 as *mut c_void);
        webview_run(w);

        assert_eq!(
            inspector.evaluated(),
            vec!["window._rpc[1].resolve(42); window._rpc[1] = undefined".to_owned()]
        );
        webview_destroy(w);
    }

    #[test]
    #[serial]
    fn test_return_and_dispatch_from_worker_thread() {
        reset_state();
        let (w, inspector) = create_headless();
        let addr = w as usize;
        std::thread::spawn(move || {
            let w = addr as *mut WebviewHandle;
            webview_return(w, cstr("3").as_ptr(), 0, cstr("true").as_ptr());
            webview_dispatch(w, Some(record_dispatch), 3 as *mut c_void);
        })
        .join()
        .unwrap();

        webview_run(w);

        assert_eq!(
            inspector.evaluated(),
            vec!["window._rpc[3].resolve(true); window._rpc[3] = undefined".to_owned()]
        );
        assert_eq!(*DISPATCHED.lock(), vec![3]);
        webview_destroy(w);
    }

    #[test]
    #[serial]
    fn test_window_operations() {
        reset_state();
        let (w, inspector) = create_headless();
        webview_set_title(w, cstr("Hello").as_ptr());
        webview_set_size(w, 800, 600, 3);
        webview_set_size(w, 1, 1, 9);
        webview_navigate(w, cstr("").as_ptr());
        webview_init(w, cstr("window.ready = true").as_ptr());
        webview_eval(w, cstr("document.title").as_ptr());

        assert_eq!(inspector.title().as_deref(), Some("Hello"));
        assert_eq!(inspector.size(), Some((800, 600, SizeHint::Fixed)));
        assert_eq!(inspector.navigations(), vec![webview::navigation_target("")]);
        assert_eq!(
            inspector.init_scripts().last().map(String::as_str),
            Some("window.ready = true")
        );
        assert_eq!(inspector.evaluated(), vec!["document.title".to_owned()]);
        assert!(!webview_get_window(w).is_null());
        webview_destroy(w);
    }

    #[test]
    #[serial]
    fn test_null_handles_are_ignored() {
        reset_state();
        let null = std::ptr::null_mut();
        webview_run(null);
        webview_terminate(null);
        webview_set_title(null, cstr("x").as_ptr());
        webview_bind(null, cstr("x").as_ptr(), Some(record_call), null as *mut c_void);
        webview_return(null, cstr("1").as_ptr(), 0, cstr("1").as_ptr());
        webview_dispatch(null, Some(record_dispatch), std::ptr::null_mut());
        webview_destroy(null);
        assert!(webview_get_window(null).is_null());
        assert!(CALLS.lock().is_empty());
    }
}
