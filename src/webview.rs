//! A web view instance: one backend, one binding registry, one dispatcher.

use std::collections::VecDeque;
use std::fmt::Display;
use std::os::raw::c_void;
use std::rc::Rc;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{html_from_uri, url_encode, DATA_HTML_PREFIX};
use crate::config::Config;
use crate::engine::{Engine, LoopProxy, MessageHandler, SizeHint};
use crate::error::Result;
use crate::json::json_escape;
use crate::rpc::{self, Bindings};

const PLACEHOLDER_HTML: &str = "<html><body>Hello</body></html>";

/// Shown when navigating to an empty URL.
static PLACEHOLDER_URI: Lazy<String> =
    Lazy::new(|| format!("{}{}", DATA_HTML_PREFIX, url_encode(PLACEHOLDER_HTML)));

/// Rewrite a navigation request into the URL handed to the backend.
///
/// Empty input loads a placeholder page, inline `data:text/html,` documents
/// are decoded and re-encoded so loosely encoded HTML still loads, anything
/// else passes through.
pub fn navigation_target(url: &str) -> String {
    if url.is_empty() {
        return PLACEHOLDER_URI.clone();
    }
    let html = html_from_uri(url);
    if html.is_empty() {
        url.to_owned()
    } else {
        format!("{}{}", DATA_HTML_PREFIX, url_encode(&html))
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Work waiting for a webview's loop.
type ViewTask = Box<dyn FnOnce(&Webview) + Send + 'static>;

/// Address of the webview whose loop is currently running, null otherwise,
/// and the tasks queued for it.
#[derive(Default)]
struct LoopTarget {
    running: AtomicPtr<Webview>,
    pending: Mutex<VecDeque<ViewTask>>,
}

impl LoopTarget {
    /// Run every queued task against the running view. Tasks stay queued
    /// while this view's loop is not running, e.g. when the backend fires
    /// the wake-up inside another view's loop or before `run`.
    fn drain(&self) {
        loop {
            let view = self.running.load(Ordering::Acquire);
            if view.is_null() {
                return;
            }
            // Popped one at a time so tasks may dispatch more work.
            let Some(task) = self.pending.lock().pop_front() else {
                return;
            };
            // Safety: `running` is only non-null while `Webview::run` holds a
            // shared borrow of the view, and `drain` only runs on the loop
            // thread inside that call.
            task(unsafe { &*view });
        }
    }
}

/// Thread-safe handle for reaching a webview from other threads.
#[derive(Clone)]
pub struct Dispatcher {
    proxy: Arc<dyn LoopProxy>,
    target: Arc<LoopTarget>,
}

impl Dispatcher {
    /// Run `f` on the loop thread once the loop is next idle.
    ///
    /// Tasks run in submission order and never overlap. Tasks dispatched
    /// before [`Webview::run`] wait for it.
    pub fn dispatch<F>(&self, f: F)
    where
        F: FnOnce(&Webview) + Send + 'static,
    {
        self.target.pending.lock().push_back(Box::new(f));
        self.wake();
    }

    fn wake(&self) {
        let target = Arc::clone(&self.target);
        self.proxy.post(Box::new(move || target.drain()));
    }

    pub fn terminate(&self) {
        self.proxy.terminate();
    }

    /// Settle the pending promise for `seq`; see [`rpc::resolve_script`].
    pub fn resolve(&self, seq: &str, status: i32, result: &str) {
        let script = rpc::resolve_script(seq, status, result);
        self.dispatch(move |view| view.eval(&script));
    }
}

// =============================================================================
// Webview
// =============================================================================

pub struct Webview {
    engine: Box<dyn Engine>,
    bindings: Rc<Bindings>,
    dispatcher: Dispatcher,
}

impl Webview {
    /// Build a webview on top of a backend.
    ///
    /// `make_engine` receives the handler page messages must be delivered
    /// to.
    pub fn with_engine<E, F>(make_engine: F) -> Result<Self>
    where
        E: Engine + 'static,
        F: FnOnce(Rc<dyn MessageHandler>) -> Result<E>,
    {
        let bindings = Rc::new(Bindings::new());
        let engine = make_engine(Rc::clone(&bindings) as Rc<dyn MessageHandler>)?;
        let dispatcher = Dispatcher {
            proxy: engine.proxy(),
            target: Arc::new(LoopTarget::default()),
        };
        Ok(Webview {
            engine: Box::new(engine),
            bindings,
            dispatcher,
        })
    }

    /// Create a GTK window hosting a WebKit view. A non-null `parent` must
    /// point to a `GtkWindow` the view is embedded into.
    #[cfg(feature = "gtk")]
    pub fn new(debug: bool, parent: *mut c_void) -> Result<Self> {
        Self::with_engine(|handler| crate::gtk::GtkEngine::new(debug, parent, handler))
    }

    /// Create a GTK webview from `config` and apply it.
    #[cfg(feature = "gtk")]
    pub fn from_config(config: &Config) -> Result<Self> {
        let view = Self::new(config.debug || Config::debug_from_env(), std::ptr::null_mut())?;
        view.apply(config);
        Ok(view)
    }

    /// Apply title, size and start page from `config`.
    pub fn apply(&self, config: &Config) {
        if let Some(title) = &config.title {
            self.set_title(title);
        }
        if let (Some(width), Some(height)) = (config.width, config.height) {
            self.set_size(width, height, config.hint);
        }
        if let Some(url) = &config.url {
            self.navigate(url);
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Block running the event loop until [`Webview::terminate`].
    pub fn run(&self) {
        let this = self as *const Webview as *mut Webview;
        let previous = self.dispatcher.target.running.swap(this, Ordering::AcqRel);
        if !self.dispatcher.target.pending.lock().is_empty() {
            // Wake-ups posted before `run` may have fired with no loop of
            // this view running.
            self.dispatcher.wake();
        }
        self.engine.run();
        self.dispatcher.target.running.store(previous, Ordering::Release);
    }

    pub fn terminate(&self) {
        self.dispatcher.terminate();
    }

    pub fn dispatch<F>(&self, f: F)
    where
        F: FnOnce(&Webview) + Send + 'static,
    {
        self.dispatcher.dispatch(f);
    }

    pub fn window(&self) -> *mut c_void {
        self.engine.window()
    }

    pub fn set_title(&self, title: &str) {
        self.engine.set_title(title);
    }

    pub fn set_size(&self, width: i32, height: i32, hint: SizeHint) {
        self.engine.set_size(width, height, hint);
    }

    pub fn navigate(&self, url: &str) {
        self.engine.navigate(&navigation_target(url));
    }

    pub fn init(&self, js: &str) {
        self.engine.init(js);
    }

    pub fn eval(&self, js: &str) {
        self.engine.eval(js);
    }

    // =========================================================================
    // Bindings
    // =========================================================================

    /// Expose `callback` to the page as `window[name]`.
    ///
    /// The callback gets the call's sequence id and its arguments as a JSON
    /// array and must eventually answer through [`Webview::resolve`] or
    /// [`Dispatcher::resolve`]. Only pages loaded after this call see the
    /// binding.
    pub fn bind<F>(&self, name: &str, callback: F)
    where
        F: Fn(&str, &str) + 'static,
    {
        self.bindings.insert(name, Rc::new(callback));
        self.init(&rpc::shim_script(name));
    }

    /// Bind a function that answers immediately with a JSON result.
    pub fn bind_sync<F>(&self, name: &str, f: F)
    where
        F: Fn(&str) -> String + 'static,
    {
        let dispatcher = self.dispatcher();
        self.bind(name, move |seq, params| dispatcher.resolve(seq, 0, &f(params)));
    }

    /// Bind a typed function.
    ///
    /// The argument array is deserialized into `A` (usually a tuple). `Ok`
    /// resolves with the serialized value; `Err`, or arguments that do not
    /// fit `A`, reject with the error message as a JSON string.
    pub fn bind_json<A, R, E, F>(&self, name: &str, f: F)
    where
        A: DeserializeOwned,
        R: Serialize,
        E: Display,
        F: Fn(A) -> std::result::Result<R, E> + 'static,
    {
        let dispatcher = self.dispatcher();
        self.bind(name, move |seq, params| {
            let outcome = serde_json::from_str::<A>(params)
                .map_err(|err| err.to_string())
                .and_then(|args| f(args).map_err(|err| err.to_string()))
                .and_then(|value| serde_json::to_string(&value).map_err(|err| err.to_string()));
            match outcome {
                Ok(json) => dispatcher.resolve(seq, 0, &json),
                Err(message) => dispatcher.resolve(seq, -1, &json_escape(&message)),
            }
        });
    }

    /// Settle a pending call; safe to use from the loop thread, other threads
    /// should go through a [`Dispatcher`].
    pub fn resolve(&self, seq: &str, status: i32, result: &str) {
        self.dispatcher.resolve(seq, status, result);
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Task;
    use crate::headless;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread;

    /// Backend whose wake-ups run inline on the posting thread, whether or
    /// not a loop is running.
    struct InlineProxy;

    impl LoopProxy for InlineProxy {
        fn terminate(&self) {}

        fn post(&self, task: Task) {
            task();
        }
    }

    struct InlineEngine;

    impl Engine for InlineEngine {
        fn window(&self) -> *mut c_void {
            std::ptr::null_mut()
        }

        fn run(&self) {}

        fn proxy(&self) -> Arc<dyn LoopProxy> {
            Arc::new(InlineProxy)
        }

        fn set_title(&self, _: &str) {}

        fn set_size(&self, _: i32, _: i32, _: SizeHint) {}

        fn navigate(&self, _: &str) {}

        fn init(&self, _: &str) {}

        fn eval(&self, _: &str) {}
    }

    #[test]
    fn test_navigation_target_rewrites() {
        assert_eq!(
            navigation_target(""),
            "data:text/html,%3chtml%3e%3cbody%3eHello%3c%2fbody%3e%3c%2fhtml%3e"
        );
        assert_eq!(
            navigation_target("data:text/html,<p>a b</p>"),
            "data:text/html,%3cp%3ea%20b%3c%2fp%3e"
        );
        assert_eq!(navigation_target("https://example.com/"), "https://example.com/");
    }

    #[test]
    fn test_create_injects_external_channel() {
        let (_view, inspector) = headless::create().unwrap();
        assert_eq!(inspector.init_scripts(), vec![headless::EXTERNAL_SCRIPT.clone()]);
    }

    #[test]
    fn test_bind_registers_and_injects_shim() {
        let (view, inspector) = headless::create().unwrap();
        view.bind("sum", |_, _| {});
        assert!(view.bindings().contains("sum"));
        assert_eq!(inspector.init_scripts().last(), Some(&rpc::shim_script("sum")));
    }

    #[test]
    fn test_inbound_message_reaches_binding() {
        let (view, inspector) = headless::create().unwrap();
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            view.bind("sum", move |seq, params| {
                seen.borrow_mut().push((seq.to_owned(), params.to_owned()));
            });
        }

        inspector.deliver(r#"{"id":5,"method":"sum","params":[2,3]}"#);
        inspector.deliver(r#"{"id":6,"method":"nope","params":[]}"#);

        assert_eq!(*seen.borrow(), vec![("5".to_owned(), "[2,3]".to_owned())]);
    }

    #[test]
    fn test_resolve_evaluates_settle_script_on_loop() {
        let (view, inspector) = headless::create().unwrap();
        view.resolve("5", 0, "5");
        view.resolve("6", 1, r#""nope""#);
        view.dispatch(|view| view.terminate());
        assert!(inspector.evaluated().is_empty());

        view.run();

        assert_eq!(
            inspector.evaluated(),
            vec![
                "window._rpc[5].resolve(5); window._rpc[5] = undefined".to_owned(),
                r#"window._rpc[6].reject("nope"); window._rpc[6] = undefined"#.to_owned(),
            ]
        );
    }

    #[test]
    fn test_bind_sync_resolves_with_return_value() {
        let (view, inspector) = headless::create().unwrap();
        view.bind_sync("echo", |params| params.to_owned());

        inspector.deliver(r#"{"id":3,"method":"echo","params":["hi",1]}"#);
        assert!(inspector.evaluated().is_empty());
        view.dispatch(|view| view.terminate());
        view.run();

        assert_eq!(
            inspector.evaluated(),
            vec![r#"window._rpc[3].resolve(["hi",1]); window._rpc[3] = undefined"#.to_owned()]
        );
    }

    #[test]
    fn test_bind_json_typed_arguments() {
        let (view, inspector) = headless::create().unwrap();
        view.bind_json("add", |(a, b): (i64, i64)| {
            if b == 0 {
                Err("b must not be zero")
            } else {
                Ok(a + b)
            }
        });

        inspector.deliver(r#"{"id":1,"method":"add","params":[2,3]}"#);
        inspector.deliver(r#"{"id":2,"method":"add","params":[2,0]}"#);
        inspector.deliver(r#"{"id":3,"method":"add","params":["x"]}"#);
        view.dispatch(|view| view.terminate());
        view.run();

        let evaluated = inspector.evaluated();
        assert_eq!(evaluated.len(), 3);
        assert_eq!(evaluated[0], "window._rpc[1].resolve(5); window._rpc[1] = undefined");
        assert_eq!(
            evaluated[1],
            r#"window._rpc[2].reject("b must not be zero"); window._rpc[2] = undefined"#
        );
        assert!(evaluated[2].starts_with("window._rpc[3].reject(\"invalid type"));
    }

    #[test]
    fn test_apply_config() {
        let (view, inspector) = headless::create().unwrap();
        let config = Config::from_json(
            r#"{"title":"Demo","width":640,"height":480,"hint":"fixed","url":"https://example.com"}"#,
        )
        .unwrap();

        view.apply(&config);

        assert_eq!(inspector.title().as_deref(), Some("Demo"));
        assert_eq!(inspector.size(), Some((640, 480, SizeHint::Fixed)));
        assert_eq!(inspector.navigations(), vec!["https://example.com".to_owned()]);
    }

    #[test]
    fn test_dispatch_before_run_waits_for_loop() {
        let (view, _inspector) = headless::create().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        {
            let ran = Arc::clone(&ran);
            view.dispatch(move |view| {
                ran.store(true, Ordering::SeqCst);
                view.terminate();
            });
        }
        assert!(!ran.load(Ordering::SeqCst));
        view.run();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_early_wakeup_keeps_task_until_run() {
        let view = Webview::with_engine(|_| Ok(InlineEngine)).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let ran = Arc::clone(&ran);
            view.dispatch(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        view.run();
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        view.run();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_task_waits_for_its_own_view() {
        let (first, _) = headless::create().unwrap();
        let (second, _) = headless::create().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        {
            let ran = Arc::clone(&ran);
            first.dispatch(move |view| {
                ran.store(true, Ordering::SeqCst);
                view.terminate();
            });
        }
        // The first view's wake-up fires inside the second view's loop.
        let first_target = Arc::clone(&first.dispatcher.target);
        second.dispatch(move |view| {
            first_target.drain();
            view.terminate();
        });
        second.run();
        assert!(!ran.load(Ordering::SeqCst));

        first.run();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cross_thread_dispatch_is_serial_and_ordered() {
        const THREADS: usize = 4;
        const TASKS: usize = 50;

        let (view, _inspector) = headless::create().unwrap();
        let loop_thread = thread::current().id();
        let log = Arc::new(Mutex::new(Vec::new()));
        let busy = Arc::new(AtomicBool::new(false));

        let workers: Vec<_> = (0..THREADS)
            .map(|worker| {
                let dispatcher = view.dispatcher();
                let log = Arc::clone(&log);
                let busy = Arc::clone(&busy);
                thread::spawn(move || {
                    for task in 0..TASKS {
                        let log = Arc::clone(&log);
                        let busy = Arc::clone(&busy);
                        dispatcher.dispatch(move |_| {
                            assert!(!busy.swap(true, Ordering::SeqCst));
                            log.lock().push((worker, task, thread::current().id()));
                            busy.store(false, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        let dispatcher = view.dispatcher();
        let closer = thread::spawn(move || {
            for worker in workers {
                worker.join().unwrap();
            }
            dispatcher.dispatch(|view| view.terminate());
        });

        view.run();
        closer.join().unwrap();

        let log = log.lock();
        assert_eq!(log.len(), THREADS * TASKS);
        assert!(log.iter().all(|&(_, _, id)| id == loop_thread));
        for worker in 0..THREADS {
            let order: Vec<usize> = log
                .iter()
                .filter(|&&(w, _, _)| w == worker)
                .map(|&(_, task, _)| task)
                .collect();
            assert_eq!(order, (0..TASKS).collect::<Vec<_>>());
        }
    }
}
