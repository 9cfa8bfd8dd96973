//! Display-less backend.
//!
//! Records everything the RPC layer asks of a window instead of rendering
//! it, and runs dispatched tasks on whichever thread calls `run`. Used by
//! the test-suite and by hosts that want to exercise their bindings without
//! a display server.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::raw::c_void;
use std::rc::Rc;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};

use crate::engine::{external_invoke_script, Engine, LoopProxy, MessageHandler, SizeHint, Task};
use crate::error::{Error, Result};
use crate::webview::Webview;

/// Channel script injected by the headless backend. There is no page, so
/// it only queues messages on the window object.
pub static EXTERNAL_SCRIPT: Lazy<String> = Lazy::new(|| {
    external_invoke_script("(window.__external_outbox=window.__external_outbox||[]).push(s);")
});

// =============================================================================
// Task Queue
// =============================================================================

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    quit: bool,
}

#[derive(Default)]
struct TaskQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl TaskQueue {
    /// Block for the next task; `None` once terminated.
    fn next(&self) -> Option<Task> {
        let mut state = self.state.lock();
        loop {
            if state.quit {
                state.quit = false;
                return None;
            }
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            self.ready.wait(&mut state);
        }
    }
}

impl LoopProxy for TaskQueue {
    fn terminate(&self) {
        self.state.lock().quit = true;
        self.ready.notify_all();
    }

    fn post(&self, task: Task) {
        self.state.lock().tasks.push_back(task);
        self.ready.notify_one();
    }
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Default)]
struct Recorded {
    debug: bool,
    title: Option<String>,
    size: Option<(i32, i32, SizeHint)>,
    navigations: Vec<String>,
    init_scripts: Vec<String>,
    evaluated: Vec<String>,
}

pub struct HeadlessEngine {
    recorded: Rc<RefCell<Recorded>>,
    handler: Rc<dyn MessageHandler>,
    queue: Arc<TaskQueue>,
}

impl HeadlessEngine {
    pub fn new(debug: bool, handler: Rc<dyn MessageHandler>) -> Self {
        let engine = HeadlessEngine {
            recorded: Rc::new(RefCell::new(Recorded {
                debug,
                ..Recorded::default()
            })),
            handler,
            queue: Arc::new(TaskQueue::default()),
        };
        engine.init(&EXTERNAL_SCRIPT);
        engine
    }

    pub fn inspector(&self) -> Inspector {
        Inspector {
            recorded: Rc::clone(&self.recorded),
            handler: Rc::clone(&self.handler),
        }
    }
}

impl Engine for HeadlessEngine {
    fn window(&self) -> *mut c_void {
        Rc::as_ptr(&self.recorded) as *mut c_void
    }

    fn run(&self) {
        while let Some(task) = self.queue.next() {
            task();
        }
    }

    fn proxy(&self) -> Arc<dyn LoopProxy> {
        Arc::clone(&self.queue) as Arc<dyn LoopProxy>
    }

    fn set_title(&self, title: &str) {
        self.recorded.borrow_mut().title = Some(title.to_owned());
    }

    fn set_size(&self, width: i32, height: i32, hint: SizeHint) {
        self.recorded.borrow_mut().size = Some((width, height, hint));
    }

    fn navigate(&self, url: &str) {
        self.recorded.borrow_mut().navigations.push(url.to_owned());
    }

    fn init(&self, js: &str) {
        self.recorded.borrow_mut().init_scripts.push(js.to_owned());
    }

    fn eval(&self, js: &str) {
        self.recorded.borrow_mut().evaluated.push(js.to_owned());
    }
}

// =============================================================================
// Inspector
// =============================================================================

/// Inspection handle onto a headless webview.
#[derive(Clone)]
pub struct Inspector {
    recorded: Rc<RefCell<Recorded>>,
    handler: Rc<dyn MessageHandler>,
}

impl Inspector {
    /// Deliver `message` as if the page had called
    /// `window.external.invoke(message)`.
    pub fn deliver(&self, message: &str) {
        self.handler.on_message(message);
    }

    pub fn debug(&self) -> bool {
        self.recorded.borrow().debug
    }

    pub fn title(&self) -> Option<String> {
        self.recorded.borrow().title.clone()
    }

    pub fn size(&self) -> Option<(i32, i32, SizeHint)> {
        self.recorded.borrow().size
    }

    pub fn navigations(&self) -> Vec<String> {
        self.recorded.borrow().navigations.clone()
    }

    pub fn init_scripts(&self) -> Vec<String> {
        self.recorded.borrow().init_scripts.clone()
    }

    pub fn evaluated(&self) -> Vec<String> {
        self.recorded.borrow().evaluated.clone()
    }
}

/// Create a headless webview together with its inspector.
pub fn create() -> Result<(Webview, Inspector)> {
    create_with_debug(false)
}

pub fn create_with_debug(debug: bool) -> Result<(Webview, Inspector)> {
    let mut inspector = None;
    let view = Webview::with_engine(|handler| {
        let engine = HeadlessEngine::new(debug, handler);
        inspector = Some(engine.inspector());
        Ok(engine)
    })?;
    let inspector =
        inspector.ok_or_else(|| Error::Toolkit("headless engine was not built".into()))?;
    Ok((view, inspector))
}
