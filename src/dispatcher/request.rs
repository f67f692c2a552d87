//! The client-visible half of a read: `ReadOptions`, `Request`, and its
//! shared completion state.

use std::sync::{Arc, Condvar, Mutex};

use crate::error::{ErrorCode, Result};
use crate::queue::Priority;

/// Options accepted by `Batch::read`. `target_va`, when set, redirects the
/// decoded bytes into caller-owned memory instead of an owned `Vec<u8>`; the
/// dispatcher never frees that memory.
#[derive(Default)]
pub struct ReadOptions {
    pub offset: u64,
    pub size: u64,
    pub target_va: Option<*mut u8>,
}

// SAFETY: a raw `target_va` pointer is only ever written to by the
// dispatcher/decode thread that owns the request, under the caller's
// contract that the pointee outlives the request's callback.
unsafe impl Send for ReadOptions {}

impl ReadOptions {
    pub fn new() -> Self {
        ReadOptions {
            offset: 0,
            size: u64::MAX,
            target_va: None,
        }
    }

    pub fn with_range(offset: u64, size: u64) -> Self {
        ReadOptions {
            offset,
            size,
            target_va: None,
        }
    }
}

/// What `Request::get_result` hands back on success: either the request's
/// own owned buffer, or a count of bytes written into the caller's
/// `target_va` memory.
#[derive(Debug)]
pub enum RequestResult {
    Buffer(Vec<u8>),
    WrittenToTarget { len: usize },
}

/// `New → Waiting → Resolving → (Reading* → Decoding*) → Completed`, per §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    New,
    Waiting,
    Resolving,
    Reading,
    Decoding,
    Completed,
}

type Callback = Box<dyn FnOnce(Result<RequestResult>) + Send>;

struct RequestState {
    status: RequestStatus,
    result: Option<Result<RequestResult>>,
    callback: Option<Callback>,
    priority: Priority,
    cancel_requested: bool,
}

/// Shared between the public [`Request`] handle and the dispatcher thread.
/// Terminal transitions are applied exactly once (guarded by `result`
/// already being `Some`), so a callback fires at most once even under
/// concurrent cancel per §4.8.
pub struct RequestShared {
    state: Mutex<RequestState>,
    condvar: Condvar,
}

impl RequestShared {
    pub fn new(priority: Priority) -> Arc<Self> {
        Arc::new(RequestShared {
            state: Mutex::new(RequestState {
                status: RequestStatus::New,
                result: None,
                callback: None,
                priority,
                cancel_requested: false,
            }),
            condvar: Condvar::new(),
        })
    }

    pub fn set_callback(&self, callback: Callback) {
        let mut state = self.state.lock().unwrap();
        if let Some(result) = state.result.take() {
            // Already completed (e.g. cancelled before the callback was
            // attached); fire immediately rather than dropping it silently.
            drop(state);
            callback(result);
            return;
        }
        state.callback = Some(callback);
    }

    pub fn set_status(&self, status: RequestStatus) {
        let mut state = self.state.lock().unwrap();
        if state.result.is_none() {
            state.status = status;
        }
    }

    pub fn priority(&self) -> Priority {
        self.state.lock().unwrap().priority
    }

    pub fn update_priority(&self, priority: Priority) {
        self.state.lock().unwrap().priority = priority;
    }

    pub fn request_cancel(&self) {
        self.state.lock().unwrap().cancel_requested = true;
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.state.lock().unwrap().cancel_requested
    }

    /// Applies the terminal result exactly once; a second call (e.g. a
    /// cancel racing a completion) is a no-op.
    pub fn complete(&self, result: Result<RequestResult>) {
        let callback = {
            let mut state = self.state.lock().unwrap();
            if state.result.is_some() {
                return;
            }
            state.status = RequestStatus::Completed;
            let callback = state.callback.take();
            state.result = Some(clone_result(&result));
            callback
        };
        self.condvar.notify_all();
        if let Some(callback) = callback {
            callback(result);
        }
    }

    pub fn status(&self) -> RequestStatus {
        self.state.lock().unwrap().status
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().unwrap().result.is_some()
    }

    /// Blocks until the request completes, then returns its result.
    pub fn wait_for_result(&self) -> Result<RequestResult> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(result) = state.result.take() {
                return result;
            }
            state = self.condvar.wait(state).unwrap();
        }
    }
}

fn clone_result(result: &Result<RequestResult>) -> Result<RequestResult> {
    match result {
        Ok(RequestResult::Buffer(buf)) => Ok(RequestResult::Buffer(buf.clone())),
        Ok(RequestResult::WrittenToTarget { len }) => Ok(RequestResult::WrittenToTarget { len: *len }),
        Err(e) => Err(e.clone()),
    }
}

/// A single client-visible read request, returned by `Batch::read`.
pub struct Request {
    pub(crate) shared: Arc<RequestShared>,
}

impl Request {
    pub(crate) fn new(shared: Arc<RequestShared>) -> Self {
        Request { shared }
    }

    pub fn status(&self) -> RequestStatus {
        self.shared.status()
    }

    /// Blocks until the request completes and returns its outcome. Use
    /// `status()` first if polling without blocking is preferred.
    pub fn get_result(self) -> Result<RequestResult> {
        self.shared.wait_for_result()
    }

    /// Best-effort, non-blocking cancellation (§5). The callback still fires,
    /// with `ErrorCode::Cancelled`, unless the request already completed.
    pub fn cancel(&self) {
        self.shared.request_cancel();
    }

    pub fn update_priority(&self, priority: Priority) {
        self.shared.update_priority(priority);
    }
}

pub(crate) fn cancelled_result() -> Result<RequestResult> {
    Err(ErrorCode::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_exactly_once() {
        let shared = RequestShared::new(Priority::Medium);
        shared.complete(Ok(RequestResult::Buffer(vec![1, 2, 3])));
        shared.complete(Ok(RequestResult::Buffer(vec![9, 9, 9]))); // ignored

        let request = Request::new(shared);
        match request.get_result().unwrap() {
            RequestResult::Buffer(buf) => assert_eq!(buf, vec![1, 2, 3]),
            _ => panic!("expected owned buffer"),
        }
    }

    #[test]
    fn callback_fires_once_even_set_after_completion() {
        let shared = RequestShared::new(Priority::Medium);
        shared.complete(Ok(RequestResult::Buffer(vec![5])));

        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let f = fired.clone();
        shared.set_callback(Box::new(move |_| {
            f.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_is_observable_before_completion() {
        let shared = RequestShared::new(Priority::Medium);
        assert!(!shared.is_cancel_requested());
        shared.request_cancel();
        assert!(shared.is_cancel_requested());
    }
}
