use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

/// A cancellable deferred task.
///
/// Arming the timer always invalidates the previous task first, so at most
/// one task per timer is ever pending. Dropping the timer cancels it.
#[derive(Default)]
pub struct TaskTimer {
    handle: Mutex<Option<AbortHandle>>,
}

impl TaskTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `task` to run after `delay`, cancelling any pending task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let new_handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        })
        .abort_handle();

        let previous = self.handle.lock().replace(new_handle);

        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancels the pending task, if any.
    pub fn cancel(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for TaskTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
