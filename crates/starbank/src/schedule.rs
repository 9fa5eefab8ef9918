use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a scheduled task. Cancellation is cooperative: `cancel`
/// flips a signal the task races against at every await, so a cancelled
/// task stops at its next suspension point rather than mid-instruction.
/// Dropping the handle leaves the task running.
pub struct TaskHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(self) {
        if let Err(error) = self.join.await {
            tracing::warn!(reason = %error, "scheduled task terminated abnormally");
        }
    }
}

/// Runs `task` once at `when` (immediately if `when` already passed)
/// unless cancelled first.
pub fn spawn_at<F>(when: DateTime<Utc>, task: F) -> TaskHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let join = tokio::spawn(async move {
        let cancelled = cancelled_signal(cancel_rx);
        tokio::pin!(cancelled);

        let delay = (when - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            biased;
            () = &mut cancelled => return,
            () = tokio::time::sleep(delay) => {}
        }
        tokio::select! {
            biased;
            () = &mut cancelled => {}
            () = task => {}
        }
    });
    TaskHandle {
        cancel: cancel_tx,
        join,
    }
}

/// Runs `task` every `interval` (first run after one full interval) until
/// cancelled. The delay between runs is measured from the end of the
/// previous run.
pub fn spawn_recurring<F, Fut>(interval: Duration, mut task: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let join = tokio::spawn(async move {
        let cancelled = cancelled_signal(cancel_rx);
        tokio::pin!(cancelled);

        loop {
            tokio::select! {
                biased;
                () = &mut cancelled => return,
                () = tokio::time::sleep(interval) => {}
            }
            tokio::select! {
                biased;
                () = &mut cancelled => return,
                () = task() => {}
            }
        }
    });
    TaskHandle {
        cancel: cancel_tx,
        join,
    }
}

/// Resolves only on an explicit cancel. A dropped handle closes the
/// channel without cancelling, so that case parks forever instead.
async fn cancelled_signal(mut cancel_rx: watch::Receiver<bool>) {
    if cancel_rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
