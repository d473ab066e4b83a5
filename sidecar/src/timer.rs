//! Resettable timeout used for the idle and hard session timers.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Cancels `fired` once `timeout` elapses without a reset. The hard session
/// timer is simply an `IdleTimer` nobody resets.
pub struct IdleTimer {
    touch: mpsc::UnboundedSender<()>,
}

impl IdleTimer {
    pub fn spawn(timeout: Duration, fired: CancellationToken) -> Self {
        let (touch, mut rx) = mpsc::unbounded_channel::<()>();
        tokio::spawn(async move {
            loop {
                match tokio::time::timeout(timeout, rx.recv()).await {
                    // A reset arrived; the window starts over.
                    Ok(Some(())) => {}
                    // All handles dropped; the timer is disarmed.
                    Ok(None) => return,
                    Err(_) => {
                        fired.cancel();
                        return;
                    }
                }
            }
        });
        Self { touch }
    }

    pub fn reset(&self) {
        let _ = self.touch.send(());
    }
}
