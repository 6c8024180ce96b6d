//! 周期実行ループ（status sync, reaper）の起動と停止
//!
//! - `shutdown()` で停止要求を送り、進行中の 1 周が終わるのを待つ
//! - 1 周の途中で打ち切ることはしない
//! - `LoopHandle` を drop した場合もループは止まる

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct LoopHandle {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    /// Request shutdown without waiting.
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            tracing::warn!(task = self.name, error = %e, "background loop ended abnormally");
        }
    }
}

/// Runs `tick` every `interval` until shutdown is requested.
pub fn spawn_periodic<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> LoopHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::debug!(task = name, interval_ms = interval.as_millis() as u64, "background loop started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // handle dropped
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => tick().await,
            }
        }
        tracing::debug!(task = name, "background loop stopped");
    });

    LoopHandle {
        name,
        shutdown_tx,
        join,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn ticks_until_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic("test", Duration::from_millis(5), {
            let count = count.clone();
            move || {
                let count = count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        while count.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown().await;

        let after = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), after);
    }
}
