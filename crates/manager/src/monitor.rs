//! NFC tag liveness monitor
//!
//! NFC stacks rarely deliver a "tag left" event, so each managed tag gets
//! a polling thread. Passive mode only watches the last-activity
//! timestamp; active mode additionally pings the tag once traffic goes
//! quiet. The sleep is a channel receive so shutdown is prompt.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Sender, bounded};
use tracing::debug;

use keyfob_core::{CardTransport, Clock, SharedTransport};

/// Liveness parameters, in the units the checks run in
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Poll interval
    pub interval: Duration,
    /// Passive mode: declare loss when no traffic for this long
    pub passive_timeout_ms: u64,
    /// Active mode: ping once traffic has been quiet for this long
    pub ping_delay_ms: u64,
    /// Whether to actively ping the tag
    pub active: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            passive_timeout_ms: 1500,
            ping_delay_ms: 750,
            active: false,
        }
    }
}

/// Handle to a running monitor thread
#[derive(Debug)]
pub struct MonitorHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Spawn a monitor over a shared transport; `on_loss` runs on the
    /// monitor thread after the transport has been released.
    pub fn spawn<F>(
        mut transport: SharedTransport,
        last_rx_ms: Arc<AtomicU64>,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
        on_loss: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread = std::thread::Builder::new()
            .name("keyfob-nfc-monitor".into())
            .spawn(move || {
                loop {
                    // interruptible sleep
                    if stop_rx.recv_timeout(config.interval).is_ok() {
                        debug!("monitor stopped");
                        return;
                    }
                    if !is_alive(&mut transport, &last_rx_ms, clock.as_ref(), &config) {
                        debug!("tag lost, releasing transport");
                        transport.release();
                        on_loss();
                        return;
                    }
                }
            })
            .expect("failed to spawn monitor thread");

        Self {
            stop_tx,
            thread: Some(thread),
        }
    }

    /// Stop the monitor and wait for the thread to exit
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        // no join here; the monitor may be the one dropping the handle
    }
}

fn is_alive(
    transport: &mut SharedTransport,
    last_rx_ms: &AtomicU64,
    clock: &dyn Clock,
    config: &MonitorConfig,
) -> bool {
    let idle = clock
        .now_ms()
        .saturating_sub(last_rx_ms.load(Ordering::Relaxed));
    if config.active {
        idle < config.ping_delay_ms || transport.ping()
    } else {
        idle < config.passive_timeout_ms
    }
}
