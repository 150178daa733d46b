//! Ctrl-C handling
//!
//! [`InterruptAdapter`] turns SIGINT into cooperative cancellation: every
//! registered [`CancelHandle`] gets `cancel_all()` and the shared stop flag
//! is raised, so both subscriber sessions and consumer loops wind down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::client::CancelHandle;
use crate::error::Result;

#[derive(Clone, Default)]
pub struct InterruptAdapter {
    stop: Arc<AtomicBool>,
    handles: Arc<Mutex<Vec<CancelHandle>>>,
}

impl InterruptAdapter {
    /// Adapter not yet attached to any signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for Ctrl-C on a background thread
    pub fn install() -> Result<Self> {
        let adapter = Self::new();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let listener = adapter.clone();
        std::thread::Builder::new()
            .name("fovcast-signal".into())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        if let Err(e) = tokio::signal::ctrl_c().await {
                            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                            return;
                        }
                        tracing::info!("Interrupt received, cancelling sessions");
                        listener.trigger();
                    }
                });
            })?;

        Ok(adapter)
    }

    /// Cancel `handle`'s sessions on interrupt
    pub fn register(&self, handle: CancelHandle) {
        self.handles.lock().push(handle);
    }

    /// Stop flag raised on interrupt, for consumer loops
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn is_triggered(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Act as if Ctrl-C was pressed
    pub fn trigger(&self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.handles.lock().iter() {
            handle.cancel_all();
        }
    }
}
