//! Background expiry of lapsed bids.
//!
//! The sweep is cleanup, not a guarantee: actions on a lapsed bid are already
//! refused by the lazy check in the state machine, the sweeper only makes the
//! stored status catch up and reopens the products.
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{BidError, ValidationError};
use crate::service::BidService;

/// Outcome of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    pub failed: usize,
}

pub struct ExpirySweeper {
    service: Arc<BidService>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(service: Arc<BidService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub fn sweep_once(&self) -> Result<SweepReport, BidError> {
        let report = self.service.expire_stale_bids()?;
        info!(
            scanned = report.scanned,
            expired = report.expired,
            failed = report.failed,
            "expiry sweep finished"
        );
        Ok(report)
    }

    /// Run a pass every `interval` on a dedicated thread until the returned
    /// handle is shut down or dropped.
    pub fn spawn(self) -> Result<SweeperHandle, BidError> {
        if self.interval.is_zero() {
            return Err(ValidationError::Config("sweep interval must be non-zero".into()).into());
        }
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("bid-expiry-sweeper".to_string())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(self.interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(err) = self.sweep_once() {
                                warn!(error = %err, "expiry sweep failed");
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        Ok(SweeperHandle {
            stop,
            handle: Some(handle),
        })
    }
}

pub struct SweeperHandle {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for an in-flight pass to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("expiry sweeper thread panicked");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
