use tracing::{info, warn};

use fractal_core::FractalError;

use super::{ManagerState, QueueManager, ShutdownReport, MAX_DRAIN_CYCLES};
use crate::adapters::adapter_self_test;

impl QueueManager {
    /// Claim once, then block until every held task is finished and pushed.
    ///
    /// Returns `false` if results were still outstanding after
    /// [`MAX_DRAIN_CYCLES`] flushes, e.g. because the server is unreachable.
    pub fn await_results(&mut self) -> bool {
        if self.state == ManagerState::Stopped {
            return false;
        }
        self.update();

        for _ in 0..MAX_DRAIN_CYCLES {
            if self.is_drained() {
                return true;
            }
            self.adapter.await_results();
            self.cycle(false);
        }

        let drained = self.is_drained();
        if !drained {
            warn!(
                manager = %self.name,
                current = self.current_tasks.len(),
                stale_tracking = self.stale_payloads.len(),
                "results still outstanding after drain cycles"
            );
        }
        drained
    }

    fn is_drained(&self) -> bool {
        self.current_tasks.is_empty() && self.stale_payloads.is_empty()
    }

    /// Flush finished results, then hand every unfinished task back to the server.
    ///
    /// Work already running in the adapter is not interrupted; its results
    /// would be rejected by the server. Once stopped, further calls are a
    /// no-op. A failed deactivation leaves the manager SHUTTING_DOWN, so
    /// the call can be repeated.
    pub fn shutdown(&mut self) -> Result<ShutdownReport, FractalError> {
        if self.state == ManagerState::Stopped {
            return Ok(ShutdownReport {
                nshutdown: 0,
                nstale: self.n_stale_jobs,
            });
        }

        self.state = ManagerState::ShuttingDown;
        self.cycle(false);

        let nshutdown = match self.client.deactivate_manager(&self.name) {
            Ok(n) => n,
            Err(FractalError::UnknownManager(_)) => {
                warn!(manager = %self.name, "manager already inactive on the server");
                0
            }
            // Stay SHUTTING_DOWN so a later call re-issues the deactivation.
            Err(e) => {
                warn!(manager = %self.name, error = %e, "deactivation failed; shutdown can be retried");
                return Err(e);
            }
        };

        let nstale = self.n_stale_jobs + self.stale_payloads.len();
        self.current_tasks.clear();
        self.stale_payloads.clear();
        self.state = ManagerState::Stopped;

        info!(manager = %self.name, nshutdown, nstale, "queue manager shut down");
        Ok(ShutdownReport { nshutdown, nstale })
    }

    /// Cancel queued adapter work and release its resources.
    pub fn close_adapter(&mut self) {
        self.adapter.close();
    }

    /// Run the adapter self-test. Only meaningful while the manager holds no work.
    pub fn test(&mut self) -> bool {
        if !self.current_tasks.is_empty() {
            warn!(manager = %self.name, "self-test skipped: manager holds tasks");
            return false;
        }
        adapter_self_test(self.adapter.as_mut(), 4)
    }
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        if self.state != ManagerState::Stopped {
            self.close_adapter();
        }
    }
}
