use std::io;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use tracing::error;

use crate::{
    NonRelocatablePathWarning, RelocationError, RelocationExecutor, RelocationOutcome,
    RelocationRequest, RelocationState, TransactionError, TransactionFs,
};

/// Receives progress from a running relocation.
pub trait Reporter {
    fn transition(&mut self, state: RelocationState);

    fn warning(&mut self, _warning: &NonRelocatablePathWarning) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn transition(&mut self, _state: RelocationState) {}
}

#[derive(Debug)]
pub enum RelocationEvent {
    Transition(RelocationState),
    Warning(NonRelocatablePathWarning),
    /// Sent exactly once, last.
    Finished(Result<RelocationOutcome, RelocationError>),
}

struct ChannelReporter {
    sender: mpsc::Sender<RelocationEvent>,
}

impl Reporter for ChannelReporter {
    fn transition(&mut self, state: RelocationState) {
        // A dropped receiver must not interrupt the transaction.
        let _ = self.sender.send(RelocationEvent::Transition(state));
    }

    fn warning(&mut self, warning: &NonRelocatablePathWarning) {
        let _ = self.sender.send(RelocationEvent::Warning(warning.clone()));
    }
}

/// A relocation running on its own thread.
pub struct RelocationTask {
    events: mpsc::Receiver<RelocationEvent>,
    handle: thread::JoinHandle<()>,
    source: PathBuf,
    target: PathBuf,
}

/// Starts `request` on a worker thread so the caller can keep a UI responsive.
pub fn spawn_relocation<F>(
    executor: RelocationExecutor<F>,
    request: RelocationRequest,
) -> io::Result<RelocationTask>
where
    F: TransactionFs + 'static,
{
    let (sender, events) = mpsc::channel();
    let source = request.source.clone();
    let target = request.target.clone();

    let handle = thread::Builder::new()
        .name("egmove-relocation".to_string())
        .spawn(move || {
            let mut reporter = ChannelReporter { sender };
            let result = executor.execute(request, &mut reporter);
            let _ = reporter.sender.send(RelocationEvent::Finished(result));
        })?;

    Ok(RelocationTask {
        events,
        handle,
        source,
        target,
    })
}

impl RelocationTask {
    /// Blocks until the relocation finishes, handing every event to `on_event`
    /// before returning the final result. A worker that dies without a result
    /// is reported as needing manual recovery.
    pub fn wait_with(
        self,
        mut on_event: impl FnMut(&RelocationEvent),
    ) -> Result<RelocationOutcome, RelocationError> {
        let mut finished = None;
        for event in self.events.iter() {
            on_event(&event);
            if let RelocationEvent::Finished(result) = event {
                finished = Some(result);
                break;
            }
        }

        if let Some(result) = finished {
            let _ = self.handle.join();
            return result;
        }

        // The worker died mid-transaction; where the payload ended up is unknown.
        let _ = self.handle.join();
        let payload_location = if self.target.exists() {
            self.target
        } else {
            self.source.clone()
        };
        error!(
            payload = %payload_location.display(),
            "relocation worker exited without a result"
        );
        Err(RelocationError::ManualRecoveryRequired {
            payload_location,
            original_location: self.source,
            cause: TransactionError::WorkerLost,
            rollback_failures: Vec::new(),
        })
    }

    pub fn wait(self) -> Result<RelocationOutcome, RelocationError> {
        self.wait_with(|_| {})
    }
}
