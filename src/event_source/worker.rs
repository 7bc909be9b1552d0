//! Background threads for backends that poll the OS. Stopping wakes the thread out of its poll
//! wait instead of letting it finish the interval, so removing a hook returns promptly.

use std::{
    sync::mpsc::{self, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::Result;
use tracing::error;

/// Receiving end of a worker's stop request. The request is the owner dropping its sender.
pub struct StopSignal {
    receiver: mpsc::Receiver<()>,
}

impl StopSignal {
    /// Waits up to `timeout` and reports whether a stop was requested meanwhile.
    pub fn wait(&self, timeout: Duration) -> bool {
        !matches!(
            self.receiver.recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        )
    }

    pub fn is_stopped(&self) -> bool {
        !matches!(self.receiver.try_recv(), Err(TryRecvError::Empty))
    }
}

pub struct Worker {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Worker {
    pub fn spawn(name: &str, body: impl FnOnce(StopSignal) + Send + 'static) -> Result<Self> {
        let (stop, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || body(StopSignal { receiver }))?;
        Ok(Self { stop, handle })
    }

    pub fn stop(self) {
        drop(self.stop);
        if self.handle.join().is_err() {
            error!("Worker thread panicked");
        }
    }
}
