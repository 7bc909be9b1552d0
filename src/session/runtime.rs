use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::{storage::preferences::KeyValueStore, utils::clock::sleep_until_opt};

use super::{EventQueues, Session, SessionCommand};

/// Owner loop of a [Session]. Commands, hook events, activation events and timer deadlines are
/// all handled here one at a time.
pub struct SessionRuntime<S> {
    session: Session<S>,
    queues: EventQueues,
    commands: mpsc::Receiver<SessionCommand>,
    shutdown: CancellationToken,
}

impl<S: KeyValueStore> SessionRuntime<S> {
    pub fn new(
        session: Session<S>,
        queues: EventQueues,
        commands: mpsc::Receiver<SessionCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            queues,
            commands,
            shutdown,
        }
    }

    /// Executes the session event loop until shutdown is requested. Hooks are released on the way
    /// out, so the caller gets its input devices back.
    #[instrument(skip_all)]
    pub async fn run(mut self) -> Result<Session<S>> {
        info!("Session loop started");
        loop {
            let deadline = self.session.next_deadline();
            let clock = self.session.clock().clone();

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    break;
                }
                Some(command) = self.commands.recv() => {
                    self.session.handle_command(command).await;
                }
                Some(event) = self.queues.input.recv() => {
                    self.session.handle_input(event);
                }
                Some(event) = self.queues.foreground.recv() => {
                    debug!("Foreground changed to {}", event.event.app_name);
                    self.session.handle_foreground(event);
                }
                _ = sleep_until_opt(clock.as_ref(), deadline) => {
                    self.session.on_deadline().await;
                }
            }
        }
        self.session.release();
        info!("Session loop stopped");
        Ok(self.session)
    }
}
