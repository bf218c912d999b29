//! Debounced, coalescing writes of the chats table.
//!
//! A single background worker owns all writes. Each scheduled snapshot
//! replaces the pending one and restarts the quiet timer, so a burst of
//! edits becomes one write of the latest state.

use shared::ChatsTable;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, error};

use crate::store::ChatStore;

pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(500);

enum SaveCommand {
    Schedule(ChatsTable),
    Flush(oneshot::Sender<()>),
}

/// Sender side of the save worker. Dropping the last handle writes any
/// pending snapshot and stops the worker.
#[derive(Clone)]
pub struct SaveHandle {
    tx: mpsc::UnboundedSender<SaveCommand>,
}

impl SaveHandle {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(store: ChatStore, quiet_window: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(store, quiet_window, rx));
        Self { tx }
    }

    pub fn schedule(&self, snapshot: ChatsTable) {
        if self.tx.send(SaveCommand::Schedule(snapshot)).is_err() {
            error!("save worker has stopped; change not persisted");
        }
    }

    /// Writes any pending snapshot now and waits for it.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(SaveCommand::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run_worker(
    store: ChatStore,
    quiet_window: Duration,
    mut rx: mpsc::UnboundedReceiver<SaveCommand>,
) {
    let mut pending: Option<ChatsTable> = None;

    loop {
        let command = if pending.is_some() {
            tokio::select! {
                cmd = rx.recv() => cmd,
                _ = sleep(quiet_window) => {
                    write(&store, pending.take()).await;
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match command {
            Some(SaveCommand::Schedule(snapshot)) => {
                if pending.replace(snapshot).is_some() {
                    debug!("coalesced pending save");
                }
            }
            Some(SaveCommand::Flush(ack)) => {
                write(&store, pending.take()).await;
                let _ = ack.send(());
            }
            None => {
                write(&store, pending.take()).await;
                break;
            }
        }
    }
}

async fn write(store: &ChatStore, snapshot: Option<ChatsTable>) {
    let Some(table) = snapshot else {
        return;
    };
    match store.save(&table).await {
        Ok(()) => debug!("chats saved"),
        // In-memory state stays authoritative; the next change saves again.
        Err(e) => error!(error = %e, "error saving chats"),
    }
}
