// Feed runtime: one tokio task owning the `ChatFeed`.
//
// The task multiplexes transport signals, control commands, the next timer
// deadline and the shutdown broadcast. Updates go out over a channel; the
// task exits when the consumer drops its receiver.

use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::feed::{ChatFeed, FeedUpdate};
use crate::stream::sse::{SignalReceiver, SseTransport};

/// Requests from the consumer to the running feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedCommand {
    /// Tear down and reconnect immediately (e.g. after resuming from sleep).
    ForceReconnect,
    /// Drop everything rendered and reconnect without a resume cursor.
    Clear,
    MarkSendInFlight,
    Shutdown,
}

pub struct FeedHandle {
    commands: mpsc::UnboundedSender<FeedCommand>,
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<Result<()>>>,
}

impl FeedHandle {
    pub fn send(&self, command: FeedCommand) {
        if self.commands.send(command).is_err() {
            debug!(?command, "feed task already stopped");
        }
    }

    pub fn force_reconnect(&self) {
        self.send(FeedCommand::ForceReconnect);
    }

    pub fn clear(&self) {
        self.send(FeedCommand::Clear);
    }

    pub fn mark_send_in_flight(&self) {
        self.send(FeedCommand::MarkSendInFlight);
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Shut down and wait for the task to finish.
    pub async fn wait(mut self) -> Result<()> {
        self.shutdown();
        match self.task.take() {
            Some(task) => task.await.context("feed task panicked")?,
            None => Ok(()),
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn the feed on the current runtime.
pub fn spawn_feed(config: &ClientConfig, updates: mpsc::UnboundedSender<FeedUpdate>) -> Result<FeedHandle> {
    let (commands, command_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);

    let (signal_tx, signal_rx) = SseTransport::channel();
    let server_url = config.server_url().context("invalid client configuration")?;
    let transport =
        SseTransport::new(&server_url, signal_tx).context("failed to build stream transport")?;
    let feed = ChatFeed::new(transport, config.feed_settings(), Instant::now());

    info!(server = %server_url, "starting chat feed");
    let task = tokio::spawn(run_feed(feed, signal_rx, updates, command_rx, shutdown_rx));
    Ok(FeedHandle { commands, shutdown_tx, task: Some(task) })
}

pub async fn run_feed(
    mut feed: ChatFeed<SseTransport>,
    mut signals: SignalReceiver,
    updates: mpsc::UnboundedSender<FeedUpdate>,
    mut commands: mpsc::UnboundedReceiver<FeedCommand>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    feed.start(Instant::now());

    'feed: loop {
        let deadline = feed.next_deadline();
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            Some(envelope) = signals.recv() => {
                for update in feed.handle_signal(&envelope, Instant::now()) {
                    if updates.send(update).is_err() {
                        debug!("update receiver dropped");
                        break 'feed;
                    }
                }
            }
            command = commands.recv() => {
                let now = Instant::now();
                match command {
                    None | Some(FeedCommand::Shutdown) => break,
                    Some(FeedCommand::ForceReconnect) => feed.ensure_active(true, now),
                    Some(FeedCommand::MarkSendInFlight) => feed.mark_send_in_flight(),
                    Some(FeedCommand::Clear) => {
                        feed.clear();
                        if updates.send(FeedUpdate::Cleared).is_err() {
                            break;
                        }
                        feed.ensure_active(true, now);
                    }
                }
            }
            _ = sleep_until(deadline) => feed.poll_timers(Instant::now()),
        }
    }

    feed.shutdown();
    signals.close();
    info!("chat feed stopped");
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
