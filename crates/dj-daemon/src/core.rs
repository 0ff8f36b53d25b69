/// DaemonCore: single-owner event loop for the voting round.
///
/// Socket clients, the HTTP API and the ticker all send `DaemonEvent`s here.
/// DaemonCore owns the `SessionDriver` exclusively, so every tally mutation
/// and every lock happens on this one task.
///
/// At most one `Tick` is ever waiting in the channel.  While a slow playback
/// call holds up the loop the ticker drops its ticks instead of queueing them,
/// so commands never wait behind a backlog of stale polls.
///
/// After each event the driver's view is compared with the last published
/// one; on change it is written to the `StateManager` and
/// `BroadcastMessage::StateUpdated` goes out.  Notices raised while handling
/// the event follow as `BroadcastMessage::Notice`.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dj_proto::config::Config;
use dj_proto::driver::SessionDriver;
use dj_proto::playback::PlaybackService;
use dj_proto::protocol::{Command, SessionView};
use dj_proto::state::StateManager;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::BroadcastMessage;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand(Command),
    /// Poll playback and advance the round.
    Tick,
    /// Shutdown requested.
    Shutdown,
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore {
    config: Config,
    driver: SessionDriver,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    /// Used to feed our own ticker back into the loop.
    event_tx: mpsc::Sender<DaemonEvent>,
    /// Set by the ticker when it queues a `Tick`, cleared when the loop takes it.
    tick_pending: Arc<AtomicBool>,
    /// Last view handed to the state manager (rev ignored).
    last_view: Option<SessionView>,
}

impl DaemonCore {
    pub fn new(
        config: Config,
        service: Arc<dyn PlaybackService>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let driver = SessionDriver::new(
            service,
            config.vote.clone(),
            config.spotify.call_timeouts(),
        );
        Self::with_driver(config, driver, broadcast_tx, event_tx)
    }

    fn with_driver(
        config: Config,
        driver: SessionDriver,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        Self {
            config,
            driver,
            state_manager: Arc::new(StateManager::new()),
            broadcast_tx,
            event_tx,
            tick_pending: Arc::new(AtomicBool::new(false)),
            last_view: None,
        }
    }

    /// Borrow the state manager (for the socket and HTTP servers).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!(
            "DaemonCore: starting event loop (tick every {} ms)",
            self.config.vote.tick_interval_ms
        );

        let ticker = spawn_ticker(
            self.event_tx.clone(),
            self.config.vote.tick_interval(),
            Arc::clone(&self.tick_pending),
        );

        while let Some(evt) = event_rx.recv().await {
            if !self.handle_event(evt).await {
                info!("DaemonCore: shutdown requested");
                break;
            }
        }

        ticker.abort();
        info!("DaemonCore: event loop stopped");
        Ok(())
    }

    /// Apply one event and publish the outcome.  Returns false on shutdown.
    async fn handle_event(&mut self, evt: DaemonEvent) -> bool {
        match evt {
            DaemonEvent::Shutdown => return false,
            DaemonEvent::Tick => {
                // Cleared first so the next interval can queue a fresh tick.
                self.tick_pending.store(false, Ordering::Release);
                self.driver.tick().await;
            }
            DaemonEvent::ClientCommand(cmd) => {
                debug!("DaemonCore: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
        }
        self.publish().await;
        true
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::CastVote { uri } => {
                self.driver.cast_vote(&uri);
            }
            Command::ForceResolve => {
                if !self.driver.force_resolve().await {
                    debug!("DaemonCore: end vote ignored, no open round");
                }
            }
            Command::GetState => {}
        }
    }

    async fn publish(&mut self) {
        let view = self.driver.view();
        if self.last_view.as_ref() != Some(&view) {
            let rev = self.state_manager.publish(view.clone()).await;
            debug!("DaemonCore: published rev {} ({:?})", rev, view.status);
            self.last_view = Some(view);
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
        for notice in self.driver.drain_notices() {
            info!("DaemonCore: notice: {}", notice);
            let _ = self.broadcast_tx.send(BroadcastMessage::Notice(notice));
        }
    }
}

fn spawn_ticker(
    tick_tx: mpsc::Sender<DaemonEvent>,
    period: std::time::Duration,
    pending: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if pending.swap(true, Ordering::AcqRel) {
                continue;
            }
            match tick_tx.try_send(DaemonEvent::Tick) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => pending.store(false, Ordering::Release),
                Err(TrySendError::Closed(_)) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dj_proto::playback::{PlaybackError, PlaylistItem, RawTrack, Snapshot};
    use dj_proto::protocol::{SessionStatus, Track};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Mutex;

    struct StaticPlayback {
        snapshot: Mutex<Option<Snapshot>>,
        enqueued: Mutex<Vec<String>>,
    }

    impl StaticPlayback {
        fn playing(elapsed_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                snapshot: Mutex::new(Some(Snapshot {
                    track: Track {
                        id: "T1".into(),
                        name: "Opening".into(),
                        artist: "Band".into(),
                        album_art: None,
                        duration_ms: 200_000,
                    },
                    elapsed_ms,
                    playlist_ref: Some("P1".into()),
                })),
                enqueued: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PlaybackService for StaticPlayback {
        async fn current_snapshot(&self) -> Result<Option<Snapshot>, PlaybackError> {
            Ok(self.snapshot.lock().unwrap().clone())
        }

        async fn playlist_items(&self, _: &str) -> Result<Vec<PlaylistItem>, PlaybackError> {
            Ok((0..3)
                .map(|i| PlaylistItem {
                    track: Some(RawTrack {
                        uri: format!("spotify:track:c{}", i),
                        name: format!("Choice {}", i),
                        artist: "Band".into(),
                        duration_ms: 150_000,
                        is_playable: Some(true),
                        is_local: false,
                    }),
                })
                .collect())
        }

        async fn enqueue(&self, uri: &str) -> Result<(), PlaybackError> {
            self.enqueued.lock().unwrap().push(uri.to_string());
            Ok(())
        }
    }

    fn core_for(
        playback: &Arc<StaticPlayback>,
    ) -> (DaemonCore, broadcast::Receiver<BroadcastMessage>, mpsc::Receiver<DaemonEvent>) {
        let config = Config::default();
        let driver = SessionDriver::with_rng(
            playback.clone(),
            config.vote.clone(),
            config.spotify.call_timeouts(),
            Box::new(StdRng::seed_from_u64(7)),
        );
        let (broadcast_tx, broadcast_rx) = broadcast::channel(16);
        let (event_tx, event_rx) = mpsc::channel(16);
        (
            DaemonCore::with_driver(config, driver, broadcast_tx, event_tx),
            broadcast_rx,
            event_rx,
        )
    }

    #[tokio::test]
    async fn tick_publishes_open_round() {
        let playback = StaticPlayback::playing(10_000);
        let (mut core, mut rx, _events) = core_for(&playback);
        let state = core.state_manager();

        assert!(core.handle_event(DaemonEvent::Tick).await);

        let view = state.get_state().await;
        assert_eq!(view.rev, 2);
        assert_eq!(view.status, SessionStatus::Open);
        assert_eq!(view.candidates.len(), 3);
        assert!(matches!(rx.try_recv(), Ok(BroadcastMessage::StateUpdated)));
    }

    #[tokio::test]
    async fn unchanged_view_is_not_republished() {
        let playback = StaticPlayback::playing(10_000);
        let (mut core, mut rx, _events) = core_for(&playback);
        let state = core.state_manager();

        core.handle_event(DaemonEvent::Tick).await;
        core.handle_event(DaemonEvent::Tick).await;

        assert_eq!(state.get_state().await.rev, 2);
        assert!(matches!(rx.try_recv(), Ok(BroadcastMessage::StateUpdated)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn votes_and_end_vote_flow_through_the_core() {
        let playback = StaticPlayback::playing(10_000);
        let (mut core, mut rx, _events) = core_for(&playback);
        let state = core.state_manager();
        core.handle_event(DaemonEvent::Tick).await;

        core.handle_event(DaemonEvent::ClientCommand(Command::CastVote {
            uri: "spotify:track:c1".into(),
        }))
        .await;
        let tally = state.get_state().await.tally.unwrap();
        assert_eq!(tally.get("spotify:track:c1"), 1);

        core.handle_event(DaemonEvent::ClientCommand(Command::ForceResolve))
            .await;
        assert_eq!(*playback.enqueued.lock().unwrap(), vec!["spotify:track:c1".to_string()]);
        let view = state.get_state().await;
        assert!(view.locked);
        assert_eq!(view.winner.map(|c| c.uri).as_deref(), Some("spotify:track:c1"));

        let mut notices = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let BroadcastMessage::Notice(n) = msg {
                notices.push(n);
            }
        }
        assert_eq!(notices, vec![dj_proto::driver::NOTICE_QUEUED.to_string()]);
    }

    /// Playing from a playlist whose listing never answers in time.
    struct StalledListing {
        inner: Arc<StaticPlayback>,
        polls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl PlaybackService for StalledListing {
        async fn current_snapshot(&self) -> Result<Option<Snapshot>, PlaybackError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.inner.current_snapshot().await
        }

        async fn playlist_items(&self, _: &str) -> Result<Vec<PlaylistItem>, PlaybackError> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(Vec::new())
        }

        async fn enqueue(&self, uri: &str) -> Result<(), PlaybackError> {
            self.inner.enqueue(uri).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ticks_do_not_pile_up_ahead_of_commands() {
        let playback = Arc::new(StalledListing {
            inner: StaticPlayback::playing(10_000),
            polls: std::sync::atomic::AtomicUsize::new(0),
        });
        let (broadcast_tx, _rx) = broadcast::channel(16);
        let (event_tx, event_rx) = mpsc::channel(256);
        let core = DaemonCore::new(Config::default(), playback.clone(), broadcast_tx, event_tx.clone());
        let handle = tokio::spawn(core.run(event_rx));

        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        // Still ticking, one 3 s listing timeout after another.
        assert!(playback.polls.load(Ordering::SeqCst) >= 10);

        let sent = tokio::time::Instant::now();
        event_tx.send(DaemonEvent::Shutdown).await.unwrap();
        assert!(handle.await.unwrap().is_ok());
        // At most the tick in flight and one pending tick run before shutdown.
        assert!(sent.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let playback = StaticPlayback::playing(10_000);
        let config = Config::default();
        let (broadcast_tx, _rx) = broadcast::channel(16);
        let (event_tx, event_rx) = mpsc::channel(16);
        let core = DaemonCore::new(config, playback, broadcast_tx, event_tx.clone());

        let handle = tokio::spawn(core.run(event_rx));
        event_tx.send(DaemonEvent::Shutdown).await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
