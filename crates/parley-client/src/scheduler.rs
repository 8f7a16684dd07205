//! Periodic background merge.
//!
//! Runs only while a session exists and the app is visible. Becoming
//! visible, gaining focus and signing in each trigger an immediate merge.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::session::SessionManager;
use crate::sync::SyncEngine;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

struct Timer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct SchedulerState {
    visible: bool,
    timer: Option<Timer>,
    follower: Option<JoinHandle<()>>,
}

pub struct AutoSync {
    engine: SyncEngine,
    session: Arc<SessionManager>,
    interval: Duration,
    state: Mutex<SchedulerState>,
}

impl AutoSync {
    pub fn new(engine: SyncEngine, interval: Duration) -> Arc<Self> {
        let session = Arc::clone(engine.session());
        Arc::new(Self {
            engine,
            session,
            interval,
            state: Mutex::new(SchedulerState {
                visible: true,
                timer: None,
                follower: None,
            }),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .timer
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn is_visible(&self) -> bool {
        self.state.lock().visible
    }

    /// Start the periodic timer. Returns whether it is running afterwards.
    pub fn start(&self) -> bool {
        if !self.session.is_signed_in() {
            return false;
        }
        let mut state = self.state.lock();
        if !state.visible {
            return false;
        }
        if state.timer.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return true;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_timer(
            self.engine.clone(),
            self.interval,
            cancel.clone(),
        ));
        state.timer = Some(Timer { cancel, handle });
        debug!("Auto-sync started ({:?})", self.interval);
        true
    }

    pub fn stop(&self) {
        if let Some(timer) = self.state.lock().timer.take() {
            timer.cancel.cancel();
            debug!("Auto-sync stopped");
        }
    }

    /// Visible: merge now and start. Hidden: stop.
    pub fn set_visible(&self, visible: bool) {
        self.state.lock().visible = visible;
        if visible {
            self.trigger();
            self.start();
        } else {
            self.stop();
        }
    }

    pub fn on_focus(&self) {
        self.trigger();
    }

    /// Immediate background merge; a no-op when signed out
    pub fn trigger(&self) {
        if self.session.is_signed_in() {
            self.engine.spawn_merge();
        }
    }

    /// Track session changes: signing in starts the timer and merges,
    /// signing out stops it.
    pub fn follow_session(self: &Arc<Self>) {
        let mut rx = self.session.subscribe();
        let this = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                let signed_in = rx.borrow_and_update().is_some();
                let Some(scheduler) = this.upgrade() else {
                    return;
                };
                if signed_in {
                    scheduler.trigger();
                    scheduler.start();
                } else {
                    scheduler.stop();
                }
                drop(scheduler);

                if rx.changed().await.is_err() {
                    return;
                }
            }
        });

        if let Some(previous) = self.state.lock().follower.replace(handle) {
            previous.abort();
        }
    }

    pub fn shutdown(&self) {
        self.stop();
        if let Some(follower) = self.state.lock().follower.take() {
            follower.abort();
        }
    }
}

impl Drop for AutoSync {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(timer) = state.timer.take() {
            timer.cancel.cancel();
        }
        if let Some(follower) = state.follower.take() {
            follower.abort();
        }
    }
}

async fn run_timer(engine: SyncEngine, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                match engine.server_sync_merge().await {
                    Ok(outcome) if outcome.is_skipped() => return,
                    Ok(_) => {}
                    Err(e) if e.is_transport() => {
                        debug!(kind = e.kind(), "Scheduled merge failed: {}", e)
                    }
                    Err(e) => warn!(kind = e.kind(), "Scheduled merge failed: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::local_store::{LocalStore, MemoryBackend};
    use crate::remote::MemoryRemoteStore;
    use parley_core::Session;

    async fn setup(interval: Duration) -> (Arc<AutoSync>, Arc<MemoryRemoteStore>, Arc<SessionManager>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(LocalStore::new(backend.clone()));
        let remote = Arc::new(MemoryRemoteStore::new());
        let api = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let session = Arc::new(SessionManager::new(api, backend));
        let engine = SyncEngine::new(store, remote.clone(), session.clone(), "gpt-5");
        (AutoSync::new(engine, interval), remote, session)
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_does_not_start_signed_out() {
        let (sched, _, _) = setup(DEFAULT_SYNC_INTERVAL).await;
        assert!(!sched.start());
        assert!(!sched.is_running());
    }

    #[tokio::test]
    async fn test_hidden_stops_and_visible_restarts() {
        let (sched, remote, session) = setup(DEFAULT_SYNC_INTERVAL).await;
        session.set_session(Session::new("tok", "curtis")).await.unwrap();

        assert!(sched.start());
        sched.set_visible(false);
        assert!(!sched.is_running());
        assert!(!sched.start());

        sched.set_visible(true);
        assert!(sched.is_running());
        // becoming visible merges right away
        assert!(eventually(|| remote.list_count() >= 1).await);
    }

    #[tokio::test]
    async fn test_timer_merges_periodically() {
        let (sched, remote, session) = setup(Duration::from_millis(20)).await;
        session.set_session(Session::new("tok", "curtis")).await.unwrap();

        sched.start();
        assert!(eventually(|| remote.list_count() >= 3).await);
        sched.stop();
        assert!(!sched.is_running());
    }

    #[tokio::test]
    async fn test_follows_session_changes() {
        let (sched, remote, session) = setup(DEFAULT_SYNC_INTERVAL).await;
        sched.follow_session();
        assert!(!sched.is_running());

        session.set_session(Session::new("tok", "curtis")).await.unwrap();
        assert!(eventually(|| sched.is_running()).await);
        assert!(eventually(|| remote.list_count() >= 1).await);

        session.clear().await.unwrap();
        assert!(eventually(|| !sched.is_running()).await);
        sched.shutdown();
    }

    #[tokio::test]
    async fn test_focus_merges_only_when_signed_in() {
        let (sched, remote, session) = setup(DEFAULT_SYNC_INTERVAL).await;
        sched.on_focus();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(remote.list_count(), 0);

        session.set_session(Session::new("tok", "curtis")).await.unwrap();
        sched.on_focus();
        assert!(eventually(|| remote.list_count() == 1).await);
    }
}
