//! ==============================================================================
//! poll.rs - poll controller and session lifecycle
//! ==============================================================================
//!
//! purpose:
//!     owns the Idle/Polling state machine. a running test is a PollSession
//!     that owns exactly two timer tasks:
//!     - the ticker: fetch-and-record immediately, then every interval
//!     - the auto-stop: fires once after the test duration
//!     dropping or stopping the session aborts both, so the "handles exist
//!     iff polling" invariant is held by ownership rather than by bookkeeping.
//!
//! state machine:
//!     - start() while Polling is rejected (AlreadyPolling); timers never stack.
//!     - duration elapsed always exports; a manual stop exports only when the
//!       on_manual_stop policy is set and a session was actually running.
//!     - every transition to Idle persists the store snapshot (best effort).
//!     - reconfigure() with the settings already in effect changes nothing;
//!       the running test keeps its timers and its original deadline.
//!
//! ```text
//!     ┌──────┐   start()            ┌─────────┐
//!     │ Idle │ ───────────────────▶ │ Polling │ ──┐ reconfigure():
//!     └──────┘ ◀─────────────────── └─────────┘ ◀─┘ new timers, still Polling
//!               stop() / duration elapsed
//! ```
//!
//! tick semantics:
//!     each tick dispatches its fetch as its own task. ticks are not
//!     serialized: a slow sensor can make fetches overlap and complete out of
//!     order. stopping aborts the timers only, so a fetch already in flight
//!     may still land in the store afterwards. a failed fetch is logged and
//!     skipped; the session keeps going.
//!
//! end of session:
//!     the spreadsheet export and snapshot write are plain file io. they run
//!     on the blocking pool and stop() waits for them, so a caller that sees
//!     stop() return also sees the files on disk.
//!
//! relationships:
//!     - uses: sensor.rs (LuxSource), store.rs, export.rs (ExportSink), persist.rs
//!     - used by: server.rs (api), main.rs
//!
//! ==============================================================================

use crate::domain::{Reading, RecordedReading};
use crate::error::{ConfigError, FetchError};
use crate::export::ExportSink;
use crate::persist::SnapshotPersistence;
use crate::sensor::LuxSource;
use crate::store::ReadingStore;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ==============================================================================
// settings
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSettings {
    /// sensor host or host:port
    pub address: String,
    /// >= 1
    pub interval_seconds: u64,
    /// >= 0.1
    pub duration_minutes: f64,
}

impl PollSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::invalid("address", "must not be empty"));
        }
        if self.interval_seconds < 1 {
            return Err(ConfigError::invalid("interval_seconds", "must be at least 1"));
        }
        if !self.duration_minutes.is_finite() || self.duration_minutes < 0.1 {
            return Err(ConfigError::invalid(
                "duration_minutes",
                format!("must be at least 0.1 (got {})", self.duration_minutes),
            ));
        }
        if Duration::try_from_secs_f64(self.duration_minutes * 60.0).is_err() {
            return Err(ConfigError::invalid("duration_minutes", "too large"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_minutes * 60.0)
    }
}

// ==============================================================================
// state / outcomes
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    Idle,
    Polling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyPolling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Manual,
    DurationElapsed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollStatus {
    pub state: PollState,
    pub settings: PollSettings,
}

/// end-of-session collaborators
#[derive(Clone, Default)]
pub struct ControllerOptions {
    pub exporter: Option<Arc<dyn ExportSink>>,
    pub export_on_manual_stop: bool,
    pub persistence: Option<SnapshotPersistence>,
}

// ==============================================================================
// session - owns the two timer tasks
// ==============================================================================

struct PollSession {
    id: u64,
    ticker: JoinHandle<()>,
    auto_stop: Option<JoinHandle<()>>,
}

impl PollSession {
    /// idempotent
    fn stop(&mut self) {
        self.ticker.abort();
        if let Some(handle) = self.auto_stop.take() {
            handle.abort();
        }
    }

    /// called from inside the auto-stop task: let it run to completion
    fn release_auto_stop(&mut self) {
        self.auto_stop.take();
    }
}

impl Drop for PollSession {
    fn drop(&mut self) {
        self.stop();
    }
}

// ==============================================================================
// controller
// ==============================================================================

struct Inner {
    source: Arc<dyn LuxSource>,
    store: ReadingStore,
    options: ControllerOptions,
    settings: Mutex<PollSettings>,
    session: Mutex<Option<PollSession>>,
    next_session_id: AtomicU64,
}

impl Inner {
    /// auto-stop fired; only ends the session it was scheduled for
    async fn expire(self: Arc<Self>, session_id: u64) {
        let session = {
            let mut slot = self.session.lock();
            let current = slot.as_ref().is_some_and(|s| s.id == session_id);
            if current {
                slot.take()
            } else {
                None
            }
        };
        if let Some(mut session) = session {
            session.release_auto_stop();
            drop(session);
            tracing::info!("[POLL] test duration elapsed - stopping");
            self.finish(StopReason::DurationElapsed).await;
        }
    }

    async fn finish(self: Arc<Self>, reason: StopReason) {
        if let Err(e) = tokio::task::spawn_blocking(move || self.write_out(reason)).await {
            tracing::warn!("[POLL] ⚠ end-of-session write did not complete: {}", e);
        }
    }

    /// export (per policy) and persist; blocking file io
    fn write_out(&self, reason: StopReason) {
        let export = match reason {
            StopReason::DurationElapsed => true,
            StopReason::Manual => self.options.export_on_manual_stop,
        };
        if export {
            if let Some(exporter) = &self.options.exporter {
                let readings: Vec<Reading> = self.store.snapshot().readings.into_iter().map(|(_, r)| r).collect();
                exporter.export(&readings);
            }
        }
        if let Some(persistence) = &self.options.persistence {
            persistence.persist(&self.store);
        }
    }
}

/// clone-able handle to the shared poll state
#[derive(Clone)]
pub struct PollController {
    inner: Arc<Inner>,
}

impl PollController {
    pub fn new(
        source: Arc<dyn LuxSource>,
        store: ReadingStore,
        settings: PollSettings,
        options: ControllerOptions,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                source,
                store,
                options,
                settings: Mutex::new(settings),
                session: Mutex::new(None),
                next_session_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn store(&self) -> &ReadingStore {
        &self.inner.store
    }

    pub fn state(&self) -> PollState {
        if self.inner.session.lock().is_some() {
            PollState::Polling
        } else {
            PollState::Idle
        }
    }

    pub fn is_polling(&self) -> bool {
        self.state() == PollState::Polling
    }

    pub fn settings(&self) -> PollSettings {
        self.inner.settings.lock().clone()
    }

    pub fn status(&self) -> PollStatus {
        PollStatus { state: self.state(), settings: self.settings() }
    }

    /// Idle -> Polling. must be called from within a tokio runtime.
    pub fn start(&self) -> StartOutcome {
        let mut slot = self.inner.session.lock();
        if slot.is_some() {
            tracing::debug!("[POLL] start ignored - already polling");
            return StartOutcome::AlreadyPolling;
        }
        let settings = self.settings();
        tracing::info!(
            "[POLL] starting test: {} every {}s for {} min",
            settings.address,
            settings.interval_seconds,
            settings.duration_minutes
        );
        *slot = Some(self.spawn_session(&settings));
        StartOutcome::Started
    }

    /// Polling -> Idle. returns whether a session was running.
    pub async fn stop(&self) -> bool {
        let session = self.inner.session.lock().take();
        match session {
            Some(session) => {
                drop(session);
                tracing::info!("[POLL] test stopped");
                self.inner.clone().finish(StopReason::Manual).await;
                true
            }
            None => false,
        }
    }

    /// cancel any running session without exporting (owner teardown)
    pub fn shutdown(&self) {
        if self.inner.session.lock().take().is_some() {
            tracing::info!("[POLL] session cancelled on shutdown");
        }
    }

    /// replace settings; a running session restarts its timers with them.
    /// the settings already in effect are a no-op, even while polling.
    pub fn reconfigure(&self, settings: PollSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        {
            let mut current = self.inner.settings.lock();
            if *current == settings {
                tracing::debug!("[POLL] reconfigure ignored - settings unchanged");
                return Ok(());
            }
            *current = settings.clone();
        }

        let mut slot = self.inner.session.lock();
        if slot.is_some() {
            tracing::info!(
                "[POLL] reconfigured while polling: {} every {}s for {} min",
                settings.address,
                settings.interval_seconds,
                settings.duration_minutes
            );
            // old session dropped here, aborting its timers
            *slot = Some(self.spawn_session(&settings));
        }
        Ok(())
    }

    /// one manual fetch-and-record, independent of session state
    pub async fn fetch_once(&self) -> Result<RecordedReading, FetchError> {
        let address = self.inner.settings.lock().address.clone();
        match self.inner.source.fetch_reading(&address).await {
            Ok(recorded) => {
                self.inner.store.add_reading(recorded.id.clone(), recorded.reading.clone());
                Ok(recorded)
            }
            Err(e) => {
                tracing::warn!("[POLL] ⚠ manual fetch failed: {}", e);
                Err(e)
            }
        }
    }

    fn spawn_session(&self, settings: &PollSettings) -> PollSession {
        let id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);

        let ticker = tokio::spawn(run_ticks(
            self.inner.source.clone(),
            self.inner.store.clone(),
            settings.address.clone(),
            settings.interval(),
        ));

        // weak: the task must not keep the controller (and so itself) alive
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let duration = settings.duration();
        let auto_stop = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(id).await;
            }
        });

        PollSession { id, ticker, auto_stop: Some(auto_stop) }
    }
}

async fn run_ticks(source: Arc<dyn LuxSource>, store: ReadingStore, address: String, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        // first tick completes immediately: the start-of-test fetch
        interval.tick().await;
        tokio::spawn(record_tick(source.clone(), store.clone(), address.clone()));
    }
}

async fn record_tick(source: Arc<dyn LuxSource>, store: ReadingStore, address: String) {
    match source.fetch_reading(&address).await {
        Ok(recorded) => store.add_reading(recorded.id, recorded.reading),
        Err(e) if e.is_network() => tracing::warn!("[POLL] ⚠ sensor unreachable: {}", e),
        Err(e) => tracing::warn!("[POLL] ⚠ bad sensor response: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// counts calls; fails every call when `fail` is set
    #[derive(Default)]
    struct FakeSource {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl LuxSource for FakeSource {
        async fn fetch_reading(&self, _address: &str) -> Result<RecordedReading, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(FetchError::Status(500))
            } else {
                Ok(RecordedReading::fresh(n as f64))
            }
        }
    }

    #[derive(Default)]
    struct RecordingExporter {
        exports: Mutex<Vec<usize>>,
    }

    impl ExportSink for RecordingExporter {
        fn export(&self, readings: &[Reading]) {
            self.exports.lock().push(readings.len());
        }
    }

    fn settings(interval_seconds: u64, duration_minutes: f64) -> PollSettings {
        PollSettings { address: "sensor.test".into(), interval_seconds, duration_minutes }
    }

    fn controller(
        source: Arc<FakeSource>,
        settings: PollSettings,
        exporter: Arc<RecordingExporter>,
        export_on_manual_stop: bool,
    ) -> PollController {
        let options = ControllerOptions {
            exporter: Some(exporter),
            export_on_manual_stop,
            persistence: None,
        };
        PollController::new(source, ReadingStore::new(), settings, options).unwrap()
    }

    async fn advance(secs: f64) {
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }

    #[test]
    fn settings_validation_bounds() {
        assert!(settings(1, 0.1).validate().is_ok());
        assert!(settings(0, 1.0).validate().is_err());
        assert!(settings(1, 0.09).validate().is_err());
        assert!(settings(1, f64::NAN).validate().is_err());
        assert!(settings(1, 1e300).validate().is_err());
        assert!(PollSettings { address: " ".into(), ..settings(1, 1.0) }.validate().is_err());
        assert_eq!(settings(1, 0.1).duration(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn six_second_test_records_six_or_seven_fetches() {
        let source = Arc::new(FakeSource::default());
        let exporter = Arc::new(RecordingExporter::default());
        let ctl = controller(source.clone(), settings(1, 0.1), exporter.clone(), false);

        assert_eq!(ctl.start(), StartOutcome::Started);
        assert_eq!(ctl.state(), PollState::Polling);
        advance(10.0).await;

        assert_eq!(ctl.state(), PollState::Idle);
        let calls = source.calls.load(Ordering::SeqCst);
        assert!((6..=7).contains(&calls), "got {} fetches", calls);
        assert_eq!(ctl.store().len(), calls);
        // duration elapsed always exports, whatever the manual-stop policy
        assert_eq!(exporter.exports.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_fetch_keeps_polling_and_store_unchanged() {
        let source = Arc::new(FakeSource { fail: true, ..Default::default() });
        let ctl = controller(source.clone(), settings(1, 5.0), Arc::default(), false);

        ctl.start();
        advance(3.5).await;

        assert!(source.calls.load(Ordering::SeqCst) >= 3);
        assert!(ctl.store().is_empty());
        assert_eq!(ctl.state(), PollState::Polling);
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_both_timers() {
        let source = Arc::new(FakeSource::default());
        let exporter = Arc::new(RecordingExporter::default());
        let ctl = controller(source.clone(), settings(1, 0.5), exporter.clone(), false);

        ctl.start();
        advance(2.5).await;
        assert!(ctl.stop().await);
        let calls_at_stop = source.calls.load(Ordering::SeqCst);
        let len_at_stop = ctl.store().len();
        assert_eq!(calls_at_stop, 3);

        // well past both the next tick and the 30s auto-stop
        advance(60.0).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), calls_at_stop);
        assert_eq!(ctl.store().len(), len_at_stop);
        // auto-stop never fired, and the manual stop did not export
        assert!(exporter.exports.lock().is_empty());
        assert!(!ctl.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_stop_exports_when_policy_set() {
        let exporter = Arc::new(RecordingExporter::default());
        let ctl = controller(Arc::default(), settings(1, 1.0), exporter.clone(), true);

        // stopping while idle is not an export trigger
        assert!(!ctl.stop().await);
        assert!(exporter.exports.lock().is_empty());

        ctl.start();
        advance(1.5).await;
        assert!(ctl.stop().await);
        assert_eq!(*exporter.exports.lock(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_polling_does_not_stack_timers() {
        let source = Arc::new(FakeSource::default());
        let ctl = controller(source.clone(), settings(1, 1.0), Arc::default(), false);

        assert_eq!(ctl.start(), StartOutcome::Started);
        assert_eq!(ctl.start(), StartOutcome::AlreadyPolling);
        advance(2.5).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_restarts_timers_and_stays_polling() {
        let source = Arc::new(FakeSource::default());
        let exporter = Arc::new(RecordingExporter::default());
        let ctl = controller(source.clone(), settings(1, 0.1), exporter.clone(), false);

        ctl.start();
        advance(4.5).await; // fetches at 0..=4
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);

        // slower ticks, full fresh duration; immediate fetch again
        ctl.reconfigure(settings(2, 0.1)).unwrap();
        assert_eq!(ctl.state(), PollState::Polling);
        advance(3.0).await; // old 6s auto-stop would have fired by now
        assert_eq!(ctl.state(), PollState::Polling);
        assert!(exporter.exports.lock().is_empty());

        advance(5.0).await;
        assert_eq!(ctl.state(), PollState::Idle);
        // 5 + ticks at 0, 2, 4 (and maybe 6) after reconfigure
        let calls = source.calls.load(Ordering::SeqCst);
        assert!((8..=9).contains(&calls), "got {} fetches", calls);
        assert_eq!(exporter.exports.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_settings_keep_the_original_deadline() {
        let source = Arc::new(FakeSource::default());
        let exporter = Arc::new(RecordingExporter::default());
        let ctl = controller(source.clone(), settings(1, 0.1), exporter.clone(), false);

        ctl.start();
        advance(4.5).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);

        // what the dashboard sends when Apply is pressed without edits
        ctl.reconfigure(settings(1, 0.1)).unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
        assert_eq!(ctl.state(), PollState::Polling);

        advance(2.0).await; // past the 6s deadline set at start
        assert_eq!(ctl.state(), PollState::Idle);
        let calls = source.calls.load(Ordering::SeqCst);
        assert!((6..=7).contains(&calls), "got {} fetches", calls);
        assert_eq!(exporter.exports.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconfigure_while_idle_only_updates_settings() {
        let source = Arc::new(FakeSource::default());
        let ctl = controller(source.clone(), settings(1, 1.0), Arc::default(), false);

        ctl.reconfigure(settings(5, 2.0)).unwrap();
        assert_eq!(ctl.state(), PollState::Idle);
        assert_eq!(ctl.settings().interval_seconds, 5);
        assert!(ctl.reconfigure(settings(0, 2.0)).is_err());
        assert_eq!(ctl.settings().interval_seconds, 5);

        advance(10.0).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_controller_cancels_session() {
        let source = Arc::new(FakeSource::default());
        let ctl = controller(source.clone(), settings(1, 1.0), Arc::default(), false);

        ctl.start();
        advance(1.5).await;
        drop(ctl);
        let calls = source.calls.load(Ordering::SeqCst);
        advance(10.0).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_without_export() {
        let exporter = Arc::new(RecordingExporter::default());
        let ctl = controller(Arc::default(), settings(1, 1.0), exporter.clone(), true);

        ctl.start();
        advance(1.5).await;
        ctl.shutdown();
        assert_eq!(ctl.state(), PollState::Idle);
        assert!(exporter.exports.lock().is_empty());
    }

    #[tokio::test]
    async fn fetch_once_records_and_reports_failure() {
        let ok = controller(Arc::default(), settings(1, 1.0), Arc::default(), false);
        let recorded = ok.fetch_once().await.unwrap();
        assert_eq!(ok.store().get(&recorded.id), Some(recorded.reading));
        assert_eq!(ok.state(), PollState::Idle);

        let failing = Arc::new(FakeSource { fail: true, ..Default::default() });
        let bad = controller(failing, settings(1, 1.0), Arc::default(), false);
        assert!(matches!(bad.fetch_once().await, Err(FetchError::Status(500))));
        assert!(bad.store().is_empty());
    }
}
