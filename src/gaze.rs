use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{GazeError, InitError};

/// Time the estimator is given to settle after `begin` before we call it ready.
pub const DEFAULT_WARMUP_MS: u64 = 3000;

/// One estimate of where the user is looking, in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GazeSample {
    pub x: f64,
    pub y: f64,
    pub timestamp_ms: u64,
}

impl GazeSample {
    pub fn new(x: f64, y: f64, timestamp_ms: u64) -> Self {
        Self { x, y, timestamp_ms }
    }

    /// (0, 0) is the "nothing received yet" sentinel, not the top-left corner.
    pub fn has_data(&self) -> bool {
        !(self.x == 0.0 && self.y == 0.0)
    }
}

/// The external gaze-estimation capability. Only this shape is relied upon.
pub trait GazeCapability {
    /// Start the estimator. Samples are delivered on the returned channel.
    fn begin(&mut self) -> Result<Receiver<GazeSample>, InitError>;
    /// Tell the estimator the subject is fixating at this screen coordinate.
    fn record_screen_position(&mut self, x: f64, y: f64) -> Result<(), GazeError>;
    fn pause(&mut self);
    fn resume(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Idle,
    Initializing { ready_at_ms: u64 },
    Ready,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Pending { ready_at_ms: u64 },
    Ready,
}

type Observer = Box<dyn FnMut(&GazeSample) + Send>;

/// Owns the capability's lifecycle and the latest gaze sample.
pub struct GazeProvider<C: GazeCapability> {
    capability: C,
    state: ProviderState,
    samples: Option<Receiver<GazeSample>>,
    current: GazeSample,
    observer: Option<Observer>,
    warmup_ms: u64,
    gaze_dot_visible: bool,
    gaze_dot: Option<(f64, f64)>,
    calibrated: bool,
    calibration_samples: usize,
    calibration_failures: usize,
}

impl<C: GazeCapability> fmt::Debug for GazeProvider<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GazeProvider")
            .field("state", &self.state)
            .field("current", &self.current)
            .field("gaze_dot_visible", &self.gaze_dot_visible)
            .field("calibrated", &self.calibrated)
            .field("calibration_samples", &self.calibration_samples)
            .finish_non_exhaustive()
    }
}

impl<C: GazeCapability> GazeProvider<C> {
    pub fn new(capability: C) -> Self {
        Self::with_warmup(capability, DEFAULT_WARMUP_MS)
    }

    pub fn with_warmup(capability: C, warmup_ms: u64) -> Self {
        Self {
            capability,
            state: ProviderState::Idle,
            samples: None,
            current: GazeSample::default(),
            observer: None,
            warmup_ms,
            gaze_dot_visible: false,
            gaze_dot: None,
            calibrated: false,
            calibration_samples: 0,
            calibration_failures: 0,
        }
    }

    pub fn state(&self) -> ProviderState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ProviderState::Ready
    }

    /// Start the capability and the warm-up window.
    ///
    /// Idempotent: while initializing the same deadline is returned, and once ready
    /// (or paused) this reports `Ready` without touching the capability. A failure
    /// leaves the provider idle so the caller can retry.
    pub fn initialize(&mut self, now_ms: u64) -> Result<Readiness, InitError> {
        match self.state {
            ProviderState::Initializing { ready_at_ms } => {
                return Ok(Readiness::Pending { ready_at_ms })
            }
            ProviderState::Ready | ProviderState::Paused => return Ok(Readiness::Ready),
            ProviderState::Idle => {}
        }

        let rx = self.capability.begin().map_err(|e| {
            warn!(error = %e, "gaze capability failed to start");
            e
        })?;
        self.samples = Some(rx);

        let ready_at_ms = now_ms.saturating_add(self.warmup_ms);
        self.state = ProviderState::Initializing { ready_at_ms };
        debug!(ready_at_ms, "gaze capability started, warming up");
        Ok(Readiness::Pending { ready_at_ms })
    }

    /// Finish the warm-up once its deadline has passed. Returns whether we are ready.
    pub fn poll_ready(&mut self, now_ms: u64) -> bool {
        if let ProviderState::Initializing { ready_at_ms } = self.state {
            if now_ms >= ready_at_ms {
                self.state = ProviderState::Ready;
                info!("gaze tracking ready");
            }
        }
        self.is_ready()
    }

    /// Feed one labeled fixation to the estimator. Failures are logged, not surfaced.
    pub fn record_calibration_sample(&mut self, screen_x: f64, screen_y: f64) {
        match self.capability.record_screen_position(screen_x, screen_y) {
            Ok(()) => self.calibration_samples += 1,
            Err(e) => {
                self.calibration_failures += 1;
                warn!(error = %e, "calibration sample dropped");
            }
        }
    }

    pub fn calibration_samples(&self) -> usize {
        self.calibration_samples
    }

    pub fn calibration_failures(&self) -> usize {
        self.calibration_failures
    }

    pub fn mark_calibrated(&mut self) {
        self.calibrated = true;
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn current_sample(&self) -> GazeSample {
        self.current
    }

    /// Register the single observer notified on every new sample, replacing any previous one.
    pub fn set_observer<F>(&mut self, observer: F)
    where
        F: FnMut(&GazeSample) + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    /// Drain samples delivered by the capability. Returns how many were accepted.
    pub fn pump(&mut self) -> usize {
        let Some(rx) = self.samples.as_ref() else {
            return 0;
        };
        let accepting = matches!(
            self.state,
            ProviderState::Ready | ProviderState::Initializing { .. }
        );

        let mut accepted = 0;
        loop {
            match rx.try_recv() {
                Ok(sample) => {
                    if !accepting {
                        continue;
                    }
                    self.current = sample;
                    if sample.has_data() {
                        self.gaze_dot = Some((sample.x, sample.y));
                    }
                    if let Some(observer) = self.observer.as_mut() {
                        observer(&sample);
                    }
                    accepted += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("gaze sample stream closed");
                    self.samples = None;
                    break;
                }
            }
        }
        accepted
    }

    /// Stop the capability, keeping its trained state. A no-op unless ready.
    pub fn pause(&mut self) {
        if self.state == ProviderState::Ready {
            self.capability.pause();
            self.state = ProviderState::Paused;
            debug!("gaze tracking paused");
        }
    }

    /// Restart a paused capability. A no-op if it was never initialized.
    pub fn resume(&mut self) {
        if self.state == ProviderState::Paused {
            self.capability.resume();
            self.state = ProviderState::Ready;
            debug!("gaze tracking resumed");
        }
    }

    /// Pause and hide the gaze indicator.
    pub fn release(&mut self) {
        self.pause();
        self.hide_gaze_dot();
    }

    pub fn show_gaze_dot(&mut self) {
        self.gaze_dot_visible = true;
    }

    pub fn hide_gaze_dot(&mut self) {
        self.gaze_dot_visible = false;
    }

    pub fn gaze_dot_visible(&self) -> bool {
        self.gaze_dot_visible
    }

    /// Where the indicator should be drawn, if it is visible and we have data.
    pub fn gaze_dot(&self) -> Option<(f64, f64)> {
        if self.gaze_dot_visible {
            self.gaze_dot
        } else {
            None
        }
    }

    pub fn capability(&self) -> &C {
        &self.capability
    }
}

/// Handle used to push samples into a [`ChannelGaze`].
///
/// The terminal front end pushes pointer positions through it; tests push scripted gaze.
#[derive(Debug, Clone)]
pub struct GazeFeed {
    tx: Sender<GazeSample>,
    running: Arc<AtomicBool>,
    recorded: Arc<Mutex<Vec<(f64, f64)>>>,
}

impl GazeFeed {
    /// Deliver a sample. Dropped (returns false) while the capability is not running.
    pub fn push(&self, x: f64, y: f64, timestamp_ms: u64) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.tx.send(GazeSample::new(x, y, timestamp_ms)).is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Screen positions the estimator has been trained with so far.
    pub fn recorded_positions(&self) -> Vec<(f64, f64)> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Capability whose samples come from a [`GazeFeed`] rather than a camera.
#[derive(Debug)]
pub struct ChannelGaze {
    feed: GazeFeed,
    rx: Option<Receiver<GazeSample>>,
    next_begin_error: Option<InitError>,
}

impl Default for ChannelGaze {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelGaze {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            feed: GazeFeed {
                tx,
                running: Arc::new(AtomicBool::new(false)),
                recorded: Arc::new(Mutex::new(Vec::new())),
            },
            rx: Some(rx),
            next_begin_error: None,
        }
    }

    /// Make the next `begin` fail with `error`; later attempts succeed.
    pub fn with_begin_failure(mut self, error: InitError) -> Self {
        self.next_begin_error = Some(error);
        self
    }

    pub fn feed(&self) -> GazeFeed {
        self.feed.clone()
    }
}

impl GazeCapability for ChannelGaze {
    fn begin(&mut self) -> Result<Receiver<GazeSample>, InitError> {
        if let Some(e) = self.next_begin_error.take() {
            return Err(e);
        }
        let rx = self
            .rx
            .take()
            .ok_or_else(|| InitError::CapabilityUnavailable("already started".into()))?;
        self.feed.running.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    fn record_screen_position(&mut self, x: f64, y: f64) -> Result<(), GazeError> {
        if !self.feed.is_running() {
            return Err(GazeError::NotRunning);
        }
        self.feed
            .recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((x, y));
        Ok(())
    }

    fn pause(&mut self) {
        self.feed.running.store(false, Ordering::SeqCst);
    }

    fn resume(&mut self) {
        self.feed.running.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicUsize;

    fn ready_provider() -> (GazeProvider<ChannelGaze>, GazeFeed) {
        let gaze = ChannelGaze::new();
        let feed = gaze.feed();
        let mut provider = GazeProvider::new(gaze);
        provider.initialize(0).unwrap();
        assert!(provider.poll_ready(DEFAULT_WARMUP_MS));
        (provider, feed)
    }

    #[test]
    fn sentinel_sample_has_no_data() {
        assert!(!GazeSample::default().has_data());
        assert!(GazeSample::new(0.0, 5.0, 0).has_data());
        assert!(GazeSample::new(3.0, 0.0, 0).has_data());
    }

    #[test]
    fn initialize_enforces_warmup() {
        let mut provider = GazeProvider::new(ChannelGaze::new());
        assert_eq!(provider.state(), ProviderState::Idle);

        let r = provider.initialize(1_000).unwrap();
        assert_eq!(r, Readiness::Pending { ready_at_ms: 4_000 });
        assert!(!provider.poll_ready(3_999));
        assert!(provider.poll_ready(4_000));
        assert_eq!(provider.state(), ProviderState::Ready);
    }

    #[test]
    fn initialize_is_idempotent() {
        let mut provider = GazeProvider::new(ChannelGaze::new());
        let first = provider.initialize(0).unwrap();
        let second = provider.initialize(500).unwrap();
        assert_eq!(first, second);

        provider.poll_ready(DEFAULT_WARMUP_MS);
        assert_eq!(provider.initialize(9_000).unwrap(), Readiness::Ready);
    }

    #[test]
    fn failed_initialize_can_be_retried() {
        let gaze = ChannelGaze::new().with_begin_failure(InitError::PermissionDenied);
        let mut provider = GazeProvider::new(gaze);

        assert_matches!(provider.initialize(0), Err(InitError::PermissionDenied));
        assert_eq!(provider.state(), ProviderState::Idle);
        assert_matches!(provider.initialize(10), Ok(Readiness::Pending { .. }));
    }

    #[test]
    fn pump_updates_current_sample() {
        let (mut provider, feed) = ready_provider();
        assert!(!provider.current_sample().has_data());

        feed.push(10.0, 20.0, 1);
        feed.push(30.0, 40.0, 2);
        assert_eq!(provider.pump(), 2);
        assert_eq!(provider.current_sample(), GazeSample::new(30.0, 40.0, 2));
    }

    #[test]
    fn observer_sees_every_sample() {
        let (mut provider, feed) = ready_provider();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        provider.set_observer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        feed.push(1.0, 1.0, 1);
        feed.push(2.0, 2.0, 2);
        provider.pump();
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        provider.clear_observer();
        feed.push(3.0, 3.0, 3);
        provider.pump();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn pause_before_ready_is_noop() {
        let gaze = ChannelGaze::new();
        let feed = gaze.feed();
        let mut provider = GazeProvider::new(gaze);
        provider.initialize(0).unwrap();

        provider.pause();
        assert_matches!(provider.state(), ProviderState::Initializing { .. });
        assert!(feed.is_running());
    }

    #[test]
    fn resume_without_initialize_is_noop() {
        let gaze = ChannelGaze::new();
        let feed = gaze.feed();
        let mut provider = GazeProvider::new(gaze);
        provider.resume();
        assert_eq!(provider.state(), ProviderState::Idle);
        assert!(!feed.is_running());
    }

    #[test]
    fn pause_and_resume_keep_calibration() {
        let (mut provider, feed) = ready_provider();
        provider.record_calibration_sample(100.0, 100.0);
        provider.mark_calibrated();

        provider.pause();
        assert_eq!(provider.state(), ProviderState::Paused);
        assert!(!feed.push(5.0, 5.0, 1));

        provider.resume();
        assert!(provider.is_ready());
        assert!(provider.is_calibrated());
        assert_eq!(feed.recorded_positions(), vec![(100.0, 100.0)]);
    }

    #[test]
    fn calibration_failures_are_counted_not_raised() {
        let mut provider = GazeProvider::new(ChannelGaze::new());
        // capability never started
        provider.record_calibration_sample(1.0, 1.0);
        assert_eq!(provider.calibration_samples(), 0);
        assert_eq!(provider.calibration_failures(), 1);
    }

    #[test]
    fn release_hides_gaze_dot() {
        let (mut provider, feed) = ready_provider();
        provider.show_gaze_dot();
        feed.push(50.0, 60.0, 1);
        provider.pump();
        assert_eq!(provider.gaze_dot(), Some((50.0, 60.0)));

        provider.release();
        assert!(!provider.gaze_dot_visible());
        assert_eq!(provider.gaze_dot(), None);
        assert_eq!(provider.state(), ProviderState::Paused);
    }
}
