//! Admission controller: the single entry point for request pacing.
//!
//! Composes the per-(class, domain) sliding windows, per-class adaptive
//! spacing, the process-wide circuit breaker and the session monitor into one
//! decision per call. Callers `admit` immediately before an outbound request
//! and `report` its outcome immediately after.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::circuit::CircuitBreaker;
use super::class::{Outcome, RequestClass, WindowKey};
use super::clock::{self, Instant};
use super::config::AdmissionConfig;
use super::delay::DelayState;
use super::error::AdmissionResult;
use super::session::SessionMonitor;
use super::stats::{AdmissionStats, ClassStats, CircuitStats, SessionStats, WindowStats};
use super::window::AdmissionWindow;

/// Receipt for one granted admission.
#[derive(Debug, Clone)]
pub struct Admission {
    pub key: WindowKey,
    /// When the admission was granted.
    pub admitted_at: Instant,
    /// Total time spent blocked inside `admit`.
    pub waited: Duration,
}

/// All mutable admission state, guarded by one lock.
#[derive(Debug)]
struct AdmissionState {
    windows: BTreeMap<WindowKey, AdmissionWindow>,
    delays: BTreeMap<RequestClass, DelayState>,
    circuit: CircuitBreaker,
    session: SessionMonitor,
}

impl AdmissionState {
    fn new(config: &AdmissionConfig) -> Self {
        let delays = RequestClass::ALL
            .into_iter()
            .map(|class| {
                let state = DelayState::new(
                    config.class(class),
                    config.backoff_factor,
                    config.relax_factor,
                );
                (class, state)
            })
            .collect();

        Self {
            windows: BTreeMap::new(),
            delays,
            circuit: CircuitBreaker::new(
                config.circuit_trip_threshold,
                config.circuit_cooldown(),
                config.circuit_reset_window(),
            ),
            session: SessionMonitor::new(
                config.session_max_errors,
                config.session_max_runtime(),
                config.anomaly_rate_per_second,
            ),
        }
    }

    fn window(&mut self, key: &WindowKey, config: &AdmissionConfig) -> &mut AdmissionWindow {
        self.windows.entry(key.clone()).or_insert_with(|| {
            AdmissionWindow::new(
                config.burst_ceiling_for(key),
                config.class(key.class).window_horizon(),
            )
        })
    }

    /// Longest of the gate, spacing and window waits. Waits overlap in time,
    /// so they combine by maximum.
    fn wait_for(&mut self, key: &WindowKey, now: Instant, config: &AdmissionConfig) -> Duration {
        let gate = self.circuit.gate_wait(now);
        let spacing = self
            .delays
            .get(&key.class)
            .map(|d| d.spacing_wait(now))
            .unwrap_or(Duration::ZERO);
        let window = self.window(key, config).check(now, config.max_wait());
        gate.max(spacing).max(window)
    }

    fn reserve(&mut self, key: &WindowKey, now: Instant, config: &AdmissionConfig) {
        self.window(key, config).record(now);
        if let Some(delay) = self.delays.get_mut(&key.class) {
            delay.mark_admitted(now);
        }
        self.session.record_admission(now);
    }
}

/// Adaptive, multi-class, multi-domain admission controller.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AdmissionController {
    config: Arc<AdmissionConfig>,
    state: Arc<Mutex<AdmissionState>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl AdmissionController {
    /// Create a controller with default config.
    pub fn new() -> Self {
        Self::with_config(AdmissionConfig::default())
    }

    /// Create a controller; out-of-range config values are clamped.
    pub fn with_config(config: AdmissionConfig) -> Self {
        let config = config.validated();
        let state = AdmissionState::new(&config);
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
            shutdown: None,
        }
    }

    /// Abort pending waits once `true` is sent on this channel.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Block until a request of `class` to `domain` may fire, then claim it.
    ///
    /// Long waits are slept in segments of at most `max_wait_seconds` and
    /// re-evaluated in between, so shutdown and the runtime ceiling are
    /// checked regularly. State is only mutated once the wait is zero.
    pub async fn admit(&self, class: RequestClass, domain: Option<&str>) -> AdmissionResult<Admission> {
        let key = WindowKey::new(class, domain);
        let mut shutdown = self.shutdown.clone();
        let started = clock::now();

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = clock::now();
                state.session.assert_runtime_budget(now)?;

                let wait = state.wait_for(&key, now, &self.config);
                if wait.is_zero() {
                    state.reserve(&key, now, &self.config);
                    return Ok(Admission {
                        key,
                        admitted_at: now,
                        waited: now.saturating_duration_since(started),
                    });
                }
                wait.min(self.config.max_wait())
            };

            debug!("Admission for {}: waiting {:?}", key, wait);
            clock::sleep(wait, shutdown.as_mut()).await?;
        }
    }

    /// Feed the outcome of an admitted request back into pacing state.
    ///
    /// Returns the fatal session error when this report crosses the error ceiling.
    pub async fn report(
        &self,
        class: RequestClass,
        domain: Option<&str>,
        outcome: Outcome,
    ) -> AdmissionResult<()> {
        let key = WindowKey::new(class, domain);
        let mut state = self.state.lock().await;
        let now = clock::now();

        if let Some(delay) = state.delays.get_mut(&class) {
            let changed = delay.report_outcome(outcome);
            match outcome {
                Outcome::RateLimited => warn!(
                    "Rate limited on {}, backing off to {:?}",
                    key, delay.spacing
                ),
                Outcome::Success if changed && !delay.in_backoff() => {
                    info!("{} recovered from rate limit backoff", class)
                }
                Outcome::Success if changed => {
                    debug!("{} spacing reduced to {:?}", class, delay.spacing)
                }
                _ => {}
            }
        }

        match outcome {
            Outcome::RateLimited => {
                state.circuit.record_rejection(now);
            }
            Outcome::Success => state.circuit.record_success(),
            Outcome::Error => {
                debug!("Request error on {}", key);
                state.session.record_error()?;
            }
        }
        Ok(())
    }

    pub async fn start_phase(&self, name: &str) {
        self.state.lock().await.session.start_phase(name, clock::now());
    }

    /// Stop timing a named phase, logging and returning its duration.
    pub async fn finish_phase(&self, name: &str) -> Option<Duration> {
        let elapsed = self
            .state
            .lock()
            .await
            .session
            .finish_phase(name, clock::now());
        if let Some(elapsed) = elapsed {
            info!("{} finished in {:?}", name, elapsed);
        }
        elapsed
    }

    /// Snapshot of all pacing state.
    pub async fn stats(&self) -> AdmissionStats {
        let state = self.state.lock().await;
        let now = clock::now();
        let remaining_cooldown = state.circuit.remaining_cooldown(now);

        let classes = state
            .delays
            .iter()
            .map(|(class, delay)| ClassStats {
                class: *class,
                spacing_seconds: delay.spacing.as_secs_f64(),
                floor_seconds: delay.floor.as_secs_f64(),
                ceiling_seconds: delay.ceiling.as_secs_f64(),
                in_backoff: delay.in_backoff(),
                admissions: delay.admissions,
                rejections: delay.rejections,
            })
            .collect();

        let windows = state
            .windows
            .iter()
            .map(|(key, window)| WindowStats {
                class: key.class,
                domain: key.domain.clone(),
                recent: window.occupancy(now),
                ceiling: window.ceiling(),
                horizon_seconds: window.horizon().as_secs_f64(),
            })
            .collect();

        let circuit = CircuitStats {
            tripped: !remaining_cooldown.is_zero(),
            consecutive_rejections: state.circuit.consecutive_rejections(),
            threshold: state.circuit.threshold(),
            trips: state.circuit.trips(),
            remaining_cooldown_seconds: remaining_cooldown.as_secs_f64(),
        };

        let session = SessionStats {
            started_at: state.session.started_at(),
            elapsed_seconds: state.session.elapsed(now).as_secs_f64(),
            admissions: state.session.admissions(),
            errors: state.session.errors(),
            max_errors: state.session.max_errors(),
            max_runtime_hours: state.session.max_runtime().as_secs_f64() / 3600.0,
            halted: state.session.tripped().map(|r| r.to_string()),
        };

        AdmissionStats {
            classes,
            windows,
            circuit,
            session,
        }
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new()
    }
}
