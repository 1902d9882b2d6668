//! Delivery state machine
//!
//! Nine states plus a terminal emergency stop drive the whole delivery
//! cycle. The machine is ticked at 10 Hz by the main loop and never
//! blocks: navigation, box ramps, QR verification and the loading
//! confirmation all run on worker tasks and report through single-shot
//! completion values polled here. Errors raised by handlers are routed to
//! one central classifier; nothing below this layer decides final policy.

use crate::audio::{AudioClip, AudioSink};
use crate::box_actuator::BoxActuator;
use crate::completion::Completion;
use crate::config::{CtrlConfig, StateTimeouts};
use crate::confirm::ConfirmSource;
use crate::error::{CtrlError, Result};
use crate::orders::{spawn_verification, OrderVerifier, QrSource, VerifyResult};

use doota_io::lidar::PersonSource;
use doota_io::{LedPattern, McuLink};
use doota_nav::{NavError, NavHandle, Navigator, Point2D, Pose2D};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Delivery cycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Waiting,
    Approaching,
    Verifying,
    NavigatingToWarehouse,
    Loading,
    ReturningToCustomer,
    Delivering,
    Resetting,
    ErrorRecovery,
    /// Terminal; manual reset only.
    EmergencyStop,
}

impl State {
    pub fn name(&self) -> &'static str {
        match self {
            State::Waiting => "Waiting",
            State::Approaching => "Approaching",
            State::Verifying => "Verifying",
            State::NavigatingToWarehouse => "NavigatingToWarehouse",
            State::Loading => "Loading",
            State::ReturningToCustomer => "ReturningToCustomer",
            State::Delivering => "Delivering",
            State::Resetting => "Resetting",
            State::ErrorRecovery => "ErrorRecovery",
            State::EmergencyStop => "EmergencyStop",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mutable record owned by the state machine.
#[derive(Debug, Clone, Default)]
pub struct DeliveryContext {
    /// Current estimated pose.
    pub pose: Pose2D,
    /// Where to bring the package back to; captured when verification
    /// starts, present exactly while a delivery is in progress.
    pub customer_pose: Option<Pose2D>,
    /// The verified order being delivered.
    pub order_id: Option<u32>,
    /// Last error routed through the central handler.
    pub last_error: Option<String>,
    /// Consecutive recovery attempts.
    pub recovery_attempts: u32,
}

/// One logged transition.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: State,
    pub to: State,
    pub reason: String,
    pub at: Instant,
}

/// Parameters the machine needs, extracted from [`CtrlConfig`].
#[derive(Debug, Clone)]
pub struct DeliveryParams {
    pub home: Point2D,
    pub warehouse: Point2D,
    pub delivery_zone_radius: f32,
    pub approach_distance: f32,
    pub approach_speed: u8,
    pub person_debounce: Duration,
    pub delivery_hold: Duration,
    pub qr_timeout: Duration,
    pub max_recovery_attempts: u32,
    pub recovery_retry_delay: Duration,
    pub timeouts: StateTimeouts,
}

impl DeliveryParams {
    pub fn from_config(config: &CtrlConfig) -> Self {
        Self {
            home: Point2D::new(config.zones.home[0], config.zones.home[1]),
            warehouse: Point2D::new(config.zones.warehouse[0], config.zones.warehouse[1]),
            delivery_zone_radius: config.zones.delivery_zone_radius,
            approach_distance: config.zones.customer_approach_distance,
            approach_speed: config.delivery.approach_speed,
            person_debounce: Duration::from_secs_f32(config.delivery.person_debounce_secs),
            delivery_hold: Duration::from_secs_f32(config.delivery.delivery_hold_secs),
            qr_timeout: Duration::from_secs_f32(config.delivery.qr_timeout_secs),
            max_recovery_attempts: config.delivery.max_recovery_attempts,
            recovery_retry_delay: Duration::from_secs_f32(config.delivery.recovery_retry_secs),
            timeouts: config.timeouts.clone(),
        }
    }
}

/// Everything the machine orchestrates.
pub struct Subsystems {
    pub navigator: Navigator,
    pub link: Arc<McuLink>,
    pub box_lid: BoxActuator,
    pub audio: Box<dyn AudioSink>,
    pub persons: Box<dyn PersonSource>,
    pub qr: Arc<Mutex<Box<dyn QrSource>>>,
    pub orders: Arc<OrderVerifier>,
    pub confirm: Box<dyn ConfirmSource>,
}

/// The delivery orchestrator.
pub struct DeliveryMachine {
    params: DeliveryParams,
    sys: Subsystems,
    state: State,
    ctx: DeliveryContext,
    entered_at: Instant,
    transitions: Vec<TransitionRecord>,

    pending_nav: Option<NavHandle>,
    pending_qr: Option<Completion<VerifyResult>>,
    pending_box: Option<Completion<Result<()>>>,
    pending_confirm: Option<Completion<()>>,
    delivery_deadline: Option<Instant>,
    recovery_retry_at: Option<Instant>,
    last_detection: Option<Instant>,
}

impl DeliveryMachine {
    pub fn new(params: DeliveryParams, sys: Subsystems) -> Self {
        Self {
            params,
            sys,
            state: State::Waiting,
            ctx: DeliveryContext::default(),
            entered_at: Instant::now(),
            transitions: Vec::new(),
            pending_nav: None,
            pending_qr: None,
            pending_box: None,
            pending_confirm: None,
            delivery_deadline: None,
            recovery_retry_at: None,
            last_detection: None,
        }
    }

    /// Run the entry side-effects of the initial state.
    pub fn start(&mut self) {
        log::info!("delivery machine starting");
        self.transition(State::Waiting, "startup");
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn context(&self) -> &DeliveryContext {
        &self.ctx
    }

    /// Every transition so far, in order.
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// The orchestrated subsystems (read access, used by the scenarios).
    pub fn subsystems(&self) -> &Subsystems {
        &self.sys
    }

    /// One 10 Hz update: timeout check, then the current state's handler.
    pub fn tick(&mut self) {
        self.ctx.pose = self.sys.navigator.current_pose();

        // Box ramp failures are state-independent.
        if let Some(result) = self.pending_box.as_ref().and_then(|c| c.poll()) {
            self.pending_box = None;
            if let Err(e) = result {
                self.handle_error(e);
                return;
            }
        }

        if self.check_timeout() {
            return;
        }

        let result = match self.state {
            State::Waiting => self.on_waiting(),
            State::Approaching => self.on_approaching(),
            State::Verifying => self.on_verifying(),
            State::NavigatingToWarehouse => self.on_nav_outcome(State::Loading, "warehouse reached"),
            State::Loading => self.on_loading(),
            State::ReturningToCustomer => self.on_nav_outcome(State::Delivering, "customer reached"),
            State::Delivering => self.on_delivering(),
            State::Resetting => self.on_nav_outcome(State::Waiting, "home reached"),
            State::ErrorRecovery => self.on_error_recovery(),
            State::EmergencyStop => Ok(()),
        };

        if let Err(e) = result {
            self.handle_error(e);
        }
    }

    /// Per-state deadline; `Waiting` and `EmergencyStop` have none.
    fn state_timeout(&self) -> Option<f32> {
        let t = &self.params.timeouts;
        match self.state {
            State::Waiting | State::EmergencyStop => None,
            State::Approaching => Some(t.approaching),
            State::Verifying => Some(t.verifying),
            State::NavigatingToWarehouse => Some(t.navigating_to_warehouse),
            State::Loading => Some(t.loading),
            State::ReturningToCustomer => Some(t.returning_to_customer),
            State::Delivering => Some(t.delivering),
            State::Resetting => Some(t.resetting),
            State::ErrorRecovery => Some(t.error_recovery),
        }
    }

    /// Returns true when a timeout fired and already drove a transition.
    fn check_timeout(&mut self) -> bool {
        let Some(limit) = self.state_timeout() else {
            return false;
        };
        if self.entered_at.elapsed().as_secs_f32() <= limit {
            return false;
        }

        self.handle_error(CtrlError::StateTimeout {
            state: self.state.name(),
            limit_secs: limit,
        });
        true
    }

    fn transition(&mut self, to: State, reason: &str) {
        let from = self.state;
        let at = Instant::now();
        tracing::info!(
            from = %from,
            to = %to,
            reason = reason,
            "state transition"
        );
        self.transitions.push(TransitionRecord {
            from,
            to,
            reason: reason.to_string(),
            at,
        });

        self.state = to;
        self.entered_at = at;

        // Completions tied to the old state are void; box ramps continue
        // to their target regardless and stay observed.
        self.pending_nav = None;
        self.pending_qr = None;
        self.pending_confirm = None;
        self.delivery_deadline = None;
        self.recovery_retry_at = None;

        if let Err(e) = self.enter(to) {
            self.handle_error(e);
        }
    }

    /// Entry side-effects.
    fn enter(&mut self, state: State) -> Result<()> {
        match state {
            State::Waiting => {
                self.sys.link.set_led(LedPattern::Idle);
                self.ctx.customer_pose = None;
                self.ctx.order_id = None;
                self.ctx.last_error = None;
                self.ctx.recovery_attempts = 0;
                self.last_detection = None;
            }
            State::Approaching => {
                self.sys.link.set_led(LedPattern::Moving);
            }
            State::Verifying => {
                self.sys.link.set_led(LedPattern::Waiting);
                self.sys.audio.play(AudioClip::RequestQr);
                self.pending_qr = Some(spawn_verification(
                    Arc::clone(&self.sys.qr),
                    Arc::clone(&self.sys.orders),
                    self.params.qr_timeout,
                ));
            }
            State::NavigatingToWarehouse => {
                self.sys.link.set_led(LedPattern::Moving);
                let goal = self.params.warehouse;
                self.pending_nav = Some(self.sys.navigator.navigate_to(goal.x, goal.y)?);
            }
            State::Loading => {
                self.sys.link.set_led(LedPattern::Waiting);
                if let Some(order_id) = self.ctx.order_id {
                    self.sys.audio.play(AudioClip::OrderNumber(order_id));
                }
                self.pending_box = Some(self.sys.box_lid.open());
                self.pending_confirm = Some(self.sys.confirm.begin());
            }
            State::ReturningToCustomer => {
                self.sys.link.set_led(LedPattern::Moving);
                let target = self.ctx.customer_pose.ok_or_else(|| {
                    CtrlError::Internal("no saved customer pose to return to".into())
                })?;
                self.pending_nav = Some(self.sys.navigator.navigate_to(target.x, target.y)?);
            }
            State::Delivering => {
                self.sys.link.set_led(LedPattern::Waiting);
                self.sys.audio.play(AudioClip::DeliveryGreeting);
                self.pending_box = Some(self.sys.box_lid.open());
                self.delivery_deadline = Some(Instant::now() + self.params.delivery_hold);
            }
            State::Resetting => {
                self.sys.link.set_led(LedPattern::Moving);
                // The delivery is over; only the drive home remains.
                self.ctx.customer_pose = None;
                let home = self.params.home;
                self.pending_nav = Some(self.sys.navigator.navigate_to(home.x, home.y)?);
            }
            State::ErrorRecovery => {
                self.sys.navigator.stop();
                // A delivery in progress is abandoned here.
                self.ctx.customer_pose = None;
                self.sys.link.set_led(LedPattern::Error);
                self.pending_box = Some(self.sys.box_lid.close());
                self.sys.audio.play(AudioClip::Error);
                log::warn!(
                    "entering recovery (attempt {}/{}): {}",
                    self.ctx.recovery_attempts,
                    self.params.max_recovery_attempts,
                    self.ctx.last_error.as_deref().unwrap_or("unknown error")
                );
                // The drive home is started by the handler so a Busy
                // navigator can be retried tick by tick.
            }
            State::EmergencyStop => {
                self.sys.navigator.stop();
                self.ctx.customer_pose = None;
                if let Err(e) = self.sys.box_lid.emergency_close() {
                    log::error!("emergency close failed: {}", e);
                }
                self.sys.link.set_led(LedPattern::Error);
                tracing::error!(
                    error = self.ctx.last_error.as_deref().unwrap_or("unknown"),
                    "EMERGENCY STOP - manual reset required"
                );
            }
        }
        Ok(())
    }

    // ---- state handlers ---------------------------------------------------

    fn on_waiting(&mut self) -> Result<()> {
        let Some((px, py)) = self.sys.persons.detect_person() else {
            return Ok(());
        };

        // Debounce repeat detections
        let now = Instant::now();
        if let Some(last) = self.last_detection {
            if now.duration_since(last) < self.params.person_debounce {
                return Ok(());
            }
        }
        self.last_detection = Some(now);

        let global = self.ctx.pose.transform(px, py);
        if global.distance(&self.params.home) > self.params.delivery_zone_radius {
            log::debug!(
                "person at ({:.2}, {:.2}) is outside the delivery zone",
                global.x,
                global.y
            );
            return Ok(());
        }

        log::info!("person detected at ({:.2}, {:.2})", global.x, global.y);
        self.transition(State::Approaching, "person detected in delivery zone");
        Ok(())
    }

    fn on_approaching(&mut self) -> Result<()> {
        let Some((px, py)) = self.sys.persons.detect_person() else {
            log::info!("customer left the detection range");
            self.sys.navigator.stop();
            self.transition(State::Waiting, "customer lost");
            return Ok(());
        };

        let distance = (px * px + py * py).sqrt();
        if distance < self.params.approach_distance {
            log::info!("reached customer at {:.2}m", distance);
            self.sys.navigator.stop();
            self.ctx.customer_pose = Some(self.ctx.pose);
            self.transition(State::Verifying, "customer within approach distance");
            return Ok(());
        }

        // Steer toward the tracked customer at the approach speed.
        let bearing = py.atan2(px);
        let correction = (bearing * 0.8).clamp(-1.0, 1.0);
        let base = self.params.approach_speed as f32;
        let left = (base * (1.0 - correction)).clamp(0.0, 255.0) as u8;
        let right = (base * (1.0 + correction)).clamp(0.0, 255.0) as u8;
        self.sys.link.send_motor(left, right, true, true)?;
        Ok(())
    }

    fn on_verifying(&mut self) -> Result<()> {
        let outcome = self.pending_qr.as_ref().and_then(|c| c.poll());
        let Some(result) = outcome else {
            return Ok(());
        };
        self.pending_qr = None;

        if result.valid {
            self.ctx.order_id = result.order_id;
            log::info!("order {:?} verified", result.order_id);
            self.sys.audio.play(AudioClip::OrderAccepted);
            self.sys.link.set_led(LedPattern::SuccessScan);
            self.transition(State::NavigatingToWarehouse, "order verified");
        } else {
            log::warn!("order rejected (id {:?})", result.order_id);
            self.sys.audio.play(AudioClip::OrderRejected);
            self.sys.link.set_led(LedPattern::FailureScan);
            self.transition(State::Waiting, "order rejected");
        }
        Ok(())
    }

    /// Shared poll for the three plain navigation states.
    fn on_nav_outcome(&mut self, next: State, reason: &str) -> Result<()> {
        let outcome = self.pending_nav.as_ref().and_then(|h| h.poll());
        let Some(result) = outcome else {
            return Ok(());
        };
        self.pending_nav = None;

        match result {
            Ok(()) => {
                self.transition(next, reason);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn on_loading(&mut self) -> Result<()> {
        let confirmed = self.pending_confirm.as_ref().and_then(|c| c.poll());
        if confirmed.is_some() {
            self.pending_confirm = None;
            log::info!("loading confirmed");
            self.sys.audio.play(AudioClip::LoadingComplete);
            let close = self.sys.box_lid.close();
            self.transition(State::ReturningToCustomer, "loading confirmed");
            self.pending_box = Some(close);
        }
        Ok(())
    }

    fn on_delivering(&mut self) -> Result<()> {
        let Some(deadline) = self.delivery_deadline else {
            return Ok(());
        };
        if Instant::now() >= deadline {
            log::info!("delivery window elapsed");
            let close = self.sys.box_lid.close();
            self.transition(State::Resetting, "delivery window elapsed");
            self.pending_box = Some(close);
        }
        Ok(())
    }

    fn on_error_recovery(&mut self) -> Result<()> {
        // Wait out the retry delay after a failed attempt.
        if let Some(retry_at) = self.recovery_retry_at {
            if Instant::now() < retry_at {
                return Ok(());
            }
            self.recovery_retry_at = None;
        }

        // Start (or restart) the drive home. A navigator still winding
        // down reports Busy; try again next tick.
        if self.pending_nav.is_none() {
            match self
                .sys
                .navigator
                .navigate_to(self.params.home.x, self.params.home.y)
            {
                Ok(handle) => self.pending_nav = Some(handle),
                Err(NavError::Busy) => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(());
        }

        let outcome = self.pending_nav.as_ref().and_then(|h| h.poll());
        let Some(result) = outcome else {
            return Ok(());
        };
        self.pending_nav = None;

        match result {
            Ok(()) => {
                log::info!("recovery complete, back home");
                self.transition(State::Waiting, "recovery complete");
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                self.ctx.recovery_attempts += 1;
                log::warn!(
                    "recovery drive failed ({}), attempt {}/{}",
                    e,
                    self.ctx.recovery_attempts,
                    self.params.max_recovery_attempts
                );
                if self.ctx.recovery_attempts >= self.params.max_recovery_attempts {
                    self.ctx.last_error = Some(e.to_string());
                    self.transition(State::EmergencyStop, "recovery attempts exhausted");
                } else {
                    self.recovery_retry_at =
                        Some(Instant::now() + self.params.recovery_retry_delay);
                }
                Ok(())
            }
        }
    }

    // ---- central error policy ---------------------------------------------

    /// Classify an error and drive the machine to its safe state.
    ///
    /// A zero-speed motor command is always issued before the transition.
    fn handle_error(&mut self, error: CtrlError) {
        tracing::error!(state = %self.state, error = %error, "handler error");
        self.ctx.last_error = Some(error.to_string());
        self.sys.navigator.stop();

        if self.state == State::EmergencyStop {
            return;
        }

        if error.is_fatal() {
            self.transition(State::EmergencyStop, "fatal error");
            return;
        }

        if self.state == State::ErrorRecovery {
            // An error while already recovering counts as a failed attempt.
            self.ctx.recovery_attempts += 1;
            if self.ctx.recovery_attempts >= self.params.max_recovery_attempts {
                self.transition(State::EmergencyStop, "recovery attempts exhausted");
            } else {
                self.pending_nav = None;
                self.recovery_retry_at =
                    Some(Instant::now() + self.params.recovery_retry_delay);
            }
        } else {
            self.transition(State::ErrorRecovery, "error");
        }
    }
}
