use bevolt_bps::balancing::BalancingAction;
use bevolt_bps::config::NUM_MODULES;
use bevolt_bps::diagnostics::{OperatorRequest, ReplayCache};
use bevolt_bps::eeprom::M24128;
use bevolt_bps::monitor::{OperatorError, Startup};
use bevolt_bps::{
    Contactor, CycleOutcome, Indication, Indicator, Ltc6811Link, Monitor, PackSnapshot, SafetyReport,
    TickSource,
};
use defmt::*;
use embassy_executor::task;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::watchdog::{ResetReason, Watchdog};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel;
use embassy_sync::mutex::Mutex;
use embassy_time::{Delay, Duration, Instant, TICK_HZ, Ticker};
use statig::prelude::*;

use crate::config::{CONTROL_PERIOD_MS, WATCHDOG_TIMEOUT_MS};
use crate::config_resources::ContactorResources;
use crate::tasks::current_sense::PublishedCurrent;
use crate::tasks::indicator::SignalIndicator;
use crate::{AfeSpi, EepromI2c};

pub type BpsMonitor = Monitor<Ltc6811Link<AfeSpi, Delay>, Delay, M24128<EepromI2c, Delay>, UptimeTicks>;

pub type OperatorChannelType = channel::Channel<CriticalSectionRawMutex, OperatorRequest, 4>;
/// Operator requests from the diagnostics interface, applied between cycles.
pub static OPERATOR_CHANNEL: OperatorChannelType = channel::Channel::new();

/// Latest whole-cycle view, replaced after every tick.
pub static SNAPSHOT: Mutex<CriticalSectionRawMutex, PackSnapshot> =
    Mutex::new(PackSnapshot::EMPTY);

/// Fault log copy served by the diagnostics interface.
pub static REPLAY_CACHE: Mutex<CriticalSectionRawMutex, ReplayCache> =
    Mutex::new(ReplayCache::new());

// Events used by the state machine
#[derive(Clone, Copy, Debug)]
pub enum Event {
    Tick,
    Operator(OperatorRequest),
}

/// Contactor coil driver. Powers up open.
pub struct ContactorOutput {
    coil: Output<'static>,
}

impl ContactorOutput {
    pub fn new(resources: ContactorResources) -> Self {
        Self {
            coil: Output::new(resources.pin, Level::Low),
        }
    }
}

impl Contactor for ContactorOutput {
    fn close(&mut self) {
        self.coil.set_high();
    }

    fn open(&mut self) {
        self.coil.set_low();
    }

    fn is_closed(&self) -> bool {
        self.coil.is_set_high()
    }
}

/// RP2040 hardware watchdog. Not running until the first pet, so a
/// lockout that never pets never resets.
pub struct HardwareWatchdog {
    watchdog: Watchdog,
    running: bool,
    prior_timeout: bool,
}

impl HardwareWatchdog {
    pub fn new(watchdog: Watchdog) -> Self {
        let prior_timeout = matches!(watchdog.reset_reason(), Some(ResetReason::TimedOut));
        Self {
            watchdog,
            running: false,
            prior_timeout,
        }
    }
}

impl bevolt_bps::Watchdog for HardwareWatchdog {
    fn pet(&mut self) {
        if self.running {
            self.watchdog.feed();
        } else {
            info!("Starting hardware watchdog, {} ms", WATCHDOG_TIMEOUT_MS);
            self.watchdog.start(Duration::from_millis(WATCHDOG_TIMEOUT_MS));
            self.running = true;
        }
    }

    fn did_prior_reset_occur(&self) -> bool {
        self.prior_timeout
    }
}

/// Charge integration time base on the embassy uptime clock.
pub struct UptimeTicks {
    last: Instant,
}

impl UptimeTicks {
    pub fn new() -> Self {
        Self { last: Instant::now() }
    }
}

impl TickSource for UptimeTicks {
    fn elapsed_ticks(&mut self) -> u32 {
        let now = Instant::now();
        let elapsed = now.as_ticks() - self.last.as_ticks();
        self.last = now;
        elapsed.min(u32::MAX as u64) as u32
    }

    fn frequency_hz(&self) -> u32 {
        TICK_HZ as u32
    }
}

pub struct Context {
    pub monitor: BpsMonitor,
    pub current: PublishedCurrent,
    pub contactor: ContactorOutput,
    pub watchdog: HardwareWatchdog,
    pub indicator: SignalIndicator,
    balancing: [BalancingAction; NUM_MODULES],
}

impl Context {
    pub fn new(monitor: BpsMonitor, contactor: ContactorOutput, watchdog: HardwareWatchdog) -> Self {
        Context {
            monitor,
            current: PublishedCurrent,
            contactor,
            watchdog,
            indicator: SignalIndicator,
            balancing: [BalancingAction::Hold; NUM_MODULES],
        }
    }

    async fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = self
            .monitor
            .monitor_cycle(&mut self.current, &mut self.contactor, &mut self.watchdog)
            .await;
        if outcome == CycleOutcome::Safe {
            self.note_balancing();
        }
        outcome
    }

    // No discharge driver yet, report changes in the plan
    fn note_balancing(&mut self) {
        let plan = self.monitor.balancing_plan();
        for (module, (&action, previous)) in plan.iter().zip(self.balancing.iter_mut()).enumerate() {
            if action != *previous {
                info!("Module {} balancing: {}", module, action);
                *previous = action;
            }
        }
    }

    async fn apply(&mut self, request: OperatorRequest) {
        info!("Operator request: {}", request);
        match self.monitor.apply(request).await {
            Ok(()) => {}
            Err(OperatorError::Faulted) => return,
            Err(OperatorError::Store(e)) => {
                warn!("Operator request not persisted: {}", Debug2Format(&e));
            }
        }
        if request == OperatorRequest::ResetFaultLog {
            self.refresh_replay_cache().await;
        }
    }

    async fn refresh_replay_cache(&mut self) {
        let mut cache = ReplayCache::new();
        match self
            .monitor
            .replay_fault_log(|category, data| cache.push(category, data))
            .await
        {
            Ok(entries) => debug!("Fault log holds {} entries", entries),
            Err(e) => warn!("Fault log replay failed: {}", Debug2Format(&e)),
        }
        *REPLAY_CACHE.lock().await = cache;
    }

    async fn publish(&self) {
        *SNAPSHOT.lock().await = self.monitor.snapshot();
    }
}

#[derive(Debug, Default)]
pub struct BpsStateMachine {}

#[state_machine(
    initial = "State::starting()",
    before_transition = "Self::before_transition",
    state(derive(Debug)),
    superstate(derive(Debug))
)]
impl BpsStateMachine {
    async fn before_transition(&mut self, source: &State, target: &State) {
        info!("Transitioning from {:?} to {:?}", Debug2Format(source), Debug2Format(target));
    }

    /// Applies operator requests in every state that can act on them.
    #[superstate]
    async fn operational(event: &Event, context: &mut Context) -> Outcome<State> {
        match event {
            Event::Operator(request) => {
                context.apply(*request).await;
                Handled
            }
            Event::Tick => Handled,
        }
    }

    #[state(superstate = "operational")]
    async fn starting(event: &Event, context: &mut Context) -> Outcome<State> {
        match event {
            Event::Tick => match context
                .monitor
                .startup_gate(&context.watchdog, &mut context.indicator)
                .await
            {
                Startup::Proceed => Transition(State::monitoring()),
                Startup::Lockout => Transition(State::watchdog_lockout()),
            },
            _ => Super,
        }
    }

    #[state(superstate = "operational", entry_action = "enter_monitoring")]
    async fn monitoring(event: &Event, context: &mut Context) -> Outcome<State> {
        match event {
            Event::Tick => match context.run_cycle().await {
                CycleOutcome::Safe => Handled,
                CycleOutcome::Fault(report) => Transition(State::fault(report)),
                CycleOutcome::Faulted => Handled,
            },
            _ => Super,
        }
    }

    #[action]
    async fn enter_monitoring(context: &mut Context) {
        context.indicator.show(Indication::Run);
        context.refresh_replay_cache().await;
    }

    /// Terminal. Operator requests would rewrite the evidence of the trip.
    #[allow(unused_variables)]
    #[state(entry_action = "enter_fault")]
    async fn fault(report: &mut SafetyReport, event: &Event, context: &mut Context) -> Outcome<State> {
        match event {
            Event::Tick => {
                context.monitor.fault_tick(&mut context.watchdog);
                Handled
            }
            Event::Operator(request) => {
                warn!("Ignoring {} after a pack fault", request);
                Handled
            }
        }
    }

    #[action]
    async fn enter_fault(report: &mut SafetyReport, context: &mut Context) {
        error!("Pack fault: {}", report.aggregate());
        let summary = context
            .monitor
            .enter_fault(
                report,
                &mut context.contactor,
                &mut context.indicator,
                &mut context.watchdog,
            )
            .await;
        debug!("Fault sequence done: {}", summary);
        context.refresh_replay_cache().await;
    }

    #[allow(unused_variables)]
    #[state(entry_action = "enter_watchdog_lockout")]
    async fn watchdog_lockout(event: &Event) -> Outcome<State> {
        match event {
            Event::Tick => Handled,
            Event::Operator(request) => {
                warn!("Ignoring {} during watchdog lockout", request);
                Handled
            }
        }
    }

    #[action]
    async fn enter_watchdog_lockout(context: &mut Context) {
        context.refresh_replay_cache().await;
    }
}

#[task]
pub async fn state_machine_task(
    monitor: BpsMonitor,
    contactor: ContactorOutput,
    watchdog: HardwareWatchdog,
) {
    info!("Starting state machine task");

    let mut context = Context::new(monitor, contactor, watchdog);
    context.publish().await;

    let mut state_machine = BpsStateMachine::default().state_machine();

    let mut ticker = Ticker::every(Duration::from_millis(CONTROL_PERIOD_MS));

    let receiver = OPERATOR_CHANNEL.receiver();

    info!("State machine task initialized");

    loop {
        ticker.next().await;

        while let Ok(request) = receiver.try_receive() {
            state_machine
                .handle_with_context(&Event::Operator(request), &mut context)
                .await;
        }

        state_machine
            .handle_with_context(&Event::Tick, &mut context)
            .await;

        context.publish().await;
    }
}
