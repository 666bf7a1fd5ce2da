//! Acquire, evaluate, actuate; and the terminal fault sequence.
//!
//! The monitor is the only writer of telemetry, SoC and verdict state and
//! the only one that drives the contactor. Once a cycle comes back unsafe
//! the monitor stays in [`Phase::Fault`] until it is dropped; there is no
//! way back to monitoring short of a restart.

use embedded_hal_async::delay::DelayNs;

use crate::balancing::{self, BalancingAction};
use crate::board_link::BoardLink;
use crate::config::{Limits, NUM_MODULES, SOC_PERSIST_STEP};
use crate::diagnostics::OperatorRequest;
use crate::fault_log::{FaultCategory, FaultLog, FaultLogError, PersistentStore};
use crate::safety::{self, CurrentSample, SafetyReport, Verdict, Violations};
use crate::snapshot::PackSnapshot;
use crate::soc::{self, SocEstimator, TickSource};
use crate::telemetry::{AcquisitionFault, Telemetry};

pub trait Contactor {
    fn close(&mut self);

    fn open(&mut self);

    fn is_closed(&self) -> bool;
}

pub trait Watchdog {
    fn pet(&mut self);

    /// Whether the last reset was caused by a watchdog timeout.
    fn did_prior_reset_occur(&self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Indication {
    Run,
    /// `violations` holds every breached limit, not just the one behind
    /// `verdict`.
    Fault {
        verdict: Verdict,
        violations: Violations,
    },
    WatchdogLockout,
}

pub trait Indicator {
    fn show(&mut self, indication: Indication);
}

pub trait CurrentSensor {
    type Error: core::fmt::Debug;

    async fn sample(&mut self) -> Result<CurrentSample, Self::Error>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Startup {
    Proceed,
    /// The previous run ended in a watchdog reset; hold the lockout.
    Lockout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    Monitoring,
    Fault,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Safe,
    /// First unsafe cycle. Run [`Monitor::enter_fault`] with the report.
    Fault(SafetyReport),
    /// Already in the fault phase; nothing was acquired.
    Faulted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatorError<E> {
    /// The fault phase keeps the log and the SoC as the trip left them.
    Faulted,
    Store(E),
}

/// What the fault sequence managed to record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultSummary {
    pub verdict: Verdict,
    pub categories: usize,
    pub entries_logged: usize,
    pub entries_dropped: usize,
    pub store_failures: usize,
}

impl FaultSummary {
    fn record<E: core::fmt::Debug>(&mut self, result: Result<bool, FaultLogError<E>>) {
        match result {
            Ok(true) => self.entries_logged += 1,
            Ok(false) => self.entries_dropped += 1,
            Err(FaultLogError::ReservedValue) => self.entries_dropped += 1,
            Err(FaultLogError::Store(_)) => self.store_failures += 1,
        }
    }
}

/// Largest current logged, in whole amps. 0xff is the log terminator.
const MAX_LOGGED_AMPS: u32 = 0xfe;

pub struct Monitor<L, D, S, T> {
    telemetry: Telemetry<L, D>,
    soc: SocEstimator<T>,
    log: FaultLog<S>,
    limits: Limits,
    undervoltage_override: bool,
    phase: Phase,
    configured: bool,
    snapshot: PackSnapshot,
    cycle: u32,
    persisted_soc: u16,
}

impl<L, D, S, T> Monitor<L, D, S, T>
where
    L: BoardLink,
    D: DelayNs,
    S: PersistentStore,
    T: TickSource,
{
    /// Brings the core up: configures the board chain and restores the fault
    /// log pointers and the SoC. A chain that does not configure is retried
    /// on every cycle and reads as untrusted until it does.
    pub async fn new(
        link: L,
        delay: D,
        store: S,
        ticks: T,
        limits: Limits,
    ) -> Result<Self, S::Error> {
        let mut telemetry = Telemetry::new(link, delay);
        let configured = match telemetry.init().await {
            Ok(()) => true,
            Err(e) => {
                warn!("board chain bring-up failed: {}", e.fault());
                false
            }
        };

        let mut log = FaultLog::init(store).await?;
        let persisted_soc = soc::load_persisted(log.store_mut()).await?;
        info!("monitor up, soc {=u16}", persisted_soc);

        let mut snapshot = PackSnapshot::EMPTY;
        snapshot.set_soc(persisted_soc);

        Ok(Self {
            telemetry,
            soc: SocEstimator::new(ticks, persisted_soc),
            log,
            limits,
            undervoltage_override: false,
            phase: Phase::Monitoring,
            configured,
            snapshot,
            cycle: 0,
            persisted_soc,
        })
    }

    /// Power-stabilization gate, run once before monitoring starts.
    pub async fn startup_gate<W, I>(&mut self, watchdog: &W, indicator: &mut I) -> Startup
    where
        W: Watchdog,
        I: Indicator,
    {
        if !watchdog.did_prior_reset_occur() {
            return Startup::Proceed;
        }
        error!("previous run ended in a watchdog reset, locking out");
        if let Err(e) = self.log.log_error(FaultCategory::Watchdog).await {
            warn!("could not log the watchdog fault: {}", crate::fmt::Debug2(&e));
        }
        indicator.show(Indication::WatchdogLockout);
        Startup::Lockout
    }

    /// One MONITORING iteration. Leaves the contactor closed only when the
    /// pack is safe, and pets the watchdog whatever the outcome.
    pub async fn monitor_cycle<C, K, W>(
        &mut self,
        current: &mut C,
        contactor: &mut K,
        watchdog: &mut W,
    ) -> CycleOutcome
    where
        C: CurrentSensor,
        K: Contactor,
        W: Watchdog,
    {
        if self.phase == Phase::Fault {
            watchdog.pet();
            return CycleOutcome::Faulted;
        }

        if !self.configured {
            match self.telemetry.init().await {
                Ok(()) => self.configured = true,
                Err(e) => self.telemetry.invalidate(e.fault()),
            }
        }
        if self.configured {
            self.telemetry.refresh().await;
        }
        let readings = self.telemetry.readings();

        let sample = match current.sample().await {
            Ok(sample) => Some(sample),
            Err(e) => {
                warn!("current sensor failed: {}", crate::fmt::Debug2(&e));
                None
            }
        };

        let report = safety::evaluate(&readings, sample, &self.limits);
        let safe = report.is_safe_with_override(self.undervoltage_override);
        if safe {
            contactor.close();
        } else {
            contactor.open();
            self.phase = Phase::Fault;
        }

        let soc = self.soc.update(sample.map_or(0, |s| s.milliamps));
        self.persist_soc_if_moved().await;

        self.cycle = self.cycle.wrapping_add(1);
        self.snapshot =
            PackSnapshot::capture(readings, report, soc, contactor.is_closed(), self.cycle);
        watchdog.pet();

        if safe {
            trace!("cycle {=u32} safe, soc {=u16}", self.cycle, soc);
            CycleOutcome::Safe
        } else {
            error!("cycle {=u32} unsafe: {}", self.cycle, report.aggregate());
            CycleOutcome::Fault(report)
        }
    }

    /// The fault sequence: open the contactor, show the fault, recalibrate
    /// SoC on a voltage fault and write the evidence to the fault log.
    /// Store failures are counted, never retried here.
    ///
    /// The watchdog is pet after every store write, a full pack of evidence
    /// takes longer than one watchdog period.
    pub async fn enter_fault<K, I, W>(
        &mut self,
        report: &SafetyReport,
        contactor: &mut K,
        indicator: &mut I,
        watchdog: &mut W,
    ) -> FaultSummary
    where
        K: Contactor,
        I: Indicator,
        W: Watchdog,
    {
        contactor.open();
        self.phase = Phase::Fault;
        self.snapshot.set_contactor_closed(contactor.is_closed());

        let verdict = report.aggregate();
        indicator.show(Indication::Fault {
            verdict,
            violations: report.pack_violations(),
        });

        if verdict.is_voltage() {
            self.soc.calibrate(verdict);
            self.snapshot.set_soc(self.soc.percent());
            if let Err(e) = soc::persist(self.log.store_mut(), self.soc.percent()).await {
                warn!("could not persist soc: {}", crate::fmt::Debug2(&e));
            } else {
                self.persisted_soc = self.soc.percent();
            }
            watchdog.pet();
        }

        let mut summary = FaultSummary {
            verdict,
            ..FaultSummary::default()
        };
        for category in report.violated_categories() {
            summary.categories += 1;
            summary.record(self.log.log_error(category).await);
            watchdog.pet();

            if category == FaultCategory::HighCurrent {
                if let Some(sample) = report.current() {
                    let amps = (sample.milliamps.unsigned_abs() / 1000).min(MAX_LOGGED_AMPS);
                    summary.record(self.log.log_data(category, amps as u8).await);
                    watchdog.pet();
                }
                continue;
            }

            let in_danger = report.modules_in_danger(category);
            for module in (0..NUM_MODULES).filter(|&m| in_danger[m]) {
                summary.record(self.log.log_data(category, module as u8).await);
                watchdog.pet();
            }
        }

        if summary.store_failures > 0 {
            warn!("{} fault log writes failed", summary.store_failures);
        }
        info!("fault recorded: {}", summary);
        summary
    }

    /// The only work left in the fault phase.
    pub fn fault_tick<W: Watchdog>(&mut self, watchdog: &mut W) {
        watchdog.pet();
    }

    async fn persist_soc_if_moved(&mut self) {
        let soc = self.soc.percent();
        if soc.abs_diff(self.persisted_soc) < SOC_PERSIST_STEP {
            return;
        }
        match soc::persist(self.log.store_mut(), soc).await {
            Ok(()) => self.persisted_soc = soc,
            Err(e) => warn!("could not persist soc: {}", crate::fmt::Debug2(&e)),
        }
    }

    /// Operator SoC override in 0.01 % units.
    pub async fn set_soc(&mut self, value: u16) -> Result<(), S::Error> {
        self.soc.set_accum(value);
        let soc = self.soc.percent();
        self.snapshot.set_soc(soc);
        soc::persist(self.log.store_mut(), soc).await?;
        self.persisted_soc = soc;
        info!("soc set to {=u16} by operator", soc);
        Ok(())
    }

    pub async fn reset_fault_log(&mut self) -> Result<(), S::Error> {
        self.log.reset().await
    }

    /// Applies an operator request. Refused once the pack has tripped.
    pub async fn apply(&mut self, request: OperatorRequest) -> Result<(), OperatorError<S::Error>> {
        if self.phase == Phase::Fault {
            warn!("refusing {} in the fault phase", request);
            return Err(OperatorError::Faulted);
        }
        match request {
            OperatorRequest::ResetFaultLog => {
                self.reset_fault_log().await.map_err(OperatorError::Store)
            }
            OperatorRequest::SetStateOfCharge(value) => {
                self.set_soc(value).await.map_err(OperatorError::Store)
            }
            OperatorRequest::SetUndervoltageOverride(enabled) => {
                self.set_undervoltage_override(enabled);
                Ok(())
            }
        }
    }

    pub fn set_undervoltage_override(&mut self, enabled: bool) {
        if enabled != self.undervoltage_override {
            warn!("undervoltage override {}", if enabled { "on" } else { "off" });
        }
        self.undervoltage_override = enabled;
    }

    pub fn undervoltage_override(&self) -> bool {
        self.undervoltage_override
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn snapshot(&self) -> PackSnapshot {
        self.snapshot
    }

    pub async fn replay_fault_log<F>(&mut self, visit: F) -> Result<usize, S::Error>
    where
        F: FnMut(FaultCategory, &[u8]),
    {
        self.log.replay(visit).await
    }

    pub fn balancing_plan(&self) -> [BalancingAction; NUM_MODULES] {
        balancing::plan(self.snapshot.report())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        FAULT_CODE_BASE, NUM_BOARDS, SOC_FULL, TEMP_SENSORS_PER_BOARD, VOLTAGE_LOG_BASE,
    };
    use crate::fault_log::LogRegion;
    use crate::testing::{
        CountingWatchdog, FixedCurrent, Journal, MemoryStore, NoDelay, RecordingContactor,
        RecordingIndicator, ScriptedTicks, SimulatedChain, Step,
    };
    use embassy_futures::block_on;
    use std::vec::Vec;

    const HZ: u32 = 1_000;

    type TestMonitor = Monitor<SimulatedChain, NoDelay, MemoryStore, ScriptedTicks>;

    fn monitor_with(chain: SimulatedChain, store: MemoryStore) -> TestMonitor {
        block_on(Monitor::new(
            chain,
            NoDelay,
            store,
            ScriptedTicks::new(HZ),
            Limits::DEFAULT,
        ))
        .unwrap()
    }

    fn monitor(chain: SimulatedChain) -> TestMonitor {
        monitor_with(chain, MemoryStore::new())
    }

    fn logged(monitor: &mut TestMonitor) -> Vec<(FaultCategory, Vec<u8>)> {
        let mut out = Vec::new();
        block_on(monitor.replay_fault_log(|c, data| out.push((c, data.to_vec())))).unwrap();
        out
    }

    #[test]
    fn nominal_cycle_closes_the_contactor() {
        let mut monitor = monitor(SimulatedChain::nominal());
        let mut contactor = RecordingContactor::default();
        let mut watchdog = CountingWatchdog::default();

        let outcome = block_on(monitor.monitor_cycle(
            &mut FixedCurrent::milliamps(-20_000),
            &mut contactor,
            &mut watchdog,
        ));

        assert_eq!(outcome, CycleOutcome::Safe);
        assert!(contactor.closed);
        assert_eq!(watchdog.pets, 1);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.cycle(), 1);
        assert!(snapshot.contactor_closed());
        assert_eq!(snapshot.module_voltage(0), Some(SimulatedChain::NOMINAL_MV));
    }

    #[test]
    fn undervoltage_scenario_runs_the_whole_fault_sequence() {
        let mut chain = SimulatedChain::nominal();
        chain.set_module_mv(3, Limits::DEFAULT.min_voltage_mv - 1);
        let mut monitor = monitor(chain);
        let mut contactor = RecordingContactor::default();
        let mut watchdog = CountingWatchdog::default();
        let mut indicator = RecordingIndicator::default();
        let mut current = FixedCurrent::milliamps(-5_000);

        let outcome = block_on(monitor.monitor_cycle(&mut current, &mut contactor, &mut watchdog));
        let CycleOutcome::Fault(report) = outcome else {
            panic!("expected a fault, got {outcome:?}");
        };
        assert_eq!(report.aggregate(), Verdict::Undervoltage);
        let danger = report.modules_in_danger(FaultCategory::LowVoltage);
        assert_eq!((0..NUM_MODULES).filter(|&m| danger[m]).collect::<Vec<_>>(), [3]);
        assert!(!contactor.closed);
        assert_eq!(watchdog.pets, 1);

        let summary = block_on(monitor.enter_fault(
            &report,
            &mut contactor,
            &mut indicator,
            &mut watchdog,
        ));
        assert_eq!(summary.entries_logged, 2);
        assert_eq!(summary.store_failures, 0);
        // the SoC record and both log entries
        assert_eq!(watchdog.pets, 4);
        assert_eq!(
            indicator.shown,
            [Indication::Fault {
                verdict: Verdict::Undervoltage,
                violations: Violations::UNDERVOLTAGE,
            }]
        );
        assert_eq!(monitor.snapshot().soc(), 0);
        assert_eq!(logged(&mut monitor), [(FaultCategory::LowVoltage, std::vec![3])]);

        let store = monitor.log.store_mut();
        assert_eq!(store.bytes(FAULT_CODE_BASE, 2), [0x04, 0xff]);
        assert_eq!(store.bytes(VOLTAGE_LOG_BASE, 2), [3, 0xff]);
        assert_eq!(block_on(soc::load_persisted(store)), Ok(0));
    }

    #[test]
    fn fault_phase_is_terminal() {
        let mut chain = SimulatedChain::nominal();
        chain.set_module_mv(0, 4500);
        let mut monitor = monitor(chain);
        let mut contactor = RecordingContactor::default();
        let mut watchdog = CountingWatchdog::default();
        let mut current = FixedCurrent::milliamps(0);

        let outcome = block_on(monitor.monitor_cycle(&mut current, &mut contactor, &mut watchdog));
        assert!(matches!(outcome, CycleOutcome::Fault(_)));

        // the cell recovers, the monitor must not
        monitor.telemetry.link_mut().set_module_mv(0, SimulatedChain::NOMINAL_MV);
        for _ in 0..3 {
            let outcome =
                block_on(monitor.monitor_cycle(&mut current, &mut contactor, &mut watchdog));
            assert_eq!(outcome, CycleOutcome::Faulted);
        }
        monitor.fault_tick(&mut watchdog);
        assert_eq!(contactor.closes, 0);
        assert_eq!(watchdog.pets, 5);
        assert_eq!(monitor.phase(), Phase::Fault);
    }

    #[test]
    fn overvoltage_calibrates_to_full() {
        let mut chain = SimulatedChain::nominal();
        chain.set_module_mv(17, 4001);
        let mut monitor = monitor(chain);
        block_on(monitor.set_soc(1234)).unwrap();

        let outcome = block_on(monitor.monitor_cycle(
            &mut FixedCurrent::milliamps(0),
            &mut RecordingContactor::default(),
            &mut CountingWatchdog::default(),
        ));
        let CycleOutcome::Fault(report) = outcome else {
            panic!("expected a fault");
        };
        block_on(monitor.enter_fault(
            &report,
            &mut RecordingContactor::default(),
            &mut RecordingIndicator::default(),
            &mut CountingWatchdog::default(),
        ));
        assert_eq!(monitor.snapshot().soc(), SOC_FULL);
        assert_eq!(logged(&mut monitor), [(FaultCategory::HighVoltage, std::vec![17])]);
    }

    #[test]
    fn charging_for_an_hour_adds_one_percent() {
        let mut monitor = monitor(SimulatedChain::nominal());
        block_on(monitor.set_soc(5000)).unwrap();
        let mut contactor = RecordingContactor::default();
        let mut watchdog = CountingWatchdog::default();
        let mut current = FixedCurrent::milliamps(1000);

        for _ in 0..36 {
            monitor.soc.ticks_mut().push(100 * HZ);
            let outcome =
                block_on(monitor.monitor_cycle(&mut current, &mut contactor, &mut watchdog));
            assert_eq!(outcome, CycleOutcome::Safe);
        }
        assert_eq!(monitor.snapshot().soc(), 5100);
    }

    #[test]
    fn high_current_logs_whole_amps() {
        let mut monitor = monitor(SimulatedChain::nominal());
        let mut current = FixedCurrent::milliamps(-470_500);
        let outcome = block_on(monitor.monitor_cycle(
            &mut current,
            &mut RecordingContactor::default(),
            &mut CountingWatchdog::default(),
        ));
        let CycleOutcome::Fault(report) = outcome else {
            panic!("expected a fault");
        };
        assert_eq!(report.aggregate(), Verdict::OverCurrent);
        block_on(monitor.enter_fault(
            &report,
            &mut RecordingContactor::default(),
            &mut RecordingIndicator::default(),
            &mut CountingWatchdog::default(),
        ));
        // 470 A saturates below the terminator
        assert_eq!(logged(&mut monitor), [(FaultCategory::HighCurrent, std::vec![0xfe])]);
    }

    #[test]
    fn override_keeps_an_undervolted_pack_running() {
        let mut chain = SimulatedChain::nominal();
        chain.set_module_mv(5, 2500);
        let mut monitor = monitor(chain);
        monitor.set_undervoltage_override(true);
        let mut contactor = RecordingContactor::default();

        let outcome = block_on(monitor.monitor_cycle(
            &mut FixedCurrent::milliamps(-1_000),
            &mut contactor,
            &mut CountingWatchdog::default(),
        ));
        assert_eq!(outcome, CycleOutcome::Safe);
        assert!(contactor.closed);
        assert_eq!(monitor.snapshot().verdict(), Verdict::Undervoltage);
    }

    #[test]
    fn dead_current_sensor_faults() {
        let mut monitor = monitor(SimulatedChain::nominal());
        let outcome = block_on(monitor.monitor_cycle(
            &mut FixedCurrent::failed(),
            &mut RecordingContactor::default(),
            &mut CountingWatchdog::default(),
        ));
        let CycleOutcome::Fault(report) = outcome else {
            panic!("expected a fault");
        };
        let summary = block_on(monitor.enter_fault(
            &report,
            &mut RecordingContactor::default(),
            &mut RecordingIndicator::default(),
            &mut CountingWatchdog::default(),
        ));
        // only the code, there is no magnitude to record
        assert_eq!(summary.entries_logged, 1);
        assert_eq!(logged(&mut monitor), [(FaultCategory::HighCurrent, Vec::new())]);
    }

    #[test]
    fn unconfigured_chain_is_danger_not_a_crash() {
        let mut chain = SimulatedChain::nominal();
        chain.corrupt_board = Some(2);
        let mut monitor = monitor(chain);

        let outcome = block_on(monitor.monitor_cycle(
            &mut FixedCurrent::milliamps(0),
            &mut RecordingContactor::default(),
            &mut CountingWatchdog::default(),
        ));
        let CycleOutcome::Fault(report) = outcome else {
            panic!("expected a fault");
        };
        assert_eq!(report.aggregate(), Verdict::Danger);
        assert_eq!(
            report.modules_in_danger(FaultCategory::VoltageMisc),
            [true; NUM_MODULES]
        );
    }

    #[test]
    fn store_failures_are_absorbed() {
        let mut chain = SimulatedChain::nominal();
        chain.set_module_mv(8, 2000);
        let mut monitor = monitor(chain);
        monitor.log.store_mut().fail_writes = true;
        let mut contactor = RecordingContactor::default();

        let outcome = block_on(monitor.monitor_cycle(
            &mut FixedCurrent::milliamps(0),
            &mut contactor,
            &mut CountingWatchdog::default(),
        ));
        let CycleOutcome::Fault(report) = outcome else {
            panic!("expected a fault");
        };
        let summary = block_on(monitor.enter_fault(
            &report,
            &mut contactor,
            &mut RecordingIndicator::default(),
            &mut CountingWatchdog::default(),
        ));
        assert_eq!(summary.store_failures, 2);
        assert_eq!(summary.entries_logged, 0);
        assert!(!contactor.closed);
        assert_eq!(monitor.log.pointer(LogRegion::FaultCodes), FAULT_CODE_BASE);
    }

    #[test]
    fn fault_sequence_pets_between_store_writes() {
        let mut chain = SimulatedChain::nominal();
        for module in 0..NUM_MODULES {
            chain.set_module_mv(module, 2000);
        }
        for board in 0..NUM_BOARDS {
            for sensor in 0..TEMP_SENSORS_PER_BOARD {
                // well above the charging limit
                chain.set_sensor_mv(board, sensor, 1200.0);
            }
        }
        let mut monitor = monitor(chain);
        let journal = Journal::default();
        monitor.log.store_mut().journal = Some(journal.clone());
        let mut watchdog = CountingWatchdog {
            journal: Some(journal.clone()),
            ..CountingWatchdog::default()
        };
        let mut current = FixedCurrent::milliamps(5_000);

        let outcome = block_on(monitor.monitor_cycle(
            &mut current,
            &mut RecordingContactor::default(),
            &mut watchdog,
        ));
        let CycleOutcome::Fault(report) = outcome else {
            panic!("expected a fault");
        };
        journal.clear();
        let summary = block_on(monitor.enter_fault(
            &report,
            &mut RecordingContactor::default(),
            &mut RecordingIndicator::default(),
            &mut watchdog,
        ));
        assert_eq!(summary.categories, 2);
        assert_eq!(summary.entries_logged, 2 + 2 * NUM_MODULES);

        let steps = journal.steps();
        let writes = steps.iter().filter(|&&s| s == Step::StoreWrite).count();
        assert_eq!(writes, 1 + 2 * summary.entries_logged);
        // one page write for the SoC, then an entry and its pointer
        let longest_run = steps
            .split(|&s| s == Step::Pet)
            .map(|run| run.len())
            .max()
            .unwrap_or(0);
        assert!(longest_run <= 2, "{longest_run} writes without a pet");
        assert_eq!(steps.last(), Some(&Step::Pet));
    }

    #[test]
    fn unsafe_cycle_opens_before_touching_the_store() {
        let mut chain = SimulatedChain::nominal();
        chain.set_module_mv(4, 4100);
        let mut monitor = monitor(chain);
        block_on(monitor.set_soc(5000)).unwrap();
        let journal = Journal::default();
        monitor.log.store_mut().journal = Some(journal.clone());
        let mut contactor = RecordingContactor {
            closed: true,
            journal: Some(journal.clone()),
            ..RecordingContactor::default()
        };

        // a full percent of charge is due this cycle
        monitor.soc.ticks_mut().push(3600 * HZ);
        let outcome = block_on(monitor.monitor_cycle(
            &mut FixedCurrent::milliamps(1000),
            &mut contactor,
            &mut CountingWatchdog::default(),
        ));
        assert!(matches!(outcome, CycleOutcome::Fault(_)));
        assert_eq!(journal.steps(), [Step::ContactorOpen, Step::StoreWrite]);
        assert_eq!(block_on(soc::load_persisted(monitor.log.store_mut())), Ok(5100));
    }

    #[test]
    fn operator_requests_are_refused_after_a_trip() {
        let mut chain = SimulatedChain::nominal();
        chain.set_module_mv(6, 2000);
        let mut monitor = monitor(chain);
        assert_eq!(
            block_on(monitor.apply(OperatorRequest::SetStateOfCharge(4000))),
            Ok(())
        );

        let outcome = block_on(monitor.monitor_cycle(
            &mut FixedCurrent::milliamps(0),
            &mut RecordingContactor::default(),
            &mut CountingWatchdog::default(),
        ));
        let CycleOutcome::Fault(report) = outcome else {
            panic!("expected a fault");
        };
        block_on(monitor.enter_fault(
            &report,
            &mut RecordingContactor::default(),
            &mut RecordingIndicator::default(),
            &mut CountingWatchdog::default(),
        ));
        let evidence = logged(&mut monitor);
        assert_eq!(evidence, [(FaultCategory::LowVoltage, std::vec![6])]);

        for request in [
            OperatorRequest::ResetFaultLog,
            OperatorRequest::SetStateOfCharge(9000),
            OperatorRequest::SetUndervoltageOverride(true),
        ] {
            assert_eq!(block_on(monitor.apply(request)), Err(OperatorError::Faulted));
        }
        assert_eq!(logged(&mut monitor), evidence);
        assert_eq!(monitor.snapshot().soc(), 0);
        assert!(!monitor.undervoltage_override());
    }

    #[test]
    fn balancing_plan_follows_the_last_cycle() {
        let mut chain = SimulatedChain::nominal();
        chain.set_module_mv(12, 2500);
        let mut monitor = monitor(chain);
        monitor.set_undervoltage_override(true);

        let outcome = block_on(monitor.monitor_cycle(
            &mut FixedCurrent::milliamps(0),
            &mut RecordingContactor::default(),
            &mut CountingWatchdog::default(),
        ));
        assert_eq!(outcome, CycleOutcome::Safe);
        let plan = monitor.balancing_plan();
        assert_eq!(plan[12], BalancingAction::ChargeMin);
        assert!(
            plan.iter()
                .enumerate()
                .all(|(m, &a)| m == 12 || a == BalancingAction::Hold)
        );
    }

    #[test]
    fn watchdog_reset_locks_out_and_is_logged() {
        let mut monitor = monitor(SimulatedChain::nominal());
        let watchdog = CountingWatchdog {
            prior_reset: true,
            ..CountingWatchdog::default()
        };
        let mut indicator = RecordingIndicator::default();

        assert_eq!(block_on(monitor.startup_gate(&watchdog, &mut indicator)), Startup::Lockout);
        assert_eq!(indicator.shown, [Indication::WatchdogLockout]);
        assert_eq!(logged(&mut monitor), [(FaultCategory::Watchdog, Vec::new())]);

        let clean = CountingWatchdog::default();
        assert_eq!(block_on(monitor.startup_gate(&clean, &mut indicator)), Startup::Proceed);
    }

    #[test]
    fn operator_requests_persist() {
        let mut monitor = monitor(SimulatedChain::nominal());
        block_on(monitor.set_soc(4321)).unwrap();
        block_on(monitor.log.log_error(FaultCategory::CanBus)).unwrap();
        block_on(monitor.reset_fault_log()).unwrap();
        assert!(logged(&mut monitor).is_empty());

        let store = core::mem::take(monitor.log.store_mut());
        let restarted = monitor_with(SimulatedChain::nominal(), store);
        assert_eq!(restarted.snapshot().soc(), 4321);
    }
}
