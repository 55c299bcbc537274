//! Derived-metric accumulation for one BMS device.
//!
//! A [`MetricsEngine`] consumes decoded [`Telemetry`] frames plus elapsed
//! monotonic time and maintains the full metric mapping surfaced to the
//! outbound layer: pack energy, charge/discharge classification, power split,
//! energy integration, rolling power averages, runtime estimates and
//! utility-meter style periodic counters.
//!
//! The engine is single-writer: frame arrival and timer ticks must be
//! serialized onto the same instance. Every entry point completes in bounded
//! time and none of them can fail.

use crate::protocol::{CellStats, ChargerLimits, PackFlow, PackVoltage, Soc, Telemetry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

/// Metric names published by the engine.
///
/// Periodic counters append a period label, e.g. `charge_energy_day`;
/// rolling averages append a window label, e.g. `power_average_short`.
pub mod metric {
    pub const STATE_OF_CHARGE: &str = "state_of_charge";
    pub const CURRENT: &str = "current";
    pub const POWER: &str = "power";
    pub const VOLTS: &str = "volts";
    pub const LOWEST_CELL: &str = "lowest_cell";
    pub const HIGHEST_CELL: &str = "highest_cell";
    pub const AVERAGE_CELL: &str = "average_cell";
    pub const MAX_CELLS: &str = "max_cells";
    pub const ACTIVE_CELLS: &str = "active_cells";
    pub const FREQ_SHIFT_VOLTS: &str = "freq_shift_volts";
    pub const TCCH_AMPS: &str = "tcch_amps";
    pub const RAW_CURRENT: &str = "raw_current";
    pub const BATTERY_PACK_ENERGY: &str = "battery_pack_energy";
    pub const BATTERY_STATUS: &str = "battery_status";
    pub const BATTERY_SUMMARY: &str = "battery_summary";
    pub const CHARGE_POWER: &str = "charge_power";
    pub const DISCHARGE_POWER: &str = "discharge_power";
    pub const CHARGE_ENERGY: &str = "charge_energy";
    pub const DISCHARGE_ENERGY: &str = "discharge_energy";
    pub const CELL_DIFFERENCE: &str = "cell_difference";
    pub const TRIGGER_CELL_VOLTAGE: &str = "trigger_cell_voltage";
    pub const HOURS_TO_EMPTY: &str = "hours_to_empty";
    pub const HOURS_TO_FULL: &str = "hours_to_full";
    pub const POWER_AVERAGE_PREFIX: &str = "power_average_";
}

/// One metric value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Float(f64),
    Int(i64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Charge-state classification derived from pack current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryStatus {
    Charging,
    Discharging,
    Idle,
}

impl BatteryStatus {
    /// Thresholds are in decoded amps, where positive reads as charging.
    fn from_current(amps: f64) -> Self {
        if amps > 1.0 {
            BatteryStatus::Charging
        } else if amps < -1.0 {
            BatteryStatus::Discharging
        } else {
            BatteryStatus::Idle
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatteryStatus::Charging => "Charging",
            BatteryStatus::Discharging => "Discharging",
            BatteryStatus::Idle => "Idle",
        }
    }
}

/// Pack parameters supplied at device-creation time, immutable afterwards.
///
/// The capability flags unify the behavioral drift observed across controller
/// firmware revisions instead of varying behavior by build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    /// Usable pack capacity in kWh.
    pub pack_capacity_kwh: f64,
    /// Number of cells in series (informational).
    pub cells_in_series: u16,
    /// Lower cell voltage bound in volts (informational).
    pub min_cell_volts: f64,
    /// Upper cell voltage bound in volts (informational).
    pub max_cell_volts: f64,
    /// Expose the unscaled 0x150 current word as a metric.
    pub expose_raw_current: bool,
    /// Derive the SOC-dependent trigger cell voltage.
    pub trigger_cell: bool,
    /// Integrate power over time into charge/discharge energy.
    pub integrate_energy: bool,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            pack_capacity_kwh: 22.0,
            cells_in_series: 96,
            min_cell_volts: 3.0,
            max_cell_volts: 4.2,
            expose_raw_current: false,
            trigger_cell: true,
            integrate_energy: true,
        }
    }
}

/// Definition of one rolling power-average window.
#[derive(Debug, Clone, PartialEq)]
pub struct AverageWindow {
    /// Label appended to the metric name, e.g. `short`.
    pub label: String,
    /// How often the daemon samples the latest power into this window.
    pub sample_every: Duration,
    /// Fixed FIFO capacity; the oldest sample is evicted first.
    pub capacity: usize,
}

impl AverageWindow {
    pub fn new(label: &str, sample_every: Duration, capacity: usize) -> Self {
        Self {
            label: label.to_string(),
            sample_every,
            capacity: capacity.max(1),
        }
    }

    /// A short window for responsive estimates and a long one for trends.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("short", Duration::from_secs(10), 30),
            Self::new("long", Duration::from_secs(60), 60),
        ]
    }

    pub fn metric_name(&self) -> String {
        format!("{}{}", metric::POWER_AVERAGE_PREFIX, self.label)
    }
}

/// Calendar-style reset period of a utility-meter counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterPeriod {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl MeterPeriod {
    pub const ALL: [MeterPeriod; 5] = [
        MeterPeriod::Hour,
        MeterPeriod::Day,
        MeterPeriod::Week,
        MeterPeriod::Month,
        MeterPeriod::Year,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MeterPeriod::Hour => "hour",
            MeterPeriod::Day => "day",
            MeterPeriod::Week => "week",
            MeterPeriod::Month => "month",
            MeterPeriod::Year => "year",
        }
    }

    /// Reset interval; months and years use the fixed 30/365-day convention.
    pub fn interval(self) -> Duration {
        match self {
            MeterPeriod::Hour => Duration::from_secs(60 * 60),
            MeterPeriod::Day => Duration::from_secs(24 * 60 * 60),
            MeterPeriod::Week => Duration::from_secs(7 * 24 * 60 * 60),
            MeterPeriod::Month => Duration::from_secs(30 * 24 * 60 * 60),
            MeterPeriod::Year => Duration::from_secs(365 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Default)]
struct EnergyAccumulator {
    charge_kwh: f64,
    discharge_kwh: f64,
    last_update: Option<Instant>,
}

#[derive(Debug)]
struct WindowState {
    window: AverageWindow,
    samples: VecDeque<f64>,
}

#[derive(Debug)]
struct MeterState {
    base: &'static str,
    period: MeterPeriod,
    baseline: f64,
}

impl MeterState {
    fn metric_name(&self) -> String {
        format!("{}_{}", self.base, self.period.label())
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn format_hours(hours: f64) -> String {
    if hours < 10.0 {
        format!("{hours:.1}")
    } else {
        format!("{hours:.0}")
    }
}

/// Per-device metric accumulator.
///
/// Created once when a device is configured and kept for the lifetime of its
/// monitoring session. All state starts cold; [`MetricsEngine::restore`] can
/// pre-seed last-known values before the first frame.
#[derive(Debug)]
pub struct MetricsEngine {
    config: PackConfig,
    values: BTreeMap<String, Value>,
    energy: EnergyAccumulator,
    windows: Vec<WindowState>,
    meters: Vec<MeterState>,
    latest_average: f64,
    status: BatteryStatus,
}

impl MetricsEngine {
    pub fn new(config: PackConfig, windows: Vec<AverageWindow>) -> Self {
        let windows = windows
            .into_iter()
            .map(|window| WindowState {
                window,
                samples: VecDeque::new(),
            })
            .collect();
        let meters = [metric::CHARGE_ENERGY, metric::DISCHARGE_ENERGY]
            .into_iter()
            .flat_map(|base| {
                MeterPeriod::ALL.into_iter().map(move |period| MeterState {
                    base,
                    period,
                    baseline: 0.0,
                })
            })
            .collect();
        Self {
            config,
            values: BTreeMap::new(),
            energy: EnergyAccumulator::default(),
            windows,
            meters,
            latest_average: 0.0,
            status: BatteryStatus::Idle,
        }
    }

    /// The full current metric mapping.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Pre-seeds last-known values restored by an external persistence layer.
    ///
    /// Restored entries are plain merges; accumulators and windows stay cold.
    pub fn restore(&mut self, values: BTreeMap<String, Value>) {
        self.values.extend(values);
    }

    /// Applies one decoded frame at monotonic time `now` and returns the full
    /// mapping. Never fails; fields absent from the frame leave their derived
    /// values untouched.
    pub fn apply(&mut self, telemetry: &Telemetry, now: Instant) -> &BTreeMap<String, Value> {
        match telemetry {
            Telemetry::Soc(soc) => self.apply_soc(soc),
            Telemetry::CellStats(cells) => self.apply_cell_stats(cells),
            Telemetry::PackFlow(flow) => self.apply_pack_flow(flow, now),
            Telemetry::ChargerLimits(limits) => self.apply_charger_limits(limits),
            Telemetry::PackVoltage(pack) => self.apply_pack_voltage(pack),
        }
        self.refresh_estimates();
        &self.values
    }

    /// Samples the latest power into the named rolling window and republishes
    /// its mean. Driven by a timer, not by frame arrival.
    pub fn sample_average(&mut self, label: &str) -> &BTreeMap<String, Value> {
        let power = self.get_f64(metric::POWER);
        if let Some(power) = power {
            match self.windows.iter_mut().find(|w| w.window.label == label) {
                Some(state) => {
                    state.samples.push_back(power);
                    while state.samples.len() > state.window.capacity {
                        state.samples.pop_front();
                    }
                    let mean = state.samples.iter().sum::<f64>() / state.samples.len() as f64;
                    let name = state.window.metric_name();
                    self.latest_average = mean;
                    self.values.insert(name, Value::Float(round_to(mean, 1)));
                }
                None => log::debug!("No rolling average window labeled '{label}'"),
            }
        }
        self.refresh_estimates();
        &self.values
    }

    /// Re-baselines every counter of the given period: the current cumulative
    /// energy becomes the new reference and the counter restarts at zero.
    /// Driven by a timer, never by measurement arrival.
    pub fn meter_tick(&mut self, period: MeterPeriod) -> &BTreeMap<String, Value> {
        for meter in &mut self.meters {
            if meter.period != period {
                continue;
            }
            meter.baseline = match meter.base {
                metric::CHARGE_ENERGY => self.energy.charge_kwh,
                _ => self.energy.discharge_kwh,
            };
            self.values.insert(meter.metric_name(), Value::Float(0.0));
        }
        &self.values
    }

    fn set(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    fn get_f64(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Value::as_f64)
    }

    fn apply_soc(&mut self, soc: &Soc) {
        let pct = soc.state_of_charge;
        self.set(metric::STATE_OF_CHARGE, Value::Float(pct));
        self.set(
            metric::BATTERY_PACK_ENERGY,
            Value::Float(round_to(self.config.pack_capacity_kwh * pct / 100.0, 2)),
        );
        if self.config.trigger_cell {
            // High cell matters near full, low cell near empty, the average
            // otherwise. First matching tier wins.
            let cell = if pct >= 75.0 && self.values.contains_key(metric::HIGHEST_CELL) {
                self.get_f64(metric::HIGHEST_CELL)
            } else if pct <= 25.0 && self.values.contains_key(metric::LOWEST_CELL) {
                self.get_f64(metric::LOWEST_CELL)
            } else {
                self.get_f64(metric::AVERAGE_CELL)
            };
            if let Some(cell) = cell {
                self.set(metric::TRIGGER_CELL_VOLTAGE, Value::Float(cell));
            }
        }
    }

    fn apply_cell_stats(&mut self, cells: &CellStats) {
        self.set(metric::LOWEST_CELL, Value::Float(cells.lowest_cell));
        self.set(metric::HIGHEST_CELL, Value::Float(cells.highest_cell));
        self.set(metric::AVERAGE_CELL, Value::Float(cells.average_cell));
        self.set(metric::MAX_CELLS, Value::Int(cells.max_cells as i64));
        self.set(metric::ACTIVE_CELLS, Value::Int(cells.active_cells as i64));
        self.set(
            metric::CELL_DIFFERENCE,
            Value::Float(round_to(cells.highest_cell - cells.lowest_cell, 4)),
        );
    }

    fn apply_pack_flow(&mut self, flow: &PackFlow, now: Instant) {
        self.set(metric::CURRENT, Value::Float(flow.current));
        self.set(metric::POWER, Value::Float(flow.power));
        self.set(metric::VOLTS, Value::Float(flow.volts));

        self.status = BatteryStatus::from_current(flow.current);
        self.set(
            metric::BATTERY_STATUS,
            Value::Text(self.status.as_str().to_string()),
        );

        let power = flow.power;
        self.set(
            metric::CHARGE_POWER,
            Value::Float(if power > 0.0 { power } else { 0.0 }),
        );
        self.set(
            metric::DISCHARGE_POWER,
            Value::Float(if power < 0.0 { power.abs() } else { 0.0 }),
        );

        if self.config.integrate_energy {
            // Monotonic elapsed time; a regressed timestamp contributes zero,
            // never negative energy.
            let delta_s = match self.energy.last_update {
                Some(previous) => now.saturating_duration_since(previous).as_secs_f64(),
                None => 0.0,
            };
            self.energy.last_update = Some(now);
            if power > 0.0 {
                self.energy.charge_kwh += power * delta_s / 3600.0 / 1000.0;
            } else if power < 0.0 {
                self.energy.discharge_kwh += power.abs() * delta_s / 3600.0 / 1000.0;
            }
            self.set(
                metric::CHARGE_ENERGY,
                Value::Float(round_to(self.energy.charge_kwh, 3)),
            );
            self.set(
                metric::DISCHARGE_ENERGY,
                Value::Float(round_to(self.energy.discharge_kwh, 3)),
            );
            self.refresh_meter_counters();
        }
    }

    fn apply_charger_limits(&mut self, limits: &ChargerLimits) {
        self.set(
            metric::FREQ_SHIFT_VOLTS,
            Value::Float(limits.freq_shift_volts),
        );
        self.set(metric::TCCH_AMPS, Value::Float(limits.tcch_amps));
    }

    fn apply_pack_voltage(&mut self, pack: &PackVoltage) {
        self.set(metric::VOLTS, Value::Float(pack.volts));
        if self.config.expose_raw_current {
            self.set(metric::RAW_CURRENT, Value::Int(pack.raw_current as i64));
        }
    }

    fn refresh_meter_counters(&mut self) {
        for meter in &self.meters {
            let cumulative = match meter.base {
                metric::CHARGE_ENERGY => self.energy.charge_kwh,
                _ => self.energy.discharge_kwh,
            };
            self.values.insert(
                meter.metric_name(),
                Value::Float(round_to(cumulative - meter.baseline, 3)),
            );
        }
    }

    /// Recomputes the runtime estimates and the summary line from the latest
    /// rolling average and classification. Zero averages short-circuit to the
    /// 0-hour sentinel instead of dividing.
    fn refresh_estimates(&mut self) {
        let average = self.latest_average;
        let available = self.get_f64(metric::BATTERY_PACK_ENERGY).unwrap_or(0.0);
        let (to_empty, to_full) = match self.status {
            BatteryStatus::Discharging if average != 0.0 => {
                (available / (average.abs() / 1000.0), 0.0)
            }
            BatteryStatus::Charging if average != 0.0 => (
                0.0,
                (self.config.pack_capacity_kwh - available) / (average.abs() / 1000.0),
            ),
            _ => (0.0, 0.0),
        };
        self.set(metric::HOURS_TO_EMPTY, Value::Float(round_to(to_empty, 1)));
        self.set(metric::HOURS_TO_FULL, Value::Float(round_to(to_full, 1)));

        let summary = match self.status {
            BatteryStatus::Discharging => format!("{} hrs to Empty", format_hours(to_empty)),
            BatteryStatus::Charging => format!("{} hrs to Full", format_hours(to_full)),
            BatteryStatus::Idle => "Idle".to_string(),
        };
        self.set(metric::BATTERY_SUMMARY, Value::Text(summary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CellStats, PackFlow, PackVoltage, Soc};

    fn engine() -> MetricsEngine {
        MetricsEngine::new(PackConfig::default(), AverageWindow::defaults())
    }

    fn soc(pct: f64) -> Telemetry {
        Telemetry::Soc(Soc {
            state_of_charge: pct,
        })
    }

    fn flow(current: f64, power: f64) -> Telemetry {
        Telemetry::PackFlow(PackFlow {
            current,
            power,
            volts: 0.0,
        })
    }

    fn cells(lowest: f64, highest: f64, average: f64) -> Telemetry {
        Telemetry::CellStats(CellStats {
            lowest_cell: lowest,
            highest_cell: highest,
            average_cell: average,
            max_cells: 96,
            active_cells: 96,
        })
    }

    fn f64_of(values: &BTreeMap<String, Value>, name: &str) -> f64 {
        values
            .get(name)
            .and_then(Value::as_f64)
            .unwrap_or_else(|| panic!("metric '{name}' missing or not numeric"))
    }

    #[test]
    fn test_pack_energy_from_soc() {
        let mut engine = engine();
        let values = engine.apply(&soc(50.0), Instant::now());
        assert_eq!(f64_of(values, metric::BATTERY_PACK_ENERGY), 11.0);
        assert_eq!(f64_of(values, metric::STATE_OF_CHARGE), 50.0);
    }

    #[test]
    fn test_status_thresholds() {
        let mut engine = engine();
        let now = Instant::now();
        for (current, expected) in [
            (1.5, "Charging"),
            (1.0, "Idle"),
            (-1.0, "Idle"),
            (0.0, "Idle"),
            (-1.5, "Discharging"),
        ] {
            let values = engine.apply(&flow(current, 0.0), now);
            assert_eq!(
                values.get(metric::BATTERY_STATUS),
                Some(&Value::Text(expected.to_string())),
                "current={current}"
            );
        }
    }

    #[test]
    fn test_power_split_is_non_negative() {
        let mut engine = engine();
        let now = Instant::now();
        let values = engine.apply(&flow(5.0, 1200.0), now);
        assert_eq!(f64_of(values, metric::CHARGE_POWER), 1200.0);
        assert_eq!(f64_of(values, metric::DISCHARGE_POWER), 0.0);

        let values = engine.apply(&flow(-5.0, -800.0), now);
        assert_eq!(f64_of(values, metric::CHARGE_POWER), 0.0);
        assert_eq!(f64_of(values, metric::DISCHARGE_POWER), 800.0);
    }

    #[test]
    fn test_zero_elapsed_integration_is_idempotent() {
        let mut engine = engine();
        let now = Instant::now();
        engine.apply(&flow(10.0, 1000.0), now);
        let first = f64_of(engine.values(), metric::CHARGE_ENERGY);
        let values = engine.apply(&flow(10.0, 1000.0), now);
        assert_eq!(f64_of(values, metric::CHARGE_ENERGY), first);
    }

    #[test]
    fn test_charge_energy_monotonic() {
        let mut engine = engine();
        let start = Instant::now();
        // 1 kW sustained over three 6-minute steps: +0.1 kWh each
        let mut previous = 0.0;
        for step in 0..4u64 {
            let values = engine.apply(&flow(10.0, 1000.0), start + Duration::from_secs(360 * step));
            let charge = f64_of(values, metric::CHARGE_ENERGY);
            assert!(charge >= previous);
            assert_eq!(f64_of(values, metric::DISCHARGE_ENERGY), 0.0);
            previous = charge;
        }
        assert_eq!(previous, 0.3);
    }

    #[test]
    fn test_clock_regression_adds_nothing() {
        let mut engine = engine();
        let start = Instant::now();
        engine.apply(&flow(10.0, 1000.0), start);
        engine.apply(&flow(10.0, 1000.0), start + Duration::from_secs(600));
        let before = f64_of(engine.values(), metric::CHARGE_ENERGY);
        assert!(before > 0.0);
        // earlier timestamp than the previous update
        let values = engine.apply(&flow(10.0, 1000.0), start);
        assert_eq!(f64_of(values, metric::CHARGE_ENERGY), before);
    }

    #[test]
    fn test_cell_difference() {
        let mut engine = engine();
        let values = engine.apply(&cells(3.5, 4.1, 3.8), Instant::now());
        assert!((f64_of(values, metric::CELL_DIFFERENCE) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_trigger_cell_tiering() {
        let mut engine = engine();
        let now = Instant::now();
        engine.apply(&cells(3.5, 4.1, 3.8), now);

        let values = engine.apply(&soc(80.0), now);
        assert_eq!(f64_of(values, metric::TRIGGER_CELL_VOLTAGE), 4.1);

        let values = engine.apply(&soc(20.0), now);
        assert_eq!(f64_of(values, metric::TRIGGER_CELL_VOLTAGE), 3.5);

        let values = engine.apply(&soc(50.0), now);
        assert_eq!(f64_of(values, metric::TRIGGER_CELL_VOLTAGE), 3.8);
    }

    #[test]
    fn test_trigger_cell_skipped_without_cells() {
        let mut engine = engine();
        let values = engine.apply(&soc(80.0), Instant::now());
        assert!(!values.contains_key(metric::TRIGGER_CELL_VOLTAGE));
    }

    #[test]
    fn test_rolling_window_eviction() {
        let mut engine = MetricsEngine::new(
            PackConfig::default(),
            vec![AverageWindow::new("short", Duration::from_secs(10), 3)],
        );
        let now = Instant::now();
        for power in [100.0, 200.0, 300.0, 400.0] {
            engine.apply(&flow(0.0, power), now);
            engine.sample_average("short");
        }
        // capacity 3: the 100 W sample fell out, mean of 200/300/400
        let average = f64_of(engine.values(), "power_average_short");
        assert_eq!(average, 300.0);
        assert_eq!(engine.windows[0].samples.len(), 3);
    }

    #[test]
    fn test_sample_without_power_is_a_no_op() {
        let mut engine = engine();
        engine.sample_average("short");
        assert!(!engine.values().contains_key("power_average_short"));
    }

    #[test]
    fn test_hours_to_full_while_charging() {
        let mut engine = engine();
        let now = Instant::now();
        engine.apply(&soc(50.0), now); // 11 kWh available of 22
        engine.apply(&flow(10.0, 2000.0), now);
        let values = engine.sample_average("short");
        assert_eq!(f64_of(values, metric::HOURS_TO_FULL), 5.5);
        assert_eq!(f64_of(values, metric::HOURS_TO_EMPTY), 0.0);
        assert_eq!(
            values.get(metric::BATTERY_SUMMARY),
            Some(&Value::Text("5.5 hrs to Full".to_string()))
        );
    }

    #[test]
    fn test_hours_to_empty_while_discharging() {
        let mut engine = engine();
        let now = Instant::now();
        engine.apply(&soc(50.0), now);
        engine.apply(&flow(-10.0, -1000.0), now);
        let values = engine.sample_average("short");
        assert_eq!(f64_of(values, metric::HOURS_TO_EMPTY), 11.0);
        assert_eq!(f64_of(values, metric::HOURS_TO_FULL), 0.0);
        assert_eq!(
            values.get(metric::BATTERY_SUMMARY),
            Some(&Value::Text("11 hrs to Empty".to_string()))
        );
    }

    #[test]
    fn test_idle_short_circuits_estimates() {
        let mut engine = engine();
        let now = Instant::now();
        engine.apply(&soc(50.0), now);
        // idle current with nonzero sampled power
        engine.apply(&flow(0.5, 500.0), now);
        let values = engine.sample_average("short");
        assert_eq!(f64_of(values, metric::HOURS_TO_EMPTY), 0.0);
        assert_eq!(f64_of(values, metric::HOURS_TO_FULL), 0.0);
        assert_eq!(
            values.get(metric::BATTERY_SUMMARY),
            Some(&Value::Text("Idle".to_string()))
        );
    }

    #[test]
    fn test_zero_average_short_circuits_estimates() {
        // discharging but the window mean is exactly zero
        let mut engine = engine();
        let now = Instant::now();
        engine.apply(&soc(50.0), now);
        engine.apply(&flow(-10.0, 0.0), now);
        let values = engine.sample_average("short");
        assert_eq!(f64_of(values, metric::HOURS_TO_EMPTY), 0.0);
        assert_eq!(f64_of(values, metric::HOURS_TO_FULL), 0.0);
    }

    #[test]
    fn test_meter_rebaseline() {
        let mut engine = engine();
        let start = Instant::now();
        engine.apply(&flow(10.0, 1000.0), start);
        engine.apply(&flow(10.0, 1000.0), start + Duration::from_secs(3600));
        assert_eq!(f64_of(engine.values(), "charge_energy_hour"), 1.0);
        assert_eq!(f64_of(engine.values(), "charge_energy_day"), 1.0);

        engine.meter_tick(MeterPeriod::Hour);
        assert_eq!(f64_of(engine.values(), "charge_energy_hour"), 0.0);
        // other periods keep accumulating
        assert_eq!(f64_of(engine.values(), "charge_energy_day"), 1.0);

        engine.apply(&flow(10.0, 1000.0), start + Duration::from_secs(2 * 3600));
        assert_eq!(f64_of(engine.values(), "charge_energy_hour"), 1.0);
        assert_eq!(f64_of(engine.values(), "charge_energy_day"), 2.0);
    }

    #[test]
    fn test_raw_current_gated_by_capability() {
        let pack = Telemetry::PackVoltage(PackVoltage {
            volts: 385.9,
            raw_current: 1234,
        });
        let mut hidden = engine();
        let values = hidden.apply(&pack, Instant::now());
        assert_eq!(f64_of(values, metric::VOLTS), 385.9);
        assert!(!values.contains_key(metric::RAW_CURRENT));

        let mut exposed = MetricsEngine::new(
            PackConfig {
                expose_raw_current: true,
                ..PackConfig::default()
            },
            AverageWindow::defaults(),
        );
        let values = exposed.apply(&pack, Instant::now());
        assert_eq!(values.get(metric::RAW_CURRENT), Some(&Value::Int(1234)));
    }

    #[test]
    fn test_energy_integration_can_be_disabled() {
        let mut engine = MetricsEngine::new(
            PackConfig {
                integrate_energy: false,
                ..PackConfig::default()
            },
            AverageWindow::defaults(),
        );
        let start = Instant::now();
        engine.apply(&flow(10.0, 1000.0), start);
        let values = engine.apply(&flow(10.0, 1000.0), start + Duration::from_secs(3600));
        assert!(!values.contains_key(metric::CHARGE_ENERGY));
        assert!(!values.contains_key("charge_energy_hour"));
    }

    #[test]
    fn test_restore_preseeds_values() {
        let mut engine = engine();
        let mut seed = BTreeMap::new();
        seed.insert(metric::STATE_OF_CHARGE.to_string(), Value::Float(42.0));
        engine.restore(seed);
        assert_eq!(
            engine.values().get(metric::STATE_OF_CHARGE),
            Some(&Value::Float(42.0))
        );
    }

    #[test]
    fn test_summary_formats_large_hours_without_decimals() {
        assert_eq!(format_hours(9.96), "10.0");
        assert_eq!(format_hours(12.3), "12");
        assert_eq!(format_hours(3.14), "3.1");
    }
}
