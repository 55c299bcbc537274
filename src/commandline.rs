use crate::mqtt;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use evtvbms_lib::engine::{AverageWindow, PackConfig};
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Print every decoded telemetry frame to the standard output
    Dump,
    /// Run in daemon mode: decode frames, derive metrics and publish them
    Daemon {
        /// Output destination for metrics
        #[command(subcommand)]
        output: DaemonOutput,
        /// Sampling period of the short rolling power average (e.g., "10s")
        #[clap(long, value_parser = humantime::parse_duration, default_value = "10s")]
        short_sample: Duration,
        /// Number of samples kept by the short rolling average window
        #[clap(long, default_value = "30")]
        short_window: usize,
        /// Sampling period of the long rolling power average (e.g., "1m")
        #[clap(long, value_parser = humantime::parse_duration, default_value = "1m")]
        long_sample: Duration,
        /// Number of samples kept by the long rolling average window
        #[clap(long, default_value = "60")]
        long_window: usize,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, PartialEq)]
pub enum MqttFormat {
    Simple,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously print metric updates to the standard output (console).
    Console,
    /// Continuously publish metric updates to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = mqtt::MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
        /// Output format for MQTT messages
        #[arg(long, value_enum, default_value_t = MqttFormat::Simple)]
        format: MqttFormat,
    },
}

const fn about_text() -> &'static str {
    "EVTV Tesla BMS telemetry command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// UDP port the BMS controller broadcasts its telemetry to
    #[arg(short, long, default_value_t = 8500)]
    pub port: u16,

    /// Device name used to identify this pack in published updates
    #[arg(short, long, default_value = "tesla-bms")]
    pub name: String,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Usable pack capacity in kWh
    #[arg(long, default_value_t = 22.0)]
    pub pack_capacity: f64,

    /// Number of cells in series (informational)
    #[arg(long, default_value_t = 96)]
    pub cells_in_series: u16,

    /// Lower cell voltage bound in volts (informational)
    #[arg(long, default_value_t = 3.0)]
    pub min_cell_volts: f64,

    /// Upper cell voltage bound in volts (informational)
    #[arg(long, default_value_t = 4.2)]
    pub max_cell_volts: f64,

    /// Expose the unscaled current word of the 0x150 frame as a metric
    #[arg(long, action)]
    pub expose_raw_current: bool,

    /// Socket read timeout between periodic-timer checks (e.g., "250ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "250ms")]
    pub timeout: Duration,
}

impl CliArgs {
    pub fn pack_config(&self) -> PackConfig {
        PackConfig {
            pack_capacity_kwh: self.pack_capacity,
            cells_in_series: self.cells_in_series,
            min_cell_volts: self.min_cell_volts,
            max_cell_volts: self.max_cell_volts,
            expose_raw_current: self.expose_raw_current,
            ..PackConfig::default()
        }
    }
}

impl CliCommands {
    /// The rolling-average windows a daemon invocation asked for.
    pub fn windows(&self) -> Vec<AverageWindow> {
        match self {
            CliCommands::Daemon {
                short_sample,
                short_window,
                long_sample,
                long_window,
                ..
            } => vec![
                AverageWindow::new("short", *short_sample, *short_window),
                AverageWindow::new("long", *long_sample, *long_window),
            ],
            CliCommands::Dump => Vec::new(),
        }
    }
}
