use crate::config::{AppConfig, Overrides};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Query one parallel unit once and print the decoded reading as JSON
    Query {
        /// Parallel unit id (the N of QPGSn)
        #[arg(long, short, default_value_t = 0)]
        unit: u8,
    },
    /// Poll every configured unit once and print readings and system totals
    Once,
    /// Run in daemon mode, polling the cluster every cycle and outputting the results
    Daemon {
        /// Output destination for readings
        #[command(subcommand)]
        output: DaemonOutput,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum MqttFormat {
    /// One topic per published key
    Simple,
    /// One JSON document per unit and one for the totals
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously poll the cluster and print the results to the standard output (console).
    Console,
    /// Continuously poll the cluster and publish the results to the MQTT broker from the config file.
    Mqtt {
        /// Output format for MQTT messages
        #[arg(long, value_enum, default_value_t = MqttFormat::Json)]
        format: MqttFormat,
    },
}

const fn about_text() -> &'static str {
    "axpert parallel inverter monitor"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Configuration file, re-read before every poll cycle
    #[arg(short, long, default_value = AppConfig::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Serial bridge host, overrides `inverter1_tcp_ip`
    #[arg(long)]
    pub host: Option<String>,

    /// Serial bridge port, overrides `inverter1_tcp_port`
    #[arg(long)]
    pub port: Option<u16>,

    /// Reply timeout (e.g., "500ms", "5s"), overrides `read_timeout_ms`
    #[arg(value_parser = humantime::parse_duration, long)]
    pub timeout: Option<Duration>,

    /// Comma-separated parallel unit ids to poll (e.g., 0,1,2), overrides `units`
    #[arg(long, use_value_delimiter = true)]
    pub units: Option<Vec<u8>>,

    /// Directory for the rotating log files
    #[arg(long, default_value = "log")]
    pub log_dir: PathBuf,

    /// Log to stdout only
    #[arg(long)]
    pub no_log_file: bool,
}

impl CliArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            timeout: self.timeout,
            units: self.units.clone(),
        }
    }
}
