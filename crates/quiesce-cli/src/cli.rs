//! CLI argument types for the `quiesce` binary.
//!
//! Kept out of `main.rs` so tests can parse them directly.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use quiesce_core::app::DetectorConfig;
use quiesce_core::domain::Heartbeat;

/// quiesce: distributed process termination detector.
#[derive(Parser, Debug)]
#[command(name = "quiesce", version)]
pub struct Cli {
    /// Enable debug logging (overrides RUST_LOG).
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API over an in-memory task store.
    Serve(ServeArgs),
    /// Register a task or send a heartbeat.
    Register(RegisterArgs),
    /// Report a task as completed.
    Complete(TaskArgs),
    /// Print the status of a process as JSON.
    Status(StatusArgs),
}

/// Arguments for `quiesce serve`.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "QUIESCE_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// How long a task record stays visible after its last write.
    #[arg(long, env = "QUIESCE_RETENTION", default_value = "168h", value_parser = parse_duration)]
    pub retention: Duration,

    /// A pending task silent for longer than this is flagged stuck.
    #[arg(
        long,
        env = "QUIESCE_STALENESS_THRESHOLD",
        default_value = "1h",
        value_parser = parse_duration
    )]
    pub staleness_threshold: Duration,

    /// How often expired records are purged from memory.
    #[arg(long, env = "QUIESCE_REAPER_INTERVAL", default_value = "5m", value_parser = parse_duration)]
    pub reaper_interval: Duration,
}

impl ServeArgs {
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            retention: self.retention,
            staleness_threshold: self.staleness_threshold,
            reaper_interval: self.reaper_interval,
            ..Default::default()
        }
    }
}

/// Where the client subcommands send their requests.
#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Base URL of a running `quiesce serve`.
    #[arg(long, env = "QUIESCE_URL", default_value = "http://127.0.0.1:8080")]
    pub url: String,

    /// Per-request timeout.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub timeout: Duration,
}

/// Arguments for `quiesce complete`.
#[derive(Args, Debug)]
pub struct TaskArgs {
    pub process_id: String,
    pub task_id: String,

    #[command(flatten)]
    pub client: ClientArgs,
}

/// Arguments for `quiesce register`.
#[derive(Args, Debug)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub task: TaskArgs,

    /// Report time (RFC 3339). Defaults to the server's clock.
    #[arg(long)]
    pub reported_at: Option<DateTime<Utc>>,

    /// Instant (RFC 3339) after which this task counts as stuck if it has not
    /// reported again. Defaults to the server's staleness threshold.
    #[arg(long)]
    pub deadline: Option<DateTime<Utc>>,
}

impl RegisterArgs {
    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            reported_at: self.reported_at,
            deadline: self.deadline,
        }
    }
}

/// Arguments for `quiesce status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    pub process_id: String,

    #[command(flatten)]
    pub client: ClientArgs,
}

/// humantime durations (`168h`, `15m`, `1h 30m`).
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw).map_err(|err| format!("invalid duration '{raw}': {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn serve_defaults_match_detector_defaults() {
        let cli = Cli::try_parse_from(["quiesce", "serve"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.listen, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(args.detector_config(), DetectorConfig::default());
    }

    #[test]
    fn serve_accepts_humantime_durations() {
        let cli = Cli::try_parse_from([
            "quiesce",
            "serve",
            "--retention",
            "48h",
            "--staleness-threshold",
            "15m",
            "--reaper-interval",
            "30s",
        ])
        .unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = args.detector_config();
        assert_eq!(config.retention, Duration::from_secs(48 * 3600));
        assert_eq!(config.staleness_threshold, Duration::from_secs(900));
        assert_eq!(config.reaper_interval, Duration::from_secs(30));
    }

    #[test]
    fn bad_duration_is_rejected() {
        let err = Cli::try_parse_from(["quiesce", "serve", "--retention", "forever"]).unwrap_err();
        assert!(err.to_string().contains("invalid duration 'forever'"));
    }

    #[test]
    fn register_parses_ids_and_report_time() {
        let cli = Cli::try_parse_from([
            "quiesce",
            "--verbose",
            "register",
            "P1",
            "T1",
            "--reported-at",
            "2024-01-01T12:00:00Z",
            "--deadline",
            "2024-01-01T14:00:00Z",
            "--url",
            "http://detector:9000",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Register(args) = cli.command else {
            panic!("expected register");
        };
        assert_eq!(args.task.process_id, "P1");
        assert_eq!(args.task.task_id, "T1");
        assert_eq!(args.task.client.url, "http://detector:9000");
        assert_eq!(args.task.client.timeout, Duration::from_secs(10));
        assert_eq!(
            args.heartbeat(),
            Heartbeat::at(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
                .with_deadline(Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap())
        );
    }

    #[test]
    fn status_requires_a_process_id() {
        assert!(Cli::try_parse_from(["quiesce", "status"]).is_err());
    }
}
