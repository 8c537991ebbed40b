//! CLI entry point for `dao`.
//!
//! # Usage
//!
//! Start a log server:
//! ```bash
//! dao log-server --config config/logserver.toml
//! ```
//!
//! Run a component from its settings file and drive it:
//! ```bash
//! dao component --config config/component.toml
//! dao send --endpoint tcp://127.0.0.1:9000 exec Init
//! dao send --endpoint tcp://127.0.0.1:9000 state
//! ```

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dao_control::broker::Broker;
use dao_control::client::CommandClient;
use dao_control::component::{Component, ComponentBuilder};
use dao_control::config::{
    BrokerSettings, ComponentSettings, EgressMode, FileConfigLoader, LogServerSettings,
};
use dao_control::log_server::LogServer;
use dao_control::protocol::{self, Command, LogLevel, LogMessage};
use dao_control::signals;
use dao_control::tracing_setup::{self, OutputFormat, TracingConfig};
use dao_control::transport::{Context, Endpoint, Publisher, Subscriber, DEFAULT_HIGH_WATER_MARK};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "dao")]
#[command(about = "Component control plane and log/event broker", long_about = None)]
struct Cli {
    /// Console log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Console log format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay a pub/sub bus without persisting it
    Broker {
        #[arg(long, default_value = "tcp://*:5558")]
        ingress: Endpoint,
        #[arg(long, default_value = "tcp://*:5559")]
        egress: Endpoint,
        /// Connect the egress side instead of binding it
        #[arg(long)]
        connect_egress: bool,
    },

    /// Relay the log bus and persist every record to a rotating file
    LogServer {
        #[arg(long)]
        config: PathBuf,
    },

    /// Run a component from a settings file until SIGINT/SIGTERM
    Component {
        #[arg(long)]
        config: PathBuf,
    },

    /// Send one command to a component and print the reply
    Send {
        #[arg(long)]
        endpoint: Endpoint,
        #[arg(value_enum)]
        command: CliCommand,
        /// Command payload (transition, level, variable name, ...)
        #[arg(default_value = "")]
        payload: String,
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },

    /// Publish test log records onto a bus ingress
    Publish {
        #[arg(long, default_value = "tcp://127.0.0.1:5558")]
        endpoint: Endpoint,
        #[arg(long, default_value_t = 10)]
        count: u64,
        #[arg(long, default_value = "dao-cli")]
        component: String,
        #[arg(long, default_value = "INFO")]
        level: String,
    },

    /// Print log records from a bus egress
    Listen {
        #[arg(long, default_value = "tcp://127.0.0.1:5559")]
        endpoint: Endpoint,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliCommand {
    Exec,
    Ping,
    State,
    Dump,
    Other,
    Query,
    SetLogLevel,
}

impl From<CliCommand> for Command {
    fn from(value: CliCommand) -> Self {
        match value {
            CliCommand::Exec => Command::Exec,
            CliCommand::Ping => Command::Ping,
            CliCommand::State => Command::State,
            CliCommand::Dump => Command::Dump,
            CliCommand::Other => Command::Other,
            CliCommand::Query => Command::Query,
            CliCommand::SetLogLevel => Command::SetLogLevel,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = tracing_setup::parse_log_level(&cli.log_level)?;
    let format: OutputFormat = cli.log_format.parse()?;
    tracing_setup::init(TracingConfig::new(level).with_format(format))?;

    match cli.command {
        Commands::Broker {
            ingress,
            egress,
            connect_egress,
        } => run_broker(ingress, egress, connect_egress),
        Commands::LogServer { config } => run_log_server(config),
        Commands::Component { config } => run_component(config),
        Commands::Send {
            endpoint,
            command,
            payload,
            timeout_ms,
        } => send_command(&endpoint, command.into(), &payload, timeout_ms),
        Commands::Publish {
            endpoint,
            count,
            component,
            level,
        } => publish_records(&endpoint, count, &component, &level),
        Commands::Listen { endpoint } => listen(&endpoint),
    }
}

fn run_broker(ingress: Endpoint, egress: Endpoint, connect_egress: bool) -> Result<()> {
    let settings = BrokerSettings {
        ingress,
        egress,
        egress_mode: if connect_egress {
            EgressMode::Connect
        } else {
            EgressMode::Bind
        },
        ..Default::default()
    };
    let mut broker = Broker::new(settings)?;

    let signal_ctx = Context::with_io_threads(1)?;
    signals::cancel_on_signal(&signal_ctx, broker.shutdown_handle());

    let stats = broker.run()?;
    broker.term();
    signal_ctx.term();
    tracing::info!(frames = stats.frames_relayed, "broker stopped");
    Ok(())
}

fn run_log_server(config: PathBuf) -> Result<()> {
    let settings = LogServerSettings::load_from(&config)
        .with_context(|| format!("loading {}", config.display()))?;
    let server = LogServer::new(settings)?;
    server.install_signal_handlers()?;
    let stats = server.run()?;
    tracing::info!(
        frames = stats.relay.frames_relayed,
        lines = stats.lines_written,
        skipped = stats.undecodable,
        "log server finished"
    );
    Ok(())
}

fn run_component(config: PathBuf) -> Result<()> {
    let settings = ComponentSettings::load_from(&config)
        .with_context(|| format!("loading {}", config.display()))?;
    settings.validate()?;

    let component: Component = ComponentBuilder::from_settings(&settings)
        .config_loader(FileConfigLoader::new(&config))
        .build()?;
    component.variables().set("config", config.display());

    let ctx = Context::with_io_threads(1)?;
    ctx.block_on(signals::shutdown_signal());
    component.stop()?;
    ctx.term();
    Ok(())
}

fn send_command(endpoint: &Endpoint, command: Command, payload: &str, timeout_ms: u64) -> Result<()> {
    let mut client = CommandClient::connect_with_timeout(endpoint, Duration::from_millis(timeout_ms))
        .with_context(|| format!("connecting to {endpoint}"))?;
    let reply = client.send(command, payload)?;
    if reply.is_success() {
        println!("SUCCESS {}", reply.text());
        Ok(())
    } else {
        bail!("FAILURE {}", reply.text())
    }
}

fn publish_records(endpoint: &Endpoint, count: u64, component: &str, level: &str) -> Result<()> {
    let level: LogLevel = level.parse()?;
    let ctx = Context::with_io_threads(1)?;
    let publisher = Publisher::connect(&ctx, endpoint, DEFAULT_HIGH_WATER_MARK);
    let machine = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    for frame_number in 0..count {
        let record = LogMessage::now(
            machine.as_str(),
            component,
            level,
            format!("test record {frame_number}"),
        )
        .with_frame_number(frame_number);
        publisher.send(protocol::encode(&record));
    }

    // queued frames go out once the link is up
    std::thread::sleep(Duration::from_millis(500));
    publisher.close();
    drop(publisher);
    ctx.term();
    Ok(())
}

fn listen(endpoint: &Endpoint) -> Result<()> {
    let ctx = Context::new()?;
    let mut subscriber = Subscriber::connect(&ctx, endpoint, DEFAULT_HIGH_WATER_MARK);
    let token = tokio_util::sync::CancellationToken::new();
    signals::cancel_on_signal(&ctx, token.clone());

    while !token.is_cancelled() {
        if let Some(frame) = subscriber.recv_timeout(Duration::from_millis(200))? {
            match protocol::decode::<LogMessage>(&frame) {
                Ok(record) => println!("{}", record.format_line()),
                Err(e) => tracing::warn!(error = %e, bytes = frame.len(), "not a log message"),
            }
        }
    }
    subscriber.close();
    drop(subscriber);
    ctx.term();
    Ok(())
}
