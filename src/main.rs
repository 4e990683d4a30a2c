use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use log::{debug, info};
use serde::Serialize;
use std::path::PathBuf;
use tabled::{Table, Tabled};

use chargeamps::config::{load_config, resolve_config_path};
use chargeamps::types::{format_timestamp, parse_timestamp, ChargePointConnectorStatus};
use chargeamps::{ChargeAmpsApi, ChargeAmpsClient, ChargePoint, ChargingSession, Rfid, StartAuth};

#[derive(Parser)]
#[command(name = "chargeamps")]
#[command(about = "A CLI for managing Charge Amps charge points")]
#[command(version)]
struct Cli {
    /// Config file with username, password and api_key
    #[arg(long, env = "CHARGEAMPS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json, global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
}

#[derive(Clone, Copy, ValueEnum)]
enum Dimmer {
    Off,
    Low,
    Medium,
    High,
}

impl Dimmer {
    fn wire_value(self) -> &'static str {
        match self {
            Dimmer::Off => "Off",
            Dimmer::Low => "Low",
            Dimmer::Medium => "Medium",
            Dimmer::High => "High",
        }
    }
}

#[derive(Args)]
struct Target {
    /// ChargePoint ID (defaults to the first owned chargepoint)
    #[arg(long = "chargepoint", value_name = "ID")]
    chargepoint: Option<String>,

    /// Connector ID
    #[arg(long = "connector", value_name = "ID")]
    connector: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// List all chargepoints
    Chargepoints,
    /// Get chargepoint status
    Status {
        #[command(flatten)]
        target: Target,
    },
    /// Get chargepoint sessions
    Sessions {
        #[command(flatten)]
        target: Target,
        /// Charging session
        #[arg(long, value_name = "ID")]
        session: Option<u64>,
        /// Include sessions from timestamp
        #[arg(long, value_name = "TIMESTAMP")]
        start: Option<String>,
        /// Include sessions until timestamp
        #[arg(long, value_name = "TIMESTAMP")]
        end: Option<String>,
        /// Include sessions made during an ISO 8601 duration, e.g. P7D
        #[arg(long, value_name = "DURATION", conflicts_with_all = ["start", "end"])]
        duration: Option<String>,
    },
    /// Get chargepoint settings
    GetChargepoint {
        /// ChargePoint ID
        #[arg(long = "chargepoint", value_name = "ID")]
        chargepoint: Option<String>,
    },
    /// Set chargepoint settings
    SetChargepoint {
        /// ChargePoint ID
        #[arg(long = "chargepoint", value_name = "ID")]
        chargepoint: Option<String>,
        /// Dimmer
        #[arg(long, value_enum)]
        dimmer: Option<Dimmer>,
        /// Enable downlight
        #[arg(long, conflicts_with = "no_downlight")]
        downlight: bool,
        /// Disable downlight
        #[arg(long)]
        no_downlight: bool,
    },
    /// Get connector settings
    #[command(alias = "get")]
    GetConnector {
        #[command(flatten)]
        target: Target,
    },
    /// Change connector settings
    #[command(alias = "set")]
    SetConnector {
        /// ChargePoint ID
        #[arg(long = "chargepoint", value_name = "ID")]
        chargepoint: Option<String>,
        /// Connector ID
        #[arg(long = "connector", value_name = "ID")]
        connector: u32,
        /// Enable connector
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        /// Disable connector
        #[arg(long)]
        disable: bool,
        /// Enable RFID lock
        #[arg(long, conflicts_with = "rfid_unlock")]
        rfid_lock: bool,
        /// Disable RFID lock
        #[arg(long)]
        rfid_unlock: bool,
        /// Enable cable lock
        #[arg(long, conflicts_with = "cable_unlock")]
        cable_lock: bool,
        /// Disable cable lock
        #[arg(long)]
        cable_unlock: bool,
        /// Max current
        #[arg(long, value_name = "AMPS")]
        current: Option<f64>,
    },
    /// Remote start connector
    StartConnector {
        #[command(flatten)]
        target: Target,
        /// RFID identifier (hex)
        #[arg(long)]
        rfid: String,
    },
    /// Remote stop connector
    StopConnector {
        #[command(flatten)]
        target: Target,
    },
    /// Reboot chargepoint
    Reboot {
        /// ChargePoint ID
        #[arg(long = "chargepoint", value_name = "ID")]
        chargepoint: Option<String>,
    },
}

#[derive(Tabled)]
struct ChargePointRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    charge_point_type: String,
    #[tabled(rename = "Firmware")]
    firmware: String,
    #[tabled(rename = "Connectors")]
    connectors: usize,
}

impl From<&ChargePoint> for ChargePointRow {
    fn from(cp: &ChargePoint) -> Self {
        Self {
            id: cp.id.clone(),
            name: cp.name.clone(),
            charge_point_type: cp.charge_point_type.clone(),
            firmware: cp.firmware_version.clone(),
            connectors: cp.connectors.len(),
        }
    }
}

#[derive(Tabled)]
struct ConnectorStatusRow {
    #[tabled(rename = "Connector")]
    connector: u32,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "kWh")]
    total_consumption_kwh: f64,
    #[tabled(rename = "Session")]
    session: String,
}

impl From<&ChargePointConnectorStatus> for ConnectorStatusRow {
    fn from(status: &ChargePointConnectorStatus) -> Self {
        Self {
            connector: status.connector_id,
            status: status.status.clone(),
            total_consumption_kwh: status.total_consumption_kwh,
            session: status.session_id.clone().unwrap_or_default(),
        }
    }
}

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Connector")]
    connector: u32,
    #[tabled(rename = "Type")]
    session_type: String,
    #[tabled(rename = "kWh")]
    total_consumption_kwh: f64,
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "End")]
    end: String,
}

impl From<&ChargingSession> for SessionRow {
    fn from(session: &ChargingSession) -> Self {
        let fmt = |t: &Option<DateTime<Utc>>| t.as_ref().map(format_timestamp).unwrap_or_default();
        Self {
            id: session.id.clone(),
            connector: session.connector_id,
            session_type: session.session_type.clone(),
            total_consumption_kwh: session.total_consumption_kwh,
            start: fmt(&session.start_time),
            end: fmt(&session.end_time),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(err) = run(cli).await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = resolve_config_path(cli.config.as_deref())?;
    let config = load_config(&config_path)?;

    let client = ChargeAmpsClient::with_options(config.credentials(), config.client_options())?;
    let result = execute(&client, cli.command, cli.format).await;
    client.shutdown().await;
    result
}

async fn execute<C: ChargeAmpsApi>(
    client: &C,
    command: Commands,
    format: OutputFormat,
) -> Result<()> {
    match command {
        Commands::Chargepoints => {
            let chargepoints = client.get_chargepoints().await?;
            match format {
                OutputFormat::Json => print_json(&chargepoints)?,
                OutputFormat::Table => print_table(chargepoints.iter().map(ChargePointRow::from)),
            }
        }
        Commands::Status { target } => {
            let charge_point_id = chargepoint_id(client, target.chargepoint).await?;
            let status = client.get_chargepoint_status(&charge_point_id).await?;
            let connectors: Vec<&ChargePointConnectorStatus> = match target.connector {
                Some(connector_id) => vec![status.connector(connector_id).with_context(|| {
                    format!(
                        "Connector {} not found on chargepoint {}",
                        connector_id, charge_point_id
                    )
                })?],
                None => status.connector_statuses.iter().collect(),
            };
            match (format, target.connector) {
                (OutputFormat::Table, _) => {
                    print_table(connectors.into_iter().map(ConnectorStatusRow::from))
                }
                (OutputFormat::Json, Some(_)) => print_json(&connectors[0])?,
                (OutputFormat::Json, None) => print_json(&status)?,
            }
        }
        Commands::Sessions {
            target,
            session,
            start,
            end,
            duration,
        } => {
            let (start_time, end_time) = session_window(start, end, duration)?;
            let charge_point_id = chargepoint_id(client, target.chargepoint).await?;

            if let Some(session_id) = session {
                let session = client
                    .get_chargingsession(&charge_point_id, session_id)
                    .await?;
                return match format {
                    OutputFormat::Json => print_json(&session),
                    OutputFormat::Table => {
                        print_table([SessionRow::from(&session)]);
                        Ok(())
                    }
                };
            }

            let mut sessions: Vec<ChargingSession> = client
                .get_all_chargingsessions(&charge_point_id, start_time, end_time)
                .await?
                .into_iter()
                .filter(|s| target.connector.map_or(true, |c| c == s.connector_id))
                .collect();
            sessions.sort_by_key(|s| (s.id.parse::<u64>().ok(), s.id.clone()));
            debug!("{} sessions after filtering", sessions.len());

            match format {
                OutputFormat::Json => print_json(&sessions)?,
                OutputFormat::Table => print_table(sessions.iter().map(SessionRow::from)),
            }
        }
        Commands::GetChargepoint { chargepoint } => {
            let charge_point_id = chargepoint_id(client, chargepoint).await?;
            let settings = client.get_chargepoint_settings(&charge_point_id).await?;
            print_json(&settings)?;
        }
        Commands::SetChargepoint {
            chargepoint,
            dimmer,
            downlight,
            no_downlight,
        } => {
            let charge_point_id = chargepoint_id(client, chargepoint).await?;
            let mut settings = client.get_chargepoint_settings(&charge_point_id).await?;
            if let Some(dimmer) = dimmer {
                settings.dimmer = dimmer.wire_value().to_string();
            }
            if let Some(down_light) = toggle(downlight, no_downlight) {
                settings.down_light = down_light;
            }
            client.set_chargepoint_settings(&settings).await?;
            let settings = client.get_chargepoint_settings(&charge_point_id).await?;
            print_json(&settings)?;
        }
        Commands::GetConnector { target } => {
            let charge_point_id = chargepoint_id(client, target.chargepoint).await?;
            let connector_ids = match target.connector {
                Some(connector_id) => vec![connector_id],
                None => client
                    .get_chargepoint_status(&charge_point_id)
                    .await?
                    .connector_statuses
                    .iter()
                    .map(|c| c.connector_id)
                    .collect(),
            };
            let settings = join_all(connector_ids.iter().map(|&connector_id| {
                client.get_chargepoint_connector_settings(&charge_point_id, connector_id)
            }))
            .await
            .into_iter()
            .collect::<chargeamps::Result<Vec<_>>>()?;
            print_json(&settings)?;
        }
        Commands::SetConnector {
            chargepoint,
            connector,
            enable,
            disable,
            rfid_lock,
            rfid_unlock,
            cable_lock,
            cable_unlock,
            current,
        } => {
            let charge_point_id = chargepoint_id(client, chargepoint).await?;
            let mut settings = client
                .get_chargepoint_connector_settings(&charge_point_id, connector)
                .await?;
            if let Some(max_current) = current {
                settings.max_current = Some(max_current);
            }
            if let Some(enabled) = toggle(enable, disable) {
                settings.mode = if enabled { "On" } else { "Off" }.to_string();
            }
            if let Some(lock) = toggle(rfid_lock, rfid_unlock) {
                settings.rfid_lock = lock;
            }
            if let Some(lock) = toggle(cable_lock, cable_unlock) {
                settings.cable_lock = lock;
            }
            client.set_chargepoint_connector_settings(&settings).await?;
            let settings = client
                .get_chargepoint_connector_settings(&charge_point_id, connector)
                .await?;
            print_json(&settings)?;
        }
        Commands::StartConnector { target, rfid } => {
            let rfid = Rfid::hex(&rfid)?;
            let charge_point_id = chargepoint_id(client, target.chargepoint).await?;
            let connector_id = target.connector.unwrap_or(1);
            let start_auth = StartAuth::new(&rfid);
            info!(
                "Starting connector {} on chargepoint {}",
                connector_id, charge_point_id
            );
            client
                .remote_start(&charge_point_id, connector_id, &start_auth)
                .await?;
        }
        Commands::StopConnector { target } => {
            let charge_point_id = chargepoint_id(client, target.chargepoint).await?;
            let connector_id = target.connector.unwrap_or(1);
            info!(
                "Stopping connector {} on chargepoint {}",
                connector_id, charge_point_id
            );
            client.remote_stop(&charge_point_id, connector_id).await?;
        }
        Commands::Reboot { chargepoint } => {
            let charge_point_id = chargepoint_id(client, chargepoint).await?;
            info!("Rebooting chargepoint {}", charge_point_id);
            client.reboot(&charge_point_id).await?;
        }
    }

    Ok(())
}

async fn chargepoint_id<C: ChargeAmpsApi>(client: &C, explicit: Option<String>) -> Result<String> {
    if let Some(id) = explicit {
        return Ok(id);
    }
    let chargepoints = client.get_chargepoints().await?;
    chargepoints
        .into_iter()
        .next()
        .map(|cp| cp.id)
        .ok_or_else(|| anyhow::anyhow!("No chargepoints found for this account."))
}

fn toggle(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn session_window(
    start: Option<String>,
    end: Option<String>,
    duration: Option<String>,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
    if let Some(duration) = duration {
        let duration = parse_duration(&duration)?;
        let start = Utc::now()
            .checked_sub_signed(duration)
            .ok_or_else(|| anyhow::anyhow!("Duration out of range: {}", duration))?;
        return Ok((Some(start), None));
    }
    let parse = |value: Option<String>| -> Result<Option<DateTime<Utc>>> {
        value
            .map(|v| parse_timestamp(&v).with_context(|| format!("Invalid timestamp: {}", v)))
            .transpose()
    };
    Ok((parse(start)?, parse(end)?))
}

/// Parse an ISO 8601 duration made of weeks, days, hours, minutes and
/// seconds, e.g. `P1W`, `P1DT12H` or `PT90M`.
fn parse_duration(value: &str) -> Result<chrono::Duration> {
    let invalid = || anyhow::anyhow!("Invalid ISO 8601 duration: {}", value);
    let rest = value
        .strip_prefix('P')
        .or_else(|| value.strip_prefix('p'))
        .ok_or_else(invalid)?;

    let mut seconds = 0f64;
    let mut in_time = false;
    let mut components = 0;
    let mut number = String::new();

    for c in rest.chars() {
        match c {
            'T' | 't' if !in_time && number.is_empty() => in_time = true,
            '0'..='9' | '.' => number.push(c),
            ',' => number.push('.'),
            unit => {
                let n: f64 = number.parse().map_err(|_| invalid())?;
                number.clear();
                let factor = match (in_time, unit.to_ascii_uppercase()) {
                    (false, 'W') => 604_800.0,
                    (false, 'D') => 86_400.0,
                    (true, 'H') => 3_600.0,
                    (true, 'M') => 60.0,
                    (true, 'S') => 1.0,
                    _ => {
                        return Err(anyhow::anyhow!(
                            "Unsupported duration component '{}' in {}",
                            unit,
                            value
                        ))
                    }
                };
                seconds += n * factor;
                components += 1;
            }
        }
    }

    if components == 0 || !number.is_empty() {
        return Err(invalid());
    }
    let millis = (seconds * 1000.0).round();
    if !millis.is_finite() || millis >= i64::MAX as f64 {
        return Err(anyhow::anyhow!("Duration out of range: {}", value));
    }
    chrono::Duration::try_milliseconds(millis as i64)
        .ok_or_else(|| anyhow::anyhow!("Duration out of range: {}", value))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn print_table<R: Tabled>(rows: impl IntoIterator<Item = R>) {
    let table = Table::new(rows);
    println!("{}", table);
}
