//! hbox-link CLI: identity, signing and protocol debugging for HBox controllers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hbox_link_core::comm::{check_device_status, send_with_retry, DeviceStatus, MAX_RETRIES};
use hbox_link_core::identity::device_signature;
use hbox_link_core::queue::QueueConfig;
use hbox_link_core::telemetry::{self, TelemetryFrame};
use hbox_link_core::{Command, CommandQueue, DeviceCredential, MockDevice, UniqueId};
use serde_json::Value;

/// Unique id the simulated controller reports unless told otherwise.
const DEFAULT_UNIQUE_ID: &str = "12345678-9ABCDEF0-0FEDCBA9";

#[derive(Parser)]
#[command(
    name = "hbox-link",
    version,
    about = "HBox controller protocol tool"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash an MCU unique id (XXXXXXXX-XXXXXXXX-XXXXXXXX) into a device id.
    DeviceId {
        unique_id: String,
    },
    /// Compute the signature over deviceId + challenge + timestamp.
    Sign {
        device_id: String,
        challenge: String,
        timestamp: String,
    },
    /// Issue the credential a controller would return for a given tick.
    Credential {
        unique_id: String,
        /// Millisecond tick the credential is issued at.
        #[arg(long, default_value_t = 1)]
        tick: u32,
        /// Print the base64 `x-device-auth` header value instead of JSON.
        #[arg(long)]
        header: bool,
    },
    /// Decode a binary push frame given as hex.
    DecodeFrame {
        hex: String,
    },
    /// Send commands to a simulated controller through the command queue.
    ///
    /// Each argument is `name` or `name=<json params>`. Repeats of the same
    /// command before it is sent are coalesced, as in the web configurator.
    Send {
        #[arg(required = true)]
        commands: Vec<String>,
        /// Bypass the send delay.
        #[arg(long)]
        immediate: bool,
        /// Send delay in milliseconds for non-immediate commands.
        #[arg(long, default_value_t = 1000)]
        delay_ms: u64,
        #[arg(long, default_value = DEFAULT_UNIQUE_ID)]
        unique_id: String,
    },
    /// Ping a simulated controller and print its firmware metadata.
    Status {
        /// Retries for transient failures.
        #[arg(long, default_value_t = MAX_RETRIES)]
        retries: u32,
        #[arg(long, default_value = DEFAULT_UNIQUE_ID)]
        unique_id: String,
    },
    /// Feed one raw JSON request to a simulated controller and print the reply.
    Dispatch {
        request: String,
        #[arg(long, default_value = DEFAULT_UNIQUE_ID)]
        unique_id: String,
    },
}

fn parse_command(spec: &str) -> Result<Command> {
    let (name, params) = match spec.split_once('=') {
        Some((name, raw)) => {
            let params: Value = serde_json::from_str(raw)
                .with_context(|| format!("params for {name} are not JSON"))?;
            (name, Some(params))
        }
        None => (spec, None),
    };
    Ok(Command::from_parts(name, params.as_ref())?)
}

fn print_frame(frame: &TelemetryFrame) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(frame)?);
    if let TelemetryFrame::ButtonState(state) = frame {
        println!(
            "mask {} pressed {:?}",
            telemetry::mask_to_binary_string(state.trigger_mask),
            telemetry::mask_to_button_indices(state.trigger_mask, u32::from(state.total_buttons)),
        );
    }
    Ok(())
}

async fn send(commands: Vec<String>, immediate: bool, delay_ms: u64, unique_id: &str) -> Result<()> {
    let device = Arc::new(MockDevice::new(UniqueId::parse(unique_id)?));
    let queue = CommandQueue::with_transport(
        device,
        QueueConfig {
            send_delay: Duration::from_millis(delay_ms),
            ..QueueConfig::default()
        },
    );

    let mut tickets = Vec::with_capacity(commands.len());
    for spec in &commands {
        let command = parse_command(spec)?;
        tickets.push((spec.as_str(), queue.enqueue(command, immediate)?));
    }
    queue.flush().await;

    for (spec, ticket) in tickets {
        match ticket.await {
            Ok(reply) if reply.is_paused() => println!("{spec}: superseded"),
            Ok(reply) => println!(
                "{spec}: {}",
                serde_json::to_string(&reply.into_data().unwrap_or(Value::Null))?
            ),
            Err(e) => println!("{spec}: error: {e}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::DeviceId { unique_id } => {
            let uid = UniqueId::parse(&unique_id)?;
            println!("{}", uid.device_id());
        }
        Commands::Sign {
            device_id,
            challenge,
            timestamp,
        } => {
            println!("{}", device_signature(&device_id, &challenge, &timestamp));
        }
        Commands::Credential {
            unique_id,
            tick,
            header,
        } => {
            let uid = UniqueId::parse(&unique_id)?;
            if tick == 0 {
                bail!("tick 0 yields a timestamp the server treats as missing");
            }
            let credential = DeviceCredential::issue(&uid, tick);
            if header {
                println!("{}", credential.to_header_value()?);
            } else {
                println!("{}", serde_json::to_string_pretty(&credential)?);
            }
        }
        Commands::DecodeFrame { hex: raw } => {
            let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = hex::decode(&cleaned).context("frame is not valid hex")?;
            match telemetry::decode_frame(&bytes) {
                Some(frame) => print_frame(&frame)?,
                None => bail!("could not decode {} byte frame", bytes.len()),
            }
        }
        Commands::Send {
            commands,
            immediate,
            delay_ms,
            unique_id,
        } => send(commands, immediate, delay_ms, &unique_id).await?,
        Commands::Status { retries, unique_id } => {
            let device = MockDevice::new(UniqueId::parse(&unique_id)?);
            let status = check_device_status(&device).await;
            println!("{} status: {status:?}", device.device_id());
            if status == DeviceStatus::Connected {
                let metadata =
                    send_with_retry(&device, &Command::GetFirmwareMetadata, retries).await?;
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            }
        }
        Commands::Dispatch { request, unique_id } => {
            let device = MockDevice::new(UniqueId::parse(&unique_id)?);
            let response = device.handle_text(&request);
            println!("{}", response.to_text()?);
        }
    }

    Ok(())
}
