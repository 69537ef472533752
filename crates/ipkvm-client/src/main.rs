//! ipkvm-client entry point.
//!
//! # Usage
//!
//! ```text
//! ipkvm-client (--server <HOST:PORT> | --serial <PATH> [--baud <BAUD>]) <COMMAND>
//!
//! Commands:
//!   info                          Chip version, target connection, lock LEDs
//!   key [--mod <NAME>].. <KEY>..  Press keys together, then release
//!   type <TEXT>                   Type text on a US layout
//!   move-abs <X> <Y>              Pointer to normalized position in [0, 1]
//!   move-rel <DX> <DY>            Pointer by a relative offset
//!   click [left|right|middle]     Press and release a button
//!   scroll <AMOUNT>               Wheel; positive scrolls up
//!   snapshot --out <FILE>         Save one JPEG frame (bridge only)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ipkvm_client::application::{commands, DEFAULT_HOLD};
use ipkvm_client::domain::{modifier_for_name, usage_for_name};
use ipkvm_client::infrastructure::{snapshot, RemoteController, SerialSession};
use ipkvm_core::{DeviceController, MouseButtons};
use ipkvm_server::infrastructure::SerialPortOpener;

#[derive(Debug, Parser)]
#[command(
    name = "ipkvm-client",
    about = "Drive an IP-KVM target from the command line",
    version
)]
#[command(group(ArgGroup::new("target").required(true).args(["server", "serial"])))]
struct Cli {
    /// Bridge address, `host:port`.
    #[arg(long, env = "IPKVM_SERVER", global = true)]
    server: Option<String>,

    /// Local serial device of the HID chip, bypassing the bridge.
    #[arg(long, global = true)]
    serial: Option<String>,

    #[arg(long, default_value_t = 57600, global = true)]
    baud: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Query chip version, target connection and lock LEDs.
    Info,
    /// Press up to six keys together with optional modifiers, then release.
    Key {
        #[arg(long = "mod", value_name = "NAME")]
        modifiers: Vec<String>,
        #[arg(required = true, num_args = 1..=6)]
        keys: Vec<String>,
    },
    /// Type text one keystroke at a time.
    Type { text: String },
    /// Move the pointer to a normalized position.
    MoveAbs { x: f64, y: f64 },
    /// Move the pointer by a relative offset.
    MoveRel {
        #[arg(allow_hyphen_values = true)]
        dx: i32,
        #[arg(allow_hyphen_values = true)]
        dy: i32,
    },
    /// Press and release a mouse button.
    Click {
        #[arg(value_enum, default_value_t = Button::Left)]
        button: Button,
    },
    /// Turn the mouse wheel.
    Scroll {
        #[arg(allow_hyphen_values = true)]
        amount: i32,
    },
    /// Save one frame of the bridge's video stream.
    Snapshot {
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Button {
    Left,
    Right,
    Middle,
}

impl Button {
    fn bit(self) -> u8 {
        match self {
            Button::Left => MouseButtons::LEFT,
            Button::Right => MouseButtons::RIGHT,
            Button::Middle => MouseButtons::MIDDLE,
        }
    }
}

/// Whichever controller the flags selected.
enum Target {
    Bridge(RemoteController),
    Serial(SerialSession),
}

impl Target {
    async fn connect(cli: &Cli) -> anyhow::Result<Self> {
        if let Some(server) = &cli.server {
            let url = format!("ws://{server}/ws");
            let remote = RemoteController::connect(&url)
                .await
                .with_context(|| format!("connecting to bridge at {server}"))?;
            return Ok(Target::Bridge(remote));
        }
        let Some(path) = &cli.serial else {
            bail!("either --server or --serial is required");
        };
        let session = SerialSession::open(Arc::new(SerialPortOpener), path, cli.baud)
            .await
            .with_context(|| format!("opening {path}"))?;
        Ok(Target::Serial(session))
    }

    fn controller(&self) -> &dyn DeviceController {
        match self {
            Target::Bridge(remote) => remote as &dyn DeviceController,
            Target::Serial(session) => session.controller(),
        }
    }

    async fn close(self) {
        match self {
            Target::Bridge(remote) => drop(remote),
            Target::Serial(session) => session.close().await,
        }
    }
}

fn parse_key_combo(modifiers: &[String], keys: &[String]) -> anyhow::Result<(u8, Vec<u8>)> {
    let mut mask = 0u8;
    for name in modifiers {
        mask |= modifier_for_name(name).with_context(|| format!("unknown modifier {name:?}"))?;
    }
    let usages = keys
        .iter()
        .map(|name| usage_for_name(name).with_context(|| format!("unknown key {name:?}")))
        .collect::<anyhow::Result<Vec<u8>>>()?;
    Ok((mask, usages))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Command::Snapshot { out } = &cli.command {
        let Some(server) = &cli.server else {
            bail!("snapshot needs --server; video is only served by the bridge");
        };
        let frame = snapshot(server).await.context("grabbing frame")?;
        tokio::fs::write(out, &frame)
            .await
            .with_context(|| format!("writing {}", out.display()))?;
        info!("saved {} byte frame to {}", frame.len(), out.display());
        return Ok(());
    }

    let target = Target::connect(&cli).await?;
    let outcome = execute(target.controller(), &cli.command).await;
    target.close().await;
    outcome
}

async fn execute(device: &dyn DeviceController, command: &Command) -> anyhow::Result<()> {
    match command {
        Command::Info => {
            let info = commands::query_info(device).await?;
            println!("chip version:     {}", info.chip_version());
            println!("target connected: {}", info.is_connected);
            println!(
                "locks:            num={} caps={} scroll={}",
                info.num_lock, info.caps_lock, info.scroll_lock
            );
        }
        Command::Key { modifiers, keys } => {
            let (mask, usages) = parse_key_combo(modifiers, keys)?;
            commands::press_keys(device, mask, &usages, DEFAULT_HOLD).await?;
        }
        Command::Type { text } => {
            let typed = commands::type_text(device, text, DEFAULT_HOLD).await?;
            info!("typed {typed} characters");
        }
        Command::MoveAbs { x, y } => commands::move_to(device, *x, *y, 0).await?,
        Command::MoveRel { dx, dy } => commands::move_by(device, *dx, *dy).await?,
        Command::Click { button } => commands::click(device, button.bit(), DEFAULT_HOLD).await?,
        Command::Scroll { amount } => commands::scroll(device, *amount).await?,
        Command::Snapshot { .. } => bail!("snapshot is handled before connecting"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse()).await
}
