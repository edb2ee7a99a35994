// tools/nfc_cli/main.rs
//
// Command-line front end for nfc> readers: list ports, send commands, or
// run an interactive shell against a connected device.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use nearfield_lib::logging::init_file_logging;
use nearfield_lib::protocol::PROMPT;
use nearfield_lib::{list_serial_ports, IoError, NfcSession, SessionOptions, Settings};

#[derive(Parser, Debug)]
#[command(name = "nfc_cli", version, about = "Talk to an nfc> reader over serial")]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, overrides the config file
    #[arg(long, short, global = true)]
    port: Option<String>,

    /// Baud rate, overrides the config file
    #[arg(long, short, global = true)]
    baud: Option<u32>,

    /// Reply timeout in milliseconds, 0 waits forever
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Hide device log lines
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports
    Ports,
    /// Send commands in order and print each reply
    Send {
        /// One argument per command, e.g. `read_tag_raw "write_tag_raw 00"`
        #[arg(required = true, num_args = 1..)]
        commands: Vec<String>,
    },
    /// Interactive prompt, one command per line
    Shell,
    /// Print the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), IoError> {
    let mut settings = Settings::load_or_default(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(baud) = cli.baud {
        settings.baud_rate = baud;
    }
    if let Some(ms) = cli.timeout_ms {
        settings.command_timeout_ms = ms;
    }
    if cli.quiet {
        settings.echo_device_log = false;
    }

    match cli.command {
        Command::Ports => print_ports(),
        Command::Config { init } => show_config(&settings, cli.config, init),
        Command::Send { commands } => {
            let session = connect(&settings)?;
            let result = send_all(&session, &commands, settings.command_timeout()).await;
            session.close().await;
            result
        }
        Command::Shell => {
            let session = connect(&settings)?;
            let result = shell(&session, settings.command_timeout()).await;
            let reason = session.close().await;
            eprintln!("session closed: {}", reason);
            result
        }
    }
}

fn print_ports() -> Result<(), IoError> {
    let ports = list_serial_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        let ids = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" {:04x}:{:04x}", vid, pid),
            _ => String::new(),
        };
        let product = port.product.as_deref().unwrap_or("");
        println!("{:<24} {:<8}{} {}", port.port_name, port.port_type, ids, product);
    }
    Ok(())
}

fn show_config(settings: &Settings, path: Option<PathBuf>, init: bool) -> Result<(), IoError> {
    print!("{}", settings.to_toml()?);
    if init {
        let path = path
            .or_else(Settings::default_path)
            .ok_or_else(|| IoError::configuration("no config directory on this platform"))?;
        settings.save(&path)?;
        eprintln!("wrote {}", path.display());
    }
    Ok(())
}

fn connect(settings: &Settings) -> Result<NfcSession, IoError> {
    if let Some(dir) = &settings.log_dir {
        init_file_logging(dir)?;
    }
    let config = settings.serial_config()?;
    NfcSession::open_serial(
        &config,
        SessionOptions {
            echo_device_log: settings.echo_device_log,
            ..SessionOptions::default()
        },
    )
}

async fn send(
    session: &NfcSession,
    command: &str,
    timeout: Option<Duration>,
) -> Result<String, IoError> {
    let Some(limit) = timeout else {
        return session.send_command(command).await;
    };
    match tokio::time::timeout(limit, session.send_command(command)).await {
        Ok(result) => result,
        Err(_) => Err(IoError::timeout(
            session.label(),
            format!("no reply to {:?} within {}ms", command, limit.as_millis()),
        )),
    }
}

/// Stops at the first failure, device errors included
async fn send_all(
    session: &NfcSession,
    commands: &[String],
    timeout: Option<Duration>,
) -> Result<(), IoError> {
    for command in commands {
        let payload = send(session, command, timeout).await?;
        println!("{}", payload);
    }
    Ok(())
}

async fn shell(session: &NfcSession, timeout: Option<Duration>) -> Result<(), IoError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let _ = stdout.write_all(PROMPT.as_bytes()).await;
        let _ = stdout.flush().await;

        let line = tokio::select! {
            line = lines.next_line() => line,
            reason = session.closed() => {
                eprintln!();
                return Err(IoError::closed(reason));
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(()),
            Err(e) => return Err(IoError::read("stdin", e.to_string())),
        };

        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if command == "exit" || command == "quit" {
            return Ok(());
        }

        match send(session, command, timeout).await {
            Ok(payload) => println!("{}", payload),
            Err(e) if e.is_device_error() => println!("ERROR: {}", e),
            Err(e) if e.is_closed() => return Err(e),
            Err(e) => eprintln!("error: {}", e),
        }
    }
}
