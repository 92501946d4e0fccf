use anyhow::Context;
use clap::{Parser, Subcommand};
use mbus_master::{
    connect_with_config, init_logger, log_info, DataRecord, SecondaryMask, SerialConfig,
    SessionConfig,
};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mbus-master")]
#[command(about = "Poll M-Bus metering devices over a serial line")]
struct Cli {
    /// Serial port device, e.g. /dev/ttyUSB0
    #[arg(short, long)]
    port: String,

    #[arg(short, long, default_value = "2400")]
    baudrate: u32,

    /// Response window per attempt, in milliseconds
    #[arg(long, default_value = "500")]
    timeout_ms: u64,

    /// Resend attempts per exchange
    #[arg(long, default_value = "3")]
    retries: u8,

    /// Print records as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the data records of a primary address
    Poll { address: u8 },
    /// Select a device by 16-digit secondary mask (F = wildcard) and read it
    PollSecondary { mask: String },
    /// Discover the secondary addresses on the bus
    Scan,
    /// Send a link reset (SND_NKE)
    Nke { address: u8 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();
    let serial = SerialConfig {
        baudrate: cli.baudrate,
        ..SerialConfig::default()
    };
    let session = SessionConfig {
        max_retries: cli.retries,
        response_timeout: Duration::from_millis(cli.timeout_ms),
        ..SessionConfig::default()
    };
    let mut master = connect_with_config(&cli.port, serial, session)
        .await
        .with_context(|| format!("opening {}", cli.port))?;

    match cli.command {
        Commands::Poll { address } => {
            let records = master.poll_primary(address).await?;
            print_records(&records, cli.json)?;
        }
        Commands::PollSecondary { mask } => {
            let mask = SecondaryMask::from_hex(&mask)?;
            let records = master.poll_secondary(&mask).await?;
            print_records(&records, cli.json)?;
        }
        Commands::Scan => {
            let mut scanner = master.scan_secondary();
            while let Some(id) = scanner.next().await? {
                println!("{id}");
            }
        }
        Commands::Nke { address } => {
            master.send_nke(address).await?;
            log_info(&format!("link reset sent to {address}"));
        }
    }

    Ok(())
}

fn print_records(records: &[DataRecord], json: bool) -> anyhow::Result<()> {
    for record in records {
        if json {
            println!("{}", serde_json::to_string(record)?);
            continue;
        }
        match record.scaled_value() {
            Some(value) => println!("{value} {} ({})", record.unit, record.quantity),
            None => println!("{:?} ({})", record.value, record.quantity),
        }
        if let Some(error) = &record.error {
            eprintln!("  record issue: {error}");
        }
    }
    Ok(())
}
