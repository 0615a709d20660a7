use clap::{Parser, Subcommand};
use client::{parse_point, NavClient};
use log::info;
use shared::{MovementFlags, MovementSnapshot, Point3D, ServiceStatus, DEFAULT_PORT, STATUS_FILE_NAME};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Probe a running navigation server", long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,

    /// Wait up to this many seconds for the server to become ready
    #[arg(short = 'w', long, default_value = "0")]
    wait: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the server for its readiness status
    Health,
    /// Read the status file without connecting
    Status {
        #[arg(default_value = STATUS_FILE_NAME)]
        path: PathBuf,
    },
    /// Find a path between two points
    Path {
        #[arg(short, long, default_value = "0")]
        map: u32,
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        from: Point3D,
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        to: Point3D,
        #[arg(long)]
        smooth: bool,
    },
    /// Check line of sight between two points
    Los {
        #[arg(short, long, default_value = "0")]
        map: u32,
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        from: Point3D,
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        to: Point3D,
    },
    /// Sample the ground below a point
    Ground {
        #[arg(short, long, default_value = "0")]
        map: u32,
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        at: Point3D,
        #[arg(long, default_value = "50")]
        max_search: f32,
    },
    /// Drop a unit at a point and step it for a few ticks
    Step {
        #[arg(short, long, default_value = "0")]
        map: u32,
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        at: Point3D,
        #[arg(long, default_value = "10")]
        ticks: u32,
        #[arg(long, default_value = "0.1")]
        dt: f32,
        /// Hold the forward key
        #[arg(long)]
        forward: bool,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    // the status file needs no connection
    if let Command::Status { path } = &args.command {
        let status = ServiceStatus::read_from(path)?;
        return print_json(&status);
    }

    info!("Connecting to: {}", args.server);
    let mut nav = NavClient::connect(&args.server).await?;
    if args.wait > 0 {
        let status = nav.wait_until_ready(Duration::from_secs(args.wait)).await?;
        info!("Server ready: {}", status.message);
    }

    match args.command {
        Command::Health => print_json(&nav.health().await?)?,
        Command::Status { .. } => {}
        Command::Path {
            map,
            from,
            to,
            smooth,
        } => print_json(&nav.find_path(map, from, to, smooth).await?)?,
        Command::Los { map, from, to } => {
            let visible = nav.line_of_sight(map, from, to).await?;
            println!("{}", if visible { "visible" } else { "blocked" });
        }
        Command::Ground {
            map,
            at,
            max_search,
        } => print_json(&nav.ground_height(map, at, max_search).await?)?,
        Command::Step {
            map,
            at,
            ticks,
            dt,
            forward,
        } => {
            let mut snapshot = MovementSnapshot::new(map, at);
            if forward {
                snapshot.flags.insert(MovementFlags::FORWARD);
            }
            for tick in 1..=ticks {
                let result = nav.step(snapshot.clone(), Vec::new(), dt).await?;
                println!(
                    "tick {:>3}: pos=({:.3}, {:.3}, {:.3}) flags={:#010x} fall_time={}ms",
                    tick,
                    result.position.x,
                    result.position.y,
                    result.position.z,
                    result.flags.bits(),
                    result.fall_time
                );
                snapshot.apply_result(&result);
            }
        }
    }

    Ok(())
}
