use clap::{App, Arg};
use solarstation::clock::SystemTimeSource;
use solarstation::config::TICK_MS;
use solarstation::protocol::{read_request, Ack, ProtocolError, Request};
use solarstation::store::FileStore;
use solarstation::{Simulator, SimulatorOptions, StationConfig, Startup};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

const DEFAULT_PORT: &str = "8080";
const DEFAULT_DATA_DIR: &str = "data";
const SNAPSHOT_BROADCAST_BUFFER_SIZE: usize = 16;

type Station = Simulator<FileStore, SystemTimeSource>;
type ClientResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("solarstation-simulator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Solar station simulator server")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("TCP port for snapshot clients")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("data-dir")
                .short("d")
                .long("data-dir")
                .value_name("DIR")
                .help("Directory holding the persisted station state")
                .takes_value(true)
                .default_value(DEFAULT_DATA_DIR),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON station configuration")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .value_name("SEED")
                .help("Seed for the weather generator")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("utc-offset")
                .long("utc-offset")
                .value_name("SECONDS")
                .help("Local timezone offset from UTC in seconds")
                .takes_value(true)
                .allow_hyphen_values(true),
        )
        .arg(
            Arg::with_name("reset")
                .long("reset")
                .help("Discard the persisted state and start fresh"),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => StationConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => StationConfig::default(),
    };
    if let Some(seed) = matches.value_of("seed") {
        config.seed = Some(seed.parse()?);
    }
    if let Some(offset) = matches.value_of("utc-offset") {
        config.utc_offset_seconds = offset.parse()?;
    }
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let data_dir = matches.value_of("data-dir").unwrap_or(DEFAULT_DATA_DIR);
    let options = SimulatorOptions {
        reset: matches.is_present("reset"),
    };

    println!("☀️  Solar Station Simulator");
    println!("===========================");

    let store = FileStore::open(data_dir)?;
    let mut simulator = Simulator::new(config, store, SystemTimeSource, options);
    match simulator.start() {
        Startup::Restored => info!("Resuming station from {}", data_dir),
        Startup::Fresh => info!("Starting a fresh station in {}", data_dir),
    }
    let station = Arc::new(Mutex::new(simulator));

    let (snapshot_tx, _) = broadcast::channel(SNAPSHOT_BROADCAST_BUFFER_SIZE);

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("TCP server listening on port {}", port);
    let tcp_station = Arc::clone(&station);
    let tcp_snapshot_tx = snapshot_tx.clone();
    let tcp_server = tokio::spawn(async move {
        serve(listener, tcp_station, tcp_snapshot_tx).await;
    });

    let mut interval = time::interval(Duration::from_millis(TICK_MS as u64));
    // Resync makes catching up pointless.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }

        let result = {
            let mut guard = station.lock().await;
            guard.tick()
        };

        match result {
            Ok(Some(snapshot)) => {
                let line = serde_json::to_string(&snapshot)?;
                // No subscribers is not an error.
                let _ = snapshot_tx.send(line);
            }
            Ok(None) => {}
            Err(e) => {
                error!("Simulator error: {}", e);
                break;
            }
        }
    }

    station.lock().await.stop();
    tcp_server.abort();
    println!("🌙 Solar Station Simulator stopped");

    Ok(())
}

async fn serve(listener: TcpListener, station: Arc<Mutex<Station>>, snapshot_tx: broadcast::Sender<String>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("Client connected: {}", addr);
                let client_station = Arc::clone(&station);
                let snapshot_rx = snapshot_tx.subscribe();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_station, snapshot_rx).await {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("Client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    station: Arc<Mutex<Station>>,
    mut snapshot_rx: broadcast::Receiver<String>,
) -> ClientResult {
    let (reader, writer) = stream.into_split();
    let writer = Arc::new(Mutex::new(writer));

    let push_writer = Arc::clone(&writer);
    let push_task = tokio::spawn(async move {
        loop {
            match snapshot_rx.recv().await {
                Ok(line) => {
                    if write_line(&push_writer, &line).await.is_err() {
                        break;
                    }
                }
                // A slow client just misses a few snapshots.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client lagged, skipped {} snapshots", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let result = answer_requests(BufReader::new(reader), &writer, &station).await;
    push_task.abort();
    result
}

async fn answer_requests(
    mut reader: BufReader<OwnedReadHalf>,
    writer: &Mutex<OwnedWriteHalf>,
    station: &Mutex<Station>,
) -> ClientResult {
    loop {
        let incoming = match read_request(&mut reader).await {
            Ok(Some(incoming)) => incoming,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read request: {}", e);
                break;
            }
        };

        let response = match incoming {
            Ok(request) => respond(request, station).await?,
            Err(e) => rejection(&e)?,
        };
        write_line(writer, &response).await?;
    }
    Ok(())
}

fn rejection(e: &ProtocolError) -> Result<String, serde_json::Error> {
    warn!("Rejected request: {}", e);
    serde_json::to_string(&e.to_response())
}

async fn respond(request: Request, station: &Mutex<Station>) -> Result<String, serde_json::Error> {
    let mut guard = station.lock().await;
    match request {
        Request::State => match guard.latest() {
            Some(snapshot) => serde_json::to_string(snapshot),
            None => Ok(serde_json::json!({ "error": "no snapshot yet" }).to_string()),
        },
        Request::Health => serde_json::to_string(&guard.health()),
        Request::SolarDrop { active } => {
            guard.set_solar_drop(active);
            serde_json::to_string(&Ack { ok: true, solar_drop: active })
        }
    }
}

async fn write_line(writer: &Mutex<OwnedWriteHalf>, line: &str) -> std::io::Result<()> {
    let mut guard = writer.lock().await;
    guard.write_all(line.as_bytes()).await?;
    guard.write_all(b"\n").await
}
