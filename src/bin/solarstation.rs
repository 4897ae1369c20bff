use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let matches = App::new("solarstation")
        .version(env!("CARGO_PKG_VERSION"))
        .about("☀️  Solar station client - query and monitor a running simulator")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Simulator host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Simulator port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .subcommand(SubCommand::with_name("status").about("📊 Show the latest station snapshot"))
        .subcommand(SubCommand::with_name("health").about("🩺 Show simulator health"))
        .subcommand(
            SubCommand::with_name("monitor")
                .about("📈 Follow the live snapshot stream")
                .arg(
                    Arg::with_name("count")
                        .short("n")
                        .long("count")
                        .value_name("N")
                        .help("Stop after N snapshots (default: run until interrupted)")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("solar-drop")
                .about("🌥️  Force a shading episode on or off")
                .arg(
                    Arg::with_name("state")
                        .help("Shading state")
                        .required(true)
                        .possible_values(&["on", "off"]),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let format = matches.value_of("format").unwrap_or("table");

    match matches.subcommand() {
        ("status", _) => handle_status(host, port, format).await,
        ("health", _) => handle_health(host, port, format).await,
        ("monitor", Some(sub_matches)) => handle_monitor(sub_matches, host, port, format).await,
        ("solar-drop", Some(sub_matches)) => {
            let active = sub_matches.value_of("state") == Some("on");
            handle_solar_drop(host, port, format, active).await
        }
        _ => Ok(()),
    }
}

async fn handle_status(host: &str, port: u16, format: &str) -> CliResult<()> {
    let response = request(host, port, r#"{"request":"state"}"#, |v| v.get("time").is_some()).await?;
    match format {
        "json" => println!("{}", response),
        "compact" => println!("{}", compact_line(&response)),
        _ => print_snapshot_table(&response),
    }
    Ok(())
}

async fn handle_health(host: &str, port: u16, format: &str) -> CliResult<()> {
    let response = request(host, port, r#"{"request":"health"}"#, |v| v.get("version").is_some()).await?;
    match format {
        "json" => println!("{}", response),
        "compact" => {
            let running = response["running"].as_bool().unwrap_or(false);
            println!(
                "{} | ticks {}",
                if running { "RUNNING".green() } else { "STOPPED".red() },
                response["ticks"].as_u64().unwrap_or(0)
            );
        }
        _ => {
            println!("{} {}", "🩺".bright_blue(), "Simulator Health".bright_blue().bold());
            println!("  {:<12} {}", "Version:".bright_white(), response["version"].as_str().unwrap_or("?"));
            println!("  {:<12} {}", "Running:".bright_white(), yes_no(response["running"].as_bool().unwrap_or(false)));
            println!("  {:<12} {}", "Persistent:".bright_white(), yes_no(response["persistent"].as_bool().unwrap_or(false)));
            println!("  {:<12} {}", "Ticks:".bright_white(), response["ticks"].as_u64().unwrap_or(0));
        }
    }
    Ok(())
}

async fn handle_solar_drop(host: &str, port: u16, format: &str, active: bool) -> CliResult<()> {
    let command = serde_json::json!({ "request": "solar_drop", "active": active }).to_string();
    let response = request(host, port, &command, |v| v.get("ok").is_some()).await?;
    match format {
        "json" => println!("{}", response),
        _ => println!(
            "{} Solar drop {}",
            "✅".green(),
            if active { "ON".yellow() } else { "OFF".green() }
        ),
    }
    Ok(())
}

async fn handle_monitor(matches: &ArgMatches<'_>, host: &str, port: u16, format: &str) -> CliResult<()> {
    let limit = matches.value_of("count").map(str::parse::<u64>).transpose()?;
    let stream = connect(host, port).await?;
    let mut lines = BufReader::new(stream).lines();

    if format != "json" {
        println!("{}", "📡 Monitoring station snapshots (Press Ctrl+C to stop)...".bright_blue().bold());
    }

    let mut seen = 0u64;
    while let Some(line) = lines.next_line().await? {
        let Ok(snapshot) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        match format {
            "json" => println!("{}", line),
            "compact" => println!("{}", compact_line(&snapshot)),
            _ => {
                print_snapshot_table(&snapshot);
                println!();
            }
        }

        seen += 1;
        if limit.is_some_and(|limit| seen >= limit) {
            break;
        }
    }
    Ok(())
}

async fn connect(host: &str, port: u16) -> CliResult<TcpStream> {
    match TcpStream::connect((host, port)).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            eprintln!("{} Failed to connect to the simulator at {}:{}", "❌".red(), host, port);
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Server is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "cargo run --bin solarstation-simulator".bright_cyan());
            }
            Err(e.into())
        }
    }
}

/// Send one request line and wait for its answer. Pushed snapshot lines that
/// arrive first are skipped unless `accept` matches them.
async fn request(host: &str, port: u16, line: &str, accept: fn(&Value) -> bool) -> CliResult<Value> {
    let mut stream = connect(host, port).await?;

    let exchange = async {
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\n").await?;

        let mut lines = BufReader::new(&mut stream).lines();
        while let Some(reply) = lines.next_line().await? {
            let Ok(value) = serde_json::from_str::<Value>(&reply) else {
                continue;
            };
            if let Some(error) = value.get("error").and_then(Value::as_str) {
                return Err(format!("server error: {}", error).into());
            }
            if accept(&value) {
                return Ok(value);
            }
        }
        Err::<Value, Box<dyn std::error::Error>>("server closed connection".into())
    };

    match tokio::time::timeout(REQUEST_TIMEOUT, exchange).await {
        Ok(result) => result,
        Err(_) => {
            eprintln!("{} Request timed out after {} seconds", "⏰".yellow(), REQUEST_TIMEOUT.as_secs());
            Err("request timeout".into())
        }
    }
}

fn compact_line(snapshot: &Value) -> String {
    let now = snapshot["time"]["now"].as_i64().unwrap_or(0);
    let voltage = snapshot["battery"]["voltage"].as_f64().unwrap_or(0.0);
    let temperature = snapshot["environment"]["temperature"].as_f64().unwrap_or(0.0);
    let light = snapshot["environment"]["light"].as_f64().unwrap_or(0.0);
    let fan_power = snapshot["fanPower"].as_u64().unwrap_or(0);
    let mode = snapshot["mode"].as_str().unwrap_or("?");

    format!(
        "[{}] {} | {:.2} V | {:.1} °C | {:.0} lx | fan {}%",
        now / 1000,
        colored_mode(mode),
        voltage,
        temperature,
        light,
        fan_power
    )
}

fn print_snapshot_table(snapshot: &Value) {
    let mode = snapshot["mode"].as_str().unwrap_or("?");
    let is_day = snapshot["time"]["isDay"].as_bool().unwrap_or(false);

    println!(
        "{} {} {}",
        "☀️".bright_yellow(),
        "Station Status".bright_blue().bold(),
        if is_day { "(day)".yellow() } else { "(night)".blue() }
    );
    println!("  {:<14} {}", "Mode:".bright_white(), colored_mode(mode));
    println!("  {:<14} {}", "Message:".bright_white(), snapshot["message"].as_str().unwrap_or(""));

    println!("{}", "🔋 Power".bright_blue().bold());
    println!(
        "  {:<14} {:.2} V  ({:.1}%)",
        "Battery:".bright_white(),
        snapshot["battery"]["voltage"].as_f64().unwrap_or(0.0),
        snapshot["device"]["socPct"].as_f64().unwrap_or(0.0)
    );
    println!("  {:<14} {:.3} Wh", "Energy:".bright_white(), snapshot["battery"]["energyWh"].as_f64().unwrap_or(0.0));
    println!("  {:<14} {:.3} W", "Solar in:".bright_white(), snapshot["power"]["solarInW"].as_f64().unwrap_or(0.0));
    println!("  {:<14} {:.3} W", "Load:".bright_white(), snapshot["power"]["loadW"].as_f64().unwrap_or(0.0));

    let prediction = &snapshot["prediction"];
    let hours_left = match prediction["hoursLeft"].as_f64() {
        Some(hours) => format!("{:.1} h", hours),
        None => "∞ (charging)".green().to_string(),
    };
    println!("  {:<14} {}", "Runtime left:".bright_white(), hours_left);
    println!(
        "  {:<14} {:.2} Wh",
        "Solar ahead:".bright_white(),
        prediction["expectedSolarWh"].as_f64().unwrap_or(0.0)
    );

    println!("{}", "🌡️  Environment".bright_blue().bold());
    println!(
        "  {:<14} {:.1} °C",
        "Temperature:".bright_white(),
        snapshot["environment"]["temperature"].as_f64().unwrap_or(0.0)
    );
    println!("  {:<14} {:.0} lx", "Light:".bright_white(), snapshot["environment"]["light"].as_f64().unwrap_or(0.0));
    println!(
        "  {:<14} {:.0}%",
        "Clouds:".bright_white(),
        snapshot["environment"]["cloudiness"].as_f64().unwrap_or(0.0) * 100.0
    );
    let fan = if snapshot["fan"].as_bool().unwrap_or(false) {
        format!("ON {}%", snapshot["fanPower"].as_u64().unwrap_or(0)).as_str().bright_cyan()
    } else {
        "OFF".dimmed()
    };
    println!("  {:<14} {}", "Fan:".bright_white(), fan);

    if let Some(days) = snapshot["memory"]["days"].as_array() {
        if let Some(last) = days.last() {
            println!("{}", "📅 Last closed day".bright_blue().bold());
            println!(
                "  {}  min {:.1} / max {:.1} / avg {:.1} °C",
                last["day"].as_str().unwrap_or("?"),
                last["min"].as_f64().unwrap_or(0.0),
                last["max"].as_f64().unwrap_or(0.0),
                last["avg"].as_f64().unwrap_or(0.0)
            );
        }
    }
}

fn colored_mode(mode: &str) -> ColoredString {
    match mode {
        "NORMAL" => mode.bright_green(),
        "SAVE" => mode.yellow(),
        "CRITICAL" => mode.bright_red().bold(),
        _ => mode.normal(),
    }
}

fn yes_no(flag: bool) -> ColoredString {
    if flag {
        "yes".green()
    } else {
        "no".red()
    }
}
