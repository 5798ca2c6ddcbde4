use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command, value_parser};
use log::{error, info};
use simple_payload::config::{PluginConfig, app_name, version};
use simple_payload::simple::build_payload;
use simple_payload::DroneHost;
use std::fs::OpenOptions;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::{panic, process};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::LevelFilter;

fn init_logging(log_file: Option<&Path>, verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let builder = tracing_subscriber::fmt().with_max_level(level);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("ADDR")
                .help("Address the streams are sent to.")
                .value_parser(value_parser!(IpAddr)),
        )
        .arg(
            Arg::new("base-port")
                .short('p')
                .long("base-port")
                .value_name("PORT")
                .help("Port of endpoint 0; stream n sends to base-port + n.")
                .value_parser(value_parser!(u16)),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("FILE")
                .help("Append logs to a file instead of stderr.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("run-for")
                .long("run-for")
                .value_name("SECONDS")
                .help("Stop the server after the given number of seconds.")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log debug messages.")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => PluginConfig::load(path)?,
        None => PluginConfig::default(),
    };
    if let Some(host) = matches.get_one::<IpAddr>("host") {
        config.endpoint.host = *host;
    }
    if let Some(port) = matches.get_one::<u16>("base-port") {
        config.endpoint.base_port = *port;
    }
    if let Some(path) = matches.get_one::<PathBuf>("log-file") {
        config.log_file = Some(path.clone());
    }

    init_logging(config.log_file.as_deref(), matches.get_flag("verbose"))?;

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    info!("{} v{}", app_name(), version());

    let mut host = DroneHost::new();
    host.register_payload(Arc::new(build_payload(&config)?))?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            info!("Shutdown requested");
            cancel.cancel();
        })
        .context("Error setting Ctrl-C handler")?;
    }
    if let Some(secs) = matches.get_one::<u64>("run-for").copied() {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            cancel.cancel();
        });
    }

    let report = host.start_server(cancel).await;
    info!(
        "{} stream(s) went live, {} failed",
        report.alive.len(),
        report.failures().count()
    );
    for failed in report.failures() {
        if let Err(e) = &failed.outcome {
            error!("{}/{}: {}", failed.payload, failed.stream, e);
        }
    }

    if report.failures().next().is_some() {
        process::exit(1);
    }
    Ok(())
}
