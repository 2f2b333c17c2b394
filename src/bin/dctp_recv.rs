use std::fs::File;
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Result};
use clap::{App, AppSettings, Arg};

use dctp::{Transport, TransportConfig};

// RUST_LOG=trace cargo run --bin dctp-recv -- --listen 127.0.0.1:9001 --out out.bin

fn main() -> Result<()> {
    let mut app = App::new("DCTP Recv")
        .version("0.1.0")
        .about("Receive DCTP over UDP into a file")
        .setting(AppSettings::DeriveDisplayOrder)
        .arg(
            Arg::with_name("FULLHELP")
                .help("Prints more detailed help information")
                .long("fullhelp"),
        )
        .arg(
            Arg::with_name("listen")
                .required_unless("FULLHELP")
                .takes_value(true)
                .long("listen")
                .help("HOST:PORT to bind"),
        )
        .arg(
            Arg::with_name("out")
                .required_unless("FULLHELP")
                .takes_value(true)
                .long("out")
                .help("output file path"),
        )
        .arg(
            Arg::with_name("buf-cap")
                .takes_value(true)
                .default_value("65535")
                .long("buf-cap")
                .help("receive buffer/window (bytes)"),
        )
        .arg(
            Arg::with_name("idle-timeout")
                .takes_value(true)
                .default_value("0")
                .long("idle-timeout")
                .help("stop after this many idle seconds once data has arrived (0 = run forever)"),
        )
        .arg(
            Arg::with_name("sack")
                .long("sack")
                .conflicts_with("no-sack")
                .help("enable SACK feedback generation (default)"),
        )
        .arg(
            Arg::with_name("no-sack")
                .long("no-sack")
                .help("disable SACK feedback generation"),
        )
        .arg(
            Arg::with_name("verbose")
                .short('v')
                .long("verbose")
                .help("verbose logging"),
        );

    let matches = app.clone().get_matches();

    if matches.is_present("FULLHELP") {
        app.print_long_help().unwrap();
        std::process::exit(0);
    }

    let verbose = matches.is_present("verbose");
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                chrono::Local::now().format("%H:%M:%S%.6f"),
                record.args()
            )
        })
        .filter(
            None,
            if verbose {
                log::LevelFilter::Trace
            } else {
                log::LevelFilter::Info
            },
        )
        .init();

    let listen: SocketAddr = matches
        .value_of("listen")
        .unwrap()
        .parse()
        .map_err(|e| anyhow!("bad --listen address: {e}"))?;
    let out_path = matches.value_of("out").unwrap();
    let buf_cap: usize = matches.value_of("buf-cap").unwrap().parse()?;
    let idle_timeout_s: u64 = matches.value_of("idle-timeout").unwrap().parse()?;

    if let Some(parent) = Path::new(out_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut out = File::create(out_path)?;

    let config = TransportConfig::new()
        .with_window(buf_cap)
        .with_prob_reliable(1.0)
        .with_sack_enabled(!matches.is_present("no-sack"))
        .with_verbose(verbose);

    let mut t = Transport::new(config);
    t.bind(listen)?;

    println!("[dctp-recv] listening on {listen}, writing to {out_path}");

    let started = Instant::now();
    let mut total: u64 = 0;
    let mut last_progress = Instant::now();

    loop {
        t.poll(25)?;

        let chunk = t.recv(1 << 20);
        if !chunk.is_empty() {
            out.write_all(&chunk)?;
            total += chunk.len() as u64;
            last_progress = Instant::now();
        } else if idle_timeout_s > 0
            && total > 0
            && last_progress.elapsed().as_secs() >= idle_timeout_s
        {
            break;
        }
    }

    t.close()?;

    let elapsed = started.elapsed().as_secs_f64().max(1e-6);
    let mbps = (total * 8) as f64 / (elapsed * 1_000_000.0);
    println!("[dctp-recv] received {total} bytes in {elapsed:.3}s  |  {mbps:.2} Mb/s");

    let stats = t.stats();
    println!(
        "[dctp-recv] link: bytes_tx={} bytes_rx={} frames_tx={} frames_rx={} \
         acks_tx={} acks_rx={} sacks_tx={} sacks_rx={}",
        stats.bytes_tx,
        stats.bytes_rx,
        stats.frames_tx,
        stats.frames_rx,
        stats.acks_tx,
        stats.acks_rx,
        stats.sacks_tx,
        stats.sacks_rx,
    );

    Ok(())
}
