use std::io::Write;
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use clap::{App, AppSettings, Arg};

use dctp::{Transport, TransportConfig, DEFAULT_WINDOW};

// RUST_LOG=trace cargo run --bin dctp-send -- --dst 127.0.0.1:9001 --num-packets 50 --rate 5

fn main() -> Result<()> {
    let mut app = App::new("DCTP Send")
        .version("0.1.0")
        .about("Send paced packets over DCTP/UDP")
        .setting(AppSettings::DeriveDisplayOrder)
        .arg(
            Arg::with_name("FULLHELP")
                .help("Prints more detailed help information")
                .long("fullhelp"),
        )
        .arg(
            Arg::with_name("dst")
                .required_unless("FULLHELP")
                .takes_value(true)
                .long("dst")
                .help("destination HOST:PORT"),
        )
        .arg(
            Arg::with_name("num-packets")
                .required_unless("FULLHELP")
                .takes_value(true)
                .long("num-packets")
                .help("number of packets to send"),
        )
        .arg(
            Arg::with_name("rate")
                .required_unless("FULLHELP")
                .takes_value(true)
                .long("rate")
                .help("packets per second"),
        )
        .arg(
            Arg::with_name("win")
                .takes_value(true)
                .default_value("65535")
                .long("win")
                .help("sender window (bytes)"),
        )
        .arg(
            Arg::with_name("prob-reliable")
                .takes_value(true)
                .default_value("0.5")
                .long("prob-reliable")
                .help("probability in [0,1] that a segment is sent RELIABLE"),
        )
        .arg(
            Arg::with_name("sack")
                .long("sack")
                .conflicts_with("no-sack")
                .help("enable SACK feedback processing (default)"),
        )
        .arg(
            Arg::with_name("no-sack")
                .long("no-sack")
                .help("disable SACK feedback processing"),
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

    let dst: SocketAddr = matches
        .value_of("dst")
        .unwrap()
        .parse()
        .map_err(|e| anyhow!("bad --dst address: {e}"))?;
    let num_packets: u64 = matches.value_of("num-packets").unwrap().parse()?;
    let rate: f64 = matches.value_of("rate").unwrap().parse()?;
    if rate <= 0.0 {
        return Err(anyhow!("--rate must be positive"));
    }
    let win: usize = matches.value_of("win").unwrap().parse()?;
    let prob_reliable: f64 = matches.value_of("prob-reliable").unwrap().parse()?;

    let config = TransportConfig::new()
        .with_window(if win == 0 { DEFAULT_WINDOW } else { win })
        .with_prob_reliable(prob_reliable)
        .with_sack_enabled(!matches.is_present("no-sack"))
        .with_verbose(verbose);

    let mut t = Transport::new(config);
    t.connect(dst)?;

    let interval = Duration::from_secs_f64(1.0 / rate);
    let started = Instant::now();
    let mut total_queued: u64 = 0;

    println!("[dctp-send] sending {num_packets} packets at {rate} packets/sec to {dst}");

    for i in 0..num_packets {
        let data = format!("Packet {}", i + 1);
        let accepted = t.send(data.as_bytes())?;
        if accepted == 0 {
            // Window full: give feedback a chance to arrive.
            t.poll(10)?;
            continue;
        }
        total_queued += accepted as u64;
        t.poll(0)?;
        if verbose {
            println!("[dctp-send] sent packet {}/{num_packets}", i + 1);
        }
        thread::sleep(interval);
    }

    t.drain()?;
    t.close()?;

    let elapsed = started.elapsed().as_secs_f64().max(1e-6);
    let mbps = (total_queued * 8) as f64 / (elapsed * 1_000_000.0);
    println!("[dctp-send] queued {total_queued} bytes in {elapsed:.3}s  |  {mbps:.2} Mb/s");

    let stats = t.stats();
    println!(
        "[dctp-send] link: bytes_tx={} bytes_rx={} frames_tx={} frames_rx={} \
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
    println!("[dctp-send] sender metrics: {}", stats.sender);

    Ok(())
}
