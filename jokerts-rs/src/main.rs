//! jokerts: capture a transport stream through the streaming engine.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use parking_lot::Mutex;

use jokerts::{
    ConfigFile, Engine, EngineConfig, HookContext, PacketHook, Program, ReaderTransport, StatsSnapshot,
};
use jokerts_psi::{service_type_name, stream_type, TS_PACKET_SIZE};

mod context;
mod logging;

use context::{Cli, Commands, OutputFormat};

/// Bytes pulled from the engine per read.
const READ_CHUNK: usize = TS_PACKET_SIZE * 100;
const POLL_BACKOFF: Duration = Duration::from_millis(1);
const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Counts packets seen on one PID.
struct PidCounter {
    packets: u64,
}

impl PacketHook for PidCounter {
    fn on_packet(&mut self, _pid: u16, _packet: &[u8], _ctx: &mut HookContext<'_>) {
        self.packets += 1;
    }
}

fn open_source(source: &str) -> io::Result<Box<dyn Read + Send>> {
    if source == "-" {
        Ok(Box::new(io::stdin()))
    } else {
        Ok(Box::new(File::open(source)?))
    }
}

fn open_output(output: &str) -> io::Result<Box<dyn Write>> {
    if output == "-" {
        Ok(Box::new(BufWriter::new(io::stdout().lock())))
    } else {
        Ok(Box::new(BufWriter::new(File::create(output)?)))
    }
}

fn install_interrupt_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;
    Ok(interrupted)
}

fn print_name_update(program: &Program) {
    eprintln!(
        "{} 0x{:04X} {}",
        "Service".green().bold(),
        program.number,
        program.name.as_deref().unwrap_or_default()
    );
}

fn print_programs(programs: &[Program]) {
    if programs.is_empty() {
        println!("{}", "No programs found.".yellow());
        return;
    }

    println!(
        "{}",
        format!(
            "{:<8} {:<24} {:<16} {:<16} {:<8} {}",
            "Number", "Name", "Provider", "Type", "PMT", "Streams"
        )
        .bold()
    );
    for p in programs {
        let service_type = p.service_type.map(service_type_name).unwrap_or("-");
        let streams = p
            .streams
            .iter()
            .map(|es| format!("0x{:04X}:{}", es.pid, stream_type::name(es.stream_type)))
            .collect::<Vec<_>>()
            .join(", ");
        let name = match (&p.name, p.virtual_channel) {
            (Some(name), Some((major, minor))) => format!("{}-{} {}", major, minor, name),
            (Some(name), None) => name.clone(),
            (None, _) => "-".to_string(),
        };

        println!(
            "{:<8} {:<24} {:<16} {:<16} {:<8} {}",
            format!("0x{:04X}", p.number).cyan(),
            name,
            p.provider.as_deref().unwrap_or("-"),
            service_type,
            p.pmt_pid.map_or("-".to_string(), |pid| format!("0x{:04X}", pid)),
            streams
        );
    }
}

fn print_stats(stats: &StatsSnapshot, elapsed: Duration) {
    eprintln!("{}", "Statistics:".cyan().bold());
    eprintln!("  Packets:      {}", stats.packets_in);
    eprintln!("  Bytes:        {}", stats.bytes_in);
    eprintln!("  Bitrate:      {:.3} Mbps", stats.bitrate(elapsed) / 1_000_000.0);
    let dropped = format!("{}", stats.packets_dropped);
    eprintln!(
        "  Dropped:      {}",
        if stats.packets_dropped > 0 { dropped.red() } else { dropped.green() }
    );
    eprintln!(
        "  Resyncs:      {} ({} bytes skipped)",
        stats.resyncs, stats.resync_bytes_dropped
    );
    eprintln!(
        "  Transfers:    {} ok, {} failed",
        stats.transfers_completed, stats.transfer_errors
    );
}

#[allow(clippy::too_many_arguments)]
fn capture(
    mut config: EngineConfig,
    source: &str,
    output: &str,
    limit_mb: Option<u64>,
    programs: bool,
    count_pids: &[u16],
    queue_size: Option<usize>,
    buffers: Option<usize>,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    // command line takes precedence over the config file
    if let Some(size) = queue_size {
        config.ts_list_size_max = size;
    }
    if let Some(n) = buffers {
        config.num_buffers = n;
    }
    config.discover_programs |= programs;

    let transport = ReaderTransport::new(open_source(source)?);
    let mut engine = Engine::init(config, transport)?;
    engine.set_name_callback(print_name_update);

    let counters: Vec<(u16, Arc<Mutex<PidCounter>>)> = count_pids
        .iter()
        .map(|&pid| (pid, Arc::new(Mutex::new(PidCounter { packets: 0 }))))
        .collect();
    for (pid, counter) in &counters {
        engine.register_hook(*pid, counter)?;
    }

    let mut writer = open_output(output)?;
    let interrupted = install_interrupt_handler()?;
    let limit = limit_mb.map(|mb| mb.saturating_mul(1024 * 1024));

    let pb = match limit {
        _ if quiet => ProgressBar::hidden(),
        Some(bytes) => ProgressBar::new(bytes),
        None => ProgressBar::new_spinner(),
    };
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bytes} ({binary_bytes_per_sec}) {wide_msg}",
        )?,
    );

    let started = Instant::now();
    engine.start()?;
    info!("Capturing {} -> {}", source, output);

    let mut buf = vec![0u8; READ_CHUNK];
    let mut written: u64 = 0;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            warn!("Interrupted");
            break;
        }

        let n = engine.read(&mut buf);
        if n == 0 {
            if engine.is_finished() {
                break;
            }
            std::thread::sleep(POLL_BACKOFF);
            continue;
        }

        writer.write_all(&buf[..n])?;
        written += n as u64;
        pb.set_position(written);

        if limit.is_some_and(|l| written >= l) {
            info!("Reached the {} MB limit", limit_mb.unwrap_or_default());
            break;
        }
    }
    writer.flush()?;
    pb.finish_and_clear();

    let result = engine.stop();
    let elapsed = started.elapsed();
    let stats = engine.stats();

    eprintln!("{} {} bytes written to {}", "Done:".green().bold(), written, output);
    print_stats(&stats, elapsed);
    for (pid, counter) in &counters {
        eprintln!("  PID 0x{:04X}:   {} packets", pid, counter.lock().packets);
    }
    if programs {
        print_programs(&engine.programs());
    }

    if let Err(e) = result {
        error!("Capture ended with an error: {}", e);
        return Err(e.into());
    }
    Ok(())
}

fn list_programs(
    mut config: EngineConfig,
    source: &str,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    config.discover_programs = true;
    let transport = ReaderTransport::new(open_source(source)?);
    let mut engine = Engine::init(config, transport)?;
    if format == OutputFormat::Table {
        engine.set_name_callback(print_name_update);
    }

    let interrupted = install_interrupt_handler()?;
    engine.start()?;

    // the stream itself is not needed; keep the queue drained
    let mut buf = vec![0u8; READ_CHUNK];
    while !engine.is_finished() && !interrupted.load(Ordering::SeqCst) {
        if engine.read(&mut buf) == 0 {
            std::thread::sleep(POLL_BACKOFF);
        }
    }
    engine.stop()?;

    let programs = engine.programs();
    match format {
        OutputFormat::Table => print_programs(&programs),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(programs.as_slice())?),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let file_config = match ConfigFile::discover(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config file: {}", e);
            return Err(e.into());
        }
    };

    let log_dir = cli.log_dir.clone().or_else(|| file_config.logging.log_dir.clone());
    logging::init_logging(
        log_dir.as_deref(),
        file_config.logging.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
        file_config.logging.level.as_deref(),
        cli.verbose,
    )?;
    if let Some(path) = &file_config.source {
        info!("Loaded config from: {}", path.display());
    }

    match cli.command {
        Commands::Capture {
            source,
            output,
            limit,
            programs,
            count_pid,
            queue_size,
            buffers,
            quiet,
        } => capture(
            file_config.engine,
            &source,
            &output,
            limit,
            programs,
            &count_pid,
            queue_size,
            buffers,
            quiet,
        ),
        Commands::Programs { source, format } => list_programs(file_config.engine, &source, format),
    }
}
