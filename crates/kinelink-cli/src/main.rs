//! `kinelink` – sensor link command line.
//!
//! ```text
//! kinelink ports                       list serial ports in probe order
//! kinelink run [--sim] [--port P] [--ticks N]
//!                                      connect, fuse and print the arbitrated coordinate
//! kinelink init [--force]              write ~/.kinelink/config.toml with defaults
//! ```
//!
//! Ctrl-C stops `run` at the next tick; the serial reader is joined and the
//! port closed before the process exits.

mod config;
mod sim;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use tracing::{debug, warn};

use kinelink_hal::{PortProvider, SystemPorts};
use kinelink_link::{FrameFormat, SerialTelemetryLink, order_candidates};
use kinelink_perception::{SensorFusionMapper, TiltMapper};
use kinelink_runtime::{
    ControlLoop, ControlledObject, InputArbiter, Selection, TelemetrySource, init_tracing,
    pointer_channel,
};
use kinelink_types::{ControlPoint, KineError};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("help");
    let flags = &args[args.len().min(1)..];

    let result = match command {
        "ports" => cmd_ports(),
        "run" => cmd_run(flags),
        "init" => cmd_init(flags),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => Err(format!("unknown command '{other}'")),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    println!();
    println!("{} {}", "kinelink".bold().cyan(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  {}   – list serial ports in probe order", "ports".bold().cyan());
    println!("  {}     – stream, fuse and print the control coordinate", "run".bold().cyan());
    println!("           --sim        use the built-in simulated sensor board");
    println!("           --port P     probe port P first");
    println!("           --ticks N    stop after N ticks");
    println!("  {}    – write the default configuration", "init".bold().cyan());
    println!("           --force      overwrite an existing file");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_ports() -> Result<(), String> {
    let cfg = config::load()?;
    let ports = SystemPorts::new().list_ports().map_err(|e| e.to_string())?;
    if ports.is_empty() {
        println!("  {}", "No serial ports detected.".yellow());
        return Ok(());
    }

    let described: Vec<_> = ports.clone();
    println!();
    for (rank, name) in order_candidates(ports, cfg.link.port_hint.as_deref()).iter().enumerate() {
        let info = described.iter().find(|p| &p.port_name == name);
        let product = info.and_then(|p| p.product.as_deref()).unwrap_or("");
        let ids = info
            .and_then(|p| p.vid.zip(p.pid))
            .map(|(vid, pid)| format!("{vid:04x}:{pid:04x}"))
            .unwrap_or_default();
        println!("  {:>2}. {:<20} {:<10} {}", rank + 1, name.bold(), ids.dimmed(), product);
    }
    println!();
    Ok(())
}

fn cmd_init(flags: &[String]) -> Result<(), String> {
    let path = config::config_path();
    let force = flags.iter().any(|f| f == "--force");
    if path.exists() && !force {
        println!(
            "  Config already exists at {} (use {} to overwrite).",
            path.display().to_string().bold(),
            "--force".bold()
        );
        return Ok(());
    }
    config::save(&config::Config::default())?;
    println!("  {} Config saved to {}", "✓".green().bold(), path.display().to_string().bold());
    Ok(())
}

struct RunOptions {
    sim: bool,
    port: Option<String>,
    ticks: Option<u64>,
}

fn parse_run_flags(flags: &[String]) -> Result<RunOptions, String> {
    let mut opts = RunOptions {
        sim: false,
        port: None,
        ticks: None,
    };
    let mut iter = flags.iter();
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--sim" => opts.sim = true,
            "--port" => {
                opts.port = Some(iter.next().ok_or("--port needs a value")?.clone());
            }
            "--ticks" => {
                let raw = iter.next().ok_or("--ticks needs a value")?;
                opts.ticks = Some(raw.parse().map_err(|_| format!("invalid tick count '{raw}'"))?);
            }
            other => return Err(format!("unknown flag '{other}'")),
        }
    }
    Ok(opts)
}

fn cmd_run(flags: &[String]) -> Result<(), String> {
    let opts = parse_run_flags(flags)?;
    let mut cfg = config::load()?;
    if opts.port.is_some() {
        cfg.link.port_hint = opts.port.clone();
    }

    let _guard = init_tracing("kinelink");

    let provider: Arc<dyn PortProvider> = if opts.sim {
        let ports = sim::board(&cfg.link.frame);
        cfg.link.port_hint = Some(sim::SIM_PORT.to_string());
        Arc::new(ports)
    } else {
        Arc::new(SystemPorts::new())
    };

    // ── Shutdown flag ─────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_ctrlc = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping …".yellow().bold());
        shutdown_ctrlc.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop with --ticks instead");
    }

    // ── Input chain ───────────────────────────────────────────────────────
    let mut link = SerialTelemetryLink::new(provider, cfg.link.to_link_config()).map_err(|e| e.to_string())?;
    match link.connect(None) {
        Ok(_) => println!(
            "  {} connected on {}",
            "✓".green().bold(),
            link.port_name().unwrap_or("?").bold()
        ),
        Err(e) => println!("  {} {} – retrying every tick", "…".yellow(), e),
    }
    request_reading(&mut link);

    let (_pointer_feed, pointer) = pointer_channel(cfg.control.pointer());
    let max_age = cfg.control.max_sample_age();
    let arbiter = InputArbiter::new(pointer);
    let mut arbiter = match cfg.link.frame {
        FrameFormat::Csv { .. } => {
            let tilt = TiltMapper::new(cfg.control.tilt_input, cfg.fusion.x_bounds).map_err(|e| e.to_string())?;
            arbiter.with_source(TelemetrySource::new(link, tilt, max_age))
        }
        FrameFormat::Named { .. } => {
            let fusion = SensorFusionMapper::new(cfg.fusion.clone()).map_err(|e| e.to_string())?;
            arbiter.with_source(TelemetrySource::new(link, fusion, max_age))
        }
    };

    let mut control = ControlLoop::new(cfg.control.tick_hz)
        .map_err(|e| e.to_string())?
        .with_shutdown_flag(shutdown);
    if let Some(ticks) = opts.ticks {
        control = control.with_max_ticks(ticks);
    }

    // ── Run ───────────────────────────────────────────────────────────────
    let print_every = u64::from((cfg.control.tick_hz / 10).max(1));
    let mut cursor = Cursor::default();
    let report = control.run(&mut arbiter, &mut cursor, |tick, selection| {
        if tick % print_every == 0 {
            print_selection(tick, selection);
        }
    });

    // Dropping the arbiter shuts the link down.
    drop(arbiter);
    println!();
    if let Some(last) = cursor.position {
        println!("  {} last position x={:.3} y={:?}", "■".cyan(), last.x, last.y);
    }
    println!(
        "  {} {} ticks, {} on pointer fallback, {} overrun(s)",
        "■".cyan(),
        report.ticks,
        report.fallback_ticks,
        report.overruns
    );
    Ok(())
}

/// Start streaming now if connected; otherwise the link starts it right
/// after the first reconnect.  Returns `true` when the reader is running.
fn request_reading<P: PortProvider>(link: &mut SerialTelemetryLink<P>) -> bool {
    match link.start_background_reading() {
        Ok(()) => true,
        Err(KineError::NotConnected) => {
            debug!("background reading deferred until the link connects");
            false
        }
        Err(e) => {
            warn!(error = %e, "could not start background reading");
            false
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// Stand-in controlled object: remembers where it was sent.
#[derive(Default)]
struct Cursor {
    position: Option<ControlPoint>,
}

impl ControlledObject for Cursor {
    fn apply(&mut self, point: ControlPoint) {
        self.position = Some(point);
    }
}

fn print_selection(tick: u64, selection: &Selection<'_>) {
    let source = if selection.fallback {
        selection.source.yellow()
    } else {
        selection.source.green()
    };
    let y = selection.point.y.map(|y| format!(" y={y:>7.3}")).unwrap_or_default();
    println!(
        "  {:>6}  {:<10} x={:>7.3}{}",
        tick.to_string().dimmed(),
        source,
        selection.point.x,
        y
    );
}
