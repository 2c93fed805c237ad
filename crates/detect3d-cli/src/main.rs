//! `detect3d` – runs the depth fusion node.
//!
//! 1. Initialises logging (and OTLP export when configured).
//! 2. Loads `~/.detect3d/config.toml`, falling back to defaults.
//! 3. Starts the event bus, the fusion loop and, if enabled, the WebSocket
//!    bridge that producers and consumers connect to.
//! 4. Stops on **Ctrl-C** and prints what the node did.

use std::net::SocketAddr;
use std::sync::Arc;

use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use detect3d_middleware::{EventBus, WsBridge};
use detect3d_runtime::{BusSink, FusionConfig, FusionLoop, FusionNode, FusionStats, config};

fn main() {
    let _telemetry = detect3d_runtime::init_tracing("detect3d");

    print_banner();

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            std::process::exit(1);
        }
    };
    print_config(&cfg);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the Tokio runtime");
            std::process::exit(1);
        }
    };

    let stats = runtime.block_on(run(cfg));
    print_stats(&stats);
}

async fn run(cfg: FusionConfig) -> FusionStats {
    let bus = EventBus::new(cfg.bus_capacity);
    let sink = BusSink::new(bus.clone(), cfg.topics.detections_3d.clone());
    let fusion = FusionLoop::new(&bus, FusionNode::from_config(&cfg, sink));

    if cfg.bridge.enabled {
        match format!("{}:{}", cfg.bridge.bind_address, cfg.bridge.ws_port).parse::<SocketAddr>() {
            Ok(addr) => {
                let bridge = WsBridge::new(Arc::new(bus.clone()), cfg.topics.clone());
                tokio::spawn(async move {
                    if let Err(e) = bridge.run_ws_server(addr).await {
                        error!(error = %e, "WebSocket bridge stopped");
                    }
                });
            }
            Err(e) => warn!(error = %e, "invalid bridge address, bridge disabled"),
        }
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        stop_tx.send_replace(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop the process with a signal instead");
    }

    info!(
        depth = %cfg.topics.depth_image,
        detections = %cfg.topics.detections_2d,
        output = %cfg.topics.detections_3d,
        "depth fusion node running"
    );
    fusion.run(stop_rx).await.stats()
}

// ─────────────────────────────────────────────────────────────────────────────
// Console output
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"      __     __            __  _____    __"#.bold().cyan());
    println!("{}", r#"  ___/ /__  / /____ ____  / /_|__  /___/ /"#.bold().cyan());
    println!("{}", r#" / _  / -_)/ __/ -_) __/ / __//_ </ _  / "#.bold().cyan());
    println!("{}", r#" \_,_/\__/ \__/\__/\__/  \__/____/\_,_/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "detect3d".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Depth fusion for 2-D object detections");
    println!();
}

fn print_config(cfg: &FusionConfig) {
    println!("  Config file   {}", config::config_path().display().to_string().dimmed());
    println!("  Camera info   {}", cfg.topics.camera_info.bold());
    println!("  Depth image   {}", cfg.topics.depth_image.bold());
    println!("  Detections    {}", cfg.topics.detections_2d.bold());
    println!("  Output        {}", cfg.topics.detections_3d.bold());
    println!(
        "  Sync          queue {} · max interval {} ms",
        cfg.sync.queue_size, cfg.sync.max_interval_ms
    );
    if cfg.bridge.enabled {
        println!(
            "  Bridge        ws://{}:{}",
            cfg.bridge.bind_address, cfg.bridge.ws_port
        );
    } else {
        println!("  Bridge        {}", "disabled".yellow());
    }
    println!();
}

fn print_stats(stats: &FusionStats) {
    println!();
    println!("  {} fusion cycles", stats.cycles);
    println!(
        "  {} batches published ({} detections)",
        stats.published_batches.to_string().green(),
        stats.published_detections
    );
    println!("  {} without consumers, {} empty", stats.no_consumers, stats.empty);
    if stats.not_ready > 0 {
        println!("  {} discarded before calibration", stats.not_ready.to_string().yellow());
    }
    if stats.rejected_calibrations > 0 {
        println!("  {} camera info messages rejected", stats.rejected_calibrations.to_string().red());
    }
    if stats.unsupported_encoding > 0 {
        println!("  {} discarded for depth encoding", stats.unsupported_encoding.to_string().red());
    }
    println!("{}", "  ✓ Exiting detect3d.".green());
}
