//! # Spire Host
//!
//! Headless hosting endpoint: runs the lobby, the relay, and the tick loop
//! without a local player, so a room can outlive anyone's monitor.
//!
//! ## Usage
//!
//! ```bash
//! spire_host --port 7777 --max-players 4 --tick-rate 60
//! ```

use std::net::SocketAddr;

use kingspire_netcode::{GameHost, HostConfig, SessionEvent, TickLoop};

fn main() {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         KINGSPIRE SPIRE HOST                                     ║");
    println!("║         ROOM AUTHORITY AND RELAY                                 ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    // Parse command line arguments (simple parsing, no external deps)
    let args: Vec<String> = std::env::args().collect();
    let mut config = HostConfig::default();
    let mut config_path: Option<String> = None;
    let mut duration_secs: Option<u64> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    let port = args[i + 1].parse().unwrap_or(kingspire_netcode::DEFAULT_PORT);
                    config.listen_addr = SocketAddr::from(([0, 0, 0, 0], port));
                    i += 1;
                }
            }
            "--max-players" | "-m" => {
                if i + 1 < args.len() {
                    config.max_players = args[i + 1].parse().unwrap_or(config.max_players);
                    i += 1;
                }
            }
            "--tick-rate" | "-t" => {
                if i + 1 < args.len() {
                    config.tick_rate = args[i + 1].parse().unwrap_or(config.tick_rate);
                    i += 1;
                }
            }
            "--duration" | "-d" => {
                if i + 1 < args.len() {
                    duration_secs = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Usage: spire_host [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>        Load a TOML host config");
                println!("  -p, --port <PORT>          TCP port to bind (default: 7777)");
                println!("  -m, --max-players <NUM>    Room capacity (default: 4)");
                println!("  -t, --tick-rate <RATE>     Publication rate in Hz (default: 60)");
                println!("  -d, --duration <SECS>      Run for N seconds then exit");
                println!("  -h, --help                 Show this help");
                return;
            }
            _ => {}
        }
        i += 1;
    }

    if let Some(path) = config_path {
        match HostConfig::from_toml_file(&path) {
            Ok(loaded) => config = loaded,
            Err(err) => {
                eprintln!("failed to load {path}: {err}");
                std::process::exit(1);
            }
        }
    }

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Listen Address:     {}", config.listen_addr);
    println!("│ Room:               {} ({} / {})", config.room_id, config.game_mode, config.map_name);
    println!("│ Max Players:        {}", config.max_players);
    println!("│ Tick Rate:          {} Hz", config.tick_rate);
    println!(
        "│ Heartbeat:          {}ms interval, {}ms timeout",
        config.heartbeat.interval_ms, config.heartbeat.timeout_ms
    );
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let tick_rate = config.tick_rate;
    let mut host = match GameHost::bind(config) {
        Ok(host) => host,
        Err(err) => {
            eprintln!("failed to start host: {err}");
            std::process::exit(1);
        }
    };
    let mut tick_loop = TickLoop::new(tick_rate);

    println!("Hosting on {} ...", host.local_addr());
    println!();

    let start = std::time::Instant::now();
    let mut last_status_tick = 0u64;
    let status_interval = u64::from(tick_rate) * 5; // Every 5 seconds

    loop {
        if let Some(duration) = duration_secs {
            if start.elapsed().as_secs() >= duration {
                break;
            }
        }

        tick_loop.wait_for_next_tick();

        while tick_loop.should_tick() {
            let tick_start = tick_loop.begin_tick();

            for event in host.update() {
                announce(&event);
            }

            tick_loop.end_tick(tick_start);

            let current_tick = tick_loop.tick_count();
            if current_tick - last_status_tick >= status_interval {
                last_status_tick = current_tick;
                let stats = tick_loop.stats();
                println!(
                    "[tick {current_tick}] phase={:?} players={} entities={} avg_tick={}us late={}",
                    host.room().phase(),
                    host.room().participants().len(),
                    host.world().players().len()
                        + host.world().projectiles().len()
                        + host.world().enemies().len(),
                    stats.avg_tick_us,
                    stats.late_ticks,
                );
            }
        }
    }

    host.shutdown();
    println!();
    println!("Room closed after {:.1}s.", start.elapsed().as_secs_f64());
}

fn announce(event: &SessionEvent) {
    match event {
        SessionEvent::ParticipantJoined(participant) => {
            println!("+ {} joined as {}", participant.display_name, participant.id);
        }
        SessionEvent::ParticipantLeft { id, reason } => {
            println!("- {id} left ({reason:?})");
        }
        SessionEvent::ReadinessChanged { id, ready } => {
            println!("  {id} is {}", if *ready { "ready" } else { "not ready" });
        }
        SessionEvent::CharacterChanged { id, character } => {
            println!("  {id} picked {character}");
        }
        SessionEvent::PhaseChanged(phase) => println!("  room phase: {phase:?}"),
        SessionEvent::GameStarted => println!("  match live"),
        SessionEvent::RoomClosed => println!("  room closed"),
        _ => {}
    }
}
