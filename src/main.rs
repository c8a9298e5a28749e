//! Cube Link CLI - Play an animation sequence on an LED cube.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cube_link::{
    animation::{AnimationScheduler, CancellationToken, PlaybackReport},
    link::{ConnectStatus, FrameStreamer, SimulatedDevice, StatusCallback, Transport, available_ports},
    schema::{AnimationSequence, LinkConfig},
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    match args[1].as_str() {
        "--example" => {
            print_example();
            return;
        }
        "--ports" => {
            list_ports();
            return;
        }
        _ => {}
    }

    if args.len() < 3 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    let sequence_path = PathBuf::from(&args[1]);
    let mut sequence = AnimationSequence::load(&sequence_path).unwrap_or_else(|e| {
        eprintln!("Error loading sequence: {}", e);
        std::process::exit(1);
    });
    let config = load_config(&sequence_path);

    let once = args[3..].iter().any(|a| a == "--once");
    if args[2] == "--simulate" || once {
        sequence.looping = false;
    }

    println!("Cube Link");
    println!("=========");
    println!(
        "Sequence: {} ({} frames, side {})",
        sequence.name,
        sequence.frame_count(),
        sequence.side
    );
    println!("Looping: {}", sequence.looping);
    println!();

    let status: StatusCallback = Arc::new(|line: &str| println!("  [cube] {}", line));
    let streamer = FrameStreamer::new(config.clone()).unwrap_or_else(|e| {
        eprintln!("Invalid link config: {}", e);
        std::process::exit(1);
    });
    let streamer = Arc::new(streamer.with_status(status));

    if args[2] == "--simulate" {
        simulate(&streamer, sequence, &config);
    } else {
        play(&streamer, &args[2], sequence, &config, once);
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <sequence.json> <port> [--once]", program);
    eprintln!("       {} <sequence.json> --simulate", program);
    eprintln!("       {} --ports", program);
    eprintln!("       {} --example", program);
    eprintln!();
    eprintln!("Stream an animation sequence to an LED cube over a serial port.");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  sequence.json  Path to the animation sequence");
    eprintln!("  port           Serial port of the cube (see --ports)");
    eprintln!("  --once         Play a single pass instead of looping until Enter");
    eprintln!("  --simulate     Play one pass against an in-process cube");
    eprintln!();
    eprintln!("Link timing is read from <sequence>.link.json when present.");
    eprintln!("Example files are generated with the --example flag.");
}

/// Link configuration from the sidecar file, or defaults.
fn load_config(sequence_path: &Path) -> LinkConfig {
    let config_path = sequence_path.with_extension("link.json");
    if !config_path.exists() {
        return LinkConfig::default();
    }
    LinkConfig::load(&config_path).unwrap_or_else(|e| {
        eprintln!("Error loading link config: {}", e);
        std::process::exit(1);
    })
}

fn list_ports() {
    match available_ports() {
        Ok(ports) if ports.is_empty() => println!("No serial ports found."),
        Ok(ports) => {
            for port in ports {
                println!("{}", port);
            }
        }
        Err(e) => {
            eprintln!("Error listing ports: {}", e);
            std::process::exit(1);
        }
    }
}

fn play(
    streamer: &Arc<FrameStreamer>,
    port: &str,
    sequence: AnimationSequence,
    config: &LinkConfig,
    once: bool,
) {
    let status = streamer.connect(port);
    if status != ConnectStatus::Succeeded {
        eprintln!("Could not connect to '{}': {}", port, status);
        std::process::exit(1);
    }

    let scheduler = new_scheduler(streamer, sequence, config);
    let start = Instant::now();
    let handle = scheduler.start().unwrap_or_else(|e| {
        eprintln!("Error starting playback: {}", e);
        std::process::exit(1);
    });

    let report = if once {
        handle.wait()
    } else {
        println!("Playing, press Enter or Ctrl-D to stop.");
        let stdin = io::stdin();
        let mut line = String::new();
        // Any input, or EOF, ends playback.
        if let Err(e) = stdin.lock().read_line(&mut line) {
            log::debug!("stdin read failed, stopping playback: {}", e);
        }
        handle.stop()
    };

    let diagnostics = streamer.disconnect();
    println!();
    print_report(report, start.elapsed());
    if let Some(diagnostics) = diagnostics {
        println!("Session: {}", diagnostics);
    }
}

fn simulate(streamer: &Arc<FrameStreamer>, sequence: AnimationSequence, config: &LinkConfig) {
    let device = SimulatedDevice::new(sequence.side as u8, 3, 8);
    let transport = device.transport();
    let status = streamer.connect_with("simulated", move |_, _| {
        Ok(Box::new(transport) as Box<dyn Transport>)
    });
    if status != ConnectStatus::Succeeded {
        eprintln!("Simulated cube did not connect: {}", status);
        std::process::exit(1);
    }

    // The simulated cube pulls as fast as the host answers.
    let pulling = CancellationToken::new();
    let puller = {
        let device = device.clone();
        let pulling = pulling.clone();
        thread::spawn(move || {
            while !pulling.sleep(Duration::from_millis(1)) {
                device.pull();
            }
        })
    };

    let start = Instant::now();
    let report = new_scheduler(streamer, sequence, config).run(&CancellationToken::new());
    pulling.cancel();
    if puller.join().is_err() {
        eprintln!("Simulated cube thread panicked");
    }

    let diagnostics = streamer.disconnect();
    println!();
    print_report(Some(report), start.elapsed());
    if let Some(diagnostics) = diagnostics {
        println!("Session: {}", diagnostics);
    }

    let stats = device.stats();
    println!("Simulated cube:");
    println!("  Chunks received: {}", stats.chunks_received);
    println!("  Corrupted: {}", stats.corrupted);
    println!("  Frames displayed: {}", stats.displayed);
    println!("  Display failures: {}", stats.display_failed);
}

fn new_scheduler(
    streamer: &Arc<FrameStreamer>,
    sequence: AnimationSequence,
    config: &LinkConfig,
) -> AnimationScheduler {
    AnimationScheduler::new(sequence, streamer.clone(), config).unwrap_or_else(|e| {
        eprintln!("Invalid sequence: {}", e);
        std::process::exit(1);
    })
}

fn print_report(report: Option<PlaybackReport>, elapsed: Duration) {
    match report {
        Some(report) => {
            println!("Playback:");
            println!("  Passes: {}", report.passes);
            println!("  Frames streamed: {}", report.frames_streamed);
            println!("  Display requests: {}", report.display_requests);
            println!("  Stopped early: {}", report.cancelled);
            println!("  Time: {:.2}s", elapsed.as_secs_f32());
        }
        None => println!("Playback ended abnormally."),
    }
}

fn print_example() {
    let sequence = AnimationSequence::example(4).unwrap_or_else(|e| {
        eprintln!("Error building example: {}", e);
        std::process::exit(1);
    });
    let config = LinkConfig::default();

    println!("Example sequence (sequence.json):");
    println!("{}", pretty(&sequence));
    println!();
    println!("Example link configuration (sequence.link.json):");
    println!("{}", pretty(&config));
}

fn pretty<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        eprintln!("Error serializing example: {}", e);
        std::process::exit(1);
    })
}
