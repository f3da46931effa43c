use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{
    env,
    io::{self, Write},
    path::PathBuf,
    process::Command,
    sync::atomic::Ordering,
    thread,
    time::Duration,
};

use crate::adc::{AdcDriver, IioAdc, ReplayAdc};
use crate::calibrate;
use crate::config::{self, ConfigState};
use crate::ipc;
use crate::pipeline::Pipeline;
use crate::runner;
use crate::sampler::normalize;
use crate::sink::{JsonLinesSink, TerminalSink};

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    let profile: Option<String> = pargs.opt_value_from_str("--profile")?;

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon(profile.as_deref());
    }

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    // Flags-based help (-h/--help)
    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let json = pargs.contains("--json");
    let device: Option<String> = pargs.opt_value_from_str("--device")?;
    let baseline: Option<i32> = pargs.opt_value_from_str("--baseline")?;

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("run") => {
            let cfg = ConfigState::load_or_install_default(profile.as_deref())?;
            let adc = open_adc(&cfg, device.as_deref())?;
            let stop = ipc::register_stop_flag()?;
            let mut pipeline = Pipeline::new(adc, &cfg.profile, 0);
            if json {
                let mut sink = JsonLinesSink::new(io::stdout().lock());
                ipc::serve(&cfg, &mut pipeline, &mut sink, &stop)
            } else {
                let mut sink = TerminalSink::new(
                    io::stdout().lock(),
                    cfg.profile.display.bar_width,
                    cfg.profile.intensity.max_level,
                );
                sink.header()?;
                ipc::serve(&cfg, &mut pipeline, &mut sink, &stop)?;
                println!("\nstopped");
                Ok(())
            }
        }

        Some("start") => {
            let exe = std::env::current_exe()?;
            let mut cmd = Command::new(exe);
            cmd.arg("--daemon");
            if let Some(p) = &profile {
                cmd.args(["--profile", p]);
            }
            let child = cmd.spawn()?;
            println!("petpad: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => {
            let r = ipc::client_request(serde_json::json!({"op":"shutdown"}))?;
            print_response(&r);
            Ok(())
        }

        Some("status") => {
            let r = ipc::client_request(serde_json::json!({"op":"status"}))?;
            print_response(&r);
            Ok(())
        }

        Some("replay") => {
            let path: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: petpad replay <trace_file> [--json]"))?;
            let cfg = ConfigState::load_or_install_default(profile.as_deref())?;
            let adc = ReplayAdc::open(&path)?;
            let period_ms = cfg.profile.sensor.period_ms();
            let mut pipeline = runner::replay_pipeline(adc, &cfg.profile);
            let counters = if json {
                let mut sink = JsonLinesSink::new(io::stdout().lock());
                runner::replay(&mut pipeline, &mut sink, period_ms)?
            } else {
                let mut sink = TerminalSink::new(
                    io::stdout().lock(),
                    cfg.profile.display.bar_width,
                    cfg.profile.intensity.max_level,
                );
                let c = runner::replay(&mut pipeline, &mut sink, period_ms)?;
                println!();
                c
            };
            let summary = serde_json::json!({
                "trace": path,
                "counters": counters,
                "final_intensity": pipeline.status().intensity,
            });
            eprintln!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }

        Some("read") => {
            let cfg = ConfigState::load_or_install_default(profile.as_deref())?;
            let mut adc = open_adc(&cfg, device.as_deref())?;
            let stop = ipc::register_stop_flag()?;
            let ch = cfg.profile.sensor.channel;
            println!("Raw Value | Position");
            println!("{}", "-".repeat(22));
            let mut out = io::stdout().lock();
            while !stop.load(Ordering::Relaxed) {
                match adc.read_channel(ch) {
                    Ok(raw) => match normalize(raw, &cfg.profile.calibration) {
                        Some(p) => write!(out, "\r{raw:>9} | {p:.3}     ")?,
                        None => write!(out, "\r{raw:>9} | no touch")?,
                    },
                    Err(e) => write!(out, "\r{:>9} | {e}", "-")?,
                }
                out.flush()?;
                thread::sleep(Duration::from_millis(10));
            }
            writeln!(out)?;
            Ok(())
        }

        Some("calibrate") => {
            let cfg = ConfigState::load_or_install_default(profile.as_deref())?;
            let mut adc = open_adc(&cfg, device.as_deref())?;
            let stop = ipc::register_stop_flag()?;
            let out = config::calibration_path(&cfg.config_dir);
            let baseline = baseline.unwrap_or(cfg.profile.calibration.contact_min);
            let saved = calibrate::run(
                &mut adc,
                cfg.profile.sensor.channel,
                baseline,
                Duration::from_millis(10),
                &out,
                &stop,
            )?;
            match saved {
                Some(s) => println!(
                    "calibration saved: raw_min={} raw_max={} ({} cycles) -> {}",
                    s.min_raw,
                    s.max_raw,
                    s.cycles,
                    out.display()
                ),
                None => println!("no contact above baseline {baseline}; nothing saved"),
            }
            Ok(())
        }

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: petpad use <profile_name>"))?;
            let mut cfg = ConfigState::load_or_install_default(None)?;
            cfg.set_active(&name)?;
            println!("active profile: {name} (restart a running daemon to apply)");
            Ok(())
        }

        Some("list") => {
            let cfg = ConfigState::load_or_install_default(None)?;
            for p in cfg.list_profiles() {
                let mark = if p == cfg.active_name { "*" } else { " " };
                println!("{mark} {p}");
            }
            Ok(())
        }

        Some("doctor") => {
            let cfg = ConfigState::load_or_install_default(profile.as_deref())?;
            print_response(&cfg.doctor_report());
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn open_adc(cfg: &ConfigState, device: Option<&str>) -> Result<IioAdc> {
    let s = &cfg.profile.sensor;
    let device = device.or(s.device.as_deref());
    IioAdc::open_or_discover(device, Duration::from_millis(s.io_timeout_ms))
}

fn print_help() {
    println!(
        r#"petpad - softpot petting gesture daemon

USAGE:
  petpad help [command]             Show general or command-specific help
  petpad run [--json]               Run in the foreground with a live touch bar
  petpad start                      Start the background daemon
  petpad stop                       Stop the running loop
  petpad status                     Show touch state, intensity and counters
  petpad replay <trace> [--json]    Feed a recorded raw trace through the pipeline
  petpad read                       Print raw ADC readings
  petpad calibrate [--baseline N]   Capture the strip's raw range
  petpad list                       List profiles
  petpad use <name>                 Switch active profile
  petpad doctor                     Check ADC driver and permissions

OPTIONS:
  --profile <name>                  Use a profile other than the active one
  --device <dir>                    IIO device directory (e.g. /sys/bus/iio/devices/iio:device0)

TIPS:
  - Profiles: ~/.config/petpad/profiles
  - Saved calibration: ~/.config/petpad/calibration.json
  - Log level: PETPAD_LOG=debug
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "run" => println!(
            "usage: petpad run [--json] [--device <dir>]\nSamples the strip and draws position and intensity; --json prints gesture events as JSON lines."
        ),
        "start" => println!("usage: petpad start\nStarts the background daemon."),
        "stop" => println!("usage: petpad stop\nStops the running daemon or foreground loop."),
        "status" => println!(
            "usage: petpad status\nShows touch state, stroke phase, intensity, gesture counters, profile and PID."
        ),
        "replay" => println!(
            "usage: petpad replay <trace> [--json]\nOne raw value per line, '#' comments, '!' for a failed read."
        ),
        "read" => println!("usage: petpad read [--device <dir>]\nPrints raw readings until Ctrl+C."),
        "calibrate" => println!(
            "usage: petpad calibrate [--baseline N]\nSweep the whole strip; each contact updates the saved raw range."
        ),
        "use" => println!(
            "usage: petpad use <name>\nSwitches the active profile; takes effect on next start."
        ),
        "list" => println!("usage: petpad list\nLists available profiles; marks active with '*'."),
        "doctor" => println!(
            "usage: petpad doctor\nLists IIO ADC devices, I2C buses and group membership."
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
