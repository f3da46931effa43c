use anyhow::Result;
use log::{error, info, warn};
use std::{
    io::{BufRead, BufReader, ErrorKind, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    sync::{Arc, atomic::AtomicBool},
    time::Duration,
};

use super::runtime::socket_path;
use crate::adc::{AdcDriver, IioAdc};
use crate::config::ConfigState;
use crate::pipeline::{Pipeline, Status};
use crate::runner::{self, Ticker};
use crate::sink::{LogSink, OutputSink};

const CLIENT_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Shutdown,
}

pub struct StatusServer {
    listener: UnixListener,
    path: PathBuf,
    profile: String,
}

impl StatusServer {
    pub fn bind(path: &Path, profile: &str) -> Result<Self> {
        if path.exists() {
            if UnixStream::connect(path).is_ok() {
                return Err(anyhow::anyhow!(
                    "another petpad instance is listening on {}",
                    path.display()
                ));
            }
            let _ = std::fs::remove_file(path);
        }
        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        info!("ipc: listening on {}", path.display());
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            profile: profile.to_string(),
        })
    }

    pub fn poll(&mut self, status: &Status) -> Control {
        let mut control = Control::Continue;
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => match self.handle_client(stream, status) {
                    Ok(Control::Shutdown) => control = Control::Shutdown,
                    Ok(Control::Continue) => {}
                    Err(e) => error!("ipc client error: {e}"),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("ipc accept failed: {e}");
                    break;
                }
            }
        }
        control
    }

    fn handle_client(&self, mut stream: UnixStream, status: &Status) -> Result<Control> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;
        stream.set_write_timeout(Some(CLIENT_TIMEOUT))?;

        let mut reader = BufReader::new(stream.try_clone()?);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line.trim().is_empty() {
            return Ok(Control::Continue);
        }
        let (resp, control) = respond(&line, status, &self.profile);
        writeln!(stream, "{resp}")?;
        Ok(control)
    }
}

impl Drop for StatusServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn respond(line: &str, status: &Status, profile: &str) -> (serde_json::Value, Control) {
    let req: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return (
                serde_json::json!({"ok": false, "error": format!("bad request: {e}")}),
                Control::Continue,
            );
        }
    };
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");

    match op {
        "status" => {
            let mut data = serde_json::to_value(status).unwrap_or_default();
            if let Some(obj) = data.as_object_mut() {
                obj.insert("profile".into(), profile.into());
                obj.insert("pid".into(), std::process::id().into());
            }
            (serde_json::json!({"ok": true, "data": data}), Control::Continue)
        }
        "shutdown" => (
            serde_json::json!({"ok": true, "data": "shutting down"}),
            Control::Shutdown,
        ),
        _ => (
            serde_json::json!({"ok": false, "error": format!("unknown op: {op}")}),
            Control::Continue,
        ),
    }
}

pub fn serve<D: AdcDriver, S: OutputSink>(
    cfg: &ConfigState,
    pipeline: &mut Pipeline<D>,
    sink: &mut S,
    stop: &AtomicBool,
) -> Result<()> {
    let mut server = match socket_path().and_then(|p| StatusServer::bind(&p, &cfg.active_name)) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("ipc disabled: {e}");
            None
        }
    };

    let mut ticker = Ticker::new(Duration::from_millis(cfg.profile.sensor.period_ms()));
    runner::run(pipeline, sink, &mut ticker, stop, |pl| match server.as_mut() {
        Some(srv) => srv.poll(&pl.status()) == Control::Continue,
        None => true,
    })
}

pub fn register_stop_flag() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(sig, Arc::clone(&stop))?;
    }
    Ok(stop)
}

pub fn run_daemon(profile_override: Option<&str>) -> Result<()> {
    let cfg = ConfigState::load_or_install_default(profile_override)?;
    info!("daemon: active profile '{}'", cfg.active_name);

    let s = &cfg.profile.sensor;
    let adc = IioAdc::open_or_discover(
        s.device.as_deref(),
        Duration::from_millis(s.io_timeout_ms),
    )?;
    info!(
        "daemon: sampling {} channel {} at {} Hz",
        adc.path().display(),
        s.channel,
        s.sample_rate_hz
    );

    let stop = register_stop_flag()?;
    let mut pipeline = Pipeline::new(adc, &cfg.profile, 0);
    let mut sink = LogSink;
    serve(&cfg, &mut pipeline, &mut sink, &stop)?;
    info!("daemon: stopped");
    Ok(())
}
