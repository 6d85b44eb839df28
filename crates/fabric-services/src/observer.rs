//! Observer processes: external packet observers feeding the engine.
//!
//! One process per interface. Its stdout is one JSON object per line, each
//! an `Observation` of a beacon seen on that interface. Its stderr is
//! logged. When it exits it is restarted after `restart_interval`.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::EngineHandle;
use crate::observation::Observation;

/// Parse one observer line. The observer's interface overrides whatever
/// the line itself claims.
pub fn parse_observation_line(line: &str, ifname: &str) -> Result<Observation, serde_json::Error> {
    let mut observation: Observation = serde_json::from_str(line)?;
    observation.interface = Some(ifname.to_string());
    Ok(observation)
}

/// A supervised observer process for one interface.
pub struct ObserverProcess {
    ifname: String,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

enum RunEnd {
    Stopped,
    Exited(ExitStatus),
}

impl ObserverProcess {
    /// Start observing `ifname`. The interface name is appended to `command`.
    pub fn spawn(
        command: Vec<String>,
        ifname: impl Into<String>,
        engine: EngineHandle,
        restart_interval: Duration,
    ) -> Self {
        let ifname = ifname.into();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(supervise(
            command,
            ifname.clone(),
            engine,
            restart_interval,
            stop_rx,
        ));
        tracing::info!(interface = %ifname, "observer started");
        Self {
            ifname,
            stop_tx,
            task,
        }
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    /// Kill the process and wait for the supervisor to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(interface = %self.ifname, error = %e, "observer task failed");
        }
        tracing::info!(interface = %self.ifname, "observer stopped");
    }
}

async fn supervise(
    command: Vec<String>,
    ifname: String,
    engine: EngineHandle,
    restart_interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        match run_once(&command, &ifname, &engine, &mut stop).await {
            Ok(RunEnd::Stopped) => return,
            Ok(RunEnd::Exited(status)) => {
                tracing::warn!(interface = %ifname, %status, "observer exited");
            }
            Err(e) => {
                tracing::warn!(interface = %ifname, error = %e, "observer failed");
            }
        }
        if engine.is_closed() {
            return;
        }

        tokio::select! {
            _ = stop.changed() => return,
            _ = tokio::time::sleep(restart_interval) => {
                tracing::info!(interface = %ifname, "restarting observer");
            }
        }
    }
}

async fn run_once(
    command: &[String],
    ifname: &str,
    engine: &EngineHandle,
    stop: &mut watch::Receiver<bool>,
) -> Result<RunEnd> {
    let (program, args) = command.split_first().context("observer command is empty")?;
    let mut child = Command::new(program)
        .args(args)
        .arg(ifname)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {program} for {ifname}"))?;

    let stdout = child.stdout.take().context("observer stdout not captured")?;
    let stderr = child.stderr.take().context("observer stderr not captured")?;
    let stderr_task = tokio::spawn(log_stderr(stderr, ifname.to_string()));

    let mut lines = BufReader::new(stdout).lines();
    let end = loop {
        tokio::select! {
            _ = stop.changed() => {
                let _ = child.kill().await;
                break RunEnd::Stopped;
            }

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_observation_line(&line, ifname) {
                        Ok(observation) => {
                            if engine.observe(observation).await.is_err() {
                                let _ = child.kill().await;
                                break RunEnd::Stopped;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(interface = %ifname, error = %e, "unparsable observer line");
                        }
                    }
                }
                Ok(None) => {
                    let status = child.wait().await.context("waiting for observer")?;
                    break RunEnd::Exited(status);
                }
                Err(e) => {
                    tracing::warn!(interface = %ifname, error = %e, "observer stdout read failed");
                    let _ = child.kill().await;
                    let status = child.wait().await.context("waiting for observer")?;
                    break RunEnd::Exited(status);
                }
            }
        }
    };

    stderr_task.abort();
    Ok(end)
}

async fn log_stderr(stderr: ChildStderr, ifname: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(source = %format!("observe-beacons[{ifname}]"), "{line}");
    }
}
