use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::config::Timeouts;
use crate::error::{Error, Result};

use super::{
    ContainerDetails, ContainerRuntime, ContainerStats, ContainerStatus, ExecOutput, Mount,
};

/// [`ContainerRuntime`] backed by the `docker` CLI and its compose plugin.
///
/// Commands run as subprocesses on the given tokio runtime; the calling
/// thread blocks until they finish or their budget runs out, at which point
/// the child is killed.
pub struct DockerCli {
    binary: String,
    timeouts: Timeouts,
    handle: Handle,
}

impl DockerCli {
    pub fn new(timeouts: Timeouts, handle: Handle) -> Self {
        Self {
            binary: "docker".to_string(),
            timeouts,
            handle,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// `label` names the command in logs and errors; arguments may carry
    /// secrets and are never echoed.
    fn run(&self, args: &[&str], timeout: Duration, label: &str) -> Result<Output> {
        debug!(command = %label, timeout_secs = timeout.as_secs(), "running container runtime command");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = self
            .handle
            .block_on(async { tokio::time::timeout(timeout, cmd.output()).await })
            .map_err(|_| {
                warn!(command = %label, timeout_secs = timeout.as_secs(), "container runtime command timed out");
                Error::RuntimeTimeout {
                    command: label.to_string(),
                    timeout,
                }
            })?
            .map_err(Error::Io)?;

        Ok(output)
    }

    /// Like [`run`](Self::run) but a non-zero exit becomes [`Error::Runtime`].
    fn run_checked(&self, args: &[&str], timeout: Duration, label: &str) -> Result<String> {
        let output = self.run(args, timeout, label)?;
        if !output.status.success() {
            return Err(Error::Runtime {
                command: label.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                output: combined_output(&output),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn compose(&self, topology: &Path, tail: &[&str], label: &str) -> Result<()> {
        let path = topology.to_string_lossy();
        let mut args = vec!["compose", "-f", &*path];
        args.extend_from_slice(tail);
        self.run_checked(&args, self.timeouts.bring_up(), label)
            .map(|_| ())
    }
}

impl ContainerRuntime for DockerCli {
    fn bring_up(&self, topology: &Path, force_recreate: bool) -> Result<()> {
        let mut tail = vec!["up", "-d", "--remove-orphans"];
        if force_recreate {
            tail.push("--force-recreate");
        }
        self.compose(topology, &tail, "docker compose up")
    }

    fn tear_down(&self, topology: &Path, remove_volumes: bool) -> Result<()> {
        let mut tail = vec!["down", "--remove-orphans"];
        if remove_volumes {
            tail.push("--volumes");
        }
        self.compose(topology, &tail, "docker compose down")
    }

    fn start(&self, name: &str) -> Result<()> {
        self.run_checked(&["start", name], self.timeouts.command(), "docker start")
            .map(|_| ())
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.run_checked(&["stop", name], self.timeouts.command(), "docker stop")
            .map(|_| ())
    }

    fn restart(&self, name: &str) -> Result<()> {
        self.run_checked(&["restart", name], self.timeouts.command(), "docker restart")
            .map(|_| ())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let output = self.run(&["rm", "-f", name], self.timeouts.command(), "docker rm")?;
        if output.status.success() || is_missing(&output) {
            return Ok(());
        }
        Err(Error::Runtime {
            command: "docker rm".to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            output: combined_output(&output),
        })
    }

    fn inspect_status(&self, name: &str) -> Result<ContainerStatus> {
        let output = self.run(
            &["inspect", "--format", "{{.State.Status}}", name],
            self.timeouts.command(),
            "docker inspect",
        )?;
        if !output.status.success() {
            if is_missing(&output) {
                return Ok(ContainerStatus::Missing);
            }
            return Err(Error::Runtime {
                command: "docker inspect".to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                output: combined_output(&output),
            });
        }
        Ok(ContainerStatus::from_state(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>> {
        let output = self.run(&["inspect", name], self.timeouts.command(), "docker inspect")?;
        if !output.status.success() {
            if is_missing(&output) {
                return Ok(None);
            }
            return Err(Error::Runtime {
                command: "docker inspect".to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                output: combined_output(&output),
            });
        }
        parse_inspect(&String::from_utf8_lossy(&output.stdout))
    }

    fn stats(&self, name: &str) -> Result<ContainerStats> {
        let stdout = self.run_checked(
            &["stats", "--no-stream", "--format", "{{json .}}", name],
            self.timeouts.command(),
            "docker stats",
        )?;
        parse_stats(&stdout)
    }

    fn logs(&self, name: &str, lines: usize) -> Result<String> {
        let tail = lines.to_string();
        let output = self.run(
            &["logs", "--tail", &tail, name],
            self.timeouts.command(),
            "docker logs",
        )?;
        if !output.status.success() {
            return Err(Error::Runtime {
                command: "docker logs".to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                output: combined_output(&output),
            });
        }
        Ok(combined_output(&output))
    }

    fn exec_raw(
        &self,
        name: &str,
        command: &str,
        cwd: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput> {
        let mut args = vec!["exec"];
        if let Some(dir) = cwd {
            args.extend(["-w", dir]);
        }
        args.extend([name, "sh", "-c", command]);

        let output = self.run(
            &args,
            timeout.unwrap_or_else(|| self.timeouts.exec()),
            "docker exec",
        )?;
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn copy_to(&self, name: &str, source: &Path, destination: &str) -> Result<()> {
        let source = source.to_string_lossy();
        let target = format!("{name}:{destination}");
        self.run_checked(
            &["cp", &*source, &target],
            self.timeouts.command(),
            "docker cp",
        )
        .map(|_| ())
    }

    fn list_volumes(&self, filter: &str) -> Result<Vec<String>> {
        let filter = format!("name={filter}");
        let stdout = self.run_checked(
            &["volume", "ls", "-q", "--filter", &filter],
            self.timeouts.command(),
            "docker volume ls",
        )?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn remove_volume(&self, name: &str) -> Result<()> {
        self.run_checked(
            &["volume", "rm", name],
            self.timeouts.command(),
            "docker volume rm",
        )
        .map(|_| ())
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self.run(
            &["image", "inspect", image],
            self.timeouts.command(),
            "docker image inspect",
        )?;
        Ok(output.status.success())
    }
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    text
}

fn is_missing(output: &Output) -> bool {
    let stderr = String::from_utf8_lossy(&output.stderr);
    stderr.contains("No such container") || stderr.contains("No such object")
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    state: InspectState,
    config: InspectConfig,
    #[serde(default)]
    mounts: Vec<InspectMount>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    #[serde(default)]
    started_at: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
    #[serde(default)]
    env: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectMount {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    source: String,
    destination: String,
}

fn parse_inspect(json: &str) -> Result<Option<ContainerDetails>> {
    let entries: Vec<InspectEntry> = serde_json::from_str(json)?;
    Ok(entries.into_iter().next().map(|entry| {
        // the runtime reports the zero time for containers that never started
        let started_at = entry
            .state
            .started_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .filter(|dt| dt.timestamp() > 0);

        ContainerDetails {
            status: ContainerStatus::from_state(&entry.state.status),
            started_at,
            image: entry.config.image,
            mounts: entry
                .mounts
                .into_iter()
                .map(|m| Mount {
                    name: m.name,
                    source: m.source,
                    destination: m.destination,
                })
                .collect(),
            env: entry.config.env.unwrap_or_default(),
        }
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatsLine {
    #[serde(rename = "CPUPerc")]
    cpu_perc: String,
    mem_usage: String,
    mem_perc: String,
}

fn parse_percent(value: &str) -> f64 {
    value.trim().trim_end_matches('%').parse().unwrap_or(0.0)
}

fn parse_stats(stdout: &str) -> Result<ContainerStats> {
    let line = stdout
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| Error::Runtime {
            command: "docker stats".to_string(),
            exit_code: 0,
            output: "no stats returned".to_string(),
        })?;
    let stats: StatsLine = serde_json::from_str(line)?;
    Ok(ContainerStats {
        cpu_percent: parse_percent(&stats.cpu_perc),
        mem_usage: stats.mem_usage,
        mem_percent: parse_percent(&stats.mem_perc),
    })
}
