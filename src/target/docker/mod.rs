//! [`ExecutionTarget`] backed by the Docker Engine API on the daemon's unix socket.
//!
//! Endpoints used:
//!
//! - `POST /containers/{id}/exec`, `POST /exec/{id}/start`, `GET /exec/{id}/json`
//! - `GET /containers/{id}/changes`
//! - `GET /containers/{id}/json`
//! - `GET /images/{id}/history`
mod client;
mod container_ref;
mod error;
mod models;
mod stream;

pub use client::{DEFAULT_SOCKET, UnixClient};
pub use container_ref::ContainerRef;
pub use error::{Error, Result};
pub use stream::{Demultiplexed, StreamError, demultiplex, demultiplex_complete};

use std::time::Duration;

use http_body_util::BodyExt;
use hyper::Method;
use tokio::time::Instant;

use self::models::{
    ChangeEntry, ContainerInspect, ExecCreateRequest, ExecInspect, ExecStartRequest,
    HistoryEntry, IdResponse,
};
use super::{Change, ChangeKind, ExecOutput, ExecutionTarget};
use crate::advisor::{Layer, LayerInfo};

/// The daemon may report an exec as running for a moment after its stream closed.
const EXIT_CODE_POLLS: u32 = 5;
const EXIT_CODE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A running container reached through the Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerTarget {
    client: UnixClient,
    container: ContainerRef,
}

impl DockerTarget {
    pub fn new(client: UnixClient, container: ContainerRef) -> Self {
        Self { client, container }
    }

    async fn inspect(&self) -> Result<ContainerInspect> {
        self.client
            .json::<(), _>(
                Method::GET,
                &format!("/containers/{}/json", self.container),
                None,
            )
            .await
    }

    /// Returns the size and origin of every non-empty layer of the container's image,
    /// base layer first. Per-file digests are not available from the daemon, so the
    /// layers carry no file lists.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the container or its image cannot be inspected.
    pub async fn image_history(&self) -> Result<LayerInfo> {
        let inspect = self.inspect().await?;
        let history: Vec<HistoryEntry> = self
            .client
            .json::<(), _>(Method::GET, &format!("/images/{}/history", inspect.image), None)
            .await?;

        Ok(layers_from_history(history))
    }

    /// Runs `command`; with a `deadline`, the output stream is read only until then.
    async fn run_exec(&self, command: &str, deadline: Option<Instant>) -> Result<ExecOutput> {
        let create = ExecCreateRequest {
            attach_stdout: true,
            attach_stderr: true,
            tty: false,
            cmd: ["sh", "-c", command],
        };
        let exec: IdResponse = self
            .client
            .json(
                Method::POST,
                &format!("/containers/{}/exec", self.container),
                Some(&create),
            )
            .await?;

        let start = ExecStartRequest {
            detach: false,
            tty: false,
        };
        let start_path = format!("/exec/{}/start", exec.id);
        let stream_error = |source| Error::Stream {
            exec_id: exec.id.clone(),
            source,
        };

        if let Some(deadline) = deadline {
            let (raw, finished) = self.read_until(&start_path, &start, deadline).await?;
            if !finished {
                let output = demultiplex_complete(&raw).map_err(stream_error)?;
                log::warn!(
                    "exec `{}` in {} overran its time limit after {} bytes of output; \
                     it may still be running in the container",
                    command,
                    self.container,
                    output.stdout.len()
                );
                return Ok(ExecOutput {
                    exit_code: -1,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    timed_out: true,
                });
            }
            let output = demultiplex(&raw).map_err(stream_error)?;
            return self.finish_exec(command, &exec.id, output).await;
        }

        let raw = self
            .client
            .send(Method::POST, &start_path, Some(&start))
            .await?;
        let output = demultiplex(&raw.body).map_err(stream_error)?;
        self.finish_exec(command, &exec.id, output).await
    }

    /// Collects the start stream until it ends or `deadline` passes. The flag tells
    /// whether the stream ended.
    async fn read_until(
        &self,
        path: &str,
        start: &ExecStartRequest,
        deadline: Instant,
    ) -> Result<(Vec<u8>, bool)> {
        let mut body = self.client.stream(Method::POST, path, Some(start)).await?;
        let mut raw = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, body.frame()).await {
                Err(_) => return Ok((raw, false)),
                Ok(None) => return Ok((raw, true)),
                Ok(Some(frame)) => {
                    if let Ok(data) = frame.map_err(Error::Http)?.into_data() {
                        raw.extend_from_slice(&data);
                    }
                }
            }
        }
    }

    async fn exit_code(&self, exec_id: &str) -> Result<i64> {
        let path = format!("/exec/{exec_id}/json");
        for attempt in 1..=EXIT_CODE_POLLS {
            let inspect: ExecInspect = self.client.json::<(), _>(Method::GET, &path, None).await?;
            match inspect.exit_code {
                Some(code) if !inspect.running => return Ok(code),
                _ if attempt < EXIT_CODE_POLLS => {
                    log::trace!("exec {exec_id} still settling, attempt {attempt}");
                    tokio::time::sleep(EXIT_CODE_POLL_INTERVAL).await;
                }
                _ => {}
            }
        }
        Err(Error::MissingExitCode(exec_id.to_owned()))
    }

    async fn finish_exec(
        &self,
        command: &str,
        exec_id: &str,
        output: Demultiplexed,
    ) -> Result<ExecOutput> {
        let exit_code = self.exit_code(exec_id).await?;
        log::trace!(
            "exec `{}` in {} exited with {} ({} bytes stdout, {} bytes stderr)",
            command,
            self.container,
            exit_code,
            output.stdout.len(),
            output.stderr.len()
        );

        Ok(ExecOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            timed_out: false,
        })
    }
}

impl ExecutionTarget for DockerTarget {
    type Error = Error;

    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        self.run_exec(command, None).await
    }

    async fn exec_within(&self, command: &str, limit: Duration) -> Result<ExecOutput> {
        self.run_exec(command, Some(Instant::now() + limit)).await
    }

    async fn diff(&self) -> Result<Vec<Change>> {
        let entries: Option<Vec<ChangeEntry>> = self
            .client
            .json::<(), _>(
                Method::GET,
                &format!("/containers/{}/changes", self.container),
                None,
            )
            .await?;

        Ok(changes_from_entries(entries.unwrap_or_default()))
    }

    async fn inspect_pid(&self) -> Result<Option<u32>> {
        let inspect = self.inspect().await?;
        Ok((inspect.state.running && inspect.state.pid != 0).then_some(inspect.state.pid))
    }
}

fn changes_from_entries(entries: Vec<ChangeEntry>) -> Vec<Change> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let kind = match entry.kind {
                0 => ChangeKind::Modified,
                1 => ChangeKind::Added,
                2 => ChangeKind::Deleted,
                other => {
                    log::warn!("unknown change kind {} for `{}`", other, entry.path);
                    return None;
                }
            };
            Some(Change::new(entry.path, kind))
        })
        .collect()
}

fn layers_from_history(history: Vec<HistoryEntry>) -> LayerInfo {
    // The daemon lists the newest layer first.
    let layers = history
        .into_iter()
        .rev()
        .filter(|entry| entry.size > 0)
        .map(|entry| Layer {
            id: entry.id,
            created_by: entry.created_by,
            size_bytes: entry.size as u64,
            files: Vec::new(),
        })
        .collect();

    LayerInfo { layers }
}
