//! In-memory execution target used by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use super::{Change, ExecOutput, ExecutionTarget};

#[derive(Debug, thiserror::Error)]
#[error("no scripted response for `{0}`")]
pub struct UnscriptedCommand(pub String);

/// Answers commands from a table of `(prefix, output)` pairs; the longest matching
/// prefix wins. Records every command it receives.
///
/// With a delay longer than an [`exec_within`](ExecutionTarget::exec_within) limit,
/// the scripted output counts as streamed before the limit and comes back timed out.
#[derive(Debug, Default)]
pub struct ScriptedTarget {
    responses: Vec<(String, ExecOutput)>,
    diffs: Mutex<VecDeque<Vec<Change>>>,
    pid: Option<u32>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTarget {
    pub fn on(mut self, prefix: &str, output: ExecOutput) -> Self {
        self.responses.push((prefix.to_owned(), output));
        self
    }

    pub fn with_diffs(self, diffs: Vec<Vec<Change>>) -> Self {
        *self.diffs.lock().unwrap() = diffs.into();
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn lookup(&self, command: &str) -> Option<ExecOutput> {
        self.responses
            .iter()
            .filter(|(prefix, _)| command.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, out)| out.clone())
    }
}

impl ExecutionTarget for ScriptedTarget {
    type Error = UnscriptedCommand;

    async fn exec(&self, command: &str) -> Result<ExecOutput, Self::Error> {
        self.calls.lock().unwrap().push(command.to_owned());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.lookup(command)
            .ok_or_else(|| UnscriptedCommand(command.to_owned()))
    }

    async fn exec_within(&self, command: &str, limit: Duration) -> Result<ExecOutput, Self::Error> {
        match self.delay {
            Some(delay) if delay > limit => {
                self.calls.lock().unwrap().push(command.to_owned());
                tokio::time::sleep(limit).await;
                self.lookup(command)
                    .map(ExecOutput::into_timed_out)
                    .ok_or_else(|| UnscriptedCommand(command.to_owned()))
            }
            _ => self.exec(command).await,
        }
    }

    async fn diff(&self) -> Result<Vec<Change>, Self::Error> {
        let next = self.diffs.lock().unwrap().pop_front();
        next.ok_or_else(|| UnscriptedCommand("diff".to_owned()))
    }

    async fn inspect_pid(&self) -> Result<Option<u32>, Self::Error> {
        Ok(self.pid)
    }
}
