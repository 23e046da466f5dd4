//! Test doubles for the execution seams

use super::cancel::CancellationToken;
use super::temp_files::TempFileManager;
use super::traits::{
    CommandRunner, Invocation, Notifier, NotifyError, ResolvedSecret, RunOutput, RunnerFault,
    SecretError, SecretResolver,
};
use crate::pipeline::{NotificationPayload, SecretRef, SecretShape};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// A canned command outcome
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    exit_code: i32,
    stdout: String,
    timed_out: bool,
}

pub(crate) fn reply(exit_code: i32, stdout: &str) -> Reply {
    Reply {
        exit_code,
        stdout: stdout.to_string(),
        timed_out: false,
    }
}

impl Reply {
    pub(crate) fn timed_out(mut self) -> Self {
        self.timed_out = true;
        self
    }
}

/// Runner answering from per-program scripts and recording every call
pub(crate) struct ScriptedRunner {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    default: Reply,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Invocation>>,
    seen_files: Mutex<Vec<(PathBuf, String)>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default: reply(0, ""),
            failing: HashSet::new(),
            panicking: HashSet::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
            seen_files: Mutex::new(Vec::new()),
        }
    }

    /// Queues replies for `program`; the default reply follows
    pub(crate) fn on(self, program: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.scripts
            .lock()
            .entry(program.to_string())
            .or_default()
            .extend(replies);
        self
    }

    pub(crate) fn default_reply(mut self, reply: Reply) -> Self {
        self.default = reply;
        self
    }

    /// `program` cannot be spawned
    pub(crate) fn fail_on(mut self, program: &str) -> Self {
        self.failing.insert(program.to_string());
        self
    }

    /// Running `program` panics
    pub(crate) fn panic_on(mut self, program: &str) -> Self {
        self.panicking.insert(program.to_string());
        self
    }

    /// Every command takes `delay`, honoring timeout and cancellation
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    pub(crate) fn programs(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.program.clone()).collect()
    }

    /// Files passed as arguments, with their contents at call time
    pub(crate) fn seen_files(&self) -> Vec<(PathBuf, String)> {
        self.seen_files.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<RunOutput, RunnerFault> {
        self.calls.lock().push(invocation.clone());
        for arg in &invocation.args {
            let path = Path::new(arg);
            if path.is_file()
                && let Ok(contents) = std::fs::read_to_string(path)
            {
                self.seen_files.lock().push((path.to_path_buf(), contents));
            }
        }

        if self.panicking.contains(&invocation.program) {
            panic!("scripted panic in {}", invocation.program);
        }
        if self.failing.contains(&invocation.program) {
            return Err(RunnerFault::Spawn {
                program: invocation.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such program"),
            });
        }

        if let Some(delay) = self.delay {
            tokio::select! {
                () = tokio::time::sleep(delay.min(invocation.timeout)) => {
                    if delay > invocation.timeout {
                        return Ok(RunOutput {
                            exit_code: 137,
                            timed_out: true,
                            duration: invocation.timeout,
                            ..RunOutput::default()
                        });
                    }
                }
                () = cancel.cancelled() => {
                    return Ok(RunOutput {
                        exit_code: 143,
                        cancelled: true,
                        ..RunOutput::default()
                    });
                }
            }
        }

        let reply = self
            .scripts
            .lock()
            .get_mut(&invocation.program)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default.clone());

        Ok(RunOutput {
            exit_code: reply.exit_code,
            stdout: reply.stdout,
            stderr: String::new(),
            timed_out: reply.timed_out,
            cancelled: false,
            duration: self.delay.unwrap_or_default(),
        })
    }
}

enum Stored {
    Pair(String, String),
    File(String),
    Text(String),
}

impl Stored {
    fn shape(&self) -> SecretShape {
        match self {
            Self::Pair(..) => SecretShape::UsernamePassword,
            Self::File(_) => SecretShape::File,
            Self::Text(_) => SecretShape::Text,
        }
    }
}

/// Resolver over an in-memory map
pub(crate) struct MapResolver {
    values: HashMap<String, Stored>,
    files: TempFileManager,
    _scratch: Option<TempDir>,
}

impl MapResolver {
    pub(crate) fn new() -> Self {
        let scratch = TempDir::new().unwrap();
        let files = TempFileManager::new(scratch.path(), "test", "1").unwrap();
        Self {
            values: HashMap::new(),
            files,
            _scratch: Some(scratch),
        }
    }

    pub(crate) fn with_workspace(workspace: &Path) -> Self {
        Self {
            values: HashMap::new(),
            files: TempFileManager::new(workspace, "test", "1").unwrap(),
            _scratch: None,
        }
    }

    pub(crate) fn pair(mut self, name: &str, username: &str, password: &str) -> Self {
        self.values.insert(
            name.to_string(),
            Stored::Pair(username.to_string(), password.to_string()),
        );
        self
    }

    pub(crate) fn file(mut self, name: &str, contents: &str) -> Self {
        self.values
            .insert(name.to_string(), Stored::File(contents.to_string()));
        self
    }

    pub(crate) fn text(mut self, name: &str, value: &str) -> Self {
        self.values
            .insert(name.to_string(), Stored::Text(value.to_string()));
        self
    }
}

impl SecretResolver for MapResolver {
    fn resolve(&self, reference: &SecretRef) -> Result<ResolvedSecret, SecretError> {
        let stored = self
            .values
            .get(&reference.name)
            .ok_or_else(|| SecretError::NotFound {
                name: reference.name.clone(),
            })?;
        if stored.shape() != reference.shape {
            return Err(SecretError::ShapeMismatch {
                name: reference.name.clone(),
                expected: reference.shape,
                actual: stored.shape(),
            });
        }
        Ok(match stored {
            Stored::Pair(username, password) => ResolvedSecret::UsernamePassword {
                username: username.clone(),
                password: password.clone(),
            },
            Stored::Text(value) => ResolvedSecret::Text(value.clone()),
            Stored::File(contents) => ResolvedSecret::File(
                self.files
                    .create_secret_file(contents.as_bytes())
                    .map_err(|source| SecretError::Materialize {
                        name: reference.name.clone(),
                        source,
                    })?,
            ),
        })
    }
}

/// Notifier recording every payload it is given
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    payloads: Mutex<Vec<NotificationPayload>>,
    fail: bool,
    hang: bool,
}

impl RecordingNotifier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records payloads but reports delivery failure
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Records payloads and never answers
    pub(crate) fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub(crate) fn payloads(&self) -> Vec<NotificationPayload> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        self.payloads.lock().push(payload.clone());
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail {
            return Err(NotifyError::Channel("mail relay unreachable".to_string()));
        }
        Ok(())
    }
}
