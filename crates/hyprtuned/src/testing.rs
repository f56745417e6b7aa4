//! Scripted stand-in for the outside world
//!
//! Built for unit tests and, through the `testing` feature, for this crate's
//! integration tests. Never part of a release build.

use crate::exec::{CommandOutput, CommandRunner, ExecError};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Reply handed back by `ScriptedRunner`
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Ok(String),
    Exit(i32),
    Timeout,
    Missing,
}

/// Test runner answering from a script and recording every call
///
/// Rules are matched by prefix against `"program arg1 arg2"`; the longest
/// matching prefix wins, unmatched calls get the fallback reply.
#[derive(Debug)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, ScriptedReply)>>,
    fallback: ScriptedReply,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    /// Every unmatched call exits 1.
    pub fn failing() -> Self {
        Self::with_fallback(ScriptedReply::Exit(1))
    }

    /// Every unmatched call succeeds with empty output.
    pub fn succeeding() -> Self {
        Self::with_fallback(ScriptedReply::Ok(String::new()))
    }

    pub fn with_fallback(fallback: ScriptedReply) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(self, prefix: &str, reply: ScriptedReply) -> Self {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((prefix.to_string(), reply));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of recorded calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn reply_for(&self, line: &str) -> ScriptedReply {
        let rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        rules
            .iter()
            .filter(|(prefix, _)| line.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.clone());

        match self.reply_for(&line) {
            ScriptedReply::Ok(stdout) => Ok(CommandOutput {
                status: Some(0),
                stdout,
                stderr: String::new(),
            }),
            ScriptedReply::Exit(code) => Ok(CommandOutput {
                status: Some(code),
                stdout: String::new(),
                stderr: format!("{} failed", program),
            }),
            ScriptedReply::Timeout => Err(ExecError::Timeout {
                program: program.to_string(),
                secs: timeout.as_secs(),
            }),
            ScriptedReply::Missing => Err(ExecError::NotFound(program.to_string())),
        }
    }
}
