//! Scripted exec context for tests

use super::{ExecContext, ExecOutput};
use crate::error::{CollectorError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Canned reply chosen by a substring of the submitted script
#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    replies: VecDeque<std::result::Result<String, String>>,
}

/// Replays scripted stdout and records what it was asked to run
#[derive(Debug, Default)]
pub struct MockExec {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    refreshes: Mutex<usize>,
}

impl MockExec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `stdout` whenever the script contains `needle`.
    ///
    /// Several replies for one needle are used in order; the last one repeats.
    pub fn respond(self, needle: &str, stdout: &str) -> Self {
        self.push(needle, Ok(stdout.to_string()));
        self
    }

    /// Fail the call whenever the script contains `needle`
    pub fn fail(self, needle: &str, message: &str) -> Self {
        self.push(needle, Err(message.to_string()));
        self
    }

    fn push(&self, needle: &str, reply: std::result::Result<String, String>) {
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|r| r.needle == needle) {
            Some(rule) => rule.replies.push_back(reply),
            None => rules.push(Rule {
                needle: needle.to_string(),
                replies: VecDeque::from([reply]),
            }),
        }
    }

    /// Every script or argv line received, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn refresh_count(&self) -> usize {
        *self.refreshes.lock().unwrap()
    }
}

#[async_trait]
impl ExecContext for MockExec {
    async fn exec(&self, argv: &[&str], stdin: Option<&str>) -> Result<ExecOutput> {
        let submitted = match stdin {
            Some(script) => script.to_string(),
            None => argv.join(" "),
        };
        self.calls.lock().unwrap().push(submitted.clone());

        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .find(|r| submitted.contains(&r.needle))
            .ok_or_else(|| CollectorError::Remote(format!("no scripted reply for {}", submitted)))?;

        let reply = if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        };

        match reply {
            Some(Ok(stdout)) => Ok(ExecOutput {
                stdout,
                stderr: String::new(),
            }),
            Some(Err(message)) => Err(CollectorError::Remote(message)),
            None => Err(CollectorError::Remote("empty scripted reply".to_string())),
        }
    }

    async fn refresh(&self) -> Result<()> {
        *self.refreshes.lock().unwrap() += 1;
        Ok(())
    }

    async fn describe(&self) -> String {
        "mock/mock/mock".to_string()
    }
}
