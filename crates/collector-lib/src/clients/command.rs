//! Tag-delimited shell commands
//!
//! Every probe is wrapped as `echo '<key>';<shell>;echo '</key>';` so a whole
//! group of probes can run in one exec call and each output can be found
//! again by its tags.

use crate::error::{CollectorError, Result};
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// Post-function applied to the text captured between a command's tags
pub type OutputProcessor = fn(&str) -> Result<String>;

/// One tagged shell probe
#[derive(Debug, Clone)]
pub struct Command {
    key: String,
    shell: String,
    processor: Option<OutputProcessor>,
    regex: Regex,
    wrapped: String,
}

impl Command {
    pub fn new(key: impl Into<String>, shell: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let shell = shell.into();

        let mut wrapped = format!("echo '<{}>';{}", key, shell);
        if !shell.ends_with(';') {
            wrapped.push(';');
        }
        wrapped.push_str(&format!("echo '</{}>';", key));

        let escaped = regex::escape(&key);
        let regex = Regex::new(&format!(r"(?s)<{0}>\n(?:(.*)\n)?</{0}>", escaped)).map_err(|e| {
            CollectorError::parse(format!("failed to compile regex for key {}: {}", key, e))
        })?;

        Ok(Self {
            key,
            shell,
            processor: None,
            regex,
            wrapped,
        })
    }

    /// Attach a processor that cleans up the captured value
    pub fn with_processor(mut self, processor: OutputProcessor) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// The shell text including the echoed tags
    pub fn script(&self) -> &str {
        &self.wrapped
    }

    /// Find this command's output in `stdout`
    pub fn extract(&self, stdout: &str) -> Result<String> {
        let captured = self
            .regex
            .captures(stdout)
            // a command that printed nothing leaves the optional group unset
            .map(|caps| caps.get(1).map_or("", |m| m.as_str()))
            .ok_or_else(|| CollectorError::KeyNotFound(self.key.clone()))?;

        match self.processor {
            Some(processor) => processor(captured).map_err(|e| CollectorError::OutputProcessor {
                key: self.key.clone(),
                value: captured.to_string(),
                reason: e.to_string(),
            }),
            None => Ok(captured.to_string()),
        }
    }
}

/// Ordered list of commands executed as one script
#[derive(Debug, Clone, Default)]
pub struct CommandGroup {
    commands: Vec<Command>,
}

impl CommandGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Concatenation of every wrapped command, in insertion order
    pub fn script(&self) -> String {
        self.commands.iter().map(Command::script).collect()
    }

    /// Extract every key; the first failure aborts the group
    pub fn extract(&self, stdout: &str) -> Result<HashMap<String, String>> {
        let mut results = HashMap::with_capacity(self.commands.len());
        for command in &self.commands {
            let value = command.extract(stdout).map_err(|e| {
                debug!(key = command.key(), output = stdout, "Extraction failed");
                e
            })?;
            results.insert(command.key.clone(), value);
        }
        Ok(results)
    }
}

/// Output processor that strips surrounding whitespace
pub fn trim_space(value: &str) -> Result<String> {
    Ok(value.trim().to_string())
}
