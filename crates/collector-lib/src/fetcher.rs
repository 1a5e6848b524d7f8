//! Runs a command group in one exec and decodes the results into a record
//!
//! Records opt into decoding by implementing [`Unmarshal`], naming the key
//! each field is read from. A key that is absent leaves the field as it was;
//! a key whose value has the wrong type fails the whole fetch.

use crate::clients::{trim_space, Command, CommandGroup, ExecContext};
use crate::error::{CollectorError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A decoded value produced by a fetcher
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    List(Vec<String>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "i64",
            Value::UInt(_) => "u64",
            Value::Float(_) => "f64",
            Value::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::List(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v)
    }
}

/// Field types a [`Value`] can be assigned to without conversion
pub trait FromValue: Sized {
    const TYPE_NAME: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! impl_from_value {
    ($ty:ty, $variant:ident, $name:expr) => {
        impl FromValue for $ty {
            const TYPE_NAME: &'static str = $name;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_from_value!(String, Str, "string");
impl_from_value!(i64, Int, "i64");
impl_from_value!(u64, UInt, "u64");
impl_from_value!(f64, Float, "f64");
impl_from_value!(Vec<String>, List, "list");

/// Key to value map produced by one fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedValues(HashMap<String, Value>);

impl FetchedValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Write the value under `key` into `field` when present and of the same type
    pub fn assign<T: FromValue>(&self, key: &str, field: &mut T) -> Result<()> {
        let Some(value) = self.0.get(key) else {
            return Ok(());
        };
        match T::from_value(value) {
            Some(v) => {
                *field = v;
                Ok(())
            }
            None => Err(CollectorError::TypeMismatch {
                key: key.to_string(),
                value: value.to_string(),
                got: value.type_name(),
                expected: T::TYPE_NAME,
            }),
        }
    }
}

impl From<HashMap<String, String>> for FetchedValues {
    fn from(raw: HashMap<String, String>) -> Self {
        Self(raw.into_iter().map(|(k, v)| (k, Value::Str(v))).collect())
    }
}

impl FromIterator<(String, Value)> for FetchedValues {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Records that can be populated from fetched values
pub trait Unmarshal {
    fn unmarshal(&mut self, values: &FetchedValues) -> Result<()>;
}

/// Whole-map post-processing hook; returned keys override raw ones
pub type PostProcessor =
    Arc<dyn Fn(&HashMap<String, String>) -> Result<HashMap<String, Value>> + Send + Sync>;

/// A command group plus the decoding that turns its output into a record
#[derive(Clone, Default)]
pub struct Fetcher {
    group: CommandGroup,
    post_processor: Option<PostProcessor>,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("group", &self.group)
            .field("post_processor", &self.post_processor.is_some())
            .finish()
    }
}

impl Fetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_command(&mut self, command: Command) {
        self.group.add(command);
    }

    /// Add a command built from a key and shell text, optionally trimming its output
    pub fn add_new_command(&mut self, key: &str, shell: &str, trim: bool) -> Result<()> {
        let mut command = Command::new(key, shell)?;
        if trim {
            command = command.with_processor(trim_space);
        }
        self.group.add(command);
        Ok(())
    }

    pub fn set_post_processor(&mut self, post_processor: PostProcessor) {
        self.post_processor = Some(post_processor);
    }

    pub fn group(&self) -> &CommandGroup {
        &self.group
    }

    /// Run the group and apply the post-processor, without decoding
    pub async fn fetch_values(&self, ctx: &dyn ExecContext) -> Result<FetchedValues> {
        let raw = run_commands(ctx, &self.group).await?;
        let processed = match &self.post_processor {
            Some(post) => Some(post(&raw)?),
            None => None,
        };

        let mut values = FetchedValues::from(raw);
        if let Some(processed) = processed {
            values.0.extend(processed);
        }
        Ok(values)
    }

    /// Run the group and decode into a fresh record
    pub async fn fetch<T: Unmarshal + Default>(&self, ctx: &dyn ExecContext) -> Result<T> {
        let values = self.fetch_values(ctx).await?;
        let mut record = T::default();
        record.unmarshal(&values)?;
        Ok(record)
    }
}

/// Build a fetcher from prepared commands plus `(key, shell, trim)` triples
pub fn fetcher_from(commands: Vec<Command>, new_commands: &[(&str, &str, bool)]) -> Result<Fetcher> {
    let mut fetcher = Fetcher::new();
    for command in commands {
        fetcher.add_command(command);
    }
    for (key, shell, trim) in new_commands {
        fetcher.add_new_command(key, shell, *trim)?;
    }
    Ok(fetcher)
}

/// Execute the group's script in `ctx` and extract each key from stdout
pub async fn run_commands(
    ctx: &dyn ExecContext,
    group: &CommandGroup,
) -> Result<HashMap<String, String>> {
    let script = group.script();
    let output = ctx.exec_script(&script).await.map_err(|e| {
        debug!(error = %e, "Command group failed in container");
        e
    })?;
    group.extract(&output.stdout)
}
