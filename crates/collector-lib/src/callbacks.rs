//! Output sink for collected records
//!
//! A record is written either as a raw line
//! `<UTC timestamp>, <collector>:<datatype>, <json payload>` or as one or
//! more analyser JSON objects `{"id": ..., "data": ...}`, one per line.

use crate::error::{CollectorError, Result};
use crate::utils::format_rfc3339_nano;
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// How records are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Raw,
    AnalyserJson,
}

/// One analyser JSON object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyserRecord {
    pub id: String,
    pub data: serde_json::Value,
}

impl AnalyserRecord {
    pub fn new(id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// Anything a collector can hand to a callback
pub trait Reportable: Send + Sync {
    /// Payload used by the raw format
    fn payload(&self) -> Result<serde_json::Value>;

    /// Records emitted in analyser format
    fn analyser_format(&self) -> Result<Vec<AnalyserRecord>>;
}

/// Destination for collected records
pub trait Callback: Send + Sync {
    fn call(&self, output: &dyn Reportable, collector: &str, datatype: &str) -> Result<()>;

    /// Flush and release the underlying writer
    fn cleanup(&self) -> Result<()>;
}

/// Callback writing to stdout or a file
pub struct FileCallback {
    writer: Mutex<Box<dyn Write + Send>>,
    format: OutputFormat,
}

impl std::fmt::Debug for FileCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCallback")
            .field("format", &self.format)
            .finish()
    }
}

impl FileCallback {
    pub fn new(writer: Box<dyn Write + Send>, format: OutputFormat) -> Self {
        Self {
            writer: Mutex::new(writer),
            format,
        }
    }

    /// Write to `filename`, or to stdout when it is empty or `-`
    pub fn setup(filename: &str, format: OutputFormat) -> Result<Self> {
        if filename.is_empty() || filename == "-" {
            return Ok(Self::new(Box::new(std::io::stdout()), format));
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(Path::new(filename))
            .map_err(|e| CollectorError::MissingInput(format!("failed to open file {}: {}", filename, e)))?;
        debug!(filename, "Opened output file");
        Ok(Self::new(Box::new(file), format))
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn render(&self, output: &dyn Reportable, collector: &str, datatype: &str) -> Result<String> {
        match self.format {
            OutputFormat::Raw => {
                let payload = serde_json::to_string(&output.payload()?)?;
                Ok(format!(
                    "{}, {}:{}, {}\n",
                    format_rfc3339_nano(&Utc::now()),
                    collector,
                    datatype,
                    payload
                ))
            }
            OutputFormat::AnalyserJson => {
                let mut lines = String::new();
                for record in output.analyser_format()? {
                    lines.push_str(&serde_json::to_string(&record)?);
                    lines.push('\n');
                }
                Ok(lines)
            }
        }
    }
}

impl Callback for FileCallback {
    fn call(&self, output: &dyn Reportable, collector: &str, datatype: &str) -> Result<()> {
        let line = self.render(output, collector, datatype)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| CollectorError::Remote("output writer lock poisoned".to_string()))?;
        writer.write_all(line.as_bytes())?;
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| CollectorError::Remote("output writer lock poisoned".to_string()))?;
        writer.flush()?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, Serialize)]
    struct Sample {
        msg: String,
    }

    impl Reportable for Sample {
        fn payload(&self) -> Result<serde_json::Value> {
            Ok(serde_json::to_value(self)?)
        }

        fn analyser_format(&self) -> Result<Vec<AnalyserRecord>> {
            Ok(vec![AnalyserRecord::new("testOutput", json!(["Hello"]))])
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn sample() -> Sample {
        Sample {
            msg: "This is a test line".into(),
        }
    }

    #[test]
    fn test_raw_line_format() {
        let buffer = SharedBuffer::default();
        let callback = FileCallback::new(Box::new(buffer.clone()), OutputFormat::Raw);
        callback.call(&sample(), "GNSS", "gpsNav").unwrap();

        let line = buffer.contents();
        let parts: Vec<&str> = line.trim_end().splitn(3, ", ").collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].ends_with('Z'));
        assert_eq!(parts[1], "GNSS:gpsNav");
        assert_eq!(parts[2], r#"{"msg":"This is a test line"}"#);
    }

    #[test]
    fn test_analyser_format() {
        let buffer = SharedBuffer::default();
        let callback = FileCallback::new(Box::new(buffer.clone()), OutputFormat::AnalyserJson);
        callback.call(&sample(), "GNSS", "gpsNav").unwrap();
        assert_eq!(buffer.contents(), "{\"id\":\"testOutput\",\"data\":[\"Hello\"]}\n");
    }

    #[test]
    fn test_setup_writes_to_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.log");
        let callback = FileCallback::setup(path.to_str().unwrap(), OutputFormat::AnalyserJson).unwrap();
        callback.call(&sample(), "GNSS", "gpsNav").unwrap();
        callback.cleanup().unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("testOutput"));
    }
}
