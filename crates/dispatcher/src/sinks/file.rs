//! FileSink - appends rows and payloads to per-destination files

use bytes::Bytes;
use contracts::{ContractError, DataSink, Row};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, error, instrument};

/// Configuration for FileSink
#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    /// Base output directory
    pub base_path: PathBuf,
}

impl FileSinkConfig {
    /// Create config from params map
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let base_path = params
            .get("base_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output"));

        Self { base_path }
    }
}

/// Sink that writes to `<base_path>/<destination>.jsonl`.
///
/// Rows are written one JSON object per line; raw payloads are written as
/// they arrived, one per line.
pub struct FileSink {
    name: String,
    config: FileSinkConfig,
    files: HashMap<String, BufWriter<File>>,
}

impl FileSink {
    /// Create a new FileSink
    pub fn new(name: impl Into<String>, config: FileSinkConfig) -> std::io::Result<Self> {
        // Create base directory if it doesn't exist
        fs::create_dir_all(&config.base_path)?;

        Ok(Self {
            name: name.into(),
            config,
            files: HashMap::new(),
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        let config = FileSinkConfig::from_params(params);
        Self::new(name, config)
    }

    /// Path a destination is written to
    pub fn path_for(&self, destination: &str) -> PathBuf {
        let file_name: String = destination
            .trim_matches('/')
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.config.base_path.join(format!("{file_name}.jsonl"))
    }

    fn writer(&mut self, destination: &str) -> std::io::Result<&mut BufWriter<File>> {
        if !self.files.contains_key(destination) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for(destination))?;
            self.files
                .insert(destination.to_string(), BufWriter::new(file));
        }
        self.files
            .get_mut(destination)
            .ok_or_else(|| std::io::Error::other("writer vanished"))
    }

    fn append_rows(&mut self, destination: &str, rows: &[Row]) -> std::io::Result<()> {
        let out = self.writer(destination)?;
        for row in rows {
            serde_json::to_writer(&mut *out, row)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            out.write_all(b"\n")?;
        }
        out.flush()
    }

    fn append_raw(&mut self, destination: &str, payload: &[u8]) -> std::io::Result<()> {
        let out = self.writer(destination)?;
        out.write_all(payload)?;
        if !payload.ends_with(b"\n") {
            out.write_all(b"\n")?;
        }
        out.flush()
    }

    fn io_error(&self, destination: &str, e: std::io::Error) -> ContractError {
        error!(sink = %self.name, destination, error = %e, "Write failed");
        ContractError::sink_write(&self.name, format!("{destination}: {e}"))
    }
}

impl DataSink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "file_sink_write_rows",
        skip(self, rows),
        fields(sink = %self.name, rows = rows.len())
    )]
    async fn write_rows(&mut self, destination: &str, rows: &[Row]) -> Result<(), ContractError> {
        self.append_rows(destination, rows)
            .map_err(|e| self.io_error(destination, e))
    }

    #[instrument(
        name = "file_sink_write_raw",
        skip(self, _headers, payload),
        fields(sink = %self.name, bytes = payload.len())
    )]
    async fn write_raw(
        &mut self,
        destination: &str,
        _headers: &[(String, String)],
        payload: &Bytes,
    ) -> Result<(), ContractError> {
        self.append_raw(destination, payload)
            .map_err(|e| self.io_error(destination, e))
    }

    /// Reopen every file on the next write
    async fn reconnect(&mut self) -> Result<(), ContractError> {
        self.files.clear();
        fs::create_dir_all(&self.config.base_path)
            .map_err(|e| ContractError::sink_connection(&self.name, e.to_string()))
    }

    #[instrument(name = "file_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        for (destination, mut out) in self.files.drain() {
            if let Err(e) = out.flush() {
                error!(sink = %self.name, destination = %destination, error = %e, "Flush failed");
            }
        }
        debug!(sink = %self.name, "FileSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::MeasureValue;
    use tempfile::tempdir;

    fn row(mac: &str, value: f64) -> Row {
        Row {
            dimensions: vec![("mac".into(), mac.into())],
            measure: "rssi".into(),
            value: MeasureValue::Double(value),
            time: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_file_sink_write_rows() {
        let dir = tempdir().unwrap();
        let config = FileSinkConfig {
            base_path: dir.path().to_path_buf(),
        };

        let mut sink = FileSink::new("test_file", config).unwrap();
        sink.write_rows("clients", &[row("aa", -60.0), row("bb", -70.0)])
            .await
            .unwrap();
        sink.write_rows("clients", &[row("cc", -80.0)]).await.unwrap();
        sink.close().await.unwrap();

        let content = fs::read_to_string(dir.path().join("clients.jsonl")).unwrap();
        let rows: Vec<Row> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].dimensions[0].1, "cc");
    }

    #[tokio::test]
    async fn test_file_sink_write_raw_per_topic() {
        let dir = tempdir().unwrap();
        let mut sink = FileSink::new(
            "raw_file",
            FileSinkConfig {
                base_path: dir.path().to_path_buf(),
            },
        )
        .unwrap();

        sink.write_raw("mist/clients", &[], &Bytes::from_static(b"{\"a\":1}"))
            .await
            .unwrap();
        sink.reconnect().await.unwrap();
        sink.write_raw("mist/clients", &[], &Bytes::from_static(b"{\"a\":2}\n"))
            .await
            .unwrap();
        sink.close().await.unwrap();

        let content = fs::read_to_string(dir.path().join("mist_clients.jsonl")).unwrap();
        assert_eq!(content, "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn test_from_params_default_path() {
        let config = FileSinkConfig::from_params(&HashMap::new());
        assert_eq!(config.base_path, PathBuf::from("./output"));
    }
}
