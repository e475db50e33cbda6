//! InfluxSink - writes row batches to a time-series store over HTTP
//!
//! One batch becomes one `POST /api/v2/write` with a line-protocol body.
//! The destination is the measurement, dimensions are tags, and the measure
//! is the single field of each line. Raw payloads are not supported and are
//! dropped with a log line.

use bytes::Bytes;
use contracts::{ContractError, DataSink, MeasureValue, Row};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::DispatcherError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for InfluxSink
#[derive(Debug, Clone, PartialEq)]
pub struct InfluxSinkConfig {
    /// Base URL, e.g. `http://localhost:8086`
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: Option<String>,
}

impl InfluxSinkConfig {
    /// Create config from params map. `url` and `bucket` are required.
    pub fn from_params(
        sink: &str,
        params: &HashMap<String, String>,
    ) -> Result<Self, DispatcherError> {
        let required = |key: &str| {
            params
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| DispatcherError::invalid_param(sink, key, "required"))
        };

        Ok(Self {
            url: required("url")?.trim_end_matches('/').to_string(),
            org: params.get("org").cloned().unwrap_or_default(),
            bucket: required("bucket")?,
            token: params.get("token").filter(|t| !t.is_empty()).cloned(),
        })
    }

    fn write_url(&self) -> String {
        format!("{}/api/v2/write", self.url)
    }
}

/// Sink that posts line protocol to an InfluxDB v2 compatible endpoint
pub struct InfluxSink {
    name: String,
    config: InfluxSinkConfig,
    client: reqwest::Client,
}

impl InfluxSink {
    pub fn new(name: impl Into<String>, config: InfluxSinkConfig) -> Result<Self, ContractError> {
        let name = name.into();
        let client = build_client(&name)?;
        Ok(Self {
            name,
            config,
            client,
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, DispatcherError> {
        let name = name.into();
        let config = InfluxSinkConfig::from_params(&name, params)?;
        Ok(Self::new(name, config)?)
    }
}

fn build_client(name: &str) -> Result<reqwest::Client, ContractError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ContractError::sink_connection(name, e.to_string()))
}

/// Render rows as line protocol, one line per row
pub fn line_protocol(measurement: &str, rows: &[Row]) -> String {
    let mut body = String::new();
    for row in rows {
        body.push_str(&escape(measurement, &[',', ' ']));
        for (key, value) in &row.dimensions {
            let _ = write!(
                body,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }
        let _ = write!(body, " {}=", escape(&row.measure, &[',', '=', ' ']));
        match &row.value {
            MeasureValue::Bigint(v) => {
                let _ = write!(body, "{v}i");
            }
            MeasureValue::Boolean(v) => {
                let _ = write!(body, "{v}");
            }
            MeasureValue::Double(v) => {
                let _ = write!(body, "{v}");
            }
            MeasureValue::Varchar(v) => {
                let _ = write!(body, "\"{}\"", escape(v, &['"']));
            }
        }
        let _ = writeln!(body, " {}", row.time);
    }
    body
}

/// Line breaks end a line protocol record, so they become spaces
fn escape(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        let c = if matches!(c, '\n' | '\r') { ' ' } else { c };
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl DataSink for InfluxSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "influx_sink_write_rows",
        skip(self, rows),
        fields(sink = %self.name, rows = rows.len())
    )]
    async fn write_rows(&mut self, destination: &str, rows: &[Row]) -> Result<(), ContractError> {
        let mut request = self
            .client
            .post(self.config.write_url())
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", self.config.bucket.as_str()),
                ("precision", "s"),
            ])
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line_protocol(destination, rows));
        if let Some(token) = &self.config.token {
            request = request.header("Authorization", format!("Token {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ContractError::sink_write(
                &self.name,
                format!("{destination}: HTTP {status}: {body}"),
            ));
        }
        debug!(sink = %self.name, destination, rows = rows.len(), "Batch written");
        Ok(())
    }

    async fn write_raw(
        &mut self,
        destination: &str,
        _headers: &[(String, String)],
        payload: &Bytes,
    ) -> Result<(), ContractError> {
        warn!(
            sink = %self.name,
            destination,
            bytes = payload.len(),
            "Time-series sink cannot store raw payloads, dropped"
        );
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), ContractError> {
        self.client = build_client(&self.name)?;
        debug!(sink = %self.name, "HTTP client rebuilt");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        debug!(sink = %self.name, "InfluxSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn rows() -> Vec<Row> {
        vec![
            Row {
                dimensions: vec![("mac".into(), "aa:bb".into()), ("ssid".into(), "my net".into())],
                measure: "rssi".into(),
                value: MeasureValue::Double(-61.5),
                time: 1_700_000_000,
            },
            Row {
                dimensions: vec![("mac".into(), "aa:bb".into())],
                measure: "channel".into(),
                value: MeasureValue::Bigint(36),
                time: 1_700_000_000,
            },
        ]
    }

    fn config(url: String) -> InfluxSinkConfig {
        InfluxSinkConfig {
            url,
            org: "acme".into(),
            bucket: "mist".into(),
            token: Some("secret".into()),
        }
    }

    #[test]
    fn test_line_protocol() {
        let body = line_protocol("client stats", &rows());
        assert_eq!(
            body,
            "client\\ stats,mac=aa:bb,ssid=my\\ net rssi=-61.5 1700000000\n\
             client\\ stats,mac=aa:bb channel=36i 1700000000\n"
        );
    }

    #[test]
    fn test_line_protocol_strings_and_bools() {
        let rows = vec![
            Row {
                dimensions: vec![("id".into(), "z=1,2".into())],
                measure: "name".into(),
                value: MeasureValue::Varchar("say \"hi\"".into()),
                time: 5,
            },
            Row {
                dimensions: vec![("id".into(), "z".into())],
                measure: "guest".into(),
                value: MeasureValue::Boolean(true),
                time: 5,
            },
        ];
        assert_eq!(
            line_protocol("zones", &rows),
            "zones,id=z\\=1\\,2 name=\"say \\\"hi\\\"\" 5\nzones,id=z guest=true 5\n"
        );
    }

    #[test]
    fn test_line_protocol_flattens_line_breaks() {
        let rows = vec![Row {
            dimensions: vec![("site".into(), "hq\nfloor 2".into())],
            measure: "note".into(),
            value: MeasureValue::Varchar("line one\r\nline two".into()),
            time: 7,
        }];
        let body = line_protocol("maps", &rows);
        assert_eq!(body.lines().count(), 1);
        assert_eq!(
            body,
            "maps,site=hq\\ floor\\ 2 note=\"line one  line two\" 7\n"
        );
    }

    #[test]
    fn test_from_params_requires_url_and_bucket() {
        let mut params = HashMap::new();
        params.insert("url".to_string(), "http://db:8086/".to_string());
        assert!(matches!(
            InfluxSinkConfig::from_params("tsdb", &params),
            Err(DispatcherError::InvalidParam { .. })
        ));

        params.insert("bucket".to_string(), "mist".to_string());
        let config = InfluxSinkConfig::from_params("tsdb", &params).unwrap();
        assert_eq!(config.write_url(), "http://db:8086/api/v2/write");
        assert_eq!(config.token, None);
    }

    #[tokio::test]
    async fn test_write_rows_posts_line_protocol() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/write")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("org".into(), "acme".into()),
                Matcher::UrlEncoded("bucket".into(), "mist".into()),
                Matcher::UrlEncoded("precision".into(), "s".into()),
            ]))
            .match_header("authorization", "Token secret")
            .match_body(Matcher::Regex("rssi=-61.5 1700000000".into()))
            .with_status(204)
            .create_async()
            .await;

        let mut sink = InfluxSink::new("tsdb", config(server.url())).unwrap();
        sink.write_rows("clients", &rows()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_write_rows_rejects_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v2/write")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let mut sink = InfluxSink::new("tsdb", config(server.url())).unwrap();
        let err = sink.write_rows("clients", &rows()).await.unwrap_err();
        assert!(err.to_string().contains("500"));
        assert!(sink.reconnect().await.is_ok());
    }
}
