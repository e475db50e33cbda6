//! Routing table: how a logical stream maps onto a sink destination.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::ContractError;

/// Payload layout of a logical stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataLayout {
    /// One client statistics object per message
    StatsClient,
    /// Array of map entries
    Maps,
    /// Array of zone entries
    Zones,
    /// Opaque body, forwarded verbatim
    Raw,
}

impl DataLayout {
    /// Array layouts need a unique key to track entries across polls
    pub fn requires_unique_key(self) -> bool {
        matches!(self, Self::Maps | Self::Zones)
    }

    pub fn is_raw(self) -> bool {
        matches!(self, Self::Raw)
    }

    /// Layouts a poll agent knows how to fetch
    pub fn is_pollable(self) -> bool {
        matches!(self, Self::Maps | Self::Zones | Self::Raw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatsClient => "stats_client",
            Self::Maps => "maps",
            Self::Zones => "zones",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value type of a measure column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Bigint,
    Boolean,
    #[default]
    Double,
    Varchar,
}

/// A configured metric: field name plus value type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricField {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: MetricType,
}

impl MetricField {
    pub fn new(name: impl Into<String>, kind: MetricType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Typed measure value carried by a [`Row`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasureValue {
    Bigint(i64),
    Boolean(bool),
    Double(f64),
    Varchar(String),
}

impl MeasureValue {
    pub fn kind(&self) -> MetricType {
        match self {
            Self::Bigint(_) => MetricType::Bigint,
            Self::Boolean(_) => MetricType::Boolean,
            Self::Double(_) => MetricType::Double,
            Self::Varchar(_) => MetricType::Varchar,
        }
    }
}

impl fmt::Display for MeasureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bigint(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Varchar(v) => f.write_str(v),
        }
    }
}

/// One structured row: a single measure plus the dimensions of its entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub dimensions: Vec<(String, String)>,
    pub measure: String,
    pub value: MeasureValue,
    /// Seconds since the epoch
    pub time: i64,
}

/// How a sink consumes records of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Map entries to rows and write them in batches
    Rows,
    /// Publish the payload verbatim
    Raw,
}

/// Route of one logical stream for one sink kind
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub stream: String,
    pub layout: DataLayout,
    pub mode: WriteMode,
    /// Table or topic name
    pub destination: String,
    pub dimensions: Vec<String>,
    pub metrics: Vec<MetricField>,
    pub headers: Vec<(String, String)>,
}

impl Route {
    /// Route that maps entries to rows
    pub fn rows(
        stream: impl Into<String>,
        layout: DataLayout,
        destination: impl Into<String>,
        dimensions: Vec<String>,
        metrics: Vec<MetricField>,
    ) -> Self {
        Self {
            stream: stream.into(),
            layout,
            mode: if layout.is_raw() {
                WriteMode::Raw
            } else {
                WriteMode::Rows
            },
            destination: destination.into(),
            dimensions,
            metrics,
            headers: Vec::new(),
        }
    }

    /// Route that forwards payloads verbatim
    pub fn raw(
        stream: impl Into<String>,
        layout: DataLayout,
        destination: impl Into<String>,
        headers: Vec<(String, String)>,
    ) -> Self {
        Self {
            stream: stream.into(),
            layout,
            mode: WriteMode::Raw,
            destination: destination.into(),
            dimensions: Vec::new(),
            metrics: Vec::new(),
            headers,
        }
    }

    /// Check the route is complete enough to write
    pub fn validate(&self) -> Result<(), ContractError> {
        let field = format!("routes[{}]", self.stream);
        if self.destination.is_empty() {
            return Err(ContractError::config_validation(
                field,
                "destination must not be empty",
            ));
        }
        if self.mode == WriteMode::Rows {
            if self.dimensions.is_empty() {
                return Err(ContractError::config_validation(
                    field,
                    "structured route needs at least one dimension key",
                ));
            }
            if self.metrics.is_empty() {
                return Err(ContractError::config_validation(
                    field,
                    "structured route needs at least one metric",
                ));
            }
        }
        Ok(())
    }
}

/// Immutable stream name -> route lookup, built once at startup
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, Arc<Route>>,
}

impl RouteTable {
    /// Build a table, rejecting incomplete or duplicate routes
    pub fn new(routes: impl IntoIterator<Item = Route>) -> Result<Self, ContractError> {
        let mut table = HashMap::new();
        for route in routes {
            route.validate()?;
            if table.contains_key(&route.stream) {
                return Err(ContractError::config_validation(
                    format!("routes[{}]", route.stream),
                    "duplicate route for stream",
                ));
            }
            table.insert(route.stream.clone(), Arc::new(route));
        }
        Ok(Self { routes: table })
    }

    pub fn get(&self, stream: &str) -> Option<&Arc<Route>> {
        self.routes.get(stream)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn streams(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}
