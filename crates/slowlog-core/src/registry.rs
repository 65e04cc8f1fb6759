//! Process-wide metric registry with text exposition.
//!
//! Built explicitly and shared by `Arc` between the poll loop (writer) and
//! the HTTP handler (reader). Every series value is a single atomic cell, so
//! a render sees either the old or the new value of each series, never a mix.
//! Rendering is sorted by metric name, then by label values.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use prometheus::{Encoder, GaugeVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

/// Buckets for poll timings, in seconds.
const DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

#[derive(Debug)]
pub enum RegistryError {
    /// Registration or lookup rejected by the underlying registry.
    Prometheus(String),
    /// Gauge was first registered with a different set of label names.
    LabelMismatch {
        name: String,
        expected: Vec<String>,
        got: Vec<String>,
    },
    /// Rendered exposition was not valid UTF-8.
    Encoding(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Prometheus(msg) => write!(f, "metric registry: {}", msg),
            RegistryError::LabelMismatch { name, expected, got } => write!(
                f,
                "gauge {} registered with labels {:?}, got {:?}",
                name, expected, got
            ),
            RegistryError::Encoding(msg) => write!(f, "metric encoding: {}", msg),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<prometheus::Error> for RegistryError {
    fn from(e: prometheus::Error) -> Self {
        RegistryError::Prometheus(e.to_string())
    }
}

struct GaugeFamily {
    vec: GaugeVec,
    /// Sorted label names, for mismatch detection.
    labels: Vec<String>,
}

pub struct MetricRegistry {
    registry: Registry,
    gauges: Mutex<HashMap<String, GaugeFamily>>,
    histograms: Mutex<HashMap<String, Histogram>>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the gauge `name{labels}` to `value`, replacing any previous value.
    ///
    /// The gauge is registered on first use with `help` and the label names
    /// of `labels`; later calls must use the same label names.
    pub fn set_gauge(
        &self,
        name: &str,
        help: &str,
        labels: &[(&str, &str)],
        value: f64,
    ) -> Result<(), RegistryError> {
        let mut gauges = self.gauges.lock().unwrap_or_else(|e| e.into_inner());
        if !gauges.contains_key(name) {
            let names: Vec<&str> = labels.iter().map(|(k, _)| *k).collect();
            let vec = GaugeVec::new(Opts::new(name, help), &names)?;
            self.registry.register(Box::new(vec.clone()))?;
            gauges.insert(
                name.to_string(),
                GaugeFamily {
                    vec,
                    labels: sorted_names(labels),
                },
            );
        }
        let family = &gauges[name];

        let got = sorted_names(labels);
        if got != family.labels {
            return Err(RegistryError::LabelMismatch {
                name: name.to_string(),
                expected: family.labels.clone(),
                got,
            });
        }
        let map: HashMap<&str, &str> = labels.iter().copied().collect();
        family.vec.get_metric_with(&map)?.set(value);
        Ok(())
    }

    /// Removes one series. Returns false when it did not exist.
    pub fn remove_gauge(&self, name: &str, labels: &[(&str, &str)]) -> bool {
        let gauges = self.gauges.lock().unwrap_or_else(|e| e.into_inner());
        let Some(family) = gauges.get(name) else {
            return false;
        };
        let map: HashMap<&str, &str> = labels.iter().copied().collect();
        family.vec.remove(&map).is_ok()
    }

    /// Records one duration observation, in seconds, into histogram `name`.
    pub fn observe(&self, name: &str, help: &str, seconds: f64) -> Result<(), RegistryError> {
        let mut histograms = self.histograms.lock().unwrap_or_else(|e| e.into_inner());
        if !histograms.contains_key(name) {
            let h = Histogram::with_opts(
                HistogramOpts::new(name, help).buckets(DURATION_BUCKETS.to_vec()),
            )?;
            self.registry.register(Box::new(h.clone()))?;
            histograms.insert(name.to_string(), h);
        }
        histograms[name].observe(seconds);
        Ok(())
    }

    /// Current value of one gauge series, if it exists.
    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let families = self.registry.gather();
        let family = families.iter().find(|f| f.get_name() == name)?;
        family
            .get_metric()
            .iter()
            .find(|m| {
                let pairs = m.get_label();
                pairs.len() == labels.len()
                    && labels.iter().all(|(k, v)| {
                        pairs
                            .iter()
                            .any(|p| p.get_name() == *k && p.get_value() == *v)
                    })
            })
            .map(|m| m.get_gauge().get_value())
    }

    /// Renders every series in the text exposition format.
    pub fn render(&self) -> Result<String, RegistryError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| RegistryError::Encoding(e.to_string()))
    }

    /// Content type of `render()` output.
    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

fn sorted_names(labels: &[(&str, &str)]) -> Vec<String> {
    let mut names: Vec<String> = labels.iter().map(|(k, _)| k.to_string()).collect();
    names.sort();
    names
}
