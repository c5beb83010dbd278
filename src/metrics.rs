use prometheus::{self, Encoder, Histogram, HistogramOpts, IntCounter};

use crate::errors::*;

/// Registry private to one `RegtestUtils`, so several instances can live in
/// one test binary without clashing registrations.
pub struct Metrics {
    reg: prometheus::Registry,
}

impl Default for Metrics {
    fn default() -> Metrics {
        Metrics::new()
    }
}

impl Metrics {
    pub fn new() -> Metrics {
        Metrics {
            reg: prometheus::Registry::new(),
        }
    }

    /// Panics if a metric with the same name is already registered.
    pub fn counter_int(&self, opts: prometheus::Opts) -> IntCounter {
        let c = IntCounter::with_opts(opts).unwrap();
        self.reg.register(Box::new(c.clone())).unwrap();
        c
    }

    pub fn histogram(&self, opts: HistogramOpts) -> Histogram {
        let h = Histogram::with_opts(opts).unwrap();
        self.reg.register(Box::new(h.clone())).unwrap();
        h
    }

    /// Prometheus text exposition of everything registered so far.
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = vec![];
        prometheus::TextEncoder::new()
            .encode(&self.reg.gather(), &mut buffer)
            .chain_err(|| "failed to encode metrics")?;
        String::from_utf8(buffer).chain_err(|| "non-utf8 metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_text() {
        let metrics = Metrics::new();
        let c = metrics.counter_int(prometheus::Opts::new("regtest_test_total", "help"));
        c.inc();
        c.inc();
        c.inc();
        let text = metrics.encode_text().unwrap();
        assert!(text.contains("regtest_test_total 3"));
    }

    #[test]
    fn test_instances_do_not_clash() {
        let a = Metrics::new();
        let b = Metrics::new();
        a.counter_int(prometheus::Opts::new("regtest_same_name", "help"));
        b.counter_int(prometheus::Opts::new("regtest_same_name", "help"));
    }
}
