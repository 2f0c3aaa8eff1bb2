use prometheus::{Gauge, GaugeVec, Opts, Registry};

use crate::error::Result;

/// Creates a gauge vector and registers it in the probe's own registry.
pub fn register_gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<GaugeVec> {
    let gauge_vec = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(gauge_vec.clone()))?;
    Ok(gauge_vec)
}

pub fn register_gauge(registry: &Registry, name: &str, help: &str) -> Result<Gauge> {
    let gauge = Gauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}
