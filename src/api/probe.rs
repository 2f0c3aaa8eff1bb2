use axum::{
    extract::{RawQuery, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::time::{Duration, Instant};

use super::AppState;
use crate::constants::{
    DEFAULT_SCRAPE_TIMEOUT_SECS, METRIC_PROBE_DURATION, METRIC_PROBE_SUCCESS,
    SCRAPE_TIMEOUT_HEADER,
};
use crate::error::ApiError;
use crate::prober::metrics::register_gauge;
use crate::prober::{run_probe, Module, QueryParams};

/// Time budget for one probe.
///
/// The scrape timeout header (120s when absent or zero) minus `offset` caps
/// the probe; a positive module timeout below that cap wins, as does the
/// module timeout when the offset eats the whole header value.
pub fn scrape_timeout(
    headers: &HeaderMap,
    module_timeout: Option<Duration>,
    offset: f64,
) -> Result<Duration, ApiError> {
    let mut timeout_secs = 0.0;
    if let Some(value) = headers.get(SCRAPE_TIMEOUT_HEADER) {
        let text = value
            .to_str()
            .map_err(|_| ApiError::BadRequest(format!("{} is not valid text", SCRAPE_TIMEOUT_HEADER)))?;
        if !text.is_empty() {
            timeout_secs = text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|secs| secs.is_finite())
                .ok_or_else(|| {
                    ApiError::BadRequest(format!(
                        "failed to parse timeout from {}: '{}'",
                        SCRAPE_TIMEOUT_HEADER, text
                    ))
                })?;
        }
    }
    if timeout_secs == 0.0 {
        timeout_secs = DEFAULT_SCRAPE_TIMEOUT_SECS;
    }

    let module_secs = module_timeout.map(|t| t.as_secs_f64()).unwrap_or(0.0);
    let max_secs = timeout_secs - offset;
    let secs = if (module_secs > 0.0 && module_secs < max_secs) || max_secs < 0.0 {
        module_secs
    } else {
        max_secs
    };

    Duration::try_from_secs_f64(secs)
        .map_err(|e| ApiError::BadRequest(format!("unusable scrape timeout {}: {}", secs, e)))
}

fn encode(registry: &Registry) -> Result<Response, ApiError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::with_capacity(1024);
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| ApiError::Internal(format!("failed to encode metrics: {}", e)))?;

    Ok(([(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer).into_response())
}

/// `GET /probe?target=...&module=...`: runs one probe against `target` and
/// renders the probe's private registry.
pub async fn probe_handler(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let params = QueryParams::from_query(query.as_deref().unwrap_or_default());

    let target = params
        .get("target")
        .filter(|target| !target.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Target parameter is missing".to_string()))?
        .to_string();
    let module_name = params
        .get("module")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Module parameter is missing".to_string()))?;

    let timeout = scrape_timeout(
        &headers,
        state.config.probe_timeout(),
        state.config.scrape_timeout_offset_secs,
    )?;
    let module = Module::resolve(module_name, Some(timeout))
        .ok_or_else(|| ApiError::UnknownModule(module_name.to_string()))?;

    let registry = Registry::new();
    let success_gauge = register_gauge(
        &registry,
        METRIC_PROBE_SUCCESS,
        "Displays whether or not the probe was a success",
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;
    let duration_gauge = register_gauge(
        &registry,
        METRIC_PROBE_DURATION,
        "Returns how long the probe took to complete in seconds",
    )
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    tracing::debug!(rpc = %target, module = %module.name, timeout_secs = timeout.as_secs_f64(), "beginning probe");
    let start = Instant::now();
    let success = match tokio::time::timeout(
        module.timeout,
        run_probe(&target, &params, &module, &registry),
    )
    .await
    {
        Ok(success) => success,
        Err(_) => {
            tracing::warn!(rpc = %target, module = %module.name, "probe timed out");
            false
        }
    };
    let elapsed = start.elapsed().as_secs_f64();

    duration_gauge.set(elapsed);
    success_gauge.set(if success { 1.0 } else { 0.0 });

    if success {
        tracing::debug!(rpc = %target, module = %module.name, duration_secs = elapsed, "probe succeeded");
    } else {
        tracing::info!(rpc = %target, module = %module.name, duration_secs = elapsed, "probe failed");
    }

    encode(&registry)
}
