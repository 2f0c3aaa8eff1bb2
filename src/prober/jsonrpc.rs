use prometheus::{GaugeVec, Registry};
use serde_json::Value;

use crate::constants::METRIC_JSONRPC;
use crate::error::{ProbeError, Result};
use crate::prober::decimal::try_scaled_float;
use crate::prober::extract::extract_scalar;
use crate::prober::metrics::register_gauge_vec;
use crate::prober::params::{args_to_json, parse_call_args, RpcArg};
use crate::prober::rpc_client::{normalize_target, RpcClient};
use crate::prober::{Module, QueryParams};

pub const MODULE_JSONRPC: &str = "jsonrpc";

/// One row of the `method`/`arg`/`decimal`/`tag`/`resultJMESPath` columns.
#[derive(Debug, Clone, PartialEq)]
pub struct CallDescriptor {
    pub method: String,
    /// Trimmed argument text, echoed as the `params` label.
    pub raw_args: String,
    pub args: Vec<RpcArg>,
    pub decimals: u32,
    pub tag: String,
    pub result_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcProbe {
    pub calls: Vec<CallDescriptor>,
    pub disable_batch: bool,
}

impl JsonRpcProbe {
    /// Builds the call table. Every column must be present with the same
    /// non-zero length; nothing here touches the network.
    pub fn from_params(params: &QueryParams) -> Result<Self> {
        let methods = params.get_all("method");
        let args = params.first_present(&["arg", "args"]);
        let decimals = params.first_present(&["decimal", "decimals"]);
        let tags = params.get_all("tag");
        let paths = params.get_all("resultJMESPath");

        if methods.is_empty()
            || args.is_empty()
            || decimals.is_empty()
            || tags.is_empty()
            || paths.is_empty()
        {
            return Err(ProbeError::Precondition(
                "method, arg, decimal, tag and resultJMESPath are all required".to_string(),
            ));
        }

        let len = methods.len();
        if [args.len(), decimals.len(), tags.len(), paths.len()]
            .iter()
            .any(|other| *other != len)
        {
            return Err(ProbeError::Precondition(format!(
                "method, arg, decimal, tag and resultJMESPath must have the same length \
                 (method={}, arg={}, decimal={}, tag={}, resultJMESPath={})",
                len,
                args.len(),
                decimals.len(),
                tags.len(),
                paths.len()
            )));
        }

        let mut calls = Vec::with_capacity(len);
        for i in 0..len {
            let method = methods[i].trim();
            if method.is_empty() {
                return Err(ProbeError::Precondition(format!("method #{} is empty", i)));
            }
            let decimal_text = decimals[i].trim();
            let decimal = decimal_text.parse::<u32>().map_err(|_| {
                ProbeError::Precondition(format!(
                    "decimal '{}' for {} is not a non-negative integer",
                    decimal_text, method
                ))
            })?;
            let raw_args = args[i].trim().to_string();

            calls.push(CallDescriptor {
                method: method.to_string(),
                args: parse_call_args(&raw_args)?,
                raw_args,
                decimals: decimal,
                tag: tags[i].clone(),
                result_path: paths[i].clone(),
            });
        }

        Ok(Self {
            calls,
            disable_batch: params.get("disableBatch") == Some("true"),
        })
    }
}

/// Extraction and scaling shared by the batched and the unbatched path.
fn observe(
    gauge_vec: &GaugeVec,
    target: &str,
    call: &CallDescriptor,
    result: &Value,
) -> Result<()> {
    tracing::debug!(method = %call.method, tag = %call.tag, result = %result, "raw RPC result");

    let scalar =
        extract_scalar(result, &call.result_path).map_err(|e| e.context(&call.method))?;
    let value = try_scaled_float(&scalar, call.decimals).map_err(|e| e.context(&call.method))?;
    tracing::debug!(method = %call.method, scalar = %scalar, value, "extracted value");

    gauge_vec
        .with_label_values(&[
            target,
            call.method.as_str(),
            call.raw_args.as_str(),
            call.tag.as_str(),
        ])
        .set(value);
    Ok(())
}

async fn run(
    client: &RpcClient,
    target: &str,
    probe: &JsonRpcProbe,
    gauge_vec: &GaugeVec,
) -> Result<()> {
    if probe.disable_batch {
        for call in &probe.calls {
            let result = client
                .call(&call.method, &args_to_json(&call.args))
                .await
                .map_err(|e| e.context(&call.method))?;
            observe(gauge_vec, target, call, &result)?;
        }
        return Ok(());
    }

    let batch: Vec<(String, Value)> = probe
        .calls
        .iter()
        .map(|call| (call.method.clone(), args_to_json(&call.args)))
        .collect();
    let results = client.batch_call(&batch).await?;

    for (call, result) in probe.calls.iter().zip(results) {
        let result = result.map_err(|e| e.context(&call.method))?;
        observe(gauge_vec, target, call, &result)?;
    }
    Ok(())
}

/// Generic multi-call JSON-RPC probe.
///
/// Registers `probe_jsonrpc{rpc,method,params,tag}` and sets one sample per
/// call descriptor. The first failing call fails the whole probe; samples
/// already set stay in the registry.
pub async fn probe_jsonrpc(
    target: &str,
    params: &QueryParams,
    module: &Module,
    registry: &Registry,
) -> bool {
    let target = normalize_target(target);

    let probe = match JsonRpcProbe::from_params(params) {
        Ok(probe) => probe,
        Err(err) => {
            if params.is_empty() {
                tracing::error!(rpc = %target, "no probe parameters given");
            } else {
                tracing::error!(rpc = %target, error = %err, "invalid jsonrpc parameters");
            }
            return false;
        }
    };

    let gauge_vec = match register_gauge_vec(
        registry,
        METRIC_JSONRPC,
        "Value returned by a JSON-RPC method, scaled by its decimals",
        &["rpc", "method", "params", "tag"],
    ) {
        Ok(gauge_vec) => gauge_vec,
        Err(err) => {
            tracing::error!(rpc = %target, error = %err, "cannot register jsonrpc gauge");
            return false;
        }
    };

    let client = match RpcClient::new(&target, module.timeout) {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(rpc = %target, error = %err, "error creating RPC client");
            return false;
        }
    };

    match run(&client, &target, &probe, &gauge_vec).await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(
                rpc = %target,
                batch = !probe.disable_batch,
                error = %err,
                "jsonrpc probe failed"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::metrics::test_support::{gauge_samples, labels};
    use std::time::Duration;

    const BLOCK_NUMBER_BODY: &str = r#"{"jsonrpc":"2.0","id":1,"result":"0x1234"}"#;

    fn module() -> Module {
        Module::resolve(MODULE_JSONRPC, Some(Duration::from_secs(5))).unwrap()
    }

    fn block_number_params() -> QueryParams {
        [
            ("module", "jsonrpc"),
            ("method", "eth_blockNumber"),
            ("arg", ""),
            ("decimal", "0"),
            ("tag", "BlockNumber"),
            ("resultJMESPath", ""),
        ]
        .into_iter()
        .collect()
    }

    fn two_call_params(disable_batch: bool) -> QueryParams {
        let mut params: QueryParams = [
            ("module", "jsonrpc"),
            ("method", "eth_getBalance"),
            ("method", "eth_blockNumber"),
            ("arg", "0x0000000000000000000000000000000000000000, latest"),
            ("arg", ""),
            ("decimal", "18"),
            ("decimal", "0"),
            ("tag", "WalletZero"),
            ("tag", "BlockNumber"),
            ("resultJMESPath", ""),
            ("resultJMESPath", ""),
        ]
        .into_iter()
        .collect();
        if disable_batch {
            params.append("disableBatch", "true");
        }
        params
    }

    #[test]
    fn from_params_builds_descriptors_in_order() {
        let probe = JsonRpcProbe::from_params(&two_call_params(false)).unwrap();
        assert!(!probe.disable_batch);
        assert_eq!(probe.calls.len(), 2);
        assert_eq!(probe.calls[0].method, "eth_getBalance");
        assert_eq!(
            probe.calls[0].raw_args,
            "0x0000000000000000000000000000000000000000, latest"
        );
        assert_eq!(probe.calls[0].args.len(), 2);
        assert_eq!(probe.calls[0].decimals, 18);
        assert_eq!(probe.calls[1].tag, "BlockNumber");
        assert!(probe.calls[1].args.is_empty());
    }

    #[test]
    fn from_params_accepts_aliases() {
        let params: QueryParams = [
            ("method", "suix_getBalance"),
            ("args", "0x00,0x2::sui::SUI"),
            ("decimals", "9"),
            ("tag", "Wallet"),
            ("resultJMESPath", "totalBalance"),
        ]
        .into_iter()
        .collect();
        let probe = JsonRpcProbe::from_params(&params).unwrap();
        assert_eq!(probe.calls[0].decimals, 9);
        assert_eq!(probe.calls[0].result_path, "totalBalance");
    }

    #[test]
    fn from_params_rejects_missing_and_mismatched_columns() {
        assert!(JsonRpcProbe::from_params(&QueryParams::default()).is_err());

        let mut params = block_number_params();
        params.append("method", "eth_chainId");
        assert!(matches!(
            JsonRpcProbe::from_params(&params),
            Err(ProbeError::Precondition(_))
        ));
    }

    #[test]
    fn from_params_rejects_bad_decimal_and_args() {
        let mut params: QueryParams = [
            ("method", "eth_blockNumber"),
            ("arg", ""),
            ("decimal", "-1"),
            ("tag", "x"),
            ("resultJMESPath", ""),
        ]
        .into_iter()
        .collect();
        assert!(JsonRpcProbe::from_params(&params).is_err());

        params = [
            ("method", "eth_call"),
            ("arg", "{to:0x01,latest"),
            ("decimal", "0"),
            ("tag", "x"),
            ("resultJMESPath", ""),
        ]
        .into_iter()
        .collect();
        assert!(JsonRpcProbe::from_params(&params).is_err());
    }

    #[tokio::test]
    async fn block_number_scenario_sets_labelled_gauge() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"jsonrpc":"2.0","id":1,"result":"0x1234"}]"#)
            .create_async()
            .await;

        let registry = Registry::new();
        let target = server.url();
        let ok = probe_jsonrpc(&target, &block_number_params(), &module(), &registry).await;

        assert!(ok);
        assert_eq!(
            gauge_samples(&registry, METRIC_JSONRPC),
            vec![(
                labels(&[
                    ("rpc", target.as_str()),
                    ("method", "eth_blockNumber"),
                    ("params", ""),
                    ("tag", "BlockNumber"),
                ]),
                4660.0
            )]
        );
    }

    #[tokio::test]
    async fn block_number_scenario_without_batching() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(BLOCK_NUMBER_BODY)
            .create_async()
            .await;

        let mut params = block_number_params();
        params.append("disableBatch", "true");

        let registry = Registry::new();
        assert!(probe_jsonrpc(&server.url(), &params, &module(), &registry).await);
        let samples = gauge_samples(&registry, METRIC_JSONRPC);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].1, 4660.0);
    }

    #[tokio::test]
    async fn batched_and_unbatched_runs_agree() {
        let mut server = mockito::Server::new_async().await;
        let _batch = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::Regex(r"^\[".to_string()))
            .with_status(200)
            .with_body(
                r#"[{"jsonrpc":"2.0","id":1,"result":"0x3635c9adc5dea00000"},
                    {"jsonrpc":"2.0","id":2,"result":"0x3635c9adc5dea00000"}]"#,
            )
            .create_async()
            .await;
        let _single = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::Regex(r"^\{".to_string()))
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x3635c9adc5dea00000"}"#)
            .create_async()
            .await;

        let batched = Registry::new();
        assert!(probe_jsonrpc(&server.url(), &two_call_params(false), &module(), &batched).await);

        let unbatched = Registry::new();
        assert!(probe_jsonrpc(&server.url(), &two_call_params(true), &module(), &unbatched).await);

        let batched_samples = gauge_samples(&batched, METRIC_JSONRPC);
        assert_eq!(batched_samples.len(), 2);
        assert_eq!(batched_samples, gauge_samples(&unbatched, METRIC_JSONRPC));

        let wallet = batched_samples
            .iter()
            .find(|(labels, _)| labels["tag"] == "WalletZero")
            .unwrap();
        assert_eq!(wallet.1, 1000.0);
    }

    #[tokio::test]
    async fn mismatched_columns_fail_before_any_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/").expect(0).create_async().await;

        let mut params = block_number_params();
        params.append("method", "eth_chainId");

        let registry = Registry::new();
        assert!(!probe_jsonrpc(&server.url(), &params, &module(), &registry).await);
        assert!(registry.gather().is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_params_fail() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/").expect(0).create_async().await;

        let registry = Registry::new();
        assert!(!probe_jsonrpc(&server.url(), &QueryParams::default(), &module(), &registry).await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn jmespath_extracts_from_object_result() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"result":{"coinType":"0x2::sui::SUI","totalBalance":"2500000"}}"#,
            )
            .create_async()
            .await;

        let params: QueryParams = [
            ("module", "jsonrpc"),
            ("disableBatch", "true"),
            ("method", "suix_getBalance"),
            ("arg", "0x00,0x2::sui::SUI"),
            ("decimal", "6"),
            ("tag", "WalletZero"),
            ("resultJMESPath", "totalBalance"),
        ]
        .into_iter()
        .collect();

        let registry = Registry::new();
        assert!(probe_jsonrpc(&server.url(), &params, &module(), &registry).await);
        let samples = gauge_samples(&registry, METRIC_JSONRPC);
        assert_eq!(samples[0].1, 2.5);
        assert_eq!(samples[0].0["params"], "0x00,0x2::sui::SUI");
    }

    #[tokio::test]
    async fn jmespath_whole_float_results_are_accepted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"v":[1,2,3],"f":42.0}}"#)
            .expect(2)
            .create_async()
            .await;

        let params: QueryParams = [
            ("disableBatch", "true"),
            ("method", "custom_stats"),
            ("method", "custom_stats"),
            ("arg", ""),
            ("arg", ""),
            ("decimal", "0"),
            ("decimal", "0"),
            ("tag", "Sum"),
            ("tag", "Field"),
            ("resultJMESPath", "sum(v)"),
            ("resultJMESPath", "f"),
        ]
        .into_iter()
        .collect();

        let registry = Registry::new();
        assert!(probe_jsonrpc(&server.url(), &params, &module(), &registry).await);

        let mut samples = gauge_samples(&registry, METRIC_JSONRPC);
        samples.sort_by(|a, b| a.0["tag"].cmp(&b.0["tag"]));
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].0["tag"], "Field");
        assert_eq!(samples[0].1, 42.0);
        assert_eq!(samples[1].0["tag"], "Sum");
        assert_eq!(samples[1].1, 6.0);
    }

    #[tokio::test]
    async fn absent_jmespath_field_fails_probe() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"totalBalance":"1"}}"#)
            .create_async()
            .await;

        let params: QueryParams = [
            ("disableBatch", "true"),
            ("method", "suix_getBalance"),
            ("arg", "0x00"),
            ("decimal", "0"),
            ("tag", "Wallet"),
            ("resultJMESPath", "lockedBalance"),
        ]
        .into_iter()
        .collect();

        let registry = Registry::new();
        assert!(!probe_jsonrpc(&server.url(), &params, &module(), &registry).await);
        assert!(gauge_samples(&registry, METRIC_JSONRPC).is_empty());
    }

    #[tokio::test]
    async fn batch_element_error_fails_probe_but_keeps_earlier_samples() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                r#"[{"jsonrpc":"2.0","id":1,"result":"0x1"},
                    {"jsonrpc":"2.0","id":2,"error":{"code":-32602,"message":"invalid params"}}]"#,
            )
            .create_async()
            .await;

        let registry = Registry::new();
        assert!(!probe_jsonrpc(&server.url(), &two_call_params(false), &module(), &registry).await);
        let samples = gauge_samples(&registry, METRIC_JSONRPC);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].0["tag"], "WalletZero");
    }

    #[tokio::test]
    async fn transport_failure_fails_probe() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(502)
            .create_async()
            .await;

        let registry = Registry::new();
        assert!(!probe_jsonrpc(&server.url(), &block_number_params(), &module(), &registry).await);
    }

    #[tokio::test]
    async fn eth_call_object_is_sent_without_empty_fields() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "eth_call",
                "params": [
                    {"to": "0x3c3a81e81dc49a522a592e7622a7e711c06bf354", "data": "0x8da5cb5b"},
                    "latest"
                ]
            })))
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x000000000000000000000000207e804758e28f2b3fd6e4219671b327100b82f8"}"#)
            .create_async()
            .await;

        let params: QueryParams = [
            ("disableBatch", "true"),
            ("method", "eth_call"),
            (
                "arg",
                "{from:,to:0x3c3a81e81dc49a522a592e7622a7e711c06bf354,data:0x8da5cb5b},latest",
            ),
            ("decimal", "0"),
            ("tag", "MNTTokenOwner"),
            ("resultJMESPath", ""),
        ]
        .into_iter()
        .collect();

        let registry = Registry::new();
        assert!(probe_jsonrpc(&server.url(), &params, &module(), &registry).await);
        mock.assert_async().await;
    }
}
