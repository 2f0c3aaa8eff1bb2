use prometheus::Registry;
use serde_json::{json, Value};

use crate::constants::METRIC_BTC_BLOCK_NUMBER;
use crate::error::{ProbeError, Result};
use crate::prober::metrics::register_gauge_vec;
use crate::prober::rpc_client::{normalize_target, RpcClient};
use crate::prober::{Module, QueryParams};

pub const MODULE_BTC_CHAIN_INFO: &str = "btc_chain_info";

fn block_height(info: &Value) -> Result<f64> {
    info.get("blocks")
        .and_then(Value::as_u64)
        .map(|blocks| blocks as f64)
        .ok_or_else(|| {
            ProbeError::Decode("getblockchaininfo result has no numeric 'blocks'".to_string())
        })
}

async fn run(client: &RpcClient, target: &str, registry: &Registry) -> Result<()> {
    let gauge_vec = register_gauge_vec(
        registry,
        METRIC_BTC_BLOCK_NUMBER,
        "Block height reported by getblockchaininfo",
        &["target"],
    )?;

    let info = client
        .call("getblockchaininfo", &json!([]))
        .await
        .map_err(|e| e.context("getblockchaininfo"))?;
    let blocks = block_height(&info)?;
    tracing::debug!(rpc = %target, blocks, "fetched bitcoin chain info");

    gauge_vec.with_label_values(&[target]).set(blocks);
    Ok(())
}

/// Bitcoin probe: chain height over JSON-RPC 1.0 with basic auth taken
/// from the `user` and `pass` parameters.
pub async fn probe_btcrpc(
    target: &str,
    params: &QueryParams,
    module: &Module,
    registry: &Registry,
) -> bool {
    let target = normalize_target(target);

    if module.name != MODULE_BTC_CHAIN_INFO {
        tracing::error!(rpc = %target, module = %module.name, "not a bitcoin probe module");
        return false;
    }

    let client = match RpcClient::new(&target, module.timeout) {
        Ok(client) => client.with_basic_auth(
            params.get("user").unwrap_or_default(),
            params.get("pass").unwrap_or_default(),
        ),
        Err(err) => {
            tracing::error!(rpc = %target, error = %err, "error creating RPC client");
            return false;
        }
    };

    match run(&client, &target, registry).await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(rpc = %target, error = %err, "btcrpc probe failed");
            false
        }
    }
}
