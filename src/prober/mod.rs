//! Chain RPC probers.
//!
//! Each prober takes the scrape's query parameters and a fresh metrics
//! registry, runs one independent probe and reports a boolean outcome.

pub mod abi;
pub mod btcrpc;
pub mod decimal;
pub mod ethrpc;
pub mod extract;
pub mod jsonrpc;
pub mod metrics;
pub mod params;
pub mod rpc_client;

use prometheus::Registry;
use std::collections::HashMap;
use std::time::Duration;

use crate::constants::DEFAULT_SCRAPE_TIMEOUT_SECS;

/// Multi-valued query parameters; repeated keys keep their order.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    values: HashMap<String, Vec<String>>,
}

impl QueryParams {
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.append(key.into_owned(), value.into_owned());
        }
        params
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.entry(key.into()).or_default().push(value.into());
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Column of the first alias that is present, e.g. `arg` before `args`.
    pub fn first_present(&self, keys: &[&str]) -> &[String] {
        keys.iter()
            .map(|key| self.get_all(key))
            .find(|values| !values.is_empty())
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::default();
        for (key, value) in iter {
            params.append(key, value);
        }
        params
    }
}

/// Prober family selected by the `module` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prober {
    JsonRpc,
    EthRpc,
    BtcRpc,
}

impl Prober {
    pub fn from_module_name(name: &str) -> Option<Self> {
        match name {
            jsonrpc::MODULE_JSONRPC => Some(Prober::JsonRpc),
            ethrpc::MODULE_CHAIN_INFO
            | ethrpc::MODULE_BALANCE
            | ethrpc::MODULE_ERC20_BALANCE
            | ethrpc::MODULE_CONTRACT_CALL => Some(Prober::EthRpc),
            btcrpc::MODULE_BTC_CHAIN_INFO => Some(Prober::BtcRpc),
            _ => None,
        }
    }
}

/// Per-probe settings resolved by the shell.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub prober: Prober,
    pub timeout: Duration,
}

impl Module {
    pub fn resolve(name: &str, timeout: Option<Duration>) -> Option<Self> {
        let prober = Prober::from_module_name(name)?;
        Some(Self {
            name: name.to_string(),
            prober,
            timeout: timeout.unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_SCRAPE_TIMEOUT_SECS)),
        })
    }
}

/// Runs the prober the module points at.
pub async fn run_probe(
    target: &str,
    params: &QueryParams,
    module: &Module,
    registry: &Registry,
) -> bool {
    match module.prober {
        Prober::JsonRpc => jsonrpc::probe_jsonrpc(target, params, module, registry).await,
        Prober::EthRpc => ethrpc::probe_ethrpc(target, params, module, registry).await,
        Prober::BtcRpc => btcrpc::probe_btcrpc(target, params, module, registry).await,
    }
}
