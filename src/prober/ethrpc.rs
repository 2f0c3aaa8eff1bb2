use ethers::abi::Token;
use ethers::types::{Address, U256};
use prometheus::Registry;
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::constants::{
    DEFAULT_BLOCK_TAG, METRIC_ETH_BALANCE, METRIC_ETH_BLOCK_NUMBER, METRIC_ETH_CONTRACT_CALL,
    METRIC_ETH_CONTRACT_CALL_OUTPUT, METRIC_ETH_ERC20_BALANCE, NATIVE_DECIMALS,
};
use crate::error::{ProbeError, Result};
use crate::prober::abi::{
    decode_call_result, format_address, parse_abi_functions, parse_address, token_to_f64,
    token_to_string, AbiFunction,
};
use crate::prober::decimal::try_scaled_float;
use crate::prober::metrics::register_gauge_vec;
use crate::prober::rpc_client::{normalize_target, RpcClient};
use crate::prober::{Module, QueryParams};

pub const MODULE_CHAIN_INFO: &str = "chain_info";
pub const MODULE_BALANCE: &str = "balance";
pub const MODULE_ERC20_BALANCE: &str = "erc20balance";
pub const MODULE_CONTRACT_CALL: &str = "contract_call";

/// `tag:address` reference from a repeated `account` parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRef {
    pub tag: String,
    pub address: Address,
}

impl AccountRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let (tag, address) = raw.split_once(':').ok_or_else(|| {
            ProbeError::Precondition(format!("account '{}' is not in tag:address form", raw))
        })?;
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(ProbeError::Precondition(format!("account '{}' has an empty tag", raw)));
        }
        Ok(Self {
            tag: tag.to_string(),
            address: parse_address(address)?,
        })
    }
}

/// A function fragment together with its ready-made call data.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedFunction {
    pub function: AbiFunction,
    pub calldata: Vec<u8>,
}

/// One `label|address|abiJSON[|arg...]` entry of the `call` parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractCall {
    pub label: String,
    pub address: Address,
    pub functions: Vec<PreparedFunction>,
}

impl ContractCall {
    /// Parses the pipe-delimited call string and encodes every function
    /// fragment with the trailing literals.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut fields = raw.split('|');
        let label = fields.next().unwrap_or_default().trim();
        let (Some(address), Some(abi_json)) = (fields.next(), fields.next()) else {
            return Err(ProbeError::Precondition(format!(
                "call '{}' is not in label|address|abi[|arg...] form",
                raw
            )));
        };
        if label.is_empty() {
            return Err(ProbeError::Precondition(format!("call '{}' has an empty label", raw)));
        }
        let args: Vec<&str> = fields.collect();
        let address = parse_address(address)?;

        let functions = parse_abi_functions(abi_json)?
            .into_iter()
            .map(|function| {
                let calldata = function
                    .encode_call(&args)
                    .map_err(|e| e.context(format!("call '{}'", label)))?;
                Ok(PreparedFunction { function, calldata })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            label: label.to_string(),
            address,
            functions,
        })
    }
}

/// Ethereum probe mode, resolved once from the `module` parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum EthQuery {
    ChainInfo,
    Balance {
        accounts: Vec<AccountRef>,
    },
    Erc20Balance {
        token: Address,
        symbol: String,
        decimals: Option<u32>,
        accounts: Vec<AccountRef>,
    },
    ContractCall {
        calls: Vec<ContractCall>,
    },
}

fn parse_accounts(params: &QueryParams) -> Result<Vec<AccountRef>> {
    let accounts = params
        .get_all("account")
        .iter()
        .map(|raw| AccountRef::parse(raw))
        .collect::<Result<Vec<_>>>()?;
    if accounts.is_empty() {
        return Err(ProbeError::Precondition(
            "at least one account=tag:address is required".to_string(),
        ));
    }
    Ok(accounts)
}

impl EthQuery {
    pub fn from_module(name: &str, params: &QueryParams) -> Result<Self> {
        match name {
            MODULE_CHAIN_INFO => Ok(EthQuery::ChainInfo),
            MODULE_BALANCE => Ok(EthQuery::Balance {
                accounts: parse_accounts(params)?,
            }),
            MODULE_ERC20_BALANCE => {
                let token = params
                    .get("token")
                    .ok_or_else(|| ProbeError::Precondition("token is required".to_string()))?;
                let decimals = params
                    .first_present(&["decimals", "decimal"])
                    .first()
                    .map(|raw| {
                        raw.trim().parse::<u32>().map_err(|_| {
                            ProbeError::Precondition(format!("invalid decimals '{}'", raw))
                        })
                    })
                    .transpose()?;
                Ok(EthQuery::Erc20Balance {
                    token: parse_address(token)?,
                    symbol: params.get("symbol").unwrap_or_default().to_string(),
                    decimals,
                    accounts: parse_accounts(params)?,
                })
            }
            MODULE_CONTRACT_CALL => {
                let calls = params
                    .get_all("call")
                    .iter()
                    .map(|raw| ContractCall::parse(raw))
                    .collect::<Result<Vec<_>>>()?;
                if calls.is_empty() {
                    return Err(ProbeError::Precondition(
                        "at least one call=label|address|abi is required".to_string(),
                    ));
                }
                Ok(EthQuery::ContractCall { calls })
            }
            other => Err(ProbeError::Precondition(format!(
                "'{}' is not an ethereum probe module",
                other
            ))),
        }
    }
}

/// Typed Ethereum reads on top of the shared JSON-RPC client.
struct EthReader<'a> {
    client: &'a RpcClient,
}

fn expect_hex_quantity(result: Value, method: &str) -> Result<String> {
    match result {
        Value::String(text) => Ok(text),
        other => Err(ProbeError::Decode(format!(
            "{} returned non-string result {}",
            method, other
        ))),
    }
}

impl<'a> EthReader<'a> {
    async fn block_number(&self) -> Result<f64> {
        let result = self
            .client
            .call("eth_blockNumber", &json!([]))
            .await
            .map_err(|e| e.context("eth_blockNumber"))?;
        let quantity = expect_hex_quantity(result, "eth_blockNumber")?;
        try_scaled_float(&quantity, 0).map_err(|e| e.context("eth_blockNumber"))
    }

    /// Raw balance in wei as returned by the node.
    async fn balance(&self, address: &Address) -> Result<String> {
        let result = self
            .client
            .call(
                "eth_getBalance",
                &json!([format_address(address), DEFAULT_BLOCK_TAG]),
            )
            .await
            .map_err(|e| e.context("eth_getBalance"))?;
        expect_hex_quantity(result, "eth_getBalance")
    }

    async fn call(&self, to: &Address, calldata: &[u8]) -> Result<Vec<u8>> {
        let result = self
            .client
            .call(
                "eth_call",
                &json!([
                    {
                        "to": format_address(to),
                        "data": format!("0x{}", hex::encode(calldata)),
                    },
                    DEFAULT_BLOCK_TAG
                ]),
            )
            .await
            .map_err(|e| e.context("eth_call"))?;
        decode_call_result(&result)
    }

    async fn erc20_decimals(&self, token: &Address) -> Result<u32> {
        let function = AbiFunction::erc20_decimals();
        let output = self.call(token, &function.encode_call::<&str>(&[])?).await?;
        let tokens = function.decode_output(&output)?;
        match tokens.first() {
            Some(Token::Uint(value)) if *value <= U256::from(u8::MAX) => Ok(value.low_u32()),
            _ => Err(ProbeError::Decode(format!(
                "token {} returned invalid decimals",
                format_address(token)
            ))),
        }
    }
}

async fn run(client: &RpcClient, target: &str, query: &EthQuery, registry: &Registry) -> Result<()> {
    let eth = EthReader { client };

    match query {
        EthQuery::ChainInfo => {
            let gauge_vec = register_gauge_vec(
                registry,
                METRIC_ETH_BLOCK_NUMBER,
                "Latest block number reported by the node",
                &["target"],
            )?;
            let block_number = eth.block_number().await?;
            tracing::debug!(rpc = %target, block_number, "fetched block number");
            gauge_vec.with_label_values(&[target]).set(block_number);
        }
        EthQuery::Balance { accounts } => {
            let gauge_vec = register_gauge_vec(
                registry,
                METRIC_ETH_BALANCE,
                "Native balance of an account in ether",
                &["target", "tag"],
            )?;
            for account in accounts {
                let raw = eth
                    .balance(&account.address)
                    .await
                    .map_err(|e| e.context(&account.tag))?;
                let value = try_scaled_float(&raw, NATIVE_DECIMALS)?;
                tracing::debug!(rpc = %target, tag = %account.tag, raw = %raw, value, "fetched balance");
                gauge_vec
                    .with_label_values(&[target, account.tag.as_str()])
                    .set(value);
            }
        }
        EthQuery::Erc20Balance {
            token,
            symbol,
            decimals,
            accounts,
        } => {
            let gauge_vec = register_gauge_vec(
                registry,
                METRIC_ETH_ERC20_BALANCE,
                "ERC-20 token balance of an account, scaled by the token decimals",
                &["target", "tag", "token", "symbol"],
            )?;
            let decimals = match decimals {
                Some(decimals) => *decimals,
                None => eth.erc20_decimals(token).await?,
            };
            let token_label = format_address(token);
            let balance_of = AbiFunction::erc20_balance_of();

            for account in accounts {
                let calldata = balance_of.encode_call(&[format_address(&account.address)])?;
                let output = eth
                    .call(token, &calldata)
                    .await
                    .map_err(|e| e.context(&account.tag))?;
                let tokens = balance_of.decode_output(&output)?;
                let raw = tokens.first().map(token_to_string).unwrap_or_default();
                let value = try_scaled_float(&raw, decimals)?;
                tracing::debug!(rpc = %target, tag = %account.tag, raw = %raw, value, "fetched token balance");
                gauge_vec
                    .with_label_values(&[
                        target,
                        account.tag.as_str(),
                        token_label.as_str(),
                        symbol.as_str(),
                    ])
                    .set(value);
            }
        }
        EthQuery::ContractCall { calls } => {
            let gauge_vec = register_gauge_vec(
                registry,
                METRIC_ETH_CONTRACT_CALL,
                "First numeric output of a contract call, 1 for calls without one",
                &["target", "label", "method"],
            )?;
            let output_vec = register_gauge_vec(
                registry,
                METRIC_ETH_CONTRACT_CALL_OUTPUT,
                "Non-numeric contract call output, exposed in the value label",
                &["target", "label", "method", "index", "value"],
            )?;

            let mut written = HashSet::new();
            for call in calls {
                for prepared in &call.functions {
                    let function = &prepared.function;
                    let context = format!("{}.{}", call.label, function.name);
                    let output = eth
                        .call(&call.address, &prepared.calldata)
                        .await
                        .map_err(|e| e.context(&context))?;
                    let tokens = function
                        .decode_output(&output)
                        .map_err(|e| e.context(&context))?;

                    let mut value = None;
                    for (index, token) in tokens.iter().enumerate() {
                        match token_to_f64(token) {
                            Some(number) => {
                                value.get_or_insert(number);
                            }
                            None => {
                                output_vec
                                    .with_label_values(&[
                                        target,
                                        call.label.as_str(),
                                        function.name.as_str(),
                                        index.to_string().as_str(),
                                        token_to_string(token).as_str(),
                                    ])
                                    .set(1.0);
                            }
                        }
                    }

                    let value = value.unwrap_or(1.0);
                    tracing::debug!(rpc = %target, call = %context, outputs = tokens.len(), value, "contract call decoded");
                    if !written.insert((call.label.as_str(), function.name.as_str())) {
                        tracing::warn!(
                            rpc = %target,
                            call = %context,
                            "label and method repeat an earlier call; overwriting its sample"
                        );
                    }
                    gauge_vec
                        .with_label_values(&[target, call.label.as_str(), function.name.as_str()])
                        .set(value);
                }
            }
        }
    }
    Ok(())
}

/// Ethereum probe: block number, native balances, ERC-20 balances or
/// ABI-described contract calls, depending on `module`.
pub async fn probe_ethrpc(
    target: &str,
    params: &QueryParams,
    module: &Module,
    registry: &Registry,
) -> bool {
    let target = normalize_target(target);

    let query = match EthQuery::from_module(&module.name, params) {
        Ok(query) => query,
        Err(err) => {
            tracing::error!(rpc = %target, error = %err, "invalid ethrpc parameters");
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

    match run(&client, &target, &query, registry).await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(rpc = %target, module = %module.name, error = %err, "ethrpc probe failed");
            false
        }
    }
}
