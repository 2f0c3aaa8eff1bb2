/// Application constants

// Metric names
pub const METRIC_JSONRPC: &str = "probe_jsonrpc";
pub const METRIC_ETH_BLOCK_NUMBER: &str = "probe_ethrpc_block_number";
pub const METRIC_ETH_BALANCE: &str = "probe_ethrpc_balance";
pub const METRIC_ETH_ERC20_BALANCE: &str = "probe_ethrpc_erc20balance";
pub const METRIC_ETH_CONTRACT_CALL: &str = "probe_ethrpc_contract_call";
pub const METRIC_ETH_CONTRACT_CALL_OUTPUT: &str = "probe_ethrpc_contract_call_output";
pub const METRIC_BTC_BLOCK_NUMBER: &str = "probe_btcrpc_block_number";
pub const METRIC_PROBE_SUCCESS: &str = "probe_success";
pub const METRIC_PROBE_DURATION: &str = "probe_duration_seconds";

// Chain defaults
pub const NATIVE_DECIMALS: u32 = 18;
pub const DEFAULT_BLOCK_TAG: &str = "latest";

// JSON-RPC envelope versions
pub const JSONRPC_V2: &str = "2.0";
pub const JSONRPC_V1: &str = "1.0";

// Timeouts
pub const DEFAULT_SCRAPE_TIMEOUT_SECS: f64 = 120.0;
pub const SCRAPE_TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";
