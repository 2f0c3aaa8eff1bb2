//! Runtime ABI model for contract calls described in the query string.
//!
//! Fragments are decoded with serde into small structs, their type strings
//! are resolved to `ethers` param types, and call data is produced and
//! decoded with `ethers::abi`.

use ethers::abi::param_type::Reader;
use ethers::abi::token::{LenientTokenizer, Tokenizer};
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, I256, U256};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

use crate::error::{ProbeError, Result};
use crate::prober::decimal::to_scaled_float;

fn default_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub components: Vec<AbiParam>,
}

impl AbiParam {
    pub fn new(kind: &str) -> Self {
        Self {
            name: String::new(),
            kind: kind.to_string(),
            components: Vec::new(),
        }
    }

    pub fn param_type(&self) -> Result<ParamType> {
        let kind = self.kind.trim();
        if let Some(suffix) = kind.strip_prefix("tuple") {
            let members = self
                .components
                .iter()
                .map(AbiParam::param_type)
                .collect::<Result<Vec<_>>>()?;
            return wrap_array_suffix(ParamType::Tuple(members), suffix);
        }
        Reader::read(kind)
            .map_err(|e| ProbeError::Precondition(format!("unsupported ABI type '{}': {}", kind, e)))
    }
}

/// Applies `[]` / `[N]` suffixes of a tuple type, innermost first.
fn wrap_array_suffix(mut inner: ParamType, mut suffix: &str) -> Result<ParamType> {
    while !suffix.is_empty() {
        let close = suffix
            .strip_prefix('[')
            .and_then(|rest| rest.find(']').map(|idx| (rest, idx)));
        let Some((rest, idx)) = close else {
            return Err(ProbeError::Precondition(format!(
                "malformed tuple array suffix '{}'",
                suffix
            )));
        };
        let size = &rest[..idx];
        inner = if size.is_empty() {
            ParamType::Array(Box::new(inner))
        } else {
            let len = size.parse::<usize>().map_err(|_| {
                ProbeError::Precondition(format!("bad fixed array size '{}'", size))
            })?;
            ParamType::FixedArray(Box::new(inner), len)
        };
        suffix = &rest[idx + 1..];
    }
    Ok(inner)
}

/// A contract function as described by one ABI JSON fragment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AbiFunction {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    #[serde(default)]
    pub outputs: Vec<AbiParam>,
}

impl AbiFunction {
    pub fn new(name: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind: default_kind(),
            inputs: inputs.iter().map(|kind| AbiParam::new(kind)).collect(),
            outputs: outputs.iter().map(|kind| AbiParam::new(kind)).collect(),
        }
    }

    /// `balanceOf(address) returns (uint256)`
    pub fn erc20_balance_of() -> Self {
        Self::new("balanceOf", &["address"], &["uint256"])
    }

    /// `decimals() returns (uint8)`
    pub fn erc20_decimals() -> Self {
        Self::new("decimals", &[], &["uint8"])
    }

    pub fn input_types(&self) -> Result<Vec<ParamType>> {
        self.inputs.iter().map(AbiParam::param_type).collect()
    }

    pub fn output_types(&self) -> Result<Vec<ParamType>> {
        self.outputs.iter().map(AbiParam::param_type).collect()
    }

    /// Canonical signature, e.g. `balanceOf(address)`.
    pub fn signature(&self) -> Result<String> {
        let inputs = self
            .input_types()?
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        Ok(format!("{}({})", self.name, inputs))
    }

    pub fn selector(&self) -> Result<[u8; 4]> {
        Ok(ethers::utils::id(self.signature()?))
    }

    /// Tokenizes the literal arguments by input type and returns the full
    /// call data (selector followed by the encoded arguments).
    pub fn encode_call<S: AsRef<str>>(&self, args: &[S]) -> Result<Vec<u8>> {
        let types = self.input_types()?;
        if types.len() != args.len() {
            return Err(ProbeError::Precondition(format!(
                "{} expects {} argument(s), got {}",
                self.name,
                types.len(),
                args.len()
            )));
        }
        let tokens = types
            .iter()
            .zip(&self.inputs)
            .zip(args)
            .enumerate()
            .map(|(index, ((kind, param), raw))| {
                tokenize(kind, raw.as_ref()).map_err(|e| match param.name.as_str() {
                    "" => e.context(format!("{} argument #{}", self.name, index)),
                    name => e.context(format!("{} argument '{}'", self.name, name)),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut data = self.selector()?.to_vec();
        data.extend(abi::encode(&tokens));
        Ok(data)
    }

    /// Decodes return data. A function without declared outputs decodes
    /// to nothing, whatever the bytes are.
    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<Token>> {
        if self.outputs.is_empty() {
            return Ok(Vec::new());
        }
        let types = self.output_types()?;
        abi::decode(&types, data).map_err(|e| {
            ProbeError::Decode(format!("cannot decode {} output: {}", self.name, e))
        })
    }
}

/// Parses an ABI JSON document (array of fragments or a single fragment)
/// and keeps its function fragments.
pub fn parse_abi_functions(json: &str) -> Result<Vec<AbiFunction>> {
    let document: Value = serde_json::from_str(json)
        .map_err(|e| ProbeError::Precondition(format!("invalid ABI JSON: {}", e)))?;
    let fragments = match document {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        _ => {
            return Err(ProbeError::Precondition(
                "ABI JSON must be an array or an object".to_string(),
            ))
        }
    };

    let mut functions = Vec::new();
    for fragment in fragments {
        let function: AbiFunction = serde_json::from_value(fragment)
            .map_err(|e| ProbeError::Precondition(format!("invalid ABI fragment: {}", e)))?;
        if function.kind != "function" {
            continue;
        }
        if function.name.trim().is_empty() {
            return Err(ProbeError::Precondition(
                "ABI function fragment has no name".to_string(),
            ));
        }
        // Resolve every type up front so bad fragments fail before any I/O.
        function.input_types()?;
        function.output_types()?;
        functions.push(function);
    }

    if functions.is_empty() {
        return Err(ProbeError::Precondition(
            "ABI JSON contains no function fragment".to_string(),
        ));
    }
    Ok(functions)
}

pub fn parse_address(raw: &str) -> Result<Address> {
    Address::from_str(raw.trim())
        .map_err(|e| ProbeError::Precondition(format!("invalid address '{}': {}", raw, e)))
}

/// Lowercase `0x`-prefixed form used for every address we emit.
pub fn format_address(address: &Address) -> String {
    format!("{:#x}", address)
}

fn parse_u256(raw: &str) -> Result<U256> {
    let parsed = match raw.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| e.to_string()),
        None => U256::from_dec_str(raw).map_err(|e| e.to_string()),
    };
    parsed.map_err(|e| ProbeError::Precondition(format!("invalid uint '{}': {}", raw, e)))
}

fn parse_hex(raw: &str) -> Result<Vec<u8>> {
    let trimmed = raw.trim();
    hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .map_err(|e| ProbeError::Precondition(format!("invalid hex '{}': {}", raw, e)))
}

/// Turns one literal argument into a token of the given type.
pub fn tokenize(kind: &ParamType, raw: &str) -> Result<Token> {
    let raw = raw.trim();
    let token = match kind {
        ParamType::Address => Token::Address(parse_address(raw)?),
        ParamType::Uint(_) => Token::Uint(parse_u256(raw)?),
        ParamType::Int(_) => Token::Int(
            I256::from_dec_str(raw)
                .map_err(|e| ProbeError::Precondition(format!("invalid int '{}': {}", raw, e)))?
                .into_raw(),
        ),
        ParamType::Bool => match raw {
            "true" | "1" => Token::Bool(true),
            "false" | "0" => Token::Bool(false),
            _ => {
                return Err(ProbeError::Precondition(format!("invalid bool '{}'", raw)));
            }
        },
        ParamType::String => Token::String(raw.to_string()),
        ParamType::Bytes => Token::Bytes(parse_hex(raw)?),
        ParamType::FixedBytes(size) => {
            let bytes = parse_hex(raw)?;
            if bytes.len() != *size {
                return Err(ProbeError::Precondition(format!(
                    "bytes{} argument has {} byte(s)",
                    size,
                    bytes.len()
                )));
            }
            Token::FixedBytes(bytes)
        }
        other => LenientTokenizer::tokenize(other, raw).map_err(|e| {
            ProbeError::Precondition(format!("invalid {} argument '{}': {}", other, raw, e))
        })?,
    };
    Ok(token)
}

/// Numeric reading of a decoded output, if it has one.
pub fn token_to_f64(token: &Token) -> Option<f64> {
    match token {
        Token::Uint(value) => Some(to_scaled_float(&value.to_string(), 0)),
        Token::Int(value) => I256::from_raw(*value).to_string().parse::<f64>().ok(),
        Token::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Text rendering of a decoded output; addresses are lowercase.
pub fn token_to_string(token: &Token) -> String {
    match token {
        Token::Address(address) => format_address(address),
        Token::Uint(value) => value.to_string(),
        Token::Int(value) => I256::from_raw(*value).to_string(),
        Token::Bool(value) => value.to_string(),
        Token::String(value) => value.clone(),
        Token::Bytes(bytes) | Token::FixedBytes(bytes) => format!("0x{}", hex::encode(bytes)),
        Token::Array(items) | Token::FixedArray(items) => format!(
            "[{}]",
            items.iter().map(token_to_string).collect::<Vec<_>>().join(",")
        ),
        Token::Tuple(items) => format!(
            "({})",
            items.iter().map(token_to_string).collect::<Vec<_>>().join(",")
        ),
    }
}

/// Decodes the hex string an `eth_call` returns.
pub fn decode_call_result(result: &Value) -> Result<Vec<u8>> {
    let text = result
        .as_str()
        .ok_or_else(|| ProbeError::Decode(format!("eth_call returned non-string {}", result)))?;
    hex::decode(text.strip_prefix("0x").unwrap_or(text))
        .map_err(|e| ProbeError::Decode(format!("eth_call returned invalid hex: {}", e)))
}
