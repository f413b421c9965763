//! Solidity ABI encoding for the handful of static and dynamic types the
//! contract calls need.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};

/// One ABI-encoded argument or return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(U256),
    Bool(bool),
    String(String),
    AddressArray(Vec<Address>),
}

impl Token {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Address(_) => "address",
            Self::Uint(_) => "uint256",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::AddressArray(_) => "address[]",
        }
    }

    fn is_dynamic(&self) -> bool {
        matches!(self, Self::String(_) | Self::AddressArray(_))
    }
}

/// First four bytes of `keccak256(signature)`.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

/// Topic 0 of an event with the given canonical signature.
#[must_use]
pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

/// Parameter types listed in a canonical signature such as `swap(uint256,uint256,address)`.
pub fn parameter_types(signature: &str) -> Result<Vec<&str>, String> {
    let open = signature
        .find('(')
        .ok_or_else(|| format!("signature '{signature}' is missing '('"))?;
    let inner = signature[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| format!("signature '{signature}' is missing ')'"))?;
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    Ok(inner.split(',').collect())
}

/// Selector followed by the head/tail encoding of `tokens`.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Result<Bytes, String> {
    let types = parameter_types(signature)?;
    if types.len() != tokens.len() {
        return Err(format!(
            "{signature} takes {} arguments, got {}",
            types.len(),
            tokens.len()
        ));
    }
    for (expected, token) in types.iter().zip(tokens) {
        if *expected != token.type_name() {
            return Err(format!(
                "{signature} expects {expected}, got {}",
                token.type_name()
            ));
        }
    }

    let mut out = selector(signature).to_vec();
    out.extend(encode_tokens(tokens));
    Ok(Bytes::from(out))
}

#[must_use]
pub fn encode_tokens(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&word_u256(U256::from(head_len + tail.len())));
            encode_dynamic(token, &mut tail);
        } else {
            head.extend_from_slice(&encode_static(token));
        }
    }

    head.extend(tail);
    head
}

fn encode_static(token: &Token) -> [u8; 32] {
    match token {
        Token::Address(address) => {
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(address.as_slice());
            word
        }
        Token::Uint(value) => word_u256(*value),
        Token::Bool(value) => word_u256(U256::from(u8::from(*value))),
        Token::String(_) | Token::AddressArray(_) => [0u8; 32],
    }
}

fn encode_dynamic(token: &Token, out: &mut Vec<u8>) {
    match token {
        Token::String(text) => {
            let bytes = text.as_bytes();
            out.extend_from_slice(&word_u256(U256::from(bytes.len())));
            out.extend_from_slice(bytes);
            let padding = (32 - bytes.len() % 32) % 32;
            out.extend(std::iter::repeat(0u8).take(padding));
        }
        Token::AddressArray(addresses) => {
            out.extend_from_slice(&word_u256(U256::from(addresses.len())));
            for address in addresses {
                out.extend_from_slice(&encode_static(&Token::Address(*address)));
            }
        }
        _ => {}
    }
}

fn word_u256(value: U256) -> [u8; 32] {
    value.to_be_bytes::<32>()
}

/// The `index`-th 32-byte word of `data`.
pub fn word(data: &[u8], index: usize) -> Result<&[u8], String> {
    let start = index * 32;
    data.get(start..start + 32)
        .ok_or_else(|| format!("return data too short for word {index}"))
}

pub fn decode_uint(data: &[u8], index: usize) -> Result<U256, String> {
    Ok(U256::from_be_slice(word(data, index)?))
}

pub fn decode_address(data: &[u8], index: usize) -> Result<Address, String> {
    let word = word(data, index)?;
    if word[..12].iter().any(|byte| *byte != 0) {
        return Err(format!("word {index} is not a left-padded address"));
    }
    Ok(Address::from_slice(&word[12..]))
}

/// Decodes a dynamic `string` whose offset sits at word `index`.
pub fn decode_string(data: &[u8], index: usize) -> Result<String, String> {
    let offset = usize::try_from(decode_uint(data, index)?)
        .map_err(|_| "string offset overflows".to_string())?;
    let len_word = data
        .get(offset..offset + 32)
        .ok_or_else(|| "string length out of bounds".to_string())?;
    let len = usize::try_from(U256::from_be_slice(len_word))
        .map_err(|_| "string length overflows".to_string())?;
    let bytes = data
        .get(offset + 32..offset + 32 + len)
        .ok_or_else(|| "string body out of bounds".to_string())?;
    String::from_utf8(bytes.to_vec()).map_err(|error| format!("string is not UTF-8: {error}"))
}

/// Decodes a dynamic `uint256[]` whose offset sits at word `index`.
pub fn decode_uint_array(data: &[u8], index: usize) -> Result<Vec<U256>, String> {
    let offset = usize::try_from(decode_uint(data, index)?)
        .map_err(|_| "array offset overflows".to_string())?;
    let body = data
        .get(offset..)
        .ok_or_else(|| "array offset out of bounds".to_string())?;
    let len = usize::try_from(decode_uint(body, 0)?)
        .map_err(|_| "array length overflows".to_string())?;
    (1..=len).map(|item| decode_uint(body, item)).collect()
}

/// Extracts the message of a Solidity `Error(string)` revert payload.
#[must_use]
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let body = data.strip_prefix(selector("Error(string)").as_slice())?;
    decode_string(body, 0).ok()
}

/// Address stored in an indexed event topic.
#[must_use]
pub fn topic_address(topic: &B256) -> Address {
    Address::from_slice(&topic[12..])
}
