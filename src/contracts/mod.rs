//! Contract calls and events the built-in tools use.
//!
//! Tools name functions and events by their short Solidity name; the codec
//! owns the canonical signatures so ABI details stay in one place.

mod codec;

pub use codec::SolidityCodec;
pub use delegated_signer::abi::Token;

use delegated_signer::{Address, Bytes, TxReceipt};

/// Encoding or decoding failure for a contract interaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("unknown contract function '{0}'")]
    UnknownFunction(String),
    #[error("unknown contract event '{0}'")]
    UnknownEvent(String),
    #[error("cannot encode {function}: {reason}")]
    Encode { function: String, reason: String },
    #[error("cannot decode {what}: {reason}")]
    Decode { what: String, reason: String },
}

/// One event found in a receipt, with its fields decoded by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub contract: Address,
    pub fields: Vec<(String, Token)>,
}

impl DecodedEvent {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Token> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, token)| token)
    }

    #[must_use]
    pub fn address(&self, name: &str) -> Option<Address> {
        match self.get(name) {
            Some(Token::Address(address)) => Some(*address),
            _ => None,
        }
    }
}

pub trait ContractCodec: Send + Sync {
    /// Canonical signature for a short function name, e.g. `approve`.
    fn signature(&self, function: &str) -> Result<&'static str, ContractError>;

    fn encode_call(&self, function: &str, args: &[Token]) -> Result<Bytes, ContractError>;

    /// First log in `receipt` matching `event`, if any.
    fn decode_event(
        &self,
        receipt: &TxReceipt,
        event: &str,
    ) -> Result<Option<DecodedEvent>, ContractError>;
}
