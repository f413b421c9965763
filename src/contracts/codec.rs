use delegated_signer::abi::{
    decode_address, decode_string, decode_uint, encode_call, event_topic, topic_address,
};
use delegated_signer::{Bytes, Log, TxReceipt, U256};

use super::{ContractCodec, ContractError, DecodedEvent, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamType {
    Address,
    Uint,
    String,
}

#[derive(Debug, Clone, Copy)]
struct EventParam {
    name: &'static str,
    kind: ParamType,
    indexed: bool,
}

const fn indexed(name: &'static str, kind: ParamType) -> EventParam {
    EventParam {
        name,
        kind,
        indexed: true,
    }
}

const fn data(name: &'static str, kind: ParamType) -> EventParam {
    EventParam {
        name,
        kind,
        indexed: false,
    }
}

struct EventSpec {
    name: &'static str,
    signature: &'static str,
    params: &'static [EventParam],
}

const FUNCTIONS: &[(&str, &str)] = &[
    // ERC20
    ("balanceOf", "balanceOf(address)"),
    ("allowance", "allowance(address,address)"),
    ("approve", "approve(address,uint256)"),
    ("transfer", "transfer(address,uint256)"),
    ("decimals", "decimals()"),
    ("symbol", "symbol()"),
    // meme factory
    (
        "createMemeCoin",
        "createMemeCoin(string,string,uint256,uint256,uint256)",
    ),
    // liquidity factory
    ("createPair", "createPair(address,address)"),
    ("getPair", "getPair(address,address)"),
    ("allPairs", "allPairs(uint256)"),
    ("allPairsLength", "allPairsLength()"),
    // pair
    ("token0", "token0()"),
    ("token1", "token1()"),
    ("getReserves", "getReserves()"),
    (
        "addLiquidity",
        "addLiquidity(uint256,uint256,uint256,uint256)",
    ),
    ("removeLiquidity", "removeLiquidity(uint256)"),
    ("swap", "swap(uint256,uint256,address)"),
];

const EVENTS: &[EventSpec] = &[
    EventSpec {
        name: "MemeCoinCreated",
        signature: "MemeCoinCreated(address,address,string,string)",
        params: &[
            indexed("memeCoin", ParamType::Address),
            indexed("creator", ParamType::Address),
            data("name", ParamType::String),
            data("symbol", ParamType::String),
        ],
    },
    EventSpec {
        name: "PairCreated",
        signature: "PairCreated(address,address,address,uint256)",
        params: &[
            indexed("token0", ParamType::Address),
            indexed("token1", ParamType::Address),
            data("pair", ParamType::Address),
            data("pairIndex", ParamType::Uint),
        ],
    },
    EventSpec {
        name: "Mint",
        signature: "Mint(address,uint256,uint256)",
        params: &[
            indexed("sender", ParamType::Address),
            data("amount0", ParamType::Uint),
            data("amount1", ParamType::Uint),
        ],
    },
    EventSpec {
        name: "Burn",
        signature: "Burn(address,uint256,uint256,address)",
        params: &[
            indexed("sender", ParamType::Address),
            data("amount0", ParamType::Uint),
            data("amount1", ParamType::Uint),
            indexed("to", ParamType::Address),
        ],
    },
    EventSpec {
        name: "Swap",
        signature: "Swap(address,uint256,uint256,uint256,uint256,address)",
        params: &[
            indexed("sender", ParamType::Address),
            data("amount0In", ParamType::Uint),
            data("amount1In", ParamType::Uint),
            data("amount0Out", ParamType::Uint),
            data("amount1Out", ParamType::Uint),
            indexed("to", ParamType::Address),
        ],
    },
];

/// Codec for the factory, pair and ERC20 interfaces the tools call.
#[derive(Debug, Default, Clone, Copy)]
pub struct SolidityCodec;

impl SolidityCodec {
    fn event(&self, name: &str) -> Result<&'static EventSpec, ContractError> {
        EVENTS
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| ContractError::UnknownEvent(name.to_string()))
    }
}

impl ContractCodec for SolidityCodec {
    fn signature(&self, function: &str) -> Result<&'static str, ContractError> {
        FUNCTIONS
            .iter()
            .find(|(name, _)| *name == function)
            .map(|(_, signature)| *signature)
            .ok_or_else(|| ContractError::UnknownFunction(function.to_string()))
    }

    fn encode_call(&self, function: &str, args: &[Token]) -> Result<Bytes, ContractError> {
        let signature = self.signature(function)?;
        encode_call(signature, args).map_err(|reason| ContractError::Encode {
            function: function.to_string(),
            reason,
        })
    }

    fn decode_event(
        &self,
        receipt: &TxReceipt,
        event: &str,
    ) -> Result<Option<DecodedEvent>, ContractError> {
        let spec = self.event(event)?;
        let topic = event_topic(spec.signature);

        receipt
            .logs
            .iter()
            .find(|log| log.topics.first() == Some(&topic))
            .map(|log| decode_log(spec, log))
            .transpose()
    }
}

fn decode_log(spec: &EventSpec, log: &Log) -> Result<DecodedEvent, ContractError> {
    let error = |reason: String| ContractError::Decode {
        what: spec.name.to_string(),
        reason,
    };

    let mut fields = Vec::with_capacity(spec.params.len());
    let mut topic_index = 1;
    let mut data_index = 0;

    for param in spec.params {
        let token = if param.indexed {
            let topic = log
                .topics
                .get(topic_index)
                .ok_or_else(|| error(format!("missing topic for '{}'", param.name)))?;
            topic_index += 1;
            match param.kind {
                ParamType::Address => Token::Address(topic_address(topic)),
                ParamType::Uint => Token::Uint(U256::from_be_slice(topic.as_slice())),
                // Indexed strings are hashed; only the hash is recoverable.
                ParamType::String => Token::String(topic.to_string()),
            }
        } else {
            let index = data_index;
            data_index += 1;
            match param.kind {
                ParamType::Address => Token::Address(decode_address(&log.data, index).map_err(error)?),
                ParamType::Uint => Token::Uint(decode_uint(&log.data, index).map_err(error)?),
                ParamType::String => Token::String(decode_string(&log.data, index).map_err(error)?),
            }
        };
        fields.push((param.name.to_string(), token));
    }

    Ok(DecodedEvent {
        contract: log.address,
        fields,
    })
}
