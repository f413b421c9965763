use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{length_of_length, BufMut, Encodable, Header};

use crate::signature::NormalizedSignature;

/// EIP-155 legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTx {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl LegacyTx {
    fn fields_length(&self) -> usize {
        self.nonce.length()
            + self.gas_price.length()
            + self.gas_limit.length()
            + self.to.length()
            + self.value.length()
            + self.data.length()
    }

    fn encode_fields(&self, out: &mut dyn BufMut) {
        self.nonce.encode(out);
        self.gas_price.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.data.encode(out);
    }

    /// RLP of `[nonce, gasPrice, gas, to, value, data, chainId, 0, 0]`.
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        alloy_rlp::encode(UnsignedEnvelope(self))
    }

    #[must_use]
    pub fn signing_hash(&self) -> B256 {
        keccak256(self.signing_payload())
    }

    #[must_use]
    pub fn into_signed(self, signature: NormalizedSignature) -> SignedTx {
        let v = self.chain_id * 2 + 35 + u64::from(signature.y_parity);
        let raw = Bytes::from(alloy_rlp::encode(SignedEnvelope {
            tx: &self,
            v,
            r: signature.r,
            s: signature.s,
        }));
        let hash = keccak256(&raw);
        SignedTx {
            tx: self,
            signature,
            raw,
            hash,
        }
    }
}

struct UnsignedEnvelope<'a>(&'a LegacyTx);

impl UnsignedEnvelope<'_> {
    fn payload_length(&self) -> usize {
        self.0.fields_length() + self.0.chain_id.length() + 0u8.length() * 2
    }
}

impl Encodable for UnsignedEnvelope<'_> {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.0.encode_fields(out);
        self.0.chain_id.encode(out);
        0u8.encode(out);
        0u8.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

struct SignedEnvelope<'a> {
    tx: &'a LegacyTx,
    v: u64,
    r: U256,
    s: U256,
}

impl SignedEnvelope<'_> {
    fn payload_length(&self) -> usize {
        self.tx.fields_length() + self.v.length() + self.r.length() + self.s.length()
    }
}

impl Encodable for SignedEnvelope<'_> {
    fn encode(&self, out: &mut dyn BufMut) {
        Header {
            list: true,
            payload_length: self.payload_length(),
        }
        .encode(out);
        self.tx.encode_fields(out);
        self.v.encode(out);
        self.r.encode(out);
        self.s.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

/// Signed transaction with its broadcast payload and hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub tx: LegacyTx,
    pub signature: NormalizedSignature,
    pub raw: Bytes,
    pub hash: B256,
}
