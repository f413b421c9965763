//! Delegated execution pipeline: session grants, remote-custody identities
//! and transaction submission on their behalf.
//!
//! The base wallet never signs transactions here. It signs one challenge per
//! session; the resulting [`SessionGrant`] authorizes a remote signer to mint
//! or resolve a [`DelegatedIdentity`], and every transaction is then signed
//! by that identity through [`TransactionAssembler::sign_and_submit`].

pub mod abi;
mod ability;
mod assembler;
mod authorizer;
mod clock;
mod error;
mod grant;
mod identity;
mod nonce;
mod remote;
mod rpc;
mod session;
mod signature;
mod tx;
pub mod units;
mod wallet;

pub use ability::{Ability, Action, ResourceClass};
pub use assembler::{
    DelegatedSigner, HashSigner, LocalKeySigner, SubmitPolicy, TransactionAssembler, TxOutcome,
    TxRequest,
};
pub use authorizer::SessionAuthorizer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DelegationError;
pub use grant::{Challenge, SessionGrant};
pub use identity::{
    DelegatedIdentity, FeeAssetMint, FundingLedger, FundingPolicy, GasSponsor, IdentityProvisioner,
};
pub use nonce::{NonceManager, NonceSlot, Unsettled};
pub use remote::{
    AuthProof, InProcessCustody, ProvisionedKey, RemoteSignature, RemoteSigner, RemoteSignerError,
    SigningScope,
};
pub use rpc::{CallRequest, ChainRpc, HttpChainRpc, Log, RpcError, TxReceipt};
pub use session::{DelegatedSession, DelegationManager};
pub use signature::{normalize_signature, NormalizedSignature};
pub use tx::{LegacyTx, SignedTx};
pub use wallet::{
    address_from_public_key, address_from_verifying_key, eip191_hash, parse_private_key,
    recover_personal_signer, AutoApprove, BaseWallet, ChallengeApprover, DeclineAll, LocalWallet,
};

pub use alloy_primitives::{Address, Bytes, B256, U256};
