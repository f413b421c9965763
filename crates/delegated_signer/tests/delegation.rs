mod support;

use std::sync::Arc;

use delegated_signer::{
    parse_private_key, recover_personal_signer, Ability, Address, BaseWallet, Bytes,
    ChallengeApprover, DeclineAll, DelegatedSigner, DelegationError, DelegationManager,
    FeeAssetMint, FundingLedger, FundingPolicy, GasSponsor, IdentityProvisioner,
    InProcessCustody, LocalKeySigner, LocalWallet, ManualClock, NonceManager, RemoteSigner,
    RpcError, SessionAuthorizer, SigningScope, TransactionAssembler, TxRequest, U256,
};
use pretty_assertions::assert_eq;
use time::{Duration, OffsetDateTime};

use support::{fast_policy, CountingApprover, FakeChain, CHAIN_ID, SPONSOR_KEY, WALLET_KEY};

const SCOPES: [SigningScope; 2] = [SigningScope::SignAnything, SigningScope::PersonalSign];

struct Harness {
    chain: Arc<FakeChain>,
    clock: Arc<ManualClock>,
    custody: Arc<InProcessCustody>,
    assembler: Arc<TransactionAssembler>,
    ledger: Arc<FundingLedger>,
}

impl Harness {
    fn new() -> Self {
        let chain = FakeChain::new();
        let clock = Arc::new(ManualClock::new(OffsetDateTime::now_utc()));
        Self {
            custody: Arc::new(InProcessCustody::new(clock.clone())),
            assembler: Arc::new(TransactionAssembler::new(
                chain.clone(),
                Arc::new(NonceManager::new()),
                CHAIN_ID,
                fast_policy(),
            )),
            ledger: Arc::new(FundingLedger::new()),
            chain,
            clock,
        }
    }

    fn authorizer(&self, approver: Arc<dyn ChallengeApprover>) -> SessionAuthorizer {
        let wallet = LocalWallet::new(
            parse_private_key(WALLET_KEY).expect("wallet key"),
            CHAIN_ID,
            self.chain.clone(),
            approver,
        );
        SessionAuthorizer::new(Arc::new(wallet), self.chain.clone(), self.clock.clone())
    }

    fn provisioner(&self, with_sponsor: bool) -> IdentityProvisioner {
        let provisioner = IdentityProvisioner::new(
            self.custody.clone(),
            self.assembler.clone(),
            self.clock.clone(),
            self.ledger.clone(),
        );
        if with_sponsor {
            let sponsor = LocalKeySigner::new(parse_private_key(SPONSOR_KEY).expect("sponsor key"));
            provisioner.with_sponsor(GasSponsor::new(Arc::new(sponsor)))
        } else {
            provisioner
        }
    }

    fn manager(
        &self,
        approver: Arc<dyn ChallengeApprover>,
        provisioner: IdentityProvisioner,
        ttl: Duration,
    ) -> DelegationManager {
        DelegationManager::new(
            self.authorizer(approver),
            provisioner,
            self.assembler.clone(),
            self.clock.clone(),
            ttl,
        )
    }
}

fn call() -> TxRequest {
    TxRequest::call(Address::repeat_byte(0x99), Bytes::from(vec![0x01, 0x02, 0x03, 0x04]))
}

#[tokio::test]
async fn first_write_authorizes_provisions_and_funds_once() {
    let harness = Harness::new();
    let approver = Arc::new(CountingApprover::default());
    let manager = harness.manager(approver.clone(), harness.provisioner(true), Duration::hours(1));

    let first = manager.execute(call()).await.expect("first write");
    assert_eq!(approver.count(), 1);
    // sponsor transfer, then the call itself
    assert_eq!(harness.chain.sent().len(), 2);
    assert_ne!(first.from, manager.wallet_address());
    assert_eq!(
        manager.current_identity().await.map(|identity| identity.address),
        Some(first.from)
    );

    let second = manager.execute(call()).await.expect("second write");
    assert_eq!(approver.count(), 1, "cached grant is reused");
    assert_eq!(harness.chain.sent().len(), 3, "identity is not funded twice");
    assert_eq!(second.from, first.from);
    assert_eq!(second.nonce, first.nonce + 1);
}

#[tokio::test]
async fn grant_message_recovers_to_the_base_wallet() {
    let harness = Harness::new();
    let authorizer = harness.authorizer(Arc::new(CountingApprover::default()));

    let grant = authorizer
        .acquire_grant(&[Ability::SIGN_TRANSACTION], Duration::minutes(30))
        .await
        .expect("grant");

    assert_eq!(grant.wallet, authorizer.wallet().address());
    assert_eq!(
        recover_personal_signer(&grant.message, &grant.signature).expect("recover"),
        grant.wallet
    );
    assert!(grant.message.contains(&format!("Nonce: {}", delegated_signer::B256::repeat_byte(0x42))));
    assert!(grant.covers(Ability::SIGN_TRANSACTION));
    assert!(!grant.covers(Ability::MINT_IDENTITY));
}

#[tokio::test]
async fn expired_grant_blocks_signing_until_reauthorized() {
    let harness = Harness::new();
    let approver = Arc::new(CountingApprover::default());
    let manager = harness.manager(approver.clone(), harness.provisioner(true), Duration::minutes(10));

    let session = manager.session().await.expect("session");
    let sent_before = harness.chain.sent().len();
    harness.clock.advance(Duration::minutes(11));

    let stale = DelegatedSigner::new(
        session.identity.clone(),
        session.grant.clone(),
        harness.custody.clone(),
        harness.clock.clone(),
    );
    let error = harness
        .assembler
        .sign_and_submit(&stale, call())
        .await
        .expect_err("grant expired");
    assert!(matches!(error, DelegationError::AuthorizationExpired { .. }), "{error}");
    assert_eq!(harness.chain.sent().len(), sent_before, "nothing broadcast");

    let outcome = manager.execute(call()).await.expect("fresh session");
    assert_eq!(approver.count(), 2);
    assert_eq!(outcome.from, session.identity.address);
}

#[tokio::test]
async fn remote_signer_rejects_proofs_after_expiry() {
    let harness = Harness::new();
    let grant = harness
        .authorizer(Arc::new(CountingApprover::default()))
        .acquire_grant(&[Ability::MINT_IDENTITY], Duration::minutes(5))
        .await
        .expect("grant");

    harness.clock.advance(Duration::minutes(6));
    let error = harness
        .custody
        .provision(&grant.auth_proof(), &SCOPES)
        .await
        .expect_err("expired proof");
    assert_eq!(DelegationError::from(error).to_string(), "authorization denied: auth proof has expired");
}

#[tokio::test]
async fn declined_challenge_is_denied_without_side_effects() {
    let harness = Harness::new();
    let manager = harness.manager(Arc::new(DeclineAll), harness.provisioner(true), Duration::hours(1));

    let error = manager.execute(call()).await.expect_err("declined");

    assert!(error.to_string().starts_with("authorization denied"), "{error}");
    assert!(harness.chain.sent().is_empty());
    assert_eq!(manager.current_identity().await, None);
}

#[tokio::test]
async fn unreachable_chain_makes_authorization_unavailable() {
    let harness = Harness::new();
    harness
        .chain
        .set_block_hash_error(RpcError::Transport("connection refused".to_string()));
    let manager = harness.manager(
        Arc::new(CountingApprover::default()),
        harness.provisioner(true),
        Duration::hours(1),
    );

    let error = manager.execute(call()).await.expect_err("no nonce source");

    assert!(matches!(error, DelegationError::AuthorizationUnavailable { .. }), "{error}");
    assert!(error.is_retryable());
}

#[tokio::test]
async fn grant_without_mint_ability_cannot_provision() {
    let harness = Harness::new();
    let grant = Arc::new(
        harness
            .authorizer(Arc::new(CountingApprover::default()))
            .acquire_grant(&[Ability::SIGN_TRANSACTION], Duration::hours(1))
            .await
            .expect("grant"),
    );

    let error = harness
        .provisioner(true)
        .provision(&grant, &SCOPES)
        .await
        .expect_err("mint not granted");

    assert!(matches!(error, DelegationError::AuthorizationDenied { .. }), "{error}");
    assert!(harness.chain.sent().is_empty());
}

#[tokio::test]
async fn unfunded_identity_without_sponsor_fails_funding() {
    let harness = Harness::new();
    let manager = harness.manager(
        Arc::new(CountingApprover::default()),
        harness.provisioner(false),
        Duration::hours(1),
    );

    let error = manager.execute(call()).await.expect_err("no gas");

    assert!(matches!(error, DelegationError::FundingFailed { .. }), "{error}");
    assert!(harness.chain.sent().is_empty());
}

#[tokio::test]
async fn identity_with_gas_needs_no_sponsor() {
    let harness = Harness::new();
    let authorizer = harness.authorizer(Arc::new(CountingApprover::default()));
    let grant = Arc::new(
        authorizer
            .acquire_grant(&[Ability::MINT_IDENTITY, Ability::SIGN_TRANSACTION], Duration::hours(1))
            .await
            .expect("grant"),
    );
    let key = harness
        .custody
        .provision(&grant.auth_proof(), &SCOPES)
        .await
        .expect("custody key");
    let address = delegated_signer::address_from_public_key(&key.public_key).expect("address");
    harness
        .chain
        .set_balance(address, U256::from(10_u64).pow(U256::from(18)));

    let identity = harness
        .provisioner(false)
        .provision(&grant, &SCOPES)
        .await
        .expect("already funded");

    assert_eq!(identity.address, address);
    assert_eq!(identity.identity_id, key.identity_id);
    assert!(harness.chain.sent().is_empty());
    assert!(harness.ledger.is_funded(address).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_provisioning_sponsors_once() {
    let harness = Harness::new();
    let grant = Arc::new(
        harness
            .authorizer(Arc::new(CountingApprover::default()))
            .acquire_grant(&[Ability::MINT_IDENTITY, Ability::SIGN_TRANSACTION], Duration::hours(1))
            .await
            .expect("grant"),
    );
    let provisioner = harness.provisioner(true);

    let (left, right) = tokio::join!(
        provisioner.provision(&grant, &SCOPES),
        provisioner.provision(&grant, &SCOPES)
    );

    let left = left.expect("left");
    let right = right.expect("right");
    assert_eq!(left.address, right.address);
    assert_eq!(harness.chain.sent().len(), 1);
}

#[tokio::test]
async fn fee_asset_is_minted_by_the_identity_once() {
    let harness = Harness::new();
    let grant = Arc::new(
        harness
            .authorizer(Arc::new(CountingApprover::default()))
            .acquire_grant(&[Ability::MINT_IDENTITY, Ability::SIGN_TRANSACTION], Duration::hours(1))
            .await
            .expect("grant"),
    );
    let provisioner = harness.provisioner(true).with_funding_policy(FundingPolicy {
        fee_asset: Some(FeeAssetMint {
            token: Address::repeat_byte(0x33),
            amount: U256::from(1_000_000_000_u64),
        }),
        ..FundingPolicy::default()
    });

    provisioner.provision(&grant, &SCOPES).await.expect("first");
    // sponsor transfer, then the mint signed by the identity
    assert_eq!(harness.chain.sent().len(), 2);

    provisioner.provision(&grant, &SCOPES).await.expect("second");
    assert_eq!(harness.chain.sent().len(), 2);
}

#[tokio::test]
async fn unreadable_fee_asset_balance_fails_funding_without_minting() {
    let harness = Harness::new();
    let grant = Arc::new(
        harness
            .authorizer(Arc::new(CountingApprover::default()))
            .acquire_grant(&[Ability::MINT_IDENTITY, Ability::SIGN_TRANSACTION], Duration::hours(1))
            .await
            .expect("grant"),
    );
    harness.chain.set_call_result(
        "balanceOf(address)",
        Err(RpcError::Transport("connection reset".to_string())),
    );
    let provisioner = harness.provisioner(true).with_funding_policy(FundingPolicy {
        fee_asset: Some(FeeAssetMint {
            token: Address::repeat_byte(0x33),
            amount: U256::from(1_000_000_000_u64),
        }),
        ..FundingPolicy::default()
    });

    let error = provisioner
        .provision(&grant, &SCOPES)
        .await
        .expect_err("balance read failed");
    assert!(matches!(error, DelegationError::FundingFailed { .. }), "{error}");
    // only the sponsor transfer went out
    assert_eq!(harness.chain.sent().len(), 1);

    harness.chain.set_call_result("balanceOf(address)", Ok(Bytes::from(vec![0u8; 32])));
    provisioner.provision(&grant, &SCOPES).await.expect("retry mints");
    assert_eq!(harness.chain.sent().len(), 2);
}
