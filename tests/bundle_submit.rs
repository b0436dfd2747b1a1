//! Bundle fan-out and confirmation outcomes

mod common;

use common::{transfer_groups, MockLedger, MockRelay, RelayBehavior};
use launch_bundler::ledger::{Checkpoint, LedgerClient, SignatureState};
use launch_bundler::relay::RelayError;
use launch_bundler::tx_builder::{Bundle, BundleError, BundleSubmitter, MAX_BUNDLE_TRANSACTIONS};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const NY: &str = "https://ny.mainnet.block-engine.jito.wtf/api/v1/bundles";
const TOKYO: &str = "https://tokyo.mainnet.block-engine.jito.wtf/api/v1/bundles";

fn endpoints() -> Vec<String> {
    vec![NY.to_string(), TOKYO.to_string()]
}

async fn checkpoint(ledger: &MockLedger) -> Checkpoint {
    ledger.get_latest_checkpoint().await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_no_relay_accepts_skips_polling() {
    let ledger = Arc::new(MockLedger::new());
    let relay = Arc::new(
        MockRelay::new()
            .with(NY, RelayBehavior::Fail(RelayError::Transport("reset".to_string())))
            .with(TOKYO, RelayBehavior::Fail(RelayError::Transport("timeout".to_string()))),
    );
    let bundle = Bundle::new(transfer_groups(3)).unwrap();
    let checkpoint = checkpoint(&ledger).await;

    let err = BundleSubmitter::new(relay.clone(), ledger.clone())
        .submit(&bundle, &endpoints(), &checkpoint, Duration::from_secs(30))
        .await
        .unwrap_err();

    match &err {
        BundleError::NoRelayAccepted { errors } => assert_eq!(errors.len(), 2),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
    assert_eq!(ledger.status_polls.load(Ordering::SeqCst), 0);
    assert_eq!(relay.posts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_one_accept_is_enough() {
    let ledger = Arc::new(MockLedger::new());
    let relay = Arc::new(
        MockRelay::new()
            .with(NY, RelayBehavior::Fail(RelayError::Http { status: 503, body: String::new() }))
            .with(TOKYO, RelayBehavior::Accept),
    );
    let bundle = Bundle::new(transfer_groups(2)).unwrap();
    ledger.set_status(bundle.representative_signature(), SignatureState::Confirmed);
    let checkpoint = checkpoint(&ledger).await;

    let signature = BundleSubmitter::new(relay.clone(), ledger.clone())
        .submit(&bundle, &endpoints(), &checkpoint, Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(signature, bundle.representative_signature());
    assert!(relay.posts().iter().all(|(_, txs)| *txs == 2));
}

#[tokio::test(start_paused = true)]
async fn test_slow_relay_does_not_delay_confirmation() {
    let ledger = Arc::new(MockLedger::new());
    let relay = Arc::new(
        MockRelay::new()
            .with(NY, RelayBehavior::Accept)
            .with(TOKYO, RelayBehavior::AcceptAfter(Duration::from_secs(300))),
    );
    let bundle = Bundle::new(transfer_groups(1)).unwrap();
    ledger.set_status(bundle.representative_signature(), SignatureState::Confirmed);
    let checkpoint = checkpoint(&ledger).await;

    let start = tokio::time::Instant::now();
    BundleSubmitter::new(relay, ledger.clone())
        .submit(&bundle, &endpoints(), &checkpoint, Duration::from_secs(30))
        .await
        .unwrap();
    assert!(start.elapsed() < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_posts_are_cancelled_after_confirmation() {
    let ledger = Arc::new(MockLedger::new());
    let relay = Arc::new(MockRelay::new().with(NY, RelayBehavior::Accept).with(TOKYO, RelayBehavior::Hang));
    let bundle = Bundle::new(transfer_groups(2)).unwrap();
    ledger.set_status(bundle.representative_signature(), SignatureState::Confirmed);
    let checkpoint = checkpoint(&ledger).await;

    BundleSubmitter::new(relay.clone(), ledger.clone())
        .submit(&bundle, &endpoints(), &checkpoint, Duration::from_secs(30))
        .await
        .unwrap();

    // Let the runtime drop the aborted task
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert_eq!(relay.posts().len(), 2);
    assert_eq!(relay.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_wins_over_accepts() {
    let ledger = Arc::new(MockLedger::new());
    let relay = Arc::new(MockRelay::new().with(NY, RelayBehavior::Accept).with(TOKYO, RelayBehavior::Accept));
    let bundle = Bundle::new(transfer_groups(2)).unwrap();
    ledger.set_status(
        bundle.representative_signature(),
        SignatureState::Failed("custom program error: 0x1".to_string()),
    );
    let checkpoint = checkpoint(&ledger).await;

    let err = BundleSubmitter::new(relay, ledger.clone())
        .submit(&bundle, &endpoints(), &checkpoint, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert!(matches!(err, BundleError::BundleRejected { ref reason, .. } if reason.contains("0x1")));
    assert!(!err.is_retryable());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_ambiguous_not_success() {
    let ledger = Arc::new(MockLedger::new());
    let relay = Arc::new(MockRelay::new().with(NY, RelayBehavior::Accept));
    let bundle = Bundle::new(transfer_groups(2)).unwrap();
    let checkpoint = checkpoint(&ledger).await;

    let err = BundleSubmitter::new(relay, ledger.clone())
        .submit(&bundle, &endpoints(), &checkpoint, Duration::from_secs(10))
        .await
        .unwrap_err();

    assert!(matches!(err, BundleError::BundleTimeout { waited, .. } if waited == Duration::from_secs(10)));
    assert!(err.is_ambiguous());
    assert_eq!(err.signature(), Some(&bundle.representative_signature()));
}

#[tokio::test(start_paused = true)]
async fn test_expired_checkpoint_is_rejection() {
    let ledger = Arc::new(MockLedger::new());
    let relay = Arc::new(MockRelay::new().with(NY, RelayBehavior::Accept));
    let bundle = Bundle::new(transfer_groups(1)).unwrap();
    let checkpoint = checkpoint(&ledger).await;
    ledger.advance_block_height(151);

    let err = BundleSubmitter::new(relay, ledger.clone())
        .submit(&bundle, &endpoints(), &checkpoint, Duration::from_secs(60))
        .await
        .unwrap_err();

    assert!(matches!(err, BundleError::BundleRejected { ref reason, .. } if reason == "checkpoint expired"));
}

#[test]
fn test_bundle_size_bounds() {
    assert!(matches!(Bundle::new(vec![]), Err(BundleError::Empty)));
    assert!(Bundle::new(transfer_groups(MAX_BUNDLE_TRANSACTIONS)).is_ok());
    assert!(matches!(
        Bundle::new(transfer_groups(MAX_BUNDLE_TRANSACTIONS + 1)),
        Err(BundleError::TooManyTransactions { count: 6, max: 5 })
    ));
}

#[test]
fn test_encoding_is_base58_per_transaction() {
    let bundle = Bundle::new(transfer_groups(3)).unwrap();
    let encoded = bundle.encode().unwrap();
    assert_eq!(encoded.len(), 3);
    for (text, group) in encoded.iter().zip(bundle.groups()) {
        let bytes = bs58::decode(text).into_vec().unwrap();
        assert_eq!(bytes, bincode::serialize(&group.transaction).unwrap());
    }
}
