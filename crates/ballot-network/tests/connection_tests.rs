use std::sync::Arc;
use std::time::Duration;

use ballot_network::mock::MockWallet;
use ballot_network::*;
use ballot_protocol::*;

const MAINNET: ChainId = ChainId(1);

fn addr(n: u8) -> Address {
    Address::parse(&format!("0x{:040x}", n)).unwrap()
}

fn sepolia() -> ChainId {
    ChainId(SEPOLIA_CHAIN_ID)
}

fn manager(wallet: &Arc<MockWallet>, flag: SessionFlag) -> ConnectionManager {
    ConnectionManager::new(
        Some(wallet.clone()),
        ConnectionConfig {
            flag,
            ..ConnectionConfig::default()
        },
    )
}

#[tokio::test]
async fn test_connect_on_required_chain_needs_no_switch() {
    let wallet = Arc::new(MockWallet::new(vec![addr(1)], sepolia()));
    let mgr = manager(&wallet, SessionFlag::disabled());

    let outcome = mgr.connect().await.unwrap();
    let ConnectOutcome::Connected(session) = outcome else {
        panic!("expected a session");
    };
    assert_eq!(session.account, addr(1));
    assert_eq!(session.chain_id, sepolia());
    assert_eq!(wallet.calls().switch_chain, 0);
    assert!(mgr.on_required_chain());
}

#[tokio::test]
async fn test_wrong_chain_is_switched_exactly_once() {
    let wallet = Arc::new(MockWallet::new(vec![addr(1)], MAINNET).with_known_chain(sepolia()));
    let mgr = manager(&wallet, SessionFlag::disabled());

    let ConnectOutcome::Connected(session) = mgr.connect().await.unwrap() else {
        panic!("expected a session");
    };
    assert_eq!(session.chain_id, sepolia());
    let calls = wallet.calls();
    assert_eq!(calls.switch_chain, 1);
    assert_eq!(calls.add_chain, 0);
    assert_eq!(wallet.current_chain(), sepolia());
}

#[tokio::test]
async fn test_unknown_chain_is_added_then_switched_once_more() {
    let wallet = Arc::new(MockWallet::new(vec![addr(1)], MAINNET));
    let mgr = manager(&wallet, SessionFlag::disabled());

    mgr.connect().await.unwrap();
    let calls = wallet.calls();
    assert_eq!(calls.switch_chain, 2);
    assert_eq!(calls.add_chain, 1);
    assert!(mgr.on_required_chain());
}

#[tokio::test]
async fn test_rejected_switch_keeps_session() {
    let wallet = Arc::new(MockWallet::new(vec![addr(1)], MAINNET).with_switch_error(
        RawFailure::Provider {
            code: PROVIDER_USER_REJECTED,
            message: "User rejected the request.".into(),
        },
    ));
    let mgr = manager(&wallet, SessionFlag::disabled());

    let err = mgr.connect().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ChainSwitchRejected);
    assert!(err.retryable);
    assert_eq!(wallet.calls().switch_chain, 1);
    let session = mgr.session().unwrap();
    assert_eq!(session.chain_id, MAINNET);
    assert!(!mgr.on_required_chain());
}

#[tokio::test]
async fn test_rejected_add_stops_without_second_switch() {
    let wallet = Arc::new(MockWallet::new(vec![addr(1)], MAINNET).with_add_error(
        RawFailure::Provider {
            code: PROVIDER_USER_REJECTED,
            message: "User rejected the request.".into(),
        },
    ));
    let mgr = manager(&wallet, SessionFlag::disabled());

    let err = mgr.connect().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ChainSwitchRejected);
    let calls = wallet.calls();
    assert_eq!(calls.switch_chain, 1);
    assert_eq!(calls.add_chain, 1);
}

#[tokio::test]
async fn test_no_provider() {
    let mgr = ConnectionManager::new(None, ConnectionConfig::default());
    let err = mgr.connect().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoProviderAvailable);
    assert!(!err.retryable);
    assert!(mgr.listen().is_none());
}

#[tokio::test]
async fn test_user_rejects_account_request() {
    let wallet = Arc::new(MockWallet::new(vec![addr(1)], sepolia()).with_accounts_error(
        RawFailure::Provider {
            code: PROVIDER_USER_REJECTED,
            message: "User rejected the request.".into(),
        },
    ));
    let mgr = manager(&wallet, SessionFlag::disabled());
    let err = mgr.connect().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UserRejected);
    assert!(mgr.session().is_none());
}

#[tokio::test]
async fn test_empty_account_list_is_a_rejection() {
    let wallet = Arc::new(MockWallet::new(Vec::new(), sepolia()));
    let mgr = manager(&wallet, SessionFlag::disabled());
    let err = mgr.connect().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UserRejected);
}

#[tokio::test]
async fn test_concurrent_connects_coalesce() {
    let wallet = Arc::new(
        MockWallet::new(vec![addr(1)], sepolia()).with_accounts_delay(Duration::from_millis(50)),
    );
    let mgr = manager(&wallet, SessionFlag::disabled());

    let (first, second) = tokio::join!(mgr.connect(), mgr.connect());
    assert!(matches!(first.unwrap(), ConnectOutcome::Connected(_)));
    assert_eq!(second.unwrap(), ConnectOutcome::AlreadyPending);
    assert_eq!(wallet.calls().request_accounts, 1);
    assert!(!mgr.is_connecting());
}

fn impatient_manager(wallet: &Arc<MockWallet>) -> ConnectionManager {
    ConnectionManager::new(
        Some(wallet.clone()),
        ConnectionConfig {
            request_timeout: Duration::from_millis(50),
            ..ConnectionConfig::default()
        },
    )
}

#[tokio::test]
async fn test_unanswered_account_prompt_times_out() {
    let wallet = Arc::new(
        MockWallet::new(vec![addr(1)], sepolia()).with_accounts_delay(Duration::from_secs(3600)),
    );
    let mgr = impatient_manager(&wallet);

    let err = tokio::time::timeout(Duration::from_secs(2), mgr.connect())
        .await
        .expect("connect must be bounded")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ChainOrNetworkFault);
    assert!(err.retryable);
    assert!(mgr.session().is_none());
    assert!(!mgr.is_connecting());

    // The next attempt reaches the wallet again instead of being swallowed.
    let again = tokio::time::timeout(Duration::from_secs(2), mgr.connect())
        .await
        .expect("connect must be bounded");
    assert!(again.is_err());
    assert_eq!(wallet.calls().request_accounts, 2);
}

#[tokio::test]
async fn test_unanswered_switch_prompt_is_a_network_fault() {
    let wallet = Arc::new(
        MockWallet::new(vec![addr(1)], MAINNET)
            .with_known_chain(sepolia())
            .with_switch_delay(Duration::from_secs(3600)),
    );
    let mgr = impatient_manager(&wallet);

    let err = tokio::time::timeout(Duration::from_secs(2), mgr.connect())
        .await
        .expect("connect must be bounded")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ChainOrNetworkFault);
    assert_eq!(wallet.calls().switch_chain, 1);
    assert_eq!(mgr.session().unwrap().chain_id, MAINNET);
    assert!(!mgr.is_connecting());
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let flag = SessionFlag::at(dir.path().join("connected"));
    let wallet = Arc::new(MockWallet::new(vec![addr(1)], sepolia()));
    let mgr = manager(&wallet, flag.clone());

    mgr.connect().await.unwrap();
    assert!(flag.is_set());

    assert!(mgr.disconnect());
    assert!(!mgr.disconnect());
    assert!(mgr.session().is_none());
    assert!(!flag.is_set());
}

#[tokio::test]
async fn test_resume_uses_authorized_accounts_silently() {
    let dir = tempfile::tempdir().unwrap();
    let flag = SessionFlag::at(dir.path().join("connected"));
    flag.set(true).unwrap();
    let wallet = Arc::new(MockWallet::new(vec![addr(4)], sepolia()).with_authorized(true));
    let mgr = manager(&wallet, flag);

    let session = mgr.resume().await.unwrap().unwrap();
    assert_eq!(session.account, addr(4));
    let calls = wallet.calls();
    assert_eq!(calls.request_accounts, 0);
    assert_eq!(calls.authorized_accounts, 1);
}

#[tokio::test]
async fn test_resume_without_flag_does_nothing() {
    let wallet = Arc::new(MockWallet::new(vec![addr(4)], sepolia()).with_authorized(true));
    let mgr = manager(&wallet, SessionFlag::disabled());
    assert!(mgr.resume().await.unwrap().is_none());
    assert_eq!(wallet.calls().authorized_accounts, 0);
}

#[tokio::test]
async fn test_resume_clears_stale_flag() {
    let dir = tempfile::tempdir().unwrap();
    let flag = SessionFlag::at(dir.path().join("connected"));
    flag.set(true).unwrap();
    let wallet = Arc::new(MockWallet::new(vec![addr(4)], sepolia()));
    let mgr = manager(&wallet, flag.clone());

    assert!(mgr.resume().await.unwrap().is_none());
    assert!(!flag.is_set());
}

#[tokio::test]
async fn test_notifications_update_session() {
    let wallet = Arc::new(MockWallet::new(vec![addr(1)], sepolia()));
    let mgr = manager(&wallet, SessionFlag::disabled());
    mgr.connect().await.unwrap();

    let change = mgr.handle_notification(WalletNotification::AccountsChanged(vec![addr(2)]));
    let SessionChange::AccountSwitched(session) = change else {
        panic!("expected account switch");
    };
    assert_eq!(session.account, addr(2));

    assert_eq!(
        mgr.handle_notification(WalletNotification::ChainChanged(sepolia())),
        SessionChange::Unchanged
    );
    assert_eq!(
        mgr.handle_notification(WalletNotification::ChainChanged(MAINNET)),
        SessionChange::ChainChanged {
            from: sepolia(),
            to: MAINNET
        }
    );
    assert!(mgr.session().is_none());
}

#[tokio::test]
async fn test_locked_wallet_ends_session() {
    let wallet = Arc::new(MockWallet::new(vec![addr(1)], sepolia()));
    let mgr = manager(&wallet, SessionFlag::disabled());
    mgr.connect().await.unwrap();
    let mut rx = mgr.listen().unwrap();

    wallet.change_accounts(Vec::new());
    let notification = rx.recv().await.unwrap();
    assert_eq!(mgr.handle_notification(notification), SessionChange::Ended);
    assert!(mgr.session().is_none());

    assert!(mgr.stop_listening());
    assert_eq!(wallet.listener_count(), 0);
}
