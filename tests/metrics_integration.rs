//! Metrics integration tests
//!
//! The prometheus registry is process-wide, so gauge assertions live in
//! their own test binary with a single test driving them.

mod common;

use std::time::Duration;

use tokio::sync::oneshot;
use tokio_test::{assert_err, assert_ok};

use ara_mail_dispatch::context::CallContext;
use ara_mail_dispatch::metrics::DB_ACTIVE_OPERATIONS;

use common::{open_manager, FakeState};

#[tokio::test]
async fn test_active_operations_gauge_follows_counter() {
    let state = FakeState::new();
    let manager = open_manager(&state).await;
    let baseline = DB_ACTIVE_OPERATIONS.get();

    // Committed transaction
    let (entered_tx, entered_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let worker = manager.clone();
    let running = tokio::spawn(async move {
        let ctx = CallContext::new();
        worker
            .with_transaction(&ctx, move |_tx| {
                Box::pin(async move {
                    let _ = entered_tx.send(());
                    let _ = release_rx.await;
                    Ok(())
                })
            })
            .await
    });

    entered_rx.await.unwrap();
    assert_eq!(DB_ACTIVE_OPERATIONS.get(), baseline + 1);
    assert_eq!(manager.active_operations(), 1);

    release_tx.send(()).unwrap();
    assert_ok!(running.await.unwrap());
    assert_eq!(DB_ACTIVE_OPERATIONS.get(), baseline);
    assert_eq!(manager.active_operations(), 0);

    // Transaction ended by its deadline
    let ctx = CallContext::new().with_timeout(Duration::from_millis(30));
    assert_err!(
        manager
            .with_transaction(&ctx, |_tx| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(())
                })
            })
            .await
    );
    assert_eq!(DB_ACTIVE_OPERATIONS.get(), baseline);

    // Raw pairs, including an unbalanced end
    manager.begin_operation();
    manager.begin_operation();
    assert_eq!(DB_ACTIVE_OPERATIONS.get(), baseline + 2);
    manager.end_operation();
    manager.end_operation();
    manager.end_operation();
    assert_eq!(DB_ACTIVE_OPERATIONS.get(), baseline);
    assert_eq!(manager.active_operations(), 0);

    manager.close().await;
}
