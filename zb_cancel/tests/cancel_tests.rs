use zb_cancel::{CancelReason, CancelSource};

#[test]
fn first_reason_wins() {
    let source = CancelSource::new();
    let token = source.token();

    source.cancel(CancelReason::TaskFailed(2));
    source.cancel(CancelReason::Interrupted);

    assert!(token.is_cancelled());
    match token.reason() {
        Some(CancelReason::TaskFailed(code)) => assert_eq!(code, 2),
        other => panic!("expected first reason, got {other:?}"),
    }
}

#[test]
fn token_starts_clear() {
    let source = CancelSource::new();
    let token = source.token();
    assert!(!token.is_cancelled());
    assert!(token.reason().is_none());
}

#[tokio::test]
async fn cancelled_wakes_waiters() {
    let source = CancelSource::new();
    let token = source.token();

    let waiter = tokio::spawn(async move {
        token.cancelled().await;
        token.reason().map(|r| r.exit_code())
    });

    source.cancel(CancelReason::TaskFailed(1));
    assert_eq!(waiter.await.unwrap(), Some(1));
}
