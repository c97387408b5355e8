mod common;

use std::time::Duration;

use futures::future::join_all;
use pretty_assertions::assert_eq;
use tabsync_core::api::{
    ConnectionKey, ErrorKind, InProcessRemote, ReadinessState, ServiceKind,
};

use common::{context, test_config, valid_connection};

#[tokio::test]
async fn concurrent_bootstraps_connect_once() {
    let remote = InProcessRemote::new();
    remote.set_connect_delay(Duration::from_millis(20));
    let ctx = context(&remote, None, test_config());

    let states = join_all((0..8).map(|_| ctx.bootstrap(valid_connection()))).await;

    assert_eq!(ctx.registry().bootstrap_attempts(), 1);
    for service in [ServiceKind::Auth, ServiceKind::Documents, ServiceKind::Blobs] {
        assert_eq!(remote.connect_attempts(service), 1);
    }
    let first = states[0].handles().expect("ready").clone();
    for state in &states {
        assert!(state.handles().expect("ready").same_connections(&first));
    }
}

#[tokio::test]
async fn missing_project_id_fails_without_connecting() {
    let remote = InProcessRemote::new();
    let ctx = context(&remote, None, test_config());

    let state = ctx
        .bootstrap(valid_connection().without(ConnectionKey::ProjectId))
        .await;

    let err = state.error().expect("failed").clone();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(err.detail(), vec!["projectId".to_string()]);
    assert!(state.handles().is_none());
    assert!(ctx.registry().handles().is_none());
    assert_eq!(remote.connect_attempts(ServiceKind::Documents), 0);
    assert_eq!(ctx.await_ready().await.unwrap_err(), err);
}

#[tokio::test]
async fn every_violation_is_reported_together() {
    let remote = InProcessRemote::new();
    let ctx = context(&remote, None, test_config());

    let state = ctx
        .bootstrap(
            valid_connection()
                .with(ConnectionKey::ApiKey, "YOUR_API_KEY")
                .with(ConnectionKey::AppId, "   ")
                .without(ConnectionKey::AuthDomain),
        )
        .await;

    let mut keys = state.error().expect("failed").detail();
    keys.sort();
    assert_eq!(keys, vec!["apiKey", "appId", "authDomain"]);
}

#[tokio::test]
async fn connect_failure_exposes_no_handles() {
    let remote = InProcessRemote::new();
    remote.fail_connect(ServiceKind::Blobs);
    let ctx = context(&remote, None, test_config());

    let state = ctx.bootstrap(valid_connection()).await;

    let err = state.error().expect("failed");
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(err.detail(), vec!["blobs".to_string()]);
    assert!(ctx.registry().handles().is_none());
}

#[tokio::test]
async fn waiters_see_the_same_outcome_and_later_configs_are_ignored() {
    let remote = InProcessRemote::new();
    remote.set_connect_delay(Duration::from_millis(10));
    let ctx = context(&remote, None, test_config());

    let (waited, first) = tokio::join!(ctx.await_ready(), ctx.bootstrap(valid_connection()));
    let waited = waited.expect("ready");
    assert!(waited.same_connections(first.handles().expect("ready")));

    let again = ctx
        .bootstrap(valid_connection().without(ConnectionKey::ProjectId))
        .await;
    assert!(matches!(again, ReadinessState::Ready(_)));
    assert_eq!(ctx.registry().bootstrap_attempts(), 1);
}
