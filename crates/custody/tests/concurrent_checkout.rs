//! Concurrency tests for the custody state machine.
//!
//! Many tasks race to check out the same key with valid codes. The
//! compare-and-set on the asset record must let exactly one through and turn
//! every other racer into a clean business refusal.
#![allow(clippy::expect_used, clippy::panic)]

mod common;

use std::collections::HashSet;

use common::{Fixture, student};
use keyward_custody::{Actor, AssetStatus, CustodyAction, ErrorKind, Role};
use keyward_storage::UserId;
use tokio::task::JoinSet;

const RACERS: i64 = 16;

fn racer(n: i64) -> Actor {
    Actor::new(UserId(100 + n), &format!("Racer {n}"), Role::Student).expect("actor")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checkouts_have_exactly_one_winner() {
    let fx = Fixture::new();
    let key = fx.asset("Contested", "Block A").await;
    let code = fx.code("Block A").await;

    let mut tasks = JoinSet::new();
    for n in 0..RACERS {
        let service = std::sync::Arc::clone(&fx.service);
        let code = code.clone();
        let id = key.id;
        tasks.spawn(async move { (n, service.checkout(id, &code, &racer(n)).await) });
    }

    let mut winners = Vec::new();
    let mut refusals = 0;
    while let Some(joined) = tasks.join_next().await {
        let (n, result) = joined.expect("task panicked");
        match result {
            Ok(_) => winners.push(n),
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::AlreadyCheckedOut, "racer {n}: {err}");
                refusals += 1;
            },
        }
    }

    assert_eq!(winners.len(), 1, "exactly one checkout may succeed");
    assert_eq!(refusals, RACERS - 1);

    let stored = fx.service.get_asset(key.id).await.expect("get");
    assert_eq!(stored.status(), AssetStatus::CheckedOut);
    assert_eq!(stored.borrower(), Some(&racer(winners[0])));

    let ledger = fx.service.ledger(key.id).await.expect("ledger");
    assert_eq!(ledger.len(), 1, "exactly one ledger entry");
    assert_eq!(ledger[0].borrower, racer(winners[0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checkins_have_exactly_one_winner() {
    let fx = Fixture::new();
    let key = fx.asset("Contested", "Block C").await;
    let code = fx.code("Block C").await;
    fx.service.checkout(key.id, &code, &student()).await.expect("checkout");

    let mut tasks = JoinSet::new();
    for n in 0..RACERS {
        let service = std::sync::Arc::clone(&fx.service);
        let code = code.clone();
        let id = key.id;
        tasks.spawn(async move { service.checkin(id, &code, &racer(n)).await });
    }

    let mut successes = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.expect("task panicked") {
            Ok(_) => successes += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::NotCheckedOut, "{err}"),
        }
    }
    assert_eq!(successes, 1);

    let ledger = fx.service.ledger(key.id).await.expect("ledger");
    let actions: Vec<CustodyAction> = ledger.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![CustodyAction::CheckIn, CustodyAction::CheckOut]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_keys_do_not_interfere() {
    let fx = Fixture::new();
    let code = fx.code("Block B").await;
    let mut keys = Vec::new();
    for n in 0..RACERS {
        keys.push(fx.asset(&format!("Locker {n}"), "Block B").await);
    }

    let mut tasks = JoinSet::new();
    for (n, key) in keys.iter().enumerate() {
        let service = std::sync::Arc::clone(&fx.service);
        let code = code.clone();
        let id = key.id;
        let actor = racer(n as i64);
        tasks.spawn(async move { service.checkout(id, &code, &actor).await });
    }

    let mut checked_out = HashSet::new();
    while let Some(joined) = tasks.join_next().await {
        let asset = joined.expect("task panicked").expect("every distinct key checks out");
        checked_out.insert(asset.id);
    }
    assert_eq!(checked_out.len(), keys.len());

    for key in &keys {
        assert_eq!(fx.service.ledger(key.id).await.expect("ledger").len(), 1);
    }
}
