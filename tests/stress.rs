//! Stress tests for pathological cases
//!
//! These tests verify we don't have accidentally quadratic behavior.

use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use wardbus::auth::{Identity, RevocationLedger, Role};
use wardbus::clock::ManualClock;
use wardbus::server::{ClientConnection, ConnectionRegistry, Event, EventRouter, OutboundMessage};
use wardbus::storage::MemoryRevocationStore;
use wardbus::Scope;

fn join(
    registry: &ConnectionRegistry,
    subject: String,
    role: Role,
    group: Option<String>,
    depth: usize,
) -> mpsc::Receiver<OutboundMessage> {
    let (tx, rx) = mpsc::channel(depth);
    let identity = Identity::new(subject, role, group).unwrap();
    registry.join(Arc::new(ClientConnection::new(identity, tx))).unwrap();
    rx
}

/// Delivering to one identity should not depend on how many others are online
#[test]
fn test_private_delivery_not_quadratic() {
    let populations = [100, 1_000, 10_000];
    let mut times = vec![];

    for &population in &populations {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = EventRouter::new(registry.clone());

        let _receivers: Vec<_> = (0..population)
            .map(|i| {
                join(
                    &registry,
                    format!("u{}", i),
                    Role::Reporter,
                    Some(format!("g{}", i % 50)),
                    4,
                )
            })
            .collect();

        let iterations = 10_000;
        let start = Instant::now();

        for i in 0..iterations {
            let target = Scope::identity(format!("u{}", i % population).as_str()).unwrap();
            let event = Event::new("issue_status_update", json!({}), [target]).unwrap();
            router.deliver(&event);
        }

        let elapsed = start.elapsed();
        let per_op_ns = elapsed.as_nanos() / iterations as u128;
        times.push((population, per_op_ns));

        println!(
            "Connections: {:>6}, Deliveries: {}, Time: {:?}, Per delivery: {}ns",
            population, iterations, elapsed, per_op_ns
        );
    }

    let (small_count, small_time) = times[0];
    let (large_count, large_time) = times[times.len() - 1];

    let count_ratio = large_count as f64 / small_count as f64;
    let time_ratio = large_time as f64 / small_time.max(1) as f64;

    println!(
        "\nConnection ratio: {:.0}x, Time ratio: {:.1}x",
        count_ratio, time_ratio
    );

    // Lookup is by scope, so cost should stay far below linear growth
    assert!(
        time_ratio < count_ratio,
        "Private delivery degraded with total connections: {:.1}x for {:.0}x connections",
        time_ratio,
        count_ratio
    );
}

/// Events targeting many overlapping scopes still reach each connection once
#[test]
fn test_overlapping_scopes_at_scale() {
    let registry = Arc::new(ConnectionRegistry::new());
    let router = EventRouter::new(registry.clone());

    let mut receivers = vec![];
    for i in 0..100 {
        receivers.push(join(
            &registry,
            format!("a{}", i),
            Role::Administrator,
            None,
            4,
        ));
    }

    // Every administrator is addressed privately and through the role scope
    let mut scopes: Vec<Scope> = (0..100)
        .map(|i| Scope::identity(format!("a{}", i).as_str()).unwrap())
        .collect();
    scopes.push(Scope::administrators());

    let event = Event::new("issue_created", json!({}), scopes).unwrap();
    let start = Instant::now();
    assert_eq!(router.deliver(&event), 100);
    println!("Deduplicated fan-out over 101 scopes: {:?}", start.elapsed());

    for mut rx in receivers {
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}

/// Ledger lookups and sweeps with a large number of live markers
#[test]
fn test_ledger_with_many_markers() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemoryRevocationStore::new());
        let ledger = RevocationLedger::new(store, clock.clone());

        let count = 50_000;
        let start = Instant::now();
        for i in 0..count {
            // Half expire at 2_000, half at 5_000
            let expires_at = if i % 2 == 0 { 2_000 } else { 5_000 };
            ledger.revoke(&format!("sess-token-{}.sig", i), expires_at).await.unwrap();
        }
        println!("Revoked {} tokens in {:?}", count, start.elapsed());

        let start = Instant::now();
        for i in 0..10_000 {
            assert!(ledger.is_revoked(&format!("sess-token-{}.sig", i)).await.unwrap());
        }
        assert!(!ledger.is_revoked("sess-never-revoked.sig").await.unwrap());
        println!("10000 lookups in {:?}", start.elapsed());

        clock.set(2_000);
        assert_eq!(ledger.purge_expired().await.unwrap(), count / 2);
        assert_eq!(ledger.len().await.unwrap(), count / 2);

        clock.set(5_000);
        assert_eq!(ledger.purge_expired().await.unwrap(), count / 2);
        assert_eq!(ledger.len().await.unwrap(), 0);
    });
}

/// Simulate realistic workload: many reporters, handlers per group, a few admins
#[test]
fn test_realistic_workload() {
    let registry = Arc::new(ConnectionRegistry::new());
    let router = EventRouter::new(registry.clone());

    let mut receivers = vec![];

    // 1000 reporters spread over 100 groups
    for i in 0..1000 {
        receivers.push(join(
            &registry,
            format!("u{}", i),
            Role::Reporter,
            Some(format!("g{}", i % 100)),
            1000,
        ));
    }

    // 5 handlers per group
    for group in 0..100 {
        for h in 0..5 {
            receivers.push(join(
                &registry,
                format!("h{}-{}", group, h),
                Role::Handler,
                Some(format!("g{}", group)),
                1000,
            ));
        }
    }

    // 10 administrators
    for i in 0..10 {
        receivers.push(join(&registry, format!("a{}", i), Role::Administrator, None, 1000));
    }

    println!("Total connections: {}", registry.count());
    assert_eq!(registry.count(), 1510);
    // 1510 identity scopes, 100 groups, one administrator role
    assert_eq!(registry.scope_count(), 1510 + 100 + 1);

    let iterations = 1000;
    let mut delivered = 0;
    let start = Instant::now();

    for i in 0..iterations {
        // Status update to the reporter (1 recipient)
        let reporter = Scope::identity(format!("u{}", i % 1000).as_str()).unwrap();
        let event = Event::new("issue_status_update", json!({ "seq": i }), [reporter]).unwrap();
        delivered += router.deliver(&event);

        // New issue to the group and administrators (10 + 5 + 10 recipients)
        let group = Scope::group(format!("g{}", i % 100).as_str()).unwrap();
        let event = Event::new(
            "issue_created",
            json!({ "seq": i }),
            [group, Scope::administrators()],
        )
        .unwrap();
        delivered += router.deliver(&event);
    }

    let elapsed = start.elapsed();
    println!(
        "Workload: {} iterations, Time: {:?}, Per iteration: {:.2}µs",
        iterations,
        elapsed,
        elapsed.as_micros() as f64 / iterations as f64
    );

    assert_eq!(delivered, iterations * (1 + 25));
}
