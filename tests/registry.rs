use ci_build_watcher::{BuildId, ConnectionId, SubscriptionRegistry};
use std::collections::HashSet;
use std::thread;

fn ids(list: &[&str]) -> Vec<BuildId> {
    list.iter().map(|s| BuildId::from(*s)).collect()
}

/// Checks the cross-index guarantees that must hold between operations: the
/// reverse index is the exact inverse of the forward index, and the pending
/// set is exactly the set of builds with at least one subscriber.
fn assert_consistent(registry: &SubscriptionRegistry) {
    let mut watched: HashSet<BuildId> = HashSet::new();
    for conn in registry.connections() {
        for build in registry.builds_for(&conn) {
            assert!(
                registry.subscribers_of(&build).contains(&conn),
                "reverse index missing {build} -> {conn}"
            );
            watched.insert(build);
        }
    }
    let pending: HashSet<BuildId> = registry.pending_builds().into_iter().collect();
    assert_eq!(pending, watched, "pending set out of sync with subscriptions");
    for build in &pending {
        for conn in registry.subscribers_of(build) {
            assert!(
                registry.builds_for(&conn).contains(build),
                "forward index missing {conn} -> {build}"
            );
        }
    }
}

#[test]
fn replace_registers_builds_both_ways() {
    let registry = SubscriptionRegistry::new();
    let conn = ConnectionId::from("c1");
    registry.replace_subscriptions(&conn, ids(&["b1", "b2"]));

    assert!(registry.is_subscribed(&conn, &BuildId::from("b1")));
    assert_eq!(registry.subscribers_of(&BuildId::from("b2")), vec![conn.clone()]);
    assert_eq!(registry.pending_builds().len(), 2);
    assert_consistent(&registry);
}

#[test]
fn replace_discards_the_previous_set() {
    let registry = SubscriptionRegistry::new();
    let conn = ConnectionId::from("c1");
    registry.replace_subscriptions(&conn, ids(&["b1", "b2"]));
    registry.replace_subscriptions(&conn, ids(&["b3"]));

    let pending: HashSet<BuildId> = registry.pending_builds().into_iter().collect();
    assert_eq!(pending, ids(&["b3"]).into_iter().collect());
    assert!(registry.subscribers_of(&BuildId::from("b1")).is_empty());
    assert_consistent(&registry);
}

#[test]
fn merge_is_idempotent() {
    let registry = SubscriptionRegistry::new();
    let conn = ConnectionId::from("c1");
    registry.merge_subscriptions(&conn, ids(&["b1", "b2"]));
    registry.merge_subscriptions(&conn, ids(&["b1", "b2"]));

    assert_eq!(registry.builds_for(&conn).len(), 2);
    assert_eq!(registry.pending_builds().len(), 2);
    assert_eq!(registry.subscribers_of(&BuildId::from("b1")), vec![conn.clone()]);
    assert_consistent(&registry);
}

#[test]
fn merge_keeps_existing_subscriptions() {
    let registry = SubscriptionRegistry::new();
    let conn = ConnectionId::from("c1");
    registry.replace_subscriptions(&conn, ids(&["b1"]));
    registry.merge_subscriptions(&conn, ids(&["b2"]));

    assert!(registry.is_subscribed(&conn, &BuildId::from("b1")));
    assert!(registry.is_subscribed(&conn, &BuildId::from("b2")));
    assert_consistent(&registry);
}

#[test]
fn empty_and_placeholder_ids_are_filtered() {
    let registry = SubscriptionRegistry::new();
    let conn = ConnectionId::from("c1");
    registry.replace_subscriptions(&conn, ids(&["", "-abc", "real1"]));

    assert_eq!(registry.builds_for(&conn), ids(&["real1"]));
    assert_eq!(registry.pending_builds(), ids(&["real1"]));

    registry.merge_subscriptions(&conn, ids(&["-xyz", ""]));
    assert_eq!(registry.builds_for(&conn), ids(&["real1"]));
    assert_consistent(&registry);
}

#[test]
fn connection_with_nothing_watchable_still_registers() {
    let registry = SubscriptionRegistry::new();
    let conn = ConnectionId::from("c1");
    registry.replace_subscriptions(&conn, ids(&["-pending-only"]));

    // It watches nothing, but it still takes part in global refresh notices.
    assert_eq!(registry.connections(), vec![conn.clone()]);
    assert!(registry.builds_for(&conn).is_empty());
    assert!(registry.pending_builds().is_empty());
}

#[test]
fn disconnect_keeps_builds_shared_with_others() {
    let registry = SubscriptionRegistry::new();
    let a = ConnectionId::from("a");
    let b = ConnectionId::from("b");
    registry.replace_subscriptions(&a, ids(&["b1", "b2"]));
    registry.replace_subscriptions(&b, ids(&["b2", "b3"]));

    registry.remove_all_subscriptions(&a);

    let pending: HashSet<BuildId> = registry.pending_builds().into_iter().collect();
    assert_eq!(pending, ids(&["b2", "b3"]).into_iter().collect());
    assert_eq!(registry.subscribers_of(&BuildId::from("b2")), vec![b.clone()]);
    assert!(registry.subscribers_of(&BuildId::from("b1")).is_empty());
    assert_consistent(&registry);
}

#[test]
fn removing_last_subscriber_retires_the_build() {
    let registry = SubscriptionRegistry::new();
    let a = ConnectionId::from("a");
    let b = ConnectionId::from("b");
    registry.replace_subscriptions(&a, ids(&["b1"]));
    registry.replace_subscriptions(&b, ids(&["b1"]));

    registry.remove_subscription(&a, &BuildId::from("b1"));
    assert_eq!(registry.pending_builds(), ids(&["b1"]));
    assert_consistent(&registry);

    registry.remove_subscription(&b, &BuildId::from("b1"));
    assert!(registry.pending_builds().is_empty());
    assert!(registry.subscribers_of(&BuildId::from("b1")).is_empty());
    assert_consistent(&registry);
}

#[test]
fn remove_all_for_unknown_connection_is_a_noop() {
    let registry = SubscriptionRegistry::new();
    registry.remove_all_subscriptions(&ConnectionId::from("ghost"));
    assert!(registry.connections().is_empty());
    assert_consistent(&registry);
}

#[test]
fn concurrent_churn_on_shared_builds_stays_consistent() {
    let registry = SubscriptionRegistry::new();
    let shared = ["b1", "b2", "b3", "b4"];

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let registry = registry.clone();
            thread::spawn(move || {
                let conn = ConnectionId::new(format!("c{n}"));
                for round in 0..200 {
                    let own = format!("own-{n}-{}", round % 3);
                    let mut builds = ids(&shared[..(round % shared.len()) + 1]);
                    builds.push(BuildId::new(own));
                    registry.replace_subscriptions(&conn, builds);
                    if round % 5 == 0 {
                        registry.remove_subscription(&conn, &BuildId::from("b1"));
                    }
                    if round % 7 == 0 {
                        registry.remove_all_subscriptions(&conn);
                    }
                }
                registry.remove_all_subscriptions(&conn);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(registry.connections().is_empty());
    assert!(registry.pending_builds().is_empty());
    assert_consistent(&registry);
}
