//! Publication, selection, consumption, and retention

use std::sync::Arc;
use std::time::Duration;

use trellis_foundation::ErrorKind;
use trellis_xuples::{
    ConsumptionPolicy, ManualClock, OverflowPolicy, RetentionPolicy, SelectionPolicy, SpaceConfig,
    XupleManager, XupleState,
};

use crate::{alert, code};

fn manager() -> (ManualClock, XupleManager) {
    let clock = ManualClock::at_epoch();
    let manager = XupleManager::with_clock(Arc::new(clock.clone()));
    (clock, manager)
}

#[test]
fn lifo_per_agent_lifecycle() {
    let (_, manager) = manager();
    let config = SpaceConfig::default()
        .with_selection(SelectionPolicy::Lifo)
        .with_consumption(ConsumptionPolicy::per_agent());
    manager.create("alerts", config).unwrap();
    manager.publish("alerts", alert(1), Vec::new()).unwrap();
    let a2 = manager.publish("alerts", alert(2), Vec::new()).unwrap();
    let space = manager.get("alerts").unwrap();

    let first = space.retrieve("ag1").unwrap().unwrap();
    assert_eq!(first.id, a2);
    space.mark_consumed(a2, "ag1").unwrap();
    assert_eq!(code(&space.retrieve("ag1").unwrap().unwrap()), 1);
    assert_eq!(code(&space.retrieve("ag2").unwrap().unwrap()), 2);
    assert!(space.retrieve("ag1").unwrap().is_none());
}

#[test]
fn once_policy_consumes_for_everyone() {
    let (_, manager) = manager();
    manager.create("jobs", SpaceConfig::default()).unwrap();
    let id = manager.publish("jobs", alert(1), Vec::new()).unwrap();
    let space = manager.get("jobs").unwrap();

    assert_eq!(space.retrieve("a").unwrap().unwrap().id, id);
    assert!(space.retrieve("b").unwrap().is_none());
    assert_eq!(space.get(id).unwrap().state, XupleState::Consumed);

    let err = space.mark_consumed(id, "b").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::XupleNotAvailable { .. }));
}

#[test]
fn agent_limit_exhausts_the_xuple() {
    let (_, manager) = manager();
    let config = SpaceConfig::default().with_consumption(ConsumptionPolicy::PerAgent {
        max_agents: Some(2),
    });
    manager.create("news", config).unwrap();
    let id = manager.publish("news", alert(9), Vec::new()).unwrap();
    let space = manager.get("news").unwrap();

    assert!(space.retrieve("a").unwrap().is_some());
    assert!(space.retrieve("b").unwrap().is_some());
    assert!(space.retrieve("c").unwrap().is_none());
    assert_eq!(space.get(id).unwrap().consumed_by.len(), 2);
}

#[test]
fn retention_expires_on_the_clock() {
    let (clock, manager) = manager();
    let config =
        SpaceConfig::default().with_retention(RetentionPolicy::Duration(Duration::from_secs(60)));
    manager.create("short", config).unwrap();
    manager.publish("short", alert(1), Vec::new()).unwrap();
    let space = manager.get("short").unwrap();

    clock.advance(Duration::from_secs(60));
    assert_eq!(space.count(), 1);

    clock.advance(Duration::from_secs(1));
    assert_eq!(space.count(), 0);
    assert!(space.retrieve("a").unwrap().is_none());
    assert_eq!(manager.cleanup(), 1);
    assert!(space.is_empty());
}

#[test]
fn bounded_space_overflow_policies() {
    let (_, manager) = manager();
    manager
        .create("evict", SpaceConfig::default().with_max_size(2))
        .unwrap();
    manager
        .create(
            "reject",
            SpaceConfig::default()
                .with_max_size(2)
                .with_overflow(OverflowPolicy::Reject),
        )
        .unwrap();

    for n in 1..=3 {
        manager.publish("evict", alert(n), Vec::new()).unwrap();
    }
    let codes: Vec<_> = manager.get("evict").unwrap().list_all().iter().map(code).collect();
    assert_eq!(codes, vec![2, 3]);

    manager.publish("reject", alert(1), Vec::new()).unwrap();
    manager.publish("reject", alert(2), Vec::new()).unwrap();
    let err = manager.publish("reject", alert(3), Vec::new()).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::SpaceFull { max_size: 2, .. }));
}

#[test]
fn seeded_random_selection_is_reproducible() {
    let draw = || {
        let manager = XupleManager::new().with_seed(Some(7));
        let config = SpaceConfig::default().with_selection(SelectionPolicy::Random);
        manager.create("pool", config).unwrap();
        for n in 0..8 {
            manager.publish("pool", alert(n), Vec::new()).unwrap();
        }
        let space = manager.get("pool").unwrap();
        space.retrieve_many("a", 8).unwrap().iter().map(code).collect::<Vec<_>>()
    };
    let first = draw();
    assert_eq!(first, draw());
    let mut sorted = first.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..8).collect::<Vec<_>>());
}

#[test]
fn manager_rejects_conflicting_redeclaration() {
    let (_, manager) = manager();
    manager.create("s", SpaceConfig::default()).unwrap();
    let err = manager
        .create("s", SpaceConfig::default().with_selection(SelectionPolicy::Lifo))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::SpaceExists(_)));
    let err = manager.get("missing").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::SpaceNotFound(_)));
}

#[test]
fn policies_parse_from_keywords() {
    let mut config = SpaceConfig::default();
    config.apply("selection", "random").unwrap();
    config.apply("consumption", "per-agent(3)").unwrap();
    config.apply("retention", "duration(90s)").unwrap();
    config.apply("max_size", "10").unwrap();
    config.apply("overflow", "reject").unwrap();

    assert_eq!(config.selection, SelectionPolicy::Random);
    assert_eq!(
        config.consumption,
        ConsumptionPolicy::PerAgent { max_agents: Some(3) }
    );
    assert_eq!(config.retention, RetentionPolicy::Duration(Duration::from_secs(90)));
    assert_eq!(config.max_size, 10);
    assert_eq!(config.overflow, OverflowPolicy::Reject);

    assert!(config.apply("retention", "duration(0s)").is_err());
    assert!(config.apply("colour", "blue").is_err());
}
