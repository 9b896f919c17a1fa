//! Concurrent consumers on one space

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use trellis_xuples::{ConsumptionPolicy, SpaceConfig, XupleManager};

use crate::{alert, code};

#[test]
fn each_xuple_goes_to_exactly_one_consumer() {
    let manager = Arc::new(XupleManager::new());
    manager.create("work", SpaceConfig::default()).unwrap();
    for n in 0..200 {
        manager.publish("work", alert(n), Vec::new()).unwrap();
    }

    let workers: Vec<_> = (0..4)
        .map(|w| {
            let space = manager.get("work").unwrap();
            thread::spawn(move || {
                let agent = format!("worker-{w}");
                let mut taken = Vec::new();
                while let Some(xuple) = space.retrieve(&agent).unwrap() {
                    taken.push(code(&xuple));
                }
                taken
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for worker in workers {
        for n in worker.join().unwrap() {
            assert!(seen.insert(n), "xuple {n} delivered twice");
            total += 1;
        }
    }
    assert_eq!(total, 200);
}

#[test]
fn per_agent_delivery_is_once_per_agent_under_contention() {
    let manager = Arc::new(XupleManager::new());
    manager
        .create("feed", SpaceConfig::default().with_consumption(ConsumptionPolicy::per_agent()))
        .unwrap();
    for n in 0..50 {
        manager.publish("feed", alert(n), Vec::new()).unwrap();
    }

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let space = manager.get("feed").unwrap();
            thread::spawn(move || {
                let mut count = 0;
                while space.retrieve("shared-agent").unwrap().is_some() {
                    count += 1;
                }
                count
            })
        })
        .collect();

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, 50);
    let other = manager.get("feed").unwrap().retrieve("other").unwrap();
    assert_eq!(other.map(|x| code(&x)), Some(0));
}
