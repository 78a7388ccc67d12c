//! Concurrent authorization tests
//!
//! The engine is shared across threads; the only mutable state is the
//! compiled-condition cache, which must never change a decision.

use authzen::service::{InMemoryRepository, ResourceRepository};
use authzen::{
    AuthZen, AuthorizationEngine, AuthorizationService, DecisionReason, EngineConfig, EntityEvent,
    EventSink, Policy, PrincipalPolicyRecord, Principal, Resource, RolePolicyRecord, Statement,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn conditional_policy(n: usize) -> Policy {
    Policy::new(vec![Statement::allow()
        .principals(["user-*"])
        .actions(["document:*"])
        .resources(["*"])
        .condition(format!("context.level >= {}", n))
        .build()
        .unwrap()])
    .unwrap()
}

fn open_resource(id: &str) -> Resource {
    Resource::new(id, "document").with_policy(
        Policy::new(vec![Statement::allow()
            .actions(["*"])
            .resources(["*"])
            .build()
            .unwrap()])
        .unwrap(),
    )
}

#[test]
fn test_concurrent_decisions_match_sequential() {
    let authz = Arc::new(AuthZen::new());
    let resource = Arc::new(open_resource("doc-1"));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let authz = Arc::clone(&authz);
            let resource = Arc::clone(&resource);
            std::thread::spawn(move || {
                for i in 0..200 {
                    let threshold = (i + t) % 10;
                    let level = rand::random::<usize>() % 10;
                    let principal =
                        Principal::new(format!("user-{}", t)).with_policy(conditional_policy(threshold));
                    let ctx = json!({ "level": level });

                    let decision = authz.authorize_with_context(&principal, &resource, "read", &ctx);
                    assert_eq!(decision.allowed, level >= threshold);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_small_cache_under_contention() {
    // A two-entry cache forces constant eviction while threads race
    let config = EngineConfig {
        condition_cache_capacity: 2,
        ..EngineConfig::default()
    };
    let authz = Arc::new(AuthZen::from_config(&config).unwrap());
    let resource = Arc::new(open_resource("doc-1"));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let authz = Arc::clone(&authz);
            let resource = Arc::clone(&resource);
            std::thread::spawn(move || {
                for i in 0..300 {
                    let threshold = (i * 7 + t) % 16;
                    let principal =
                        Principal::new("user-1").with_policy(conditional_policy(threshold));
                    let ctx = json!({ "level": 8 });

                    let decision = authz.authorize_with_context(&principal, &resource, "read", &ctx);
                    assert_eq!(decision.allowed, 8 >= threshold);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_engine_clone_shares_evaluator() {
    let engine = AuthorizationEngine::new();
    let clone = engine.clone();
    assert!(Arc::ptr_eq(engine.evaluator(), clone.evaluator()));
}

#[test]
fn test_events_race_with_authorization() {
    let resources = Arc::new(InMemoryRepository::<Resource>::new());
    let principals = Arc::new(InMemoryRepository::<PrincipalPolicyRecord>::new());
    let roles = Arc::new(InMemoryRepository::<RolePolicyRecord>::new());

    principals.insert(PrincipalPolicyRecord::new(
        "user-1",
        conditional_policy(0),
        vec![],
    ));

    let service = Arc::new(AuthorizationService::new(
        AuthorizationEngine::new(),
        resources.clone(),
        principals,
        roles,
    ));

    let writer = {
        let resources = Arc::clone(&resources);
        std::thread::spawn(move || {
            for i in 0..500 {
                let id = format!("doc-{}", i % 10);
                let event = if i % 3 == 0 {
                    EntityEvent::delete(Resource::new(id, "document"))
                } else {
                    EntityEvent::update(open_resource(&id))
                };
                resources.apply(event).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                let ctx = json!({ "level": 1 });
                for i in 0..500 {
                    let id = format!("doc-{}", i % 10);
                    // Either the resource exists and the request is allowed,
                    // or it was deleted and the lookup fails
                    match service.authorize("user-1", Value::Null, &id, "read", Some(&ctx)) {
                        Ok(decision) => {
                            assert!(decision.allowed);
                            assert_eq!(decision.reason, DecisionReason::BothAllow);
                        }
                        Err(e) => assert!(e.to_string().contains(&id)),
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for h in readers {
        h.join().unwrap();
    }

    // Last write for each id: i in 490..500
    for i in 0..10 {
        let last = (490..500).find(|n| n % 10 == i).unwrap();
        let exists = resources.find_by_id(&format!("doc-{}", i)).unwrap().is_some();
        assert_eq!(exists, last % 3 != 0, "doc-{i}");
    }
}
