//! Dispatcher behaviour against in-memory collaborators, without consumers

mod common;

use serde_json::json;
use std::sync::Arc;

use common::*;
use curator_core::constants::events;
use curator_core::models::{Message, Order, OrderBatch};
use curator_core::orchestration::{MessageOutcome, StandardTransactionManager};

fn batch(orders: Vec<Order>) -> OrderBatch {
    OrderBatch::new(orders)
}

#[tokio::test]
async fn test_empty_batch_has_no_side_effects() {
    let decision = Arc::new(ScriptedDecision::new());
    let harness = DispatcherHarness::new(test_config(), decision.clone(), &["uuid:1"]).await;

    let outcome = harness
        .dispatcher
        .on_message(br#"{"oid":"uuid:1"}"#, LISTEN_QUEUE)
        .await;

    match outcome {
        MessageOutcome::Completed { oid, report } => {
            assert_eq!(oid, "uuid:1");
            assert_eq!(report.attempted, 0);
            assert!(report.is_clean());
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(decision.seen_oids(), vec!["uuid:1"]);
    assert_eq!(harness.store.save_count(), 0);
    assert!(harness.observations.transformed().is_empty());
    assert!(harness.observations.indexed().is_empty());
    assert!(harness.observations.notifications().is_empty());
    assert_eq!(harness.gateway.connections().connection_count().await, 0);
}

#[tokio::test]
async fn test_first_transform_flag_set_second_missing_plugin_skipped() {
    let decision = Arc::new(ScriptedDecision::new());
    decision.script(
        "uuid:1",
        batch(vec![
            Order::transform("uuid:1", "flagA", json!({})),
            Order::transform("uuid:1", "noSuchTransformer", json!({})),
        ]),
    );
    let harness = DispatcherHarness::new(test_config(), decision, &["uuid:1"]).await;

    let outcome = harness
        .dispatcher
        .process(Message::new("uuid:1"), LISTEN_QUEUE)
        .await;

    let MessageOutcome::Completed { report, .. } = outcome else {
        panic!("expected completion");
    };
    assert_eq!(report.attempted, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failures[0].index, 1);
    assert!(report.failures[0].error.contains("noSuchTransformer"));

    let object = harness.object("uuid:1");
    assert!(object.has_flag("flagA"));
    assert!(!object.has_flag("noSuchTransformer"));
}

#[tokio::test]
async fn test_orders_run_in_batch_order() {
    let decision = Arc::new(ScriptedDecision::new());
    decision.script(
        "uuid:1",
        batch(vec![
            Order::transform("uuid:1", "flagB", json!({})),
            Order::transform("uuid:1", "flagA", json!({})),
            Order::index("uuid:1"),
        ]),
    );
    let harness = DispatcherHarness::new(test_config(), decision, &["uuid:1"]).await;

    harness
        .dispatcher
        .process(Message::new("uuid:1"), LISTEN_QUEUE)
        .await;

    let order: Vec<String> = harness
        .observations
        .transformed()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(order, vec!["flagB", "flagA"]);
    assert_eq!(harness.observations.indexed(), vec!["uuid:1"]);
}

#[tokio::test]
async fn test_failing_orders_do_not_block_index_and_notify() {
    let decision = Arc::new(ScriptedDecision::new());
    decision.script(
        "uuid:1",
        batch(vec![
            Order::transform("uuid:1", "missingTransformer", json!({})),
            Order::transform("uuid:1", "broken", json!({})),
            Order::transform("uuid:1", "explosive", json!({})),
            Order::index("uuid:1").with_config(json!({"commit": true})),
            Order::notify("uuid:1", json!({"eventType": "modify"})),
        ]),
    );
    let harness = DispatcherHarness::new(test_config(), decision, &["uuid:1"]).await;

    let outcome = harness
        .dispatcher
        .process(Message::new("uuid:1"), LISTEN_QUEUE)
        .await;

    let MessageOutcome::Completed { report, .. } = outcome else {
        panic!("expected completion");
    };
    assert_eq!(report.attempted, 5);
    assert_eq!(report.failed(), 3);
    assert!(report.failures[2].error.contains("panicked"));

    assert_eq!(harness.observations.indexed(), vec!["uuid:1"]);
    assert_eq!(*harness.observations.commits.lock(), 1);
    let notifications = harness.observations.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].0, "auditLog");
    assert_eq!(notifications[0].1["eventType"], "modify");
    assert_eq!(notifications[0].1["oid"], "uuid:1");
}

#[tokio::test]
async fn test_failing_subscriber_does_not_block_others() {
    let mut config = test_config();
    config.dispatcher.subscribers = vec![
        "flakySubscriber".to_string(),
        "auditLog".to_string(),
        "mailer".to_string(),
    ];
    let decision = Arc::new(ScriptedDecision::new());
    decision.script(
        "uuid:1",
        batch(vec![
            Order::notify("uuid:1", json!({"eventType": "modify"})),
            Order::index("uuid:1"),
        ]),
    );
    let harness = DispatcherHarness::new(config, decision, &["uuid:1"]).await;

    harness
        .dispatcher
        .process(Message::new("uuid:1"), LISTEN_QUEUE)
        .await;

    let receivers: Vec<String> = harness
        .observations
        .notifications()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(receivers, vec!["auditLog", "mailer"]);
    assert_eq!(harness.observations.indexed(), vec!["uuid:1"]);

    let stats = harness.subscribers.get_stats().await;
    assert_eq!(stats.total_failures, 1);
}

#[tokio::test]
async fn test_malformed_input_is_discarded() {
    let decision = Arc::new(ScriptedDecision::new());
    let harness = DispatcherHarness::new(test_config(), decision.clone(), &[]).await;
    let mut listener = harness.gateway.subscribe_events();

    let inputs: [&[u8]; 5] = [
        b"not json",
        br#"["oid"]"#,
        br#"{"context":"no oid"}"#,
        br#"{"oid":""}"#,
        br#"{"oid":42}"#,
    ];
    for raw in inputs {
        let outcome = harness.dispatcher.on_message(raw, LISTEN_QUEUE).await;
        assert!(
            matches!(outcome, MessageOutcome::Discarded { .. }),
            "{raw:?} should be discarded"
        );
    }

    assert!(decision.seen().is_empty());
    let event = listener.try_recv().unwrap();
    assert_eq!(event.field("event"), Some(events::MESSAGE_DISCARDED));
    assert_eq!(event.field("queue"), Some(LISTEN_QUEUE));
}

#[tokio::test]
async fn test_decision_failure_aborts_whole_message() {
    let decision = Arc::new(ScriptedDecision::new());
    decision.fail_for("uuid:1");
    let harness = DispatcherHarness::new(test_config(), decision, &["uuid:1"]).await;
    let mut listener = harness.gateway.subscribe_events();

    let outcome = harness
        .dispatcher
        .process(Message::new("uuid:1"), LISTEN_QUEUE)
        .await;

    match outcome {
        MessageOutcome::DecisionFailed { oid, error } => {
            assert_eq!(oid, "uuid:1");
            assert!(error.contains("policy lookup failed"));
        }
        other => panic!("expected decision failure, got {other:?}"),
    }
    assert!(harness.observations.indexed().is_empty());
    assert_eq!(harness.store.save_count(), 0);

    let event = listener.try_recv().unwrap();
    assert_eq!(event.field("event"), Some(events::DECISION_FAILED));
    assert_eq!(event.field("oid"), Some("uuid:1"));
}

#[tokio::test]
async fn test_dispatch_defaults_to_own_queue_and_default_broker() {
    let decision = Arc::new(ScriptedDecision::new());
    decision.script(
        "uuid:A",
        batch(vec![Order::dispatch(json!({"oid": "uuid:B", "stage": "renderQueue"}))]),
    );
    let harness = DispatcherHarness::new(test_config(), decision, &["uuid:A"]).await;

    harness
        .dispatcher
        .process(Message::new("uuid:A"), LISTEN_QUEUE)
        .await;

    let pending = harness.hub.broker(BROKER).pending_messages(LISTEN_QUEUE);
    assert_eq!(pending, vec![json!({"oid": "uuid:B", "stage": "renderQueue"})]);
    assert_eq!(harness.hub.broker(BROKER).persistent_count(LISTEN_QUEUE), 1);
}

#[tokio::test]
async fn test_dispatch_without_oid_reuses_origin_oid() {
    let decision = Arc::new(ScriptedDecision::new());
    decision.script(
        "uuid:A",
        batch(vec![
            Order::dispatch(json!({"stage": "renderQueue"})).with_target("renderQueue")
        ]),
    );
    let harness = DispatcherHarness::new(test_config(), decision, &["uuid:A"]).await;

    harness
        .dispatcher
        .process(Message::new("uuid:A"), LISTEN_QUEUE)
        .await;

    let pending = harness.hub.broker(BROKER).pending_messages("renderQueue");
    assert_eq!(pending, vec![json!({"oid": "uuid:A", "stage": "renderQueue"})]);
    assert!(harness
        .hub
        .broker(BROKER)
        .pending_messages(LISTEN_QUEUE)
        .is_empty());
}

#[tokio::test]
async fn test_broker_override_creates_distinct_cached_connections() {
    let decision = Arc::new(ScriptedDecision::new());
    decision.script(
        "uuid:A",
        batch(vec![
            Order::dispatch(json!({"oid": "uuid:B"})),
            Order::dispatch(json!({"oid": "uuid:C"})).with_broker("127.0.0.1"),
            Order::dispatch(json!({"oid": "uuid:D"})).with_broker("127.0.0.1"),
        ]),
    );
    let harness = DispatcherHarness::new(test_config(), decision, &["uuid:A"]).await;
    harness.hub.alias("localhost", "broker-1");
    harness.hub.alias("127.0.0.1", "broker-1");

    harness
        .dispatcher
        .process(Message::new("uuid:A"), LISTEN_QUEUE)
        .await;

    let connections = harness.gateway.connections();
    assert_eq!(
        connections.addresses().await,
        vec!["127.0.0.1".to_string(), "localhost".to_string()]
    );
    assert_eq!(harness.hub.connection_attempts("localhost"), 1);
    assert_eq!(harness.hub.connection_attempts("127.0.0.1"), 1);

    // Same physical broker behind both address strings
    let oids: Vec<String> = harness
        .hub
        .broker("localhost")
        .pending_messages(LISTEN_QUEUE)
        .into_iter()
        .map(|body| body["oid"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(oids, vec!["uuid:B", "uuid:C", "uuid:D"]);
}

#[tokio::test]
async fn test_unreachable_override_broker_is_isolated() {
    let decision = Arc::new(ScriptedDecision::new());
    decision.script(
        "uuid:A",
        batch(vec![
            Order::dispatch(json!({"oid": "uuid:B"})).with_broker("tcp://offline:61616"),
            Order::index("uuid:A"),
        ]),
    );
    let harness = DispatcherHarness::new(test_config(), decision, &["uuid:A"]).await;
    harness.hub.set_reachable("tcp://offline:61616", false);

    let MessageOutcome::Completed { report, .. } = harness
        .dispatcher
        .process(Message::new("uuid:A"), LISTEN_QUEUE)
        .await
    else {
        panic!("expected completion");
    };

    assert_eq!(report.failed(), 1);
    assert!(report.failures[0].error.contains("tcp://offline:61616"));
    assert_eq!(harness.observations.indexed(), vec!["uuid:A"]);
}

#[tokio::test]
async fn test_stage_transform_runs_conveyor_with_priority_override_and_default() {
    let mut config = test_config();
    config.conveyor.stages.insert(
        "harvestQueue".to_string(),
        vec!["dcToMods".to_string(), "thumbnailer".to_string()],
    );
    config.conveyor.user_priority_selector = "flagB".to_string();
    for id in ["dcToMods", "thumbnailer", "flagA", "flagB"] {
        config
            .conveyor
            .transformer_defaults
            .insert(id.to_string(), json!({}));
    }
    config
        .conveyor
        .transformer_overrides
        .insert("thumbnailer".to_string(), json!({"width": 64}));

    let decision = Arc::new(ScriptedDecision::new());
    for oid in ["uuid:default", "uuid:override", "uuid:priority"] {
        decision.script(
            oid,
            batch(vec![Order::transform(oid, "harvestQueue", json!({}))]),
        );
    }
    let harness = DispatcherHarness::new(config, decision, &["uuid:default"]).await;
    harness
        .store
        .insert(curator_core::DigitalObject::new("uuid:override").with_property("harvestQueue", " flagA , "));
    harness.store.insert(
        curator_core::DigitalObject::new("uuid:priority").with_property("userPriority", "true"),
    );

    for oid in ["uuid:default", "uuid:override", "uuid:priority"] {
        harness
            .dispatcher
            .process(Message::new(oid), LISTEN_QUEUE)
            .await;
    }

    let default = harness.object("uuid:default");
    assert!(default.has_flag("dcToMods") && default.has_flag("thumbnailer"));

    let overridden = harness.object("uuid:override");
    assert!(overridden.has_flag("flagA"));
    assert!(!overridden.has_flag("dcToMods"));

    let prioritized = harness.object("uuid:priority");
    assert!(prioritized.has_flag("flagB"));
    assert!(!prioritized.has_flag("dcToMods"));
    assert_eq!(prioritized.get_property("userPriority"), None);

    let thumbnail_config = harness
        .observations
        .transform_configs
        .lock()
        .iter()
        .find(|(id, _)| id == "thumbnailer")
        .map(|(_, config)| config.clone());
    assert_eq!(thumbnail_config, Some(json!({"width": 64})));
}

#[tokio::test]
async fn test_standard_transaction_manager_end_to_end() {
    let mut config = test_config();
    config.conveyor.stages.insert(
        "harvestQueue".to_string(),
        vec!["dcToMods".to_string()],
    );
    config
        .conveyor
        .transformer_defaults
        .insert("dcToMods".to_string(), json!({}));
    let harness = DispatcherHarness::new(
        config,
        Arc::new(StandardTransactionManager::default()),
        &["uuid:1"],
    )
    .await;

    let outcome = harness
        .dispatcher
        .on_message(
            br#"{"oid":"uuid:1","commit":true,"relatedOids":["uuid:2"]}"#,
            LISTEN_QUEUE,
        )
        .await;

    assert!(outcome.is_completed());
    assert!(harness.object("uuid:1").has_flag("dcToMods"));
    assert_eq!(harness.observations.indexed(), vec!["uuid:1"]);
    assert_eq!(*harness.observations.commits.lock(), 1);
    assert_eq!(harness.observations.notifications()[0].1["eventType"], "modify");
    assert_eq!(
        harness.hub.broker(BROKER).pending_messages(LISTEN_QUEUE),
        vec![json!({"oid": "uuid:2", "loopStop": true})]
    );
}

#[tokio::test]
async fn test_object_override_runs_unconfigured_stage() {
    let mut config = test_config();
    config
        .conveyor
        .stages
        .insert("harvestQueue".to_string(), vec!["flagA".to_string()]);
    for id in ["flagA", "flagB"] {
        config
            .conveyor
            .transformer_defaults
            .insert(id.to_string(), json!({}));
    }

    let decision = Arc::new(ScriptedDecision::new());
    decision.script(
        "uuid:r",
        batch(vec![Order::transform("uuid:r", "renderQueue", json!({}))]),
    );
    let harness = DispatcherHarness::new(config, decision, &[]).await;
    harness
        .store
        .insert(curator_core::DigitalObject::new("uuid:r").with_property("renderQueue", "flagB"));

    let outcome = harness
        .dispatcher
        .process(Message::new("uuid:r"), LISTEN_QUEUE)
        .await;

    let MessageOutcome::Completed { report, .. } = outcome else {
        panic!("expected completion");
    };
    assert!(report.is_clean());
    let object = harness.object("uuid:r");
    assert!(object.has_flag("flagB"));
    assert!(!object.has_flag("flagA"));
}

#[tokio::test]
async fn test_empty_stage_is_a_successful_no_op() {
    let mut config = test_config();
    config.conveyor.stages.insert("renderQueue".to_string(), vec![]);
    config
        .conveyor
        .transformer_defaults
        .insert("flagA".to_string(), json!({}));
    assert!(config.validate().is_ok());

    let decision = Arc::new(ScriptedDecision::new());
    decision.script(
        "uuid:1",
        batch(vec![
            Order::transform("uuid:1", "renderQueue", json!({})),
            Order::index("uuid:1"),
        ]),
    );
    let harness = DispatcherHarness::new(config, decision, &["uuid:1"]).await;
    let before = harness.object("uuid:1");

    let outcome = harness
        .dispatcher
        .process(Message::new("uuid:1"), LISTEN_QUEUE)
        .await;

    let MessageOutcome::Completed { report, .. } = outcome else {
        panic!("expected completion");
    };
    assert_eq!(report.attempted, 2);
    assert!(report.is_clean());
    assert_eq!(harness.object("uuid:1"), before);
    assert!(harness.observations.transformed().is_empty());
    assert_eq!(harness.observations.indexed(), vec!["uuid:1"]);
}

#[tokio::test]
async fn test_standard_transaction_manager_honours_override_only_stage() {
    let mut config = test_config();
    config
        .conveyor
        .transformer_defaults
        .insert("flagB".to_string(), json!({}));
    let harness = DispatcherHarness::new(
        config,
        Arc::new(StandardTransactionManager::default()),
        &[],
    )
    .await;
    harness
        .store
        .insert(curator_core::DigitalObject::new("uuid:r").with_property("renderQueue", "flagB"));

    let outcome = harness
        .dispatcher
        .on_message(br#"{"oid":"uuid:r","stage":"renderQueue"}"#, LISTEN_QUEUE)
        .await;

    let MessageOutcome::Completed { report, .. } = outcome else {
        panic!("expected completion");
    };
    assert!(report.is_clean());
    assert!(harness.object("uuid:r").has_flag("flagB"));
}

#[tokio::test]
async fn test_stage_transform_layers_overrides_on_order_config() {
    let mut config = test_config();
    config.conveyor.stages.insert(
        "harvestQueue".to_string(),
        vec!["flagA".to_string(), "thumbnailer".to_string()],
    );
    for id in ["flagA", "thumbnailer"] {
        config
            .conveyor
            .transformer_defaults
            .insert(id.to_string(), json!({}));
    }
    config
        .conveyor
        .transformer_overrides
        .insert("thumbnailer".to_string(), json!({"width": 64, "mode": "slow"}));

    let decision = Arc::new(ScriptedDecision::new());
    decision.script(
        "A",
        batch(vec![Order::transform("A", "harvestQueue", json!({"mode": "fast"}))]),
    );
    let harness = DispatcherHarness::new(config, decision, &["A"]).await;

    harness
        .dispatcher
        .process(Message::new("A"), LISTEN_QUEUE)
        .await;

    assert_eq!(
        harness.observations.transform_configs.lock().clone(),
        vec![
            ("flagA".to_string(), json!({"mode": "fast"})),
            ("thumbnailer".to_string(), json!({"width": 64, "mode": "slow"})),
        ]
    );
}

#[tokio::test]
async fn test_registered_transformer_wins_over_same_named_property() {
    let decision = Arc::new(ScriptedDecision::new());
    decision.script(
        "uuid:1",
        batch(vec![Order::transform("uuid:1", "flagA", json!({"pass": 2}))]),
    );
    let harness = DispatcherHarness::new(test_config(), decision, &[]).await;
    harness
        .store
        .insert(curator_core::DigitalObject::new("uuid:1").with_property("flagA", "true"));

    harness
        .dispatcher
        .process(Message::new("uuid:1"), LISTEN_QUEUE)
        .await;

    assert_eq!(
        harness.observations.transform_configs.lock().clone(),
        vec![("flagA".to_string(), json!({"pass": 2}))]
    );
}
