use std::sync::Arc;
use std::time::Duration;

use rivulet_api::{
    ConnectionParams, FieldDefinition, FieldType, FieldValue, InboundEvent, RecordShape, SinkConnection, SpikeRecord,
    StreamSchema,
};
use rivulet_conn_memory::MemoryConnectionFactory;
use rivulet_engine::{
    BatchSettings, DeliveryMode, EngineError, HostInfo, SchemaChange, SessionController, SinkSettings,
};

fn spike_controller(factory: &Arc<MemoryConnectionFactory>) -> SessionController {
    let mut controller = SessionController::new(factory.clone());
    controller.set_host_info(HostInfo {
        spike_channels: 2,
        ..HostInfo::default()
    });
    controller
}

fn pc_event_schema() -> StreamSchema {
    StreamSchema::new(vec![
        FieldDefinition::numeric("sample_number", FieldType::Int64),
        FieldDefinition::numeric("pc1", FieldType::Float),
        FieldDefinition::numeric("pc2", FieldType::Float),
    ])
    .unwrap()
}

#[tokio::test]
async fn test_configuration_errors_happen_before_io() {
    let factory = Arc::new(MemoryConnectionFactory::new());

    let mut controller = spike_controller(&factory);
    controller.set_connection_params(ConnectionParams::new("", 6379, "")).unwrap();
    assert!(matches!(controller.start().await, Err(EngineError::Configuration(_))));

    for port in [0, -1, 70_000] {
        controller.set_connection_params(ConnectionParams::new("localhost", port, "")).unwrap();
        assert!(matches!(controller.start().await, Err(EngineError::Configuration(_))));
    }

    controller.set_connection_params(ConnectionParams::default()).unwrap();
    controller.set_stream_name(Some(String::new())).unwrap();
    assert!(matches!(controller.start().await, Err(EngineError::Configuration(_))));

    let mut no_channels = SessionController::new(factory.clone());
    assert!(matches!(no_channels.start().await, Err(EngineError::Configuration(_))));

    assert!(factory.connections().is_empty());
    assert!(!controller.is_open());
    assert!(!controller.schema_state().is_frozen());
}

#[tokio::test]
async fn test_unreachable_store_fails_start() {
    let factory = Arc::new(MemoryConnectionFactory::new());
    factory.set_fail_connect(true);
    let mut controller = spike_controller(&factory);

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, EngineError::Connection(_)));
    assert!(err.to_string().contains("127.0.0.1:6379"));
    assert!(!controller.is_open());

    factory.set_fail_connect(false);
    factory.set_fail_open(true);
    assert!(matches!(controller.start().await, Err(EngineError::Connection(_))));
    assert!(!controller.is_open());
    assert!(factory.last().unwrap().is_closed());
    assert!(!controller.schema_state().is_frozen());

    // The caller retries by calling start again.
    factory.set_fail_open(false);
    controller.start().await.unwrap();
    assert!(controller.is_open());
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let factory = Arc::new(MemoryConnectionFactory::new());
    let mut controller = spike_controller(&factory);

    controller.stop().await.unwrap();
    controller.start().await.unwrap();
    controller.start().await.unwrap();
    assert_eq!(factory.connections().len(), 1);

    controller.stop().await.unwrap();
    controller.stop().await.unwrap();
    assert!(factory.last().unwrap().is_closed());
    assert!(!controller.is_open());
}

#[tokio::test]
async fn test_generated_name_survives_restart_and_explicit_name_wins() {
    let factory = Arc::new(MemoryConnectionFactory::new());
    let mut controller = spike_controller(&factory);

    controller.start().await.unwrap();
    let first = controller.stream_name().unwrap().to_string();
    controller.stop().await.unwrap();
    controller.start().await.unwrap();
    assert_eq!(controller.stream_name(), Some(first.as_str()));
    controller.stop().await.unwrap();

    controller.set_stream_name(Some("rig-7".into())).unwrap();
    controller.start().await.unwrap();
    assert_eq!(factory.last().unwrap().opened().unwrap().stream_name, "rig-7");
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_total_written_is_monotonic_across_sessions() {
    let factory = Arc::new(MemoryConnectionFactory::new());
    let mut controller = spike_controller(&factory);
    controller.set_batching(BatchSettings::synchronous());

    controller.start().await.unwrap();
    for i in 0..3 {
        controller.submit_spike(SpikeRecord::new(0, 0, i)).unwrap();
    }
    assert_eq!(controller.total_records_written(), 3);
    controller.stop().await.unwrap();
    assert_eq!(controller.total_records_written(), 3);

    controller.start().await.unwrap();
    assert_eq!(controller.total_records_written(), 3);
    controller.submit_spike(SpikeRecord::new(0, 0, 3)).unwrap();
    controller.submit_spike(SpikeRecord::new(0, 0, 4)).unwrap();
    assert_eq!(controller.total_records_written(), 5);
    controller.stop().await.unwrap();
    assert_eq!(factory.connections().len(), 2);
}

#[tokio::test]
async fn test_schema_change_while_open_is_deferred() {
    let factory = Arc::new(MemoryConnectionFactory::new());
    let mut controller = spike_controller(&factory);
    controller.set_batching(BatchSettings::synchronous());
    controller.start().await.unwrap();

    assert_eq!(controller.set_event_schema(Some(pc_event_schema())), SchemaChange::Deferred);
    assert_eq!(controller.schema_state().active(), &RecordShape::Spike);
    controller.submit_spike(SpikeRecord::new(1, 0, 10)).unwrap();

    let event = pc_event_schema()
        .encode_row(&[FieldValue::Int64(10), FieldValue::Float(0.5), FieldValue::Float(-0.5)])
        .unwrap();
    assert!(matches!(
        controller.submit_event(InboundEvent::Event(&event)),
        Err(EngineError::ShapeMismatch { expected: "spike" })
    ));
    controller.stop().await.unwrap();

    assert_eq!(controller.schema_state().active(), &RecordShape::Event(pc_event_schema()));
    controller.start().await.unwrap();
    assert_eq!(factory.last().unwrap().opened().unwrap().schema, pc_event_schema());
    assert_eq!(controller.submit_event(InboundEvent::Event(&event)).unwrap(), 1);
    controller.stop().await.unwrap();
}

#[tokio::test]
async fn test_controller_from_settings() {
    let factory = Arc::new(MemoryConnectionFactory::new());
    let mut settings = SinkSettings {
        port: 7001,
        max_batch_size: 0,
        stream_name: Some("from-file".into()),
        ..SinkSettings::default()
    };
    settings.set_event_schema(Some(&pc_event_schema())).unwrap();

    let mut controller = SessionController::from_settings(factory.clone(), &settings);
    assert_eq!(controller.connection_params().port, 7001);
    controller.start().await.unwrap();
    assert_eq!(controller.mode(), Some(DeliveryMode::Direct));
    assert_eq!(controller.stream_name(), Some("from-file"));
    assert_eq!(factory.last().unwrap().opened().unwrap().schema, pc_event_schema());
    controller.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_writer_is_detached_and_its_connection_closed_later() {
    let factory = Arc::new(MemoryConnectionFactory::new());
    factory.set_append_delay(Duration::from_millis(300));
    let mut controller = spike_controller(&factory);
    controller.set_batching(BatchSettings::new(64, 5));
    controller.set_stop_timeout(Duration::from_millis(50));

    controller.start().await.unwrap();
    controller.submit_spike(SpikeRecord::new(0, 0, 1)).unwrap();
    // Let the writer enter the slow append.
    tokio::time::sleep(Duration::from_millis(30)).await;

    controller.stop().await.unwrap();
    assert!(!controller.is_open());
    let old = factory.last().unwrap();
    assert!(!old.is_closed());

    controller.set_batching(BatchSettings::synchronous());
    factory.set_append_delay(Duration::ZERO);
    controller.start().await.unwrap();
    assert_eq!(factory.connections().len(), 2);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(old.is_closed());
    assert_eq!(old.total_accepted(), 1);
    assert_eq!(controller.total_records_written(), 1);
    assert!(!factory.last().unwrap().is_closed());

    controller.submit_spike(SpikeRecord::new(1, 0, 2)).unwrap();
    controller.stop().await.unwrap();
    assert_eq!(controller.total_records_written(), 2);
}

#[tokio::test]
async fn test_slow_store_does_not_stall_a_single_threaded_host() {
    let factory = Arc::new(MemoryConnectionFactory::new());
    factory.set_append_delay(Duration::from_millis(500));
    let mut controller = spike_controller(&factory);
    controller.set_batching(BatchSettings::new(64, 5));
    controller.set_stop_timeout(Duration::from_millis(50));

    controller.start().await.unwrap();
    controller.submit_spike(SpikeRecord::new(0, 0, 1)).unwrap();

    // Host timers keep firing while the writer sits in the slow append.
    let begin = std::time::Instant::now();
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(begin.elapsed() < Duration::from_millis(300));

    let begin = std::time::Instant::now();
    controller.stop().await.unwrap();
    assert!(begin.elapsed() < Duration::from_millis(300));

    let old = factory.last().unwrap();
    assert!(!old.is_closed());
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(old.is_closed());
    assert_eq!(controller.total_records_written(), 1);
}
