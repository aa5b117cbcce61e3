//! Initialization, shutdown, and misconfiguration behavior of the task-wide
//! client.

use groupcomm::{
    CborCodec, Endpoint, GroupCommClient, GroupCommConfig, GroupCommError, InMemoryNameService,
    InProcessTransport, MessageKind, NameService, OperatorConfig, OperatorKind, TaskId,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Cluster {
    ns: Arc<InMemoryNameService>,
    transport: InProcessTransport,
}

impl Cluster {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        Self {
            ns: Arc::new(InMemoryNameService::new()),
            transport: InProcessTransport::new(),
        }
    }
}

fn op_config(
    operator: &str,
    kind: OperatorKind,
    self_id: &str,
    root: &str,
    children: &[&str],
) -> OperatorConfig {
    OperatorConfig {
        group_name: "g".to_string(),
        operator_name: operator.to_string(),
        kind,
        self_task_id: TaskId::new(self_id),
        driver_id: TaskId::new("driver"),
        root_task_id: TaskId::new(root),
        child_task_ids: children.iter().map(|c| TaskId::new(*c)).collect(),
        timeout_ms: 2_000,
        retry_count: 2,
    }
}

async fn build_task(
    cluster: &Cluster,
    self_id: &str,
    configs: Vec<OperatorConfig>,
) -> Arc<GroupCommClient> {
    let id = TaskId::new(self_id);
    let endpoint = Endpoint::new(format!("inproc://{self_id}"));
    cluster
        .ns
        .register(id.clone(), endpoint.clone())
        .await
        .unwrap();

    let mut builder = GroupCommClient::builder(id.clone(), endpoint)
        .name_service(cluster.ns.clone())
        .transport(Arc::new(cluster.transport.clone()));
    for config in configs {
        builder = builder.add_operator::<i32, _>(config, CborCodec::default());
    }
    let client = Arc::new(builder.build().unwrap());
    cluster.transport.attach(id, client.router());
    client
}

#[tokio::test]
async fn initialize_fails_when_child_never_registers() {
    let cluster = Cluster::new();
    let root = build_task(
        &cluster,
        "task-0",
        vec![op_config(
            "bcast",
            OperatorKind::Broadcast,
            "task-0",
            "task-0",
            &["task-1", "task-ghost"],
        )],
    )
    .await;
    // task-1 exists; task-ghost never registers
    build_task(
        &cluster,
        "task-1",
        vec![op_config("bcast", OperatorKind::Broadcast, "task-1", "task-0", &[])],
    )
    .await;

    let started = Instant::now();
    let err = root.initialize().await.unwrap_err();
    match err {
        GroupCommError::Initialization(peer) => assert_eq!(peer, TaskId::new("task-ghost")),
        other => panic!("unexpected error: {other}"),
    }
    // retry_count = 2 attempts with a 500 ms backoff between them
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[tokio::test]
async fn collectives_rejected_before_initialize() {
    let cluster = Cluster::new();
    let root = build_task(
        &cluster,
        "task-0",
        vec![op_config(
            "bcast",
            OperatorKind::Broadcast,
            "task-0",
            "task-0",
            &["task-1"],
        )],
    )
    .await;

    let err = root
        .group("g")
        .unwrap()
        .broadcast_sender::<i32>("bcast")
        .unwrap()
        .send(&1)
        .await
        .unwrap_err();
    assert!(matches!(err, GroupCommError::NotInitialized));
}

#[tokio::test]
async fn shutdown_unblocks_parked_receive_and_unregisters() {
    let cluster = Cluster::new();
    let root = build_task(
        &cluster,
        "task-0",
        vec![op_config(
            "bcast",
            OperatorKind::Broadcast,
            "task-0",
            "task-0",
            &["task-1"],
        )],
    )
    .await;
    let leaf = build_task(
        &cluster,
        "task-1",
        vec![op_config("bcast", OperatorKind::Broadcast, "task-1", "task-0", &[])],
    )
    .await;
    root.initialize().await.unwrap();
    leaf.initialize().await.unwrap();

    let receiver = leaf
        .group("g")
        .unwrap()
        .broadcast_receiver::<i32>("bcast")
        .unwrap();
    let parked = tokio::spawn(async move { receiver.receive().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    leaf.shutdown().await;

    let result = parked.await.unwrap();
    assert!(matches!(result, Err(GroupCommError::Cancelled)));

    // The task is gone from the name service and its operators are closed
    assert!(cluster
        .ns
        .lookup(&TaskId::new("task-1"))
        .await
        .unwrap()
        .is_none());
    let err = leaf
        .group("g")
        .unwrap()
        .operator::<i32>("bcast")
        .unwrap()
        .receive_from_parent()
        .await
        .unwrap_err();
    assert!(matches!(err, GroupCommError::Closed));
}

#[tokio::test]
async fn message_from_unlisted_peer_is_rejected() {
    let cluster = Cluster::new();
    let root = build_task(
        &cluster,
        "task-0",
        vec![op_config(
            "bcast",
            OperatorKind::Broadcast,
            "task-0",
            "task-0",
            &["task-1"],
        )],
    )
    .await;
    // The intruder claims task-0 as its parent, but task-0 does not list it
    let intruder = build_task(
        &cluster,
        "task-9",
        vec![op_config("bcast", OperatorKind::Broadcast, "task-9", "task-0", &[])],
    )
    .await;
    cluster
        .ns
        .register(TaskId::new("task-1"), Endpoint::new("inproc://task-1"))
        .await
        .unwrap();
    root.initialize().await.unwrap();
    intruder.initialize().await.unwrap();

    let err = intruder
        .group("g")
        .unwrap()
        .operator::<i32>("bcast")
        .unwrap()
        .send_to_parent(&1, MessageKind::Data)
        .await
        .unwrap_err();
    assert!(matches!(err, GroupCommError::UnknownPeer(_)));
}

#[tokio::test]
async fn accessor_validates_kind_and_element_type() {
    let cluster = Cluster::new();
    let root = build_task(
        &cluster,
        "task-0",
        vec![op_config(
            "bcast",
            OperatorKind::Broadcast,
            "task-0",
            "task-0",
            &["task-1"],
        )],
    )
    .await;
    let group = root.group("g").unwrap();

    // Wrong collective kind
    assert!(matches!(
        group.reduce_receiver::<i32, _>("bcast", |values: Vec<i32>| values
            .into_iter()
            .sum::<i32>()),
        Err(GroupCommError::InvalidArgument(_))
    ));

    // Wrong element type
    assert!(matches!(
        group.broadcast_sender::<String>("bcast"),
        Err(GroupCommError::InvalidArgument(_))
    ));

    // Unknown operator name
    assert!(matches!(
        group.broadcast_sender::<i32>("missing"),
        Err(GroupCommError::UnknownOperator { .. })
    ));
}

#[tokio::test]
async fn builder_rejects_inconsistent_configuration() {
    let cluster = Cluster::new();

    // Operator configured for a different task
    let result = GroupCommClient::builder(TaskId::new("task-0"), Endpoint::new("inproc://task-0"))
        .name_service(cluster.ns.clone())
        .transport(Arc::new(cluster.transport.clone()))
        .add_operator::<i32, _>(
            op_config("bcast", OperatorKind::Broadcast, "task-1", "task-0", &[]),
            CborCodec::default(),
        )
        .build();
    assert!(matches!(result, Err(GroupCommError::InvalidArgument(_))));

    // Duplicate (group, operator) key
    let result = GroupCommClient::builder(TaskId::new("task-0"), Endpoint::new("inproc://task-0"))
        .name_service(cluster.ns.clone())
        .transport(Arc::new(cluster.transport.clone()))
        .add_operator::<i32, _>(
            op_config("bcast", OperatorKind::Broadcast, "task-0", "task-0", &["task-1"]),
            CborCodec::default(),
        )
        .add_operator::<i32, _>(
            op_config("bcast", OperatorKind::Broadcast, "task-0", "task-0", &["task-1"]),
            CborCodec::default(),
        )
        .build();
    assert!(matches!(result, Err(GroupCommError::InvalidArgument(_))));

    // Missing transport
    let result = GroupCommClient::builder(TaskId::new("task-0"), Endpoint::new("inproc://task-0"))
        .name_service(cluster.ns.clone())
        .build();
    assert!(matches!(result, Err(GroupCommError::InvalidArgument(_))));
}

#[tokio::test]
async fn operator_config_json_drives_a_working_operator() -> anyhow::Result<()> {
    let cluster = Cluster::new();

    let root_json = r#"{
        "group_name": "g",
        "operator_name": "bcast",
        "kind": "broadcast",
        "self_task_id": "task-0",
        "driver_id": "driver",
        "root_task_id": "task-0",
        "child_task_ids": ["task-1"]
    }"#;
    let leaf_json = r#"{
        "group_name": "g",
        "operator_name": "bcast",
        "kind": "broadcast",
        "self_task_id": "task-1",
        "driver_id": "driver",
        "root_task_id": "task-0"
    }"#;

    let root = build_task(
        &cluster,
        "task-0",
        vec![OperatorConfig::from_json(root_json)?],
    )
    .await;
    let leaf = build_task(
        &cluster,
        "task-1",
        vec![OperatorConfig::from_json(leaf_json)?],
    )
    .await;
    root.initialize().await?;
    leaf.initialize().await?;

    let group = root.group("g").expect("group bound for root");
    group.broadcast_sender::<i32>("bcast")?.send(&11).await?;

    let received = leaf
        .group("g")
        .expect("group bound for leaf")
        .broadcast_receiver::<i32>("bcast")?
        .receive()
        .await?;
    assert_eq!(received, 11);
    Ok(())
}

#[tokio::test]
async fn group_comm_config_json_drives_the_builder() -> anyhow::Result<()> {
    let cluster = Cluster::new();

    // Task-wide document covering two groups, as the driver would serialize it
    let root_json = r#"{
        "task_id": "task-0",
        "groups": [
            {
                "group_name": "g",
                "operators": [{
                    "group_name": "g",
                    "operator_name": "bcast",
                    "kind": "broadcast",
                    "self_task_id": "task-0",
                    "driver_id": "driver",
                    "root_task_id": "task-0",
                    "child_task_ids": ["task-1"]
                }]
            },
            {
                "group_name": "h",
                "operators": [{
                    "group_name": "h",
                    "operator_name": "sum",
                    "kind": "reduce",
                    "self_task_id": "task-0",
                    "driver_id": "driver",
                    "root_task_id": "task-0",
                    "child_task_ids": ["task-1"]
                }]
            }
        ]
    }"#;
    let config = GroupCommConfig::from_json(root_json)?;
    config.validate()?;

    let id = config.task_id.clone();
    let endpoint = Endpoint::new("inproc://task-0");
    cluster.ns.register(id.clone(), endpoint.clone()).await?;
    let mut builder = GroupCommClient::builder(id.clone(), endpoint)
        .name_service(cluster.ns.clone())
        .transport(Arc::new(cluster.transport.clone()));
    for operator in config.iter_operators() {
        builder = builder.add_operator::<i32, _>(operator.clone(), CborCodec::default());
    }
    let root = Arc::new(builder.build()?);
    cluster.transport.attach(id, root.router());

    let leaf = build_task(
        &cluster,
        "task-1",
        vec![
            op_config("bcast", OperatorKind::Broadcast, "task-1", "task-0", &[]),
            {
                let mut sum = op_config("sum", OperatorKind::Reduce, "task-1", "task-0", &[]);
                sum.group_name = "h".to_string();
                sum
            },
        ],
    )
    .await;
    root.initialize().await?;
    leaf.initialize().await?;

    let mut names = root.group_names();
    names.sort_unstable();
    assert_eq!(names, vec!["g", "h"]);

    root.group("g")
        .expect("group bound for root")
        .broadcast_sender::<i32>("bcast")?
        .send(&5)
        .await?;
    let received = leaf
        .group("g")
        .expect("group bound for leaf")
        .broadcast_receiver::<i32>("bcast")?
        .receive()
        .await?;
    assert_eq!(received, 5);

    let sum_fn = |values: Vec<i32>| values.into_iter().sum::<i32>();
    leaf.group("h")
        .expect("group bound for leaf")
        .reduce_sender::<i32, _>("sum", sum_fn)?
        .send(21)
        .await?;
    let total = root
        .group("h")
        .expect("group bound for root")
        .reduce_receiver::<i32, _>("sum", sum_fn)?
        .reduce()
        .await?;
    assert_eq!(total, 21);
    Ok(())
}

#[tokio::test]
async fn send_to_unreachable_task_surfaces_transport_error() {
    let cluster = Cluster::new();
    let leaf = build_task(
        &cluster,
        "task-1",
        vec![op_config("bcast", OperatorKind::Broadcast, "task-1", "task-0", &[])],
    )
    .await;
    // The parent is registered in the name service but never attached to the
    // transport, so initialization succeeds and the send fails.
    cluster
        .ns
        .register(TaskId::new("task-0"), Endpoint::new("inproc://task-0"))
        .await
        .unwrap();
    leaf.initialize().await.unwrap();

    let err = leaf
        .group("g")
        .unwrap()
        .operator::<i32>("bcast")
        .unwrap()
        .send_to_parent(&1, MessageKind::Data)
        .await
        .unwrap_err();
    assert!(matches!(err, GroupCommError::Transport(_)));
}
