//! Task-wide entry point: owns the inbound router, registers the task with
//! the name service, and hands out per-group clients.

use crate::codec::Codec;
use crate::config::OperatorConfig;
use crate::errors::{GroupCommError, Result};
use crate::group::{CommunicationGroupClient, OperatorEntry};
use crate::id::{Endpoint, TaskId};
use crate::name_service::NameService;
use crate::router::MessageRouter;
use crate::topology::{OperatorTopology, TopologyCore};
use crate::transport::{Sender, Transport};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Task-level container of communication groups.
///
/// One instance exists per task. It registers the task's endpoint with the
/// name service so peers can resolve it, builds one
/// [`CommunicationGroupClient`] per group the driver bound for this task,
/// and routes inbound framed messages to the right `(group, operator)` pair
/// through its [`MessageRouter`].
pub struct GroupCommClient {
    self_id: TaskId,
    endpoint: Endpoint,
    name_service: Arc<dyn NameService>,
    transport: Arc<dyn Transport>,
    router: Arc<MessageRouter>,
    groups: HashMap<String, CommunicationGroupClient>,
    cancel: CancellationToken,
}

impl GroupCommClient {
    /// Start building a client for the task at `endpoint`
    pub fn builder(self_id: TaskId, endpoint: Endpoint) -> GroupCommClientBuilder {
        GroupCommClientBuilder {
            self_id,
            endpoint,
            name_service: None,
            transport: None,
            operators: Vec::new(),
        }
    }

    pub fn self_id(&self) -> &TaskId {
        &self.self_id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The inbound router; transport bindings call
    /// [`MessageRouter::deliver`] on it for every decoded framed message.
    pub fn router(&self) -> Arc<MessageRouter> {
        self.router.clone()
    }

    /// Cancellation token covering every topology owned by this client
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The client for one communication group, if the driver bound it
    pub fn group(&self, name: &str) -> Option<&CommunicationGroupClient> {
        self.groups.get(name)
    }

    /// Names of the groups bound for this task
    pub fn group_names(&self) -> Vec<&str> {
        self.groups.keys().map(String::as_str).collect()
    }

    /// Register this task with the name service and initialize every
    /// operator topology. Blocks until all peers of all operators are
    /// resolvable; no collective may run before this returns.
    pub async fn initialize(&self) -> Result<()> {
        self.name_service
            .register(self.self_id.clone(), self.endpoint.clone())
            .await?;
        for group in self.groups.values() {
            group.initialize().await?;
        }
        info!(
            self_id = %self.self_id,
            groups = self.groups.len(),
            "Group communication client initialized"
        );
        Ok(())
    }

    /// Tear down all topologies, waking parked receives, and unregister from
    /// the name service. Pending messages are dropped (best-effort close).
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for group in self.groups.values() {
            group.close_all();
        }
        if let Err(e) = self.name_service.unregister(&self.self_id).await {
            warn!(self_id = %self.self_id, error = %e, "Name service unregister failed");
        }
        if let Err(e) = self.transport.close().await {
            warn!(self_id = %self.self_id, error = %e, "Transport close failed");
        }
        info!(self_id = %self.self_id, "Group communication client shut down");
    }
}

struct PendingOperator {
    config: OperatorConfig,
    wrap: Box<dyn FnOnce(Arc<TopologyCore>) -> Box<dyn Any + Send + Sync>>,
}

/// Builder wiring driver-provided operator configurations to user codecs.
pub struct GroupCommClientBuilder {
    self_id: TaskId,
    endpoint: Endpoint,
    name_service: Option<Arc<dyn NameService>>,
    transport: Option<Arc<dyn Transport>>,
    operators: Vec<PendingOperator>,
}

impl GroupCommClientBuilder {
    pub fn name_service(mut self, name_service: Arc<dyn NameService>) -> Self {
        self.name_service = Some(name_service);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Register one operator from its driver-provided configuration,
    /// attaching the codec for its element type
    pub fn add_operator<T, C>(mut self, config: OperatorConfig, codec: C) -> Self
    where
        T: Send + Sync + 'static,
        C: Codec<T> + 'static,
    {
        let codec: Arc<dyn Codec<T>> = Arc::new(codec);
        self.operators.push(PendingOperator {
            config,
            wrap: Box::new(move |core| Box::new(OperatorTopology::<T>::new(core, codec))),
        });
        self
    }

    /// Construct the client. Fails on inconsistent configuration: a missing
    /// collaborator, an operator configured for a different task, or a
    /// duplicate `(group, operator)` key.
    pub fn build(self) -> Result<GroupCommClient> {
        let name_service = self.name_service.ok_or_else(|| {
            GroupCommError::InvalidArgument("a name service is required".to_string())
        })?;
        let transport = self.transport.ok_or_else(|| {
            GroupCommError::InvalidArgument("a transport is required".to_string())
        })?;

        let sender = Sender::new(transport.clone());
        let cancel = CancellationToken::new();
        let router = Arc::new(MessageRouter::new());
        let mut groups: HashMap<String, CommunicationGroupClient> = HashMap::new();

        for pending in self.operators {
            let config = &pending.config;
            if config.self_task_id != self.self_id {
                return Err(GroupCommError::InvalidArgument(format!(
                    "operator '{}' is configured for task {}, not {}",
                    config.operator_name, config.self_task_id, self.self_id
                )));
            }

            let core = TopologyCore::new(
                config,
                name_service.clone(),
                sender.clone(),
                cancel.child_token(),
            )?;
            router.register(core.clone())?;
            let typed = (pending.wrap)(core.clone());

            groups
                .entry(config.group_name.clone())
                .or_insert_with(|| CommunicationGroupClient::new(config.group_name.clone()))
                .insert(
                    config.operator_name.clone(),
                    OperatorEntry {
                        kind: config.kind,
                        core,
                        typed,
                    },
                );
        }

        Ok(GroupCommClient {
            self_id: self.self_id,
            endpoint: self.endpoint,
            name_service,
            transport,
            router,
            groups,
            cancel,
        })
    }
}
