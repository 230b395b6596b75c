// The bridge broker
//
// One `Broker` instance serves every client connection. Each connection is
// identified by its remote address; the wire layer calls these methods
// with parsed requests and writes back the returned responses.
//
// The broker owns the session registry (authenticated users, group member
// bindings, lazily created backend producers, per-(partition topic,
// client) readers) and wires the group coordinator into the data plane:
// group status gates fetch/offset traffic, and leave/disconnect/rebalance
// notices tear the affected readers down.

mod fetch;
mod offset;
mod produce;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use crate::backend::{LogClient, LogClientFactory, LogProducer, MessageId, ReaderOptions};
use crate::config::{BrokerConfig, GroupCoordinatorType};
use crate::kafka::constants::{
    ERROR_NONE, ERROR_REBALANCE_IN_PROGRESS, ERROR_SASL_AUTHENTICATION_FAILED,
    ERROR_UNKNOWN_SERVER_ERROR, PARTITION_SUFFIX,
};
use crate::kafka::coordinator::{Group, GroupCoordinator, GroupCoordinatorStandalone};
use crate::kafka::error::{BridgeError, Result};
use crate::kafka::hooks::ServerHooks;
use crate::kafka::messages::{
    HeartbeatReq, HeartbeatResp, JoinGroupReq, JoinGroupResp, LeaveGroupMember, LeaveGroupReq,
    LeaveGroupResp, SaslAuthenticateReq, SyncGroupReq, SyncGroupResp,
};
use crate::kafka::reader::ReaderMetadata;
use crate::kafka::storage::OffsetStore;

/// Authenticated identity bound to a connection address.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub username: String,
    pub client_id: String,
}

/// Group membership bound to a connection address, used to synthesize a
/// LeaveGroup when the connection drops.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub member_id: String,
    pub group_id: String,
    pub group_instance_id: Option<String>,
    pub client_id: String,
}

/// All per-session maps, guarded as one unit.
#[derive(Default)]
struct Registry {
    /// addr -> authenticated user
    users: HashMap<String, UserInfo>,
    /// addr -> joined group member
    members: HashMap<String, MemberInfo>,
    /// addr -> the connection's backend producer
    producers: HashMap<String, Arc<dyn LogProducer>>,
    /// partitioned_topic + client_id -> reader state
    readers: HashMap<String, Arc<ReaderMetadata>>,
    /// partitioned_topic + client_id -> dedicated backend client
    clients: HashMap<String, Arc<dyn LogClient>>,
    /// partitioned_topic -> group currently consuming it
    topic_groups: HashMap<String, String>,
}

/// Kafka-semantics broker over a log backend.
pub struct Broker {
    config: BrokerConfig,
    hooks: Arc<dyn ServerHooks>,
    factory: Arc<dyn LogClientFactory>,
    /// Shared client used for producers and admin lookups
    common_client: Arc<dyn LogClient>,
    coordinator: Arc<dyn GroupCoordinator>,
    offset_store: Arc<dyn OffsetStore>,
    registry: RwLock<Registry>,
    /// Serializes lazy creation of producers and readers
    create_lock: AsyncMutex<()>,
}

impl Broker {
    /// Build a broker: connect the shared backend client, bring the offset
    /// store online and pick the coordinator implementation.
    pub async fn new(
        hooks: Arc<dyn ServerHooks>,
        factory: Arc<dyn LogClientFactory>,
        offset_store: Arc<dyn OffsetStore>,
        config: BrokerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let common_client = factory.connect().await?;
        offset_store.start().await?;
        let coordinator: Arc<dyn GroupCoordinator> = match config.group_coordinator_type {
            GroupCoordinatorType::Standalone => {
                Arc::new(GroupCoordinatorStandalone::new(config.clone()))
            }
            GroupCoordinatorType::Cluster => {
                return Err(BridgeError::InvalidConfig {
                    key: "group_coordinator_type".to_string(),
                    message: "cluster coordination is not implemented".to_string(),
                })
            }
        };
        info!("bridge broker started");
        Ok(Self {
            config,
            hooks,
            factory,
            common_client,
            coordinator,
            offset_store,
            registry: RwLock::new(Registry::default()),
            create_lock: AsyncMutex::new(()),
        })
    }

    /// The group coordinator serving this broker.
    pub fn coordinator(&self) -> &Arc<dyn GroupCoordinator> {
        &self.coordinator
    }

    // ===== SASL =====

    /// Authenticate a connection. On success the user is bound to the
    /// address and data-plane requests become possible.
    pub async fn sasl_auth(&self, addr: SocketAddr, req: SaslAuthenticateReq) -> (bool, i16) {
        let authed = self
            .hooks
            .auth(&req.username, &req.password, &req.client_id)
            .await;
        if !matches!(authed, Ok(true)) {
            warn!(addr = %addr, username = %req.username, "SASL authentication failed");
            return (false, ERROR_SASL_AUTHENTICATION_FAILED);
        }
        let key = addr.to_string();
        let mut registry = self.registry.write();
        registry.users.entry(key).or_insert_with(|| UserInfo {
            username: req.username.clone(),
            client_id: req.client_id.clone(),
        });
        (true, ERROR_NONE)
    }

    pub async fn sasl_auth_topic(
        &self,
        _addr: SocketAddr,
        req: &SaslAuthenticateReq,
        topic: &str,
        permission: &str,
    ) -> (bool, i16) {
        let authed = self
            .hooks
            .auth_topic(&req.username, &req.password, &req.client_id, topic, permission)
            .await;
        if !matches!(authed, Ok(true)) {
            return (false, ERROR_SASL_AUTHENTICATION_FAILED);
        }
        (true, ERROR_NONE)
    }

    pub async fn sasl_auth_consumer_group(
        &self,
        _addr: SocketAddr,
        req: &SaslAuthenticateReq,
        consumer_group: &str,
    ) -> (bool, i16) {
        let authed = self
            .hooks
            .auth_topic_group(&req.username, &req.password, &req.client_id, consumer_group)
            .await;
        if !matches!(authed, Ok(true)) {
            return (false, ERROR_SASL_AUTHENTICATION_FAILED);
        }
        (true, ERROR_NONE)
    }

    // ===== Consumer Groups =====

    pub async fn group_join(&self, addr: SocketAddr, req: JoinGroupReq) -> JoinGroupResp {
        let user = match self.user_info(&addr) {
            Some(user) => user,
            None => {
                error!(addr = %addr, group = %req.group_id, "join from unauthenticated connection");
                return JoinGroupResp {
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    member_id: req.member_id,
                    generation_id: -1,
                    ..Default::default()
                };
            }
        };
        info!(addr = %addr, group = %req.group_id, member = %req.member_id, "joining group");
        let resp = self
            .coordinator
            .handle_join_group(
                &user.username,
                &req.group_id,
                &req.member_id,
                &req.client_id,
                &req.protocol_type,
                req.session_timeout_ms,
                req.protocols,
            )
            .await;
        let member_info = MemberInfo {
            member_id: resp.member_id.clone(),
            group_id: req.group_id,
            group_instance_id: req.group_instance_id,
            client_id: req.client_id,
        };
        self.registry
            .write()
            .members
            .insert(addr.to_string(), member_info);
        resp
    }

    pub async fn group_sync(&self, addr: SocketAddr, req: SyncGroupReq) -> SyncGroupResp {
        let user = match self.user_info(&addr) {
            Some(user) => user,
            None => {
                error!(addr = %addr, group = %req.group_id, "sync from unauthenticated connection");
                return SyncGroupResp {
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    ..Default::default()
                };
            }
        };
        info!(addr = %addr, group = %req.group_id, member = %req.member_id, "syncing group");
        let mut resp = self
            .coordinator
            .handle_sync_group(
                &user.username,
                &req.group_id,
                &req.member_id,
                req.generation_id,
                req.assignments,
            )
            .await;
        resp.protocol_type = req.protocol_type;
        resp.protocol_name = req.protocol_name;
        resp
    }

    pub async fn heart_beat(&self, addr: SocketAddr, req: HeartbeatReq) -> HeartbeatResp {
        let user = match self.user_info(&addr) {
            Some(user) => user,
            None => {
                error!(addr = %addr, "heartbeat from unauthenticated connection");
                return HeartbeatResp {
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                };
            }
        };
        let resp = self
            .coordinator
            .handle_heartbeat(&user.username, &req.group_id, &req.member_id)
            .await;
        if resp.error_code == ERROR_REBALANCE_IN_PROGRESS {
            // the member is about to rejoin and may be assigned elsewhere;
            // release its readers now
            if let Some(group) = self.coordinator.get_group(&user.username, &req.group_id) {
                self.teardown_group_readers(&group, &req.client_id, false)
                    .await;
            }
        }
        resp
    }

    pub async fn group_leave(&self, addr: SocketAddr, req: LeaveGroupReq) -> LeaveGroupResp {
        let user = match self.user_info(&addr) {
            Some(user) => user,
            None => {
                error!(addr = %addr, group = %req.group_id, "leave from unauthenticated connection");
                return LeaveGroupResp {
                    error_code: ERROR_UNKNOWN_SERVER_ERROR,
                    members: Vec::new(),
                };
            }
        };
        info!(addr = %addr, group = %req.group_id, "leaving group");
        let resp = self
            .coordinator
            .handle_leave_group(&user.username, &req.group_id, req.members)
            .await;
        let group = match self.coordinator.get_group(&user.username, &req.group_id) {
            Some(group) => group,
            None => {
                return resp;
            }
        };
        self.teardown_group_readers(&group, &req.client_id, true).await;
        resp
    }

    // ===== Metadata =====

    pub async fn partition_num(&self, addr: SocketAddr, kafka_topic: &str) -> Result<i32> {
        let user = self
            .user_info(&addr)
            .ok_or_else(|| BridgeError::UnauthenticatedAddress {
                addr: addr.to_string(),
            })?;
        self.hooks
            .partition_count(&user.username, kafka_topic)
            .await
    }

    pub async fn topic_list(&self, addr: SocketAddr) -> Result<Vec<String>> {
        let user = self
            .user_info(&addr)
            .ok_or_else(|| BridgeError::UnauthenticatedAddress {
                addr: addr.to_string(),
            })?;
        self.hooks.list_topics(&user.username).await
    }

    // ===== Lifecycle =====

    /// Connection dropped: close the producer, synthesize a LeaveGroup for
    /// the bound member and clear the session.
    pub async fn disconnect(&self, addr: SocketAddr) {
        info!(addr = %addr, "lost connection");
        let key = addr.to_string();
        let (member, producer) = {
            let registry = self.registry.read();
            (
                registry.members.get(&key).cloned(),
                registry.producers.get(&key).cloned(),
            )
        };
        if let Some(producer) = producer {
            producer.close().await;
            self.registry.write().producers.remove(&key);
        }
        let member = match member {
            Some(member) => member,
            None => {
                self.registry.write().users.remove(&key);
                return;
            }
        };
        let req = LeaveGroupReq {
            client_id: member.client_id.clone(),
            group_id: member.group_id.clone(),
            members: vec![LeaveGroupMember {
                member_id: member.member_id,
                group_instance_id: member.group_instance_id,
            }],
        };
        let resp = self.group_leave(addr, req).await;
        if resp.error_code != ERROR_NONE {
            warn!(addr = %addr, code = resp.error_code, "synthesized leave group failed");
        }
        // leave group needs the user binding, remove it last
        let mut registry = self.registry.write();
        registry.users.remove(&key);
        registry.members.remove(&key);
    }

    /// Shut the broker down: offset store first, then every backend handle.
    pub async fn close(&self) {
        self.offset_store.close();
        let (clients, producers) = {
            let mut registry = self.registry.write();
            (
                registry.clients.drain().map(|(_, c)| c).collect::<Vec<_>>(),
                registry
                    .producers
                    .drain()
                    .map(|(_, p)| p)
                    .collect::<Vec<_>>(),
            )
        };
        for client in clients {
            client.close().await;
        }
        for producer in producers {
            producer.close().await;
        }
        self.common_client.close().await;
    }

    // ===== Shared helpers =====

    fn user_info(&self, addr: &SocketAddr) -> Option<UserInfo> {
        self.registry.read().users.get(&addr.to_string()).cloned()
    }

    fn reader_key(partitioned_topic: &str, client_id: &str) -> String {
        format!("{}{}", partitioned_topic, client_id)
    }

    /// Backend partition topic for (tenant, kafka topic, partition).
    async fn partitioned_topic(
        &self,
        user: &UserInfo,
        kafka_topic: &str,
        partition_id: i32,
    ) -> Result<String> {
        let backend_topic = self.hooks.backend_topic(&user.username, kafka_topic).await?;
        Ok(format!(
            "{}{}{}",
            backend_topic, PARTITION_SUFFIX, partition_id
        ))
    }

    /// Open (or reuse) the dedicated backend client for a reader key and
    /// create the reader positioned at `start_message_id`.
    async fn create_reader(
        &self,
        partitioned_topic: &str,
        subscription_name: &str,
        start_message_id: MessageId,
        client_id: &str,
    ) -> Result<Box<dyn crate::backend::LogReader>> {
        let key = Self::reader_key(partitioned_topic, client_id);
        let client = { self.registry.read().clients.get(&key).cloned() };
        let client = match client {
            Some(client) => client,
            None => {
                let client = self.factory.connect().await?;
                self.registry.write().clients.insert(key, client.clone());
                client
            }
        };
        client
            .create_reader(ReaderOptions {
                topic: partitioned_topic.to_string(),
                name: subscription_name.to_string(),
                start_message_id,
                receive_queue_size: self.config.consumer_receive_queue_size,
            })
            .await
    }

    /// Close and unregister every reader this client holds on the group's
    /// partition topics. `unbind_topic_group` additionally forgets the
    /// topic -> group binding (LeaveGroup does, a rebalance notice does not).
    async fn teardown_group_readers(
        &self,
        group: &Arc<Group>,
        client_id: &str,
        unbind_topic_group: bool,
    ) {
        for topic in group.partitioned_topics() {
            let key = Self::reader_key(&topic, client_id);
            let (reader, client) = {
                let mut registry = self.registry.write();
                if unbind_topic_group {
                    registry.topic_groups.remove(&topic);
                }
                (registry.readers.remove(&key), registry.clients.remove(&key))
            };
            if let Some(metadata) = reader {
                metadata.reader.lock().await.close().await;
                info!(topic = %topic, client = client_id, "closed reader");
            }
            if let Some(client) = client {
                client.close().await;
            }
        }
    }
}
