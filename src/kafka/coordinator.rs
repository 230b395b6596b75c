//! Consumer group coordinator
//!
//! Implements Kafka's group membership protocol: JoinGroup rendezvous,
//! SyncGroup assignment distribution, Heartbeat liveness probing and
//! LeaveGroup teardown.
//!
//! # State Machine
//!
//! ```text
//! Empty -> PreparingRebalance -> CompletingRebalance -> Stable
//!   ^                                                     |
//!   +--------------------- (all members leave) -----------+
//! ```
//!
//! A rebalance is driven by whichever caller wins the `can_rebalance`
//! latch: it flips the latch, holds the group's coordination lock through
//! the initial join delay (so concurrent joiners coalesce into a single
//! generation bump), then bumps the generation and reopens the latch.
//! Everyone else polls the status until the driver finishes.
//!
//! The join and sync phases are rendezvous barriers expressed through
//! per-member generation counters: a phase completes when every member's
//! counter has caught up with the group's generation. All waits are
//! bounded by the group's session timeout; a brand-new member whose join
//! wait times out is evicted so no phantom membership survives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::kafka::constants::{
    EMPTY_MEMBER_ID, ERROR_COORDINATOR_LOAD_IN_PROGRESS, ERROR_GROUP_MAX_SIZE_REACHED,
    ERROR_INVALID_GROUP_ID, ERROR_MEMBER_ID_REQUIRED, ERROR_NONE, ERROR_REBALANCE_IN_PROGRESS,
    ERROR_UNKNOWN_MEMBER_ID,
};
use crate::kafka::error::{BridgeError, Result};
use crate::kafka::messages::{
    GroupAssignment, GroupProtocol, HeartbeatResp, JoinGroupResp, JoinedMember, LeaveGroupMember,
    LeaveGroupResp, SyncGroupResp,
};

/// Consumer group lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    /// No members
    Empty,
    /// A rebalance has been announced; members are rejoining
    PreparingRebalance,
    /// Join barrier cleared; waiting for the leader's assignments
    CompletingRebalance,
    /// All members joined and synced for the current generation
    Stable,
    /// Group is being removed
    Dead,
}

/// One consumer's state within a group
#[derive(Debug, Clone)]
pub struct MemberMetadata {
    pub member_id: String,
    pub client_id: String,
    pub protocol_type: String,
    /// Offered (assignor name -> subscription metadata) pairs
    pub protocols: HashMap<String, Bytes>,
    /// Metadata blob for the group's supported protocol
    pub metadata: Bytes,
    /// Assignment delivered by the leader's SyncGroup
    pub assignment: Bytes,
    /// Join barrier progress: equals the group generation once this
    /// member's JoinGroup for that generation has been observed
    pub join_generation_id: i32,
    /// Sync barrier progress: equals `join_generation_id` once this
    /// member's SyncGroup has been observed
    pub sync_generation_id: i32,
}

/// Member map plus leader identity, guarded as one unit.
#[derive(Default)]
struct MemberTable {
    members: HashMap<String, MemberMetadata>,
    leader: String,
}

/// Generation state guarded by the group coordination lock. The rebalance
/// driver deliberately holds the lock across the join delay, which
/// serializes generation bumps and makes generation reads wait the delay
/// out.
struct CoordState {
    generation_id: i32,
    supported_protocol: String,
    /// Protocol table recorded when the assignor was elected
    group_protocols: HashMap<String, Bytes>,
}

/// One consumer group, keyed by (tenant username, group id).
pub struct Group {
    group_id: String,
    protocol_type: String,
    /// Captured from the first joining member; bounds every barrier wait
    session_timeout_ms: i32,
    coord: AsyncMutex<CoordState>,
    /// Rebalance latch: true while the next rebalance still needs a
    /// driver. Atomic so concurrent joiners can observe an in-flight
    /// delay window without touching the coordination lock the driver
    /// sleeps on.
    can_rebalance: AtomicBool,
    status: RwLock<GroupStatus>,
    members: RwLock<MemberTable>,
    /// Backend partition topics the group has fetched from, kept for
    /// reader teardown on leave/rebalance
    partitioned_topics: RwLock<Vec<String>>,
    /// Serializes admission of brand-new members
    new_member_lock: AsyncMutex<()>,
}

impl Group {
    fn new(group_id: String, protocol_type: String, session_timeout_ms: i32) -> Self {
        Self {
            group_id,
            protocol_type,
            session_timeout_ms,
            coord: AsyncMutex::new(CoordState {
                generation_id: 0,
                supported_protocol: String::new(),
                group_protocols: HashMap::new(),
            }),
            can_rebalance: AtomicBool::new(true),
            status: RwLock::new(GroupStatus::Empty),
            members: RwLock::new(MemberTable::default()),
            partitioned_topics: RwLock::new(Vec::new()),
            new_member_lock: AsyncMutex::new(()),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn protocol_type(&self) -> &str {
        &self.protocol_type
    }

    pub fn session_timeout_ms(&self) -> i32 {
        self.session_timeout_ms
    }

    pub fn status(&self) -> GroupStatus {
        *self.status.read()
    }

    fn set_status(&self, status: GroupStatus) {
        *self.status.write() = status;
    }

    /// Current generation. Blocks while a rebalance driver holds the
    /// coordination lock through the join delay.
    pub async fn generation_id(&self) -> i32 {
        self.coord.lock().await.generation_id
    }

    pub async fn supported_protocol(&self) -> String {
        self.coord.lock().await.supported_protocol.clone()
    }

    pub fn members_len(&self) -> usize {
        self.members.read().members.len()
    }

    pub fn has_member(&self, member_id: &str) -> bool {
        self.members.read().members.contains_key(member_id)
    }

    pub fn leader(&self) -> String {
        self.members.read().leader.clone()
    }

    fn set_leader(&self, member_id: &str) {
        self.members.write().leader = member_id.to_string();
    }

    pub fn is_leader(&self, member_id: &str) -> bool {
        self.members.read().leader == member_id
    }

    fn delete_member(&self, member_id: &str) {
        self.members.write().members.remove(member_id);
    }

    pub fn member_assignment(&self, member_id: &str) -> Bytes {
        self.members
            .read()
            .members
            .get(member_id)
            .map(|m| m.assignment.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the backend partition topics the group reads from.
    pub fn partitioned_topics(&self) -> Vec<String> {
        self.partitioned_topics.read().clone()
    }

    pub(crate) fn add_partitioned_topic(&self, partitioned_topic: &str) {
        let mut topics = self.partitioned_topics.write();
        if !topics.iter().any(|t| t.eq_ignore_ascii_case(partitioned_topic)) {
            topics.push(partitioned_topic.to_string());
        }
    }
}

/// Group protocol operations the broker depends on.
///
/// Standalone keeps state in process memory; a clustered implementation
/// would shard groups across brokers behind the same interface.
#[async_trait]
pub trait GroupCoordinator: Send + Sync {
    async fn handle_join_group(
        &self,
        username: &str,
        group_id: &str,
        member_id: &str,
        client_id: &str,
        protocol_type: &str,
        session_timeout_ms: i32,
        protocols: Vec<GroupProtocol>,
    ) -> JoinGroupResp;

    async fn handle_sync_group(
        &self,
        username: &str,
        group_id: &str,
        member_id: &str,
        generation_id: i32,
        assignments: Vec<GroupAssignment>,
    ) -> SyncGroupResp;

    async fn handle_heartbeat(&self, username: &str, group_id: &str, member_id: &str)
        -> HeartbeatResp;

    async fn handle_leave_group(
        &self,
        username: &str,
        group_id: &str,
        members: Vec<LeaveGroupMember>,
    ) -> LeaveGroupResp;

    /// Read-only lookup used by data-plane handlers to gate on status.
    fn get_group(&self, username: &str, group_id: &str) -> Option<Arc<Group>>;
}

/// In-process coordinator serving all groups of one broker.
pub struct GroupCoordinatorStandalone {
    config: BrokerConfig,
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl GroupCoordinatorStandalone {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            groups: RwLock::new(HashMap::new()),
        }
    }

    fn group_key(username: &str, group_id: &str) -> String {
        format!("{}{}", username, group_id)
    }

    fn join_error_resp(member_id: &str, error_code: i16) -> JoinGroupResp {
        JoinGroupResp {
            member_id: member_id.to_string(),
            error_code,
            ..Default::default()
        }
    }

    fn join_params_check(&self, group_id: &str, session_timeout_ms: i32) -> Result<()> {
        if group_id.is_empty() {
            return Err(BridgeError::invalid_group(group_id));
        }
        if session_timeout_ms < self.config.group_min_session_timeout_ms
            || session_timeout_ms > self.config.group_max_session_timeout_ms
        {
            return Err(BridgeError::InvalidSessionTimeout {
                session_timeout_ms,
                min_ms: self.config.group_min_session_timeout_ms,
                max_ms: self.config.group_max_session_timeout_ms,
            });
        }
        Ok(())
    }

    async fn join_protocol_check(
        &self,
        group: &Group,
        protocol_type: &str,
        protocols: &[GroupProtocol],
    ) -> Result<()> {
        if group.status() != GroupStatus::Empty {
            if group.protocol_type() != protocol_type {
                return Err(BridgeError::inconsistent_protocol(
                    group.group_id(),
                    format!(
                        "protocol type '{}' does not match the group's '{}'",
                        protocol_type,
                        group.protocol_type()
                    ),
                ));
            }
            if !self.supports_protocols(group, protocols).await {
                return Err(BridgeError::inconsistent_protocol(
                    group.group_id(),
                    "member protocols not supported by the group",
                ));
            }
        }
        if group.status() == GroupStatus::Empty {
            if protocol_type.is_empty() {
                return Err(BridgeError::inconsistent_protocol(
                    group.group_id(),
                    "empty protocol type",
                ));
            }
            if protocols.is_empty() {
                return Err(BridgeError::inconsistent_protocol(
                    group.group_id(),
                    "empty protocol list",
                ));
            }
        }
        Ok(())
    }

    /// Admission policy: whether a member's protocol set is acceptable for
    /// a non-empty group. Deliberately permissive; the rebalance driven by
    /// `match_protocols` handles genuine changes.
    async fn supports_protocols(&self, _group: &Group, _protocols: &[GroupProtocol]) -> bool {
        true
    }

    /// Whether the offered protocol list equals the table recorded when
    /// the group's assignor was elected.
    async fn match_protocols(&self, group: &Group, protocols: &[GroupProtocol]) -> bool {
        let coord = group.coord.lock().await;
        if coord.group_protocols.len() != protocols.len() {
            return false;
        }
        protocols
            .iter()
            .all(|p| coord.group_protocols.get(&p.name) == Some(&p.metadata))
    }

    /// Elect the group's assignor from the first member's offered list.
    async fn vote(&self, group: &Group, protocols: &[GroupProtocol]) {
        let mut coord = group.coord.lock().await;
        if let Some(first) = protocols.first() {
            coord.supported_protocol = first.name.clone();
        }
        coord.group_protocols = protocols
            .iter()
            .map(|p| (p.name.clone(), p.metadata.clone()))
            .collect();
    }

    /// Announce a rebalance and either drive the delay window (latch won)
    /// or wait for the current driver to finish. Joiners arriving while
    /// the driver sleeps lose the latch, poll the status flip and land in
    /// the same generation bump.
    async fn do_rebalance(&self, group: &Group, rebalance_delay_ms: i32) -> Result<()> {
        group.set_status(GroupStatus::PreparingRebalance);
        if group.can_rebalance.swap(false, Ordering::SeqCst) {
            // Coordination lock intentionally held across the delay:
            // generation reads wait the window out, so there is at most
            // one bump in flight.
            let mut coord = group.coord.lock().await;
            info!(
                group = group.group_id(),
                generation = coord.generation_id,
                "preparing to rebalance group"
            );
            sleep(Duration::from_millis(rebalance_delay_ms as u64)).await;
            group.set_status(GroupStatus::CompletingRebalance);
            coord.generation_id += 1;
            group.can_rebalance.store(true, Ordering::SeqCst);
            info!(
                group = group.group_id(),
                generation = coord.generation_id,
                "completing rebalance with new generation"
            );
            Ok(())
        } else {
            // Latch lost: a driver is mid-window. Besides the status flip,
            // a reopened latch also means the driver finished (our own
            // Preparing write may have landed after its Completing write
            // and hidden the flip).
            let start = Instant::now();
            loop {
                if group.status() == GroupStatus::CompletingRebalance
                    || group.members_len() == 0
                    || group.can_rebalance.load(Ordering::SeqCst)
                {
                    return Ok(());
                }
                if start.elapsed().as_millis() >= group.session_timeout_ms() as u128 {
                    return Err(BridgeError::barrier_timeout(group.group_id(), "rebalance"));
                }
                sleep(Duration::from_millis(self.config.rebalance_tick_ms as u64)).await;
            }
        }
    }

    /// Poll until the group reaches `target` status or empties out.
    async fn awaiting_rebalance(&self, group: &Group, target: GroupStatus) -> Result<()> {
        let start = Instant::now();
        loop {
            if group.status() == target || group.members_len() == 0 {
                return Ok(());
            }
            if start.elapsed().as_millis() >= group.session_timeout_ms() as u128 {
                return Err(BridgeError::barrier_timeout(group.group_id(), "rebalance"));
            }
            sleep(Duration::from_millis(self.config.rebalance_tick_ms as u64)).await;
        }
    }

    /// Serialized admission of a member not currently in the group. A
    /// newcomer hitting a group whose sync phase is in flight first waits
    /// for Stable, then pauses one extra tick so the sync loop has exited;
    /// a newcomer arriving during the join delay window is inserted right
    /// away and coalesces into the pending generation bump.
    async fn add_new_member_and_rebalance(
        &self,
        group: &Group,
        client_id: &str,
        member_id: &str,
        protocol_type: &str,
        protocols: &[GroupProtocol],
    ) -> Result<String> {
        let member_id = {
            let _admission = group.new_member_lock.lock().await;
            if group.members_len() > 0 && group.status() == GroupStatus::CompletingRebalance {
                warn!(
                    group = group.group_id(),
                    "new member waiting for the in-flight sync round"
                );
                let waited = self.awaiting_rebalance(group, GroupStatus::Stable).await;
                sleep(Duration::from_millis(
                    self.config.rebalance_tick_ms as u64 + 100,
                ))
                .await;
                waited?;
            }
            self.admit_member(group, client_id, member_id, protocol_type, protocols)
                .await
        };
        self.do_rebalance(group, self.config.initial_delayed_join_ms)
            .await?;
        Ok(member_id)
    }

    /// Insert a member into the table; the first member of a leaderless
    /// group becomes leader.
    async fn admit_member(
        &self,
        group: &Group,
        client_id: &str,
        member_id: &str,
        protocol_type: &str,
        protocols: &[GroupProtocol],
    ) -> String {
        let member_id = if member_id == EMPTY_MEMBER_ID {
            generate_member_id(client_id)
        } else {
            member_id.to_string()
        };
        let protocol_map: HashMap<String, Bytes> = protocols
            .iter()
            .map(|p| (p.name.clone(), p.metadata.clone()))
            .collect();
        if group.status() == GroupStatus::Empty {
            self.vote(group, protocols).await;
        }
        let supported = group.supported_protocol().await;
        let metadata = protocol_map.get(&supported).cloned().unwrap_or_default();
        {
            let mut table = group.members.write();
            if table.leader.is_empty() {
                table.leader = member_id.clone();
            }
            table.members.insert(
                member_id.clone(),
                MemberMetadata {
                    member_id: member_id.clone(),
                    client_id: client_id.to_string(),
                    protocol_type: protocol_type.to_string(),
                    protocols: protocol_map,
                    metadata,
                    assignment: Bytes::new(),
                    join_generation_id: 0,
                    sync_generation_id: 0,
                },
            );
        }
        member_id
    }

    /// Rejoin of a known member with changed intent: re-elect the assignor
    /// from its offered list, refresh its stored protocols, rebalance.
    async fn update_member_and_rebalance(
        &self,
        group: &Group,
        member_id: &str,
        protocols: &[GroupProtocol],
    ) -> Result<()> {
        self.vote(group, protocols).await;
        let supported = group.supported_protocol().await;
        {
            let mut table = group.members.write();
            if let Some(member) = table.members.get_mut(member_id) {
                member.protocols = protocols
                    .iter()
                    .map(|p| (p.name.clone(), p.metadata.clone()))
                    .collect();
                member.metadata = member.protocols.get(&supported).cloned().unwrap_or_default();
            }
        }
        self.do_rebalance(group, self.config.initial_delayed_join_ms)
            .await
    }

    /// Join barrier: bump this member's join generation each tick and
    /// succeed once every member has caught up with the group generation.
    async fn awaiting_join(
        &self,
        group: &Group,
        member_id: &str,
        session_timeout_ms: i32,
    ) -> Result<()> {
        let start = Instant::now();
        loop {
            let generation_id = group.generation_id().await;
            {
                let mut table = group.members.write();
                let member = table.members.get_mut(member_id).ok_or_else(|| {
                    BridgeError::unknown_member(group.group_id(), member_id)
                })?;
                if member.join_generation_id != generation_id {
                    member.join_generation_id = generation_id;
                }
            }
            if self.check_join_generation(group).await {
                group.set_status(GroupStatus::CompletingRebalance);
                return Ok(());
            }
            if start.elapsed().as_millis() >= session_timeout_ms as u128 {
                return Err(BridgeError::barrier_timeout(group.group_id(), "join"));
            }
            debug!(
                group = group.group_id(),
                member = member_id,
                "waiting for other members to join"
            );
            sleep(Duration::from_millis(self.config.rebalance_tick_ms as u64)).await;
        }
    }

    async fn check_join_generation(&self, group: &Group) -> bool {
        let generation_id = group.generation_id().await;
        let table = group.members.read();
        table
            .members
            .values()
            .all(|m| m.join_generation_id == generation_id)
    }

    /// Sync barrier: succeed once every member's sync generation has
    /// caught up with its join generation.
    async fn awaiting_sync(&self, group: &Group, member_id: &str) -> Result<()> {
        let start = Instant::now();
        loop {
            {
                let table = group.members.read();
                if table
                    .members
                    .values()
                    .all(|m| m.sync_generation_id == m.join_generation_id)
                {
                    return Ok(());
                }
            }
            if start.elapsed().as_millis() >= group.session_timeout_ms() as u128 {
                return Err(BridgeError::barrier_timeout(group.group_id(), "sync"));
            }
            debug!(
                group = group.group_id(),
                member = member_id,
                "waiting for other members to sync"
            );
            sleep(Duration::from_millis(self.config.rebalance_tick_ms as u64)).await;
        }
    }

    /// Elect the first awaker as leader if none is set; return the member
    /// list to the leader and an empty list to everyone else.
    fn leader_members(&self, group: &Group, member_id: &str) -> Vec<JoinedMember> {
        if group.leader().is_empty() {
            group.set_leader(member_id);
        }
        if group.is_leader(member_id) {
            group
                .members
                .read()
                .members
                .values()
                .map(|m| JoinedMember {
                    member_id: m.member_id.clone(),
                    group_instance_id: None,
                    metadata: m.metadata.clone(),
                })
                .collect()
        } else {
            Vec::new()
        }
    }

    async fn join_success_resp(
        &self,
        group: &Group,
        member_id: String,
        members: Vec<JoinedMember>,
    ) -> JoinGroupResp {
        let (generation_id, protocol_name) = {
            let coord = group.coord.lock().await;
            (coord.generation_id, coord.supported_protocol.clone())
        };
        JoinGroupResp {
            error_code: ERROR_NONE,
            generation_id,
            protocol_type: group.protocol_type().to_string(),
            protocol_name,
            leader_id: group.leader(),
            member_id,
            members,
        }
    }
}

#[async_trait]
impl GroupCoordinator for GroupCoordinatorStandalone {
    async fn handle_join_group(
        &self,
        username: &str,
        group_id: &str,
        member_id: &str,
        client_id: &str,
        protocol_type: &str,
        session_timeout_ms: i32,
        protocols: Vec<GroupProtocol>,
    ) -> JoinGroupResp {
        if let Err(e) = self.join_params_check(group_id, session_timeout_ms) {
            warn!(group = group_id, error = %e, "join group params check failed");
            return Self::join_error_resp(member_id, e.error_code());
        }

        let group = {
            let mut groups = self.groups.write();
            groups
                .entry(Self::group_key(username, group_id))
                .or_insert_with(|| {
                    Arc::new(Group::new(
                        group_id.to_string(),
                        protocol_type.to_string(),
                        session_timeout_ms,
                    ))
                })
                .clone()
        };

        if let Err(e) = self.join_protocol_check(&group, protocol_type, &protocols).await {
            warn!(group = group_id, error = %e, "join group protocol check failed");
            return Self::join_error_resp(member_id, e.error_code());
        }

        let num_members = group.members_len();
        if self.config.max_consumers_per_group > 0
            && num_members >= self.config.max_consumers_per_group as usize
        {
            warn!(
                group = group_id,
                member = member_id,
                current = num_members,
                max = self.config.max_consumers_per_group,
                "join group rejected, group is full"
            );
            return Self::join_error_resp(member_id, ERROR_GROUP_MAX_SIZE_REACHED);
        }

        if group.status() == GroupStatus::Dead {
            warn!(group = group_id, member = member_id, "join group rejected, group is dead");
            return Self::join_error_resp(member_id, ERROR_UNKNOWN_MEMBER_ID);
        }

        let is_new = member_id == EMPTY_MEMBER_ID;

        match group.status() {
            GroupStatus::PreparingRebalance => {
                let mut member_id = member_id.to_string();
                if is_new || !group.has_member(&member_id) {
                    member_id = match self
                        .add_new_member_and_rebalance(
                            &group,
                            client_id,
                            &member_id,
                            protocol_type,
                            &protocols,
                        )
                        .await
                    {
                        Ok(id) => id,
                        Err(e) => {
                            warn!(group = group_id, error = %e, "member admission failed");
                            return Self::join_error_resp(
                                &member_id,
                                ERROR_COORDINATOR_LOAD_IN_PROGRESS,
                            );
                        }
                    };
                }
                if let Err(e) = self.awaiting_join(&group, &member_id, session_timeout_ms).await {
                    warn!(group = group_id, member = member_id, error = %e, "join wait failed");
                    if is_new {
                        group.delete_member(&member_id);
                    }
                    return Self::join_error_resp(&member_id, ERROR_COORDINATOR_LOAD_IN_PROGRESS);
                }
                let members = self.leader_members(&group, &member_id);
                self.join_success_resp(&group, member_id, members).await
            }
            GroupStatus::CompletingRebalance => {
                let mut member_id = member_id.to_string();
                if is_new || !group.has_member(&member_id) {
                    member_id = match self
                        .add_new_member_and_rebalance(
                            &group,
                            client_id,
                            &member_id,
                            protocol_type,
                            &protocols,
                        )
                        .await
                    {
                        Ok(id) => id,
                        Err(e) => {
                            warn!(group = group_id, error = %e, "member admission failed");
                            return Self::join_error_resp(
                                &member_id,
                                ERROR_COORDINATOR_LOAD_IN_PROGRESS,
                            );
                        }
                    };
                } else if !self.match_protocols(&group, &protocols).await {
                    // member is rejoining with different metadata
                    if let Err(e) = self
                        .update_member_and_rebalance(&group, &member_id, &protocols)
                        .await
                    {
                        warn!(group = group_id, member = member_id, error = %e, "member update failed");
                        return Self::join_error_resp(
                            &member_id,
                            ERROR_COORDINATOR_LOAD_IN_PROGRESS,
                        );
                    }
                }
                let members = self.leader_members(&group, &member_id);
                if let Err(e) = self.awaiting_join(&group, &member_id, session_timeout_ms).await {
                    warn!(group = group_id, member = member_id, error = %e, "join wait failed");
                    if is_new {
                        group.delete_member(&member_id);
                    }
                    return Self::join_error_resp(&member_id, ERROR_COORDINATOR_LOAD_IN_PROGRESS);
                }
                self.join_success_resp(&group, member_id, members).await
            }
            GroupStatus::Empty | GroupStatus::Stable => {
                let mut member_id = member_id.to_string();
                if is_new || !group.has_member(&member_id) {
                    // admission is serialized so concurrent new members
                    // cannot race an empty group
                    member_id = match self
                        .add_new_member_and_rebalance(
                            &group,
                            client_id,
                            &member_id,
                            protocol_type,
                            &protocols,
                        )
                        .await
                    {
                        Ok(id) => id,
                        Err(e) => {
                            warn!(group = group_id, error = %e, "member admission failed");
                            return Self::join_error_resp(
                                &member_id,
                                ERROR_COORDINATOR_LOAD_IN_PROGRESS,
                            );
                        }
                    };
                } else if group.is_leader(&member_id)
                    || !self.match_protocols(&group, &protocols).await
                {
                    if let Err(e) = self
                        .update_member_and_rebalance(&group, &member_id, &protocols)
                        .await
                    {
                        warn!(group = group_id, member = member_id, error = %e, "member update failed");
                        return Self::join_error_resp(
                            &member_id,
                            ERROR_COORDINATOR_LOAD_IN_PROGRESS,
                        );
                    }
                }
                if let Err(e) = self.awaiting_join(&group, &member_id, session_timeout_ms).await {
                    warn!(group = group_id, member = member_id, error = %e, "join wait failed");
                    if is_new {
                        group.delete_member(&member_id);
                    }
                    return Self::join_error_resp(&member_id, ERROR_COORDINATOR_LOAD_IN_PROGRESS);
                }
                let members = self.leader_members(&group, &member_id);
                self.join_success_resp(&group, member_id, members).await
            }
            GroupStatus::Dead => Self::join_error_resp(member_id, ERROR_UNKNOWN_MEMBER_ID),
        }
    }

    async fn handle_sync_group(
        &self,
        username: &str,
        group_id: &str,
        member_id: &str,
        generation_id: i32,
        assignments: Vec<GroupAssignment>,
    ) -> SyncGroupResp {
        if group_id.is_empty() {
            warn!("sync group rejected, empty group id");
            return SyncGroupResp {
                error_code: ERROR_INVALID_GROUP_ID,
                ..Default::default()
            };
        }
        if member_id.is_empty() {
            warn!(group = group_id, "sync group rejected, empty member id");
            return SyncGroupResp {
                error_code: ERROR_MEMBER_ID_REQUIRED,
                ..Default::default()
            };
        }
        let group = match self.get_group(username, group_id) {
            Some(group) => group,
            None => {
                warn!(group = group_id, "sync group rejected, unknown group");
                return SyncGroupResp {
                    error_code: ERROR_INVALID_GROUP_ID,
                    ..Default::default()
                };
            }
        };
        if !group.has_member(member_id) {
            warn!(group = group_id, member = member_id, "sync group rejected, unknown member");
            return SyncGroupResp {
                error_code: ERROR_UNKNOWN_MEMBER_ID,
                ..Default::default()
            };
        }

        // Note: the caller's generation is not validated against the
        // group's; a stale generation syncs into the current one.
        match group.status() {
            GroupStatus::Empty | GroupStatus::Dead => SyncGroupResp {
                error_code: ERROR_UNKNOWN_MEMBER_ID,
                ..Default::default()
            },
            // a new member may have joined; the caller must rejoin first
            GroupStatus::PreparingRebalance => SyncGroupResp {
                error_code: ERROR_REBALANCE_IN_PROGRESS,
                ..Default::default()
            },
            GroupStatus::CompletingRebalance => {
                if group.is_leader(member_id) {
                    let mut table = group.members.write();
                    for ga in &assignments {
                        debug!(
                            group = group_id,
                            member = %ga.member_id,
                            generation = generation_id,
                            "assignment received from leader"
                        );
                        if let Some(member) = table.members.get_mut(&ga.member_id) {
                            member.assignment = ga.assignment.clone();
                        }
                    }
                }
                {
                    let mut table = group.members.write();
                    if let Some(member) = table.members.get_mut(member_id) {
                        member.sync_generation_id = member.join_generation_id;
                    }
                }
                let waited = self.awaiting_sync(&group, member_id).await;
                if group.is_leader(member_id) {
                    group.set_status(GroupStatus::Stable);
                }
                let assignment = group.member_assignment(member_id);
                if let Err(e) = waited {
                    warn!(group = group_id, member = member_id, error = %e, "sync wait failed");
                    return SyncGroupResp {
                        error_code: ERROR_REBALANCE_IN_PROGRESS,
                        assignment,
                        ..Default::default()
                    };
                }
                if group.is_leader(member_id) {
                    group.set_status(GroupStatus::Stable);
                }
                SyncGroupResp {
                    error_code: ERROR_NONE,
                    assignment,
                    ..Default::default()
                }
            }
            GroupStatus::Stable => SyncGroupResp {
                error_code: ERROR_NONE,
                assignment: group.member_assignment(member_id),
                ..Default::default()
            },
        }
    }

    async fn handle_heartbeat(
        &self,
        username: &str,
        group_id: &str,
        member_id: &str,
    ) -> HeartbeatResp {
        if group_id.is_empty() {
            warn!("heartbeat rejected, empty group id");
            return HeartbeatResp {
                error_code: ERROR_INVALID_GROUP_ID,
            };
        }
        let group = match self.get_group(username, group_id) {
            Some(group) => group,
            None => {
                // groups do not survive a broker restart; tell the client
                // to rebuild its membership
                warn!(group = group_id, "heartbeat for unknown group, requesting rejoin");
                return HeartbeatResp {
                    error_code: ERROR_REBALANCE_IN_PROGRESS,
                };
            }
        };
        if !group.has_member(member_id) {
            warn!(group = group_id, member = member_id, "heartbeat from unknown member");
            return HeartbeatResp {
                error_code: ERROR_REBALANCE_IN_PROGRESS,
            };
        }
        match group.status() {
            GroupStatus::PreparingRebalance
            | GroupStatus::CompletingRebalance
            | GroupStatus::Dead => {
                debug!(group = group_id, "heartbeat while rebalancing");
                HeartbeatResp {
                    error_code: ERROR_REBALANCE_IN_PROGRESS,
                }
            }
            GroupStatus::Empty | GroupStatus::Stable => HeartbeatResp {
                error_code: ERROR_NONE,
            },
        }
    }

    async fn handle_leave_group(
        &self,
        username: &str,
        group_id: &str,
        members: Vec<LeaveGroupMember>,
    ) -> LeaveGroupResp {
        if group_id.is_empty() {
            warn!("leave group rejected, empty group id");
            return LeaveGroupResp {
                error_code: ERROR_INVALID_GROUP_ID,
                members: Vec::new(),
            };
        }
        let group = match self.get_group(username, group_id) {
            Some(group) => group,
            None => {
                warn!(group = group_id, "leave group rejected, unknown group");
                return LeaveGroupResp {
                    error_code: ERROR_INVALID_GROUP_ID,
                    members: Vec::new(),
                };
            }
        };
        for member in &members {
            if group.is_leader(&member.member_id) {
                group.set_leader("");
            }
            group.delete_member(&member.member_id);
            info!(
                group = group_id,
                member = %member.member_id,
                "member left group"
            );
        }
        {
            let mut coord = group.coord.lock().await;
            coord.generation_id += 1;
        }
        if group.members_len() == 0 {
            group.set_status(GroupStatus::Empty);
        } else {
            // any departure invalidates the assignment for everyone else
            group.set_status(GroupStatus::PreparingRebalance);
        }
        LeaveGroupResp {
            error_code: ERROR_NONE,
            members,
        }
    }

    fn get_group(&self, username: &str, group_id: &str) -> Option<Arc<Group>> {
        self.groups
            .read()
            .get(&Self::group_key(username, group_id))
            .cloned()
    }
}

/// Server-generated member id: `<clientId>-<UUIDv4>`
fn generate_member_id(client_id: &str) -> String {
    format!("{}-{}", client_id, Uuid::new_v4())
}
