// Application hook interface
//
// The embedding server supplies one implementation of this trait. It owns
// every policy decision the broker must not hard-code: credential checks,
// tenant-aware topic naming, partition counts, subscription naming and
// admission quotas.

use async_trait::async_trait;

use crate::kafka::error::Result;

/// Callbacks the broker invokes on the embedding application.
#[async_trait]
pub trait ServerHooks: Send + Sync {
    /// Validate SASL credentials for a connecting client.
    async fn auth(&self, username: &str, password: &str, client_id: &str) -> Result<bool>;

    /// Check topic-level access. `permission` is the Kafka operation name
    /// the client asked for ("produce", "consume", "describe").
    async fn auth_topic(
        &self,
        username: &str,
        password: &str,
        client_id: &str,
        topic: &str,
        permission: &str,
    ) -> Result<bool>;

    /// Check consumer-group-level access.
    async fn auth_topic_group(
        &self,
        username: &str,
        password: &str,
        client_id: &str,
        group_id: &str,
    ) -> Result<bool>;

    /// Translate a Kafka topic name into the tenant's backend topic name
    /// (without the partition suffix).
    async fn backend_topic(&self, username: &str, kafka_topic: &str) -> Result<String>;

    /// Number of partitions for a topic as seen by `username`.
    async fn partition_count(&self, username: &str, kafka_topic: &str) -> Result<i32>;

    /// Backend subscription name used for a consumer group's cursors.
    async fn subscription_name(&self, group_id: &str) -> Result<String>;

    /// Topics visible to `username` in Metadata responses.
    async fn list_topics(&self, username: &str) -> Result<Vec<String>>;

    /// Admission control on the fetch path; a denial ends the read loop
    /// for this request and the client retries later.
    fn has_flow_quota(&self, username: &str, partitioned_topic: &str) -> bool;
}
