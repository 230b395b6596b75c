//! Mock implementations for the collaborator traits
//!
//! These let handler tests set expectations on hook and offset-store
//! calls without a backend.

use async_trait::async_trait;
use mockall::mock;

use crate::kafka::error::Result;
use crate::kafka::hooks::ServerHooks;
use crate::kafka::offset::MessageIdPair;
use crate::kafka::storage::OffsetStore;

mock! {
    pub ServerHooks {}

    #[async_trait]
    impl ServerHooks for ServerHooks {
        async fn auth(&self, username: &str, password: &str, client_id: &str) -> Result<bool>;
        async fn auth_topic(
            &self,
            username: &str,
            password: &str,
            client_id: &str,
            topic: &str,
            permission: &str,
        ) -> Result<bool>;
        async fn auth_topic_group(
            &self,
            username: &str,
            password: &str,
            client_id: &str,
            group_id: &str,
        ) -> Result<bool>;
        async fn backend_topic(&self, username: &str, kafka_topic: &str) -> Result<String>;
        async fn partition_count(&self, username: &str, kafka_topic: &str) -> Result<i32>;
        async fn subscription_name(&self, group_id: &str) -> Result<String>;
        async fn list_topics(&self, username: &str) -> Result<Vec<String>>;
        fn has_flow_quota(&self, username: &str, partitioned_topic: &str) -> bool;
    }
}

mock! {
    pub OffsetStore {}

    #[async_trait]
    impl OffsetStore for OffsetStore {
        async fn start(&self) -> Result<()>;
        async fn commit_offset(
            &self,
            username: &str,
            kafka_topic: &str,
            group_id: &str,
            partition_id: i32,
            pair: MessageIdPair,
        ) -> Result<()>;
        async fn acquire_offset(
            &self,
            username: &str,
            kafka_topic: &str,
            group_id: &str,
            partition_id: i32,
        ) -> Result<Option<MessageIdPair>>;
        fn close(&self);
    }
}
