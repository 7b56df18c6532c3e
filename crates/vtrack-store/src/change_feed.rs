//! Change notifications via Redis Pub/Sub.
//!
//! Writers publish a signal whenever a job row changes. Readers use it only
//! as a hint to poll early; the store stays authoritative.

use std::pin::Pin;

use futures_util::Stream;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vtrack_models::{JobId, ScopeId};

use crate::error::StoreResult;

/// A "something changed in this scope" hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSignal {
    pub scope: ScopeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

impl ChangeSignal {
    pub fn new(scope: ScopeId) -> Self {
        Self { scope, job_id: None }
    }

    pub fn for_job(scope: ScopeId, job_id: JobId) -> Self {
        Self {
            scope,
            job_id: Some(job_id),
        }
    }

    /// Decode a payload received on `scope`'s channel.
    ///
    /// Payloads that are not a signal still count as a bare wake-up for the
    /// subscribed scope.
    pub fn decode(scope: &ScopeId, payload: &str) -> Self {
        match serde_json::from_str::<ChangeSignal>(payload) {
            Ok(signal) if &signal.scope == scope => signal,
            _ => Self::new(scope.clone()),
        }
    }
}

/// Redis channel carrying [`ChangeSignal`]s.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    client: redis::Client,
}

impl ChangeFeed {
    pub fn new(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Channel name for a scope.
    pub fn channel_name(scope: &ScopeId) -> String {
        format!("vtrack:changes:{}", scope)
    }

    /// Publish a change signal.
    pub async fn publish(&self, signal: &ChangeSignal) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&signal.scope);
        let payload = serde_json::to_string(signal)?;

        debug!("Publishing change signal to {}", channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    /// Subscribe to change signals for a scope.
    pub async fn subscribe(
        &self,
        scope: &ScopeId,
    ) -> StoreResult<Pin<Box<dyn Stream<Item = ChangeSignal> + Send>>> {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = Self::channel_name(scope);

        pubsub.subscribe(&channel).await?;

        let scope = scope.clone();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let scope = scope.clone();
            async move {
                let payload: String = msg.get_payload().ok()?;
                Some(ChangeSignal::decode(&scope, &payload))
            }
        });

        Ok(Box::pin(stream))
    }
}
