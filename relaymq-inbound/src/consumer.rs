//! Activation facade tying the engine's pieces together.
//!
//! An [`InboundConsumer`] owns the configuration, the branch registry, the
//! worker pool, and the dispatcher for one activated endpoint. Queue- and
//! topic-specific behavior is expressed as a capability set rather than a
//! type hierarchy: an operation the capability set does not cover fails
//! with a domain-mismatch error instead of being overridden to throw.

use std::sync::Arc;

use tracing::info;

use relaymq_core::{InboundMessage, RelayError, Result};

use crate::acknowledge::MessageAcknowledger;
use crate::broker::BrokerTransactionService;
use crate::config::InboundConfig;
use crate::dispatcher::DeliveryDispatcher;
use crate::endpoint::EndpointFactory;
use crate::pool::WorkerPool;
use crate::registry::BranchRegistry;

/// What a consumer's destination domain supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerCapabilities {
    durable_subscriptions: bool,
    browsing: bool,
}

impl ConsumerCapabilities {
    /// Capabilities of a queue consumer: browsable, no durable
    /// subscriptions.
    pub fn queue() -> Self {
        Self {
            durable_subscriptions: false,
            browsing: true,
        }
    }

    /// Capabilities of a topic consumer: durable subscriptions, no browsing.
    pub fn topic() -> Self {
        Self {
            durable_subscriptions: true,
            browsing: false,
        }
    }

    /// Capabilities of a unified-domain consumer.
    pub fn unified() -> Self {
        Self {
            durable_subscriptions: true,
            browsing: true,
        }
    }

    /// Returns true if durable subscriptions are supported.
    pub fn supports_durable_subscriptions(&self) -> bool {
        self.durable_subscriptions
    }

    /// Returns true if browsing is supported.
    pub fn supports_browsing(&self) -> bool {
        self.browsing
    }
}

/// Subscription requested by the activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// Plain, non-durable consumption.
    NonDurable,
    /// Durable subscription under the given name.
    Durable(String),
}

/// One activated inbound endpoint: configuration, registry, pool, and
/// dispatcher.
pub struct InboundConsumer {
    config: InboundConfig,
    capabilities: ConsumerCapabilities,
    subscription: SubscriptionMode,
    connection_id: u64,
    broker: Arc<dyn BrokerTransactionService>,
    factory: Arc<dyn EndpointFactory>,
    acknowledger: Arc<dyn MessageAcknowledger>,
    registry: Arc<BranchRegistry>,
    dispatcher: Option<DeliveryDispatcher>,
}

impl InboundConsumer {
    /// Creates a deactivated consumer.
    pub fn new(
        config: InboundConfig,
        capabilities: ConsumerCapabilities,
        connection_id: u64,
        broker: Arc<dyn BrokerTransactionService>,
        factory: Arc<dyn EndpointFactory>,
        acknowledger: Arc<dyn MessageAcknowledger>,
    ) -> Self {
        Self {
            config,
            capabilities,
            subscription: SubscriptionMode::NonDurable,
            connection_id,
            broker,
            factory,
            acknowledger,
            registry: Arc::new(BranchRegistry::new()),
            dispatcher: None,
        }
    }

    /// Sets the subscription mode. Validated at activation.
    pub fn with_subscription(mut self, subscription: SubscriptionMode) -> Self {
        self.subscription = subscription;
        self
    }

    /// Returns the consumer's capability set.
    pub fn capabilities(&self) -> ConsumerCapabilities {
        self.capabilities
    }

    /// Returns the branch registry shared by this consumer's workers.
    pub fn registry(&self) -> &Arc<BranchRegistry> {
        &self.registry
    }

    /// Returns the dispatcher, if the consumer has been activated.
    pub fn dispatcher(&self) -> Option<&DeliveryDispatcher> {
        self.dispatcher.as_ref()
    }

    /// Builds the worker pool and dispatcher and starts accepting messages.
    pub async fn activate(&mut self) -> Result<()> {
        if self.dispatcher.is_some() {
            return Err(RelayError::Protocol(
                "consumer is already activated".to_string(),
            ));
        }
        if matches!(self.subscription, SubscriptionMode::Durable(_))
            && !self.capabilities.supports_durable_subscriptions()
        {
            return Err(RelayError::DomainMismatch(
                "durable subscriptions are not supported by this consumer's domain".to_string(),
            ));
        }

        let pool = WorkerPool::new(
            self.config.clone(),
            self.connection_id,
            Arc::clone(&self.broker),
            Arc::clone(&self.factory),
            Arc::clone(&self.acknowledger),
            Arc::clone(&self.registry),
        )
        .await;

        self.dispatcher = Some(DeliveryDispatcher::new(
            Arc::new(pool),
            self.config.serialized_delivery(),
        ));
        info!(
            connection = self.connection_id,
            subscription = ?self.subscription,
            "inbound consumer activated"
        );
        Ok(())
    }

    /// Hands a message to the dispatcher.
    pub async fn deliver(&self, message: InboundMessage) -> Result<()> {
        let dispatcher = self.dispatcher.as_ref().ok_or_else(|| {
            RelayError::Protocol("consumer has not been activated".to_string())
        })?;
        dispatcher.deliver(message).await
    }

    /// Fails unless the consumer's domain supports browsing.
    ///
    /// Callers gate queue-browser creation on this instead of downcasting.
    pub fn ensure_browsing_supported(&self) -> Result<()> {
        if self.capabilities.supports_browsing() {
            Ok(())
        } else {
            Err(RelayError::DomainMismatch(
                "browsing is not supported by this consumer's domain".to_string(),
            ))
        }
    }

    /// Drains in-flight deliveries and shuts the pool down.
    pub async fn deactivate(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.drain().await;
            dispatcher.shutdown().await;
            info!(connection = self.connection_id, "inbound consumer deactivated");
        }
    }
}

impl std::fmt::Debug for InboundConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundConsumer")
            .field("connection_id", &self.connection_id)
            .field("capabilities", &self.capabilities)
            .field("subscription", &self.subscription)
            .field("activated", &self.dispatcher.is_some())
            .finish()
    }
}
