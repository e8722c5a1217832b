//! A small order-acceptance service used across the integration tests.
//!
//! The handler reads an `OrderPlaced` message, records the order in the
//! store and publishes an `InvoiceRequested` message through the outbox, all
//! inside the transaction opened by the pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use reliable_rust::envelope::OutboundMessage;
use reliable_rust::inbound::DeduplicationBehavior;
use reliable_rust::outbox::OutboxWriter;
use reliable_rust::pipeline::{
    ConsumerContext, ConsumerPipeline, HandlerError, JsonDeserializeBehavior, MessageIdBehavior,
    ProducerPipeline, ProducerRoute, TracingBehavior, TransactionBehavior,
};
use reliable_rust::store::InMemoryStore;
use serde::{Deserialize, Serialize};

pub const ORDERS: &str = "orders";
pub const INVOICES: &str = "invoices";
pub const GROUP: &str = "billing";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: String,
    pub total: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRequested {
    pub order_id: String,
    pub amount: i64,
}

pub fn order_message(order_id: &str, total: i64) -> OutboundMessage {
    OutboundMessage::json(
        ORDERS,
        &OrderPlaced {
            order_id: order_id.to_string(),
            total,
        },
    )
    .expect("order serializes")
    .with_key(order_id)
}

/// Producer pipeline that stages messages in the outbox of `store`.
pub fn outbox_pipeline(store: &InMemoryStore) -> ProducerPipeline {
    ProducerPipeline::new(ProducerRoute::Outbox(Arc::new(OutboxWriter::new(
        store.clone(),
    ))))
    .with(MessageIdBehavior)
    .with(TracingBehavior)
}

/// Full consumer pipeline for the order service.
///
/// Orders with a negative total are rejected by the handler. `calls` counts
/// handler invocations.
pub fn order_pipeline(store: &InMemoryStore, calls: Arc<AtomicUsize>) -> ConsumerPipeline {
    let handler_store = store.clone();
    let invoices = outbox_pipeline(store);

    ConsumerPipeline::builder()
        .with(TracingBehavior)
        .with(TransactionBehavior::new(store.clone()))
        .with(DeduplicationBehavior::new(store.clone()))
        .with(JsonDeserializeBehavior)
        .build(move |ctx: &ConsumerContext| -> Result<(), HandlerError> {
            calls.fetch_add(1, Ordering::SeqCst);
            let order: OrderPlaced = ctx.message()?;
            if order.total < 0 {
                return Err(HandlerError::Rejected(format!(
                    "order {} has a negative total",
                    order.order_id
                )));
            }

            let tx = ctx
                .transaction()
                .ok_or_else(|| HandlerError::Rejected("no transaction".into()))?;
            handler_store.put(tx, format!("order:{}", order.order_id), "accepted")?;

            let invoice = OutboundMessage::json(
                INVOICES,
                &InvoiceRequested {
                    order_id: order.order_id.clone(),
                    amount: order.total,
                },
            )?
            .with_key(order.order_id);
            invoices.publish_in(ctx, invoice)?;
            Ok(())
        })
}
