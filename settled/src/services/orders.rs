//! Order service.
//!
//! Orders move Pending → Confirmed → Paid → Shipped → Completed, with
//! Cancel admissible before payment and Refund from Paid. Confirmation
//! reserves inventory under distributed locks taken in ascending product-id
//! order; the inventory CAS stays on underneath (defense in depth).

use crate::error::{AppError, AppResult};
use chrono::Utc;
use settle_domain::entities::{order_total, Order};
use settle_domain::events::DomainEvent;
use settle_domain::states::{order_transition, OrderEvent, PaymentStatus};
use settle_kv::LockManager;
use settle_store::{inventory, orders, outbox, payments, users, TxRunner};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Lock TTL for inventory critical sections.
const INVENTORY_LOCK_TTL: Duration = Duration::from_secs(30);

/// One requested line item.
#[derive(Debug, Clone)]
pub struct OrderLine {
    pub product_external_id: Uuid,
    pub quantity: i32,
}

pub struct OrderService {
    runner: TxRunner,
    locks: Arc<dyn LockManager>,
}

impl OrderService {
    pub fn new(runner: TxRunner, locks: Arc<dyn LockManager>) -> Self {
        Self { runner, locks }
    }

    async fn load(&self, order_external_id: Uuid) -> AppResult<Order> {
        orders::get_order_by_external_id(self.runner.pool(), order_external_id)
            .await?
            .ok_or_else(|| AppError::not_found("order", order_external_id))
    }

    pub async fn get(&self, order_external_id: Uuid) -> AppResult<Order> {
        self.load(order_external_id).await
    }

    /// Create an order with price-snapshot items. total_amount is computed
    /// once here and immutable afterwards.
    pub async fn create(
        &self,
        buyer_external_id: Uuid,
        lines: &[OrderLine],
    ) -> AppResult<Order> {
        if lines.is_empty() {
            return Err(AppError::InvalidInput("Order must have at least one item".to_string()));
        }

        let buyer = users::get_user_by_external_id(self.runner.pool(), buyer_external_id)
            .await?
            .ok_or_else(|| AppError::not_found("user", buyer_external_id))?;

        // Resolve products and snapshot prices.
        let mut resolved = Vec::with_capacity(lines.len());
        for line in lines {
            let product =
                inventory::get_product_by_external_id(self.runner.pool(), line.product_external_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("product", line.product_external_id))?;
            resolved.push((product, line.quantity));
        }

        let seller_id = resolved[0].0.seller_id;
        if resolved.iter().any(|(p, _)| p.seller_id != seller_id) {
            return Err(AppError::InvalidInput(
                "All order items must belong to the same seller".to_string(),
            ));
        }

        let total = order_total(
            &resolved.iter().map(|(p, qty)| (*qty, p.price)).collect::<Vec<_>>(),
        )?;

        let order = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let order = orders::create_order(
                        &mut **tx,
                        Uuid::new_v4(),
                        buyer.id,
                        seller_id,
                        total,
                    )
                    .await?;

                    for (product, quantity) in &resolved {
                        orders::insert_order_item(
                            &mut **tx,
                            order.id,
                            product.id,
                            *quantity,
                            product.price,
                        )
                        .await?;
                    }

                    Ok::<_, AppError>(order)
                })
            })
            .await?;

        info!(order_id = order.id, total = %order.total_amount, "Order created");
        Ok(order)
    }

    /// Confirm: reserve inventory for every item, then transition.
    ///
    /// Locks are acquired in ascending product-id order to stay
    /// deadlock-free, and released on every exit path (TTL is the net).
    pub async fn confirm(&self, order_external_id: Uuid) -> AppResult<Order> {
        let order = self.load(order_external_id).await?;
        let items = orders::items_for_order(self.runner.pool(), order.id).await?;

        let mut product_ids: Vec<i64> = items.iter().map(|i| i.product_id).collect();
        product_ids.sort_unstable();

        let mut held: Vec<(String, String)> = Vec::with_capacity(product_ids.len());
        for product_id in &product_ids {
            let resource = format!("inventory:{}", product_id);
            match self.locks.acquire(&resource, INVENTORY_LOCK_TTL).await {
                Ok(token) => held.push((resource, token)),
                Err(err) => {
                    self.release_locks(&held).await;
                    return Err(err.into());
                }
            }
        }

        let result = self.confirm_locked(&order, &items).await;
        self.release_locks(&held).await;
        result
    }

    async fn confirm_locked(
        &self,
        order: &Order,
        items: &[settle_domain::entities::OrderItem],
    ) -> AppResult<Order> {
        // Reserve stock item by item; roll back already-taken reservations
        // on failure so a failed confirm leaves no partial holds.
        let mut reserved: Vec<(i64, i32)> = Vec::with_capacity(items.len());
        for item in items {
            match inventory::reserve_stock(self.runner.pool(), item.product_id, item.quantity)
                .await
            {
                Ok(()) => reserved.push((item.product_id, item.quantity)),
                Err(err) => {
                    for (product_id, quantity) in reserved.iter().rev() {
                        if let Err(release_err) =
                            inventory::release_reservation(self.runner.pool(), *product_id, *quantity)
                                .await
                        {
                            warn!(product_id, error = %release_err,
                                  "Failed to roll back reservation");
                        }
                    }
                    return Err(err.into());
                }
            }
        }

        let transitioned = self.transition(order.external_id, OrderEvent::Confirm).await;

        match transitioned {
            Ok(order) => Ok(order),
            Err(err) => {
                // Compensate the reservations the failed transition orphaned.
                for (product_id, quantity) in reserved.iter().rev() {
                    if let Err(release_err) =
                        inventory::release_reservation(self.runner.pool(), *product_id, *quantity)
                            .await
                    {
                        warn!(product_id, error = %release_err,
                              "Failed to roll back reservation");
                    }
                }
                Err(err)
            }
        }
    }

    async fn release_locks(&self, held: &[(String, String)]) {
        for (resource, token) in held.iter().rev() {
            if let Err(err) = self.locks.release(resource, token).await {
                warn!(resource, error = %err, "Lock release failed (TTL will reap it)");
            }
        }
    }

    /// Mark the order paid once its payment is authorized.
    pub async fn mark_paid(
        &self,
        order_external_id: Uuid,
        payment_external_id: Uuid,
    ) -> AppResult<Order> {
        let order = self.load(order_external_id).await?;

        let payment =
            payments::get_payment_by_external_id(self.runner.pool(), payment_external_id)
                .await?
                .ok_or_else(|| AppError::not_found("payment", payment_external_id))?;

        if payment.order_id != Some(order.id) {
            return Err(AppError::InvalidInput(
                "Payment does not belong to this order".to_string(),
            ));
        }
        if payment.status != PaymentStatus::Authorized && payment.status != PaymentStatus::Captured
        {
            return Err(AppError::InvalidStateTransition {
                current: payment.status.to_string(),
                event: "pay".to_string(),
            });
        }

        self.transition(order_external_id, OrderEvent::Pay).await
    }

    /// Ship: deduct the reserved units for good.
    pub async fn ship(&self, order_external_id: Uuid) -> AppResult<Order> {
        let order = self.load(order_external_id).await?;
        let items = orders::items_for_order(self.runner.pool(), order.id).await?;

        let updated = self.transition(order_external_id, OrderEvent::Ship).await?;

        // Only deduct when the transition actually happened (idempotent
        // retries skip the side effect).
        if order.status != updated.status {
            for item in &items {
                inventory::deduct_reserved(self.runner.pool(), item.product_id, item.quantity)
                    .await?;
            }
        }

        Ok(updated)
    }

    /// Complete: terminal; settlement is triggered through the outbox event.
    pub async fn complete(&self, order_external_id: Uuid) -> AppResult<Order> {
        self.transition(order_external_id, OrderEvent::Complete).await
    }

    /// Cancel before payment; Confirmed orders give their reservation back.
    pub async fn cancel(&self, order_external_id: Uuid) -> AppResult<Order> {
        let order = self.load(order_external_id).await?;
        let items = orders::items_for_order(self.runner.pool(), order.id).await?;

        let was_confirmed = order.status == settle_domain::states::OrderStatus::Confirmed;
        let updated = self.transition(order_external_id, OrderEvent::Cancel).await?;

        if was_confirmed && order.status != updated.status {
            for item in &items {
                if let Err(err) =
                    inventory::release_reservation(self.runner.pool(), item.product_id, item.quantity)
                        .await
                {
                    warn!(product_id = item.product_id, error = %err,
                          "Failed to release reservation on cancel");
                }
            }
        }

        Ok(updated)
    }

    /// Refund from Paid (the payment reversal itself is the payment
    /// service's transition).
    pub async fn refund(&self, order_external_id: Uuid) -> AppResult<Order> {
        self.transition(order_external_id, OrderEvent::Refund).await
    }

    /// Shared transition path: lock the row, consult the table, persist,
    /// enqueue the lifecycle event. Idempotent terminal retries return the
    /// current row without side effects.
    async fn transition(&self, order_external_id: Uuid, event: OrderEvent) -> AppResult<Order> {
        let updated = self
            .runner
            .run(move |tx| {
                Box::pin(async move {
                    let current = orders::get_order_by_external_id(&mut **tx, order_external_id)
                        .await?
                        .ok_or_else(|| AppError::not_found("order", order_external_id))?;
                    let current = orders::get_order_for_update(&mut **tx, current.id)
                        .await?
                        .ok_or_else(|| AppError::not_found("order", order_external_id))?;

                    let next = order_transition(current.status, event)?;
                    if next == current.status {
                        return Ok(current);
                    }

                    orders::update_order_status(&mut **tx, current.id, next).await?;

                    let lifecycle_event = match event {
                        OrderEvent::Confirm => Some(DomainEvent::OrderConfirmed {
                            order_id: current.id,
                            buyer_id: current.buyer_id,
                            total_amount: current.total_amount,
                            timestamp: Utc::now(),
                        }),
                        OrderEvent::Cancel => Some(DomainEvent::OrderCancelled {
                            order_id: current.id,
                            timestamp: Utc::now(),
                        }),
                        OrderEvent::Complete => Some(DomainEvent::OrderCompleted {
                            order_id: current.id,
                            timestamp: Utc::now(),
                        }),
                        _ => None,
                    };
                    if let Some(lifecycle_event) = lifecycle_event {
                        outbox::enqueue_tx(tx, &lifecycle_event).await?;
                    }

                    let updated = Order { status: next, ..current };
                    Ok::<_, AppError>(updated)
                })
            })
            .await?;

        info!(order_id = updated.id, status = %updated.status, "Order transitioned");
        Ok(updated)
    }
}
