//! Payment bridge: checkout creation, webhook reconciliation and refunds.
//!
//! The bridge is the only component that talks to the [`PaymentGateway`].
//! Webhooks are reconciled in one transaction that updates the local payment
//! and hands the new status to the [`PaymentResponder`] registered for the
//! payment's reference type, so a replayed webhook either sees the new state
//! and stops or collides on the payment row and is retried.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::retry::{self, TxError};
use crate::config::BookingPolicy;
use crate::domain::{
    Booking, BookingId, ClubId, Notification, OutboxMessage, Payment, PaymentId, PaymentStatus,
    ReferenceType,
};
use crate::error::BookingError;
use crate::persistence::Storage;
use crate::ports::{PaymentGateway, PaymentResponder, WebhookRequest};

/// What a webhook delivery amounted to. Every variant is acknowledged with
/// a success response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Not a payment event, no data id, or unknown to the processor.
    Ignored,
    /// No local payment matches; the processor can stop retrying.
    Unmatched,
    /// Replay of an already-applied status.
    Duplicate,
    /// The local payment moved to this status.
    Applied(PaymentStatus),
}

/// Result of trying to take a payment's refund claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefundClaim {
    Claimed,
    AlreadyRefunded,
    InFlight,
}

/// Coordinates the payment processor with local payment records.
#[derive(Debug)]
pub struct PaymentBridge {
    storage: Arc<dyn Storage>,
    gateway: Arc<dyn PaymentGateway>,
    responders: HashMap<ReferenceType, Arc<dyn PaymentResponder>>,
    policy: BookingPolicy,
}

impl PaymentBridge {
    /// Creates a bridge with no responders registered.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        gateway: Arc<dyn PaymentGateway>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            storage,
            gateway,
            responders: HashMap::new(),
            policy,
        }
    }

    /// Registers the responder for payments of `reference_type`.
    #[must_use]
    pub fn with_responder(
        mut self,
        reference_type: ReferenceType,
        responder: Arc<dyn PaymentResponder>,
    ) -> Self {
        self.responders.insert(reference_type, responder);
        self
    }

    /// Builds the `PENDING` payment record for a priced booking.
    #[must_use]
    pub fn pending_payment(&self, booking: &Booking, now: DateTime<Utc>) -> Payment {
        Payment {
            id: PaymentId::new(),
            club_id: booking.club_id,
            reference_id: *booking.id.as_uuid(),
            reference_type: ReferenceType::Booking,
            amount: booking.total_price,
            currency: self.policy.currency.clone(),
            status: PaymentStatus::Pending,
            external_id: String::new(),
            payer_id: booking.user_id,
            method: String::new(),
            paid_at: None,
            created_at: now,
        }
    }

    /// Creates a checkout preference for `payment` and returns its URL.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Gateway`] if the processor fails or the call
    /// exceeds the gateway deadline.
    pub async fn create_checkout(
        &self,
        payment: &Payment,
        payer_email: &str,
        description: &str,
    ) -> Result<String, BookingError> {
        tokio::time::timeout(
            self.policy.gateway_timeout,
            self.gateway
                .create_preference(payment, payer_email, description),
        )
        .await
        .unwrap_or_else(|_| Err(BookingError::Gateway("checkout creation timed out".into())))
    }

    /// Reconciles one webhook delivery.
    ///
    /// The signature is verified before anything else is read. Processor
    /// failures while fetching the payment are acknowledged so the
    /// processor stops retrying.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Forbidden`] for a bad signature and
    /// [`BookingError::Internal`] when the local record fails the security
    /// checks or storage gives up; both make the processor retry.
    pub async fn handle_webhook(
        &self,
        request: &WebhookRequest,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, BookingError> {
        self.gateway.validate_webhook(request)?;

        let is_payment = matches!(request.event_type.as_deref(), Some("payment"));
        let Some(data_id) = request.data_id.as_deref().filter(|id| !id.is_empty()) else {
            return Ok(WebhookOutcome::Ignored);
        };
        if !is_payment {
            return Ok(WebhookOutcome::Ignored);
        }

        let fetched = tokio::time::timeout(
            self.policy.gateway_timeout,
            self.gateway.process_webhook(data_id),
        )
        .await
        .unwrap_or_else(|_| Err(BookingError::Gateway("payment fetch timed out".into())));
        let remote = match fetched {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                tracing::info!(data_id, "webhook for payment unknown to the processor");
                return Ok(WebhookOutcome::Ignored);
            }
            Err(err) => {
                tracing::warn!(data_id, error = %err, "payment fetch failed, acknowledging webhook");
                return Ok(WebhookOutcome::Ignored);
            }
        };

        let remote = &remote;
        let responders = &self.responders;
        retry::run(
            self.storage.as_ref(),
            self.policy.storage_timeout,
            "payment_webhook",
            move |mut tx| async move {
                let Some(mut local) = tx
                    .find_payment_for_webhook(&remote.external_id, remote.local_reference)
                    .await?
                else {
                    tracing::info!(
                        external_id = %remote.external_id,
                        "webhook matches no local payment"
                    );
                    return Ok(WebhookOutcome::Unmatched);
                };

                if local.club_id.as_uuid().is_nil() {
                    return Err(internal("local payment carries no club").into());
                }
                if !local.external_id.is_empty() && local.external_id != remote.external_id {
                    return Err(internal("processor id does not match local record").into());
                }
                if remote.local_reference.is_some_and(|id| id != local.id) {
                    return Err(internal("processor reference does not match local id").into());
                }

                if local.status == remote.status && local.external_id == remote.external_id {
                    return Ok(WebhookOutcome::Duplicate);
                }

                let previous = local.status;
                local.status = remote.status;
                local.external_id.clone_from(&remote.external_id);
                if !remote.method.is_empty() {
                    local.method.clone_from(&remote.method);
                }
                if remote.status == PaymentStatus::Completed {
                    local.paid_at = remote.paid_at.or(local.paid_at).or(Some(now));
                }
                tx.update_payment(&local).await?;

                if local.status != previous {
                    match responders.get(&local.reference_type) {
                        Some(responder) => {
                            responder
                                .on_payment_status_changed(
                                    tx.as_mut(),
                                    local.club_id,
                                    local.reference_id,
                                    local.status,
                                )
                                .await?;
                        }
                        None => tracing::debug!(
                            reference_type = local.reference_type.as_str(),
                            "no responder registered"
                        ),
                    }
                }

                tx.commit().await?;
                tracing::info!(
                    club_id = %local.club_id,
                    payment_id = %local.id,
                    from = previous.as_str(),
                    status = local.status.as_str(),
                    "payment status updated from webhook"
                );
                Ok(WebhookOutcome::Applied(local.status))
            },
        )
        .await
    }

    /// Refunds a completed payment and records the refund locally.
    ///
    /// The processor call is attempted up to the configured number of times
    /// with backoff. A final failure is logged as an incident and returned;
    /// callers decide whether it matters. Refunding an already refunded
    /// payment is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidState`] if the payment was never
    /// settled, [`BookingError::Gateway`] once the processor attempts are
    /// exhausted, or a storage error while recording the result.
    pub async fn refund(&self, payment: &Payment, now: DateTime<Utc>) -> Result<(), BookingError> {
        if payment.status == PaymentStatus::Refunded {
            return Ok(());
        }
        if payment.status != PaymentStatus::Completed || payment.external_id.is_empty() {
            return Err(BookingError::InvalidState(format!(
                "payment {} is {} and cannot be refunded",
                payment.id, payment.status
            )));
        }

        let (club_id, payment_id) = (payment.club_id, payment.id);
        let attempts = self.policy.refund_retry_max.max(1);
        let lease = chrono::Duration::from_std(
            self.policy
                .gateway_timeout
                .saturating_mul(attempts.saturating_mul(2)),
        )
        .unwrap_or_else(|_| chrono::Duration::hours(1));
        match self.claim_refund(club_id, payment_id, now, now + lease).await? {
            RefundClaim::Claimed => {}
            RefundClaim::AlreadyRefunded => return Ok(()),
            RefundClaim::InFlight => {
                return Err(BookingError::InvalidState(format!(
                    "a refund of payment {payment_id} is already in progress"
                )));
            }
        }

        let mut attempt = 1;
        loop {
            let result = tokio::time::timeout(
                self.policy.gateway_timeout,
                self.gateway.refund(&payment.external_id),
            )
            .await
            .unwrap_or_else(|_| Err(BookingError::Gateway("refund timed out".into())));
            match result {
                Ok(()) => break,
                Err(err) if attempt < attempts => {
                    tracing::warn!(
                        payment_id = %payment.id,
                        attempt,
                        error = %err,
                        "refund attempt failed"
                    );
                    tokio::time::sleep(retry::backoff(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        incident = true,
                        club_id = %payment.club_id,
                        payment_id = %payment.id,
                        external_id = %payment.external_id,
                        attempts,
                        error = %err,
                        "refund failed, manual follow-up required"
                    );
                    self.release_refund(club_id, payment_id).await;
                    return Err(err);
                }
            }
        }

        retry::run(
            self.storage.as_ref(),
            self.policy.storage_timeout,
            "record_refund",
            move |mut tx| async move {
                let Some(mut current) = tx.get_payment(club_id, payment_id).await? else {
                    return Err(TxError::Domain(BookingError::NotFound(format!(
                        "payment {payment_id}"
                    ))));
                };
                if current.status == PaymentStatus::Refunded {
                    return Ok(());
                }
                current.status = PaymentStatus::Refunded;
                tx.update_payment(&current).await?;
                if current.reference_type == ReferenceType::Booking {
                    let notification = Notification::RefundIssued {
                        booking_id: BookingId::from_uuid(current.reference_id),
                        amount: current.amount,
                    };
                    tx.enqueue(&OutboxMessage::new(
                        club_id,
                        current.payer_id,
                        notification,
                        now,
                    ))
                    .await?;
                }
                tx.commit().await?;
                tracing::info!(%club_id, %payment_id, "payment refunded");
                Ok(())
            },
        )
        .await
    }

    async fn claim_refund(
        &self,
        club_id: ClubId,
        payment_id: PaymentId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<RefundClaim, BookingError> {
        retry::run(
            self.storage.as_ref(),
            self.policy.storage_timeout,
            "claim_refund",
            move |mut tx| async move {
                let Some(current) = tx.get_payment(club_id, payment_id).await? else {
                    return Err(TxError::Domain(BookingError::NotFound(format!(
                        "payment {payment_id}"
                    ))));
                };
                if current.status == PaymentStatus::Refunded {
                    return Ok(RefundClaim::AlreadyRefunded);
                }
                if current.status != PaymentStatus::Completed {
                    return Err(TxError::Domain(BookingError::InvalidState(format!(
                        "payment {payment_id} is {} and cannot be refunded",
                        current.status
                    ))));
                }
                let claim = if tx.claim_refund(club_id, payment_id, now, lease_until).await? {
                    RefundClaim::Claimed
                } else {
                    RefundClaim::InFlight
                };
                tx.commit().await?;
                Ok(claim)
            },
        )
        .await
    }

    async fn release_refund(&self, club_id: ClubId, payment_id: PaymentId) {
        let released = retry::run(
            self.storage.as_ref(),
            self.policy.storage_timeout,
            "release_refund",
            move |mut tx| async move {
                tx.release_refund(club_id, payment_id).await?;
                tx.commit().await?;
                Ok(())
            },
        )
        .await;
        if let Err(err) = released {
            tracing::warn!(%club_id, %payment_id, error = %err, "refund claim not released");
        }
    }
}

fn internal(reason: &str) -> BookingError {
    BookingError::Internal(format!("webhook security check failed: {reason}"))
}

/// Picks the settled payment (completed or already refunded) among a
/// booking's payments, newest first.
#[must_use]
pub fn settled_payment(payments: Vec<Payment>) -> Option<Payment> {
    payments.into_iter().find(|p| {
        matches!(
            p.status,
            PaymentStatus::Completed | PaymentStatus::Refunded
        )
    })
}
