//! Per-notification dispatch state machine.
//!
//! For each leased id:
//! 1. Load the record. Missing records are acked and dropped.
//! 2. Claim it with a conditional update (`queued → sending`, attempt + 1).
//!    A `sending` record whose claim is older than the lease timeout belongs
//!    to a worker that crashed or stalled; it is reclaimed in place
//!    (still `sending`, attempt + 1) or failed if no attempts remain.
//! 3. Call the deliverer, bounded by the delivery timeout.
//! 4. Success: `sending → sent`, ack.
//! 5. Failure: `sending → queued` and nack with backoff, or `sending → failed`
//!    and ack once retries are exhausted.
//!
//! The writes in 4 and 5 only land while the record still carries the attempt
//! count of our own claim. Once a reclaim has moved it on, the late worker
//! backs off and the new owner decides the outcome.
//!
//! A retry puts the record back to `queued` rather than leaving it `sending`,
//! so the next claim goes through the ordinary `queued → sending` swap.

use std::sync::Arc;
use std::time::Duration;

use herald_common::types::{NotificationRecord, NotificationStatus};

use crate::clock::{Clock, add_duration, until};
use crate::deliver::Deliverer;
use crate::error::{DeliveryError, DispatchError, QueueError, StoreError};
use crate::queue::{DispatchQueue, Lease};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::settings::DispatchSettings;
use crate::store::NotificationStore;

/// Why a lease was processed without a delivery call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The record no longer exists.
    NotFound,
    /// The record is already `sent` or `failed`.
    Terminal,
    /// Another worker holds a live claim on the record.
    ClaimedElsewhere,
    /// Our claim was taken over while the delivery call was in flight.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { attempts: i32 },
    RetryScheduled { attempt: i32, delay: Duration },
    /// Retries exhausted; the record is `failed`.
    Failed { attempts: i32 },
    Skipped(SkipReason),
}

enum Release {
    Ack,
    Nack(Duration),
}

enum Claim {
    Claimed(NotificationRecord),
    Exhausted(i32),
    Skip(SkipReason, Release),
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn NotificationStore>,
    queue: Arc<dyn DispatchQueue>,
    deliverer: Arc<dyn Deliverer>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    lease_timeout: Duration,
    delivery_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        queue: Arc<dyn DispatchQueue>,
        deliverer: Arc<dyn Deliverer>,
        clock: Arc<dyn Clock>,
        settings: &DispatchSettings,
    ) -> Self {
        Self {
            store,
            queue,
            deliverer,
            clock,
            retry: settings.retry,
            lease_timeout: settings.lease_timeout,
            delivery_timeout: settings.delivery_timeout,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Block until the queue hands out a lease.
    pub async fn next_lease(&self) -> Result<Lease, QueueError> {
        self.queue.dequeue().await
    }

    /// Process one visible item, if there is one.
    pub async fn run_once(&self) -> Result<Option<DispatchOutcome>, DispatchError> {
        match self.queue.try_dequeue().await? {
            Some(lease) => self.process(&lease).await.map(Some),
            None => Ok(None),
        }
    }

    /// Drive one leased notification through the state machine.
    ///
    /// Delivery failures never surface here; only store and queue failures do.
    /// On error the lease is left to expire so the item is redelivered.
    pub async fn process(&self, lease: &Lease) -> Result<DispatchOutcome, DispatchError> {
        let record = match self.store.get(lease.id).await {
            Ok(record) => record,
            Err(StoreError::NotFound(id)) => {
                tracing::warn!(notification_id = id, "Notification not found, dropping queue item");
                self.queue.ack(lease).await?;
                return Ok(DispatchOutcome::Skipped(SkipReason::NotFound));
            }
            Err(e) => return Err(e.into()),
        };

        let claimed = match self.claim(record, lease).await? {
            Claim::Claimed(record) => record,
            Claim::Exhausted(attempts) => {
                self.queue.ack(lease).await?;
                return Ok(DispatchOutcome::Failed { attempts });
            }
            Claim::Skip(reason, release) => {
                match release {
                    Release::Ack => self.queue.ack(lease).await?,
                    Release::Nack(delay) => self.queue.nack(lease, delay).await?,
                }
                return Ok(DispatchOutcome::Skipped(reason));
            }
        };

        match self.attempt(&claimed).await {
            Ok(()) => self.complete(lease, &claimed).await,
            Err(error) => self.handle_failure(lease, &claimed, error).await,
        }
    }

    async fn claim(&self, record: NotificationRecord, lease: &Lease) -> Result<Claim, StoreError> {
        let id = record.id;
        match record.status {
            NotificationStatus::Sent | NotificationStatus::Failed => {
                tracing::debug!(
                    notification_id = id,
                    status = %record.status,
                    "Notification already terminal, dropping duplicate"
                );
                Ok(Claim::Skip(SkipReason::Terminal, Release::Ack))
            }
            NotificationStatus::Queued if record.attempt_count >= self.retry.max_attempts() => {
                tracing::warn!(
                    notification_id = id,
                    attempts = record.attempt_count,
                    "Queued notification has no attempts left, marking failed"
                );
                match self
                    .store
                    .update_status(
                        id,
                        NotificationStatus::Queued,
                        NotificationStatus::Failed,
                        record.attempt_count,
                    )
                    .await
                {
                    Ok(record) => Ok(Claim::Exhausted(record.attempt_count)),
                    Err(e) => self.claim_result(id, Err(e)),
                }
            }
            NotificationStatus::Queued => {
                let result = self
                    .store
                    .update_status(
                        id,
                        NotificationStatus::Queued,
                        NotificationStatus::Sending,
                        record.attempt_count + 1,
                    )
                    .await;
                self.claim_result(id, result)
            }
            NotificationStatus::Sending => {
                let now = self.clock.now();
                let stale_at = add_duration(record.updated_at, self.lease_timeout);
                if now < stale_at {
                    tracing::debug!(
                        notification_id = id,
                        deliveries = lease.deliveries,
                        "Notification claimed by another worker"
                    );
                    return Ok(Claim::Skip(
                        SkipReason::ClaimedElsewhere,
                        Release::Nack(until(now, stale_at)),
                    ));
                }

                if record.attempt_count >= self.retry.max_attempts() {
                    tracing::warn!(
                        notification_id = id,
                        attempts = record.attempt_count,
                        "Stale claim with no attempts left, marking failed"
                    );
                    return match self
                        .store
                        .finish(id, record.attempt_count, NotificationStatus::Failed)
                        .await
                    {
                        Ok(record) => Ok(Claim::Exhausted(record.attempt_count)),
                        Err(e) => self.claim_result(id, Err(e)),
                    };
                }

                tracing::warn!(
                    notification_id = id,
                    attempts = record.attempt_count,
                    claimed_at = %record.updated_at,
                    "Reclaiming stale claim after lease expiry"
                );
                let result = self
                    .store
                    .reclaim(id, record.attempt_count, record.attempt_count + 1)
                    .await;
                self.claim_result(id, result)
            }
        }
    }

    fn claim_result(
        &self,
        id: i64,
        result: Result<NotificationRecord, StoreError>,
    ) -> Result<Claim, StoreError> {
        match result {
            Ok(record) => Ok(Claim::Claimed(record)),
            Err(StoreError::Conflict { actual, .. }) if actual.is_terminal() => {
                tracing::debug!(
                    notification_id = id,
                    actual = %actual,
                    "Notification finished by another worker, dropping duplicate"
                );
                Ok(Claim::Skip(SkipReason::Terminal, Release::Ack))
            }
            Err(StoreError::Conflict { actual, .. }) => {
                tracing::debug!(
                    notification_id = id,
                    actual = %actual,
                    "Lost claim race, skipping delivery"
                );
                Ok(Claim::Skip(
                    SkipReason::ClaimedElsewhere,
                    Release::Nack(self.lease_timeout),
                ))
            }
            Err(StoreError::NotFound(_)) => Ok(Claim::Skip(SkipReason::NotFound, Release::Ack)),
            Err(e) => Err(e),
        }
    }

    async fn attempt(&self, record: &NotificationRecord) -> Result<(), DeliveryError> {
        tracing::debug!(
            notification_id = record.id,
            attempt = record.attempt_count,
            kind = %record.kind,
            "Delivering notification"
        );

        match tokio::time::timeout(
            self.delivery_timeout,
            self.deliverer.deliver(&record.kind, &record.message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.delivery_timeout)),
        }
    }

    async fn complete(
        &self,
        lease: &Lease,
        record: &NotificationRecord,
    ) -> Result<DispatchOutcome, DispatchError> {
        let attempts = record.attempt_count;
        let update = self
            .store
            .finish(record.id, attempts, NotificationStatus::Sent)
            .await;

        if let Some(outcome) = self.superseded(lease, record, update).await? {
            return Ok(outcome);
        }

        self.queue.ack(lease).await?;
        tracing::info!(notification_id = record.id, attempts, "Notification sent");
        Ok(DispatchOutcome::Sent { attempts })
    }

    async fn handle_failure(
        &self,
        lease: &Lease,
        record: &NotificationRecord,
        error: DeliveryError,
    ) -> Result<DispatchOutcome, DispatchError> {
        let attempts = record.attempt_count;

        match self.retry.decide(attempts) {
            RetryDecision::Retry { delay } => {
                let update = self
                    .store
                    .finish(record.id, attempts, NotificationStatus::Queued)
                    .await;
                if let Some(outcome) = self.superseded(lease, record, update).await? {
                    return Ok(outcome);
                }

                self.queue.nack(lease, delay).await?;
                tracing::warn!(
                    notification_id = record.id,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Delivery failed, retry scheduled"
                );
                Ok(DispatchOutcome::RetryScheduled {
                    attempt: attempts,
                    delay,
                })
            }
            RetryDecision::GiveUp => {
                let update = self
                    .store
                    .finish(record.id, attempts, NotificationStatus::Failed)
                    .await;
                if let Some(outcome) = self.superseded(lease, record, update).await? {
                    return Ok(outcome);
                }

                self.queue.ack(lease).await?;
                tracing::error!(
                    notification_id = record.id,
                    attempts,
                    error = %error,
                    "Delivery failed, retries exhausted"
                );
                Ok(DispatchOutcome::Failed { attempts })
            }
        }
    }

    /// Resolve a post-delivery status write.
    ///
    /// Returns `Some` when the write did not go through because the claim was
    /// taken over, finished by its new owner, or the record vanished; the lease
    /// is released accordingly.
    async fn superseded(
        &self,
        lease: &Lease,
        record: &NotificationRecord,
        update: Result<NotificationRecord, StoreError>,
    ) -> Result<Option<DispatchOutcome>, DispatchError> {
        match update {
            Ok(_) => Ok(None),
            Err(StoreError::Conflict { actual, .. }) => {
                tracing::warn!(
                    notification_id = record.id,
                    attempt = record.attempt_count,
                    actual = %actual,
                    "Claim superseded during delivery"
                );
                self.queue.nack(lease, Duration::ZERO).await?;
                Ok(Some(DispatchOutcome::Skipped(SkipReason::Superseded)))
            }
            Err(StoreError::NotFound(id)) => {
                tracing::warn!(notification_id = id, "Notification vanished during delivery");
                self.queue.ack(lease).await?;
                Ok(Some(DispatchOutcome::Skipped(SkipReason::NotFound)))
            }
            Err(e) => Err(e.into()),
        }
    }
}
