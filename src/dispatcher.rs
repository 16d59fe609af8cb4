//! Delivery of notifications through the push gateway
//!
//! The dispatcher turns notifications into gateway batches:
//!
//! ```text
//! deliver:  [user, notification] ─▶ resolve ─▶ validate ─▶ batch ─▶ submit
//! fan_out:  directory pages ─▶ (producer) ─▶ channel ─▶ batch ─▶ submit
//! ```
//!
//! A failing batch never stops the remaining ones. Every outcome ends up in a
//! [`DeliveryReport`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::UserId;
use crate::composer::Notification;
use crate::config::{EvaluationConfig, GatewayConfig};
use crate::evaluator::store_call;
use crate::push::{GatewayError, PushGateway, PushMessage, PushTicket, is_push_token};
use crate::storage::RecipientDirectory;

/// Address lookups run concurrently with at most this many in flight.
const RESOLVE_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    pub max_batch_size: usize,
    pub max_in_flight_batches: usize,
    pub gateway_timeout: Duration,
    pub store_timeout: Duration,
    pub fan_out_page_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::new(&GatewayConfig::default(), &EvaluationConfig::default())
    }
}

impl DispatchConfig {
    pub fn new(gateway: &GatewayConfig, evaluation: &EvaluationConfig) -> Self {
        Self {
            max_batch_size: gateway.max_batch_size.max(1),
            max_in_flight_batches: gateway.max_in_flight_batches.max(1),
            gateway_timeout: gateway.timeout(),
            store_timeout: evaluation.store_timeout(),
            fan_out_page_size: evaluation.fan_out_page_size.max(1),
        }
    }
}

/// A notification for one specific user
#[derive(Debug, Clone, PartialEq)]
pub struct AddressedNotification {
    pub user_id: UserId,
    pub notification: Notification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No token, or the account is disabled
    Unreachable,
    /// The token does not look like a push address
    MalformedAddress,
    /// The same user was addressed twice in one call
    Duplicate,
    /// The directory lookup failed
    LookupFailed,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Unreachable => write!(f, "unreachable"),
            DropReason::MalformedAddress => write!(f, "malformed address"),
            DropReason::Duplicate => write!(f, "duplicate recipient"),
            DropReason::LookupFailed => write!(f, "address lookup failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Accepted by the gateway
    Delivered { ticket_id: String },
    /// The gateway refused this message
    Rejected { reason: String },
    /// The whole batch failed or timed out
    BatchFailed { error: String },
    /// Never submitted
    Dropped { reason: DropReason },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageOutcome {
    pub user_id: UserId,
    pub outcome: DeliveryOutcome,
}

/// Aggregated result of one `deliver` or `fan_out` call.
///
/// `attempted` counts messages handed to the gateway; `failed` covers both
/// rejected messages and messages of failed batches. Fan-out reports only keep
/// the outcomes of messages that were not delivered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub dropped: usize,
    pub batches_submitted: usize,
    pub batches_failed: usize,
    /// A recipient page could not be read, so not everyone was reached
    pub truncated: bool,
    pub outcomes: Vec<MessageOutcome>,
}

impl DeliveryReport {
    fn record(&mut self, user_id: UserId, outcome: DeliveryOutcome) {
        match &outcome {
            DeliveryOutcome::Delivered { .. } => self.delivered += 1,
            DeliveryOutcome::Rejected { .. } | DeliveryOutcome::BatchFailed { .. } => {
                self.failed += 1
            }
            DeliveryOutcome::Dropped { .. } => self.dropped += 1,
        }
        self.outcomes.push(MessageOutcome { user_id, outcome });
    }

    fn drop_recipient(&mut self, user_id: UserId, reason: DropReason) {
        self.record(user_id, DeliveryOutcome::Dropped { reason });
    }

    pub fn merge(&mut self, other: DeliveryReport) {
        self.attempted += other.attempted;
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.dropped += other.dropped;
        self.batches_submitted += other.batches_submitted;
        self.batches_failed += other.batches_failed;
        self.truncated |= other.truncated;
        self.outcomes.extend(other.outcomes);
    }

    /// Outcomes for one user, in recording order.
    pub fn outcomes_for(&self, user_id: UserId) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes
            .iter()
            .filter(move |o| o.user_id == user_id)
            .map(|o| &o.outcome)
    }

    pub fn is_empty(&self) -> bool {
        self.attempted == 0 && self.dropped == 0 && !self.truncated
    }
}

/// Messages submitted together, with the users they belong to
struct Batch {
    recipients: Vec<UserId>,
    messages: Vec<PushMessage>,
}

impl Batch {
    fn from_pairs(pairs: Vec<(UserId, PushMessage)>) -> Self {
        let (recipients, messages) = pairs.into_iter().unzip();
        Self {
            recipients,
            messages,
        }
    }
}

pub struct Dispatcher {
    directory: Arc<dyn RecipientDirectory>,
    gateway: Arc<dyn PushGateway>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        directory: Arc<dyn RecipientDirectory>,
        gateway: Arc<dyn PushGateway>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            directory,
            gateway,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Deliver individually addressed notifications.
    #[instrument(skip_all, fields(recipients = messages.len()))]
    pub async fn deliver(&self, messages: Vec<AddressedNotification>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if messages.is_empty() {
            return report;
        }

        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(messages.len());
        for message in messages {
            if seen.insert(message.user_id) {
                unique.push(message);
            } else {
                debug!("user {} addressed twice, dropping copy", message.user_id);
                report.drop_recipient(message.user_id, DropReason::Duplicate);
            }
        }

        let resolved: Vec<_> = stream::iter(unique)
            .map(|message| async move {
                let address = store_call(
                    "resolve_address",
                    self.config.store_timeout,
                    self.directory.resolve_address(message.user_id),
                )
                .await;
                (message, address)
            })
            .buffered(RESOLVE_CONCURRENCY)
            .collect()
            .await;

        let mut valid = Vec::with_capacity(resolved.len());
        for (message, address) in resolved {
            let user_id = message.user_id;
            match address {
                Ok(Some(address)) if is_push_token(&address) => {
                    valid.push((user_id, PushMessage::new(address, &message.notification)));
                }
                Ok(Some(address)) => {
                    warn!("dropping user {user_id}: malformed push token '{address}'");
                    report.drop_recipient(user_id, DropReason::MalformedAddress);
                }
                Ok(None) => {
                    debug!("dropping user {user_id}: no reachable address");
                    report.drop_recipient(user_id, DropReason::Unreachable);
                }
                Err(e) => {
                    warn!("dropping user {user_id}: {e}");
                    report.drop_recipient(user_id, DropReason::LookupFailed);
                }
            }
        }

        let mut batches = vec![];
        let mut pending = valid.into_iter().peekable();
        while pending.peek().is_some() {
            let chunk: Vec<_> = pending
                .by_ref()
                .take(self.config.max_batch_size.max(1))
                .collect();
            batches.push(Batch::from_pairs(chunk));
        }

        let submitted = stream::iter(batches)
            .map(|batch| self.submit(batch))
            .buffer_unordered(self.config.max_in_flight_batches.max(1))
            .fold(DeliveryReport::default(), |mut acc, batch| async move {
                acc.merge(batch);
                acc
            })
            .await;
        report.merge(submitted);

        info!(
            "delivered {}/{} personal notification(s), {} failed, {} dropped",
            report.delivered, report.attempted, report.failed, report.dropped
        );
        report
    }

    /// Send one notification to every reachable recipient.
    ///
    /// A producer task pages through the directory into a bounded channel
    /// while batches are submitted, so only a page and the in-flight batches
    /// are held at once.
    #[instrument(skip_all)]
    pub async fn fan_out(&self, notification: Notification) -> DeliveryReport {
        let batch_size = self.config.max_batch_size.max(1);
        let (tx, rx) = mpsc::channel(batch_size);
        let producer = tokio::spawn(produce_recipients(
            self.directory.clone(),
            self.config.fan_out_page_size.max(1),
            self.config.store_timeout,
            tx,
        ));

        let recipients = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|recipient| (recipient, rx))
        });

        let notification = &notification;
        let mut report = recipients
            .chunks(batch_size)
            .map(|chunk| {
                let pairs = chunk
                    .into_iter()
                    .map(|(user_id, address)| (user_id, PushMessage::new(address, notification)))
                    .collect();
                self.submit(Batch::from_pairs(pairs))
            })
            .buffer_unordered(self.config.max_in_flight_batches.max(1))
            .fold(DeliveryReport::default(), |mut acc, mut batch| async move {
                batch
                    .outcomes
                    .retain(|o| !matches!(o.outcome, DeliveryOutcome::Delivered { .. }));
                acc.merge(batch);
                acc
            })
            .await;

        match producer.await {
            Ok(drops) => report.merge(drops),
            Err(e) => {
                error!("fan-out recipient producer failed: {e}");
                report.truncated = true;
            }
        }

        info!(
            "fan-out delivered {}/{} notification(s) in {} batch(es), {} failed, {} dropped",
            report.delivered,
            report.attempted,
            report.batches_submitted,
            report.failed,
            report.dropped
        );
        report
    }

    async fn submit(&self, batch: Batch) -> DeliveryReport {
        let count = batch.messages.len();
        let mut report = DeliveryReport {
            attempted: count,
            batches_submitted: 1,
            ..Default::default()
        };

        trace!("submitting batch of {count} message(s)");
        let result = match timeout(
            self.config.gateway_timeout,
            self.gateway.submit_batch(&batch.messages),
        )
        .await
        {
            Ok(Ok(tickets)) if tickets.len() == count => Ok(tickets),
            Ok(Ok(tickets)) => Err(GatewayError::TicketCountMismatch {
                expected: count,
                received: tickets.len(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(GatewayError::Timeout(self.config.gateway_timeout)),
        };

        match result {
            Ok(tickets) => {
                for (user_id, ticket) in batch.recipients.into_iter().zip(tickets) {
                    let outcome = match ticket {
                        PushTicket::Ok { id } => DeliveryOutcome::Delivered { ticket_id: id },
                        rejected => {
                            let reason = rejected.rejection().unwrap_or_default();
                            warn!("push to user {user_id} rejected: {reason}");
                            DeliveryOutcome::Rejected { reason }
                        }
                    };
                    report.record(user_id, outcome);
                }
            }
            Err(e) => {
                error!("push batch of {count} recipient(s) failed: {e}");
                report.batches_failed = 1;
                let error = e.to_string();
                for user_id in batch.recipients {
                    report.record(
                        user_id,
                        DeliveryOutcome::BatchFailed {
                            error: error.clone(),
                        },
                    );
                }
            }
        }

        report
    }
}

/// Page through reachable recipients and feed valid addresses into `tx`.
///
/// Returns the drops it recorded; a failed page marks the report truncated.
async fn produce_recipients(
    directory: Arc<dyn RecipientDirectory>,
    page_size: usize,
    store_timeout: Duration,
    tx: mpsc::Sender<(UserId, String)>,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    let mut after = None;

    loop {
        let page = match store_call(
            "list_reachable",
            store_timeout,
            directory.list_reachable(after, page_size),
        )
        .await
        {
            Ok(page) => page,
            Err(e) => {
                error!("fan-out stopped early, recipient page after {after:?} failed: {e}");
                report.truncated = true;
                break;
            }
        };

        let last_page = page.len() < page_size;
        after = page.last().map(|recipient| recipient.user_id).or(after);
        trace!("fan-out page of {} recipient(s)", page.len());

        for recipient in page {
            if !is_push_token(&recipient.address) {
                warn!(
                    "dropping user {}: malformed push token '{}'",
                    recipient.user_id, recipient.address
                );
                report.drop_recipient(recipient.user_id, DropReason::MalformedAddress);
                continue;
            }
            if tx.send((recipient.user_id, recipient.address)).await.is_err() {
                return report;
            }
        }

        if last_page {
            break;
        }
    }

    report
}
