//! Transaction ingestion pipeline.
//!
//! Both entry points (manual create and SMS parse) persist a transaction
//! and then run the same fan-out: transaction notification, reward
//! progress with threshold-crossing detection, and the card balance
//! cache. The transaction itself is the source of truth; fan-out steps
//! are best-effort and a failed step never rolls back the transaction or
//! blocks the remaining steps.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;

use shared::{
    CreateTransactionRequest, Notification, NotificationKind, ParseSmsRequest, Transaction,
    TransactionSource,
};

use crate::error::AppError;
use crate::extractors::SmsExtractor;
use crate::storage::Storage;
use crate::ws::NotificationHub;

/// Per-step record of a fan-out run, used by tests and surfaced in logs.
#[derive(Debug, Default)]
pub struct FanoutReport {
    pub steps: Vec<FanoutStep>,
}

#[derive(Debug)]
pub struct FanoutStep {
    pub label: &'static str,
    pub error: Option<String>,
}

impl FanoutReport {
    fn ok(&mut self, label: &'static str) {
        self.steps.push(FanoutStep { label, error: None });
    }

    fn fail(&mut self, label: &'static str, transaction_id: &str, err: impl ToString) {
        let error = err.to_string();
        tracing::error!(transaction_id, step = label, error, "fan-out step failed");
        self.steps.push(FanoutStep {
            label,
            error: Some(error),
        });
    }

    pub fn failures(&self) -> usize {
        self.steps.iter().filter(|s| s.error.is_some()).count()
    }
}

pub struct IngestionOutcome {
    pub transaction: Transaction,
    pub report: FanoutReport,
}

#[derive(Clone)]
pub struct IngestionService {
    storage: Arc<dyn Storage>,
    hub: Arc<NotificationHub>,
    extractor: Arc<dyn SmsExtractor>,
}

impl IngestionService {
    pub fn new(
        storage: Arc<dyn Storage>,
        hub: Arc<NotificationHub>,
        extractor: Arc<dyn SmsExtractor>,
    ) -> Self {
        Self {
            storage,
            hub,
            extractor,
        }
    }

    /// Manual entry: the card id comes from the caller and must resolve
    /// within their ownership scope.
    pub async fn ingest_manual(
        &self,
        owner_id: &str,
        req: &CreateTransactionRequest,
    ) -> Result<IngestionOutcome, AppError> {
        if req.merchant_name.trim().is_empty() {
            return Err(AppError::Validation("merchant name is required".into()));
        }
        if req.amount <= Decimal::ZERO {
            return Err(AppError::Validation("amount must be positive".into()));
        }
        let transaction = self
            .storage
            .create_transaction(owner_id, req, TransactionSource::Manual)
            .await?;
        let report = self.fan_out(owner_id, &transaction).await;
        Ok(IngestionOutcome {
            transaction,
            report,
        })
    }

    /// SMS entry: the raw message is stored first as an audit record, so
    /// a failed extraction still leaves a trace. The card is matched by
    /// the extracted last-four digits, falling back to the user's first
    /// card.
    pub async fn ingest_sms(
        &self,
        owner_id: &str,
        req: &ParseSmsRequest,
    ) -> Result<IngestionOutcome, AppError> {
        let sms = self.storage.create_sms_message(owner_id, req).await?;

        let extracted = match self.extractor.extract(&req.message).await {
            Ok(Some(extracted)) => extracted,
            Ok(None) => {
                self.storage
                    .mark_sms_processed(&sms.id, owner_id, None)
                    .await?;
                return Err(AppError::Extraction);
            }
            Err(e) => {
                tracing::warn!(sms_id = sms.id, error = %e, "sms extraction failed");
                self.storage
                    .mark_sms_processed(&sms.id, owner_id, None)
                    .await?;
                return Err(AppError::Extraction);
            }
        };

        // The extracted payload is recorded even when no card matches, so
        // the audit log reflects what the extractor saw.
        let payload = json!({
            "merchantName": extracted.merchant_name,
            "amount": extracted.amount,
            "category": extracted.category,
            "lastFourDigits": extracted.last_four_digits,
            "description": extracted.description,
        })
        .to_string();
        self.storage
            .mark_sms_processed(&sms.id, owner_id, Some(&payload))
            .await?;

        let cards = self.storage.list_cards(owner_id).await?;
        let card = match extracted.last_four_digits.as_deref() {
            Some(last_four) => cards
                .iter()
                .find(|c| c.last_four_digits == last_four)
                .or_else(|| cards.first()),
            None => cards.first(),
        };
        let Some(card) = card else {
            return Err(AppError::Validation(
                "no card found to associate transaction with".into(),
            ));
        };

        let create = CreateTransactionRequest {
            card_id: card.id.clone(),
            merchant_name: extracted.merchant_name.clone(),
            amount: extracted.amount,
            category: extracted.category,
            description: Some(extracted.description.unwrap_or_else(|| {
                format!("Parsed from SMS from {}", req.phone_number)
            })),
        };
        let transaction = self
            .storage
            .create_transaction(owner_id, &create, TransactionSource::Sms)
            .await?;
        let report = self.fan_out(owner_id, &transaction).await;
        Ok(IngestionOutcome {
            transaction,
            report,
        })
    }

    /// Post-persist side effects, in a fixed order: notification, reward
    /// progress, balance cache. Failures are isolated per step.
    async fn fan_out(&self, owner_id: &str, transaction: &Transaction) -> FanoutReport {
        let mut report = FanoutReport::default();

        match self.notify_transaction(owner_id, transaction).await {
            Ok(()) => report.ok("transaction-notification"),
            Err(e) => report.fail("transaction-notification", &transaction.id, e),
        }

        self.advance_rewards(owner_id, transaction, &mut report)
            .await;

        match self
            .storage
            .add_to_card_balance(&transaction.card_id, owner_id, transaction.amount)
            .await
        {
            Ok(_) => report.ok("balance-cache"),
            Err(e) => report.fail("balance-cache", &transaction.id, e),
        }

        report
    }

    async fn notify_transaction(
        &self,
        owner_id: &str,
        transaction: &Transaction,
    ) -> Result<(), AppError> {
        let notification = self
            .storage
            .create_notification(
                owner_id,
                &shared::CreateNotificationRequest {
                    card_id: Some(transaction.card_id.clone()),
                    title: "New Transaction".into(),
                    message: format!(
                        "₹{} spent at {}",
                        transaction.amount, transaction.merchant_name
                    ),
                    kind: NotificationKind::Transaction,
                    metadata: Some(json!({ "transactionId": transaction.id }).to_string()),
                },
            )
            .await?;
        self.push(owner_id, &notification);
        Ok(())
    }

    /// Advance every active reward on the card and fire an unlock
    /// notification for each threshold crossed by exactly this
    /// transaction. Each reward is its own fan-out entry: one reward's
    /// failure never blocks the others.
    async fn advance_rewards(
        &self,
        owner_id: &str,
        transaction: &Transaction,
        report: &mut FanoutReport,
    ) {
        let rewards = match self
            .storage
            .list_rewards_by_card(&transaction.card_id, owner_id)
            .await
        {
            Ok(rewards) => rewards,
            Err(e) => {
                report.fail("reward-progress", &transaction.id, e);
                return;
            }
        };
        // Inactive rewards are frozen: no progress, no notification.
        let active: Vec<_> = rewards.into_iter().filter(|r| r.is_active).collect();
        if active.is_empty() {
            report.ok("reward-progress");
            return;
        }
        let card_name = match self.storage.get_card(&transaction.card_id, owner_id).await {
            Ok(Some(card)) => card.card_name,
            Ok(None) => {
                report.fail("reward-progress", &transaction.id, AppError::NotFound("card"));
                return;
            }
            Err(e) => {
                report.fail("reward-progress", &transaction.id, e);
                return;
            }
        };

        for reward in active {
            match self
                .advance_one_reward(owner_id, transaction, &reward.id, &card_name)
                .await
            {
                Ok(()) => report.ok("reward-progress"),
                Err(e) => report.fail(
                    "reward-progress",
                    &transaction.id,
                    format!("reward {}: {e}", reward.id),
                ),
            }
        }
    }

    /// The pre-increment progress is recovered from the atomically
    /// updated value, so two concurrent transactions cannot both claim
    /// the crossing.
    async fn advance_one_reward(
        &self,
        owner_id: &str,
        transaction: &Transaction,
        reward_id: &str,
        card_name: &str,
    ) -> Result<(), AppError> {
        let Some(updated) = self
            .storage
            .add_to_reward_progress(reward_id, owner_id, transaction.amount)
            .await?
        else {
            return Ok(());
        };
        let before = updated.current_progress - transaction.amount;
        if before < updated.threshold && updated.current_progress >= updated.threshold {
            let notification = self
                .storage
                .create_notification(
                    owner_id,
                    &shared::CreateNotificationRequest {
                        card_id: Some(transaction.card_id.clone()),
                        title: "Reward Unlocked! 🎉".into(),
                        message: format!(
                            "You've unlocked {} on your {}!",
                            updated.reward_value, card_name
                        ),
                        kind: NotificationKind::Reward,
                        metadata: Some(json!({ "rewardId": updated.id }).to_string()),
                    },
                )
                .await?;
            self.push(owner_id, &notification);
        }
        Ok(())
    }

    fn push(&self, owner_id: &str, notification: &Notification) {
        self.hub.broadcast(owner_id, notification);
    }
}
