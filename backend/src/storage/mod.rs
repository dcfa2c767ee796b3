//! Storage abstraction for all CardVault entities.
//!
//! Two backends implement [`Storage`]: an in-memory arena store used by
//! tests and development ([`memory::MemoryStorage`]) and a SQLite store
//! ([`sqlite::SqliteStorage`]). Both enforce the same ownership policy:
//! every scoped read or mutation resolves the resource's owning user by
//! walking its reference chain (Transaction -> Card -> User, Payment ->
//! Bill -> Card -> User, ...) and compares it to the caller. A resource
//! that does not exist and a resource owned by another user produce the
//! same `None`/`false` result, so foreign ids are never revealed.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use shared::{
    AutopaySettings, Bill, BillStatus, Card, CreateBillRequest, CreateCardRequest,
    CreateCreditScoreRequest, CreateNotificationRequest, CreateRewardRequest,
    CreateTransactionRequest, CreditScore, LoginRequest, Notification, ParseSmsRequest, Payment,
    Reward, SmsMessage, Transaction, TransactionSource, UpdateTransactionRequest,
    UpsertAutopayRequest, User,
};

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Row missing, or its ownership chain does not reach the caller.
    #[error("resource not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A persisted value failed to parse back into its domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Payment insert payload. Built by the billing service after it has
/// resolved the bill, so it carries both parent ids.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub bill_id: String,
    pub card_id: String,
    pub amount: Decimal,
    pub payment_method: String,
    pub transaction_id: Option<String>,
}

/// Durable, ownership-scoped persistence for every entity.
///
/// `owner_id` on every method is the authenticated user making the
/// request. List results come back on a natural recency key: transactions
/// by date descending, notifications by creation time descending, bills
/// by due date ascending, payments and credit scores by their timestamps
/// descending, cards by creation time ascending (so "the user's first
/// card" is well defined for SMS fallback).
#[async_trait]
pub trait Storage: Send + Sync {
    // -- users ------------------------------------------------------------

    /// Insert-or-update keyed by the identity provider's external id.
    async fn upsert_user(&self, login: &LoginRequest) -> StorageResult<User>;
    async fn get_user(&self, user_id: &str) -> StorageResult<Option<User>>;

    // -- cards ------------------------------------------------------------

    async fn list_cards(&self, owner_id: &str) -> StorageResult<Vec<Card>>;
    async fn get_card(&self, id: &str, owner_id: &str) -> StorageResult<Option<Card>>;
    async fn create_card(&self, owner_id: &str, req: &CreateCardRequest) -> StorageResult<Card>;
    /// Deletes the card and every dependent row (rewards, transactions,
    /// bills, payments, autopay). Notifications that referenced the card
    /// are removed with it.
    async fn delete_card(&self, id: &str, owner_id: &str) -> StorageResult<bool>;
    /// Atomic balance increment; the stored balance never round-trips
    /// through the caller.
    async fn add_to_card_balance(
        &self,
        id: &str,
        owner_id: &str,
        delta: Decimal,
    ) -> StorageResult<Option<Card>>;

    // -- rewards ----------------------------------------------------------

    async fn list_rewards(&self, owner_id: &str) -> StorageResult<Vec<Reward>>;
    async fn list_rewards_by_card(
        &self,
        card_id: &str,
        owner_id: &str,
    ) -> StorageResult<Vec<Reward>>;
    async fn create_reward(
        &self,
        owner_id: &str,
        req: &CreateRewardRequest,
    ) -> StorageResult<Reward>;
    /// Atomic progress increment, returning the updated reward. Callers
    /// recover the pre-increment value as `current_progress - delta`,
    /// which keeps threshold-crossing detection race-free.
    async fn add_to_reward_progress(
        &self,
        id: &str,
        owner_id: &str,
        delta: Decimal,
    ) -> StorageResult<Option<Reward>>;

    // -- transactions -----------------------------------------------------

    async fn list_transactions(&self, owner_id: &str) -> StorageResult<Vec<Transaction>>;
    async fn list_transactions_by_card(
        &self,
        card_id: &str,
        owner_id: &str,
    ) -> StorageResult<Vec<Transaction>>;
    async fn create_transaction(
        &self,
        owner_id: &str,
        req: &CreateTransactionRequest,
        source: TransactionSource,
    ) -> StorageResult<Transaction>;
    /// Partial edit; the transaction date and source are immutable.
    async fn update_transaction(
        &self,
        id: &str,
        owner_id: &str,
        patch: &UpdateTransactionRequest,
    ) -> StorageResult<Option<Transaction>>;
    async fn delete_transaction(&self, id: &str, owner_id: &str) -> StorageResult<bool>;

    // -- notifications ----------------------------------------------------

    async fn list_notifications(&self, owner_id: &str) -> StorageResult<Vec<Notification>>;
    /// Card-scoped when `req.card_id` is set (the card must belong to
    /// `owner_id`), otherwise directly user-scoped.
    async fn create_notification(
        &self,
        owner_id: &str,
        req: &CreateNotificationRequest,
    ) -> StorageResult<Notification>;
    /// Idempotent; the read flag only ever transitions false -> true.
    async fn mark_notification_read(
        &self,
        id: &str,
        owner_id: &str,
    ) -> StorageResult<Option<Notification>>;

    // -- sms audit log ----------------------------------------------------

    async fn list_sms_messages(&self, owner_id: &str) -> StorageResult<Vec<SmsMessage>>;
    async fn create_sms_message(
        &self,
        owner_id: &str,
        req: &ParseSmsRequest,
    ) -> StorageResult<SmsMessage>;
    /// Marks the message processed, attaching the extracted payload when
    /// extraction succeeded.
    async fn mark_sms_processed(
        &self,
        id: &str,
        owner_id: &str,
        extracted: Option<&str>,
    ) -> StorageResult<Option<SmsMessage>>;

    // -- bills & payments -------------------------------------------------

    async fn list_bills(&self, owner_id: &str) -> StorageResult<Vec<Bill>>;
    async fn get_bill(&self, id: &str, owner_id: &str) -> StorageResult<Option<Bill>>;
    async fn create_bill(&self, owner_id: &str, req: &CreateBillRequest) -> StorageResult<Bill>;
    async fn set_bill_status(
        &self,
        id: &str,
        owner_id: &str,
        status: BillStatus,
    ) -> StorageResult<Option<Bill>>;

    async fn list_payments(&self, owner_id: &str) -> StorageResult<Vec<Payment>>;
    /// Verifies the bill -> card -> user chain before inserting.
    async fn create_payment(&self, owner_id: &str, new: &NewPayment) -> StorageResult<Payment>;

    // -- autopay ----------------------------------------------------------

    async fn get_autopay(
        &self,
        card_id: &str,
        owner_id: &str,
    ) -> StorageResult<Option<AutopaySettings>>;
    /// At most one settings row per card; repeated calls update in place.
    async fn upsert_autopay(
        &self,
        card_id: &str,
        owner_id: &str,
        req: &UpsertAutopayRequest,
    ) -> StorageResult<Option<AutopaySettings>>;

    // -- credit scores ----------------------------------------------------

    async fn list_credit_scores(&self, owner_id: &str) -> StorageResult<Vec<CreditScore>>;
    async fn create_credit_score(
        &self,
        owner_id: &str,
        req: &CreateCreditScoreRequest,
    ) -> StorageResult<CreditScore>;
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}
