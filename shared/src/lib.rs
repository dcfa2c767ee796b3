//! Shared wire types for the CardVault backend.
//!
//! Everything in this crate crosses a serialization boundary: REST request
//! and response bodies, persisted entity shapes, and the WebSocket push
//! event. Field names are camelCase on the wire; monetary values are
//! `rust_decimal::Decimal` and serialize as exact decimal strings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How a transaction entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionSource {
    Manual,
    Sms,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionSource::Manual => "manual",
            TransactionSource::Sms => "sms",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(TransactionSource::Manual),
            "sms" => Some(TransactionSource::Sms),
            _ => None,
        }
    }
}

/// Spending category attached to a transaction.
///
/// Extraction output is untrusted; any value outside the known set
/// deserializes as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpendCategory {
    Shopping,
    Food,
    Travel,
    Fuel,
    Groceries,
    Utilities,
    Entertainment,
    Healthcare,
    #[serde(other)]
    Other,
}

impl Default for SpendCategory {
    fn default() -> Self {
        SpendCategory::Other
    }
}

impl SpendCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpendCategory::Shopping => "Shopping",
            SpendCategory::Food => "Food",
            SpendCategory::Travel => "Travel",
            SpendCategory::Fuel => "Fuel",
            SpendCategory::Groceries => "Groceries",
            SpendCategory::Utilities => "Utilities",
            SpendCategory::Entertainment => "Entertainment",
            SpendCategory::Healthcare => "Healthcare",
            SpendCategory::Other => "Other",
        }
    }

    /// Lenient parse used for persisted rows and extractor output.
    pub fn parse(s: &str) -> Self {
        match s {
            "Shopping" => SpendCategory::Shopping,
            "Food" => SpendCategory::Food,
            "Travel" => SpendCategory::Travel,
            "Fuel" => SpendCategory::Fuel,
            "Groceries" => SpendCategory::Groceries,
            "Utilities" => SpendCategory::Utilities,
            "Entertainment" => SpendCategory::Entertainment,
            "Healthcare" => SpendCategory::Healthcare,
            _ => SpendCategory::Other,
        }
    }
}

/// Notification category, also the `type` field of the push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Transaction,
    Reward,
    Bill,
    Offer,
    Statement,
    Payment,
    Other,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Transaction => "transaction",
            NotificationKind::Reward => "reward",
            NotificationKind::Bill => "bill",
            NotificationKind::Offer => "offer",
            NotificationKind::Statement => "statement",
            NotificationKind::Payment => "payment",
            NotificationKind::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "transaction" => NotificationKind::Transaction,
            "reward" => NotificationKind::Reward,
            "bill" => NotificationKind::Bill,
            "offer" => NotificationKind::Offer,
            "statement" => NotificationKind::Statement,
            "payment" => NotificationKind::Payment,
            _ => NotificationKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Pending,
    Paid,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Pending => "pending",
            BillStatus::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BillStatus::Pending),
            "paid" => Some(BillStatus::Paid),
            _ => None,
        }
    }
}

/// How autopay computes the amount to pay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutopayKind {
    Minimum,
    Full,
    Fixed,
}

impl AutopayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutopayKind::Minimum => "minimum",
            AutopayKind::Full => "full",
            AutopayKind::Fixed => "fixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "minimum" => Some(AutopayKind::Minimum),
            "full" => Some(AutopayKind::Full),
            "fixed" => Some(AutopayKind::Fixed),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    /// Identity-provider id; users are upserted by this on login.
    pub external_id: String,
    pub email: String,
    pub display_name: String,
    pub profile_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub user_id: String,
    pub card_name: String,
    pub bank_name: String,
    pub last_four_digits: String,
    pub card_network: String,
    pub credit_limit: Decimal,
    /// Running sum of ingested transaction amounts. A cache, not an
    /// authority; only the ingestion pipeline writes it.
    pub current_balance: Decimal,
    pub due_date: Option<i32>,
    pub billing_cycle: Option<i32>,
    pub card_color: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub id: String,
    pub card_id: String,
    pub reward_type: String,
    pub reward_value: String,
    pub condition: String,
    pub threshold: Decimal,
    pub current_progress: Decimal,
    pub is_active: bool,
    pub expiry_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub card_id: String,
    pub merchant_name: String,
    pub amount: Decimal,
    pub category: SpendCategory,
    /// Set once at creation, never editable afterwards.
    pub transaction_date: DateTime<Utc>,
    pub description: Option<String>,
    pub source: TransactionSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    /// Set when the notification is scoped through a card.
    pub card_id: Option<String>,
    /// Set when the notification targets the user directly (no card).
    pub user_id: Option<String>,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    /// Opaque JSON payload (reward id, email id, term changes, ...).
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsMessage {
    pub id: String,
    pub user_id: String,
    pub phone_number: String,
    pub message: String,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
    pub extracted_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    pub id: String,
    pub card_id: String,
    pub amount: Decimal,
    pub due_date: DateTime<Utc>,
    /// "YYYY-MM" label of the statement month.
    pub bill_month: String,
    pub minimum_due: Decimal,
    pub status: BillStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub bill_id: String,
    pub card_id: String,
    pub amount: Decimal,
    pub payment_date: DateTime<Utc>,
    pub payment_method: String,
    pub status: String,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutopaySettings {
    pub id: String,
    pub card_id: String,
    pub enabled: bool,
    pub payment_type: AutopayKind,
    pub days_before: i32,
    pub fixed_amount: Option<Decimal>,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditScore {
    pub id: String,
    pub user_id: String,
    /// 300..=900 inclusive.
    pub score: i32,
    pub provider: String,
    pub recorded_at: DateTime<Utc>,
    pub factors: Option<String>,
    pub suggestions: Option<String>,
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub external_id: String,
    pub email: String,
    pub display_name: String,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCardRequest {
    pub card_name: String,
    pub bank_name: String,
    pub last_four_digits: String,
    pub card_network: String,
    pub credit_limit: Decimal,
    pub due_date: Option<i32>,
    pub billing_cycle: Option<i32>,
    pub card_color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRewardRequest {
    pub card_id: String,
    pub reward_type: String,
    pub reward_value: String,
    pub condition: String,
    pub threshold: Decimal,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub expiry_date: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub card_id: String,
    pub merchant_name: String,
    pub amount: Decimal,
    pub category: SpendCategory,
    pub description: Option<String>,
}

/// Partial transaction edit; the date and source are immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTransactionRequest {
    pub merchant_name: Option<String>,
    pub category: Option<SpendCategory>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseSmsRequest {
    pub phone_number: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    pub card_id: Option<String>,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBillRequest {
    pub card_id: String,
    pub amount: Decimal,
    pub due_date: DateTime<Utc>,
    pub bill_month: String,
    pub minimum_due: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayBillRequest {
    /// Defaults to the bill's full amount when absent.
    pub amount: Option<Decimal>,
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertAutopayRequest {
    pub enabled: bool,
    pub payment_type: AutopayKind,
    pub days_before: i32,
    pub fixed_amount: Option<Decimal>,
    pub payment_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCreditScoreRequest {
    pub score: i32,
    pub provider: String,
    pub factors: Option<String>,
    pub suggestions: Option<String>,
}

// ---------------------------------------------------------------------------
// Response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseSmsResponse {
    pub success: bool,
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEmailsResponse {
    pub success: bool,
    /// Emails that produced a notification.
    pub count: u32,
    /// Emails fetched from the source.
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayBillResponse {
    pub payment: Payment,
    pub bill: Bill,
}

// ---------------------------------------------------------------------------
// Push channel
// ---------------------------------------------------------------------------

/// The single server -> client WebSocket message shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: NotificationPush,
}

/// Notification fields as pushed over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPush {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_id: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(notification: &Notification) -> Self {
        Self {
            kind: "notification".to_string(),
            data: NotificationPush {
                id: notification.id.clone(),
                kind: notification.kind,
                title: notification.title.clone(),
                message: notification.message.clone(),
                card_id: notification.card_id.clone(),
                read: notification.is_read,
                created_at: notification.created_at,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_category_coerces_to_other() {
        let cat: SpendCategory = serde_json::from_str("\"Gambling\"").unwrap();
        assert_eq!(cat, SpendCategory::Other);
        assert_eq!(SpendCategory::parse("Snacks"), SpendCategory::Other);
        assert_eq!(SpendCategory::parse("Fuel"), SpendCategory::Fuel);
    }

    #[test]
    fn notification_event_wire_shape() {
        let n = Notification {
            id: "n1".to_string(),
            card_id: Some("c1".to_string()),
            user_id: None,
            title: "New Transaction".to_string(),
            message: "₹500 spent at Amazon".to_string(),
            kind: NotificationKind::Transaction,
            is_read: false,
            created_at: chrono::Utc::now(),
            metadata: None,
        };
        let event = NotificationEvent::new(&n);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "notification");
        assert_eq!(json["data"]["type"], "transaction");
        assert_eq!(json["data"]["cardId"], "c1");
        assert_eq!(json["data"]["read"], false);
    }

    #[test]
    fn decimal_amounts_serialize_as_strings() {
        let req = CreateTransactionRequest {
            card_id: "c1".to_string(),
            merchant_name: "Amazon".to_string(),
            amount: "1500.00".parse().unwrap(),
            category: SpendCategory::Shopping,
            description: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"1500.00\""));
    }
}
