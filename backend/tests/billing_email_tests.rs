//! Bill payment and inbox-scan flows against the in-memory backend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use cardvault_backend::domain::{BillingService, EmailService};
use cardvault_backend::error::AppError;
use cardvault_backend::extractors::{
    EmailAnalysis, EmailAnalyzer, EmailKind, EmailSource, InboundEmail,
};
use cardvault_backend::storage::{MemoryStorage, Storage};
use cardvault_backend::ws::NotificationHub;
use shared::{
    BillStatus, CreateBillRequest, CreateCardRequest, LoginRequest, NotificationKind,
    PayBillRequest, User,
};

async fn seed_user(storage: &dyn Storage, external_id: &str) -> User {
    storage
        .upsert_user(&LoginRequest {
            external_id: external_id.to_string(),
            email: format!("{external_id}@example.com"),
            display_name: external_id.to_string(),
            profile_image_url: None,
        })
        .await
        .unwrap()
}

async fn seed_card(storage: &dyn Storage, owner_id: &str) -> shared::Card {
    storage
        .create_card(
            owner_id,
            &CreateCardRequest {
                card_name: "Platinum".to_string(),
                bank_name: "HDFC".to_string(),
                last_four_digits: "4532".to_string(),
                card_network: "Visa".to_string(),
                credit_limit: Decimal::new(200_000, 0),
                due_date: None,
                billing_cycle: None,
                card_color: None,
            },
        )
        .await
        .unwrap()
}

fn bill_request(card_id: &str, amount: i64) -> CreateBillRequest {
    CreateBillRequest {
        card_id: card_id.to_string(),
        amount: Decimal::new(amount, 0),
        due_date: Utc::now() + Duration::days(10),
        bill_month: "2024-06".to_string(),
        minimum_due: Decimal::new(amount / 10, 0),
    }
}

#[tokio::test]
async fn paying_a_bill_records_the_payment_and_flips_status() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let user = seed_user(storage.as_ref(), "alice").await;
    let card = seed_card(storage.as_ref(), &user.id).await;
    let bill = storage.create_bill(&user.id, &bill_request(&card.id, 15000)).await.unwrap();

    let svc = BillingService::new(storage.clone(), Arc::new(NotificationHub::new()));
    let response = svc
        .pay_bill(
            &user.id,
            &bill.id,
            &PayBillRequest {
                amount: None,
                payment_method: "upi".to_string(),
            },
        )
        .await
        .unwrap();

    // Amount defaults to the full bill.
    assert_eq!(response.payment.amount, Decimal::new(15000, 0));
    assert_eq!(response.bill.status, BillStatus::Paid);

    let payments = storage.list_payments(&user.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].bill_id, bill.id);

    let notifications = storage.list_notifications(&user.id).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::Payment);
}

#[tokio::test]
async fn a_partial_payment_amount_is_respected() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let user = seed_user(storage.as_ref(), "alice").await;
    let card = seed_card(storage.as_ref(), &user.id).await;
    let bill = storage.create_bill(&user.id, &bill_request(&card.id, 15000)).await.unwrap();

    let svc = BillingService::new(storage.clone(), Arc::new(NotificationHub::new()));
    let response = svc
        .pay_bill(
            &user.id,
            &bill.id,
            &PayBillRequest {
                amount: Some(Decimal::new(1500, 0)),
                payment_method: "upi".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(response.payment.amount, Decimal::new(1500, 0));
}

#[tokio::test]
async fn a_paid_bill_cannot_be_paid_again() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let user = seed_user(storage.as_ref(), "alice").await;
    let card = seed_card(storage.as_ref(), &user.id).await;
    let bill = storage.create_bill(&user.id, &bill_request(&card.id, 15000)).await.unwrap();

    let svc = BillingService::new(storage.clone(), Arc::new(NotificationHub::new()));
    let req = PayBillRequest {
        amount: None,
        payment_method: "upi".to_string(),
    };
    svc.pay_bill(&user.id, &bill.id, &req).await.unwrap();

    let second = svc.pay_bill(&user.id, &bill.id, &req).await;
    assert!(matches!(second, Err(AppError::Validation(_))));
    assert_eq!(storage.list_payments(&user.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn a_foreign_bill_cannot_be_paid() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let alice = seed_user(storage.as_ref(), "alice").await;
    let bob = seed_user(storage.as_ref(), "bob").await;
    let card = seed_card(storage.as_ref(), &alice.id).await;
    let bill = storage.create_bill(&alice.id, &bill_request(&card.id, 15000)).await.unwrap();

    let svc = BillingService::new(storage.clone(), Arc::new(NotificationHub::new()));
    let result = svc
        .pay_bill(
            &bob.id,
            &bill.id,
            &PayBillRequest {
                amount: None,
                payment_method: "upi".to_string(),
            },
        )
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

// -- inbox scan ------------------------------------------------------------

struct StaticInbox(Vec<InboundEmail>);

#[async_trait]
impl EmailSource for StaticInbox {
    async fn fetch_card_emails(&self) -> anyhow::Result<Vec<InboundEmail>> {
        Ok(self.0.clone())
    }
}

/// Classifies by subject keyword; "boom" simulates an analyzer outage
/// for that one email.
struct KeywordAnalyzer;

#[async_trait]
impl EmailAnalyzer for KeywordAnalyzer {
    async fn analyze(&self, email: &InboundEmail) -> anyhow::Result<Option<EmailAnalysis>> {
        if email.subject.contains("boom") {
            anyhow::bail!("analyzer unavailable");
        }
        let kind = if email.subject.contains("bill") {
            EmailKind::Bill
        } else if email.subject.contains("offer") {
            EmailKind::Offer
        } else if email.subject.contains("statement") {
            EmailKind::Statement
        } else {
            EmailKind::Other
        };
        Ok(Some(EmailAnalysis {
            kind,
            summary: format!("Summary of {}", email.subject),
            changes: Vec::new(),
            bill_amount: (kind == EmailKind::Bill).then(|| Decimal::new(15230, 0)),
            due_date: (kind == EmailKind::Bill).then(|| "2024-07-15".to_string()),
        }))
    }
}

fn email(id: &str, subject: &str) -> InboundEmail {
    InboundEmail {
        id: id.to_string(),
        from: "alerts@hdfcbank.com".to_string(),
        subject: subject.to_string(),
        body: "...".to_string(),
    }
}

#[tokio::test]
async fn inbox_scan_notifies_for_bills_offers_and_statements() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let user = seed_user(storage.as_ref(), "alice").await;

    let svc = EmailService::new(
        storage.clone(),
        Arc::new(NotificationHub::new()),
        Arc::new(StaticInbox(vec![
            email("e1", "your bill is ready"),
            email("e2", "exclusive offer inside"),
            email("e3", "monthly statement"),
            email("e4", "newsletter"),
        ])),
        Arc::new(KeywordAnalyzer),
    );
    let response = svc.scan_inbox(&user.id).await.unwrap();

    assert_eq!(response.total, 4);
    assert_eq!(response.count, 3);

    let notifications = storage.list_notifications(&user.id).await.unwrap();
    assert_eq!(notifications.len(), 3);
    // Inbox notifications are user-scoped, never tied to a card.
    assert!(notifications.iter().all(|n| n.card_id.is_none()));

    let bill = notifications
        .iter()
        .find(|n| n.kind == NotificationKind::Bill)
        .unwrap();
    assert!(bill.message.contains("15230"));
    assert!(bill.message.contains("2024-07-15"));
}

#[tokio::test]
async fn one_bad_email_does_not_stop_the_scan() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let user = seed_user(storage.as_ref(), "alice").await;

    let svc = EmailService::new(
        storage.clone(),
        Arc::new(NotificationHub::new()),
        Arc::new(StaticInbox(vec![
            email("e1", "boom"),
            email("e2", "exclusive offer inside"),
        ])),
        Arc::new(KeywordAnalyzer),
    );
    let response = svc.scan_inbox(&user.id).await.unwrap();

    assert_eq!(response.total, 2);
    assert_eq!(response.count, 1);
    assert_eq!(storage.list_notifications(&user.id).await.unwrap().len(), 1);
}
