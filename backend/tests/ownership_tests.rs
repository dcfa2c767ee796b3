//! Ownership scoping across both storage backends: a foreign id behaves
//! exactly like a missing id, on reads and on writes.

use std::sync::Arc;

use rust_decimal::Decimal;

use cardvault_backend::storage::{MemoryStorage, SqliteStorage, Storage, StorageError};
use shared::{
    CreateCardRequest, CreateCreditScoreRequest, CreateNotificationRequest, CreateRewardRequest,
    CreateTransactionRequest, LoginRequest, NotificationKind, ParseSmsRequest, SpendCategory,
    TransactionSource, UpdateTransactionRequest, UpsertAutopayRequest, User,
};

async fn backends() -> Vec<Arc<dyn Storage>> {
    vec![
        Arc::new(MemoryStorage::new()),
        Arc::new(SqliteStorage::in_memory().await.unwrap()),
    ]
}

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

fn card_request() -> CreateCardRequest {
    CreateCardRequest {
        card_name: "Platinum".to_string(),
        bank_name: "HDFC".to_string(),
        last_four_digits: "4532".to_string(),
        card_network: "Visa".to_string(),
        credit_limit: Decimal::new(200_000, 0),
        due_date: Some(15),
        billing_cycle: Some(1),
        card_color: None,
    }
}

fn transaction_request(card_id: &str) -> CreateTransactionRequest {
    CreateTransactionRequest {
        card_id: card_id.to_string(),
        merchant_name: "Amazon".to_string(),
        amount: Decimal::new(50000, 2),
        category: SpendCategory::Shopping,
        description: None,
    }
}

#[tokio::test]
async fn foreign_card_reads_like_a_missing_card() {
    for storage in backends().await {
        let alice = seed_user(storage.as_ref(), "alice").await;
        let bob = seed_user(storage.as_ref(), "bob").await;
        let card = storage.create_card(&alice.id, &card_request()).await.unwrap();

        assert!(storage.get_card(&card.id, &bob.id).await.unwrap().is_none());
        assert!(storage.get_card("no-such-id", &bob.id).await.unwrap().is_none());
        assert!(storage.list_cards(&bob.id).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn foreign_card_cannot_be_deleted_or_mutated() {
    for storage in backends().await {
        let alice = seed_user(storage.as_ref(), "alice").await;
        let bob = seed_user(storage.as_ref(), "bob").await;
        let card = storage.create_card(&alice.id, &card_request()).await.unwrap();

        assert!(!storage.delete_card(&card.id, &bob.id).await.unwrap());
        assert!(storage
            .add_to_card_balance(&card.id, &bob.id, Decimal::ONE)
            .await
            .unwrap()
            .is_none());

        // Still present and untouched for the owner.
        let still = storage.get_card(&card.id, &alice.id).await.unwrap().unwrap();
        assert_eq!(still.current_balance, Decimal::ZERO);
    }
}

#[tokio::test]
async fn creating_against_a_foreign_parent_is_not_found() {
    for storage in backends().await {
        let alice = seed_user(storage.as_ref(), "alice").await;
        let bob = seed_user(storage.as_ref(), "bob").await;
        let card = storage.create_card(&alice.id, &card_request()).await.unwrap();

        let reward = storage
            .create_reward(
                &bob.id,
                &CreateRewardRequest {
                    card_id: card.id.clone(),
                    reward_type: "cashback".to_string(),
                    reward_value: "5% cashback".to_string(),
                    condition: "spend 10000".to_string(),
                    threshold: Decimal::new(10_000, 0),
                    is_active: true,
                    expiry_date: None,
                },
            )
            .await;
        assert!(matches!(reward, Err(StorageError::NotFound)));

        let tx = storage
            .create_transaction(&bob.id, &transaction_request(&card.id), TransactionSource::Manual)
            .await;
        assert!(matches!(tx, Err(StorageError::NotFound)));
    }
}

#[tokio::test]
async fn foreign_transaction_edits_and_deletes_miss() {
    for storage in backends().await {
        let alice = seed_user(storage.as_ref(), "alice").await;
        let bob = seed_user(storage.as_ref(), "bob").await;
        let card = storage.create_card(&alice.id, &card_request()).await.unwrap();
        let tx = storage
            .create_transaction(&alice.id, &transaction_request(&card.id), TransactionSource::Manual)
            .await
            .unwrap();

        let patch = UpdateTransactionRequest {
            merchant_name: Some("Flipkart".to_string()),
            ..Default::default()
        };
        assert!(storage
            .update_transaction(&tx.id, &bob.id, &patch)
            .await
            .unwrap()
            .is_none());
        assert!(!storage.delete_transaction(&tx.id, &bob.id).await.unwrap());

        // The owner's edit goes through and leaves the amount alone.
        let updated = storage
            .update_transaction(&tx.id, &alice.id, &patch)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.merchant_name, "Flipkart");
        assert_eq!(updated.amount, tx.amount);
    }
}

#[tokio::test]
async fn notifications_are_scoped_through_card_or_user() {
    for storage in backends().await {
        let alice = seed_user(storage.as_ref(), "alice").await;
        let bob = seed_user(storage.as_ref(), "bob").await;
        let card = storage.create_card(&alice.id, &card_request()).await.unwrap();

        let card_scoped = storage
            .create_notification(
                &alice.id,
                &CreateNotificationRequest {
                    card_id: Some(card.id.clone()),
                    title: "t".to_string(),
                    message: "m".to_string(),
                    kind: NotificationKind::Transaction,
                    metadata: None,
                },
            )
            .await
            .unwrap();
        // Exactly one owner reference is set.
        assert!(card_scoped.card_id.is_some());
        assert!(card_scoped.user_id.is_none());

        let user_scoped = storage
            .create_notification(
                &alice.id,
                &CreateNotificationRequest {
                    card_id: None,
                    title: "t".to_string(),
                    message: "m".to_string(),
                    kind: NotificationKind::Offer,
                    metadata: None,
                },
            )
            .await
            .unwrap();
        assert!(user_scoped.card_id.is_none());
        assert_eq!(user_scoped.user_id.as_deref(), Some(alice.id.as_str()));

        // Bob sees neither, and cannot mark either read.
        assert!(storage.list_notifications(&bob.id).await.unwrap().is_empty());
        assert!(storage
            .mark_notification_read(&card_scoped.id, &bob.id)
            .await
            .unwrap()
            .is_none());

        let alices = storage.list_notifications(&alice.id).await.unwrap();
        assert_eq!(alices.len(), 2);

        // Creating a card-scoped notification against a foreign card fails.
        let foreign = storage
            .create_notification(
                &bob.id,
                &CreateNotificationRequest {
                    card_id: Some(card.id.clone()),
                    title: "t".to_string(),
                    message: "m".to_string(),
                    kind: NotificationKind::Transaction,
                    metadata: None,
                },
            )
            .await;
        assert!(matches!(foreign, Err(StorageError::NotFound)));
    }
}

#[tokio::test]
async fn autopay_is_scoped_and_unique_per_card() {
    for storage in backends().await {
        let alice = seed_user(storage.as_ref(), "alice").await;
        let bob = seed_user(storage.as_ref(), "bob").await;
        let card = storage.create_card(&alice.id, &card_request()).await.unwrap();

        let req = UpsertAutopayRequest {
            enabled: true,
            payment_type: shared::AutopayKind::Minimum,
            days_before: 3,
            fixed_amount: None,
            payment_method: "upi".to_string(),
        };
        assert!(storage
            .upsert_autopay(&card.id, &bob.id, &req)
            .await
            .unwrap()
            .is_none());

        let first = storage
            .upsert_autopay(&card.id, &alice.id, &req)
            .await
            .unwrap()
            .unwrap();
        let second = storage
            .upsert_autopay(
                &card.id,
                &alice.id,
                &UpsertAutopayRequest {
                    enabled: false,
                    ..req.clone()
                },
            )
            .await
            .unwrap()
            .unwrap();

        // Same row updated in place, never a second one.
        assert_eq!(first.id, second.id);
        assert!(!second.enabled);
        assert!(storage.get_autopay(&card.id, &bob.id).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn writes_for_an_unknown_owner_are_not_found() {
    for storage in backends().await {
        let card = storage.create_card("ghost", &card_request()).await;
        assert!(matches!(card, Err(StorageError::NotFound)));

        let sms = storage
            .create_sms_message(
                "ghost",
                &ParseSmsRequest {
                    phone_number: "AX-HDFCBK".to_string(),
                    message: "Rs 250 spent".to_string(),
                },
            )
            .await;
        assert!(matches!(sms, Err(StorageError::NotFound)));

        let score = storage
            .create_credit_score(
                "ghost",
                &CreateCreditScoreRequest {
                    score: 780,
                    provider: "CIBIL".to_string(),
                    factors: None,
                    suggestions: None,
                },
            )
            .await;
        assert!(matches!(score, Err(StorageError::NotFound)));
    }
}

#[tokio::test]
async fn deleting_a_card_removes_its_dependents() {
    for storage in backends().await {
        let alice = seed_user(storage.as_ref(), "alice").await;
        let card = storage.create_card(&alice.id, &card_request()).await.unwrap();
        storage
            .create_transaction(&alice.id, &transaction_request(&card.id), TransactionSource::Manual)
            .await
            .unwrap();
        storage
            .create_notification(
                &alice.id,
                &CreateNotificationRequest {
                    card_id: Some(card.id.clone()),
                    title: "t".to_string(),
                    message: "m".to_string(),
                    kind: NotificationKind::Transaction,
                    metadata: None,
                },
            )
            .await
            .unwrap();

        assert!(storage.delete_card(&card.id, &alice.id).await.unwrap());
        assert!(storage.list_transactions(&alice.id).await.unwrap().is_empty());
        assert!(storage.list_notifications(&alice.id).await.unwrap().is_empty());
    }
}
