//! In-memory storage backend.
//!
//! Per-entity arenas keyed by id behind a single `RwLock`, with ownership
//! resolved by explicit parent-chain lookups so behavior matches the
//! SQLite backend's join predicates exactly. Holding one lock for the
//! whole operation also makes the balance/progress increments atomic.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;

use shared::{
    AutopaySettings, Bill, BillStatus, Card, CreateBillRequest, CreateCardRequest,
    CreateCreditScoreRequest, CreateNotificationRequest, CreateRewardRequest,
    CreateTransactionRequest, CreditScore, LoginRequest, Notification, ParseSmsRequest, Payment,
    Reward, SmsMessage, Transaction, TransactionSource, UpdateTransactionRequest,
    UpsertAutopayRequest, User,
};

use super::{new_id, now, NewPayment, Storage, StorageError, StorageResult};

#[derive(Default)]
struct Arenas {
    users: HashMap<String, User>,
    cards: HashMap<String, Card>,
    rewards: HashMap<String, Reward>,
    transactions: HashMap<String, Transaction>,
    notifications: HashMap<String, Notification>,
    sms_messages: HashMap<String, SmsMessage>,
    bills: HashMap<String, Bill>,
    payments: HashMap<String, Payment>,
    /// Keyed by card id: the at-most-one-per-card invariant by construction.
    autopay: HashMap<String, AutopaySettings>,
    credit_scores: HashMap<String, CreditScore>,
}

impl Arenas {
    fn owns_card(&self, card_id: &str, owner_id: &str) -> bool {
        self.cards
            .get(card_id)
            .is_some_and(|c| c.user_id == owner_id)
    }

    /// Resolve a notification's owning user: direct user id, or the
    /// owner of the referenced card.
    fn notification_owner(&self, n: &Notification) -> Option<String> {
        if let Some(user_id) = &n.user_id {
            return Some(user_id.clone());
        }
        n.card_id
            .as_ref()
            .and_then(|card_id| self.cards.get(card_id))
            .map(|c| c.user_id.clone())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Arenas>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Arenas> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arenas> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    // -- users ------------------------------------------------------------

    async fn upsert_user(&self, login: &LoginRequest) -> StorageResult<User> {
        let mut a = self.write();
        let existing = a
            .users
            .values()
            .find(|u| u.external_id == login.external_id)
            .map(|u| u.id.clone());

        let user = match existing {
            Some(id) => {
                let user = a.users.get_mut(&id).ok_or(StorageError::NotFound)?;
                user.email = login.email.clone();
                user.display_name = login.display_name.clone();
                user.profile_image_url = login.profile_image_url.clone();
                user.updated_at = now();
                user.clone()
            }
            None => {
                let ts = now();
                let user = User {
                    id: new_id(),
                    external_id: login.external_id.clone(),
                    email: login.email.clone(),
                    display_name: login.display_name.clone(),
                    profile_image_url: login.profile_image_url.clone(),
                    created_at: ts,
                    updated_at: ts,
                };
                a.users.insert(user.id.clone(), user.clone());
                user
            }
        };
        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> StorageResult<Option<User>> {
        Ok(self.read().users.get(user_id).cloned())
    }

    // -- cards ------------------------------------------------------------

    async fn list_cards(&self, owner_id: &str) -> StorageResult<Vec<Card>> {
        let a = self.read();
        let mut cards: Vec<Card> = a
            .cards
            .values()
            .filter(|c| c.user_id == owner_id)
            .cloned()
            .collect();
        cards.sort_by(|x, y| x.created_at.cmp(&y.created_at).then(x.id.cmp(&y.id)));
        Ok(cards)
    }

    async fn get_card(&self, id: &str, owner_id: &str) -> StorageResult<Option<Card>> {
        let a = self.read();
        Ok(a.cards
            .get(id)
            .filter(|c| c.user_id == owner_id)
            .cloned())
    }

    async fn create_card(&self, owner_id: &str, req: &CreateCardRequest) -> StorageResult<Card> {
        let mut a = self.write();
        if !a.users.contains_key(owner_id) {
            return Err(StorageError::NotFound);
        }
        let card = Card {
            id: new_id(),
            user_id: owner_id.to_string(),
            card_name: req.card_name.clone(),
            bank_name: req.bank_name.clone(),
            last_four_digits: req.last_four_digits.clone(),
            card_network: req.card_network.clone(),
            credit_limit: req.credit_limit,
            current_balance: Decimal::ZERO,
            due_date: req.due_date,
            billing_cycle: req.billing_cycle,
            card_color: req.card_color.clone(),
            created_at: now(),
        };
        a.cards.insert(card.id.clone(), card.clone());
        Ok(card)
    }

    async fn delete_card(&self, id: &str, owner_id: &str) -> StorageResult<bool> {
        let mut a = self.write();
        if !a.owns_card(id, owner_id) {
            return Ok(false);
        }
        a.cards.remove(id);
        a.rewards.retain(|_, r| r.card_id != id);
        a.transactions.retain(|_, t| t.card_id != id);
        a.bills.retain(|_, b| b.card_id != id);
        a.payments.retain(|_, p| p.card_id != id);
        a.autopay.remove(id);
        a.notifications
            .retain(|_, n| n.card_id.as_deref() != Some(id));
        Ok(true)
    }

    async fn add_to_card_balance(
        &self,
        id: &str,
        owner_id: &str,
        delta: Decimal,
    ) -> StorageResult<Option<Card>> {
        let mut a = self.write();
        if !a.owns_card(id, owner_id) {
            return Ok(None);
        }
        let card = a.cards.get_mut(id).ok_or(StorageError::NotFound)?;
        card.current_balance += delta;
        Ok(Some(card.clone()))
    }

    // -- rewards ----------------------------------------------------------

    async fn list_rewards(&self, owner_id: &str) -> StorageResult<Vec<Reward>> {
        let a = self.read();
        let mut rewards: Vec<Reward> = a
            .rewards
            .values()
            .filter(|r| a.owns_card(&r.card_id, owner_id))
            .cloned()
            .collect();
        rewards.sort_by(|x, y| x.id.cmp(&y.id));
        Ok(rewards)
    }

    async fn list_rewards_by_card(
        &self,
        card_id: &str,
        owner_id: &str,
    ) -> StorageResult<Vec<Reward>> {
        let a = self.read();
        if !a.owns_card(card_id, owner_id) {
            return Ok(Vec::new());
        }
        let mut rewards: Vec<Reward> = a
            .rewards
            .values()
            .filter(|r| r.card_id == card_id)
            .cloned()
            .collect();
        rewards.sort_by(|x, y| x.id.cmp(&y.id));
        Ok(rewards)
    }

    async fn create_reward(
        &self,
        owner_id: &str,
        req: &CreateRewardRequest,
    ) -> StorageResult<Reward> {
        let mut a = self.write();
        if !a.owns_card(&req.card_id, owner_id) {
            return Err(StorageError::NotFound);
        }
        let reward = Reward {
            id: new_id(),
            card_id: req.card_id.clone(),
            reward_type: req.reward_type.clone(),
            reward_value: req.reward_value.clone(),
            condition: req.condition.clone(),
            threshold: req.threshold,
            current_progress: Decimal::ZERO,
            is_active: req.is_active,
            expiry_date: req.expiry_date,
        };
        a.rewards.insert(reward.id.clone(), reward.clone());
        Ok(reward)
    }

    async fn add_to_reward_progress(
        &self,
        id: &str,
        owner_id: &str,
        delta: Decimal,
    ) -> StorageResult<Option<Reward>> {
        let mut a = self.write();
        let owned = a
            .rewards
            .get(id)
            .is_some_and(|r| a.owns_card(&r.card_id, owner_id));
        if !owned {
            return Ok(None);
        }
        let reward = a.rewards.get_mut(id).ok_or(StorageError::NotFound)?;
        reward.current_progress += delta;
        Ok(Some(reward.clone()))
    }

    // -- transactions -----------------------------------------------------

    async fn list_transactions(&self, owner_id: &str) -> StorageResult<Vec<Transaction>> {
        let a = self.read();
        let mut txs: Vec<Transaction> = a
            .transactions
            .values()
            .filter(|t| a.owns_card(&t.card_id, owner_id))
            .cloned()
            .collect();
        txs.sort_by(|x, y| y.transaction_date.cmp(&x.transaction_date).then(y.id.cmp(&x.id)));
        Ok(txs)
    }

    async fn list_transactions_by_card(
        &self,
        card_id: &str,
        owner_id: &str,
    ) -> StorageResult<Vec<Transaction>> {
        let a = self.read();
        if !a.owns_card(card_id, owner_id) {
            return Ok(Vec::new());
        }
        let mut txs: Vec<Transaction> = a
            .transactions
            .values()
            .filter(|t| t.card_id == card_id)
            .cloned()
            .collect();
        txs.sort_by(|x, y| y.transaction_date.cmp(&x.transaction_date).then(y.id.cmp(&x.id)));
        Ok(txs)
    }

    async fn create_transaction(
        &self,
        owner_id: &str,
        req: &CreateTransactionRequest,
        source: TransactionSource,
    ) -> StorageResult<Transaction> {
        let mut a = self.write();
        if !a.owns_card(&req.card_id, owner_id) {
            return Err(StorageError::NotFound);
        }
        let tx = Transaction {
            id: new_id(),
            card_id: req.card_id.clone(),
            merchant_name: req.merchant_name.clone(),
            amount: req.amount,
            category: req.category,
            transaction_date: now(),
            description: req.description.clone(),
            source,
        };
        a.transactions.insert(tx.id.clone(), tx.clone());
        Ok(tx)
    }

    async fn update_transaction(
        &self,
        id: &str,
        owner_id: &str,
        patch: &UpdateTransactionRequest,
    ) -> StorageResult<Option<Transaction>> {
        let mut a = self.write();
        let owned = a
            .transactions
            .get(id)
            .is_some_and(|t| a.owns_card(&t.card_id, owner_id));
        if !owned {
            return Ok(None);
        }
        let tx = a.transactions.get_mut(id).ok_or(StorageError::NotFound)?;
        if let Some(merchant) = &patch.merchant_name {
            tx.merchant_name = merchant.clone();
        }
        if let Some(category) = patch.category {
            tx.category = category;
        }
        if let Some(description) = &patch.description {
            tx.description = Some(description.clone());
        }
        Ok(Some(tx.clone()))
    }

    async fn delete_transaction(&self, id: &str, owner_id: &str) -> StorageResult<bool> {
        let mut a = self.write();
        let owned = a
            .transactions
            .get(id)
            .is_some_and(|t| a.owns_card(&t.card_id, owner_id));
        if !owned {
            return Ok(false);
        }
        a.transactions.remove(id);
        Ok(true)
    }

    // -- notifications ----------------------------------------------------

    async fn list_notifications(&self, owner_id: &str) -> StorageResult<Vec<Notification>> {
        let a = self.read();
        let mut notifications: Vec<Notification> = a
            .notifications
            .values()
            .filter(|n| a.notification_owner(n).as_deref() == Some(owner_id))
            .cloned()
            .collect();
        notifications.sort_by(|x, y| y.created_at.cmp(&x.created_at).then(y.id.cmp(&x.id)));
        Ok(notifications)
    }

    async fn create_notification(
        &self,
        owner_id: &str,
        req: &CreateNotificationRequest,
    ) -> StorageResult<Notification> {
        let mut a = self.write();
        let user_id = match &req.card_id {
            Some(card_id) => {
                if !a.owns_card(card_id, owner_id) {
                    return Err(StorageError::NotFound);
                }
                None
            }
            None => Some(owner_id.to_string()),
        };
        let notification = Notification {
            id: new_id(),
            card_id: req.card_id.clone(),
            user_id,
            title: req.title.clone(),
            message: req.message.clone(),
            kind: req.kind,
            is_read: false,
            created_at: now(),
            metadata: req.metadata.clone(),
        };
        a.notifications
            .insert(notification.id.clone(), notification.clone());
        Ok(notification)
    }

    async fn mark_notification_read(
        &self,
        id: &str,
        owner_id: &str,
    ) -> StorageResult<Option<Notification>> {
        let mut a = self.write();
        let owned = a
            .notifications
            .get(id)
            .is_some_and(|n| a.notification_owner(n).as_deref() == Some(owner_id));
        if !owned {
            return Ok(None);
        }
        let n = a.notifications.get_mut(id).ok_or(StorageError::NotFound)?;
        n.is_read = true;
        Ok(Some(n.clone()))
    }

    // -- sms audit log ----------------------------------------------------

    async fn list_sms_messages(&self, owner_id: &str) -> StorageResult<Vec<SmsMessage>> {
        let a = self.read();
        let mut messages: Vec<SmsMessage> = a
            .sms_messages
            .values()
            .filter(|m| m.user_id == owner_id)
            .cloned()
            .collect();
        messages.sort_by(|x, y| y.received_at.cmp(&x.received_at).then(y.id.cmp(&x.id)));
        Ok(messages)
    }

    async fn create_sms_message(
        &self,
        owner_id: &str,
        req: &ParseSmsRequest,
    ) -> StorageResult<SmsMessage> {
        let mut a = self.write();
        if !a.users.contains_key(owner_id) {
            return Err(StorageError::NotFound);
        }
        let sms = SmsMessage {
            id: new_id(),
            user_id: owner_id.to_string(),
            phone_number: req.phone_number.clone(),
            message: req.message.clone(),
            received_at: now(),
            processed: false,
            extracted_data: None,
        };
        a.sms_messages.insert(sms.id.clone(), sms.clone());
        Ok(sms)
    }

    async fn mark_sms_processed(
        &self,
        id: &str,
        owner_id: &str,
        extracted: Option<&str>,
    ) -> StorageResult<Option<SmsMessage>> {
        let mut a = self.write();
        let Some(sms) = a.sms_messages.get_mut(id) else {
            return Ok(None);
        };
        if sms.user_id != owner_id {
            return Ok(None);
        }
        sms.processed = true;
        sms.extracted_data = extracted.map(|s| s.to_string());
        Ok(Some(sms.clone()))
    }

    // -- bills & payments -------------------------------------------------

    async fn list_bills(&self, owner_id: &str) -> StorageResult<Vec<Bill>> {
        let a = self.read();
        let mut bills: Vec<Bill> = a
            .bills
            .values()
            .filter(|b| a.owns_card(&b.card_id, owner_id))
            .cloned()
            .collect();
        bills.sort_by(|x, y| x.due_date.cmp(&y.due_date).then(x.id.cmp(&y.id)));
        Ok(bills)
    }

    async fn get_bill(&self, id: &str, owner_id: &str) -> StorageResult<Option<Bill>> {
        let a = self.read();
        Ok(a.bills
            .get(id)
            .filter(|b| a.owns_card(&b.card_id, owner_id))
            .cloned())
    }

    async fn create_bill(&self, owner_id: &str, req: &CreateBillRequest) -> StorageResult<Bill> {
        let mut a = self.write();
        if !a.owns_card(&req.card_id, owner_id) {
            return Err(StorageError::NotFound);
        }
        let bill = Bill {
            id: new_id(),
            card_id: req.card_id.clone(),
            amount: req.amount,
            due_date: req.due_date,
            bill_month: req.bill_month.clone(),
            minimum_due: req.minimum_due,
            status: BillStatus::Pending,
            created_at: now(),
        };
        a.bills.insert(bill.id.clone(), bill.clone());
        Ok(bill)
    }

    async fn set_bill_status(
        &self,
        id: &str,
        owner_id: &str,
        status: BillStatus,
    ) -> StorageResult<Option<Bill>> {
        let mut a = self.write();
        let owned = a
            .bills
            .get(id)
            .is_some_and(|b| a.owns_card(&b.card_id, owner_id));
        if !owned {
            return Ok(None);
        }
        let bill = a.bills.get_mut(id).ok_or(StorageError::NotFound)?;
        bill.status = status;
        Ok(Some(bill.clone()))
    }

    async fn list_payments(&self, owner_id: &str) -> StorageResult<Vec<Payment>> {
        let a = self.read();
        let mut payments: Vec<Payment> = a
            .payments
            .values()
            .filter(|p| a.owns_card(&p.card_id, owner_id))
            .cloned()
            .collect();
        payments.sort_by(|x, y| y.payment_date.cmp(&x.payment_date).then(y.id.cmp(&x.id)));
        Ok(payments)
    }

    async fn create_payment(&self, owner_id: &str, new: &NewPayment) -> StorageResult<Payment> {
        let mut a = self.write();
        // The full chain: bill exists, belongs to the named card, card
        // belongs to the caller.
        let chain_ok = a
            .bills
            .get(&new.bill_id)
            .is_some_and(|b| b.card_id == new.card_id && a.owns_card(&b.card_id, owner_id));
        if !chain_ok {
            return Err(StorageError::NotFound);
        }
        let payment = Payment {
            id: new_id(),
            bill_id: new.bill_id.clone(),
            card_id: new.card_id.clone(),
            amount: new.amount,
            payment_date: now(),
            payment_method: new.payment_method.clone(),
            status: "completed".to_string(),
            transaction_id: new.transaction_id.clone(),
        };
        a.payments.insert(payment.id.clone(), payment.clone());
        Ok(payment)
    }

    // -- autopay ----------------------------------------------------------

    async fn get_autopay(
        &self,
        card_id: &str,
        owner_id: &str,
    ) -> StorageResult<Option<AutopaySettings>> {
        let a = self.read();
        if !a.owns_card(card_id, owner_id) {
            return Ok(None);
        }
        Ok(a.autopay.get(card_id).cloned())
    }

    async fn upsert_autopay(
        &self,
        card_id: &str,
        owner_id: &str,
        req: &UpsertAutopayRequest,
    ) -> StorageResult<Option<AutopaySettings>> {
        let mut a = self.write();
        if !a.owns_card(card_id, owner_id) {
            return Ok(None);
        }
        let ts = now();
        let settings = if a.autopay.contains_key(card_id) {
            let existing = a.autopay.get_mut(card_id).ok_or(StorageError::NotFound)?;
            existing.enabled = req.enabled;
            existing.payment_type = req.payment_type;
            existing.days_before = req.days_before;
            existing.fixed_amount = req.fixed_amount;
            existing.payment_method = req.payment_method.clone();
            existing.updated_at = ts;
            existing.clone()
        } else {
            let settings = AutopaySettings {
                id: new_id(),
                card_id: card_id.to_string(),
                enabled: req.enabled,
                payment_type: req.payment_type,
                days_before: req.days_before,
                fixed_amount: req.fixed_amount,
                payment_method: req.payment_method.clone(),
                created_at: ts,
                updated_at: ts,
            };
            a.autopay.insert(card_id.to_string(), settings.clone());
            settings
        };
        Ok(Some(settings))
    }

    // -- credit scores ----------------------------------------------------

    async fn list_credit_scores(&self, owner_id: &str) -> StorageResult<Vec<CreditScore>> {
        let a = self.read();
        let mut scores: Vec<CreditScore> = a
            .credit_scores
            .values()
            .filter(|s| s.user_id == owner_id)
            .cloned()
            .collect();
        scores.sort_by(|x, y| y.recorded_at.cmp(&x.recorded_at).then(y.id.cmp(&x.id)));
        Ok(scores)
    }

    async fn create_credit_score(
        &self,
        owner_id: &str,
        req: &CreateCreditScoreRequest,
    ) -> StorageResult<CreditScore> {
        let mut a = self.write();
        if !a.users.contains_key(owner_id) {
            return Err(StorageError::NotFound);
        }
        let score = CreditScore {
            id: new_id(),
            user_id: owner_id.to_string(),
            score: req.score,
            provider: req.provider.clone(),
            recorded_at: now(),
            factors: req.factors.clone(),
            suggestions: req.suggestions.clone(),
        };
        a.credit_scores.insert(score.id.clone(), score.clone());
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_user(store: &MemoryStorage, external_id: &str) -> User {
        store
            .upsert_user(&LoginRequest {
                external_id: external_id.to_string(),
                email: format!("{external_id}@example.com"),
                display_name: external_id.to_string(),
                profile_image_url: None,
            })
            .await
            .unwrap()
    }

    fn card_request(name: &str, last_four: &str) -> CreateCardRequest {
        CreateCardRequest {
            card_name: name.to_string(),
            bank_name: "HDFC".to_string(),
            last_four_digits: last_four.to_string(),
            card_network: "Visa".to_string(),
            credit_limit: "100000".parse().unwrap(),
            due_date: Some(15),
            billing_cycle: Some(1),
            card_color: None,
        }
    }

    #[tokio::test]
    async fn upsert_user_is_keyed_by_external_id() {
        let store = MemoryStorage::new();
        let first = seed_user(&store, "ext-1").await;
        let again = store
            .upsert_user(&LoginRequest {
                external_id: "ext-1".to_string(),
                email: "new@example.com".to_string(),
                display_name: "renamed".to_string(),
                profile_image_url: None,
            })
            .await
            .unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.email, "new@example.com");
    }

    #[tokio::test]
    async fn new_card_starts_with_zero_balance() {
        let store = MemoryStorage::new();
        let user = seed_user(&store, "ext-1").await;
        let card = store
            .create_card(&user.id, &card_request("Regalia", "1234"))
            .await
            .unwrap();
        assert_eq!(card.current_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn delete_card_cascades_to_dependents() {
        let store = MemoryStorage::new();
        let user = seed_user(&store, "ext-1").await;
        let card = store
            .create_card(&user.id, &card_request("Regalia", "1234"))
            .await
            .unwrap();
        store
            .create_reward(
                &user.id,
                &CreateRewardRequest {
                    card_id: card.id.clone(),
                    reward_type: "cashback".to_string(),
                    reward_value: "5%".to_string(),
                    condition: "spend".to_string(),
                    threshold: "1000".parse().unwrap(),
                    is_active: true,
                    expiry_date: None,
                },
            )
            .await
            .unwrap();

        assert!(store.delete_card(&card.id, &user.id).await.unwrap());
        assert!(store.list_rewards(&user.id).await.unwrap().is_empty());
        assert!(store.list_cards(&user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_notification_read_is_idempotent() {
        let store = MemoryStorage::new();
        let user = seed_user(&store, "ext-1").await;
        let n = store
            .create_notification(
                &user.id,
                &CreateNotificationRequest {
                    card_id: None,
                    title: "t".to_string(),
                    message: "m".to_string(),
                    kind: shared::NotificationKind::Other,
                    metadata: None,
                },
            )
            .await
            .unwrap();
        assert!(!n.is_read);

        let first = store
            .mark_notification_read(&n.id, &user.id)
            .await
            .unwrap()
            .unwrap();
        assert!(first.is_read);

        let second = store
            .mark_notification_read(&n.id, &user.id)
            .await
            .unwrap()
            .unwrap();
        assert!(second.is_read);
    }
}
