//! SQLite storage backend.
//!
//! Ownership checks are expressed as join/filter predicates so a scoped
//! query can only ever see rows whose chain reaches the calling user.
//! Timestamps are stored as RFC 3339 text (microsecond precision, so
//! lexicographic order is chronological) and monetary values as exact
//! decimal text, parsed back through `rust_decimal`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{migrate::MigrateDatabase, Row, Sqlite, SqlitePool};

use shared::{
    AutopaySettings, AutopayKind, Bill, BillStatus, Card, CreateBillRequest, CreateCardRequest,
    CreateCreditScoreRequest, CreateNotificationRequest, CreateRewardRequest,
    CreateTransactionRequest, CreditScore, LoginRequest, Notification, NotificationKind,
    ParseSmsRequest, Payment, Reward, SmsMessage, SpendCategory, Transaction, TransactionSource,
    UpdateTransactionRequest, UpsertAutopayRequest, User,
};

use super::{new_id, now, NewPayment, Storage, StorageError, StorageResult};

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Connect to `url`, creating the database file and schema if needed.
    pub async fn connect(url: &str) -> StorageResult<Self> {
        if !Sqlite::database_exists(url).await.unwrap_or(false) {
            Sqlite::create_database(url).await?;
        }
        let pool = SqlitePool::connect(url).await?;
        let storage = Self { pool };
        storage.setup_schema().await?;
        Ok(storage)
    }

    /// A private in-memory database, one per call. Used by tests and by
    /// dev setups that do not want a file on disk.
    pub async fn in_memory() -> StorageResult<Self> {
        let url = format!(
            "file:memdb_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4()
        );
        Self::connect(&url).await
    }

    async fn setup_schema(&self) -> StorageResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn user_exists(&self, user_id: &str) -> StorageResult<bool> {
        let row = sqlx::query("SELECT 1 FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn owns_card(&self, card_id: &str, owner_id: &str) -> StorageResult<bool> {
        let row = sqlx::query("SELECT 1 FROM cards WHERE id = ? AND user_id = ?")
            .bind(card_id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

const SCHEMA: &[&str] = &[
    r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                external_id TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL,
                display_name TEXT NOT NULL,
                profile_image_url TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
    "#,
    r#"
            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                card_name TEXT NOT NULL,
                bank_name TEXT NOT NULL,
                last_four_digits TEXT NOT NULL,
                card_network TEXT NOT NULL,
                credit_limit TEXT NOT NULL,
                current_balance TEXT NOT NULL DEFAULT '0',
                due_date INTEGER,
                billing_cycle INTEGER,
                card_color TEXT,
                created_at TEXT NOT NULL
            );
    "#,
    r#"
            CREATE TABLE IF NOT EXISTS rewards (
                id TEXT PRIMARY KEY,
                card_id TEXT NOT NULL REFERENCES cards(id),
                reward_type TEXT NOT NULL,
                reward_value TEXT NOT NULL,
                condition TEXT NOT NULL,
                threshold TEXT NOT NULL,
                current_progress TEXT NOT NULL DEFAULT '0',
                is_active INTEGER NOT NULL DEFAULT 1,
                expiry_date TEXT
            );
    "#,
    r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                card_id TEXT NOT NULL REFERENCES cards(id),
                merchant_name TEXT NOT NULL,
                amount TEXT NOT NULL,
                category TEXT NOT NULL,
                transaction_date TEXT NOT NULL,
                description TEXT,
                source TEXT NOT NULL DEFAULT 'manual'
            );
    "#,
    r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                card_id TEXT REFERENCES cards(id),
                user_id TEXT REFERENCES users(id),
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                type TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                metadata TEXT
            );
    "#,
    r#"
            CREATE TABLE IF NOT EXISTS sms_messages (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                phone_number TEXT NOT NULL,
                message TEXT NOT NULL,
                received_at TEXT NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0,
                extracted_data TEXT
            );
    "#,
    r#"
            CREATE TABLE IF NOT EXISTS bills (
                id TEXT PRIMARY KEY,
                card_id TEXT NOT NULL REFERENCES cards(id),
                amount TEXT NOT NULL,
                due_date TEXT NOT NULL,
                bill_month TEXT NOT NULL,
                minimum_due TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            );
    "#,
    r#"
            CREATE TABLE IF NOT EXISTS payments (
                id TEXT PRIMARY KEY,
                bill_id TEXT NOT NULL REFERENCES bills(id),
                card_id TEXT NOT NULL REFERENCES cards(id),
                amount TEXT NOT NULL,
                payment_date TEXT NOT NULL,
                payment_method TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'completed',
                transaction_id TEXT
            );
    "#,
    r#"
            CREATE TABLE IF NOT EXISTS autopay_settings (
                id TEXT PRIMARY KEY,
                card_id TEXT NOT NULL UNIQUE REFERENCES cards(id),
                enabled INTEGER NOT NULL DEFAULT 0,
                payment_type TEXT NOT NULL DEFAULT 'minimum',
                days_before INTEGER NOT NULL DEFAULT 3,
                fixed_amount TEXT,
                payment_method TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
    "#,
    r#"
            CREATE TABLE IF NOT EXISTS credit_scores (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                score INTEGER NOT NULL,
                provider TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                factors TEXT,
                suggestions TEXT
            );
    "#,
];

// -- row decoding -----------------------------------------------------------

fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp {s:?}: {e}")))
}

fn parse_dec(s: &str) -> StorageResult<Decimal> {
    s.parse::<Decimal>()
        .map_err(|e| StorageError::Corrupt(format!("decimal {s:?}: {e}")))
}

fn opt_ts(value: Option<String>) -> StorageResult<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

fn opt_dec(value: Option<String>) -> StorageResult<Option<Decimal>> {
    value.as_deref().map(parse_dec).transpose()
}

fn user_from_row(row: &SqliteRow) -> StorageResult<User> {
    Ok(User {
        id: row.get("id"),
        external_id: row.get("external_id"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        profile_image_url: row.get("profile_image_url"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
    })
}

fn card_from_row(row: &SqliteRow) -> StorageResult<Card> {
    Ok(Card {
        id: row.get("id"),
        user_id: row.get("user_id"),
        card_name: row.get("card_name"),
        bank_name: row.get("bank_name"),
        last_four_digits: row.get("last_four_digits"),
        card_network: row.get("card_network"),
        credit_limit: parse_dec(&row.get::<String, _>("credit_limit"))?,
        current_balance: parse_dec(&row.get::<String, _>("current_balance"))?,
        due_date: row.get("due_date"),
        billing_cycle: row.get("billing_cycle"),
        card_color: row.get("card_color"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

fn reward_from_row(row: &SqliteRow) -> StorageResult<Reward> {
    Ok(Reward {
        id: row.get("id"),
        card_id: row.get("card_id"),
        reward_type: row.get("reward_type"),
        reward_value: row.get("reward_value"),
        condition: row.get("condition"),
        threshold: parse_dec(&row.get::<String, _>("threshold"))?,
        current_progress: parse_dec(&row.get::<String, _>("current_progress"))?,
        is_active: row.get::<i64, _>("is_active") != 0,
        expiry_date: opt_ts(row.get("expiry_date"))?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> StorageResult<Transaction> {
    let source: String = row.get("source");
    Ok(Transaction {
        id: row.get("id"),
        card_id: row.get("card_id"),
        merchant_name: row.get("merchant_name"),
        amount: parse_dec(&row.get::<String, _>("amount"))?,
        category: SpendCategory::parse(&row.get::<String, _>("category")),
        transaction_date: parse_ts(&row.get::<String, _>("transaction_date"))?,
        description: row.get("description"),
        source: TransactionSource::parse(&source)
            .ok_or_else(|| StorageError::Corrupt(format!("transaction source {source:?}")))?,
    })
}

fn notification_from_row(row: &SqliteRow) -> StorageResult<Notification> {
    Ok(Notification {
        id: row.get("id"),
        card_id: row.get("card_id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        message: row.get("message"),
        kind: NotificationKind::parse(&row.get::<String, _>("type")),
        is_read: row.get::<i64, _>("is_read") != 0,
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        metadata: row.get("metadata"),
    })
}

fn sms_from_row(row: &SqliteRow) -> StorageResult<SmsMessage> {
    Ok(SmsMessage {
        id: row.get("id"),
        user_id: row.get("user_id"),
        phone_number: row.get("phone_number"),
        message: row.get("message"),
        received_at: parse_ts(&row.get::<String, _>("received_at"))?,
        processed: row.get::<i64, _>("processed") != 0,
        extracted_data: row.get("extracted_data"),
    })
}

fn bill_from_row(row: &SqliteRow) -> StorageResult<Bill> {
    let status: String = row.get("status");
    Ok(Bill {
        id: row.get("id"),
        card_id: row.get("card_id"),
        amount: parse_dec(&row.get::<String, _>("amount"))?,
        due_date: parse_ts(&row.get::<String, _>("due_date"))?,
        bill_month: row.get("bill_month"),
        minimum_due: parse_dec(&row.get::<String, _>("minimum_due"))?,
        status: BillStatus::parse(&status)
            .ok_or_else(|| StorageError::Corrupt(format!("bill status {status:?}")))?,
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

fn payment_from_row(row: &SqliteRow) -> StorageResult<Payment> {
    Ok(Payment {
        id: row.get("id"),
        bill_id: row.get("bill_id"),
        card_id: row.get("card_id"),
        amount: parse_dec(&row.get::<String, _>("amount"))?,
        payment_date: parse_ts(&row.get::<String, _>("payment_date"))?,
        payment_method: row.get("payment_method"),
        status: row.get("status"),
        transaction_id: row.get("transaction_id"),
    })
}

fn autopay_from_row(row: &SqliteRow) -> StorageResult<AutopaySettings> {
    let payment_type: String = row.get("payment_type");
    Ok(AutopaySettings {
        id: row.get("id"),
        card_id: row.get("card_id"),
        enabled: row.get::<i64, _>("enabled") != 0,
        payment_type: AutopayKind::parse(&payment_type)
            .ok_or_else(|| StorageError::Corrupt(format!("autopay type {payment_type:?}")))?,
        days_before: row.get("days_before"),
        fixed_amount: opt_dec(row.get("fixed_amount"))?,
        payment_method: row.get("payment_method"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
    })
}

fn credit_score_from_row(row: &SqliteRow) -> StorageResult<CreditScore> {
    Ok(CreditScore {
        id: row.get("id"),
        user_id: row.get("user_id"),
        score: row.get("score"),
        provider: row.get("provider"),
        recorded_at: parse_ts(&row.get::<String, _>("recorded_at"))?,
        factors: row.get("factors"),
        suggestions: row.get("suggestions"),
    })
}

fn collect<T>(
    rows: Vec<SqliteRow>,
    decode: fn(&SqliteRow) -> StorageResult<T>,
) -> StorageResult<Vec<T>> {
    rows.iter().map(decode).collect()
}

#[async_trait]
impl Storage for SqliteStorage {
    // -- users ------------------------------------------------------------

    async fn upsert_user(&self, login: &LoginRequest) -> StorageResult<User> {
        let ts = fmt_ts(&now());
        sqlx::query(
            r#"
            INSERT INTO users (id, external_id, email, display_name, profile_image_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO UPDATE SET
                email = excluded.email,
                display_name = excluded.display_name,
                profile_image_url = excluded.profile_image_url,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(new_id())
        .bind(&login.external_id)
        .bind(&login.email)
        .bind(&login.display_name)
        .bind(&login.profile_image_url)
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM users WHERE external_id = ?")
            .bind(&login.external_id)
            .fetch_one(&self.pool)
            .await?;
        user_from_row(&row)
    }

    async fn get_user(&self, user_id: &str) -> StorageResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    // -- cards ------------------------------------------------------------

    async fn list_cards(&self, owner_id: &str) -> StorageResult<Vec<Card>> {
        let rows = sqlx::query(
            "SELECT * FROM cards WHERE user_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, card_from_row)
    }

    async fn get_card(&self, id: &str, owner_id: &str) -> StorageResult<Option<Card>> {
        let row = sqlx::query("SELECT * FROM cards WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(card_from_row).transpose()
    }

    async fn create_card(&self, owner_id: &str, req: &CreateCardRequest) -> StorageResult<Card> {
        if !self.user_exists(owner_id).await? {
            return Err(StorageError::NotFound);
        }

        let id = new_id();
        sqlx::query(
            r#"
            INSERT INTO cards (id, user_id, card_name, bank_name, last_four_digits,
                               card_network, credit_limit, current_balance, due_date,
                               billing_cycle, card_color, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, '0', ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(owner_id)
        .bind(&req.card_name)
        .bind(&req.bank_name)
        .bind(&req.last_four_digits)
        .bind(&req.card_network)
        .bind(req.credit_limit.to_string())
        .bind(req.due_date)
        .bind(req.billing_cycle)
        .bind(&req.card_color)
        .bind(fmt_ts(&now()))
        .execute(&self.pool)
        .await?;

        self.get_card(&id, owner_id)
            .await?
            .ok_or(StorageError::NotFound)
    }

    async fn delete_card(&self, id: &str, owner_id: &str) -> StorageResult<bool> {
        if !self.owns_card(id, owner_id).await? {
            return Ok(false);
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM payments WHERE card_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM bills WHERE card_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM rewards WHERE card_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM transactions WHERE card_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM autopay_settings WHERE card_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM notifications WHERE card_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM cards WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_to_card_balance(
        &self,
        id: &str,
        owner_id: &str,
        delta: Decimal,
    ) -> StorageResult<Option<Card>> {
        // Read-modify-write inside one database transaction; decimal text
        // cannot be incremented server-side without losing exactness.
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM cards WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else { return Ok(None) };
        let mut card = card_from_row(&row)?;
        card.current_balance += delta;
        sqlx::query("UPDATE cards SET current_balance = ? WHERE id = ?")
            .bind(card.current_balance.to_string())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(card))
    }

    // -- rewards ----------------------------------------------------------

    async fn list_rewards(&self, owner_id: &str) -> StorageResult<Vec<Reward>> {
        let rows = sqlx::query(
            r#"
            SELECT r.* FROM rewards r
            JOIN cards c ON r.card_id = c.id
            WHERE c.user_id = ?
            ORDER BY r.id ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, reward_from_row)
    }

    async fn list_rewards_by_card(
        &self,
        card_id: &str,
        owner_id: &str,
    ) -> StorageResult<Vec<Reward>> {
        let rows = sqlx::query(
            r#"
            SELECT r.* FROM rewards r
            JOIN cards c ON r.card_id = c.id
            WHERE r.card_id = ? AND c.user_id = ?
            ORDER BY r.id ASC
            "#,
        )
        .bind(card_id)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, reward_from_row)
    }

    async fn create_reward(
        &self,
        owner_id: &str,
        req: &CreateRewardRequest,
    ) -> StorageResult<Reward> {
        if !self.owns_card(&req.card_id, owner_id).await? {
            return Err(StorageError::NotFound);
        }
        let id = new_id();
        sqlx::query(
            r#"
            INSERT INTO rewards (id, card_id, reward_type, reward_value, condition,
                                 threshold, current_progress, is_active, expiry_date)
            VALUES (?, ?, ?, ?, ?, ?, '0', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&req.card_id)
        .bind(&req.reward_type)
        .bind(&req.reward_value)
        .bind(&req.condition)
        .bind(req.threshold.to_string())
        .bind(req.is_active as i64)
        .bind(req.expiry_date.as_ref().map(fmt_ts))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM rewards WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        reward_from_row(&row)
    }

    async fn add_to_reward_progress(
        &self,
        id: &str,
        owner_id: &str,
        delta: Decimal,
    ) -> StorageResult<Option<Reward>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT r.* FROM rewards r
            JOIN cards c ON r.card_id = c.id
            WHERE r.id = ? AND c.user_id = ?
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let mut reward = reward_from_row(&row)?;
        reward.current_progress += delta;
        sqlx::query("UPDATE rewards SET current_progress = ? WHERE id = ?")
            .bind(reward.current_progress.to_string())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(reward))
    }

    // -- transactions -----------------------------------------------------

    async fn list_transactions(&self, owner_id: &str) -> StorageResult<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT t.* FROM transactions t
            JOIN cards c ON t.card_id = c.id
            WHERE c.user_id = ?
            ORDER BY t.transaction_date DESC, t.id DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, transaction_from_row)
    }

    async fn list_transactions_by_card(
        &self,
        card_id: &str,
        owner_id: &str,
    ) -> StorageResult<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT t.* FROM transactions t
            JOIN cards c ON t.card_id = c.id
            WHERE t.card_id = ? AND c.user_id = ?
            ORDER BY t.transaction_date DESC, t.id DESC
            "#,
        )
        .bind(card_id)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, transaction_from_row)
    }

    async fn create_transaction(
        &self,
        owner_id: &str,
        req: &CreateTransactionRequest,
        source: TransactionSource,
    ) -> StorageResult<Transaction> {
        if !self.owns_card(&req.card_id, owner_id).await? {
            return Err(StorageError::NotFound);
        }
        let id = new_id();
        sqlx::query(
            r#"
            INSERT INTO transactions (id, card_id, merchant_name, amount, category,
                                      transaction_date, description, source)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&req.card_id)
        .bind(&req.merchant_name)
        .bind(req.amount.to_string())
        .bind(req.category.as_str())
        .bind(fmt_ts(&now()))
        .bind(&req.description)
        .bind(source.as_str())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM transactions WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        transaction_from_row(&row)
    }

    async fn update_transaction(
        &self,
        id: &str,
        owner_id: &str,
        patch: &UpdateTransactionRequest,
    ) -> StorageResult<Option<Transaction>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT t.* FROM transactions t
            JOIN cards c ON t.card_id = c.id
            WHERE t.id = ? AND c.user_id = ?
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let mut transaction = transaction_from_row(&row)?;
        if let Some(merchant) = &patch.merchant_name {
            transaction.merchant_name = merchant.clone();
        }
        if let Some(category) = patch.category {
            transaction.category = category;
        }
        if let Some(description) = &patch.description {
            transaction.description = Some(description.clone());
        }
        sqlx::query(
            "UPDATE transactions SET merchant_name = ?, category = ?, description = ? WHERE id = ?",
        )
        .bind(&transaction.merchant_name)
        .bind(transaction.category.as_str())
        .bind(&transaction.description)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(transaction))
    }

    async fn delete_transaction(&self, id: &str, owner_id: &str) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM transactions
            WHERE id = ? AND card_id IN (SELECT id FROM cards WHERE user_id = ?)
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- notifications ----------------------------------------------------

    async fn list_notifications(&self, owner_id: &str) -> StorageResult<Vec<Notification>> {
        let rows = sqlx::query(
            r#"
            SELECT n.* FROM notifications n
            LEFT JOIN cards c ON n.card_id = c.id
            WHERE n.user_id = ? OR c.user_id = ?
            ORDER BY n.created_at DESC, n.id DESC
            "#,
        )
        .bind(owner_id)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, notification_from_row)
    }

    async fn create_notification(
        &self,
        owner_id: &str,
        req: &CreateNotificationRequest,
    ) -> StorageResult<Notification> {
        let user_id = match &req.card_id {
            Some(card_id) => {
                if !self.owns_card(card_id, owner_id).await? {
                    return Err(StorageError::NotFound);
                }
                None
            }
            None => Some(owner_id.to_string()),
        };
        let id = new_id();
        sqlx::query(
            r#"
            INSERT INTO notifications (id, card_id, user_id, title, message, type,
                                       is_read, created_at, metadata)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&req.card_id)
        .bind(&user_id)
        .bind(&req.title)
        .bind(&req.message)
        .bind(req.kind.as_str())
        .bind(fmt_ts(&now()))
        .bind(&req.metadata)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM notifications WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        notification_from_row(&row)
    }

    async fn mark_notification_read(
        &self,
        id: &str,
        owner_id: &str,
    ) -> StorageResult<Option<Notification>> {
        let result = sqlx::query(
            r#"
            UPDATE notifications SET is_read = 1
            WHERE id = ? AND (
                user_id = ?
                OR card_id IN (SELECT id FROM cards WHERE user_id = ?)
            )
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        let row = sqlx::query("SELECT * FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        notification_from_row(&row).map(Some)
    }

    // -- sms audit log ----------------------------------------------------

    async fn list_sms_messages(&self, owner_id: &str) -> StorageResult<Vec<SmsMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM sms_messages WHERE user_id = ? ORDER BY received_at DESC, id DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, sms_from_row)
    }

    async fn create_sms_message(
        &self,
        owner_id: &str,
        req: &ParseSmsRequest,
    ) -> StorageResult<SmsMessage> {
        if !self.user_exists(owner_id).await? {
            return Err(StorageError::NotFound);
        }
        let id = new_id();
        sqlx::query(
            r#"
            INSERT INTO sms_messages (id, user_id, phone_number, message, received_at, processed)
            VALUES (?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&id)
        .bind(owner_id)
        .bind(&req.phone_number)
        .bind(&req.message)
        .bind(fmt_ts(&now()))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM sms_messages WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        sms_from_row(&row)
    }

    async fn mark_sms_processed(
        &self,
        id: &str,
        owner_id: &str,
        extracted: Option<&str>,
    ) -> StorageResult<Option<SmsMessage>> {
        let result = sqlx::query(
            "UPDATE sms_messages SET processed = 1, extracted_data = ? WHERE id = ? AND user_id = ?",
        )
        .bind(extracted)
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        let row = sqlx::query("SELECT * FROM sms_messages WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        sms_from_row(&row).map(Some)
    }

    // -- bills & payments -------------------------------------------------

    async fn list_bills(&self, owner_id: &str) -> StorageResult<Vec<Bill>> {
        let rows = sqlx::query(
            r#"
            SELECT b.* FROM bills b
            JOIN cards c ON b.card_id = c.id
            WHERE c.user_id = ?
            ORDER BY b.due_date ASC, b.id ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, bill_from_row)
    }

    async fn get_bill(&self, id: &str, owner_id: &str) -> StorageResult<Option<Bill>> {
        let row = sqlx::query(
            r#"
            SELECT b.* FROM bills b
            JOIN cards c ON b.card_id = c.id
            WHERE b.id = ? AND c.user_id = ?
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(bill_from_row).transpose()
    }

    async fn create_bill(&self, owner_id: &str, req: &CreateBillRequest) -> StorageResult<Bill> {
        if !self.owns_card(&req.card_id, owner_id).await? {
            return Err(StorageError::NotFound);
        }
        let id = new_id();
        sqlx::query(
            r#"
            INSERT INTO bills (id, card_id, amount, due_date, bill_month, minimum_due,
                               status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(&id)
        .bind(&req.card_id)
        .bind(req.amount.to_string())
        .bind(fmt_ts(&req.due_date))
        .bind(&req.bill_month)
        .bind(req.minimum_due.to_string())
        .bind(fmt_ts(&now()))
        .execute(&self.pool)
        .await?;

        self.get_bill(&id, owner_id)
            .await?
            .ok_or(StorageError::NotFound)
    }

    async fn set_bill_status(
        &self,
        id: &str,
        owner_id: &str,
        status: BillStatus,
    ) -> StorageResult<Option<Bill>> {
        let result = sqlx::query(
            r#"
            UPDATE bills SET status = ?
            WHERE id = ? AND card_id IN (SELECT id FROM cards WHERE user_id = ?)
            "#,
        )
        .bind(status.as_str())
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_bill(id, owner_id).await
    }

    async fn list_payments(&self, owner_id: &str) -> StorageResult<Vec<Payment>> {
        let rows = sqlx::query(
            r#"
            SELECT p.* FROM payments p
            JOIN cards c ON p.card_id = c.id
            WHERE c.user_id = ?
            ORDER BY p.payment_date DESC, p.id DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, payment_from_row)
    }

    async fn create_payment(&self, owner_id: &str, new: &NewPayment) -> StorageResult<Payment> {
        // Bill -> card -> user chain must hold before the insert.
        let chain = sqlx::query(
            r#"
            SELECT 1 FROM bills b
            JOIN cards c ON b.card_id = c.id
            WHERE b.id = ? AND b.card_id = ? AND c.user_id = ?
            "#,
        )
        .bind(&new.bill_id)
        .bind(&new.card_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        if chain.is_none() {
            return Err(StorageError::NotFound);
        }

        let id = new_id();
        sqlx::query(
            r#"
            INSERT INTO payments (id, bill_id, card_id, amount, payment_date,
                                  payment_method, status, transaction_id)
            VALUES (?, ?, ?, ?, ?, ?, 'completed', ?)
            "#,
        )
        .bind(&id)
        .bind(&new.bill_id)
        .bind(&new.card_id)
        .bind(new.amount.to_string())
        .bind(fmt_ts(&now()))
        .bind(&new.payment_method)
        .bind(&new.transaction_id)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM payments WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        payment_from_row(&row)
    }

    // -- autopay ----------------------------------------------------------

    async fn get_autopay(
        &self,
        card_id: &str,
        owner_id: &str,
    ) -> StorageResult<Option<AutopaySettings>> {
        let row = sqlx::query(
            r#"
            SELECT a.* FROM autopay_settings a
            JOIN cards c ON a.card_id = c.id
            WHERE a.card_id = ? AND c.user_id = ?
            "#,
        )
        .bind(card_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(autopay_from_row).transpose()
    }

    async fn upsert_autopay(
        &self,
        card_id: &str,
        owner_id: &str,
        req: &UpsertAutopayRequest,
    ) -> StorageResult<Option<AutopaySettings>> {
        if !self.owns_card(card_id, owner_id).await? {
            return Ok(None);
        }
        let ts = fmt_ts(&now());
        sqlx::query(
            r#"
            INSERT INTO autopay_settings (id, card_id, enabled, payment_type, days_before,
                                          fixed_amount, payment_method, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(card_id) DO UPDATE SET
                enabled = excluded.enabled,
                payment_type = excluded.payment_type,
                days_before = excluded.days_before,
                fixed_amount = excluded.fixed_amount,
                payment_method = excluded.payment_method,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(new_id())
        .bind(card_id)
        .bind(req.enabled as i64)
        .bind(req.payment_type.as_str())
        .bind(req.days_before)
        .bind(req.fixed_amount.map(|d| d.to_string()))
        .bind(&req.payment_method)
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;
        self.get_autopay(card_id, owner_id).await
    }

    // -- credit scores ----------------------------------------------------

    async fn list_credit_scores(&self, owner_id: &str) -> StorageResult<Vec<CreditScore>> {
        let rows = sqlx::query(
            "SELECT * FROM credit_scores WHERE user_id = ? ORDER BY recorded_at DESC, id DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        collect(rows, credit_score_from_row)
    }

    async fn create_credit_score(
        &self,
        owner_id: &str,
        req: &CreateCreditScoreRequest,
    ) -> StorageResult<CreditScore> {
        if !self.user_exists(owner_id).await? {
            return Err(StorageError::NotFound);
        }
        let id = new_id();
        sqlx::query(
            r#"
            INSERT INTO credit_scores (id, user_id, score, provider, recorded_at,
                                       factors, suggestions)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(owner_id)
        .bind(req.score)
        .bind(&req.provider)
        .bind(fmt_ts(&now()))
        .bind(&req.factors)
        .bind(&req.suggestions)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM credit_scores WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
        credit_score_from_row(&row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> SqliteStorage {
        SqliteStorage::in_memory()
            .await
            .expect("failed to create test database")
    }

    #[tokio::test]
    async fn schema_bootstraps_and_accepts_a_user() {
        let store = setup().await;
        let user = store
            .upsert_user(&LoginRequest {
                external_id: "ext-1".to_string(),
                email: "a@example.com".to_string(),
                display_name: "A".to_string(),
                profile_image_url: None,
            })
            .await
            .unwrap();
        let fetched = store.get_user(&user.id).await.unwrap();
        assert_eq!(fetched, Some(user));
    }

    #[tokio::test]
    async fn decimal_text_round_trips_exactly() {
        let store = setup().await;
        let user = store
            .upsert_user(&LoginRequest {
                external_id: "ext-1".to_string(),
                email: "a@example.com".to_string(),
                display_name: "A".to_string(),
                profile_image_url: None,
            })
            .await
            .unwrap();
        let card = store
            .create_card(
                &user.id,
                &CreateCardRequest {
                    card_name: "Regalia".to_string(),
                    bank_name: "HDFC".to_string(),
                    last_four_digits: "1234".to_string(),
                    card_network: "Visa".to_string(),
                    credit_limit: "100000.50".parse().unwrap(),
                    due_date: None,
                    billing_cycle: None,
                    card_color: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(card.credit_limit, "100000.50".parse::<Decimal>().unwrap());

        let updated = store
            .add_to_card_balance(&card.id, &user.id, "0.1".parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        let updated = store
            .add_to_card_balance(&card.id, &user.id, "0.2".parse().unwrap())
            .await
            .unwrap()
            .unwrap_or(updated);
        assert_eq!(updated.current_balance, "0.3".parse::<Decimal>().unwrap());
    }
}
