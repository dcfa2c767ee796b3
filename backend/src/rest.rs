//! HTTP surface: application state, router and handlers.
//!
//! Every handler outside `/api/auth/login` runs under the [`AuthUser`]
//! extractor, so `user.user_id` is the ownership scope for all storage
//! calls. Cross-user ids surface uniformly as 404.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, patch, post},
    Json, Router,
};

use shared::{
    AutopaySettings, Bill, Card, CreateBillRequest, CreateCardRequest, CreateCreditScoreRequest,
    CreateNotificationRequest, CreateRewardRequest, CreateTransactionRequest, CreditScore,
    DeleteResponse, LoginRequest, Notification, ParseSmsRequest, ParseSmsResponse, PayBillRequest,
    PayBillResponse, Payment, Reward, ScanEmailsResponse, SessionResponse, SmsMessage,
    Transaction, UpdateTransactionRequest, UpsertAutopayRequest, User,
};

use crate::auth::{AuthUser, SessionStore};
use crate::domain::{BillingService, EmailService, IngestionService};
use crate::error::AppError;
use crate::extractors::{EmailAnalyzer, EmailSource, SmsExtractor};
use crate::storage::Storage;
use crate::ws::{self, NotificationHub};

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub sessions: SessionStore,
    pub hub: Arc<NotificationHub>,
    pub ingestion: IngestionService,
    pub billing: BillingService,
    pub email: EmailService,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn Storage>,
        extractor: Arc<dyn SmsExtractor>,
        analyzer: Arc<dyn EmailAnalyzer>,
        email_source: Arc<dyn EmailSource>,
    ) -> Self {
        let hub = Arc::new(NotificationHub::new());
        Self {
            sessions: SessionStore::new(),
            ingestion: IngestionService::new(storage.clone(), hub.clone(), extractor),
            billing: BillingService::new(storage.clone(), hub.clone()),
            email: EmailService::new(storage.clone(), hub.clone(), email_source, analyzer),
            storage,
            hub,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/cards", get(list_cards).post(create_card))
        .route("/api/cards/:id", get(get_card).delete(delete_card))
        .route("/api/cards/:id/rewards", get(list_card_rewards))
        .route("/api/cards/:id/transactions", get(list_card_transactions))
        .route(
            "/api/cards/:id/autopay",
            get(get_autopay).put(upsert_autopay),
        )
        .route("/api/rewards", get(list_rewards).post(create_reward))
        .route(
            "/api/transactions",
            get(list_transactions).post(create_transaction),
        )
        .route(
            "/api/transactions/:id",
            patch(update_transaction).delete(delete_transaction),
        )
        .route("/api/parse-sms", post(parse_sms))
        .route("/api/sms-messages", get(list_sms_messages))
        .route("/api/parse-emails", post(parse_emails))
        .route(
            "/api/notifications",
            get(list_notifications).post(create_notification),
        )
        .route("/api/notifications/:id/read", patch(mark_notification_read))
        .route("/api/bills", get(list_bills).post(create_bill))
        .route("/api/bills/:id/pay", post(pay_bill))
        .route("/api/payments", get(list_payments))
        .route(
            "/api/credit-scores",
            get(list_credit_scores).post(create_credit_score),
        )
        .route("/api/ws", get(ws::ws_handler))
        .with_state(state)
}

// -- auth ------------------------------------------------------------------

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    if req.external_id.trim().is_empty() {
        return Err(AppError::Validation("externalId is required".into()));
    }
    let user = state.storage.upsert_user(&req).await?;
    let token = state.sessions.issue(&user.id);
    tracing::info!(user_id = user.id, "user logged in");
    Ok(Json(SessionResponse { token, user }))
}

async fn me(State(state): State<AppState>, user: AuthUser) -> Result<Json<User>, AppError> {
    let user = state
        .storage
        .get_user(&user.user_id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    Ok(Json(user))
}

// -- cards -----------------------------------------------------------------

async fn list_cards(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Card>>, AppError> {
    Ok(Json(state.storage.list_cards(&user.user_id).await?))
}

async fn get_card(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Card>, AppError> {
    let card = state
        .storage
        .get_card(&id, &user.user_id)
        .await?
        .ok_or(AppError::NotFound("card"))?;
    Ok(Json(card))
}

async fn create_card(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateCardRequest>,
) -> Result<Json<Card>, AppError> {
    if req.last_four_digits.len() != 4 || !req.last_four_digits.chars().all(|c| c.is_ascii_digit())
    {
        return Err(AppError::Validation(
            "lastFourDigits must be exactly 4 digits".into(),
        ));
    }
    if req.card_name.trim().is_empty() {
        return Err(AppError::Validation("cardName is required".into()));
    }
    let card = state.storage.create_card(&user.user_id, &req).await?;
    tracing::info!(card_id = card.id, "card created");
    Ok(Json(card))
}

async fn delete_card(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    if !state.storage.delete_card(&id, &user.user_id).await? {
        return Err(AppError::NotFound("card"));
    }
    tracing::info!(card_id = id, "card deleted");
    Ok(Json(DeleteResponse { success: true }))
}

// -- rewards ---------------------------------------------------------------

async fn list_rewards(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Reward>>, AppError> {
    Ok(Json(state.storage.list_rewards(&user.user_id).await?))
}

async fn list_card_rewards(
    State(state): State<AppState>,
    user: AuthUser,
    Path(card_id): Path<String>,
) -> Result<Json<Vec<Reward>>, AppError> {
    state
        .storage
        .get_card(&card_id, &user.user_id)
        .await?
        .ok_or(AppError::NotFound("card"))?;
    Ok(Json(
        state
            .storage
            .list_rewards_by_card(&card_id, &user.user_id)
            .await?,
    ))
}

async fn create_reward(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateRewardRequest>,
) -> Result<Json<Reward>, AppError> {
    if req.threshold <= rust_decimal::Decimal::ZERO {
        return Err(AppError::Validation("threshold must be positive".into()));
    }
    let reward = state.storage.create_reward(&user.user_id, &req).await?;
    Ok(Json(reward))
}

// -- transactions ----------------------------------------------------------

async fn list_transactions(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Transaction>>, AppError> {
    Ok(Json(state.storage.list_transactions(&user.user_id).await?))
}

async fn list_card_transactions(
    State(state): State<AppState>,
    user: AuthUser,
    Path(card_id): Path<String>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    state
        .storage
        .get_card(&card_id, &user.user_id)
        .await?
        .ok_or(AppError::NotFound("card"))?;
    Ok(Json(
        state
            .storage
            .list_transactions_by_card(&card_id, &user.user_id)
            .await?,
    ))
}

async fn create_transaction(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateTransactionRequest>,
) -> Result<Json<Transaction>, AppError> {
    let outcome = state.ingestion.ingest_manual(&user.user_id, &req).await?;
    tracing::info!(
        transaction_id = outcome.transaction.id,
        fanout_failures = outcome.report.failures(),
        "transaction ingested"
    );
    Ok(Json(outcome.transaction))
}

async fn update_transaction(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(patch): Json<UpdateTransactionRequest>,
) -> Result<Json<Transaction>, AppError> {
    let updated = state
        .storage
        .update_transaction(&id, &user.user_id, &patch)
        .await?
        .ok_or(AppError::NotFound("transaction"))?;
    Ok(Json(updated))
}

async fn delete_transaction(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    if !state.storage.delete_transaction(&id, &user.user_id).await? {
        return Err(AppError::NotFound("transaction"));
    }
    Ok(Json(DeleteResponse { success: true }))
}

// -- sms -------------------------------------------------------------------

async fn parse_sms(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<ParseSmsRequest>,
) -> Result<Json<ParseSmsResponse>, AppError> {
    let outcome = state.ingestion.ingest_sms(&user.user_id, &req).await?;
    tracing::info!(
        transaction_id = outcome.transaction.id,
        fanout_failures = outcome.report.failures(),
        "sms ingested"
    );
    Ok(Json(ParseSmsResponse {
        success: true,
        transaction: outcome.transaction,
    }))
}

async fn list_sms_messages(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<SmsMessage>>, AppError> {
    Ok(Json(state.storage.list_sms_messages(&user.user_id).await?))
}

// -- emails ----------------------------------------------------------------

async fn parse_emails(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ScanEmailsResponse>, AppError> {
    let response = state.email.scan_inbox(&user.user_id).await?;
    tracing::info!(
        scanned = response.total,
        notified = response.count,
        "inbox scan finished"
    );
    Ok(Json(response))
}

// -- notifications ---------------------------------------------------------

async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Notification>>, AppError> {
    Ok(Json(state.storage.list_notifications(&user.user_id).await?))
}

async fn create_notification(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateNotificationRequest>,
) -> Result<Json<Notification>, AppError> {
    let notification = state
        .storage
        .create_notification(&user.user_id, &req)
        .await?;
    state.hub.broadcast(&user.user_id, &notification);
    Ok(Json(notification))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Notification>, AppError> {
    let notification = state
        .storage
        .mark_notification_read(&id, &user.user_id)
        .await?
        .ok_or(AppError::NotFound("notification"))?;
    Ok(Json(notification))
}

// -- bills & payments ------------------------------------------------------

async fn list_bills(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Bill>>, AppError> {
    Ok(Json(state.storage.list_bills(&user.user_id).await?))
}

async fn create_bill(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateBillRequest>,
) -> Result<Json<Bill>, AppError> {
    if req.amount <= rust_decimal::Decimal::ZERO {
        return Err(AppError::Validation("amount must be positive".into()));
    }
    Ok(Json(state.storage.create_bill(&user.user_id, &req).await?))
}

async fn pay_bill(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<PayBillRequest>,
) -> Result<Json<PayBillResponse>, AppError> {
    let response = state.billing.pay_bill(&user.user_id, &id, &req).await?;
    tracing::info!(bill_id = id, "bill paid");
    Ok(Json(response))
}

async fn list_payments(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Payment>>, AppError> {
    Ok(Json(state.storage.list_payments(&user.user_id).await?))
}

// -- autopay ---------------------------------------------------------------

async fn get_autopay(
    State(state): State<AppState>,
    user: AuthUser,
    Path(card_id): Path<String>,
) -> Result<Json<AutopaySettings>, AppError> {
    let settings = state
        .storage
        .get_autopay(&card_id, &user.user_id)
        .await?
        .ok_or(AppError::NotFound("autopay settings"))?;
    Ok(Json(settings))
}

async fn upsert_autopay(
    State(state): State<AppState>,
    user: AuthUser,
    Path(card_id): Path<String>,
    Json(req): Json<UpsertAutopayRequest>,
) -> Result<Json<AutopaySettings>, AppError> {
    if req.days_before < 0 {
        return Err(AppError::Validation("daysBefore must not be negative".into()));
    }
    let settings = state
        .storage
        .upsert_autopay(&card_id, &user.user_id, &req)
        .await?
        .ok_or(AppError::NotFound("card"))?;
    Ok(Json(settings))
}

// -- credit scores ---------------------------------------------------------

async fn list_credit_scores(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<CreditScore>>, AppError> {
    Ok(Json(state.storage.list_credit_scores(&user.user_id).await?))
}

async fn create_credit_score(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateCreditScoreRequest>,
) -> Result<Json<CreditScore>, AppError> {
    if !(300..=900).contains(&req.score) {
        return Err(AppError::Validation(
            "score must be between 300 and 900".into(),
        ));
    }
    Ok(Json(
        state
            .storage
            .create_credit_score(&user.user_id, &req)
            .await?,
    ))
}
