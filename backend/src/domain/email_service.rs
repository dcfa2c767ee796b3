//! Inbox scanning: card-related emails become notifications.

use std::sync::Arc;

use serde_json::json;

use shared::{NotificationKind, ScanEmailsResponse};

use crate::error::AppError;
use crate::extractors::{EmailAnalyzer, EmailKind, EmailSource};
use crate::storage::Storage;
use crate::ws::NotificationHub;

#[derive(Clone)]
pub struct EmailService {
    storage: Arc<dyn Storage>,
    hub: Arc<NotificationHub>,
    source: Arc<dyn EmailSource>,
    analyzer: Arc<dyn EmailAnalyzer>,
}

impl EmailService {
    pub fn new(
        storage: Arc<dyn Storage>,
        hub: Arc<NotificationHub>,
        source: Arc<dyn EmailSource>,
        analyzer: Arc<dyn EmailAnalyzer>,
    ) -> Self {
        Self {
            storage,
            hub,
            source,
            analyzer,
        }
    }

    /// Fetch recent card emails, analyze each one, and turn statements,
    /// offers and bills into user-scoped notifications. A failure on one
    /// email is logged and does not stop the scan.
    pub async fn scan_inbox(&self, owner_id: &str) -> Result<ScanEmailsResponse, AppError> {
        let emails = self
            .source
            .fetch_card_emails()
            .await
            .map_err(AppError::Internal)?;
        let total = emails.len() as u32;
        let mut count = 0u32;

        for email in emails {
            let analysis = match self.analyzer.analyze(&email).await {
                Ok(Some(analysis)) => analysis,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(email_id = email.id, error = %e, "email analysis failed");
                    continue;
                }
            };

            let (kind, title) = match analysis.kind {
                EmailKind::Bill => (NotificationKind::Bill, "Credit Card Bill"),
                EmailKind::Offer => (NotificationKind::Offer, "New Offer Available"),
                EmailKind::Statement => (NotificationKind::Statement, "Monthly Statement"),
                EmailKind::Other => continue,
            };

            let message = match (analysis.kind, &analysis.bill_amount, &analysis.due_date) {
                (EmailKind::Bill, Some(amount), Some(due)) => {
                    format!("Bill of ₹{amount} due on {due}. {}", analysis.summary)
                }
                _ => analysis.summary.clone(),
            };

            let changes = analysis
                .changes
                .iter()
                .map(|c| {
                    json!({
                        "field": c.field,
                        "oldValue": c.old_value,
                        "newValue": c.new_value,
                        "impact": c.impact,
                    })
                })
                .collect::<Vec<_>>();
            let metadata = json!({
                "emailId": email.id,
                "from": email.from,
                "changes": changes,
            })
            .to_string();

            let created = self
                .storage
                .create_notification(
                    owner_id,
                    &shared::CreateNotificationRequest {
                        card_id: None,
                        title: title.into(),
                        message,
                        kind,
                        metadata: Some(metadata),
                    },
                )
                .await;
            match created {
                Ok(notification) => {
                    self.hub.broadcast(owner_id, &notification);
                    count += 1;
                }
                Err(e) => {
                    tracing::warn!(email_id = email.id, error = %e, "email notification failed")
                }
            }
        }

        Ok(ScanEmailsResponse {
            success: true,
            count,
            total,
        })
    }
}
