//! Bill payment flow.

use std::sync::Arc;

use serde_json::json;

use shared::{BillStatus, NotificationKind, PayBillRequest, PayBillResponse};

use crate::error::AppError;
use crate::storage::{NewPayment, Storage};
use crate::ws::NotificationHub;

#[derive(Clone)]
pub struct BillingService {
    storage: Arc<dyn Storage>,
    hub: Arc<NotificationHub>,
}

impl BillingService {
    pub fn new(storage: Arc<dyn Storage>, hub: Arc<NotificationHub>) -> Self {
        Self { storage, hub }
    }

    /// Record a payment against a bill and flip its status to paid.
    ///
    /// The payment amount defaults to the bill's full amount. The payment
    /// row is the primary write; the confirmation notification is
    /// best-effort and never fails the request.
    pub async fn pay_bill(
        &self,
        owner_id: &str,
        bill_id: &str,
        req: &PayBillRequest,
    ) -> Result<PayBillResponse, AppError> {
        let bill = self
            .storage
            .get_bill(bill_id, owner_id)
            .await?
            .ok_or(AppError::NotFound("bill"))?;
        if bill.status == BillStatus::Paid {
            return Err(AppError::Validation("bill is already paid".into()));
        }

        let amount = req.amount.unwrap_or(bill.amount);
        if amount <= rust_decimal::Decimal::ZERO {
            return Err(AppError::Validation("payment amount must be positive".into()));
        }

        let payment = self
            .storage
            .create_payment(
                owner_id,
                &NewPayment {
                    bill_id: bill.id.clone(),
                    card_id: bill.card_id.clone(),
                    amount,
                    payment_method: req.payment_method.clone(),
                    transaction_id: None,
                },
            )
            .await?;

        let bill = self
            .storage
            .set_bill_status(&bill.id, owner_id, BillStatus::Paid)
            .await?
            .ok_or(AppError::NotFound("bill"))?;

        match self
            .storage
            .create_notification(
                owner_id,
                &shared::CreateNotificationRequest {
                    card_id: Some(bill.card_id.clone()),
                    title: "Payment Recorded".into(),
                    message: format!(
                        "Payment of ₹{amount} recorded for your {} bill",
                        bill.bill_month
                    ),
                    kind: NotificationKind::Payment,
                    metadata: Some(
                        json!({ "billId": bill.id, "paymentId": payment.id }).to_string(),
                    ),
                },
            )
            .await
        {
            Ok(notification) => self.hub.broadcast(owner_id, &notification),
            Err(e) => {
                tracing::warn!(bill_id = bill.id, error = %e, "payment notification failed")
            }
        }

        Ok(PayBillResponse { payment, bill })
    }
}
