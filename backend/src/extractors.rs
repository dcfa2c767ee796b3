//! External extraction collaborators.
//!
//! SMS parsing and email analysis are delegated to an LLM behind narrow
//! trait seams, so the ingestion pipeline can be exercised in tests with
//! scripted fakes and the process still boots when no API key is
//! configured.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shared::SpendCategory;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Structured transaction details pulled out of a bank SMS.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedTransaction {
    pub merchant_name: String,
    pub amount: Decimal,
    #[serde(default)]
    pub category: SpendCategory,
    #[serde(default)]
    pub last_four_digits: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Classification of a card-related email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailKind {
    Statement,
    Offer,
    Bill,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermChange {
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub impact: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailAnalysis {
    pub kind: EmailKind,
    pub summary: String,
    #[serde(default)]
    pub changes: Vec<TermChange>,
    #[serde(default)]
    pub bill_amount: Option<Decimal>,
    #[serde(default)]
    pub due_date: Option<String>,
}

/// A card-related email pulled from the user's inbox.
#[derive(Debug, Clone)]
pub struct InboundEmail {
    pub id: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// Turns a raw SMS body into transaction details, or `None` when the
/// message does not describe a card transaction.
#[async_trait]
pub trait SmsExtractor: Send + Sync {
    async fn extract(&self, message: &str) -> anyhow::Result<Option<ExtractedTransaction>>;
}

/// Classifies a card-related email and summarizes what it says.
#[async_trait]
pub trait EmailAnalyzer: Send + Sync {
    async fn analyze(&self, email: &InboundEmail) -> anyhow::Result<Option<EmailAnalysis>>;
}

/// Fetches recent card-related emails for scanning.
#[async_trait]
pub trait EmailSource: Send + Sync {
    async fn fetch_card_emails(&self) -> anyhow::Result<Vec<InboundEmail>>;
}

// -- OpenAI-backed implementation -----------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

const SMS_SYSTEM_PROMPT: &str = "You are a transaction parser for bank SMS messages. \
Extract transaction details and respond with a JSON object with keys \
merchantName (string), amount (decimal string), category (one of Shopping, \
Food, Travel, Fuel, Groceries, Utilities, Entertainment, Healthcare, Other), \
lastFourDigits (string or null) and description (string or null). \
If the message is not a card transaction, respond with the JSON value null.";

const EMAIL_SYSTEM_PROMPT: &str = "You analyze credit-card emails. Respond with a \
JSON object with keys kind (one of statement, offer, bill, other), summary \
(one sentence), changes (array of {field, oldValue, newValue, impact}), \
billAmount (decimal string or null) and dueDate (string or null).";

/// LLM extraction over the OpenAI chat completions API, requesting JSON
/// output and decoding the first choice.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let response = self
            .http
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<ChatResponse>()
            .await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("model returned no content"))
    }
}

#[async_trait]
impl SmsExtractor for OpenAiClient {
    async fn extract(&self, message: &str) -> anyhow::Result<Option<ExtractedTransaction>> {
        let content = self.complete(SMS_SYSTEM_PROMPT, message).await?;
        let extracted = serde_json::from_str::<Option<ExtractedTransaction>>(&content)?;
        Ok(extracted)
    }
}

#[async_trait]
impl EmailAnalyzer for OpenAiClient {
    async fn analyze(&self, email: &InboundEmail) -> anyhow::Result<Option<EmailAnalysis>> {
        let prompt = format!(
            "From: {}\nSubject: {}\n\n{}",
            email.from, email.subject, email.body
        );
        let content = self.complete(EMAIL_SYSTEM_PROMPT, &prompt).await?;
        let analysis = serde_json::from_str::<Option<EmailAnalysis>>(&content)?;
        Ok(analysis)
    }
}

/// Stand-in used when no API key or mailbox is configured: extraction
/// yields nothing and the inbox is empty.
pub struct Unconfigured;

#[async_trait]
impl SmsExtractor for Unconfigured {
    async fn extract(&self, _message: &str) -> anyhow::Result<Option<ExtractedTransaction>> {
        Ok(None)
    }
}

#[async_trait]
impl EmailAnalyzer for Unconfigured {
    async fn analyze(&self, _email: &InboundEmail) -> anyhow::Result<Option<EmailAnalysis>> {
        Ok(None)
    }
}

#[async_trait]
impl EmailSource for Unconfigured {
    async fn fetch_card_emails(&self) -> anyhow::Result<Vec<InboundEmail>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracted_transaction_decodes_model_output() {
        let json = r#"{
            "merchantName": "Amazon",
            "amount": "2499.00",
            "category": "Shopping",
            "lastFourDigits": "4532",
            "description": "Online purchase"
        }"#;
        let parsed: Option<ExtractedTransaction> = serde_json::from_str(json).unwrap();
        let parsed = parsed.unwrap();
        assert_eq!(parsed.merchant_name, "Amazon");
        assert_eq!(parsed.amount.to_string(), "2499.00");
        assert_eq!(parsed.category, SpendCategory::Shopping);
        assert_eq!(parsed.last_four_digits.as_deref(), Some("4532"));
    }

    #[test]
    fn null_model_output_means_no_transaction() {
        let parsed: Option<ExtractedTransaction> = serde_json::from_str("null").unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn unknown_category_falls_back_to_other() {
        let json = r#"{"merchantName": "X", "amount": "1", "category": "lottery"}"#;
        let parsed: ExtractedTransaction = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.category, SpendCategory::Other);
    }

    #[test]
    fn email_analysis_decodes_bill_fields() {
        let json = r#"{
            "kind": "bill",
            "summary": "Your bill is ready",
            "billAmount": "15230.50",
            "dueDate": "2024-07-15"
        }"#;
        let parsed: EmailAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.kind, EmailKind::Bill);
        assert_eq!(parsed.bill_amount.unwrap().to_string(), "15230.50");
        assert!(parsed.changes.is_empty());
    }

    #[test]
    fn unknown_email_kind_falls_back_to_other() {
        let json = r#"{"kind": "newsletter", "summary": "weekly digest"}"#;
        let parsed: EmailAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.kind, EmailKind::Other);
    }
}
