//! Domain services that sit between the REST surface and storage.

pub mod billing;
pub mod email_service;
pub mod ingestion;

pub use billing::BillingService;
pub use email_service::EmailService;
pub use ingestion::IngestionService;
