use serde::{Deserialize, Serialize};

/// Request to register a payment through the demo route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub reference: Option<String>,
}
