//! Response shapes of the receipt analysis service.
//!
//! Every field is optional on the wire; the service omits what it could not
//! extract from the image.

use serde::{Deserialize, Serialize};

/// Result of `POST /analyze/upload`, also the shape of stored receipt summaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub transaction_date: Option<String>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub subtotal: Option<f64>,
    #[serde(default)]
    pub tax: Option<f64>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub items: Vec<ReceiptItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiptItem {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub total_price: Option<f64>,
}
