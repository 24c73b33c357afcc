use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResult {
    pub title: Option<String>,
    pub image: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub site_name: String,
    pub source_url: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
