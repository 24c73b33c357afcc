use crate::error::PreviewError;
use crate::extract;
use crate::fetch::{FetchedDocument, PageFetcher};
use crate::models::PreviewResult;
use crate::validate::UrlValidator;

/// validate → fetch → parse → extract for a single URL.
pub struct PreviewService {
    validator: UrlValidator,
    fetcher: PageFetcher,
}

impl PreviewService {
    pub fn new(validator: UrlValidator, fetcher: PageFetcher) -> Self {
        Self { validator, fetcher }
    }

    pub async fn preview(&self, raw_url: &str) -> Result<PreviewResult, PreviewError> {
        let url = self.validator.validate(raw_url).await?;
        let document = self.fetcher.fetch(&url).await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "fetch failed");
            e
        })?;
        tracing::debug!(
            url = %document.final_url,
            bytes = document.byte_length,
            content_type = %document.content_type,
            "fetched page"
        );
        Ok(build_preview(&document))
    }
}

// Kept synchronous: the parsed DOM is not `Send` and must not live across an
// await point.
fn build_preview(document: &FetchedDocument) -> PreviewResult {
    extract::extract_from_html(&document.text(), &document.final_url)
}
