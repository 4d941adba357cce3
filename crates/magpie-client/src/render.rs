//! Headless-render fallback for JavaScript-only pages.

use magpie_core::error::AppError;
use magpie_core::traits::{FetchResponse, Fetcher};

use crate::extract::visible_text_len;

/// Static fetches yielding less visible text than this are suspected to be
/// client-side rendered.
pub const DEFAULT_RENDER_THRESHOLD: usize = 200;

/// A [`Fetcher`] wrapper that retries near-empty static fetches through a
/// rendering fetcher (typically a headless browser).
///
/// The browser path is markedly more expensive, so this wrapper is opt-in
/// per provider: only providers constructed with it ever render.
#[derive(Clone)]
pub struct RenderFallbackFetcher<F, B> {
    primary: F,
    renderer: B,
    min_text_len: usize,
}

impl<F: Fetcher, B: Fetcher> RenderFallbackFetcher<F, B> {
    pub fn new(primary: F, renderer: B) -> Self {
        Self {
            primary,
            renderer,
            min_text_len: DEFAULT_RENDER_THRESHOLD,
        }
    }

    pub fn with_min_text_len(mut self, min_text_len: usize) -> Self {
        self.min_text_len = min_text_len;
        self
    }
}

impl<F: Fetcher, B: Fetcher> Fetcher for RenderFallbackFetcher<F, B> {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, AppError> {
        let response = self.primary.fetch(url).await?;
        if visible_text_len(&response.body) >= self.min_text_len {
            return Ok(response);
        }

        tracing::debug!(url = %url, "Static fetch near-empty, falling back to renderer");
        match self.renderer.fetch(url).await {
            Ok(rendered) => Ok(rendered),
            Err(e) => {
                // Best effort only: keep the static body rather than failing.
                tracing::warn!(url = %url, error = %e, "Render fallback failed");
                Ok(response)
            }
        }
    }
}
