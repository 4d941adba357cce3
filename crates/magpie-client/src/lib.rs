#[cfg(feature = "browser")]
pub mod browser;
pub mod extract;
pub mod fetcher;
pub mod llm;
pub mod render;
pub mod robots;
pub mod search;

#[cfg(feature = "browser")]
pub use browser::BrowserFetcher;
pub use fetcher::{ReqwestFetcher, RetryConfig};
pub use llm::OpenAiClient;
pub use render::RenderFallbackFetcher;
pub use robots::RobotsFetcher;
pub use search::DuckDuckGoSearch;
