//! Provider construction helpers.

use std::sync::Arc;

use magpie_core::traits::{Fetcher, SearchClient};

use crate::JobProvider;
use crate::arbeitnow::ArbeitnowProvider;
use crate::discovery::DiscoveryProvider;
use crate::remoteok::RemoteOkProvider;
use crate::remotive::RemotiveProvider;
use crate::weworkremotely::WeWorkRemotelyProvider;

/// The built-in API and feed providers, each holding a clone of `fetcher`.
///
/// The caller owns the list and may extend it with ad-hoc boards, scrape
/// templates, or discovery before handing it to the orchestrator; there is
/// no global registry.
pub fn default_providers<F: Fetcher + 'static>(fetcher: F) -> Vec<Box<dyn JobProvider>> {
    vec![
        Box::new(RemotiveProvider::new(fetcher.clone())),
        Box::new(RemoteOkProvider::new(fetcher.clone())),
        Box::new(WeWorkRemotelyProvider::new(fetcher.clone())),
        Box::new(ArbeitnowProvider::new(fetcher)),
    ]
}

/// Discovery provider over a search backend, boxed for the provider list.
pub fn discovery_provider<F: Fetcher + 'static>(
    fetcher: F,
    search: Arc<dyn SearchClient>,
) -> Box<dyn JobProvider> {
    Box::new(DiscoveryProvider::new(fetcher, search))
}
