//! Builds endpoint states from configuration

use std::sync::Arc;

use log::info;

use crate::config::BlasterConfig;
use crate::endpoint::EndpointState;
use crate::error::Error;
use crate::providers::azure::AzureClient;

/// One [`EndpointState`] per configured deployment, each holding an
/// authenticated [`AzureClient`]. Fails before any worker starts if a
/// deployment cannot be authenticated.
pub fn build_endpoint_states(
  config: &BlasterConfig
) -> Result<Vec<Arc<EndpointState<AzureClient>>>, Error>
{   config.deployments
      .iter()
      .map(|dep| -> Result<Arc<EndpointState<AzureClient>>, Error> {
        let client = AzureClient::new(dep)?;
        info!(
          "Registered deployment '{}' (model {}, weight {})",
          dep.name,
          dep.model(),
          dep.weight
        );
        Ok(Arc::new(
          EndpointState::new(dep.name.clone(), dep.weight, client)
            .with_auto_disable_threshold(
              config.failover.auto_disable_threshold
            )
            .with_max_error_samples(
              config.failover.max_error_samples
            )
        ))
      })
      .collect()
}
