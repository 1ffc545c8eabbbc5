use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::engine::NegotiationEngine;
use crate::error::AppError;
use crate::models::service::ServiceStatus;
use crate::store::ServiceStore;

/// Background sweep over negotiating services. Anything past the negotiation
/// deadline gets expired; a service that slipped into another state between
/// the scan and the expiry attempt is skipped on the next pass.
pub async fn run_expiry_sweeper(
    engine: NegotiationEngine,
    store: Arc<ServiceStore>,
    interval: Duration,
) {
    info!(interval_secs = interval.as_secs(), "expiry sweeper started");

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        let negotiating = match store.services_by_status(&[ServiceStatus::Negotiating]) {
            Ok(services) => services,
            Err(err) => {
                error!(error = %err, "expiry sweep failed to read services");
                continue;
            }
        };

        for service in negotiating {
            if !NegotiationEngine::negotiation_timed_out(&service) {
                continue;
            }

            match engine.expire_service(service.id) {
                Ok(()) => {}
                // Lost a race with an accept, reject or cancel; nothing to do.
                Err(AppError::InvalidState(_)) => {}
                Err(err) => {
                    error!(service_id = %service.id, error = %err, "failed to expire service");
                }
            }
        }
    }
}
