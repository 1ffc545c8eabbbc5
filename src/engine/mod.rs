pub mod expiry;

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::estimated_pickup_minutes;
use crate::models::account::{Account, AccountRole};
use crate::models::service::{GeoPoint, Location, Service, ServiceStatus};
use crate::observability::metrics::Metrics;
use crate::store::{ServiceStore, Txn};

pub const NEGOTIATION_TIMEOUT_SECS: i64 = 180;

/// Owns every legal transition of a service. Each operation is one store
/// transaction keyed by the service and the touched accounts, so a status
/// precondition observed inside an operation still holds when it commits.
#[derive(Clone)]
pub struct NegotiationEngine {
    store: Arc<ServiceStore>,
    metrics: Metrics,
}

impl NegotiationEngine {
    pub fn new(store: Arc<ServiceStore>, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    pub fn create_account(&self, name: String, role: AccountRole) -> Result<Account, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::Validation("name cannot be empty".to_string()));
        }

        let account = Account::new(name, role);
        self.store.transact(|txn| {
            txn.put_account(account.clone());
            Ok(())
        })?;

        Ok(account)
    }

    pub fn create_request(
        &self,
        client_id: Uuid,
        origin: Location,
        destination: Location,
    ) -> Result<Service, AppError> {
        if !origin.point.in_range() || !destination.point.in_range() {
            return Err(AppError::Validation(
                "coordinates out of range".to_string(),
            ));
        }

        self.timed("create_request", |txn| {
            let client = txn
                .account(client_id)
                .ok_or_else(|| AppError::NotFound(format!("account {client_id} not found")))?;

            if client.is_conditioned() || client.active_service_id.is_some() {
                return Err(AppError::AlreadyConditioned);
            }

            let service = Service::new(client_id, client.name.clone(), origin, destination);

            let mut client = client;
            client.condition(service.id);
            txn.put_service(service.clone());
            txn.put_account(client);

            info!(service_id = %service.id, client_id = %client_id, "service request created");
            Ok(service)
        })
    }

    pub fn propose_service(
        &self,
        service_id: Uuid,
        driver_id: Uuid,
        driver_location: GeoPoint,
    ) -> Result<Service, AppError> {
        if !driver_location.in_range() {
            return Err(AppError::Validation(
                "coordinates out of range".to_string(),
            ));
        }

        self.timed("propose_service", |txn| {
            let mut service = txn
                .service(service_id)
                .ok_or_else(|| AppError::NotFound(format!("service {service_id} not found")))?;

            if service.status != ServiceStatus::Pending {
                return Err(AppError::InvalidState(format!(
                    "service is {:?}, not pending",
                    service.status
                )));
            }

            let mut driver = txn
                .account(driver_id)
                .ok_or_else(|| AppError::NotFound(format!("account {driver_id} not found")))?;
            if !driver.role.can_drive() {
                return Err(AppError::Validation("account cannot drive".to_string()));
            }

            if driver.is_conditioned() || driver.active_service_id.is_some() {
                // A dual-role account may still propose on someone else's
                // request while its own client request sits unclaimed in
                // pending. Any other binding makes the driver unavailable.
                let can_override = driver
                    .active_service_id
                    .and_then(|active_id| txn.service(active_id))
                    .map(|active| {
                        active.client_id == driver_id
                            && active.driver_id.is_none()
                            && active.status == ServiceStatus::Pending
                    })
                    .unwrap_or(false);

                if !can_override {
                    return Err(AppError::DriverUnavailable);
                }
            }

            let eta = estimated_pickup_minutes(&driver_location, &service.origin.point);

            service.driver_id = Some(driver.id);
            service.driver_name = Some(driver.name.clone());
            service.driver_rating = driver.driver_rating;
            service.estimated_pickup_time = Some(eta);
            service.status = ServiceStatus::Negotiating;
            service.negotiation_started_at = Some(Utc::now());
            service.updated_at = Utc::now();

            driver.condition(service_id);

            let mut client = txn
                .account(service.client_id)
                .ok_or_else(|| AppError::NotFound("client account not found".to_string()))?;
            client.condition(service_id);

            txn.put_service(service.clone());
            txn.put_account(driver);
            txn.put_account(client);

            info!(service_id = %service_id, driver_id = %driver_id, eta_minutes = eta, "driver proposed");
            Ok(service)
        })
    }

    pub fn accept_proposal(&self, service_id: Uuid) -> Result<Service, AppError> {
        self.timed("accept_proposal", |txn| {
            let mut service = Self::negotiating_service(txn, service_id)?;

            service.status = ServiceStatus::Accepted;
            service.accepted_at = Some(Utc::now());
            service.updated_at = Utc::now();
            txn.put_service(service.clone());

            info!(service_id = %service_id, "proposal accepted");
            Ok(service)
        })
    }

    pub fn reject_proposal(&self, service_id: Uuid, driver_id: Uuid) -> Result<Service, AppError> {
        self.timed("reject_proposal", |txn| {
            let mut service = Self::negotiating_service(txn, service_id)?;

            if service.driver_id != Some(driver_id) {
                return Err(AppError::Conflict(
                    "proposal no longer belongs to this driver".to_string(),
                ));
            }

            service.clear_proposal();

            let mut driver = txn
                .account(driver_id)
                .ok_or_else(|| AppError::NotFound(format!("account {driver_id} not found")))?;
            driver.free();

            // The client's lock is re-derived from the post-transition status:
            // a pending request still conditions its owner.
            let mut client = txn
                .account(service.client_id)
                .ok_or_else(|| AppError::NotFound("client account not found".to_string()))?;
            if service.status.conditions_client() {
                client.condition(service.id);
            } else {
                client.free();
            }

            txn.put_service(service.clone());
            txn.put_account(driver);
            txn.put_account(client);

            info!(service_id = %service_id, driver_id = %driver_id, "proposal rejected");
            Ok(service)
        })
    }

    /// Removes a timed-out negotiation entirely and frees both parties.
    /// Expiring an id that no longer exists is a no-op, so the background
    /// sweep and a lazy caller can both fire without coordination.
    pub fn expire_service(&self, service_id: Uuid) -> Result<(), AppError> {
        let expired = self.timed("expire_service", |txn| {
            let Some(service) = txn.service(service_id) else {
                return Ok(false);
            };

            if service.status != ServiceStatus::Negotiating {
                return Err(AppError::InvalidState(format!(
                    "service is {:?}, not negotiating",
                    service.status
                )));
            }
            if !Self::negotiation_timed_out(&service) {
                return Err(AppError::InvalidState(
                    "negotiation window has not elapsed".to_string(),
                ));
            }

            txn.delete_service(service_id);

            let mut client = txn
                .account(service.client_id)
                .ok_or_else(|| AppError::NotFound("client account not found".to_string()))?;
            client.free();
            txn.put_account(client);

            if let Some(driver_id) = service.driver_id {
                let mut driver = txn
                    .account(driver_id)
                    .ok_or_else(|| AppError::NotFound("driver account not found".to_string()))?;
                driver.free();
                txn.put_account(driver);
            }

            Ok(true)
        })?;

        if expired {
            self.metrics.expirations_total.inc();
            info!(service_id = %service_id, "negotiation expired, service removed");
        }
        Ok(())
    }

    pub fn start_service(&self, service_id: Uuid) -> Result<Service, AppError> {
        self.timed("start_service", |txn| {
            let mut service = txn
                .service(service_id)
                .ok_or_else(|| AppError::NotFound(format!("service {service_id} not found")))?;

            if service.status != ServiceStatus::Accepted {
                return Err(AppError::InvalidState(format!(
                    "service is {:?}, not accepted",
                    service.status
                )));
            }

            service.status = ServiceStatus::InProgress;
            service.updated_at = Utc::now();
            txn.put_service(service.clone());

            info!(service_id = %service_id, "trip started");
            Ok(service)
        })
    }

    pub fn driver_complete_service(&self, service_id: Uuid) -> Result<Service, AppError> {
        self.timed("driver_complete_service", |txn| {
            let mut service = txn
                .service(service_id)
                .ok_or_else(|| AppError::NotFound(format!("service {service_id} not found")))?;

            // Repeat confirmations after completion must not re-trigger the
            // completion side effects.
            if service.status == ServiceStatus::Completed && service.driver_completed {
                return Ok(service);
            }
            if service.status != ServiceStatus::InProgress {
                return Err(AppError::InvalidState(format!(
                    "service is {:?}, not in_progress",
                    service.status
                )));
            }

            service.driver_completed = true;
            service.updated_at = Utc::now();

            if service.client_completed {
                Self::finish(txn, &mut service)?;
            }
            txn.put_service(service.clone());

            info!(service_id = %service_id, status = ?service.status, "driver confirmed completion");
            Ok(service)
        })
    }

    pub fn client_complete_service(
        &self,
        service_id: Uuid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Service, AppError> {
        if !(1..=5).contains(&rating) {
            return Err(AppError::Validation(
                "rating must be between 1 and 5".to_string(),
            ));
        }

        self.timed("client_complete_service", |txn| {
            let mut service = txn
                .service(service_id)
                .ok_or_else(|| AppError::NotFound(format!("service {service_id} not found")))?;

            if service.status == ServiceStatus::Completed && service.client_completed {
                return Ok(service);
            }
            if service.status != ServiceStatus::InProgress {
                return Err(AppError::InvalidState(format!(
                    "service is {:?}, not in_progress",
                    service.status
                )));
            }

            let driver_id = service
                .driver_id
                .ok_or_else(|| AppError::InvalidState("service has no driver".to_string()))?;

            // The driver's running average moves only on the first
            // confirmation from the client.
            if !service.client_completed {
                let mut driver = txn
                    .account(driver_id)
                    .ok_or_else(|| AppError::NotFound("driver account not found".to_string()))?;
                driver.record_driver_rating(rating);
                txn.put_account(driver);
            }

            service.client_completed = true;
            service.rating = Some(rating);
            service.rating_comment = comment;
            service.updated_at = Utc::now();

            if service.driver_completed {
                Self::finish(txn, &mut service)?;
            }
            txn.put_service(service.clone());

            info!(service_id = %service_id, rating = rating, status = ?service.status, "client confirmed completion");
            Ok(service)
        })
    }

    pub fn cancel_service(&self, service_id: Uuid) -> Result<Service, AppError> {
        self.timed("cancel_service", |txn| {
            let mut service = txn
                .service(service_id)
                .ok_or_else(|| AppError::NotFound(format!("service {service_id} not found")))?;

            if service.status.is_terminal() {
                return Err(AppError::InvalidState(format!(
                    "service is already {:?}",
                    service.status
                )));
            }

            service.status = ServiceStatus::Cancelled;
            service.updated_at = Utc::now();

            let mut client = txn
                .account(service.client_id)
                .ok_or_else(|| AppError::NotFound("client account not found".to_string()))?;
            client.free();
            txn.put_account(client);

            if let Some(driver_id) = service.driver_id {
                let mut driver = txn
                    .account(driver_id)
                    .ok_or_else(|| AppError::NotFound("driver account not found".to_string()))?;
                driver.free();
                txn.put_account(driver);
            }

            txn.put_service(service.clone());

            info!(service_id = %service_id, "service cancelled");
            Ok(service)
        })
    }

    pub fn negotiation_timed_out(service: &Service) -> bool {
        match service.negotiation_started_at {
            Some(started_at) => {
                Utc::now() - started_at >= Duration::seconds(NEGOTIATION_TIMEOUT_SECS)
            }
            None => false,
        }
    }

    /// Loads a service that must still be inside an open negotiation window.
    /// A timed-out negotiation only admits `expire_service`.
    fn negotiating_service(txn: &Txn, service_id: Uuid) -> Result<Service, AppError> {
        let service = txn
            .service(service_id)
            .ok_or_else(|| AppError::NotFound(format!("service {service_id} not found")))?;

        if service.status != ServiceStatus::Negotiating {
            return Err(AppError::InvalidState(format!(
                "service is {:?}, not negotiating",
                service.status
            )));
        }
        if Self::negotiation_timed_out(&service) {
            return Err(AppError::InvalidState(
                "negotiation window has expired".to_string(),
            ));
        }

        Ok(service)
    }

    fn finish(txn: &mut Txn, service: &mut Service) -> Result<(), AppError> {
        service.status = ServiceStatus::Completed;
        service.completed_at = Some(Utc::now());

        let mut client = txn
            .account(service.client_id)
            .ok_or_else(|| AppError::NotFound("client account not found".to_string()))?;
        client.free();
        txn.put_account(client);

        if let Some(driver_id) = service.driver_id {
            let mut driver = txn
                .account(driver_id)
                .ok_or_else(|| AppError::NotFound("driver account not found".to_string()))?;
            driver.free();
            txn.put_account(driver);
        }

        Ok(())
    }

    fn timed<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Txn) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let start = Instant::now();
        let result = self.store.transact(f);

        let outcome = if result.is_ok() { "success" } else { "error" };
        self.metrics
            .operation_latency_seconds
            .with_label_values(&[operation, outcome])
            .observe(start.elapsed().as_secs_f64());
        self.metrics
            .operations_total
            .with_label_values(&[operation, outcome])
            .inc();

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{NegotiationEngine, NEGOTIATION_TIMEOUT_SECS};
    use crate::error::AppError;
    use crate::models::account::{AccountRole, AccountStatus};
    use crate::models::service::{GeoPoint, Location, ServiceStatus};
    use crate::observability::metrics::Metrics;
    use crate::store::ServiceStore;

    fn engine() -> (NegotiationEngine, Arc<ServiceStore>) {
        let store = Arc::new(ServiceStore::new(256));
        (
            NegotiationEngine::new(store.clone(), Metrics::new()),
            store,
        )
    }

    fn location(lat: f64, lng: f64) -> Location {
        Location {
            point: GeoPoint { lat, lng },
            address: "test address".to_string(),
        }
    }

    fn here() -> GeoPoint {
        GeoPoint {
            lat: 38.7223,
            lng: -9.1393,
        }
    }

    fn setup_request(engine: &NegotiationEngine) -> (Uuid, Uuid) {
        let client = engine
            .create_account("client".to_string(), AccountRole::Client)
            .unwrap();
        let service = engine
            .create_request(client.id, location(38.72, -9.14), location(38.74, -9.16))
            .unwrap();
        (client.id, service.id)
    }

    fn new_driver(engine: &NegotiationEngine, name: &str) -> Uuid {
        engine
            .create_account(name.to_string(), AccountRole::Driver)
            .unwrap()
            .id
    }

    fn backdate_negotiation(store: &ServiceStore, service_id: Uuid, secs: i64) {
        store
            .transact(|txn| {
                let mut service = txn.service(service_id).unwrap();
                service.negotiation_started_at = Some(Utc::now() - Duration::seconds(secs));
                txn.put_service(service);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn create_request_conditions_the_client() {
        let (engine, store) = engine();
        let (client_id, service_id) = setup_request(&engine);

        let client = store.account(client_id).unwrap().unwrap();
        assert_eq!(client.status, AccountStatus::Conditioned);
        assert_eq!(client.active_service_id, Some(service_id));

        let service = store.service(service_id).unwrap().unwrap();
        assert_eq!(service.status, ServiceStatus::Pending);
    }

    #[test]
    fn second_request_from_conditioned_client_fails() {
        let (engine, _store) = engine();
        let (client_id, _service_id) = setup_request(&engine);

        let err = engine
            .create_request(client_id, location(38.72, -9.14), location(38.74, -9.16))
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyConditioned));
    }

    #[test]
    fn propose_sets_driver_fields_and_conditions_driver() {
        let (engine, store) = engine();
        let (_client_id, service_id) = setup_request(&engine);
        let driver_id = new_driver(&engine, "driver");

        let service = engine.propose_service(service_id, driver_id, here()).unwrap();
        assert_eq!(service.status, ServiceStatus::Negotiating);
        assert_eq!(service.driver_id, Some(driver_id));
        assert!(service.estimated_pickup_time.is_some());
        assert!(service.negotiation_started_at.is_some());

        let driver = store.account(driver_id).unwrap().unwrap();
        assert_eq!(driver.status, AccountStatus::Conditioned);
        assert_eq!(driver.active_service_id, Some(service_id));
    }

    #[test]
    fn second_proposal_on_same_service_loses() {
        let (engine, _store) = engine();
        let (_client_id, service_id) = setup_request(&engine);
        let first = new_driver(&engine, "first");
        let second = new_driver(&engine, "second");

        engine.propose_service(service_id, first, here()).unwrap();
        let err = engine.propose_service(service_id, second, here()).unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[test]
    fn concurrent_proposals_have_exactly_one_winner() {
        let (engine, store) = engine();
        let (_client_id, service_id) = setup_request(&engine);

        let drivers: Vec<Uuid> = (0..8)
            .map(|i| new_driver(&engine, &format!("driver-{i}")))
            .collect();

        let handles: Vec<_> = drivers
            .iter()
            .map(|&driver_id| {
                let engine = engine.clone();
                thread::spawn(move || engine.propose_service(service_id, driver_id, here()))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);

        for result in &results {
            if let Err(err) = result {
                assert!(matches!(
                    err,
                    AppError::InvalidState(_) | AppError::Conflict(_) | AppError::DriverUnavailable
                ));
            }
        }

        let service = store.service(service_id).unwrap().unwrap();
        assert_eq!(service.status, ServiceStatus::Negotiating);
        assert!(service.driver_id.is_some());
    }

    #[test]
    fn busy_driver_cannot_propose() {
        let (engine, _store) = engine();
        let (_c1, first_service) = setup_request(&engine);
        let (_c2, second_service) = setup_request(&engine);
        let driver_id = new_driver(&engine, "driver");

        engine.propose_service(first_service, driver_id, here()).unwrap();
        let err = engine
            .propose_service(second_service, driver_id, here())
            .unwrap_err();
        assert!(matches!(err, AppError::DriverUnavailable));
    }

    #[test]
    fn dual_role_driver_with_own_pending_request_may_still_propose() {
        let (engine, store) = engine();

        // The dual-role account files its own request, then drives for
        // someone else while that request sits unclaimed.
        let dual = engine
            .create_account("dual".to_string(), AccountRole::Both)
            .unwrap();
        engine
            .create_request(dual.id, location(38.70, -9.10), location(38.71, -9.11))
            .unwrap();

        let (_client_id, other_service) = setup_request(&engine);
        let service = engine
            .propose_service(other_service, dual.id, here())
            .unwrap();
        assert_eq!(service.status, ServiceStatus::Negotiating);
        assert_eq!(service.driver_id, Some(dual.id));

        let dual = store.account(dual.id).unwrap().unwrap();
        assert_eq!(dual.active_service_id, Some(other_service));
    }

    #[test]
    fn dual_role_driver_cannot_propose_once_own_request_is_claimed() {
        let (engine, _store) = engine();

        let dual = engine
            .create_account("dual".to_string(), AccountRole::Both)
            .unwrap();
        let own = engine
            .create_request(dual.id, location(38.70, -9.10), location(38.71, -9.11))
            .unwrap();

        let other_driver = new_driver(&engine, "other");
        engine.propose_service(own.id, other_driver, here()).unwrap();

        let (_client_id, unrelated) = setup_request(&engine);
        let err = engine
            .propose_service(unrelated, dual.id, here())
            .unwrap_err();
        assert!(matches!(err, AppError::DriverUnavailable));
    }

    #[test]
    fn reject_reopens_request_and_keeps_client_conditioned() {
        let (engine, store) = engine();
        let (client_id, service_id) = setup_request(&engine);
        let first = new_driver(&engine, "first");

        engine.propose_service(service_id, first, here()).unwrap();
        let service = engine.reject_proposal(service_id, first).unwrap();

        assert_eq!(service.status, ServiceStatus::Pending);
        assert_eq!(service.driver_id, None);
        assert_eq!(service.driver_name, None);
        assert_eq!(service.driver_rating, None);
        assert_eq!(service.estimated_pickup_time, None);
        assert_eq!(service.negotiation_started_at, None);

        let driver = store.account(first).unwrap().unwrap();
        assert_eq!(driver.status, AccountStatus::Free);
        assert_eq!(driver.active_service_id, None);

        // The request still belongs to the client, so the lock stays.
        let client = store.account(client_id).unwrap().unwrap();
        assert_eq!(client.status, AccountStatus::Conditioned);
        assert_eq!(client.active_service_id, Some(service_id));

        // A fresh proposal from another driver succeeds with clean fields.
        let second = new_driver(&engine, "second");
        let service = engine.propose_service(service_id, second, here()).unwrap();
        assert_eq!(service.driver_id, Some(second));
        assert_eq!(service.driver_name.as_deref(), Some("second"));
    }

    #[test]
    fn reject_from_wrong_driver_is_a_conflict() {
        let (engine, _store) = engine();
        let (_client_id, service_id) = setup_request(&engine);
        let first = new_driver(&engine, "first");
        let stranger = new_driver(&engine, "stranger");

        engine.propose_service(service_id, first, here()).unwrap();
        let err = engine.reject_proposal(service_id, stranger).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn stale_negotiation_rejects_everything_but_expiry() {
        let (engine, store) = engine();
        let (client_id, service_id) = setup_request(&engine);
        let driver_id = new_driver(&engine, "driver");

        engine.propose_service(service_id, driver_id, here()).unwrap();
        backdate_negotiation(&store, service_id, NEGOTIATION_TIMEOUT_SECS + 1);

        let err = engine.accept_proposal(service_id).unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        engine.expire_service(service_id).unwrap();
        assert!(store.service(service_id).unwrap().is_none());

        let client = store.account(client_id).unwrap().unwrap();
        assert_eq!(client.status, AccountStatus::Free);
        assert_eq!(client.active_service_id, None);
        let driver = store.account(driver_id).unwrap().unwrap();
        assert_eq!(driver.status, AccountStatus::Free);

        // Repeat expiry on the deleted id is a no-op success.
        engine.expire_service(service_id).unwrap();
    }

    #[test]
    fn expiry_before_the_deadline_is_rejected() {
        let (engine, _store) = engine();
        let (_client_id, service_id) = setup_request(&engine);
        let driver_id = new_driver(&engine, "driver");

        engine.propose_service(service_id, driver_id, here()).unwrap();
        let err = engine.expire_service(service_id).unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[test]
    fn driver_completion_is_idempotent() {
        let (engine, store) = engine();
        let (_client_id, service_id) = setup_request(&engine);
        let driver_id = new_driver(&engine, "driver");

        engine.propose_service(service_id, driver_id, here()).unwrap();
        engine.accept_proposal(service_id).unwrap();
        engine.start_service(service_id).unwrap();

        let service = engine.driver_complete_service(service_id).unwrap();
        assert!(service.driver_completed);
        assert_eq!(service.status, ServiceStatus::InProgress);

        engine
            .client_complete_service(service_id, 5, None)
            .unwrap();
        let completed = store.service(service_id).unwrap().unwrap();
        assert_eq!(completed.status, ServiceStatus::Completed);
        let completed_at = completed.completed_at.unwrap();

        // A repeat confirmation neither re-stamps completed_at nor re-frees
        // accounts into a different state.
        let again = engine.driver_complete_service(service_id).unwrap();
        assert_eq!(again.completed_at, Some(completed_at));
        assert_eq!(again.status, ServiceStatus::Completed);
    }

    #[test]
    fn repeated_client_completion_does_not_rerate_the_driver() {
        let (engine, store) = engine();
        let (_client_id, service_id) = setup_request(&engine);
        let driver_id = new_driver(&engine, "driver");

        engine.propose_service(service_id, driver_id, here()).unwrap();
        engine.accept_proposal(service_id).unwrap();
        engine.start_service(service_id).unwrap();
        engine.driver_complete_service(service_id).unwrap();

        engine.client_complete_service(service_id, 4, None).unwrap();
        engine.client_complete_service(service_id, 4, None).unwrap();

        let driver = store.account(driver_id).unwrap().unwrap();
        assert_eq!(driver.driver_rating_count, 1);
        assert_eq!(driver.driver_rating, Some(4.0));
    }

    #[test]
    fn rating_out_of_range_is_rejected() {
        let (engine, _store) = engine();
        let (_client_id, service_id) = setup_request(&engine);

        let err = engine
            .client_complete_service(service_id, 0, None)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = engine
            .client_complete_service(service_id, 6, None)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn cancel_frees_both_parties() {
        let (engine, store) = engine();
        let (client_id, service_id) = setup_request(&engine);
        let driver_id = new_driver(&engine, "driver");

        engine.propose_service(service_id, driver_id, here()).unwrap();
        let service = engine.cancel_service(service_id).unwrap();
        assert_eq!(service.status, ServiceStatus::Cancelled);

        let client = store.account(client_id).unwrap().unwrap();
        assert_eq!(client.status, AccountStatus::Free);
        let driver = store.account(driver_id).unwrap().unwrap();
        assert_eq!(driver.status, AccountStatus::Free);

        let err = engine.cancel_service(service_id).unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[test]
    fn full_lifecycle_with_dual_confirmation_and_rating() {
        let (engine, store) = engine();
        let (client_id, service_id) = setup_request(&engine);
        let driver_id = new_driver(&engine, "driver");

        let service = engine.propose_service(service_id, driver_id, here()).unwrap();
        assert_eq!(service.status, ServiceStatus::Negotiating);
        assert!(service.estimated_pickup_time.unwrap() >= 1);

        let service = engine.accept_proposal(service_id).unwrap();
        assert_eq!(service.status, ServiceStatus::Accepted);
        assert!(service.accepted_at.is_some());

        let service = engine.start_service(service_id).unwrap();
        assert_eq!(service.status, ServiceStatus::InProgress);

        let service = engine.driver_complete_service(service_id).unwrap();
        assert!(service.driver_completed);
        assert_eq!(service.status, ServiceStatus::InProgress);

        let service = engine
            .client_complete_service(service_id, 5, Some("great trip".to_string()))
            .unwrap();
        assert_eq!(service.status, ServiceStatus::Completed);
        assert!(service.completed_at.is_some());
        assert_eq!(service.rating, Some(5));

        let client = store.account(client_id).unwrap().unwrap();
        assert_eq!(client.status, AccountStatus::Free);
        assert_eq!(client.active_service_id, None);

        let driver = store.account(driver_id).unwrap().unwrap();
        assert_eq!(driver.status, AccountStatus::Free);
        assert_eq!(driver.driver_rating, Some(5.0));
        assert_eq!(driver.driver_rating_count, 1);
    }

    #[test]
    fn start_requires_acceptance_first() {
        let (engine, _store) = engine();
        let (_client_id, service_id) = setup_request(&engine);
        let driver_id = new_driver(&engine, "driver");

        engine.propose_service(service_id, driver_id, here()).unwrap();
        let err = engine.start_service(service_id).unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }
}
