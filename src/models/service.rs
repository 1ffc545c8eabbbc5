use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn in_range(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub point: GeoPoint,
    pub address: String,
}

/// Flow: pending -> negotiating -> accepted -> in_progress -> completed.
/// Any non-terminal state can drop to cancelled; an unanswered negotiation
/// expires after the timeout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Pending,
    Negotiating,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
    Expired,
}

impl ServiceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Completed | ServiceStatus::Cancelled | ServiceStatus::Expired
        )
    }

    pub fn conditions_client(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Pending
                | ServiceStatus::Negotiating
                | ServiceStatus::Accepted
                | ServiceStatus::InProgress
        )
    }

    pub fn conditions_driver(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Negotiating | ServiceStatus::Accepted | ServiceStatus::InProgress
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub client_id: Uuid,
    pub client_name: String,
    pub driver_id: Option<Uuid>,
    pub driver_name: Option<String>,
    pub driver_rating: Option<f64>,
    pub origin: Location,
    pub destination: Location,
    pub status: ServiceStatus,
    pub estimated_pickup_time: Option<u32>,
    pub driver_completed: bool,
    pub client_completed: bool,
    pub negotiation_started_at: Option<DateTime<Utc>>,
    pub rating: Option<u8>,
    pub rating_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Service {
    pub fn new(client_id: Uuid, client_name: String, origin: Location, destination: Location) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client_id,
            client_name,
            driver_id: None,
            driver_name: None,
            driver_rating: None,
            origin,
            destination,
            status: ServiceStatus::Pending,
            estimated_pickup_time: None,
            driver_completed: false,
            client_completed: false,
            negotiation_started_at: None,
            rating: None,
            rating_comment: None,
            created_at: now,
            updated_at: now,
            accepted_at: None,
            completed_at: None,
        }
    }

    /// Resets the record to an unclaimed pending request, as after a
    /// client rejection.
    pub fn clear_proposal(&mut self) {
        self.driver_id = None;
        self.driver_name = None;
        self.driver_rating = None;
        self.estimated_pickup_time = None;
        self.negotiation_started_at = None;
        self.accepted_at = None;
        self.status = ServiceStatus::Pending;
        self.updated_at = Utc::now();
    }
}
