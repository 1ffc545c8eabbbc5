use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Client,
    Driver,
    Both,
}

impl AccountRole {
    pub fn can_drive(&self) -> bool {
        matches!(self, AccountRole::Driver | AccountRole::Both)
    }

    pub fn can_request(&self) -> bool {
        matches!(self, AccountRole::Client | AccountRole::Both)
    }
}

/// "Conditioned" means locked into an active service and barred from
/// starting or accepting another one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Free,
    Conditioned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub role: AccountRole,
    pub status: AccountStatus,
    pub active_service_id: Option<Uuid>,
    pub driver_rating: Option<f64>,
    pub driver_rating_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(name: String, role: AccountRole) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            role,
            status: AccountStatus::Free,
            active_service_id: None,
            driver_rating: None,
            driver_rating_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_conditioned(&self) -> bool {
        self.status == AccountStatus::Conditioned
    }

    pub fn condition(&mut self, service_id: Uuid) {
        self.status = AccountStatus::Conditioned;
        self.active_service_id = Some(service_id);
        self.updated_at = Utc::now();
    }

    pub fn free(&mut self) {
        self.status = AccountStatus::Free;
        self.active_service_id = None;
        self.updated_at = Utc::now();
    }

    /// Incremental running average: (old * count + rating) / (count + 1).
    pub fn record_driver_rating(&mut self, rating: u8) {
        let current = self.driver_rating.unwrap_or(0.0);
        let count = self.driver_rating_count as f64;
        self.driver_rating = Some((current * count + rating as f64) / (count + 1.0));
        self.driver_rating_count += 1;
        self.updated_at = Utc::now();
    }
}
