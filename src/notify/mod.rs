use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::service::{Service, ServiceStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    Client,
    Driver,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ServiceCreated,
    DriverProposed,
    ClientAccepted,
    ClientRejected,
    TripStarted,
    DriverCompleted,
    ClientCompleted,
    ServiceCompleted,
    ServiceCancelled,
    ServiceExpired,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub service_id: Uuid,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
struct Seen {
    status: ServiceStatus,
    driver_completed: bool,
    client_completed: bool,
}

/// Per-(service, role) projection of the store change feed into user-facing
/// events. Emits only on a status transition or a completion flag flipping
/// true, never on every field change. State lives for one subscription and
/// is dropped with it.
pub struct ServiceWatcher {
    perspective: Perspective,
    last: Option<Seen>,
}

impl ServiceWatcher {
    pub fn new(perspective: Perspective) -> Self {
        Self {
            perspective,
            last: None,
        }
    }

    pub fn observe(&mut self, service: &Service) -> Vec<Notification> {
        let mut out = Vec::new();

        let Some(last) = self.last else {
            // First snapshot seeds the diff state; a client watching its own
            // fresh request still learns it was filed.
            if self.perspective == Perspective::Client && service.status == ServiceStatus::Pending {
                out.push(notification(
                    NotificationKind::ServiceCreated,
                    service.id,
                    "transport request created".to_string(),
                ));
            }
            self.remember(service);
            return out;
        };

        if last.status != service.status {
            if let Some(n) = self.status_notification(last.status, service) {
                out.push(n);
            }
        }

        if self.perspective == Perspective::Client
            && service.driver_completed
            && !last.driver_completed
        {
            out.push(notification(
                NotificationKind::DriverCompleted,
                service.id,
                "the driver marked the trip as completed".to_string(),
            ));
        }

        if self.perspective == Perspective::Driver
            && service.client_completed
            && !last.client_completed
        {
            out.push(notification(
                NotificationKind::ClientCompleted,
                service.id,
                "the client confirmed the trip completion".to_string(),
            ));
        }

        self.remember(service);
        out
    }

    /// A record deleted mid-negotiation is an expiry; any other deletion is
    /// silent.
    pub fn observe_deleted(&mut self, service_id: Uuid) -> Option<Notification> {
        let last = self.last.take()?;
        if last.status == ServiceStatus::Negotiating {
            return Some(notification(
                NotificationKind::ServiceExpired,
                service_id,
                "the response window expired".to_string(),
            ));
        }
        None
    }

    fn status_notification(&self, previous: ServiceStatus, service: &Service) -> Option<Notification> {
        let driver_name = service.driver_name.as_deref().unwrap_or("a driver");
        let client_name = service.client_name.as_str();

        let (kind, message) = match self.perspective {
            Perspective::Client => match service.status {
                ServiceStatus::Negotiating if previous == ServiceStatus::Pending => (
                    NotificationKind::DriverProposed,
                    format!("{driver_name} offered to take your request"),
                ),
                ServiceStatus::Accepted => (
                    NotificationKind::ClientAccepted,
                    "the driver is on the way".to_string(),
                ),
                ServiceStatus::InProgress => {
                    (NotificationKind::TripStarted, "the trip started".to_string())
                }
                ServiceStatus::Completed => (
                    NotificationKind::ServiceCompleted,
                    "trip completed".to_string(),
                ),
                ServiceStatus::Cancelled => (
                    NotificationKind::ServiceCancelled,
                    "service cancelled".to_string(),
                ),
                ServiceStatus::Expired => (
                    NotificationKind::ServiceExpired,
                    "the response window expired".to_string(),
                ),
                _ => return None,
            },
            Perspective::Driver => match service.status {
                ServiceStatus::Accepted if previous == ServiceStatus::Negotiating => (
                    NotificationKind::ClientAccepted,
                    format!("{client_name} accepted your proposal"),
                ),
                ServiceStatus::Pending if previous == ServiceStatus::Negotiating => (
                    NotificationKind::ClientRejected,
                    format!("{client_name} rejected the proposal"),
                ),
                ServiceStatus::InProgress => {
                    (NotificationKind::TripStarted, "trip started".to_string())
                }
                ServiceStatus::Completed => (
                    NotificationKind::ServiceCompleted,
                    "trip completed".to_string(),
                ),
                ServiceStatus::Cancelled => (
                    NotificationKind::ServiceCancelled,
                    "service cancelled by the client".to_string(),
                ),
                ServiceStatus::Expired => (
                    NotificationKind::ServiceExpired,
                    "the response window expired".to_string(),
                ),
                _ => return None,
            },
        };

        Some(notification(kind, service.id, message))
    }

    fn remember(&mut self, service: &Service) {
        self.last = Some(Seen {
            status: service.status,
            driver_completed: service.driver_completed,
            client_completed: service.client_completed,
        });
    }
}

fn notification(kind: NotificationKind, service_id: Uuid, message: String) -> Notification {
    Notification {
        kind,
        service_id,
        message,
    }
}
