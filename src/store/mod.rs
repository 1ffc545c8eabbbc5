use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::account::Account;
use crate::models::service::{Service, ServiceStatus};

/// Change feed entry, pushed once per committed write in write order.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    ServiceUpserted(Service),
    ServiceDeleted(Uuid),
    AccountUpserted(Account),
}

#[derive(Default)]
struct Tables {
    services: HashMap<Uuid, Service>,
    accounts: HashMap<Uuid, Account>,
}

enum Write {
    Service(Service),
    DeleteService(Uuid),
    Account(Account),
}

/// Staged view over the tables. Reads see earlier staged writes; nothing
/// touches the tables until the whole transaction commits.
pub struct Txn<'a> {
    tables: &'a Tables,
    writes: Vec<Write>,
}

impl Txn<'_> {
    pub fn service(&self, id: Uuid) -> Option<Service> {
        for write in self.writes.iter().rev() {
            match write {
                Write::Service(s) if s.id == id => return Some(s.clone()),
                Write::DeleteService(deleted) if *deleted == id => return None,
                _ => {}
            }
        }
        self.tables.services.get(&id).cloned()
    }

    pub fn account(&self, id: Uuid) -> Option<Account> {
        for write in self.writes.iter().rev() {
            if let Write::Account(a) = write {
                if a.id == id {
                    return Some(a.clone());
                }
            }
        }
        self.tables.accounts.get(&id).cloned()
    }

    pub fn put_service(&mut self, service: Service) {
        self.writes.push(Write::Service(service));
    }

    pub fn delete_service(&mut self, id: Uuid) {
        self.writes.push(Write::DeleteService(id));
    }

    pub fn put_account(&mut self, account: Account) {
        self.writes.push(Write::Account(account));
    }
}

/// Strongly consistent in-memory record store. A single mutex over both
/// tables makes every transaction serializable: a status precondition checked
/// inside `transact` still holds at commit time, which is what turns two
/// drivers racing on the same pending service into exactly one winner.
pub struct ServiceStore {
    inner: Mutex<Tables>,
    events_tx: broadcast::Sender<StoreEvent>,
}

impl ServiceStore {
    pub fn new(event_buffer_size: usize) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size);
        Self {
            inner: Mutex::new(Tables::default()),
            events_tx,
        }
    }

    /// Runs `f` against a staged transaction. On `Ok` every staged write is
    /// applied and broadcast, in order, before the lock is released; on `Err`
    /// nothing is applied. There is no partial commit.
    pub fn transact<T>(&self, f: impl FnOnce(&mut Txn) -> Result<T, AppError>) -> Result<T, AppError> {
        let mut tables = self
            .inner
            .lock()
            .map_err(|_| AppError::StoreUnavailable("store lock poisoned".to_string()))?;

        let mut txn = Txn {
            tables: &tables,
            writes: Vec::new(),
        };
        let out = f(&mut txn)?;
        let writes = txn.writes;

        // Events are sent while the lock is held so per-record delivery order
        // matches write order.
        for write in writes {
            match write {
                Write::Service(service) => {
                    tables.services.insert(service.id, service.clone());
                    let _ = self.events_tx.send(StoreEvent::ServiceUpserted(service));
                }
                Write::DeleteService(id) => {
                    tables.services.remove(&id);
                    let _ = self.events_tx.send(StoreEvent::ServiceDeleted(id));
                }
                Write::Account(account) => {
                    tables.accounts.insert(account.id, account.clone());
                    let _ = self.events_tx.send(StoreEvent::AccountUpserted(account));
                }
            }
        }

        Ok(out)
    }

    pub fn service(&self, id: Uuid) -> Result<Option<Service>, AppError> {
        self.transact(|txn| Ok(txn.service(id)))
    }

    pub fn account(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        self.transact(|txn| Ok(txn.account(id)))
    }

    pub fn accounts(&self) -> Result<Vec<Account>, AppError> {
        self.read(|tables| tables.accounts.values().cloned().collect())
    }

    pub fn services_by_status(&self, statuses: &[ServiceStatus]) -> Result<Vec<Service>, AppError> {
        self.read(|tables| {
            let mut services: Vec<Service> = tables
                .services
                .values()
                .filter(|s| statuses.contains(&s.status))
                .cloned()
                .collect();
            services.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            services
        })
    }

    /// Trip history for one account, newest first.
    pub fn services_for_party(&self, account_id: Uuid, as_driver: bool) -> Result<Vec<Service>, AppError> {
        self.read(|tables| {
            let mut services: Vec<Service> = tables
                .services
                .values()
                .filter(|s| {
                    if as_driver {
                        s.driver_id == Some(account_id)
                    } else {
                        s.client_id == account_id
                    }
                })
                .cloned()
                .collect();
            services.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            services
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, AppError> {
        let tables = self
            .inner
            .lock()
            .map_err(|_| AppError::StoreUnavailable("store lock poisoned".to_string()))?;
        Ok(f(&tables))
    }
}
