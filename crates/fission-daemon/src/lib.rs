//! fission-daemon: the referral bonus service.
//!
//! Single OS process running a Tokio async runtime. Clients reach it over
//! HTTP ([`server`]); referral writes fan out to the accrual worker over the
//! in-process [`events::ChangeBus`].

pub mod config;
pub mod events;
pub mod handlers;
pub mod identity;
pub mod outbox;
pub mod server;

use std::sync::Arc;

use fission_entitlement::{EntitlementNotifier, HttpEntitlementNotifier};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::DaemonConfig;
use crate::events::ChangeBus;
use crate::identity::IdentityResolver;

/// Daemon-wide shared state.
pub struct AppState {
    /// Database connection.
    pub db: Arc<Mutex<rusqlite::Connection>>,
    /// Configuration.
    pub config: DaemonConfig,
    /// Referral change bus.
    pub bus: ChangeBus,
    /// Acting-user resolution for intake.
    pub identity: Box<dyn IdentityResolver>,
    /// Entitlement service, when enabled.
    pub notifier: Option<Arc<dyn EntitlementNotifier>>,
}

impl AppState {
    pub fn new(
        conn: rusqlite::Connection,
        config: DaemonConfig,
        identity: Box<dyn IdentityResolver>,
        notifier: Option<Arc<dyn EntitlementNotifier>>,
    ) -> Self {
        let bus = ChangeBus::new(config.server.bus_capacity);
        Self {
            db: Arc::new(Mutex::new(conn)),
            config,
            bus,
            identity,
            notifier,
        }
    }

    /// Build state from a validated configuration: opens the database and
    /// constructs the identity resolver and entitlement client.
    pub fn from_config(config: DaemonConfig) -> anyhow::Result<Self> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)?;

        let db_path = config.db_path();
        let conn = fission_db::open(&db_path)?;
        info!(path = %db_path.display(), "database opened");

        let identity = identity::from_config(&config.identity)?;
        let notifier: Option<Arc<dyn EntitlementNotifier>> = if config.entitlement.enabled {
            let client = HttpEntitlementNotifier::new(config.entitlement.client_config())?;
            info!(url = %client.config().url, "entitlement service enabled");
            Some(Arc::new(client))
        } else {
            info!("entitlement service disabled");
            None
        };

        Ok(Self::new(conn, config, identity, notifier))
    }
}

/// Start the accrual worker and, when grants are enabled, the redelivery
/// loop. Both stop when `shutdown_tx` fires.
pub fn spawn_workers(
    state: &Arc<AppState>,
    shutdown_tx: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let mut handles = vec![tokio::spawn(handlers::accrual::run_worker(
        state.clone(),
        state.bus.subscribe(),
        shutdown_tx.subscribe(),
    ))];
    if state.notifier.is_some() {
        handles.push(tokio::spawn(outbox::run_redelivery(
            state.clone(),
            shutdown_tx.subscribe(),
        )));
    }
    handles
}
