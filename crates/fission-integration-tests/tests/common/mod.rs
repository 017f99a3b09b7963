//! Shared harness: a daemon on an ephemeral port with workers running.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fission_daemon::config::{DaemonConfig, IdentityMode};
use fission_daemon::{identity, server, spawn_workers, AppState};
use fission_entitlement::EntitlementNotifier;
use serde_json::Value;
use tokio::sync::broadcast;

/// Header the harness uses to act as a given uid.
pub const UID_HEADER: &str = "x-fission-uid";

pub struct Harness {
    pub state: Arc<AppState>,
    pub base: String,
    pub client: reqwest::Client,
    shutdown: broadcast::Sender<()>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Config used by every harness; header identity so tests can act as any uid.
pub fn test_config() -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.project_id = "integration".into();
    config.identity.mode = IdentityMode::Header;
    config.identity.uid_header = UID_HEADER.into();
    config
}

pub async fn start(
    config: DaemonConfig,
    notifier: Option<Arc<dyn EntitlementNotifier>>,
) -> Harness {
    config.validate().expect("valid config");
    let conn = fission_db::open_memory().expect("open db");
    let resolver = identity::from_config(&config.identity).expect("identity");
    let state = Arc::new(AppState::new(conn, config, resolver, notifier));

    let (shutdown, _) = broadcast::channel(1);
    spawn_workers(&state, &shutdown);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let router = server::router(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    Harness {
        state,
        base: format!("http://{addr}"),
        client: reqwest::Client::new(),
        shutdown,
    }
}

async fn into_parts(response: reqwest::Response) -> (u16, Value) {
    let status = response.status().as_u16();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

impl Harness {
    /// `POST /referral` acting as `uid`.
    pub async fn intake(&self, uid: &str, body: &str) -> (u16, Value) {
        let response = self
            .client
            .post(format!("{}/referral", self.base))
            .header(UID_HEADER, uid)
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .expect("intake request");
        into_parts(response).await
    }

    /// `POST /triggers/referral_records`, optionally with an explicit event id.
    pub async fn trigger(&self, event_id: Option<&str>, body: &Value) -> (u16, Value) {
        let mut request = self
            .client
            .post(format!("{}/triggers/referral_records", self.base))
            .json(body);
        if let Some(id) = event_id {
            request = request.header("x-event-id", id);
        }
        into_parts(request.send().await.expect("trigger request")).await
    }

    /// `GET /bonus_history/{uid}`
    pub async fn history(&self, uid: &str) -> (u16, Value) {
        let response = self
            .client
            .get(format!("{}/bonus_history/{uid}", self.base))
            .send()
            .await
            .expect("history request");
        into_parts(response).await
    }

    /// Poll until `uid` has `items` bonus items; the accrual worker runs
    /// asynchronously after intake.
    pub async fn wait_for_history(&self, uid: &str, items: usize) -> Value {
        for _ in 0..100 {
            let (status, body) = self.history(uid).await;
            if status == 200 && body["bonuses"].as_array().map(Vec::len) == Some(items) {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("history for {uid} never reached {items} items");
    }
}
