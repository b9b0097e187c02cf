//! Healthchecks.io-style dead-man's-switch pings (§E6). An
//! [`ObserverConfig`](crate::model::config::ObserverConfig) names a
//! `healthcheck_id` and the subjects/events it cares about; [`ObservationRouter`]
//! matches a fired event against the configured observers and
//! [`ObservationEmitter`] performs the actual ping.
//!
//! This is a straight port of the teacher's observer concept, re-keyed from
//! entity UUIDs to the string subjects (`subvolume path` or `mirror name`)
//! that the TOML configuration model uses to name things.

use std::str::FromStr;

use anyhow::{anyhow, Result};
use hyper::Uri;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::config::ObserverConfig;
use crate::sys::net::HttpsClient;

/// An event a subvolume or mirror can emit, and that an observer can match on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ObservableEvent {
    Snapshot,
    SnapshotPrune,
    Sync,
    MirrorPrune,
}

/// The three pings healthchecks.io recognizes for a single run of a job:
/// a `/start` on entry, a bare ping on success, and `/fail` on error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ObservableEventStage {
    Starting,
    Succeeded,
    Failed(String),
}

/// Matches a fired `(subject, event)` pair against the configured observers.
/// `subject` is the subvolume path or mirror name the event originated from;
/// an observer with `subject: None` (or `"*"`) matches every subject.
pub struct ObservationRouter {
    observers: Vec<ObserverConfig>,
}

impl ObservationRouter {
    pub fn new(observers: Vec<ObserverConfig>) -> Self {
        Self { observers }
    }

    pub fn route(&self, subject: &str, event: ObservableEvent) -> Vec<&ObserverConfig> {
        self.observers
            .iter()
            .filter(|o| o.events.contains(&event))
            .filter(|o| matches!(o.subject.as_deref(), None | Some("*") | Some(s) if s == subject))
            .collect()
    }
}

pub struct ObservationEmitter {
    http_client: HttpsClient,
    url: String,
}

impl ObservationEmitter {
    pub const DEFAULT_URL: &'static str = "https://hc-ping.com/";

    pub fn new(custom_url: String) -> Self {
        Self {
            http_client: HttpsClient::default(),
            url: custom_url,
        }
    }

    pub async fn emit(&self, healthcheck_id: Uuid, stage: ObservableEventStage) -> Result<()> {
        let suffix = match stage {
            ObservableEventStage::Starting => "/start",
            ObservableEventStage::Succeeded => "",
            ObservableEventStage::Failed(_) => "/fail",
        };
        let uri_string = format!("{}{}", &self.url, healthcheck_id.to_hyphenated());
        let uri = Uri::from_str((uri_string + suffix).as_str()).map_err(|e| anyhow!(e))?;

        slog_scope::trace!("emitting health check ping"; "url" => %uri);
        self.http_client
            .get(uri)
            .await
            .map_err(|e| anyhow!(e))
            .and_then(|r| match r.status() {
                http::status::StatusCode::OK => Ok(()),
                e => Err(anyhow!(e)),
            })
    }
}

impl Default for ObservationEmitter {
    fn default() -> Self {
        Self {
            http_client: HttpsClient::default(),
            url: String::from(Self::DEFAULT_URL),
        }
    }
}
