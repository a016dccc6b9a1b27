//! Audit trail lookups
//!
//! The orphan lifecycle needs to know when a workload (or one of its pods)
//! went away. [`AuditTrail`] answers that question. Two backends exist:
//! [`crate::cloudtrail::CloudTrailAudit`] measures from the detach of the
//! claim's EBS volume, [`KubeEventAudit`] from core/v1 Events recorded
//! against the deleted object. Events expire after an hour by default and
//! nothing records one for a deleted StatefulSet, so the event backend is
//! only useful for pod scale-down reclaim.

use crate::error::AuditError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Event;
use kube::api::{Api, ListParams};
use kube::Client;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Kinds of resources whose deletion is looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    StatefulSet,
    Pod,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::Pod => "Pod",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resource whose deletion orphaned a claim
#[derive(Debug, Clone, Copy)]
pub struct AuditSubject<'a> {
    pub kind: ResourceKind,
    pub namespace: &'a str,
    pub name: &'a str,
    /// Persistent volume bound to the orphaned claim
    pub volume: Option<&'a str>,
}

impl fmt::Display for AuditSubject<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Lookup of deletion events
#[async_trait]
pub trait AuditTrail: Send + Sync {
    /// Most recent deletion of `subject` at or after `since`.
    /// `Ok(None)` when no such event exists.
    async fn find_deletion_event(
        &self,
        subject: &AuditSubject<'_>,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AuditError>;

    /// Verify the backend is reachable and the operator may query it
    async fn check(&self) -> Result<(), AuditError>;
}

/// Which [`AuditTrail`] implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackend {
    #[default]
    CloudTrail,
    Events,
}

impl FromStr for AuditBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cloudtrail" => Ok(AuditBackend::CloudTrail),
            "events" => Ok(AuditBackend::Events),
            other => Err(format!(
                "unknown audit backend {:?} (expected cloudtrail or events)",
                other
            )),
        }
    }
}

impl fmt::Display for AuditBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditBackend::CloudTrail => f.write_str("cloudtrail"),
            AuditBackend::Events => f.write_str("events"),
        }
    }
}

/// Event reasons treated as deletion by default
pub const DEFAULT_DELETION_REASONS: &[&str] = &["Deleted", "Killing"];

/// Audit trail backed by the Kubernetes Events API
pub struct KubeEventAudit {
    client: Client,
    reasons: Vec<String>,
}

impl KubeEventAudit {
    pub fn new(client: Client, reasons: Vec<String>) -> Self {
        let reasons = if reasons.is_empty() {
            DEFAULT_DELETION_REASONS.iter().map(|r| r.to_string()).collect()
        } else {
            reasons
        };
        Self { client, reasons }
    }
}

/// Best timestamp of an event: last seen, then event time, then first seen
pub fn event_timestamp(event: &Event) -> Option<DateTime<Utc>> {
    event
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.event_time.as_ref().map(|t| t.0))
        .or_else(|| event.first_timestamp.as_ref().map(|t| t.0))
        .or_else(|| event.metadata.creation_timestamp.as_ref().map(|t| t.0))
}

/// Most recent event with a matching reason at or after `since`
pub fn latest_deletion<'a>(
    events: impl IntoIterator<Item = &'a Event>,
    reasons: &[String],
    since: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    events
        .into_iter()
        .filter(|event| {
            event
                .reason
                .as_deref()
                .is_some_and(|reason| reasons.iter().any(|r| r == reason))
        })
        .filter_map(event_timestamp)
        .filter(|ts| *ts >= since)
        .max()
}

#[async_trait]
impl AuditTrail for KubeEventAudit {
    async fn find_deletion_event(
        &self,
        subject: &AuditSubject<'_>,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AuditError> {
        let events: Api<Event> = Api::namespaced(self.client.clone(), subject.namespace);
        let selector = format!(
            "involvedObject.kind={},involvedObject.name={}",
            subject.kind.as_str(),
            subject.name
        );
        let list = events.list(&ListParams::default().fields(&selector)).await?;

        let found = latest_deletion(&list.items, &self.reasons, since);
        debug!(
            subject = %subject,
            since = %since,
            candidates = list.items.len(),
            found = ?found,
            "Event lookup complete"
        );
        Ok(found)
    }

    async fn check(&self) -> Result<(), AuditError> {
        let events: Api<Event> = Api::all(self.client.clone());
        events.list(&ListParams::default().limit(1)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn event(reason: &str, at: DateTime<Utc>) -> Event {
        Event {
            reason: Some(reason.into()),
            last_timestamp: Some(Time(at)),
            ..Default::default()
        }
    }

    fn reasons() -> Vec<String> {
        DEFAULT_DELETION_REASONS.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn test_latest_matching_event_wins() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let events = vec![
            event("Deleted", t0),
            event("Scheduled", t0 + chrono::Duration::minutes(30)),
            event("Deleted", t0 + chrono::Duration::minutes(10)),
        ];

        let found = latest_deletion(&events, &reasons(), t0 - chrono::Duration::hours(1));
        assert_eq!(found, Some(t0 + chrono::Duration::minutes(10)));
    }

    #[test]
    fn test_events_outside_lookback_are_ignored() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let events = vec![event("Deleted", t0)];

        assert_eq!(latest_deletion(&events, &reasons(), t0 + chrono::Duration::seconds(1)), None);
    }

    #[test]
    fn test_event_timestamp_fallbacks() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut e = Event::default();
        assert_eq!(event_timestamp(&e), None);

        e.first_timestamp = Some(Time(t0));
        assert_eq!(event_timestamp(&e), Some(t0));

        e.last_timestamp = Some(Time(t0 + chrono::Duration::minutes(5)));
        assert_eq!(event_timestamp(&e), Some(t0 + chrono::Duration::minutes(5)));
    }

    #[test]
    fn test_resource_kind_names() {
        assert_eq!(ResourceKind::StatefulSet.to_string(), "StatefulSet");
        assert_eq!(ResourceKind::Pod.as_str(), "Pod");
    }

    #[test]
    fn test_audit_backend_parsing() {
        assert_eq!("cloudtrail".parse(), Ok(AuditBackend::CloudTrail));
        assert_eq!(" Events ".parse(), Ok(AuditBackend::Events));
        assert!("syslog".parse::<AuditBackend>().is_err());
        assert_eq!(AuditBackend::default(), AuditBackend::CloudTrail);
        assert_eq!(AuditBackend::Events.to_string(), "events");
    }

    #[test]
    fn test_subject_display() {
        let subject = AuditSubject {
            kind: ResourceKind::Pod,
            namespace: "default",
            name: "web-2",
            volume: None,
        };
        assert_eq!(subject.to_string(), "Pod default/web-2");
    }
}
