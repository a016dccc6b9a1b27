//! CloudTrail audit trail
//!
//! When the pod mounting a claim goes away, with its StatefulSet or through a
//! scale-down, the claim's EBS volume is detached. [`CloudTrailAudit`]
//! resolves the claim's persistent volume to its EBS volume ID and reports
//! the most recent `DetachVolume` call, unless a later `AttachVolume` shows
//! the volume is in use again.

use crate::audit::{AuditSubject, AuditTrail};
use crate::error::AuditError;
use async_trait::async_trait;
use aws_sdk_cloudtrail::error::DisplayErrorContext;
use aws_sdk_cloudtrail::primitives::DateTime as AwsDateTime;
use aws_sdk_cloudtrail::types::{LookupAttribute, LookupAttributeKey};
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::api::Api;
use tracing::debug;

/// CSI driver name of the EBS CSI driver
pub const EBS_CSI_DRIVER: &str = "ebs.csi.aws.com";

pub const ATTACH_VOLUME: &str = "AttachVolume";
pub const DETACH_VOLUME: &str = "DetachVolume";

/// LookupEvents is rate limited to 2 TPS per account, so one page per volume
const MAX_EVENTS: i32 = 50;

/// Connection settings for CloudTrail
#[derive(Debug, Clone, Default)]
pub struct CloudTrailConfig {
    /// AWS region; the default provider chain decides when unset
    pub region: Option<String>,
    /// Custom endpoint, e.g. localstack
    pub endpoint_url: Option<String>,
}

/// Audit trail backed by CloudTrail volume attach/detach events
pub struct CloudTrailAudit {
    cloudtrail: aws_sdk_cloudtrail::Client,
    volumes: Api<PersistentVolume>,
}

impl CloudTrailAudit {
    pub fn new(cloudtrail: aws_sdk_cloudtrail::Client, kube: kube::Client) -> Self {
        Self {
            cloudtrail,
            volumes: Api::all(kube),
        }
    }

    /// Build a client from the standard AWS credential chain
    pub async fn from_env(kube: kube::Client, config: &CloudTrailConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_cloudtrail::config::Builder::from(&sdk_config);
        if let Some(endpoint_url) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }
        debug!(region = ?sdk_config.region(), "CloudTrail client configured");

        Self::new(aws_sdk_cloudtrail::Client::from_conf(builder.build()), kube)
    }

    async fn volume_id(&self, pv_name: &str) -> Result<Option<String>, AuditError> {
        let pv = self.volumes.get_opt(pv_name).await?;
        Ok(pv.as_ref().and_then(ebs_volume_id))
    }

    async fn volume_events(
        &self,
        volume_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, AuditError> {
        let attribute = LookupAttribute::builder()
            .attribute_key(LookupAttributeKey::ResourceName)
            .attribute_value(volume_id)
            .build()
            .map_err(|e| AuditError::Query {
                message: e.to_string(),
            })?;

        let output = self
            .cloudtrail
            .lookup_events()
            .lookup_attributes(attribute)
            .start_time(AwsDateTime::from_secs(since.timestamp()))
            .max_results(MAX_EVENTS)
            .send()
            .await
            .map_err(|e| AuditError::Query {
                message: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(output
            .events()
            .iter()
            .filter_map(|event| {
                let name = event.event_name()?;
                let at = event.event_time()?;
                let at = Utc.timestamp_opt(at.secs(), at.subsec_nanos()).single()?;
                Some((name.to_string(), at))
            })
            .collect())
    }
}

/// EBS volume ID backing a persistent volume, for CSI and in-tree volumes
pub fn ebs_volume_id(pv: &PersistentVolume) -> Option<String> {
    let spec = pv.spec.as_ref()?;
    if let Some(csi) = spec.csi.as_ref().filter(|csi| csi.driver == EBS_CSI_DRIVER) {
        return Some(csi.volume_handle.clone());
    }
    // In-tree IDs may be written as aws://<zone>/<volume-id>
    spec.aws_elastic_block_store
        .as_ref()
        .and_then(|ebs| ebs.volume_id.rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Time of the last detach, if the volume was not attached again afterwards
pub fn last_detachment(events: &[(String, DateTime<Utc>)]) -> Option<DateTime<Utc>> {
    let (name, at) = events
        .iter()
        .filter(|(name, _)| name == ATTACH_VOLUME || name == DETACH_VOLUME)
        .max_by_key(|(_, at)| *at)?;
    (name == DETACH_VOLUME).then_some(*at)
}

#[async_trait]
impl AuditTrail for CloudTrailAudit {
    async fn find_deletion_event(
        &self,
        subject: &AuditSubject<'_>,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AuditError> {
        let Some(pv_name) = subject.volume else {
            debug!(subject = %subject, "Claim is not bound to a volume");
            return Ok(None);
        };
        let Some(volume_id) = self.volume_id(pv_name).await? else {
            debug!(subject = %subject, volume = %pv_name, "Volume is not an EBS volume");
            return Ok(None);
        };

        let events = self.volume_events(&volume_id, since).await?;
        let found = last_detachment(&events);
        debug!(
            subject = %subject,
            volume_id = %volume_id,
            since = %since,
            candidates = events.len(),
            found = ?found,
            "CloudTrail lookup complete"
        );
        Ok(found)
    }

    async fn check(&self) -> Result<(), AuditError> {
        self.cloudtrail
            .lookup_events()
            .max_results(1)
            .send()
            .await
            .map_err(|e| AuditError::Query {
                message: DisplayErrorContext(&e).to_string(),
            })?;
        Ok(())
    }
}
