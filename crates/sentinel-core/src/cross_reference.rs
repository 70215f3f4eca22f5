//! Read-only views joining persisted users with the gateway listing.
//! Nothing here takes the run-lock or mutates either side.

use std::collections::HashMap;

use sentinel_types::{
    status_consistent, AllInstanceStats, InstanceCrossReference, InstanceStats, InstanceSummary,
    Liveness, RemoteInstanceView, UserLookup, UserRecord, UserStatus,
};
use tracing::debug;

use crate::reconciler::{CheckError, Reconciler};

fn view(instance: &InstanceSummary) -> RemoteInstanceView {
    RemoteInstanceView {
        id: instance.id.clone(),
        name: instance.name.clone(),
        connection_status: instance.connection_status,
    }
}

impl Reconciler {
    pub async fn instance_stats(&self, lookup: &UserLookup) -> Result<InstanceStats, CheckError> {
        let user = self
            .users
            .find(lookup)
            .await?
            .ok_or_else(|| CheckError::NotFound(format!("user {}", lookup.describe())))?;

        let remote = match user.instance_id.as_deref().filter(|id| !id.trim().is_empty()) {
            Some(id) => self
                .directory
                .list_instances()
                .await?
                .into_iter()
                .find(|i| i.id == id),
            None => None,
        };

        let (liveness, connection_state) = match remote.as_ref() {
            Some(instance) => self.probe_liveness(instance).await,
            None => (None, None),
        };
        let consistent = match remote.as_ref() {
            Some(instance) => status_consistent(instance.connection_status, user.status),
            None => user.status == UserStatus::Offline,
        };

        Ok(InstanceStats {
            user,
            instance: remote.as_ref().map(view),
            liveness,
            connection_state,
            status_consistent: consistent,
        })
    }

    pub async fn all_instance_stats(&self) -> Result<AllInstanceStats, CheckError> {
        let instances = self.directory.list_instances().await?;
        let users = self.users.list_users().await?;

        // Users come newest first, so the first row per instance wins.
        let mut by_instance: HashMap<&str, &UserRecord> = HashMap::new();
        for user in &users {
            if let Some(id) = user.instance_id.as_deref() {
                by_instance.entry(id).or_insert(user);
            }
        }

        let mut stats = AllInstanceStats::default();
        for instance in &instances {
            stats.total_instances += 1;
            if instance.is_online() {
                stats.online_instances += 1;
            }
            let entry = match by_instance.get(instance.id.as_str()) {
                Some(user) => {
                    stats.with_user_record += 1;
                    let consistent = status_consistent(instance.connection_status, user.status);
                    if !consistent {
                        stats.inconsistent += 1;
                    }
                    InstanceCrossReference {
                        instance: view(instance),
                        user_id: Some(user.id.clone()),
                        user_status: Some(user.status),
                        mobile_number: user.mobile_number.clone(),
                        status_consistent: consistent,
                    }
                }
                None => {
                    stats.without_user_record += 1;
                    InstanceCrossReference {
                        instance: view(instance),
                        user_id: None,
                        user_status: None,
                        mobile_number: None,
                        status_consistent: true,
                    }
                }
            };
            stats.instances.push(entry);
        }
        Ok(stats)
    }

    async fn probe_liveness(&self, instance: &InstanceSummary) -> (Option<Liveness>, Option<String>) {
        let Some(token) = instance.token() else {
            return (None, None);
        };
        match self.directory.instance_detail(&instance.name, token).await {
            Ok(detail) => (Some(detail.liveness()), detail.connection_state()),
            Err(err) => {
                debug!(instance = %instance.name, kind = err.kind().as_str(), "liveness unavailable: {err}");
                (None, None)
            }
        }
    }
}
