//! Out-of-crate collaborators consulted by webhook dispatch, following the
//! ledger crate's `Logging*` stub pattern for the same reason: these are
//! integration seams the composition root wires to real services.

use async_trait::async_trait;
use log::info;

/// Grants cluster access once a `cluster_subscription` webhook lands.
/// Named for the teacher's "quartermaster" collaborator (§9).
#[async_trait]
pub trait ClusterAccessGrantor: Send + Sync {
    async fn grant_access(&self, tenant_id: &str, cluster_id: &str);
}

pub struct LoggingClusterAccessGrantor;

#[async_trait]
impl ClusterAccessGrantor for LoggingClusterAccessGrantor {
    async fn grant_access(&self, tenant_id: &str, cluster_id: &str) {
        info!("granting cluster {cluster_id} access to tenant {tenant_id}");
    }
}
