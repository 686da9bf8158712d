//! Application state: repositories built fresh from the pool, plus the
//! process-wide singletons (queue, event bus, provisioner, master key) shared
//! with the deploy engine and health monitors started alongside this server.

use std::path::PathBuf;
use std::sync::Arc;

use paasdeploy_agent_client::CertificateAuthority;
use paasdeploy_core::crypto::MasterKey;
use paasdeploy_core::eventbus::BoxEventBus;
use paasdeploy_core::provisioner::Provisioner;
use paasdeploy_core::queue::DeployQueue;
use paasdeploy_db::{ApplicationRepo, DeploymentRepo, NodeRepo, PgApplicationRepo, PgDeploymentRepo, PgNodeRepo};
use paasdeploy_health::TonicAgentClientFactory;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub applications: Arc<dyn ApplicationRepo>,
    pub deployments: Arc<dyn DeploymentRepo>,
    pub nodes: Arc<dyn NodeRepo>,
    pub queue: Arc<dyn DeployQueue>,
    pub events: BoxEventBus,
    pub provisioner: Arc<dyn Provisioner>,
    pub master_key: Arc<MasterKey>,
    pub ca: Arc<CertificateAuthority>,
    pub agent_clients: Arc<TonicAgentClientFactory>,
    pub data_root: PathBuf,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        queue: Arc<dyn DeployQueue>,
        events: BoxEventBus,
        provisioner: Arc<dyn Provisioner>,
        master_key: Arc<MasterKey>,
        ca: Arc<CertificateAuthority>,
        agent_clients: Arc<TonicAgentClientFactory>,
        data_root: PathBuf,
    ) -> Self {
        Self {
            applications: Arc::new(PgApplicationRepo::new(pool.clone())),
            deployments: Arc::new(PgDeploymentRepo::new(pool.clone())),
            nodes: Arc::new(PgNodeRepo::new(pool)),
            queue,
            events,
            provisioner,
            master_key,
            ca,
            agent_clients,
            data_root,
        }
    }
}
