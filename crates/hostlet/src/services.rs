//! Process-wide collaborators shared by the dispatcher and every component.

use std::sync::Arc;

use crate::bridge::transport::Outbound;
use crate::config::BridgeConfig;
use crate::guest::GuestLoader;
use crate::permission::PermissionBroker;
use crate::scripting::TicketCounter;
use crate::stream::StreamJobManager;
use crate::supervisor::Supervisor;

#[derive(Clone)]
pub struct HostServices {
    pub outbound: Outbound,
    pub loader: Arc<dyn GuestLoader>,
    pub tickets: Arc<TicketCounter>,
    pub streams: Arc<StreamJobManager>,
    pub permissions: Arc<PermissionBroker>,
    pub supervisor: Arc<Supervisor>,
    pub config: Arc<BridgeConfig>,
}

impl HostServices {
    pub fn new(outbound: Outbound, loader: Arc<dyn GuestLoader>, config: BridgeConfig) -> Self {
        Self {
            streams: Arc::new(StreamJobManager::new(outbound.clone(), config.flow_limits())),
            permissions: Arc::new(PermissionBroker::new(
                outbound.clone(),
                config.permission_timeout(),
            )),
            tickets: Arc::new(TicketCounter::new()),
            supervisor: Arc::new(Supervisor::new()),
            config: Arc::new(config),
            outbound,
            loader,
        }
    }
}
