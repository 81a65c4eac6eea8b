//! Transport backed by the bus worker thread
//!
//! The discovery core calls [`Transport`] synchronously, so requests are
//! pushed onto the bridge with `try_send_command`; completions come back as
//! [`common::BusEvent`]s that the host feeds to the engine.

use anyhow::{Context, Result, anyhow};
use common::{BusBridge, BusCommand};
use protocol::{BusId, DevicePath, PathCapability, Request, TransportParams};
use std::collections::HashMap;
use tracing::{debug, error};
use xpt::{Transport, XptError};

pub struct BridgeTransport {
    bridge: BusBridge,
    /// Capabilities learned at connect time
    capabilities: HashMap<BusId, PathCapability>,
}

impl BridgeTransport {
    /// Ask the worker about every bus in `buses`
    pub async fn connect(bridge: BusBridge, buses: &[BusId]) -> Result<Self> {
        let mut capabilities = HashMap::new();
        for &bus in buses {
            let capability = bridge
                .path_capability(bus)
                .await
                .with_context(|| format!("Failed to query {}", bus))?
                .ok_or_else(|| anyhow!("Bus worker does not know {}", bus))?;
            debug!("{}: {:?}", bus, capability);
            capabilities.insert(bus, capability);
        }
        Ok(Self {
            bridge,
            capabilities,
        })
    }

    fn send(&self, cmd: BusCommand) {
        if let Err(e) = self.bridge.try_send_command(cmd) {
            error!("Failed to queue bus command: {}", e);
        }
    }
}

impl Transport for BridgeTransport {
    fn submit(&mut self, request: Request) -> xpt::Result<()> {
        self.bridge
            .try_send_command(BusCommand::Execute(request))
            .map_err(|e| XptError::Transport(e.to_string()))
    }

    fn path_capability(&self, bus: BusId) -> xpt::Result<PathCapability> {
        self.capabilities
            .get(&bus)
            .copied()
            .ok_or(XptError::UnknownBus(bus))
    }

    fn freeze_queue(&mut self, path: DevicePath, count: u32) {
        self.send(BusCommand::FreezeQueue { path, count });
    }

    fn release_queue(&mut self, path: DevicePath, count: u32, run_now: bool) {
        self.send(BusCommand::ReleaseQueue {
            path,
            count,
            run_now,
        });
    }

    fn set_transport_params(&mut self, path: DevicePath, params: TransportParams) {
        self.send(BusCommand::SetTransportParams { path, params });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::spawn_bus_worker;
    use crate::config::BusSettings;
    use common::create_bus_bridge;
    use protocol::{AtaCommand, RequestId, TargetAddress};

    #[tokio::test]
    async fn test_connect_caches_capability() {
        let (bridge, worker) = create_bus_bridge();
        let handle = spawn_bus_worker(worker, BusSettings::default()).unwrap();

        let transport = BridgeTransport::connect(bridge.clone(), &[BusId(0)])
            .await
            .unwrap();
        assert_eq!(transport.path_capability(BusId(0)).unwrap().max_target, 2);
        assert!(matches!(
            transport.path_capability(BusId(1)),
            Err(XptError::UnknownBus(BusId(1)))
        ));

        bridge.send_command(BusCommand::Shutdown).await.unwrap();
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_connect_unknown_bus_fails() {
        let (bridge, worker) = create_bus_bridge();
        let handle = spawn_bus_worker(worker, BusSettings::default()).unwrap();

        assert!(
            BridgeTransport::connect(bridge.clone(), &[BusId(4)])
                .await
                .is_err()
        );

        bridge.send_command(BusCommand::Shutdown).await.unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_submit_fails_once_worker_is_gone() {
        let (bridge, worker) = create_bus_bridge();
        let mut transport = BridgeTransport {
            bridge,
            capabilities: HashMap::new(),
        };
        let request = Request::new(
            RequestId(1),
            DevicePath::new(BusId(0), TargetAddress::Ordinary(0)),
            AtaCommand::Reset,
        );
        assert!(transport.submit(request.clone()).is_ok());

        drop(worker);
        assert!(matches!(
            transport.submit(request),
            Err(XptError::Transport(_))
        ));
    }
}
