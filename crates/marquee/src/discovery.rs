// ── mDNS discovery ──
//
// Browses for Cast receivers and turns every resolved service into a
// DiscoveryEvent. Removals are ignored: a receiver that drops off the
// network is noticed by its heartbeat, and its last known address is the
// best guess when it comes back.

use std::net::{IpAddr, SocketAddr};

use mdns_sd::{IfKind, Receiver, ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use marquee_core::DiscoveryEvent;

use crate::error::CliError;

pub const CAST_SERVICE_TYPE: &str = "_googlecast._tcp.local.";

/// TXT record holding the receiver's friendly name.
const FRIENDLY_NAME_KEY: &str = "fn";

pub struct DiscoveryListener {
    daemon: ServiceDaemon,
    events: Receiver<ServiceEvent>,
}

impl DiscoveryListener {
    /// Start browsing, optionally restricted to one interface given by name
    /// or by one of its addresses.
    pub fn start(interface: Option<&str>) -> Result<Self, CliError> {
        let daemon = ServiceDaemon::new().map_err(discovery_error)?;

        if let Some(interface) = interface {
            daemon
                .disable_interface(IfKind::All)
                .map_err(discovery_error)?;
            daemon
                .enable_interface(interface_kind(interface))
                .map_err(discovery_error)?;
            info!(interface, "discovery restricted to interface");
        }

        let events = daemon.browse(CAST_SERVICE_TYPE).map_err(discovery_error)?;
        Ok(Self { daemon, events })
    }

    /// Forward resolved receivers to `on_event` until `cancel` fires.
    pub async fn run<F>(self, cancel: CancellationToken, mut on_event: F)
    where
        F: FnMut(DiscoveryEvent),
    {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = self.events.recv_async() => {
                    let Ok(event) = event else {
                        warn!("mDNS daemon stopped unexpectedly");
                        break;
                    };
                    match event {
                        ServiceEvent::ServiceResolved(service) => {
                            let event = event_from_service(&service);
                            debug!(
                                service = service.get_fullname(),
                                name = ?event.name,
                                address = ?event.address,
                                "receiver resolved"
                            );
                            on_event(event);
                        }
                        other => trace!(event = ?other, "ignoring mDNS event"),
                    }
                }
            }
        }

        if let Err(e) = self.daemon.shutdown() {
            debug!(error = %e, "mDNS daemon shutdown");
        }
    }
}

/// Friendly name and address of a resolved receiver. IPv4 addresses are
/// preferred; either half is absent when the record does not carry it.
pub fn event_from_service(service: &ServiceInfo) -> DiscoveryEvent {
    let name = service
        .get_property_val_str(FRIENDLY_NAME_KEY)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned);

    let addresses = service.get_addresses();
    let ip = addresses
        .iter()
        .filter(|ip| ip.is_ipv4())
        .min()
        .or_else(|| addresses.iter().min())
        .copied();

    DiscoveryEvent {
        name,
        address: ip.map(|ip| SocketAddr::new(ip, service.get_port())),
    }
}

fn interface_kind(interface: &str) -> IfKind {
    match interface.parse::<IpAddr>() {
        Ok(ip) => IfKind::Addr(ip),
        Err(_) => IfKind::Name(interface.to_owned()),
    }
}

#[allow(clippy::needless_pass_by_value)]
fn discovery_error(err: mdns_sd::Error) -> CliError {
    CliError::Discovery {
        message: err.to_string(),
    }
}
