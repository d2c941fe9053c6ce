//! Derives events that are very likely to exist from ones that do:
//!
//! * a small `IP_RANGE` becomes one `IP_ADDRESS` per address;
//! * a `URL` / `URL_UNVERIFIED` implies an `OPEN_TCP_PORT` on its host.
//!
//! Ranges larger than `max_hosts` are left alone.

use std::sync::Arc;

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use tracing::{debug, warn};

use spyglass_common::event::{Event, EventType};
use spyglass_common::network::host::Host;

use crate::error::ModuleError;
use crate::modules::runtime::{EventHandler, ModuleContext};

const DEFAULT_MAX_HOSTS: u64 = 256;

#[derive(Debug)]
pub struct Speculate {
    max_hosts: u64,
}

impl Default for Speculate {
    fn default() -> Self {
        Self::new()
    }
}

impl Speculate {
    pub fn new() -> Self {
        Self {
            max_hosts: DEFAULT_MAX_HOSTS,
        }
    }

    async fn expand_range(&self, net: IpNetwork, event: &Event, ctx: &ModuleContext) {
        let size = network_size(&net);
        if size > u128::from(self.max_hosts) {
            debug!("Not expanding {net}: {size} hosts is more than {}", self.max_hosts);
            return;
        }

        let Some(addresses) = ctx
            .run_task(move || net.iter().map(|ip| ip.to_string()).collect::<Vec<_>>())
            .await
        else {
            warn!("Expanding {net} failed");
            return;
        };

        for address in addresses {
            let context = format!("speculated IP_ADDRESS {address} from {}", event.description());
            match Event::new(EventType::IpAddress, address.as_str(), event, &ctx.name, context) {
                Ok(derived) => {
                    ctx.emit(derived);
                }
                Err(e) => debug!("Skipping {address}: {e}"),
            }
        }
    }

    fn open_port(&self, event: &Event, ctx: &ModuleContext) {
        let (Some(host), Some(port)) = (&event.host, url_port(event)) else {
            return;
        };
        let netloc = match host {
            Host::Ip(std::net::IpAddr::V6(ip)) => format!("[{ip}]:{port}"),
            other => format!("{other}:{port}"),
        };
        let context = format!("speculated OPEN_TCP_PORT {netloc} from {}", event.description());
        match Event::new(EventType::OpenTcpPort, netloc.as_str(), event, &ctx.name, context) {
            Ok(derived) => {
                ctx.emit(derived.with_tags(["speculated"]));
            }
            Err(e) => debug!("Skipping {netloc}: {e}"),
        }
    }
}

fn network_size(net: &IpNetwork) -> u128 {
    let host_bits = match net {
        IpNetwork::V4(v4) => 32 - u32::from(v4.prefix()),
        IpNetwork::V6(v6) => 128 - u32::from(v6.prefix()),
    };
    1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
}

/// Explicit port of a URL event, or the scheme default.
fn url_port(event: &Event) -> Option<u16> {
    if let Some(port) = event.port {
        return Some(port);
    }
    let data = event.data.as_text()?;
    match data.split_once("://")?.0.to_ascii_lowercase().as_str() {
        "https" => Some(443),
        "http" => Some(80),
        _ => None,
    }
}

#[async_trait]
impl EventHandler for Speculate {
    async fn setup(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        self.max_hosts = ctx.option_u64("max_hosts", DEFAULT_MAX_HOSTS);
        Ok(())
    }

    async fn handle_event(&mut self, event: Arc<Event>, ctx: &ModuleContext) -> Result<(), ModuleError> {
        match &event.event_type {
            EventType::IpRange => {
                if let Some(Host::Network(net)) = &event.host {
                    self.expand_range(*net, &event, ctx).await;
                }
            }
            EventType::Url | EventType::UrlUnverified => self.open_port(&event, ctx),
            _ => {}
        }
        Ok(())
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::pool::TaskPool;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn context(max_hosts: u64) -> (ModuleContext, UnboundedReceiver<Event>) {
        let config: serde_yaml::Value =
            serde_yaml::from_str(&format!("modules:\n  speculate:\n    max_hosts: {max_hosts}\n")).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = ModuleContext::new(
            "speculate",
            "test",
            Arc::new(config),
            std::env::temp_dir(),
            Arc::new(TaskPool::new(1).unwrap()),
            tx,
        );
        (ctx, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn small_ranges_become_addresses() {
        let (ctx, mut rx) = context(16);
        let mut speculate = Speculate::new();
        speculate.setup(&ctx).await.unwrap();

        let root = Event::root("test");
        let range = Arc::new(Event::new("IP_RANGE", "10.0.0.0/29", &root, "TARGET", "seed").unwrap());
        speculate.handle_event(range, &ctx).await.unwrap();
        let events = drain(&mut rx);
        assert_eq!(events.len(), 8);
        assert!(events.iter().all(|e| e.event_type == EventType::IpAddress));
        assert_eq!(events[0].data.to_string(), "10.0.0.0");

        let big = Arc::new(Event::new("IP_RANGE", "10.0.0.0/24", &root, "TARGET", "seed").unwrap());
        speculate.handle_event(big, &ctx).await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn urls_imply_open_ports() {
        let (ctx, mut rx) = context(256);
        let mut speculate = Speculate::new();
        let root = Event::root("test");

        for (url, expected) in [
            ("https://www.evilcorp.com/login", "www.evilcorp.com:443"),
            ("http://evilcorp.com:8080/", "evilcorp.com:8080"),
        ] {
            let event = Arc::new(Event::new("URL_UNVERIFIED", url, &root, "spider", "link").unwrap());
            speculate.handle_event(event, &ctx).await.unwrap();
            let events = drain(&mut rx);
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].event_type, EventType::OpenTcpPort);
            assert_eq!(events[0].data.to_string(), expected);
            assert!(events[0].tags.contains("speculated"));
        }
    }

    #[test]
    fn sizes() {
        assert_eq!(network_size(&"1.2.3.0/24".parse().unwrap()), 256);
        assert_eq!(network_size(&"1.2.3.4/32".parse().unwrap()), 1);
        assert_eq!(network_size(&"::/0".parse().unwrap()), u128::MAX);
    }
}
