//! Bluetooth device discovery for picking a chat peer

use bluechat_shared::ChatError;
use bluer::{Adapter, Address, Device};
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Obtain the default adapter and power it on
///
/// Must succeed before a manager on an RFCOMM transport is started.
pub async fn enable_radio() -> Result<Adapter, ChatError> {
    let unavailable = |e: bluer::Error| ChatError::RadioUnavailable(e.to_string());

    let session = bluer::Session::new().await.map_err(unavailable)?;
    let adapter = session.default_adapter().await.map_err(unavailable)?;
    if !adapter.is_powered().await.map_err(unavailable)? {
        info!("[BT] Powering on {}", adapter.name());
        adapter.set_powered(true).await.map_err(unavailable)?;
    }
    Ok(adapter)
}

/// Configuration for a discovery scan
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// How long to scan for devices
    pub scan_duration: Duration,
    /// Include devices already paired with this adapter
    pub include_paired: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(10),
            include_paired: true,
        }
    }
}

/// A device that could be offered to the user as a chat peer
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    /// Bluetooth MAC address
    pub address: Address,
    /// Advertised name, if any
    pub name: Option<String>,
    /// Signal strength (if available)
    pub rssi: Option<i16>,
    pub paired: bool,
}

/// Lists nearby and paired devices
pub struct PeerScanner {
    config: ScanConfig,
}

impl PeerScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    async fn describe(device: &Device) -> DiscoveredPeer {
        DiscoveredPeer {
            address: device.address(),
            name: device.name().await.ok().flatten(),
            rssi: device.rssi().await.ok().flatten(),
            paired: device.is_paired().await.unwrap_or(false),
        }
    }

    /// Scan for peers, strongest signal first
    pub async fn scan(&self, adapter: &Adapter) -> bluer::Result<Vec<DiscoveredPeer>> {
        let mut peers = Vec::new();
        let mut seen: HashSet<Address> = HashSet::new();

        if self.config.include_paired {
            for addr in adapter.device_addresses().await? {
                if let Ok(device) = adapter.device(addr) {
                    let peer = Self::describe(&device).await;
                    if peer.paired {
                        peers.push(peer);
                        seen.insert(addr);
                    }
                }
            }
        }

        let discover = adapter.discover_devices().await?;
        tokio::pin!(discover);

        let scan_result = timeout(self.config.scan_duration, async {
            while let Some(evt) = discover.next().await {
                if let bluer::AdapterEvent::DeviceAdded(addr) = evt {
                    if !seen.insert(addr) {
                        continue;
                    }
                    if let Ok(device) = adapter.device(addr) {
                        let peer = Self::describe(&device).await;
                        debug!("[BT] Found {} {:?}", peer.address, peer.name);
                        peers.push(peer);
                    }
                }
            }
        })
        .await;

        // Timeout is expected, not an error
        if scan_result.is_err() {
            info!("[BT] Discovery scan completed");
        }

        sort_by_signal(&mut peers);
        Ok(peers)
    }
}

fn sort_by_signal(peers: &mut [DiscoveredPeer]) {
    peers.sort_by(|a, b| {
        let rssi_a = a.rssi.unwrap_or(i16::MIN);
        let rssi_b = b.rssi.unwrap_or(i16::MIN);
        rssi_b.cmp(&rssi_a)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(last: u8, rssi: Option<i16>) -> DiscoveredPeer {
        DiscoveredPeer {
            address: Address::new([0, 0, 0, 0, 0, last]),
            name: None,
            rssi,
            paired: false,
        }
    }

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert_eq!(config.scan_duration, Duration::from_secs(10));
        assert!(config.include_paired);
    }

    #[test]
    fn test_sort_strongest_first() {
        let mut peers = vec![peer(1, Some(-80)), peer(2, None), peer(3, Some(-40))];
        sort_by_signal(&mut peers);
        let order: Vec<u8> = peers.iter().map(|p| p.address.0[5]).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }
}
