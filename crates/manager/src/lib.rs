//! Security-key device manager
//!
//! Tracks every attached token in a registry keyed by device identity,
//! wraps each one in a [`SharedTransport`] and publishes discovery and
//! loss over a channel. Platform code performs the actual USB/NFC
//! discovery and permission handling, then hands opened devices to the
//! `attach_*` methods here.
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod monitor;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};
use thiserror::Error as ThisError;
use tracing::{debug, info};

use keyfob_core::{CardTransport, Clock, SharedTransport, SystemClock};
use keyfob_transport_nfc::{IsoDepTag, NfcTransport};
use keyfob_transport_usb::ccid::transceiver::CcidConfig;
use keyfob_transport_usb::u2f::protocol::U2fHidConfig;
use keyfob_transport_usb::{
    CcidTransport, ExchangeLevel, U2fHidTransport, UsbDeviceInfo, UsbDeviceIo,
};

pub use monitor::{MonitorConfig, MonitorHandle};

/// Errors from attach operations
#[derive(Debug, ThisError)]
pub enum Error {
    /// The transport could not be brought up
    #[error(transparent)]
    Core(#[from] keyfob_core::Error),
}

/// Result type for manager operations
pub type Result<T> = core::result::Result<T, Error>;

/// Stable identity of an attached security key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceId {
    /// USB device, `vid:pid:serial`
    Usb(String),
    /// NFC tag anticollision UID
    NfcTag(Vec<u8>),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb(id) => write!(f, "usb:{}", id),
            Self::NfcTag(uid) => write!(f, "nfc:{}", hex::encode(uid)),
        }
    }
}

/// Lifecycle events published by the manager
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A new token was attached; the transport is ready for use
    Discovered {
        /// Identity of the token
        id: DeviceId,
        /// Shared handle to its transport
        transport: SharedTransport,
    },
    /// A token went away; its transport has been released
    Lost {
        /// Identity of the token
        id: DeviceId,
    },
}

struct ManagedToken {
    transport: SharedTransport,
    monitor: Option<MonitorHandle>,
}

/// Registry of live security keys
pub struct DeviceManager {
    registry: Arc<Mutex<HashMap<DeviceId, ManagedToken>>>,
    events_tx: Sender<TransportEvent>,
    events_rx: Receiver<TransportEvent>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.registry.lock().map(|r| r.len()).unwrap_or(0);
        f.debug_struct("DeviceManager")
            .field("managed_tokens", &count)
            .finish()
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceManager {
    /// Create a manager using the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a manager with an explicit clock (tests)
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            events_rx,
            clock,
        }
    }

    /// The event stream; clones share one queue
    pub fn events(&self) -> Receiver<TransportEvent> {
        self.events_rx.clone()
    }

    /// Attach an opened CCID reader interface
    pub fn attach_usb_ccid<D: UsbDeviceIo + 'static>(
        &self,
        device: D,
        info: UsbDeviceInfo,
        exchange_level: ExchangeLevel,
    ) -> Result<()> {
        let id = DeviceId::Usb(info.identifier());
        if self.is_managed(&id) {
            debug!(%id, "device already managed, ignoring");
            return Ok(());
        }
        let transport =
            CcidTransport::connect(device, info, exchange_level, CcidConfig::default())?;
        self.insert(id, SharedTransport::new(transport), None);
        Ok(())
    }

    /// Attach an opened U2F HID interface
    pub fn attach_usb_u2f<D: UsbDeviceIo + 'static>(
        &self,
        device: D,
        info: UsbDeviceInfo,
    ) -> Result<()> {
        let id = DeviceId::Usb(info.identifier());
        if self.is_managed(&id) {
            debug!(%id, "device already managed, ignoring");
            return Ok(());
        }
        let transport = U2fHidTransport::connect(device, info, U2fHidConfig::default())?;
        self.insert(id, SharedTransport::new(transport), None);
        Ok(())
    }

    /// Attach a discovered ISO-DEP tag and start its liveness monitor
    pub fn attach_nfc_tag<N: IsoDepTag + 'static>(&self, tag: N, active_monitoring: bool) {
        let id = DeviceId::NfcTag(tag.uid().to_vec());
        if self.is_managed(&id) {
            debug!(%id, "tag already managed, ignoring");
            return;
        }

        let transport = NfcTransport::new(tag, Arc::clone(&self.clock));
        let last_rx = transport.last_transceive_handle();
        let shared = SharedTransport::new(transport);

        let monitor = MonitorHandle::spawn(
            shared.clone(),
            last_rx,
            Arc::clone(&self.clock),
            MonitorConfig {
                active: active_monitoring,
                ..MonitorConfig::default()
            },
            {
                let registry = Arc::clone(&self.registry);
                let events_tx = self.events_tx.clone();
                let id = id.clone();
                move || {
                    if let Ok(mut registry) = registry.lock() {
                        registry.remove(&id);
                    }
                    info!(%id, "transport lost");
                    let _ = events_tx.send(TransportEvent::Lost { id });
                }
            },
        );

        self.insert(id, shared, Some(monitor));
    }

    /// Release a token and drop it from the registry
    pub fn detach(&self, id: &DeviceId) {
        let removed = self
            .registry
            .lock()
            .ok()
            .and_then(|mut registry| registry.remove(id));
        if let Some(mut token) = removed {
            if let Some(monitor) = token.monitor.take() {
                monitor.stop();
            }
            token.transport.release();
            let _ = self.events_tx.send(TransportEvent::Lost { id: id.clone() });
            info!(%id, "token detached");
        }
    }

    /// Release every managed token
    pub fn release_all(&self) {
        let drained: Vec<(DeviceId, ManagedToken)> = match self.registry.lock() {
            Ok(mut registry) => registry.drain().collect(),
            Err(_) => Vec::new(),
        };
        for (id, mut token) in drained {
            if let Some(monitor) = token.monitor.take() {
                monitor.stop();
            }
            token.transport.release();
            let _ = self.events_tx.send(TransportEvent::Lost { id });
        }
    }

    /// Whether a device is currently managed
    pub fn is_managed(&self, id: &DeviceId) -> bool {
        self.registry
            .lock()
            .map(|registry| registry.contains_key(id))
            .unwrap_or(false)
    }

    fn insert(&self, id: DeviceId, transport: SharedTransport, monitor: Option<MonitorHandle>) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.insert(
                id.clone(),
                ManagedToken {
                    transport: transport.clone(),
                    monitor,
                },
            );
        }
        info!(%id, "token discovered");
        // lock released before anyone can react to the event
        let _ = self.events_tx.send(TransportEvent::Discovered { id, transport });
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyfob_transport_nfc::NfcTagError;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug)]
    struct FakeTag {
        uid: Vec<u8>,
        responses: StdMutex<Vec<Vec<u8>>>,
    }

    impl IsoDepTag for FakeTag {
        fn transceive(&mut self, _data: &[u8]) -> core::result::Result<Vec<u8>, NfcTagError> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or(NfcTagError::TagLost)
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn is_extended_length_supported(&self) -> bool {
            false
        }
        fn uid(&self) -> &[u8] {
            &self.uid
        }
    }

    fn tag(uid: &[u8]) -> FakeTag {
        FakeTag {
            uid: uid.to_vec(),
            responses: StdMutex::new(vec![vec![0x90, 0x00]]),
        }
    }

    #[test]
    fn test_nfc_attach_emits_discovered() {
        let manager = DeviceManager::new();
        let events = manager.events();
        manager.attach_nfc_tag(tag(&[0x04, 0x01]), false);

        match events.try_recv().unwrap() {
            TransportEvent::Discovered { id, .. } => {
                assert_eq!(id, DeviceId::NfcTag(vec![0x04, 0x01]));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(manager.is_managed(&DeviceId::NfcTag(vec![0x04, 0x01])));
    }

    #[test]
    fn test_duplicate_attach_ignored() {
        let manager = DeviceManager::new();
        let events = manager.events();
        manager.attach_nfc_tag(tag(&[0x07]), false);
        manager.attach_nfc_tag(tag(&[0x07]), false);

        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_detach_emits_lost_and_releases() {
        let manager = DeviceManager::new();
        let events = manager.events();
        manager.attach_nfc_tag(tag(&[0x09]), false);
        let discovered = events.try_recv().unwrap();
        let TransportEvent::Discovered { id, transport } = discovered else {
            panic!("expected discovery");
        };

        manager.detach(&id);
        assert!(matches!(events.try_recv(), Ok(TransportEvent::Lost { .. })));
        assert!(!manager.is_managed(&id));
        assert!(transport.is_released());
    }
}
