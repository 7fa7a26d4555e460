//! BLE transport and connection state machine
//!
//! The rest of the crate sees the watch through two operations only:
//! [`Connection::write_command`] and the [`NotificationSink`] that receives
//! every notification. The platform side is behind [`BleSupport`].

use crate::config::ConnectionConfig;
use crate::types::{hex_dump, GShockError, Result};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;

/// Casio watch features service
pub const WATCH_FEATURES_SERVICE_UUID: &str = "26EB000D-B012-49A8-B1F8-394FB2032B0F";

/// Characteristic used to ask the watch to send a record
pub const READ_REQUEST_CHARACTERISTIC_UUID: &str = "26EB002C-B012-49A8-B1F8-394FB2032B0F";

/// Characteristic that accepts full records and notifies every response
pub const ALL_FEATURES_CHARACTERISTIC_UUID: &str = "26EB002D-B012-49A8-B1F8-394FB2032B0F";

/// Trait for BLE operations that must be implemented by the platform
#[async_trait::async_trait]
pub trait BleSupport: Send + Sync {
    /// Get a characteristic by UUID
    fn get_characteristic(&self, uuid: &str) -> Option<CharacteristicHandle>;

    /// Enable notifications on a characteristic and feed them to `sink`
    ///
    /// The implementation calls [`NotificationSink::on_link_lost`] when the
    /// notification stream ends.
    async fn enable_notifications(
        &self,
        handle: &CharacteristicHandle,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<()>;

    /// Write data to a characteristic
    async fn write_characteristic(&self, handle: &CharacteristicHandle, data: &[u8]) -> Result<()>;

    /// Close the link
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

/// Receiver of everything the watch sends
pub trait NotificationSink: Send + Sync {
    fn on_notification(&self, data: &[u8]);

    /// Called once the link is gone
    fn on_link_lost(&self) {}
}

/// Handle to a BLE characteristic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub uuid: String,
}

impl CharacteristicHandle {
    pub fn new(uuid: String) -> Self {
        Self { uuid }
    }
}

/// The two write targets on the watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicTarget {
    /// Ask the watch to notify a record
    ReadRequest,
    /// Push a full record
    AllFeatures,
}

impl CharacteristicTarget {
    pub fn uuid(self) -> &'static str {
        match self {
            CharacteristicTarget::ReadRequest => READ_REQUEST_CHARACTERISTIC_UUID,
            CharacteristicTarget::AllFeatures => ALL_FEATURES_CHARACTERISTIC_UUID,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Events that drive the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    DeviceFound,
    ServicesResolved,
    DisconnectRequested,
    LinkDropped,
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::DeviceFound => write!(f, "Device Found"),
            LinkEvent::ServicesResolved => write!(f, "Services Resolved"),
            LinkEvent::DisconnectRequested => write!(f, "Disconnect Requested"),
            LinkEvent::LinkDropped => write!(f, "Link Dropped"),
        }
    }
}

impl ConnectionState {
    /// Next state after `event`, or an error for transitions that make no sense
    pub fn on_event(self, event: LinkEvent) -> Result<ConnectionState> {
        use ConnectionState::*;
        use LinkEvent::*;

        match (self, event) {
            (Disconnected, DeviceFound) => Ok(Connecting),
            (Connecting, ServicesResolved) => Ok(Connected),
            (Connecting | Connected, DisconnectRequested) => Ok(Disconnecting),
            (Connecting | Connected | Disconnecting, LinkDropped) => Ok(Disconnected),
            (state, event) => Err(GShockError::InvalidState {
                state: state.to_string(),
                event: event.to_string(),
            }),
        }
    }
}

struct Characteristics {
    read_request: CharacteristicHandle,
    all_features: CharacteristicHandle,
}

/// Owns the link to one watch
pub struct Connection {
    ble: Arc<dyn BleSupport>,
    sink: Arc<dyn NotificationSink>,
    state: Mutex<ConnectionState>,
    state_tx: watch::Sender<ConnectionState>,
    characteristics: Mutex<Option<Characteristics>>,
    max_write_size: AtomicUsize,
}

/// Forwards stream events from the platform back into the connection
struct LinkForwarder(Weak<Connection>);

impl NotificationSink for LinkForwarder {
    fn on_notification(&self, data: &[u8]) {
        if let Some(connection) = self.0.upgrade() {
            connection.on_notification(data);
        }
    }

    fn on_link_lost(&self) {
        if let Some(connection) = self.0.upgrade() {
            connection.on_link_lost();
        }
    }
}

impl Connection {
    pub fn new(
        ble: Arc<dyn BleSupport>,
        sink: Arc<dyn NotificationSink>,
        config: &ConnectionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            ble,
            sink,
            state: Mutex::new(ConnectionState::Disconnected),
            state_tx,
            characteristics: Mutex::new(None),
            max_write_size: AtomicUsize::new(config.max_write_size),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch channel that follows every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Apply a lifecycle event
    pub fn handle_event(&self, event: LinkEvent) -> Result<ConnectionState> {
        let mut state = self.lock_state();
        let next = state.on_event(event)?;
        debug!("Connection {} -> {} ({})", *state, next, event);
        *state = next;
        drop(state);
        self.state_tx.send_replace(next);
        Ok(next)
    }

    /// Resolve the Casio characteristics and enable notifications
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        self.handle_event(LinkEvent::DeviceFound)?;
        info!("Connecting to watch");

        match self.setup().await {
            Ok(()) => {
                self.handle_event(LinkEvent::ServicesResolved)?;
                info!("Watch connected");
                Ok(())
            }
            Err(e) => {
                error!("Connection setup failed: {}", e);
                *self
                    .characteristics
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = None;
                self.handle_event(LinkEvent::LinkDropped)?;
                Err(e)
            }
        }
    }

    async fn setup(self: &Arc<Self>) -> Result<()> {
        let find = |uuid: &str| {
            self.ble.get_characteristic(uuid).ok_or_else(|| {
                GShockError::BluetoothError(format!("Characteristic {} not found", uuid))
            })
        };
        let read_request = find(READ_REQUEST_CHARACTERISTIC_UUID)?;
        let all_features = find(ALL_FEATURES_CHARACTERISTIC_UUID)?;
        debug!(
            "Using characteristics request/all features = {}/{}",
            read_request.uuid, all_features.uuid
        );

        let forwarder: Arc<dyn NotificationSink> = Arc::new(LinkForwarder(Arc::downgrade(self)));
        self.ble
            .enable_notifications(&all_features, forwarder)
            .await?;

        *self
            .characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Characteristics {
            read_request,
            all_features,
        });
        Ok(())
    }

    /// Write a command to one of the two targets
    ///
    /// Completes once the platform accepted the write; the watch's answer
    /// arrives later as a notification.
    pub async fn write_command(&self, target: CharacteristicTarget, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(GShockError::EmptyMessage);
        }
        if !self.is_connected() {
            return Err(GShockError::NotConnected);
        }
        let max = self.max_write_size.load(Ordering::Relaxed);
        if data.len() > max {
            return Err(GShockError::EncodingError(format!(
                "{} bytes exceeds the {} byte write limit",
                data.len(),
                max
            )));
        }

        let handle = {
            let chars = self
                .characteristics
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let chars = chars.as_ref().ok_or(GShockError::NotConnected)?;
            match target {
                CharacteristicTarget::ReadRequest => chars.read_request.clone(),
                CharacteristicTarget::AllFeatures => chars.all_features.clone(),
            }
        };

        debug!("BLE WRITE {:?}: {}", target, hex_dump(data));
        self.ble
            .write_characteristic(&handle, data)
            .await
            .inspect_err(|e| error!("BLE write failed: {}", e))
    }

    /// Hand one notification to the sink
    pub fn on_notification(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        debug!("BLE NOTIFY: {}", hex_dump(data));
        self.sink.on_notification(data);
    }

    /// The link dropped without being asked to
    pub fn on_link_lost(&self) {
        match self.handle_event(LinkEvent::LinkDropped) {
            Ok(_) => warn!("Link to watch lost"),
            Err(e) => debug!("Ignoring link loss: {}", e),
        }
        *self
            .characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.sink.on_link_lost();
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.handle_event(LinkEvent::DisconnectRequested)?;
        info!("Disconnecting from watch");
        let result = self.ble.disconnect().await;
        self.on_link_lost();
        result
    }

    /// Update the write limit after an MTU change
    pub fn on_mtu_changed(&self, mtu: usize) {
        // ATT header takes 3 bytes
        let size = mtu.saturating_sub(3);
        self.max_write_size.store(size, Ordering::Relaxed);
        info!("MTU changed to {}, max write size: {}", mtu, size);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockBleSupport;
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<Vec<u8>>>,
        link_lost: Mutex<u32>,
    }

    impl NotificationSink for RecordingSink {
        fn on_notification(&self, data: &[u8]) {
            self.received.lock().unwrap().push(data.to_vec());
        }

        fn on_link_lost(&self) {
            *self.link_lost.lock().unwrap() += 1;
        }
    }

    fn setup() -> (Arc<MockBleSupport>, Arc<RecordingSink>, Arc<Connection>) {
        let ble = Arc::new(MockBleSupport::new());
        let sink = Arc::new(RecordingSink::default());
        let connection = Arc::new(Connection::new(
            ble.clone(),
            sink.clone(),
            &ConnectionConfig::default(),
        ));
        (ble, sink, connection)
    }

    #[test]
    fn test_state_transitions() {
        use ConnectionState::*;
        use LinkEvent::*;

        assert_eq!(Disconnected.on_event(DeviceFound).unwrap(), Connecting);
        assert_eq!(Connecting.on_event(ServicesResolved).unwrap(), Connected);
        assert_eq!(Connected.on_event(DisconnectRequested).unwrap(), Disconnecting);
        assert_eq!(Disconnecting.on_event(LinkDropped).unwrap(), Disconnected);
        assert_eq!(Connected.on_event(LinkDropped).unwrap(), Disconnected);
        assert_eq!(Connecting.on_event(LinkDropped).unwrap(), Disconnected);
    }

    #[test]
    fn test_invalid_transitions() {
        use ConnectionState::*;
        use LinkEvent::*;

        assert!(Disconnected.on_event(ServicesResolved).is_err());
        assert!(Disconnected.on_event(LinkDropped).is_err());
        assert!(Connected.on_event(DeviceFound).is_err());
        assert!(matches!(
            Disconnecting.on_event(ServicesResolved),
            Err(GShockError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_and_write() {
        let (ble, _sink, connection) = setup();
        let mut states = connection.subscribe_state();

        connection.connect().await.unwrap();
        assert!(connection.is_connected());
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

        connection
            .write_command(CharacteristicTarget::ReadRequest, &[0x28])
            .await
            .unwrap();
        connection
            .write_command(CharacteristicTarget::AllFeatures, &[0x18, 0, 1, 0, 0, 0, 0])
            .await
            .unwrap();

        let written = ble.get_written_data();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].0, READ_REQUEST_CHARACTERISTIC_UUID);
        assert_eq!(written[0].1, vec![0x28]);
        assert_eq!(written[1].0, ALL_FEATURES_CHARACTERISTIC_UUID);
    }

    #[tokio::test]
    async fn test_write_requires_connection() {
        let (_ble, _sink, connection) = setup();
        assert_eq!(
            connection
                .write_command(CharacteristicTarget::ReadRequest, &[0x28])
                .await,
            Err(GShockError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_missing_characteristics() {
        let ble = Arc::new(MockBleSupport::without_characteristics());
        let sink = Arc::new(RecordingSink::default());
        let connection = Arc::new(Connection::new(ble, sink, &ConnectionConfig::default()));

        assert!(matches!(
            connection.connect().await,
            Err(GShockError::BluetoothError(_))
        ));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_notifications_reach_sink() {
        let (ble, sink, connection) = setup();
        connection.connect().await.unwrap();

        ble.notify(&[0x28, 0x13, 0x1E, 0x00]);
        ble.notify(&[]);
        assert_eq!(
            *sink.received.lock().unwrap(),
            vec![vec![0x28, 0x13, 0x1E, 0x00]]
        );
    }

    #[tokio::test]
    async fn test_link_loss() {
        let (ble, sink, connection) = setup();
        connection.connect().await.unwrap();

        ble.drop_link();
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(*sink.link_lost.lock().unwrap(), 1);
        assert_eq!(
            connection
                .write_command(CharacteristicTarget::ReadRequest, &[0x28])
                .await,
            Err(GShockError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_disconnect() {
        let (_ble, sink, connection) = setup();
        connection.connect().await.unwrap();
        connection.disconnect().await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(*sink.link_lost.lock().unwrap(), 1);
        assert!(connection.disconnect().await.is_err());
    }

    #[tokio::test]
    async fn test_write_size_limit() {
        let (_ble, _sink, connection) = setup();
        connection.connect().await.unwrap();
        let big = vec![0x30; 21];
        assert!(matches!(
            connection
                .write_command(CharacteristicTarget::AllFeatures, &big)
                .await,
            Err(GShockError::EncodingError(_))
        ));

        connection.on_mtu_changed(185);
        connection
            .write_command(CharacteristicTarget::AllFeatures, &big)
            .await
            .unwrap();
    }
}
