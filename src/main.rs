use bluer::{gatt::remote::Characteristic, Adapter, AdapterEvent, Address, Device};
use chrono::{NaiveTime, Timelike, Utc};
use clap::{Parser, Subcommand};
use futures::stream::StreamExt;
use gshock_sync::connection::{BleSupport, CharacteristicHandle, NotificationSink};
use gshock_sync::types::hex_dump;
use gshock_sync::{
    time_sync, Alarm, ConnectionConfig, ConnectionState, Delivery, EngineConfig, GShockError,
    Session, TimeAdjustment, Timer, Topic, WatchModel,
};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

type BoxError = Box<dyn std::error::Error>;

/// Prefix every Casio watch advertises in its device name
const CASIO_NAME_PREFIX: &str = "CASIO";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "gshock-sync")]
#[command(about = "Read and configure Casio G-Shock watches over Bluetooth LE")]
struct Args {
    /// Bluetooth MAC address of the watch (format: AA:BB:CC:DD:EE:FF).
    /// Scans for the first Casio watch when omitted.
    #[arg(long, value_name = "MAC_ADDRESS")]
    address: Option<String>,

    /// Seconds to wait for each watch response (0 waits until the link drops)
    #[arg(long, default_value = "10")]
    request_timeout: u64,

    /// Seconds to scan for a watch before giving up
    #[arg(long, default_value = "60")]
    scan_timeout: u64,

    /// Connection attempts before giving up
    #[arg(long, default_value = "5")]
    reconnect_attempts: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the watch name, model, capabilities and the button that was pressed
    Info,
    /// Show the battery level
    Battery,
    /// List alarms
    Alarms,
    /// Change one alarm (1 based)
    SetAlarm {
        index: usize,
        /// Alarm time as HH:MM
        time: String,
        #[arg(long)]
        off: bool,
        #[arg(long)]
        hourly_chime: bool,
    },
    /// Show the basic settings
    Settings,
    /// List reminders
    Reminders,
    /// Erase every reminder
    ClearReminders,
    /// List the world cities
    WorldCities,
    /// Show the countdown timer
    Timer,
    /// Set the countdown timer
    SetTimer { seconds: u32 },
    /// Show the automatic time adjustment
    TimeAdjustment,
    /// Configure automatic time adjustment
    SetTimeAdjustment {
        /// Minute past the hour the watch connects to adjust its time
        minute: u8,
        #[arg(long)]
        disable: bool,
    },
    /// Set the watch clock from this computer
    SetTime {
        /// IANA zone to use as home time, e.g. Europe/Paris
        #[arg(long)]
        zone: Option<String>,
    },
    /// Change the home city without touching the clock
    HomeTime { zone: String },
    /// Print every notification until the link drops
    Monitor,
}

// ============================================================================
// Real Bluetooth Implementation using BlueR
// ============================================================================

struct BlueRSupport {
    device: Device,
    characteristics: Mutex<HashMap<String, Characteristic>>,
    listener_shutdown: Mutex<Option<mpsc::Sender<()>>>,
}

impl BlueRSupport {
    async fn new(device: Device) -> Result<Self, BoxError> {
        info!("Connecting to {}", device.address());
        if !device.is_connected().await? {
            device.connect().await?;
            info!("Connected");
        } else {
            info!("Already connected");
        }

        Ok(Self {
            device,
            characteristics: Mutex::new(HashMap::new()),
            listener_shutdown: Mutex::new(None),
        })
    }

    async fn discover_services(&self, resolve_timeout: Duration) -> Result<(), BoxError> {
        debug!("Waiting for GATT services to be resolved");
        let resolved = tokio::time::timeout(resolve_timeout, async {
            loop {
                match self.device.is_services_resolved().await {
                    Ok(true) => return Ok(()),
                    Ok(false) => sleep(Duration::from_millis(500)).await,
                    Err(e) => return Err(e),
                }
            }
        })
        .await;
        match resolved {
            Ok(result) => result?,
            Err(_) => return Err("Timeout waiting for GATT services to be resolved".into()),
        }

        let mut found = HashMap::new();
        for service in self.device.services().await? {
            for characteristic in service.characteristics().await? {
                let uuid = characteristic.uuid().await?.to_string().to_uppercase();
                found.insert(uuid, characteristic);
            }
        }
        info!("Found {} characteristics", found.len());
        *self.lock_characteristics() = found;
        Ok(())
    }

    async fn name(&self) -> String {
        match self.device.name().await {
            Ok(Some(name)) => name,
            Ok(None) => String::new(),
            Err(e) => {
                warn!("Could not read device name: {}", e);
                String::new()
            }
        }
    }

    fn lock_characteristics(&self) -> std::sync::MutexGuard<'_, HashMap<String, Characteristic>> {
        self.characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_listener(&self) {
        let tx = self
            .listener_shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.try_send(());
            debug!("Sent shutdown signal to listener");
        }
    }
}

#[async_trait::async_trait]
impl BleSupport for BlueRSupport {
    fn get_characteristic(&self, uuid: &str) -> Option<CharacteristicHandle> {
        let uuid_upper = uuid.to_uppercase();
        self.lock_characteristics()
            .contains_key(&uuid_upper)
            .then(|| CharacteristicHandle::new(uuid_upper))
    }

    async fn enable_notifications(
        &self,
        handle: &CharacteristicHandle,
        sink: Arc<dyn NotificationSink>,
    ) -> gshock_sync::Result<()> {
        let characteristic = self
            .lock_characteristics()
            .get(&handle.uuid)
            .cloned()
            .ok_or_else(|| {
                GShockError::BluetoothError(format!("Characteristic {} not found", handle.uuid))
            })?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self
            .listener_shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(shutdown_tx);

        let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<(), String>>();

        tokio::spawn(async move {
            let stream = match characteristic.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));
            let mut stream = Box::pin(stream);

            loop {
                tokio::select! {
                    value = stream.next() => match value {
                        Some(value) => sink.on_notification(&value),
                        None => {
                            warn!("Notification stream ended");
                            sink.on_link_lost();
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => {
                        debug!("Listener shutdown requested");
                        break;
                    }
                }
            }
        });

        match tokio::time::timeout(Duration::from_secs(5), ready_rx).await {
            Ok(Ok(Ok(()))) => {
                info!("Notification stream active");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(GShockError::BluetoothError(format!(
                "Failed to start notification stream: {}",
                e
            ))),
            Ok(Err(_)) => Err(GShockError::BluetoothError(
                "Listener closed unexpectedly".to_string(),
            )),
            Err(_) => Err(GShockError::BluetoothError(
                "Timeout waiting for listener to become active".to_string(),
            )),
        }
    }

    async fn write_characteristic(
        &self,
        handle: &CharacteristicHandle,
        data: &[u8],
    ) -> gshock_sync::Result<()> {
        let characteristic = self.lock_characteristics().get(&handle.uuid).cloned();

        let Some(characteristic) = characteristic else {
            return Err(GShockError::BluetoothError(format!(
                "Characteristic {} not found",
                handle.uuid
            )));
        };
        characteristic
            .write(data)
            .await
            .map_err(|e| GShockError::BluetoothError(format!("Failed to write: {}", e)))
    }

    async fn disconnect(&self) -> gshock_sync::Result<()> {
        self.stop_listener();
        self.device
            .disconnect()
            .await
            .map_err(|e| GShockError::BluetoothError(format!("Failed to disconnect: {}", e)))
    }
}

/// Scan until a device whose name starts with the Casio prefix shows up
async fn scan_for_watch(adapter: &Adapter, scan_timeout: Duration) -> Result<Device, BoxError> {
    info!("Scanning for a Casio watch (press the connect button on the watch)");
    let mut events = Box::pin(adapter.discover_devices().await?);

    let found = tokio::time::timeout(scan_timeout, async {
        while let Some(event) = events.next().await {
            if let AdapterEvent::DeviceAdded(address) = event {
                let device = adapter.device(address)?;
                let name = device.name().await?.unwrap_or_default();
                debug!("Discovered {} {}", address, name);
                if name.starts_with(CASIO_NAME_PREFIX) {
                    info!("Found {} at {}", name, address);
                    return Ok(Some(device));
                }
            }
        }
        Ok::<_, bluer::Error>(None)
    })
    .await;

    match found {
        Ok(Ok(Some(device))) => Ok(device),
        Ok(Ok(None)) => Err("Discovery stopped before a watch was found".into()),
        Ok(Err(e)) => Err(Box::new(e)),
        Err(_) => Err("No Casio watch found".into()),
    }
}

/// Find the watch, connect and resolve its characteristics
async fn connect_to_watch(
    adapter: &Adapter,
    config: &ConnectionConfig,
    scan_timeout: Duration,
) -> Result<Arc<BlueRSupport>, BoxError> {
    let device = match &config.device_address {
        Some(address) => {
            let address: Address = address
                .parse()
                .map_err(|_| format!("Invalid MAC address: {}", address))?;
            adapter.device(address)?
        }
        None => scan_for_watch(adapter, scan_timeout).await?,
    };

    let ble = BlueRSupport::new(device).await?;
    ble.discover_services(config.services_resolve_timeout).await?;
    Ok(Arc::new(ble))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), BoxError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_alarm_time(text: &str) -> Result<(u8, u8), BoxError> {
    let time = NaiveTime::parse_from_str(text, "%H:%M")
        .map_err(|e| format!("Invalid alarm time {}: {}", text, e))?;
    Ok((time.hour() as u8, time.minute() as u8))
}

fn print_delivery(delivery: &Delivery) {
    let value = match &delivery.value {
        Ok(value) => serde_json::to_string(value).unwrap_or_else(|e| e.to_string()),
        Err(e) => format!("error: {}", e),
    };
    println!("{} {} [{}] {}", delivery.topic, delivery.key, hex_dump(&delivery.raw), value);
}

async fn monitor(session: &Session) -> Result<(), BoxError> {
    let topics = Topic::DATA
        .into_iter()
        .chain([Topic::HomeTime, Topic::Error, Topic::UnknownCommand]);
    for topic in topics {
        session.subscribe(topic, "monitor", Arc::new(print_delivery));
    }

    let mut state = session.connection().subscribe_state();
    info!("Monitoring notifications, press Ctrl-C to stop");
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == ConnectionState::Disconnected {
                    info!("Link closed");
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn run_command(session: &Session, command: &Command) -> Result<(), BoxError> {
    match command {
        Command::Info => {
            let name = session.get_watch_name().await?;
            let button = session.get_pressed_button().await?;
            let battery = if session.info().has_battery_level {
                Some(session.get_battery_level().await?)
            } else {
                None
            };
            print_json(&serde_json::json!({
                "name": name,
                "model": session.model(),
                "capabilities": session.info(),
                "button": button,
                "battery": battery,
            }))
        }
        Command::Battery => print_json(&session.get_battery_level().await?),
        Command::Alarms => print_json(&session.get_alarms().await?),
        Command::SetAlarm {
            index,
            time,
            off,
            hourly_chime,
        } => {
            let (hour, minute) = parse_alarm_time(time)?;
            let mut alarms = session.get_alarms().await?;
            let slot = index
                .checked_sub(1)
                .and_then(|i| alarms.get_mut(i))
                .ok_or_else(|| format!("Alarm {} does not exist", index))?;
            *slot = Alarm::new(hour, minute, !off, *hourly_chime);
            session.set_alarms(&alarms).await?;
            print_json(&alarms)
        }
        Command::Settings => print_json(&session.get_settings().await?),
        Command::Reminders => print_json(&session.get_reminders().await?),
        Command::ClearReminders => Ok(session.clear_reminders().await?),
        Command::WorldCities => {
            let mut cities = Vec::new();
            for index in 0..session.info().world_cities_count {
                cities.push(session.get_world_city(index).await?);
            }
            print_json(&cities)
        }
        Command::Timer => print_json(&session.get_timer().await?),
        Command::SetTimer { seconds } => Ok(session.set_timer(&Timer::new(*seconds)).await?),
        Command::TimeAdjustment => print_json(&session.get_time_adjustment().await?),
        Command::SetTimeAdjustment { minute, disable } => Ok(session
            .set_time_adjustment(&TimeAdjustment {
                enabled: !disable,
                adjustment_minutes: *minute,
            })
            .await?),
        Command::SetTime { zone } => {
            let now = Utc::now();
            let local = time_sync::local_now(zone.as_deref(), now)?;
            time_sync::set_time(session, local, zone.as_deref(), now).await?;
            println!("Watch time set to {}", local.format("%Y-%m-%d %H:%M:%S"));
            Ok(())
        }
        Command::HomeTime { zone } => {
            if time_sync::update_home_time(session, zone, Utc::now()).await? {
                println!("Home time changed to {}", session.get_home_time().await?);
            } else {
                println!("Home time unchanged");
            }
            Ok(())
        }
        Command::Monitor => monitor(session).await,
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ConnectionConfig {
        device_address: args.address.clone(),
        reconnect_attempts: args.reconnect_attempts.max(1),
        ..ConnectionConfig::default()
    };
    let engine_config = EngineConfig {
        request_timeout: (args.request_timeout > 0)
            .then(|| Duration::from_secs(args.request_timeout)),
    };

    let bt_session = bluer::Session::new().await?;
    let adapter = bt_session.default_adapter().await?;
    debug!("Using adapter: {}", adapter.name());
    if !adapter.is_powered().await? {
        info!("Powering on Bluetooth adapter");
        adapter.set_powered(true).await?;
    }

    let scan_timeout = Duration::from_secs(args.scan_timeout);
    let mut attempt = 0;
    let ble = loop {
        match connect_to_watch(&adapter, &config, scan_timeout).await {
            Ok(ble) => break ble,
            Err(e) => {
                attempt += 1;
                if attempt >= config.reconnect_attempts {
                    error!("Giving up after {} connection attempts", attempt);
                    return Err(e);
                }
                let delay = config.backoff_for_attempt(attempt - 1);
                warn!("Connection attempt {} failed: {}, retrying in {:?}", attempt, e, delay);
                sleep(delay).await;
            }
        }
    };

    let model = WatchModel::from_device_name(&ble.name().await);
    let session = Session::new(ble, model, engine_config, &config);
    session.connect().await?;

    let result = run_command(&session, &args.command).await;
    if session.connection().is_connected() {
        if let Err(e) = session.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
    }
    result
}
