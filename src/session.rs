//! Per-connection session
//!
//! A session wires the transport, the topic router and the correlation
//! engine together for one connection and exposes the typed watch API.
//! Nothing here outlives the connection: a new link gets a new session.

use crate::alarms::{self, Alarm, AlarmAccumulator};
use crate::config::{ConnectionConfig, EngineConfig};
use crate::connection::{BleSupport, CharacteristicTarget, Connection, NotificationSink};
use crate::engine::CorrelationEngine;
use crate::messages::{CorrelationKey, WatchMessage, WatchValue};
use crate::reminders::{self, Reminder, ReminderSlot, MAX_REMINDERS};
use crate::router::{SubscriberCallback, Topic, TopicRouter};
use crate::settings::{Settings, TimeAdjustment};
use crate::status;
use crate::time::Timer;
use crate::types::{CommandCode, DstRegister, GShockError, Result, WatchButton};
use crate::watch_model::{ModelInfo, WatchModel};
use crate::world_cities::{DstSetting, DstWatchState, WorldCity};
use log::{debug, info};
use std::sync::{Arc, Weak};

const ENGINE_SUBSCRIBER_ID: &str = "correlation-engine";

/// Routes transport events into the session's router and engine
struct SessionSink {
    router: Arc<TopicRouter>,
    engine: Weak<CorrelationEngine>,
}

impl NotificationSink for SessionSink {
    fn on_notification(&self, data: &[u8]) {
        self.router.dispatch(data);
    }

    fn on_link_lost(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.reset(GShockError::ConnectionLost);
        }
    }
}

fn unexpected(message: &WatchMessage) -> GShockError {
    GShockError::DecodingError(format!(
        "unexpected value for {}: {:?}",
        message.key, message.value
    ))
}

fn key(code: CommandCode) -> CorrelationKey {
    CorrelationKey::for_code(code, None)
}

fn slot_key(code: CommandCode, index: u8) -> CorrelationKey {
    CorrelationKey::for_code(code, Some(index))
}

pub struct Session {
    connection: Arc<Connection>,
    router: Arc<TopicRouter>,
    engine: Arc<CorrelationEngine>,
    model: WatchModel,
}

impl Session {
    pub fn new(
        ble: Arc<dyn BleSupport>,
        model: WatchModel,
        engine_config: EngineConfig,
        connection_config: &ConnectionConfig,
    ) -> Self {
        let router = Arc::new(TopicRouter::new());
        let engine = Arc::new(CorrelationEngine::new(engine_config));
        engine.attach(&router, ENGINE_SUBSCRIBER_ID);

        let sink = Arc::new(SessionSink {
            router: Arc::clone(&router),
            engine: Arc::downgrade(&engine),
        });
        let connection = Arc::new(Connection::new(ble, sink, connection_config));

        Self {
            connection,
            router,
            engine,
            model,
        }
    }

    /// Open the link with an empty cache
    pub async fn connect(&self) -> Result<()> {
        info!("Starting session for {}", self.model);
        self.engine.init();
        self.connection.connect().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }

    pub fn model(&self) -> WatchModel {
        self.model
    }

    pub fn info(&self) -> ModelInfo {
        self.model.info()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn engine(&self) -> &Arc<CorrelationEngine> {
        &self.engine
    }

    /// Subscribe to decoded notifications of one topic
    pub fn subscribe(
        &self,
        topic: Topic,
        subscriber_id: impl Into<String>,
        callback: SubscriberCallback,
    ) -> bool {
        self.router.subscribe(topic, subscriber_id, callback)
    }

    /// Read one record, from the cache when possible
    pub async fn request(&self, key: &CorrelationKey) -> Result<WatchMessage> {
        let connection = Arc::clone(&self.connection);
        self.engine
            .request(key, |key| async move {
                let bytes = key.request_bytes()?;
                connection
                    .write_command(CharacteristicTarget::ReadRequest, &bytes)
                    .await
            })
            .await
    }

    /// Write a record that replaces the value of `key`
    pub async fn set_record(&self, key: &CorrelationKey, data: &[u8]) -> Result<()> {
        self.engine
            .set(
                key,
                self.connection
                    .write_command(CharacteristicTarget::AllFeatures, data),
            )
            .await
    }

    /// Write a record without touching the cache
    pub async fn write_record(&self, data: &[u8]) -> Result<()> {
        self.connection
            .write_command(CharacteristicTarget::AllFeatures, data)
            .await
    }

    pub fn clear_cache(&self) {
        self.engine.clear_cache();
    }

    pub async fn get_alarms(&self) -> Result<Vec<Alarm>> {
        let (first_key, rest_key) = (
            key(CommandCode::SettingForAlarm),
            key(CommandCode::SettingForAlarm2),
        );
        let (first, rest) = tokio::try_join!(self.request(&first_key), self.request(&rest_key))?;
        let mut acc = AlarmAccumulator::new(usize::from(self.info().alarm_count));
        acc.push(&first.raw)?;
        acc.push(&rest.raw)?;
        acc.finish()
    }

    pub async fn set_alarms(&self, alarms: &[Alarm]) -> Result<()> {
        let count = usize::from(self.info().alarm_count);
        let (first, rest) = alarms::encode(&alarms[..alarms.len().min(count)])?;
        self.set_record(&key(CommandCode::SettingForAlarm), &first)
            .await?;
        self.set_record(&key(CommandCode::SettingForAlarm2), &rest)
            .await?;
        info!("Wrote {} alarms", alarms.len().min(count));
        Ok(())
    }

    pub async fn get_settings(&self) -> Result<Settings> {
        let message = self.request(&key(CommandCode::SettingForBasic)).await?;
        match message.value {
            WatchValue::Settings(settings) => Ok(settings),
            _ => Err(unexpected(&message)),
        }
    }

    pub async fn set_settings(&self, settings: &Settings) -> Result<()> {
        self.set_record(&key(CommandCode::SettingForBasic), &settings.encode())
            .await
    }

    pub async fn get_time_adjustment(&self) -> Result<TimeAdjustment> {
        let message = self.request(&key(CommandCode::SettingForBle)).await?;
        match message.value {
            WatchValue::TimeAdjustment(adjustment) => Ok(adjustment),
            _ => Err(unexpected(&message)),
        }
    }

    /// Patch the last time adjustment record the watch reported
    pub async fn set_time_adjustment(&self, adjustment: &TimeAdjustment) -> Result<()> {
        let key = key(CommandCode::SettingForBle);
        let current = self.request(&key).await?;
        let record = adjustment.encode(&current.raw)?;
        self.set_record(&key, &record).await
    }

    pub async fn get_timer(&self) -> Result<Timer> {
        let message = self.request(&key(CommandCode::Timer)).await?;
        match message.value {
            WatchValue::Timer(timer) => Ok(timer),
            _ => Err(unexpected(&message)),
        }
    }

    pub async fn set_timer(&self, timer: &Timer) -> Result<()> {
        self.set_record(&key(CommandCode::Timer), &timer.encode()?)
            .await
    }

    fn require_reminders(&self) -> Result<()> {
        if self.info().has_reminders {
            Ok(())
        } else {
            Err(GShockError::Unsupported("reminders"))
        }
    }

    /// Read reminder slots until the watch reports the end of the list
    pub async fn get_reminders(&self) -> Result<Vec<Reminder>> {
        self.require_reminders()?;
        let mut out = Vec::new();
        for index in 1..=MAX_REMINDERS as u8 {
            let title_key = slot_key(CommandCode::ReminderTitle, index);
            let time_key = slot_key(CommandCode::ReminderTime, index);
            let (title, time) =
                tokio::try_join!(self.request(&title_key), self.request(&time_key))?;
            let title = match title.value {
                WatchValue::ReminderTitle(slot) => slot,
                _ => return Err(unexpected(&title)),
            };
            let time = match time.value {
                WatchValue::ReminderTime(slot) => slot,
                _ => return Err(unexpected(&time)),
            };
            match reminders::join(title, time)? {
                ReminderSlot::Entry { value, .. } => out.push(value),
                ReminderSlot::End { index } => {
                    debug!("Reminder list ends at slot {}", index);
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Write all reminder slots: enabled first, padded with empty reminders
    pub async fn set_reminders(&self, list: &[Reminder]) -> Result<()> {
        self.require_reminders()?;
        for (i, reminder) in reminders::arrange_for_watch(list).iter().enumerate() {
            let index = i as u8 + 1;
            self.set_record(
                &slot_key(CommandCode::ReminderTitle, index),
                &reminders::encode_title(index, &reminder.title),
            )
            .await?;
            self.set_record(
                &slot_key(CommandCode::ReminderTime, index),
                &reminders::encode_time(index, &reminder.time)?,
            )
            .await?;
        }
        Ok(())
    }

    pub async fn clear_reminders(&self) -> Result<()> {
        self.require_reminders()?;
        for index in 1..=MAX_REMINDERS as u8 {
            let (title, time) = reminders::encode_clear(index);
            self.set_record(&slot_key(CommandCode::ReminderTitle, index), &title)
                .await?;
            self.set_record(&slot_key(CommandCode::ReminderTime, index), &time)
                .await?;
        }
        info!("Cleared all reminders");
        Ok(())
    }

    pub async fn get_world_city(&self, index: u8) -> Result<WorldCity> {
        let message = self
            .request(&slot_key(CommandCode::WorldCities, index))
            .await?;
        match message.value {
            WatchValue::WorldCity(city) => Ok(city),
            _ => Err(unexpected(&message)),
        }
    }

    pub async fn set_world_city(&self, city: &WorldCity) -> Result<()> {
        self.set_record(&slot_key(CommandCode::WorldCities, city.index), &city.encode())
            .await
    }

    /// Name of the home city (world city slot 0)
    pub async fn get_home_time(&self) -> Result<String> {
        Ok(self.get_world_city(0).await?.city)
    }

    pub async fn get_dst_setting(&self, index: u8) -> Result<DstSetting> {
        let message = self
            .request(&slot_key(CommandCode::DstSetting, index))
            .await?;
        match message.value {
            WatchValue::DstSetting(setting) => Ok(setting),
            _ => Err(unexpected(&message)),
        }
    }

    pub async fn get_dst_watch_state(&self, register: DstRegister) -> Result<DstWatchState> {
        let message = self
            .request(&slot_key(CommandCode::DstWatchState, register.to_u8()))
            .await?;
        match message.value {
            WatchValue::DstWatchState(state) => Ok(state),
            _ => Err(unexpected(&message)),
        }
    }

    pub async fn get_battery_level(&self) -> Result<u8> {
        if !self.info().has_battery_level {
            return Err(GShockError::Unsupported("battery level"));
        }
        let message = self.request(&key(CommandCode::WatchCondition)).await?;
        match message.value {
            WatchValue::Battery(level) => Ok(level),
            _ => Err(unexpected(&message)),
        }
    }

    pub async fn get_watch_name(&self) -> Result<String> {
        let message = self.request(&key(CommandCode::WatchName)).await?;
        match message.value {
            WatchValue::WatchName(name) => Ok(name),
            _ => Err(unexpected(&message)),
        }
    }

    /// Read the app information, restoring it if the watch was reset
    pub async fn get_app_info(&self) -> Result<Vec<u8>> {
        let key = key(CommandCode::AppInformation);
        let message = self.request(&key).await?;
        if let Some(record) = status::app_info_reply(&message.raw) {
            self.set_record(&key, record).await?;
        }
        Ok(message.raw)
    }

    /// Button that started this connection
    pub async fn get_pressed_button(&self) -> Result<WatchButton> {
        let message = self.request(&key(CommandCode::BleFeatures)).await?;
        match message.value {
            WatchValue::Button(button) => Ok(button),
            _ => Err(unexpected(&message)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::connection::{ALL_FEATURES_CHARACTERISTIC_UUID, READ_REQUEST_CHARACTERISTIC_UUID};
    use crate::reminders::{ReminderDate, ReminderTime, RepeatPeriod};
    use crate::status::{APP_INFO_RECORD, APP_INFO_RESET};
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_battery_round_trip_and_cache() {
        let records = records(&[vec![0x28, 0x13, 0x1E, 0x00]]);
        let (ble, session) = connected_session(WatchModel::Gw, &records).await;

        assert_eq!(session.get_battery_level().await.unwrap(), 96);
        assert_eq!(session.get_battery_level().await.unwrap(), 96);
        assert_eq!(ble.writes_to(READ_REQUEST_CHARACTERISTIC_UUID), vec![vec![0x28]]);
    }

    #[tokio::test]
    async fn test_battery_unsupported() {
        let records = records(&[]);
        let (_ble, session) = connected_session(WatchModel::Abl100, &records).await;
        assert_eq!(
            session.get_battery_level().await,
            Err(GShockError::Unsupported("battery level"))
        );
    }

    #[tokio::test]
    async fn test_alarms_need_both_messages() {
        let records = records(&[
            vec![0x15, 0x40, 0x40, 0x07, 0x00],
            vec![
                0x16, 0x00, 0x40, 0x08, 0x00, 0x00, 0x40, 0x09, 0x00, 0x00, 0x40, 0x0A, 0x00,
                0x00, 0x40, 0x0B, 0x00,
            ],
        ]);
        let (ble, session) = connected_session(WatchModel::Gw, &records).await;

        let alarms = session.get_alarms().await.unwrap();
        assert_eq!(alarms.len(), 5);
        assert_eq!(alarms[0], Alarm::new(7, 0, true, false));
        assert_eq!(alarms[4].hour, 11);

        let mut requested = ble.writes_to(READ_REQUEST_CHARACTERISTIC_UUID);
        requested.sort();
        assert_eq!(requested, vec![vec![0x15], vec![0x16]]);
    }

    #[tokio::test]
    async fn test_set_alarms_then_read_back() {
        let records = records(&[
            vec![0x15, 0x40, 0x40, 0x07, 0x00],
            vec![
                0x16, 0x00, 0x40, 0x08, 0x00, 0x00, 0x40, 0x09, 0x00, 0x00, 0x40, 0x0A, 0x00,
                0x00, 0x40, 0x0B, 0x00,
            ],
        ]);
        let (ble, session) = connected_session(WatchModel::Gw, &records).await;
        session.get_alarms().await.unwrap();

        let new_alarms: Vec<Alarm> = (0..5).map(|h| Alarm::new(h + 6, 30, h % 2 == 0, false)).collect();
        session.set_alarms(&new_alarms).await.unwrap();
        assert_eq!(ble.writes_to(ALL_FEATURES_CHARACTERISTIC_UUID).len(), 2);

        // The cache was invalidated, so this reads the watch again.
        assert_eq!(session.get_alarms().await.unwrap(), new_alarms);
        assert_eq!(ble.writes_to(READ_REQUEST_CHARACTERISTIC_UUID).len(), 4);
    }

    #[tokio::test]
    async fn test_settings_set_then_request() {
        let records = records(&[padded(&[0x13, 0x00], 12)]);
        let (_ble, session) = connected_session(WatchModel::Gw, &records).await;

        let mut settings = session.get_settings().await.unwrap();
        assert_eq!(settings, Settings::decode(&padded(&[0x13], 12)).unwrap());

        settings.button_tone = !settings.button_tone;
        session.set_settings(&settings).await.unwrap();
        assert_eq!(session.get_settings().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_time_adjustment_patches_raw_record() {
        let raw = vec![
            0x11, 0x0F, 0x0F, 0x0F, 0x06, 0x00, 0x50, 0x00, 0x04, 0x00, 0x01, 0x00, 0x00, 0x1E,
            0x37, 0xD2,
        ];
        let records = records(&[raw.clone()]);
        let (ble, session) = connected_session(WatchModel::Gw, &records).await;

        session
            .set_time_adjustment(&TimeAdjustment {
                enabled: false,
                adjustment_minutes: 10,
            })
            .await
            .unwrap();

        let written = ble.writes_to(ALL_FEATURES_CHARACTERISTIC_UUID);
        let mut expected = raw;
        expected[12] = 0x80;
        expected[13] = 10;
        assert_eq!(written, vec![expected]);
        assert!(!session.get_time_adjustment().await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_timer() {
        let records = records(&[vec![0x18, 0x00, 0x03, 0x00, 0, 0, 0]]);
        let (_ble, session) = connected_session(WatchModel::Gw, &records).await;
        assert_eq!(session.get_timer().await.unwrap().seconds, 180);
        session.set_timer(&Timer::new(3723)).await.unwrap();
        assert_eq!(session.get_timer().await.unwrap().seconds, 3723);
    }

    #[tokio::test]
    async fn test_rejected_write_fails_request_without_pending() {
        let records = records(&[vec![0x18, 0x00, 0x03, 0x00, 0, 0, 0]]);
        let (ble, session) = connected_session(WatchModel::Gw, &records).await;

        ble.fail_writes(true);
        assert!(matches!(
            session.get_timer().await,
            Err(GShockError::BluetoothError(_))
        ));
        assert!(!session.engine().is_pending(&key(CommandCode::Timer)));
        assert!(session.set_timer(&Timer::new(60)).await.is_err());

        ble.fail_writes(false);
        assert_eq!(session.get_timer().await.unwrap().seconds, 180);
    }

    #[tokio::test]
    async fn test_reminders_stop_at_end_marker() {
        let mut title = vec![0x30, 0x01];
        title.extend(b"DENTIST");
        title.resize(20, 0);
        let records = records(&[
            title,
            vec![0x31, 0x01, 0x01, 0x22, 0x04, 0x18, 0x22, 0x04, 0x18, 0x00, 0x00],
            vec![0x30, 0x02, 0xFF],
            vec![0x31, 0x02, 0x00, 0xFF],
        ]);
        let (ble, session) = connected_session(WatchModel::Gw, &records).await;

        let list = session.get_reminders().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].title, "DENTIST");
        assert_eq!(list[0].time.start_date, ReminderDate::new(2022, 4, 18));
        assert!(list[0].time.enabled);
        assert_eq!(ble.writes_to(READ_REQUEST_CHARACTERISTIC_UUID).len(), 4);
    }

    #[tokio::test]
    async fn test_set_and_clear_reminders() {
        let records = records(&[]);
        let (ble, session) = connected_session(WatchModel::Gw, &records).await;

        let reminder = Reminder {
            title: "GYM".to_string(),
            time: ReminderTime {
                enabled: true,
                repeat_period: RepeatPeriod::Weekly,
                start_date: ReminderDate::new(2024, 1, 1),
                end_date: ReminderDate::new(2024, 12, 31),
                days_of_week: vec![reminders::DayOfWeek::Monday],
            },
        };
        session.set_reminders(&[reminder.clone()]).await.unwrap();
        assert_eq!(ble.writes_to(ALL_FEATURES_CHARACTERISTIC_UUID).len(), 10);

        let list = session.get_reminders().await.unwrap();
        assert_eq!(list[0], reminder);

        ble.clear_written();
        session.clear_reminders().await.unwrap();
        let written = ble.writes_to(ALL_FEATURES_CHARACTERISTIC_UUID);
        assert_eq!(written.len(), 10);
        assert!(written[0][2..].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_reminders_unsupported() {
        let records = records(&[]);
        let (_ble, session) = connected_session(WatchModel::Dw, &records).await;
        assert_eq!(
            session.get_reminders().await,
            Err(GShockError::Unsupported("reminders"))
        );
    }

    #[tokio::test]
    async fn test_world_cities_are_independent_slots() {
        let records = records(&[
            WorldCity::new(0, "TOKYO").encode(),
            WorldCity::new(2, "PARIS").encode(),
        ]);
        let (ble, session) = connected_session(WatchModel::Gw, &records).await;

        assert_eq!(session.get_home_time().await.unwrap(), "TOKYO");
        assert_eq!(session.get_world_city(2).await.unwrap().city, "PARIS");
        assert_eq!(session.get_world_city(0).await.unwrap().city, "TOKYO");
        assert_eq!(
            ble.writes_to(READ_REQUEST_CHARACTERISTIC_UUID),
            vec![vec![0x1F, 0x00], vec![0x1F, 0x02]]
        );
    }

    #[tokio::test]
    async fn test_app_info_restored_after_reset() {
        let records = records(&[APP_INFO_RESET.to_vec()]);
        let (ble, session) = connected_session(WatchModel::Gw, &records).await;

        assert_eq!(session.get_app_info().await.unwrap(), APP_INFO_RESET.to_vec());
        assert_eq!(
            ble.writes_to(ALL_FEATURES_CHARACTERISTIC_UUID),
            vec![APP_INFO_RECORD.to_vec()]
        );

        ble.clear_written();
        assert_eq!(session.get_app_info().await.unwrap(), APP_INFO_RECORD.to_vec());
        assert!(ble.writes_to(ALL_FEATURES_CHARACTERISTIC_UUID).is_empty());
    }

    #[tokio::test]
    async fn test_watch_name_and_button() {
        let mut name = vec![0x23];
        name.extend(b"CASIO GW-B5600");
        let records = records(&[
            name,
            vec![
                0x10, 0x17, 0x62, 0x07, 0x38, 0x85, 0xCD, 0x7F, 0x04, 0x03, 0x0F, 0xFF, 0xFF,
                0xFF, 0xFF, 0x24, 0x00, 0x00, 0x00,
            ],
        ]);
        let (_ble, session) = connected_session(WatchModel::Gw, &records).await;
        assert_eq!(session.get_watch_name().await.unwrap(), "CASIO GW-B5600");
        assert_eq!(
            session.get_pressed_button().await.unwrap(),
            WatchButton::LowerRight
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_notifications() {
        let records = records(&[vec![0x28, 0x13, 0x1E, 0x00]]);
        let (_ble, session) = connected_session(WatchModel::Gw, &records).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.subscribe(
            Topic::WatchCondition,
            "ui",
            Arc::new(move |d: &crate::router::Delivery| {
                sink.lock().unwrap().push(d.key.to_string());
            }),
        );
        session.get_battery_level().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["28".to_string()]);
    }

    #[tokio::test]
    async fn test_link_loss_fails_pending_requests() {
        let records = records(&[]);
        let (ble, session) = connected_session(WatchModel::Gw, &records).await;
        let session = Arc::new(session);

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.get_watch_name().await })
        };
        let key = key(CommandCode::WatchName);
        while !session.engine().is_pending(&key) {
            tokio::task::yield_now().await;
        }

        ble.drop_link();
        assert_eq!(task.await.unwrap(), Err(GShockError::ConnectionLost));
        assert_eq!(
            session.get_watch_name().await,
            Err(GShockError::NotConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out() {
        let records = records(&[]);
        let (_ble, session) = connected_session(WatchModel::Gw, &records).await;
        assert!(matches!(
            session.get_timer().await,
            Err(GShockError::Timeout(_))
        ));
    }
}
