//! Topic router
//!
//! Turns every raw notification into a [`Delivery`] and hands it to the
//! subscribers of its topic, synchronously and in subscription order.

use crate::messages::{CorrelationKey, MessageParser, WatchValue};
use crate::types::{hex_dump, CommandCode, GShockError, Result};
use log::{debug, warn};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Named channel of decoded messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Topic {
    Alarms,
    Settings,
    TimeAdjustment,
    Timer,
    Reminders,
    WorldCities,
    DstSetting,
    DstWatchState,
    WatchName,
    WatchCondition,
    AppInformation,
    ButtonPressed,
    /// World city slot 0, published in addition to [`Topic::WorldCities`]
    HomeTime,
    Error,
    UnknownCommand,
}

impl Topic {
    /// Topics that carry decoded watch values
    pub const DATA: [Topic; 12] = [
        Topic::Alarms,
        Topic::Settings,
        Topic::TimeAdjustment,
        Topic::Timer,
        Topic::Reminders,
        Topic::WorldCities,
        Topic::DstSetting,
        Topic::DstWatchState,
        Topic::WatchName,
        Topic::WatchCondition,
        Topic::AppInformation,
        Topic::ButtonPressed,
    ];

    /// Static code table. Codes without a topic are unknown commands.
    pub fn for_code(code: u8) -> Option<Topic> {
        let topic = match CommandCode::from_u8(code).ok()? {
            CommandCode::SettingForAlarm | CommandCode::SettingForAlarm2 => Topic::Alarms,
            CommandCode::SettingForBasic => Topic::Settings,
            CommandCode::SettingForBle => Topic::TimeAdjustment,
            CommandCode::Timer => Topic::Timer,
            CommandCode::ReminderTitle | CommandCode::ReminderTime => Topic::Reminders,
            CommandCode::WorldCities => Topic::WorldCities,
            CommandCode::DstSetting => Topic::DstSetting,
            CommandCode::DstWatchState => Topic::DstWatchState,
            CommandCode::WatchName => Topic::WatchName,
            CommandCode::WatchCondition => Topic::WatchCondition,
            CommandCode::AppInformation => Topic::AppInformation,
            CommandCode::BleFeatures => Topic::ButtonPressed,
            CommandCode::Error => Topic::Error,
            _ => return None,
        };
        Some(topic)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::Alarms => "ALARMS",
            Topic::Settings => "SETTINGS",
            Topic::TimeAdjustment => "TIME_ADJUSTMENT",
            Topic::Timer => "CASIO_TIMER",
            Topic::Reminders => "REMINDERS",
            Topic::WorldCities => "CASIO_WORLD_CITIES",
            Topic::DstSetting => "CASIO_DST_SETTING",
            Topic::DstWatchState => "CASIO_DST_WATCH_STATE",
            Topic::WatchName => "CASIO_WATCH_NAME",
            Topic::WatchCondition => "CASIO_WATCH_CONDITION",
            Topic::AppInformation => "CASIO_APP_INFORMATION",
            Topic::ButtonPressed => "BUTTON_PRESSED",
            Topic::HomeTime => "HOME_TIME",
            Topic::Error => "ERROR",
            Topic::UnknownCommand => "UNKNOWN_COMMAND",
        };
        f.write_str(name)
    }
}

/// One notification as seen by subscribers
///
/// `value` holds the decode failure when the payload was malformed, so the
/// failure stays attached to its key.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: Topic,
    pub key: CorrelationKey,
    pub raw: Vec<u8>,
    pub value: Result<WatchValue>,
}

pub type SubscriberCallback = Arc<dyn Fn(&Delivery) + Send + Sync>;

struct Subscription {
    topic: Topic,
    subscriber_id: String,
    callback: SubscriberCallback,
}

/// Fans decoded notifications out to topic subscribers
#[derive(Default)]
pub struct TopicRouter {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `callback` to `topic`
    ///
    /// Returns false, keeping the existing callback, when `subscriber_id` is
    /// already subscribed to `topic`.
    pub fn subscribe(
        &self,
        topic: Topic,
        subscriber_id: impl Into<String>,
        callback: SubscriberCallback,
    ) -> bool {
        let subscriber_id = subscriber_id.into();
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subs
            .iter()
            .any(|s| s.topic == topic && s.subscriber_id == subscriber_id)
        {
            debug!("{} already subscribed to {}", subscriber_id, topic);
            return false;
        }
        debug!("{} subscribed to {}", subscriber_id, topic);
        subs.push(Subscription {
            topic,
            subscriber_id,
            callback,
        });
        true
    }

    pub fn unsubscribe(&self, topic: Topic, subscriber_id: &str) -> bool {
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| !(s.topic == topic && s.subscriber_id == subscriber_id));
        subs.len() != before
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.topic == topic)
            .count()
    }

    /// Decode `data` and deliver it to every subscriber of its topic
    pub fn dispatch(&self, data: &[u8]) {
        let key = match CorrelationKey::from_message(data) {
            Ok(key) => key,
            Err(e) => {
                warn!("Dropping notification: {}", e);
                return;
            }
        };
        let code = data[0];

        let Some(topic) = Topic::for_code(code) else {
            warn!("Unknown command 0x{:02X}: {}", code, hex_dump(data));
            self.publish(&Delivery {
                topic: Topic::UnknownCommand,
                key,
                raw: data.to_vec(),
                value: Err(GShockError::UnknownCommand(code)),
            });
            return;
        };

        let value = MessageParser::parse(data);
        match &value {
            Ok(_) => debug!("{} [{}]: {}", topic, key, hex_dump(data)),
            Err(e) => warn!("{} [{}] failed: {}", topic, key, e),
        }

        let home_time = matches!(&value, Ok(WatchValue::WorldCity(city)) if city.is_home_time());
        let delivery = Delivery {
            topic,
            key,
            raw: data.to_vec(),
            value,
        };
        self.publish(&delivery);

        if home_time {
            self.publish(&Delivery {
                topic: Topic::HomeTime,
                ..delivery
            });
        }
    }

    fn publish(&self, delivery: &Delivery) {
        // Callbacks run without the lock so they can subscribe themselves.
        let callbacks: Vec<SubscriberCallback> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.topic == delivery.topic)
            .map(|s| Arc::clone(&s.callback))
            .collect();

        if callbacks.is_empty() {
            debug!("No subscribers for {}", delivery.topic);
        }
        for callback in callbacks {
            callback(delivery);
        }
    }
}
