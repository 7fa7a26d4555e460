//! Casio G-Shock BLE protocol
//!
//! This library implements the client side of the Casio G-Shock Bluetooth Low
//! Energy protocol: record codecs, a topic router for watch notifications, a
//! request correlation engine that caches and deduplicates round trips, and
//! the connection state machine that ties them to a BLE transport.
//!
//! # Modules
//!
//! - `types`: command codes, errors and small shared helpers
//! - `messages`: correlation keys and decoded watch values
//! - `alarms`, `settings`, `reminders`, `time`, `world_cities`, `status`: record codecs
//! - `timezone`: Casio city table and zone lookup
//! - `router`: topic router for inbound notifications
//! - `engine`: request correlation engine
//! - `connection`: BLE transport abstraction and connection state machine
//! - `session`: one connection's router, engine and typed API
//! - `time_sync`: read/write-back sequence that precedes setting the time

pub mod alarms;
pub mod config;
pub mod connection;
pub mod engine;
pub mod messages;
pub mod reminders;
pub mod router;
pub mod session;
pub mod settings;
pub mod status;
pub mod time;
pub mod time_sync;
pub mod timezone;
pub mod types;
pub mod watch_model;
pub mod world_cities;

pub use alarms::{Alarm, AlarmAccumulator};
pub use config::{ConnectionConfig, EngineConfig};
pub use connection::{
    BleSupport, CharacteristicHandle, CharacteristicTarget, Connection, ConnectionState,
    LinkEvent, NotificationSink,
};
pub use engine::CorrelationEngine;
pub use messages::{CorrelationKey, MessageParser, WatchMessage, WatchValue};
pub use reminders::{Reminder, ReminderDate, ReminderTime, RepeatPeriod};
pub use router::{Delivery, SubscriberCallback, Topic, TopicRouter};
pub use session::Session;
pub use settings::{Settings, TimeAdjustment};
pub use time::Timer;
pub use timezone::{find_time_zone, CasioTimeZone};
pub use types::{CommandCode, DstRegister, GShockError, Result, WatchButton};
pub use watch_model::{ModelInfo, WatchModel};
pub use world_cities::{DstSetting, DstWatchState, WorldCity};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_imports() {
        // Smoke test to ensure all modules can be imported
        let _ = CommandCode::WorldCities;
        let _ = Topic::HomeTime;
        assert_eq!(
            CorrelationKey::for_code(CommandCode::WorldCities, Some(3)).as_str(),
            "1F03"
        );
    }
}
