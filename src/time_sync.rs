//! Time synchronisation sequences
//!
//! The watch only accepts a new time after the DST registers, the DST
//! settings and the world cities have been read and written back
//! unchanged. Every step waits for the previous one.

use crate::messages::CorrelationKey;
use crate::session::Session;
use crate::time::encode_current_time;
use crate::timezone::find_time_zone;
use crate::types::{hex_dump, CommandCode, DstRegister, GShockError, Result};
use crate::world_cities::{set_dst, set_dst_flags, WorldCity};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use chrono_tz::Tz;
use log::{debug, info};

async fn read_and_write_back(session: &Session, key: CorrelationKey) -> Result<()> {
    let message = session.request(&key).await?;
    debug!("Writing back {}: {}", key, hex_dump(&message.raw));
    session.write_record(&message.raw).await
}

/// Touch every DST register, DST setting and world city the model has
pub async fn preamble(session: &Session) -> Result<()> {
    let info = session.info();

    for register in DstRegister::ALL.iter().take(usize::from(info.dst_count)) {
        let key = CorrelationKey::for_code(CommandCode::DstWatchState, Some(register.to_u8()));
        read_and_write_back(session, key).await?;
    }

    for index in 0..info.world_cities_count {
        let key = CorrelationKey::for_code(CommandCode::DstSetting, Some(index));
        read_and_write_back(session, key).await?;
    }

    for index in 0..info.world_cities_count {
        let key = CorrelationKey::for_code(CommandCode::WorldCities, Some(index));
        read_and_write_back(session, key).await?;
    }

    Ok(())
}

/// Make `zone_name` the home city, returning `false` if it already was
///
/// Writes world city slot 0, then patches DST setting 0 with the zone's
/// offsets and rules and DST register 0 with its current DST flags.
pub async fn update_home_time(
    session: &Session,
    zone_name: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let zone = find_time_zone(zone_name, now)?;
    let current = session.get_home_time().await?;
    if current == zone.name {
        debug!("Home time already {}", current);
        return Ok(false);
    }

    info!("Changing home time from {} to {} ({})", current, zone.name, zone.zone);
    session
        .set_world_city(&WorldCity::new(0, zone.name.clone()))
        .await?;

    let setting_key = CorrelationKey::for_code(CommandCode::DstSetting, Some(0));
    let setting = session.request(&setting_key).await?;
    session
        .set_record(&setting_key, &set_dst(&setting.raw, &zone))
        .await?;

    let state_key = CorrelationKey::for_code(CommandCode::DstWatchState, Some(0));
    let state = session.request(&state_key).await?;
    session
        .set_record(&state_key, &set_dst_flags(&state.raw, zone.dst_state_flags())?)
        .await?;

    Ok(true)
}

/// Set the watch clock to `local`, optionally moving home time to `zone_name` first
pub async fn set_time(
    session: &Session,
    local: NaiveDateTime,
    zone_name: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    preamble(session).await?;

    if let Some(zone_name) = zone_name {
        update_home_time(session, zone_name, now).await?;
    }

    let command = encode_current_time(&local)?;
    session.write_record(&command).await?;
    info!("Watch time set to {}", local);
    Ok(())
}

/// Wall clock time in `zone_name`, or in the system zone
pub fn local_now(zone_name: Option<&str>, now: DateTime<Utc>) -> Result<NaiveDateTime> {
    match zone_name {
        Some(name) => {
            let tz: Tz = name
                .parse()
                .map_err(|_| GShockError::InvalidValue(format!("unknown time zone {}", name)))?;
            Ok(now.with_timezone(&tz).naive_local())
        }
        None => Ok(now.with_timezone(&Local).naive_local()),
    }
}
