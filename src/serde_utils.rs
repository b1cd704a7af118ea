use serde::{Deserialize, Deserializer, Serializer};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn deserialize_timestamp_millis<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    let duration = std::time::Duration::from_millis(millis);
    Ok(UNIX_EPOCH + duration)
}

pub fn serialize_timestamp_millis<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let millis = time
        .duration_since(UNIX_EPOCH)
        .map_err(serde::ser::Error::custom)?
        .as_millis();
    let millis = u64::try_from(millis).map_err(serde::ser::Error::custom)?;
    serializer.serialize_u64(millis)
}
