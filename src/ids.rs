//! Strongly typed identifiers for server-generated resources.
//!
//! Channels and object instances are both addressed by ULIDs on the wire;
//! the newtypes keep the two id spaces from being mixed up in code.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Identifier of a server-side push channel.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct ChannelId(pub ulid::Ulid);

impl ChannelId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChannelId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ChannelId(ulid::Ulid::from_string(s)?))
    }
}

impl Serialize for ChannelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<ChannelId>()
            .map_err(|_| serde::de::Error::custom("invalid channel id"))
    }
}

/// Identifier of a dynamically created object instance.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct InstanceId(pub ulid::Ulid);

impl InstanceId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(InstanceId(ulid::Ulid::from_string(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_round_trips_as_string() {
        let id = ChannelId::new();
        let parsed: ChannelId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
