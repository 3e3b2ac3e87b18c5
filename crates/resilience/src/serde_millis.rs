//! Serde helpers that encode `Duration` values as integer milliseconds.
//!
//! Use with `#[serde(with = "resilience::serde_millis")]`, or the
//! [`option`] submodule for `Option<Duration>` fields.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

/// Same encoding for optional durations; `None` maps to `null`.
pub mod option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeouts {
        #[serde(with = "crate::serde_millis")]
        call: Duration,
        #[serde(with = "crate::serde_millis::option")]
        cap: Option<Duration>,
    }

    #[test]
    fn durations_encode_as_millis() {
        let value = Timeouts {
            call: Duration::from_millis(1500),
            cap: None,
        };
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"call":1500,"cap":null}"#);

        let parsed: Timeouts = serde_json::from_str(r#"{"call":20,"cap":300}"#).unwrap();
        assert_eq!(parsed.call, Duration::from_millis(20));
        assert_eq!(parsed.cap, Some(Duration::from_millis(300)));
    }
}
