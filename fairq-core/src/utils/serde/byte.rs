//! serde for optional ByteSize, written as a human readable string (`"1000 KiB"`) and
//! read from either such a string or a plain number of bytes.
use bytesize::ByteSize;
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum ByteRepr {
    Bytes(u64),
    Human(String),
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<ByteSize>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<ByteRepr>::deserialize(deserializer)? {
        Some(ByteRepr::Bytes(bytes)) => Ok(Some(ByteSize::b(bytes))),
        Some(ByteRepr::Human(s)) => s.parse::<ByteSize>().map(Some).map_err(D::Error::custom),
        None => Ok(None),
    }
}

pub fn serialize<S>(value: &Option<ByteSize>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(value) => serializer.serialize_str(&value.to_string()),
        None => serializer.serialize_none(),
    }
}
