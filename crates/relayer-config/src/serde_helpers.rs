//! Serde helpers for configuration deserialization

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
	Integer(i64),
	String(String),
}

/// Accepts an integer or a decimal string and keeps it as a string.
///
/// Price deltas and gas caps routinely exceed the 64-bit integers TOML can
/// express, so both spellings are allowed.
pub fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<NumberOrString>::deserialize(deserializer)?;
	Ok(value.map(|v| match v {
		NumberOrString::Integer(i) => i.to_string(),
		NumberOrString::String(s) => s,
	}))
}
