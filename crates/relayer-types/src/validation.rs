//! Configuration schema helpers.
//!
//! Implementation blocks in the configuration file (`[storage]`, `[account]`,
//! `[chains.<id>]`, ...) are free-form TOML tables. Each implementation
//! describes what it expects through a [`Schema`] and validates its table
//! before it is constructed.

use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
	#[error("Missing required field: {0}")]
	MissingField(String),
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: &'static str,
		actual: String,
	},
}

/// Expected type of a configuration field.
#[derive(Debug)]
pub enum FieldType {
	String,
	Integer { min: Option<i64>, max: Option<i64> },
	Boolean,
	Array(Box<FieldType>),
	Table(Schema),
}

/// Custom check run after the type check succeeds.
pub type FieldValidator = fn(&toml::Value) -> Result<(), String>;

#[derive(Debug)]
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub required: bool,
	pub validator: Option<FieldValidator>,
}

impl Field {
	pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			required: true,
			validator: None,
		}
	}

	pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			required: false,
			..Self::required(name, field_type)
		}
	}

	pub fn with_validator(mut self, validator: FieldValidator) -> Self {
		self.validator = Some(validator);
		self
	}
}

/// A set of fields a TOML table must satisfy.
#[derive(Debug, Default)]
pub struct Schema {
	pub fields: Vec<Field>,
}

impl Schema {
	pub fn new(fields: Vec<Field>) -> Self {
		Self { fields }
	}

	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config.as_table().ok_or_else(|| ValidationError::TypeMismatch {
			field: "root".to_string(),
			expected: "table",
			actual: config.type_str().to_string(),
		})?;

		for field in &self.fields {
			let Some(value) = table.get(&field.name) else {
				if field.required {
					return Err(ValidationError::MissingField(field.name.clone()));
				}
				continue;
			};

			check_type(&field.name, value, &field.field_type)?;

			if let Some(validator) = field.validator {
				validator(value).map_err(|message| ValidationError::InvalidValue {
					field: field.name.clone(),
					message,
				})?;
			}
		}

		Ok(())
	}
}

fn mismatch(field: &str, expected: &'static str, value: &toml::Value) -> ValidationError {
	ValidationError::TypeMismatch {
		field: field.to_string(),
		expected,
		actual: value.type_str().to_string(),
	}
}

fn check_type(field: &str, value: &toml::Value, expected: &FieldType) -> Result<(), ValidationError> {
	match expected {
		FieldType::String if !value.is_str() => Err(mismatch(field, "string", value)),
		FieldType::Boolean if !value.is_bool() => Err(mismatch(field, "boolean", value)),
		FieldType::String | FieldType::Boolean => Ok(()),
		FieldType::Integer { min, max } => {
			let int_val = value
				.as_integer()
				.ok_or_else(|| mismatch(field, "integer", value))?;
			if min.is_some_and(|m| int_val < m) || max.is_some_and(|m| int_val > m) {
				return Err(ValidationError::InvalidValue {
					field: field.to_string(),
					message: format!("Value {} is out of range {:?}..={:?}", int_val, min, max),
				});
			}
			Ok(())
		}
		FieldType::Array(inner) => {
			let items = value.as_array().ok_or_else(|| mismatch(field, "array", value))?;
			for (i, item) in items.iter().enumerate() {
				check_type(&format!("{}[{}]", field, i), item, inner)?;
			}
			Ok(())
		}
		FieldType::Table(schema) => schema.validate(value).map_err(|e| match e {
			ValidationError::MissingField(f) => ValidationError::MissingField(format!("{}.{}", field, f)),
			ValidationError::InvalidValue { field: f, message } => ValidationError::InvalidValue {
				field: format!("{}.{}", field, f),
				message,
			},
			ValidationError::TypeMismatch {
				field: f,
				expected,
				actual,
			} => ValidationError::TypeMismatch {
				field: format!("{}.{}", field, f),
				expected,
				actual,
			},
		}),
	}
}

/// Accepts `http://` and `https://` endpoints.
pub fn http_url(value: &toml::Value) -> Result<(), String> {
	let url = value.as_str().unwrap_or_default();
	if url.starts_with("http://") || url.starts_with("https://") {
		Ok(())
	} else {
		Err("RPC URL must start with http:// or https://".to_string())
	}
}

/// Accepts a 0x-prefixed 20-byte hex address.
pub fn evm_address(value: &toml::Value) -> Result<(), String> {
	let addr = value.as_str().unwrap_or_default();
	match addr.strip_prefix("0x") {
		Some(hex_part) if hex_part.len() == 40 && hex::decode(hex_part).is_ok() => Ok(()),
		_ => Err("must be a 0x-prefixed 20-byte hex address".to_string()),
	}
}

/// Accepts a 32-byte hex private key with or without 0x prefix.
pub fn private_key(value: &toml::Value) -> Result<(), String> {
	let key = value.as_str().unwrap_or_default();
	let key_without_prefix = key.strip_prefix("0x").unwrap_or(key);

	if key_without_prefix.len() != 64 {
		return Err("Private key must be 64 hex characters (32 bytes)".to_string());
	}
	if hex::decode(key_without_prefix).is_err() {
		return Err("Private key must be valid hexadecimal".to_string());
	}
	Ok(())
}

/// Implemented by anything that validates its own configuration table.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}
