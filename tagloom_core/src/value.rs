use std::any::Any;
use std::fmt;
use std::fmt::Display;
use std::rc::Rc;

use float_cmp::approx_eq;
use indexmap::IndexMap;
use serde::Serialize;

/// A host value that takes part in name resolution without being converted
/// into a [`Value::Map`] first.
///
/// Lookups try, in order, the accessor named by the `get` + capitalized-name
/// convention (`title` → `getTitle`), a directly named field, and finally the
/// dynamic fallback. Every method defaults to "not found", so implementors
/// only provide the capabilities they have.
pub trait DataObject: fmt::Debug {
	/// Resolve an accessor such as `getTitle`.
	fn accessor(&self, _getter: &str) -> Option<Value> {
		None
	}

	/// Resolve a directly named field.
	fn field(&self, _name: &str) -> Option<Value> {
		None
	}

	/// Last-resort resolution for genuinely dynamic values.
	fn dynamic(&self, _name: &str) -> Option<Value> {
		None
	}

	/// Lets functions recognise the concrete type behind a [`Value::Object`].
	fn as_any(&self) -> Option<&dyn Any> {
		None
	}
}

/// A value produced by expression evaluation or mounted into a data scope.
#[derive(Debug, Clone, Default)]
pub enum Value {
	#[default]
	Null,
	Bool(bool),
	Number(f64),
	String(String),
	List(Vec<Value>),
	Map(IndexMap<String, Value>),
	/// An opaque host handle, resolved through [`DataObject`].
	Object(Rc<dyn DataObject>),
}

impl Value {
	/// Convert any serializable host value into a structural value. This is
	/// the reflective path used for values that don't implement
	/// [`DataObject`].
	pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Self {
		serde_json::to_value(value).map_or(Value::Null, Value::from)
	}

	pub fn object(object: impl DataObject + 'static) -> Self {
		Value::Object(Rc::new(object))
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	pub fn is_truthy(&self) -> bool {
		match self {
			Value::Null => false,
			Value::Bool(value) => *value,
			Value::Number(number) => *number != 0.0,
			Value::String(string) => !string.is_empty(),
			Value::List(items) => !items.is_empty(),
			Value::Map(entries) => !entries.is_empty(),
			Value::Object(_) => true,
		}
	}

	/// Numeric view of the value. Strings coerce when they parse as a number.
	pub fn as_number(&self) -> Option<f64> {
		match self {
			Value::Null => Some(0.0),
			Value::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
			Value::Number(number) => Some(*number),
			Value::String(string) => string.trim().parse::<f64>().ok(),
			Value::List(_) | Value::Map(_) | Value::Object(_) => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::String(string) => Some(string),
			_ => None,
		}
	}

	/// The text emitted when the value is written into the output.
	pub fn to_output_string(&self) -> String {
		match self {
			Value::Null => String::new(),
			Value::String(string) => string.clone(),
			other => other.to_string(),
		}
	}

	/// Resolve `name` inside this value: a key of a map, an index of a list,
	/// or a member of a host object.
	pub fn member(&self, name: &str) -> Option<Value> {
		match self {
			Value::Map(entries) => entries.get(name).cloned(),
			Value::List(items) => {
				name.parse::<usize>()
					.ok()
					.and_then(|index| items.get(index).cloned())
			}
			Value::Object(object) => resolve_object_member(object.as_ref(), name),
			_ => None,
		}
	}

	/// Number of elements for collections, characters for strings.
	pub fn len(&self) -> usize {
		match self {
			Value::Null => 0,
			Value::String(string) => string.chars().count(),
			Value::List(items) => items.len(),
			Value::Map(entries) => entries.len(),
			Value::Bool(_) | Value::Number(_) | Value::Object(_) => 1,
		}
	}

	pub fn is_empty(&self) -> bool {
		!self.is_truthy()
	}
}

/// The accessor name for `name` under the `get` + capitalized convention.
pub fn getter_name(name: &str) -> String {
	let mut chars = name.chars();
	match chars.next() {
		Some(first) => format!("get{}{}", first.to_uppercase(), chars.as_str()),
		None => "get".to_string(),
	}
}

pub(crate) fn resolve_object_member(object: &dyn DataObject, name: &str) -> Option<Value> {
	object
		.accessor(&getter_name(name))
		.or_else(|| object.field(name))
		.or_else(|| object.dynamic(name))
}

pub(crate) fn format_number(number: f64) -> String {
	if number.fract() == 0.0 && number.abs() < 1e15 {
		format!("{}", number as i64)
	} else {
		format!("{number}")
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::Null => write!(f, "null"),
			Value::Bool(value) => write!(f, "{value}"),
			Value::Number(number) => write!(f, "{}", format_number(*number)),
			Value::String(string) => write!(f, "{string}"),
			Value::List(items) => {
				for (index, item) in items.iter().enumerate() {
					if index > 0 {
						write!(f, ",")?;
					}
					write!(f, "{}", item.to_output_string())?;
				}
				Ok(())
			}
			Value::Map(entries) => {
				for (index, item) in entries.values().enumerate() {
					if index > 0 {
						write!(f, ",")?;
					}
					write!(f, "{}", item.to_output_string())?;
				}
				Ok(())
			}
			Value::Object(object) => write!(f, "{object:?}"),
		}
	}
}

impl PartialEq for Value {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Value::Null, Value::Null) => true,
			(Value::Bool(value), Value::Bool(other_value)) => value == other_value,
			(Value::Number(value), Value::Number(other_value)) => {
				approx_eq!(f64, *value, *other_value, ulps = 2)
			}
			(Value::String(value), Value::String(other_value)) => value == other_value,
			(Value::List(value), Value::List(other_value)) => value == other_value,
			(Value::Map(value), Value::Map(other_value)) => value == other_value,
			(Value::Object(value), Value::Object(other_value)) => Rc::ptr_eq(value, other_value),
			_ => false,
		}
	}
}

impl From<serde_json::Value> for Value {
	fn from(value: serde_json::Value) -> Self {
		match value {
			serde_json::Value::Null => Value::Null,
			serde_json::Value::Bool(value) => Value::Bool(value),
			serde_json::Value::Number(number) => Value::Number(number.as_f64().unwrap_or(0.0)),
			serde_json::Value::String(string) => Value::String(string),
			serde_json::Value::Array(items) => {
				Value::List(items.into_iter().map(Value::from).collect())
			}
			serde_json::Value::Object(entries) => {
				Value::Map(
					entries
						.into_iter()
						.map(|(key, value)| (key, Value::from(value)))
						.collect(),
				)
			}
		}
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Value::Bool(value)
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Self {
		Value::Number(value)
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Value::Number(value as f64)
	}
}

impl From<i32> for Value {
	fn from(value: i32) -> Self {
		Value::Number(f64::from(value))
	}
}

impl From<usize> for Value {
	fn from(value: usize) -> Self {
		Value::Number(value as f64)
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::String(value.to_string())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Value::String(value)
	}
}

impl<T: Into<Value>> From<Vec<T>> for Value {
	fn from(items: Vec<T>) -> Self {
		Value::List(items.into_iter().map(Into::into).collect())
	}
}

impl From<IndexMap<String, Value>> for Value {
	fn from(entries: IndexMap<String, Value>) -> Self {
		Value::Map(entries)
	}
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Value {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Value::Map(
			iter.into_iter()
				.map(|(key, value)| (key.into(), value.into()))
				.collect(),
		)
	}
}
