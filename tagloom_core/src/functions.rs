use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use quick_xml::escape::escape;

use crate::TagloomError;
use crate::TagloomResult;
use crate::scope::Iteration;
use crate::scope::ScopeStack;
use crate::value::Value;
use crate::xml_document::XmlDocument;

/// The context handed to a function when an expression calls it.
pub struct FunctionCall<'a> {
	pub name: &'a str,
	pub scope: &'a ScopeStack,
	/// The innermost loop iteration, when the call happens inside a `walk`.
	pub iteration: Option<&'a Iteration>,
}

impl FunctionCall<'_> {
	/// Build the error returned when the call cannot be served.
	pub fn error(&self, message: impl Into<String>) -> TagloomError {
		TagloomError::FunctionCall {
			name: self.name.to_string(),
			message: message.into(),
		}
	}

	fn expect_arguments(&self, arguments: &[Value], min: usize, max: usize) -> TagloomResult<()> {
		let count = arguments.len();
		if count < min || count > max {
			let expected = if min == max {
				format!("{min}")
			} else if max == usize::MAX {
				format!("at least {min}")
			} else {
				format!("{min} to {max}")
			};
			return Err(self.error(format!("expected {expected} arguments, got {count}")));
		}
		Ok(())
	}
}

/// A function callable from template expressions.
pub trait TemplateFunction {
	fn call(&self, call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value>;
}

impl<F> TemplateFunction for F
where
	F: Fn(&FunctionCall<'_>, Vec<Value>) -> TagloomResult<Value>,
{
	fn call(&self, call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
		self(call, arguments)
	}
}

/// Supplies functions by name.
pub trait FunctionFactory {
	fn lookup(&self, name: &str) -> Option<Rc<dyn TemplateFunction>>;
}

/// A name → function table, the simplest [`FunctionFactory`].
#[derive(Default, Clone)]
pub struct FunctionMap {
	functions: HashMap<String, Rc<dyn TemplateFunction>>,
}

impl FunctionMap {
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with(mut self, name: impl Into<String>, function: impl TemplateFunction + 'static) -> Self {
		self.insert(name, function);
		self
	}

	pub fn insert(&mut self, name: impl Into<String>, function: impl TemplateFunction + 'static) {
		self.functions.insert(name.into(), Rc::new(function));
	}
}

impl FunctionFactory for FunctionMap {
	fn lookup(&self, name: &str) -> Option<Rc<dyn TemplateFunction>> {
		self.functions.get(name).cloned()
	}
}

/// Resolves function names for the evaluator. Registered factories are
/// consulted most recent first, then the native library.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
	factories: Vec<Rc<dyn FunctionFactory>>,
}

impl FunctionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, factory: impl FunctionFactory + 'static) {
		self.factories.insert(0, Rc::new(factory));
	}

	pub fn resolve(&self, name: &str) -> Option<Rc<dyn TemplateFunction>> {
		self.factories
			.iter()
			.find_map(|factory| factory.lookup(name))
			.or_else(|| NativeFunctions.lookup(name))
	}

	pub fn call(&self, call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
		let Some(function) = self.resolve(call.name) else {
			return Err(TagloomError::FunctionNotFound {
				name: call.name.to_string(),
			});
		};

		function.call(call, arguments)
	}
}

type NativeFunction = fn(&FunctionCall<'_>, Vec<Value>) -> TagloomResult<Value>;

/// The functions every template can call without registering anything.
pub struct NativeFunctions;

impl NativeFunctions {
	pub const NAMES: &'static [&'static str] = &[
		"not",
		"eq",
		"neq",
		"lt",
		"gt",
		"le",
		"ge",
		"and",
		"or",
		"if",
		"default",
		"count",
		"empty",
		"concat",
		"upper",
		"lower",
		"trim",
		"substr",
		"htmlentities",
		"round",
		"format_number",
		"position",
		"first",
		"last",
		"even",
		"odd",
		"key",
		"xml",
		"xpath",
	];

	fn native(name: &str) -> Option<NativeFunction> {
		let function: NativeFunction = match name {
			"not" => not,
			"eq" => eq,
			"neq" => neq,
			"lt" => lt,
			"gt" => gt,
			"le" => le,
			"ge" => ge,
			"and" => and,
			"or" => or,
			"if" => if_else,
			"default" => default,
			"count" => count,
			"empty" => empty,
			"concat" => concat,
			"upper" => upper,
			"lower" => lower,
			"trim" => trim,
			"substr" => substr,
			"htmlentities" => htmlentities,
			"round" => round,
			"format_number" => number_format,
			"position" => position,
			"first" => first,
			"last" => last,
			"even" => even,
			"odd" => odd,
			"key" => key,
			"xml" => xml,
			"xpath" => xpath,
			_ => return None,
		};
		Some(function)
	}
}

impl FunctionFactory for NativeFunctions {
	fn lookup(&self, name: &str) -> Option<Rc<dyn TemplateFunction>> {
		Self::native(name).map(|function| Rc::new(function) as Rc<dyn TemplateFunction>)
	}
}

/// Numeric comparison when both sides read as numbers, text comparison
/// otherwise.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
	let numeric = |value: &Value| {
		match value {
			Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null => value.as_number(),
			_ => None,
		}
	};

	match (numeric(left), numeric(right)) {
		(Some(left), Some(right)) => left.partial_cmp(&right),
		_ => Some(left.to_output_string().cmp(&right.to_output_string())),
	}
}

fn two(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<(Value, Value)> {
	call.expect_arguments(&arguments, 2, 2)?;
	let mut arguments = arguments.into_iter();
	match (arguments.next(), arguments.next()) {
		(Some(left), Some(right)) => Ok((left, right)),
		_ => Err(call.error("expected 2 arguments")),
	}
}

fn one(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	call.expect_arguments(&arguments, 1, 1)?;
	Ok(arguments.into_iter().next().unwrap_or_default())
}

fn text(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<String> {
	one(call, arguments).map(|value| value.to_output_string())
}

fn not(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	Ok(Value::Bool(!one(call, arguments)?.is_truthy()))
}

fn eq(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	let (left, right) = two(call, arguments)?;
	Ok(Value::Bool(compare(&left, &right) == Some(Ordering::Equal)))
}

fn neq(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	let (left, right) = two(call, arguments)?;
	Ok(Value::Bool(compare(&left, &right) != Some(Ordering::Equal)))
}

fn lt(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	let (left, right) = two(call, arguments)?;
	Ok(Value::Bool(compare(&left, &right) == Some(Ordering::Less)))
}

fn gt(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	let (left, right) = two(call, arguments)?;
	Ok(Value::Bool(compare(&left, &right) == Some(Ordering::Greater)))
}

fn le(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	let (left, right) = two(call, arguments)?;
	Ok(Value::Bool(matches!(
		compare(&left, &right),
		Some(Ordering::Less | Ordering::Equal)
	)))
}

fn ge(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	let (left, right) = two(call, arguments)?;
	Ok(Value::Bool(matches!(
		compare(&left, &right),
		Some(Ordering::Greater | Ordering::Equal)
	)))
}

fn and(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	call.expect_arguments(&arguments, 1, usize::MAX)?;
	Ok(Value::Bool(arguments.iter().all(Value::is_truthy)))
}

fn or(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	call.expect_arguments(&arguments, 1, usize::MAX)?;
	Ok(Value::Bool(arguments.iter().any(Value::is_truthy)))
}

/// `if(condition, then[, otherwise])`
fn if_else(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	call.expect_arguments(&arguments, 2, 3)?;
	let mut arguments = arguments.into_iter();
	let condition = arguments.next().unwrap_or_default();
	let then = arguments.next().unwrap_or_default();
	let otherwise = arguments.next().unwrap_or_default();
	Ok(if condition.is_truthy() { then } else { otherwise })
}

fn default(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	let (value, fallback) = two(call, arguments)?;
	Ok(if value.is_truthy() { value } else { fallback })
}

fn count(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	Ok(Value::from(one(call, arguments)?.len()))
}

fn empty(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	Ok(Value::Bool(one(call, arguments)?.is_empty()))
}

fn concat(_call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	Ok(Value::String(
		arguments.iter().map(Value::to_output_string).collect(),
	))
}

fn upper(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	Ok(Value::String(text(call, arguments)?.to_uppercase()))
}

fn lower(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	Ok(Value::String(text(call, arguments)?.to_lowercase()))
}

fn trim(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	Ok(Value::String(text(call, arguments)?.trim().to_string()))
}

/// `substr(text, start[, length])`, counted in characters. A negative start
/// counts from the end.
fn substr(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	call.expect_arguments(&arguments, 2, 3)?;
	let chars: Vec<char> = arguments[0].to_output_string().chars().collect();
	let total = chars.len() as i64;
	let start = integer(call, &arguments[1])?;
	let start = if start < 0 {
		(total + start).max(0)
	} else {
		start.min(total)
	};
	let end = match arguments.get(2) {
		Some(length) => {
			let length = integer(call, length)?;
			if length < 0 {
				(total + length).max(start)
			} else {
				(start + length).min(total)
			}
		}
		None => total,
	};

	#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
	let slice: String = chars[start as usize..end as usize].iter().collect();
	Ok(Value::String(slice))
}

fn htmlentities(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	Ok(Value::String(escape(text(call, arguments)?.as_str()).into_owned()))
}

/// `xml(string[, root])` parses an XML island. Without `root`, a string that
/// is not a single element is wrapped in `<xml>`.
fn xml(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	call.expect_arguments(&arguments, 1, 2)?;
	let source = arguments[0].to_output_string();
	let root = arguments.get(1).map(Value::to_output_string);
	Ok(XmlDocument::parse_island(&source, root.as_deref())?.into())
}

/// `xpath(document, query)`. One match yields its text, several a list of
/// texts, none `null`. A string document is parsed as by `xml()`.
fn xpath(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	let (document, query) = two(call, arguments)?;
	let parsed;
	let document = match &document {
		Value::Object(object) => {
			object
				.as_any()
				.and_then(|any| any.downcast_ref::<XmlDocument>())
				.ok_or_else(|| call.error("expected a document returned by xml()"))?
		}
		Value::String(source) => {
			parsed = XmlDocument::parse_island(source, None)?;
			&parsed
		}
		_ => return Err(call.error("expected a document returned by xml()")),
	};

	let mut texts: Vec<Value> = document
		.select(&query.to_output_string())
		.map_err(|message| call.error(message))?
		.iter()
		.map(|matched| Value::String(matched.text()))
		.collect();

	Ok(match texts.len() {
		0 => Value::Null,
		1 => texts.pop().unwrap_or_default(),
		_ => Value::List(texts),
	})
}

/// `round(number[, decimals])`
fn round(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	call.expect_arguments(&arguments, 1, 2)?;
	let number = float(call, &arguments[0])?;
	let decimals = match arguments.get(1) {
		Some(decimals) => integer(call, decimals)?,
		None => 0,
	};
	#[allow(clippy::cast_possible_truncation)]
	let factor = 10f64.powi(decimals as i32);
	Ok(Value::Number((number * factor).round() / factor))
}

/// `format_number(number[, decimals[, decimal_point[, thousands]]])`
fn number_format(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	call.expect_arguments(&arguments, 1, 4)?;
	let number = float(call, &arguments[0])?;
	let decimals = match arguments.get(1) {
		Some(decimals) => usize::try_from(integer(call, decimals)?.max(0)).unwrap_or(0),
		None => 0,
	};
	let point = arguments
		.get(2)
		.map_or_else(|| ".".to_string(), Value::to_output_string);
	let thousands = arguments
		.get(3)
		.map_or_else(|| ",".to_string(), Value::to_output_string);

	let formatted = format!("{:.*}", decimals, number.abs());
	let (whole, fraction) = formatted.split_once('.').unwrap_or((formatted.as_str(), ""));
	let mut grouped = String::new();
	for (index, digit) in whole.chars().enumerate() {
		if index > 0 && (whole.len() - index) % 3 == 0 {
			grouped.push_str(&thousands);
		}
		grouped.push(digit);
	}

	let sign = if number < 0.0 && formatted.chars().any(|c| c.is_ascii_digit() && c != '0') {
		"-"
	} else {
		""
	};
	let output = if fraction.is_empty() {
		format!("{sign}{grouped}")
	} else {
		format!("{sign}{grouped}{point}{fraction}")
	};
	Ok(Value::String(output))
}

fn iteration<'a>(call: &FunctionCall<'a>, arguments: &[Value]) -> TagloomResult<Option<&'a Iteration>> {
	call.expect_arguments(arguments, 0, 0)?;
	Ok(call.iteration)
}

fn position(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	Ok(Value::from(iteration(call, &arguments)?.map_or(0, |it| it.position)))
}

fn first(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	Ok(Value::Bool(iteration(call, &arguments)?.is_some_and(Iteration::is_first)))
}

fn last(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	Ok(Value::Bool(iteration(call, &arguments)?.is_some_and(Iteration::is_last)))
}

fn even(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	Ok(Value::Bool(
		iteration(call, &arguments)?.is_some_and(|it| it.position % 2 == 0),
	))
}

fn odd(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	Ok(Value::Bool(
		iteration(call, &arguments)?.is_some_and(|it| it.position % 2 == 1),
	))
}

fn key(call: &FunctionCall<'_>, arguments: Vec<Value>) -> TagloomResult<Value> {
	Ok(iteration(call, &arguments)?
		.map(|it| it.key.clone())
		.unwrap_or_default())
}

fn float(call: &FunctionCall<'_>, value: &Value) -> TagloomResult<f64> {
	value
		.as_number()
		.ok_or_else(|| call.error(format!("`{value}` is not a number")))
}

#[allow(clippy::cast_possible_truncation)]
fn integer(call: &FunctionCall<'_>, value: &Value) -> TagloomResult<i64> {
	float(call, value).map(|number| number.trunc() as i64)
}
