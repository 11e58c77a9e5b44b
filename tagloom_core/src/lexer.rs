use crate::TagloomError;
use crate::TagloomResult;
use crate::functions::FunctionCall;
use crate::functions::FunctionRegistry;
use crate::scope::Iteration;
use crate::scope::ScopeStack;
use crate::tokens::ExpressionToken;
use crate::tokens::Operator;
use crate::tokens::PathRoot;
use crate::value::Value;

/// Evaluate `expression` against `scope` with only the native function
/// library available.
pub fn evaluate(expression: &str, scope: &ScopeStack) -> TagloomResult<Value> {
	let functions = FunctionRegistry::default();
	Evaluator::new(scope, &functions).evaluate(expression)
}

/// Everything an expression can see while it is evaluated. Paths resolve
/// against the scope stack at the moment of evaluation; nothing is cached
/// between two evaluations of the same string.
#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
	scope: &'a ScopeStack,
	functions: &'a FunctionRegistry,
	iteration: Option<&'a Iteration>,
}

impl<'a> Evaluator<'a> {
	pub fn new(scope: &'a ScopeStack, functions: &'a FunctionRegistry) -> Self {
		Self {
			scope,
			functions,
			iteration: None,
		}
	}

	#[must_use]
	pub fn with_iteration(mut self, iteration: Option<&'a Iteration>) -> Self {
		self.iteration = iteration;
		self
	}

	pub fn evaluate(&self, expression: &str) -> TagloomResult<Value> {
		let mut lexer = Lexer::new(expression, *self);
		for (position, character) in expression.chars().enumerate() {
			while !lexer.input(character, position)? {}
		}
		lexer.end_of_input()
	}
}

/// States of the character-driven lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexerState {
	/// Between tokens.
	Empty,
	/// Inside a quoted string.
	String { quote: char, escaped: bool },
	/// Inside a name.
	Symbol,
	/// Inside a numeric literal.
	Number { seen_dot: bool },
	/// After a `.` in operand position: relative path or decimal number.
	Dot,
	/// After `..`.
	DotDot,
	/// After a `/` inside a path, expecting the next step.
	PathSlash,
}

enum StackEntry {
	Operator(Operator),
	LeftParen,
	Function {
		name: String,
		arity: usize,
		operand_base: usize,
	},
}

struct PendingPath {
	root: PathRoot,
	steps: Vec<String>,
}

/// The lexer feeds each token straight into an operator stack and an
/// operand stack (shunting-yard), reducing as soon as precedence allows.
struct Lexer<'e, 'a> {
	expression: &'e str,
	env: Evaluator<'a>,
	state: LexerState,
	buffer: String,
	path: Option<PendingPath>,
	operators: Vec<StackEntry>,
	operands: Vec<Value>,
	/// True when the next token must be an operand: at the start, after an
	/// operator, `(` or `,`. Decides unary versus binary signs and whether
	/// `/` is a path root or a division.
	expect_operand: bool,
}

impl<'e, 'a> Lexer<'e, 'a> {
	fn new(expression: &'e str, env: Evaluator<'a>) -> Self {
		Self {
			expression,
			env,
			state: LexerState::Empty,
			buffer: String::new(),
			path: None,
			operators: Vec::new(),
			operands: Vec::new(),
			expect_operand: true,
		}
	}

	/// Feed one character. Returns `false` when the character was not
	/// consumed and must be fed again in the new state.
	fn input(&mut self, character: char, position: usize) -> TagloomResult<bool> {
		match self.state {
			LexerState::Empty => self.input_empty(character, position),
			LexerState::String { quote, escaped } => {
				if escaped {
					self.buffer.push(character);
					self.state = LexerState::String {
						quote,
						escaped: false,
					};
				} else if character == '\\' {
					self.state = LexerState::String {
						quote,
						escaped: true,
					};
				} else if character == quote {
					let string = std::mem::take(&mut self.buffer);
					self.state = LexerState::Empty;
					self.accept(ExpressionToken::String(string))?;
				} else {
					self.buffer.push(character);
				}
				Ok(true)
			}
			LexerState::Symbol => {
				if is_name_char(character) {
					self.buffer.push(character);
					return Ok(true);
				}
				match character {
					'(' if self.path.is_none() => {
						let name = std::mem::take(&mut self.buffer);
						self.state = LexerState::Empty;
						self.accept(ExpressionToken::Function { name, arity: 0 })?;
						Ok(true)
					}
					'/' => {
						let step = std::mem::take(&mut self.buffer);
						self.accept(ExpressionToken::PathStep(step))?;
						self.state = LexerState::PathSlash;
						Ok(true)
					}
					_ => {
						self.finish_symbol()?;
						Ok(false)
					}
				}
			}
			LexerState::Number { seen_dot } => {
				if character.is_ascii_digit() {
					self.buffer.push(character);
					Ok(true)
				} else if character == '.' {
					if seen_dot {
						return Err(self.lexical_error(character, position));
					}
					self.buffer.push(character);
					self.state = LexerState::Number { seen_dot: true };
					Ok(true)
				} else if character.is_alphabetic() || character == '_' {
					Err(self.lexical_error(character, position))
				} else {
					self.finish_number()?;
					Ok(false)
				}
			}
			LexerState::Dot => {
				match character {
					'.' => {
						self.state = LexerState::DotDot;
						Ok(true)
					}
					'/' => {
						self.accept(ExpressionToken::PathRoot(PathRoot::Current))?;
						self.state = LexerState::PathSlash;
						Ok(true)
					}
					digit if digit.is_ascii_digit() => {
						self.buffer.push_str("0.");
						self.buffer.push(digit);
						self.state = LexerState::Number { seen_dot: true };
						Ok(true)
					}
					_ => {
						self.accept(ExpressionToken::PathRoot(PathRoot::Current))?;
						self.finish_path()?;
						Ok(false)
					}
				}
			}
			LexerState::DotDot => {
				self.accept(ExpressionToken::PathRoot(PathRoot::Parent))?;
				if character == '/' {
					self.state = LexerState::PathSlash;
					Ok(true)
				} else {
					self.finish_path()?;
					Ok(false)
				}
			}
			LexerState::PathSlash => {
				if character.is_alphanumeric() || character == '_' {
					self.buffer.push(character);
					self.state = LexerState::Symbol;
					Ok(true)
				} else {
					self.finish_path()?;
					Ok(false)
				}
			}
		}
	}

	fn input_empty(&mut self, character: char, position: usize) -> TagloomResult<bool> {
		match character {
			'\'' | '"' => {
				self.state = LexerState::String {
					quote: character,
					escaped: false,
				};
			}
			'+' | '-' => {
				let operator = if self.expect_operand {
					Operator::Sign(character)
				} else if character == '+' {
					Operator::Add
				} else {
					Operator::Sub
				};
				self.accept(ExpressionToken::Operator(operator))?;
			}
			'*' => self.accept(ExpressionToken::Operator(Operator::Mul))?,
			'/' => {
				if self.expect_operand {
					self.accept(ExpressionToken::PathRoot(PathRoot::Absolute))?;
					self.state = LexerState::PathSlash;
				} else {
					self.accept(ExpressionToken::Operator(Operator::Div))?;
				}
			}
			'(' => self.accept(ExpressionToken::LeftParen)?,
			')' => self.accept(ExpressionToken::RightParen)?,
			',' => self.accept(ExpressionToken::Comma)?,
			'.' => {
				if !self.expect_operand {
					return Err(self.lexical_error(character, position));
				}
				self.state = LexerState::Dot;
			}
			digit if digit.is_ascii_digit() => {
				self.buffer.push(digit);
				self.state = LexerState::Number { seen_dot: false };
			}
			letter if letter.is_alphabetic() || letter == '_' => {
				self.buffer.push(letter);
				self.state = LexerState::Symbol;
			}
			blank if blank.is_whitespace() => {}
			other => return Err(self.lexical_error(other, position)),
		}

		Ok(true)
	}

	fn end_of_input(mut self) -> TagloomResult<Value> {
		match self.state {
			LexerState::Empty => {}
			LexerState::String { .. } => {
				return Err(self.unexpected_end("unterminated string literal"));
			}
			LexerState::Symbol => self.finish_symbol()?,
			LexerState::Number { .. } => self.finish_number()?,
			LexerState::Dot => {
				self.accept(ExpressionToken::PathRoot(PathRoot::Current))?;
				self.finish_path()?;
			}
			LexerState::DotDot => {
				self.accept(ExpressionToken::PathRoot(PathRoot::Parent))?;
				self.finish_path()?;
			}
			LexerState::PathSlash => self.finish_path()?,
		}

		if self.operands.is_empty() && self.operators.is_empty() {
			return Ok(Value::Null);
		}

		if self
			.operators
			.iter()
			.any(|entry| matches!(entry, StackEntry::LeftParen | StackEntry::Function { .. }))
		{
			return Err(self.unexpected_end("unclosed parenthesis"));
		}

		if self.expect_operand {
			return Err(self.evaluation_error("expression ends with an operator"));
		}

		while let Some(StackEntry::Operator(operator)) = self.operators.pop() {
			self.apply(operator)?;
		}

		match (self.operands.pop(), self.operands.is_empty()) {
			(Some(value), true) => Ok(value),
			_ => Err(self.evaluation_error("missing operator between operands")),
		}
	}

	/// Push one token into the evaluation stacks.
	fn accept(&mut self, token: ExpressionToken) -> TagloomResult<()> {
		match token {
			ExpressionToken::String(string) => self.push_operand(Value::String(string)),
			ExpressionToken::Number(number) => self.push_operand(Value::Number(number)),
			ExpressionToken::PathRoot(root) => {
				if !self.expect_operand {
					return Err(self.evaluation_error("missing operator before path"));
				}
				self.path = Some(PendingPath {
					root,
					steps: Vec::new(),
				});
				Ok(())
			}
			ExpressionToken::PathStep(step) => {
				if let Some(path) = &mut self.path {
					path.steps.push(step);
					return Ok(());
				}
				if !self.expect_operand {
					return Err(self.evaluation_error(&format!(
						"missing operator before `{step}`"
					)));
				}
				self.path = Some(PendingPath {
					root: PathRoot::Scoped,
					steps: vec![step],
				});
				Ok(())
			}
			ExpressionToken::Operator(operator) => self.push_operator(operator),
			ExpressionToken::LeftParen => {
				if !self.expect_operand {
					return Err(self.evaluation_error("missing operator before `(`"));
				}
				self.operators.push(StackEntry::LeftParen);
				Ok(())
			}
			ExpressionToken::RightParen => {
				if self.close_parenthesis()? {
					Ok(())
				} else {
					Err(self.evaluation_error("unbalanced `)`"))
				}
			}
			ExpressionToken::Function { name, arity } => {
				if !self.expect_operand {
					return Err(self.evaluation_error(&format!(
						"missing operator before `{name}(`"
					)));
				}
				self.operators.push(StackEntry::Function {
					name,
					arity,
					operand_base: self.operands.len(),
				});
				Ok(())
			}
			ExpressionToken::Comma => self.increment_last_function_arity(),
		}
	}

	fn push_operand(&mut self, value: Value) -> TagloomResult<()> {
		if !self.expect_operand {
			return Err(self.evaluation_error("missing operator between operands"));
		}
		self.operands.push(value);
		self.expect_operand = false;
		Ok(())
	}

	fn push_operator(&mut self, operator: Operator) -> TagloomResult<()> {
		if operator.is_unary() {
			self.operators.push(StackEntry::Operator(operator));
			return Ok(());
		}

		if self.expect_operand {
			return Err(self.evaluation_error(&format!("missing operand before `{operator}`")));
		}

		while let Some(StackEntry::Operator(top)) = self.operators.last() {
			let top = *top;
			let reduce = top.precedence() > operator.precedence()
				|| (top.precedence() == operator.precedence()
					&& !operator.is_right_associative());
			if !reduce {
				break;
			}
			self.operators.pop();
			self.apply(top)?;
		}

		self.operators.push(StackEntry::Operator(operator));
		self.expect_operand = true;
		Ok(())
	}

	/// Reduce up to the innermost open group. Returns `false` when there is
	/// no open group to close.
	fn close_parenthesis(&mut self) -> TagloomResult<bool> {
		let empty_call = self.expect_operand
			&& matches!(
				self.operators.last(),
				Some(StackEntry::Function { operand_base, arity: 0, .. })
					if *operand_base == self.operands.len()
			);
		if self.expect_operand && !empty_call {
			return Err(self.evaluation_error("missing operand before `)`"));
		}

		loop {
			match self.operators.pop() {
				Some(StackEntry::Operator(operator)) => self.apply(operator)?,
				Some(StackEntry::LeftParen) => {
					self.expect_operand = false;
					return Ok(true);
				}
				Some(StackEntry::Function {
					name,
					arity,
					operand_base,
				}) => {
					let supplied = self.operands.len() - operand_base;
					let expected = if supplied == 0 { 0 } else { arity + 1 };
					if supplied != expected {
						return Err(self.evaluation_error(&format!(
							"malformed argument list for `{name}`"
						)));
					}
					let arguments = self.operands.split_off(operand_base);
					let value = self.call(&name, arguments)?;
					self.operands.push(value);
					self.expect_operand = false;
					return Ok(true);
				}
				None => return Ok(false),
			}
		}
	}

	fn increment_last_function_arity(&mut self) -> TagloomResult<()> {
		if self.expect_operand {
			return Err(self.evaluation_error("missing argument before `,`"));
		}

		loop {
			match self.operators.last_mut() {
				Some(StackEntry::Function { arity, .. }) => {
					*arity += 1;
					self.expect_operand = true;
					return Ok(());
				}
				Some(StackEntry::Operator(_)) => {
					if let Some(StackEntry::Operator(operator)) = self.operators.pop() {
						self.apply(operator)?;
					}
				}
				Some(StackEntry::LeftParen) | None => {
					return Err(self.evaluation_error("`,` outside of a function call"));
				}
			}
		}
	}

	fn finish_symbol(&mut self) -> TagloomResult<()> {
		let name = std::mem::take(&mut self.buffer);
		self.state = LexerState::Empty;

		if self.path.is_none() {
			let keyword = match name.as_str() {
				"true" => Some(Value::Bool(true)),
				"false" => Some(Value::Bool(false)),
				"null" => Some(Value::Null),
				_ => None,
			};
			if let Some(value) = keyword {
				return self.push_operand(value);
			}
		}

		self.accept(ExpressionToken::PathStep(name))?;
		self.finish_path()
	}

	fn finish_number(&mut self) -> TagloomResult<()> {
		let literal = std::mem::take(&mut self.buffer);
		self.state = LexerState::Empty;
		let number = literal
			.parse::<f64>()
			.map_err(|_| self.evaluation_error(&format!("invalid number `{literal}`")))?;
		self.accept(ExpressionToken::Number(number))
	}

	/// Resolve the pending path against the scope stack and push the result.
	fn finish_path(&mut self) -> TagloomResult<()> {
		self.state = LexerState::Empty;
		let Some(path) = self.path.take() else {
			return Ok(());
		};

		let scope = self.env.scope;
		let mut steps = path.steps.iter();
		let mut current = match path.root {
			PathRoot::Absolute => Some(scope.universe().clone()),
			PathRoot::Current => Some(scope.top().clone()),
			PathRoot::Parent => scope.parent().cloned(),
			PathRoot::Scoped => steps.next().and_then(|first| scope.lookup(first)),
		};

		for step in steps {
			current = current.and_then(|value| value.member(step));
		}

		self.push_operand(current.unwrap_or_default())
	}

	fn call(&self, name: &str, arguments: Vec<Value>) -> TagloomResult<Value> {
		let call = FunctionCall {
			name,
			scope: self.env.scope,
			iteration: self.env.iteration,
		};
		self.env.functions.call(&call, arguments)
	}

	fn apply(&mut self, operator: Operator) -> TagloomResult<()> {
		let value = if let Operator::Sign(sign) = operator {
			let operand = self
				.operands
				.pop()
				.ok_or_else(|| self.evaluation_error("missing operand"))?;
			let number = self.number(&operand, operator)?;
			Value::Number(if sign == '-' { -number } else { number })
		} else {
			let (Some(right), Some(left)) = (self.operands.pop(), self.operands.pop()) else {
				return Err(self.evaluation_error(&format!("missing operand for `{operator}`")));
			};
			self.binary(operator, &left, &right)?
		};

		self.operands.push(value);
		Ok(())
	}

	fn binary(&self, operator: Operator, left: &Value, right: &Value) -> TagloomResult<Value> {
		if operator == Operator::Add && (is_text(left) || is_text(right)) {
			return Ok(Value::String(format!(
				"{}{}",
				left.to_output_string(),
				right.to_output_string()
			)));
		}

		let left = self.number(left, operator)?;
		let right = self.number(right, operator)?;
		let result = match operator {
			Operator::Add => left + right,
			Operator::Sub => left - right,
			Operator::Mul => left * right,
			Operator::Div => {
				if right == 0.0 {
					return Err(self.evaluation_error("division by zero"));
				}
				left / right
			}
			Operator::Sign(_) => unreachable!("unary operators are applied separately"),
		};

		Ok(Value::Number(result))
	}

	fn number(&self, value: &Value, operator: Operator) -> TagloomResult<f64> {
		value.as_number().ok_or_else(|| {
			self.evaluation_error(&format!("`{operator}` expects numbers, got `{value}`"))
		})
	}

	fn lexical_error(&self, character: char, position: usize) -> TagloomError {
		TagloomError::Lexical {
			expression: self.expression.to_string(),
			character,
			position,
		}
	}

	fn unexpected_end(&self, reason: &str) -> TagloomError {
		TagloomError::UnexpectedEnd {
			expression: self.expression.to_string(),
			reason: reason.to_string(),
		}
	}

	fn evaluation_error(&self, message: &str) -> TagloomError {
		TagloomError::Evaluation {
			expression: self.expression.to_string(),
			message: message.to_string(),
		}
	}
}

fn is_name_char(character: char) -> bool {
	character.is_alphanumeric() || character == '_'
}

/// A string that does not read as a number turns `+` into concatenation.
fn is_text(value: &Value) -> bool {
	matches!(value, Value::String(_)) && value.as_number().is_none()
}
