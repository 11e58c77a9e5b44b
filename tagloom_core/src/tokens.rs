use std::fmt::Display;

/// Where a path starts resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot {
	/// `/`: the universe layer.
	Absolute,
	/// `.`: the top layer.
	Current,
	/// `..`: the layer below the top.
	Parent,
	/// A bare name, scanned through every layer.
	Scoped,
}

/// Binary and unary operators of the expression language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
	/// Unary `+` or `-`, recorded with its sign.
	Sign(char),
	Add,
	Sub,
	Mul,
	Div,
}

impl Operator {
	pub fn precedence(self) -> u8 {
		match self {
			Operator::Add | Operator::Sub => 1,
			Operator::Mul | Operator::Div => 2,
			Operator::Sign(_) => 3,
		}
	}

	pub fn is_unary(self) -> bool {
		matches!(self, Operator::Sign(_))
	}

	/// Unary operators are right associative: `--3` applies the inner sign
	/// first.
	pub fn is_right_associative(self) -> bool {
		self.is_unary()
	}
}

impl Display for Operator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Operator::Sign(sign) => write!(f, "{sign}"),
			Operator::Add => write!(f, "+"),
			Operator::Sub => write!(f, "-"),
			Operator::Mul => write!(f, "*"),
			Operator::Div => write!(f, "/"),
		}
	}
}

/// One lexical unit of an expression. Tokens are produced one at a time by
/// the lexer state machine and consumed immediately by the evaluation
/// stacks; no token list outlives an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionToken {
	/// `'text'` or `"text"`
	String(String),
	/// `12`, `3.5`, `.5`
	Number(f64),
	/// `/`, `.`, `..`
	PathRoot(PathRoot),
	/// A name inside a path, e.g. `title` in `/page/title`.
	PathStep(String),
	Operator(Operator),
	LeftParen,
	RightParen,
	/// A function name followed by `(`, with the running argument count.
	Function { name: String, arity: usize },
	/// `,`
	Comma,
}

impl Display for ExpressionToken {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ExpressionToken::String(string) => write!(f, "'{string}'"),
			ExpressionToken::Number(number) => write!(f, "{number}"),
			ExpressionToken::PathRoot(PathRoot::Absolute) => write!(f, "/"),
			ExpressionToken::PathRoot(PathRoot::Current) => write!(f, "."),
			ExpressionToken::PathRoot(PathRoot::Parent) => write!(f, ".."),
			ExpressionToken::PathRoot(PathRoot::Scoped) => Ok(()),
			ExpressionToken::PathStep(name) => write!(f, "{name}"),
			ExpressionToken::Operator(operator) => write!(f, "{operator}"),
			ExpressionToken::LeftParen => write!(f, "("),
			ExpressionToken::RightParen => write!(f, ")"),
			ExpressionToken::Function { name, .. } => write!(f, "{name}("),
			ExpressionToken::Comma => write!(f, ","),
		}
	}
}
