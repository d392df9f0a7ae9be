use std::fmt;

use crate::parser::ParseError;

/// One executable step. `args[0]` is the program name, as in `argv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
	pub program: String,
	pub args: Vec<String>,
}

impl Command {
	pub fn new<S: Into<String>>(program: S) -> Command {
		let program = program.into();
		let args = vec![program.clone()];
		Command { program: program, args: args }
	}

	#[cfg(test)]
	pub fn arg<S: Into<String>>(mut self, arg: S) -> Command {
		self.args.push(arg.into());
		self
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
	Command(Command),
	Pipe,
	And,
	Or,
}

impl Expr {
	pub fn is_command(&self) -> bool {
		match *self {
			Expr::Command(..) => true,
			_ => false,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
	Stdout,
	NewFile(String),
	AppendFile(String),
}

/// A complete, validated command line. Build one with `LineBuilder` or get
/// one from `Parser::pop_next`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
	pub exprs: Vec<Expr>,
	pub output: Output,
	pub background: bool,
}

impl fmt::Display for CommandLine {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for (i, expr) in self.exprs.iter().enumerate() {
			if i != 0 {
				f.write_str(" ")?;
			}
			match *expr {
				Expr::Command(ref c) => f.write_str(&c.args.join(" "))?,
				Expr::Pipe => f.write_str("|")?,
				Expr::And => f.write_str("&&")?,
				Expr::Or => f.write_str("||")?,
			}
		}
		match self.output {
			Output::Stdout => {},
			Output::NewFile(ref path) => write!(f, " > {}", path)?,
			Output::AppendFile(ref path) => write!(f, " >> {}", path)?,
		}
		if self.background {
			f.write_str(" &")?;
		}
		Ok(())
	}
}

/// Accumulates one line left to right, rejecting anything that would break
/// a `CommandLine` invariant at the moment it is pushed.
#[derive(Debug, Default)]
pub struct LineBuilder {
	exprs: Vec<Expr>,
	output: Option<Output>,
	background: bool,
}

impl LineBuilder {
	pub fn new() -> LineBuilder {
		LineBuilder::default()
	}

	fn has_modifier(&self) -> bool {
		self.output.is_some() || self.background
	}

	pub fn word<S: Into<String>>(&mut self, word: S) -> Result<&mut LineBuilder, ParseError> {
		if self.has_modifier() {
			return Err(ParseError::ConflictingTrailingModifier);
		}
		let word = word.into();
		if word.is_empty() {
			return Err(ParseError::EmptyWord);
		}
		match self.exprs.last_mut() {
			Some(&mut Expr::Command(ref mut cmd)) => cmd.args.push(word),
			_ => self.exprs.push(Expr::Command(Command::new(word))),
		}
		Ok(self)
	}

	fn check_left_operand(&self) -> Result<(), ParseError> {
		match self.exprs.last() {
			None => Err(ParseError::OperatorWithNoLeftOperand),
			Some(e) if !e.is_command() => Err(ParseError::OperatorAfterOperator),
			Some(_) => Ok(()),
		}
	}

	fn operator(&mut self, op: Expr) -> Result<&mut LineBuilder, ParseError> {
		if self.has_modifier() {
			return Err(ParseError::ConflictingTrailingModifier);
		}
		self.check_left_operand()?;
		self.exprs.push(op);
		Ok(self)
	}

	pub fn pipe(&mut self) -> Result<&mut LineBuilder, ParseError> {
		self.operator(Expr::Pipe)
	}

	pub fn and(&mut self) -> Result<&mut LineBuilder, ParseError> {
		self.operator(Expr::And)
	}

	pub fn or(&mut self) -> Result<&mut LineBuilder, ParseError> {
		self.operator(Expr::Or)
	}

	pub fn redirect(&mut self, output: Output) -> Result<&mut LineBuilder, ParseError> {
		if self.has_modifier() {
			return Err(ParseError::ConflictingTrailingModifier);
		}
		self.check_left_operand()?;
		self.output = Some(output);
		Ok(self)
	}

	pub fn background(&mut self) -> Result<&mut LineBuilder, ParseError> {
		if self.background {
			return Err(ParseError::ConflictingTrailingModifier);
		}
		self.check_left_operand()?;
		self.background = true;
		Ok(self)
	}

	/// Closes the line. An empty builder yields `None`.
	pub fn finish(self) -> Result<Option<CommandLine>, ParseError> {
		match self.exprs.last() {
			None => return Ok(None),
			Some(e) if !e.is_command() => return Err(ParseError::LineEndsWithOperator),
			Some(_) => {},
		}
		Ok(Some(CommandLine {
			exprs: self.exprs,
			output: self.output.unwrap_or(Output::Stdout),
			background: self.background,
		}))
	}
}
