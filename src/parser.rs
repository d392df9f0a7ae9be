use log::{debug, trace, warn};

use crate::types::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
	#[error("operator with no left operand")]
	OperatorWithNoLeftOperand,
	#[error("operator after operator")]
	OperatorAfterOperator,
	#[error("line ends with an operator")]
	LineEndsWithOperator,
	#[error("unexpected token after redirection or '&'")]
	ConflictingTrailingModifier,
	#[error("redirection without a target")]
	MissingRedirectTarget,
	#[error("empty word")]
	EmptyWord,
}

pub type ParseResult<T> = Result<T, ParseError>;

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
	Word(&'a [u8]),
	Pipe,
	And,
	Or,
	RedirectOut { path: &'a [u8], append: bool },
	Background,
	NewLine,
}

/// What `Parser::pop_next` found at the front of the buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Next {
	Line(CommandLine),
	/// A terminated line holding nothing but blanks.
	Blank,
	/// No line terminator buffered yet; nothing was consumed.
	Incomplete,
}

struct Lexer<'a> {
	line: &'a [u8],
	i: usize,
}

impl<'a> Lexer<'a> {
	fn proceed_while<F>(&mut self, f: F) where F: Fn(u8, Option<u8>) -> bool {
		while let Some(&c) = self.line.get(self.i) {
			if !f(c, self.line.get(self.i + 1).cloned()) { break; }
			self.i += 1;
		}
	}

	fn is_blank(c: u8, next: Option<u8>) -> bool {
		match c {
			b' ' | b'\t' => true,
			b'\r' => next != Some(b'\n'),
			_ => false,
		}
	}

	fn is_letter(c: u8, next: Option<u8>) -> bool {
		match c {
			b'|' | b'&' | b'>' | b'\n' => false,
			_ => !Lexer::is_blank(c, next) && c != b'\r',
		}
	}

	fn peek_at(&self, offset: usize) -> Option<u8> {
		self.line.get(self.i + offset).cloned()
	}

	fn skip_blanks(&mut self) {
		self.proceed_while(Lexer::is_blank);
	}

	fn read_word(&mut self) -> &'a [u8] {
		let orig = self.i;
		self.proceed_while(Lexer::is_letter);
		&self.line[orig .. self.i]
	}

	/// Steps over a one or two byte operator; true if it was doubled.
	fn doubled(&mut self, c: u8) -> bool {
		if self.peek_at(1) == Some(c) {
			self.i += 2;
			true
		} else {
			self.i += 1;
			false
		}
	}

	fn next_token(&mut self) -> ParseResult<Token<'a>> {
		self.skip_blanks();
		let token = match self.peek_at(0) {
			None => Token::NewLine,
			Some(b'\n') => {
				self.i += 1;
				Token::NewLine
			},
			Some(b'\r') => {
				self.i += 2;
				Token::NewLine
			},
			Some(b'|') => if self.doubled(b'|') { Token::Or } else { Token::Pipe },
			Some(b'&') => if self.doubled(b'&') { Token::And } else { Token::Background },
			Some(b'>') => {
				let append = self.doubled(b'>');
				self.skip_blanks();
				let path = self.read_word();
				if path.is_empty() {
					return Err(ParseError::MissingRedirectTarget);
				}
				Token::RedirectOut { path: path, append: append }
			},
			Some(_) => Token::Word(self.read_word()),
		};
		trace!("token: {:?}", token);
		Ok(token)
	}
}

fn owned(bytes: &[u8]) -> String {
	String::from_utf8_lossy(bytes).into_owned()
}

/// Parses one terminated line. `line` must end with its terminator.
fn parse_line(line: &[u8]) -> ParseResult<Option<CommandLine>> {
	let mut lexer = Lexer { line: line, i: 0 };
	let mut builder = LineBuilder::new();
	loop {
		match lexer.next_token()? {
			Token::Word(w) => { builder.word(owned(w))?; },
			Token::Pipe => { builder.pipe()?; },
			Token::And => { builder.and()?; },
			Token::Or => { builder.or()?; },
			Token::RedirectOut { path, append } => {
				let path = owned(path);
				builder.redirect(if append { Output::AppendFile(path) } else { Output::NewFile(path) })?;
			},
			Token::Background => { builder.background()?; },
			Token::NewLine => { return builder.finish(); },
		}
	}
}

/// Incremental parser over one input stream. Bytes go in with `feed` in
/// chunks of any size; complete lines come out of `pop_next`.
#[derive(Debug, Default)]
pub struct Parser {
	buffer: Vec<u8>,
	/// Start of the unconsumed bytes.
	start: usize,
	/// Bytes in `buffer[start..scanned]` are known to contain no `\n`.
	scanned: usize,
}

impl Parser {
	pub fn new() -> Parser {
		Parser::default()
	}

	pub fn feed(&mut self, bytes: &[u8]) {
		if self.start != 0 {
			self.buffer.drain(.. self.start);
			self.scanned -= self.start;
			self.start = 0;
		}
		self.buffer.extend_from_slice(bytes);
	}

	/// Whether unterminated bytes other than blanks are buffered.
	pub fn has_pending(&self) -> bool {
		self.buffer[self.start ..].iter().any(|&c| !matches!(c, b' ' | b'\t' | b'\r' | b'\n'))
	}

	/// Extracts the next line. Consumes the line and its terminator on
	/// every outcome except `Incomplete`, so a malformed line is skipped.
	pub fn pop_next(&mut self) -> ParseResult<Next> {
		let end = match self.buffer[self.scanned ..].iter().position(|&c| c == b'\n') {
			Some(n) => self.scanned + n + 1,
			None => {
				self.scanned = self.buffer.len();
				return Ok(Next::Incomplete);
			},
		};
		let result = parse_line(&self.buffer[self.start .. end]);
		self.start = end;
		self.scanned = end;
		match result {
			Ok(Some(line)) => {
				debug!("parsed line: {}", line);
				Ok(Next::Line(line))
			},
			Ok(None) => Ok(Next::Blank),
			Err(e) => {
				warn!("discarding malformed line: {}", e);
				Err(e)
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse_all(parser: &mut Parser) -> Vec<ParseResult<Next>> {
		let mut out = vec![];
		loop {
			match parser.pop_next() {
				Ok(Next::Incomplete) => return out,
				r => out.push(r),
			}
		}
	}

	fn parse_str(input: &str) -> Vec<ParseResult<Next>> {
		let mut parser = Parser::new();
		parser.feed(input.as_bytes());
		parse_all(&mut parser)
	}

	fn line(input: &str) -> CommandLine {
		match parse_str(input).pop() {
			Some(Ok(Next::Line(l))) => l,
			r => panic!("expected a line from {:?}, got {:?}", input, r),
		}
	}

	#[test]
	fn pipeline_of_two_commands() {
		let l = line("ls -l | grep foo\n");
		assert_eq!(l.exprs, vec![
			Expr::Command(Command { program: "ls".into(), args: vec!["ls".into(), "-l".into()] }),
			Expr::Pipe,
			Expr::Command(Command { program: "grep".into(), args: vec!["grep".into(), "foo".into()] }),
		]);
		assert_eq!(l.output, Output::Stdout);
		assert!(!l.background);
	}

	#[test]
	fn blank_line_is_not_an_error() {
		let mut parser = Parser::new();
		parser.feed(b"   \t \n");
		assert_eq!(parser.pop_next(), Ok(Next::Blank));
		assert_eq!(parser.pop_next(), Ok(Next::Incomplete));
		assert!(!parser.has_pending());
	}

	#[test]
	fn incomplete_line_consumes_nothing() {
		let mut parser = Parser::new();
		parser.feed(b"echo hel");
		assert_eq!(parser.pop_next(), Ok(Next::Incomplete));
		assert!(parser.has_pending());
		parser.feed(b"lo\n");
		assert_eq!(parser.pop_next(), Ok(Next::Line(line("echo hello\n"))));
		assert_eq!(parser.pop_next(), Ok(Next::Incomplete));
	}

	#[test]
	fn leading_pipe_is_reported_and_skipped() {
		let results = parse_str("| foo\nls\n");
		assert_eq!(results.len(), 2);
		assert_eq!(results[0], Err(ParseError::OperatorWithNoLeftOperand));
		assert_eq!(results[1], Ok(Next::Line(line("ls\n"))));
	}

	#[test]
	fn redirection_without_target() {
		assert_eq!(parse_str("a | b >\n"), vec![Err(ParseError::MissingRedirectTarget)]);
		assert_eq!(parse_str("a >> | b\n"), vec![Err(ParseError::MissingRedirectTarget)]);
	}

	#[test]
	fn syntax_errors() {
		let cases: &[(&str, ParseError)] = &[
			("&& a\n", ParseError::OperatorWithNoLeftOperand),
			("> f\n", ParseError::OperatorWithNoLeftOperand),
			("&\n", ParseError::OperatorWithNoLeftOperand),
			("a | | b\n", ParseError::OperatorAfterOperator),
			("a || && b\n", ParseError::OperatorAfterOperator),
			("a | > f\n", ParseError::OperatorAfterOperator),
			("a |\n", ParseError::LineEndsWithOperator),
			("a &&\n", ParseError::LineEndsWithOperator),
			("a > f > g\n", ParseError::ConflictingTrailingModifier),
			("a > f b\n", ParseError::ConflictingTrailingModifier),
			("a & b\n", ParseError::ConflictingTrailingModifier),
			("a & &\n", ParseError::ConflictingTrailingModifier),
			("a & > f\n", ParseError::ConflictingTrailingModifier),
			("a > f | b\n", ParseError::ConflictingTrailingModifier),
		];
		for &(input, ref err) in cases {
			let full = format!("{}ok\n", input);
			let results = parse_str(&full);
			assert_eq!(results.len(), 2, "{:?}", input);
			assert_eq!(&results[0], &Err(err.clone()), "{:?}", input);
			assert_eq!(results[1], Ok(Next::Line(line("ok\n"))), "{:?}", input);
		}
	}

	#[test]
	fn control_operators_and_modifiers() {
		let l = line("make && ./run || echo failed >> log &\n");
		assert_eq!(l.exprs, vec![
			Expr::Command(Command::new("make")),
			Expr::And,
			Expr::Command(Command::new("./run")),
			Expr::Or,
			Expr::Command(Command::new("echo").arg("failed")),
		]);
		assert_eq!(l.output, Output::AppendFile("log".into()));
		assert!(l.background);
	}

	#[test]
	fn operators_split_words() {
		let l = line("a|b&&c>out\n");
		assert_eq!(l.to_string(), "a | b && c > out");
		assert_eq!(l.output, Output::NewFile("out".into()));
	}

	#[test]
	fn crlf_terminates_and_lone_cr_is_blank() {
		let results = parse_str("echo\ra b\r\nls\r\n");
		assert_eq!(results, vec![
			Ok(Next::Line(line("echo a b\n"))),
			Ok(Next::Line(line("ls\n"))),
		]);
	}

	#[test]
	fn chunking_does_not_change_results() {
		let stream = "ls -l | grep foo\n\n| bad\r\ncat a>>b &\necho x && false || true > o\nx | \n";
		let whole = parse_str(stream);
		assert_eq!(whole.len(), 6);

		for size in 1 .. 8 {
			let mut parser = Parser::new();
			let mut chunked = vec![];
			for chunk in stream.as_bytes().chunks(size) {
				parser.feed(chunk);
				chunked.extend(parse_all(&mut parser));
			}
			assert_eq!(chunked, whole, "chunk size {}", size);
		}
	}

	#[test]
	fn non_utf8_bytes_are_replaced() {
		let mut parser = Parser::new();
		parser.feed(b"echo \xff\n");
		match parser.pop_next() {
			Ok(Next::Line(l)) => assert_eq!(l.to_string(), "echo \u{fffd}"),
			r => panic!("unexpected {:?}", r),
		}
	}
}
