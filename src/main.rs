mod builtin;
mod cli;
mod eval;
mod global;
mod job;
mod parser;
mod types;


use std::io;
use std::io::{IsTerminal, Read, Write};

use anyhow::{Context, Result};
use clap::Parser as _;
use log::warn;

use eval::EvalResult;
use parser::Next;

pub struct Session {
	pub prompt: Option<String>,
	pub chunk_size: usize,
}

fn report_jobs(state: &mut global::State) {
	for job in state.job_set.reap() {
		if job.status == 0 {
			eprintln!("[{}] done {}", job.id, job.description);
		} else {
			eprintln!("[{}] exit {} {}", job.id, job.status, job.description);
		}
	}
}

fn execute(state: &mut global::State, line: types::CommandLine) {
	match eval::run(state, line) {
		Ok(EvalResult::Done(_)) => {},
		Ok(EvalResult::Background(id)) => {
			if let Some(pid) = state.job_set.get(id).and_then(|j| j.last_pid()) {
				eprintln!("[{}] {}", id, pid);
			}
		},
		Err(e) => {
			warn!("line failed: {}", e);
			eprintln!("pish: {}", e);
			state.last_status = 1;
		},
	}
}

/// Runs every complete line buffered in `parser`. Returns false once the
/// session should end.
fn drain(state: &mut global::State, parser: &mut parser::Parser) -> bool {
	loop {
		match parser.pop_next() {
			Ok(Next::Line(line)) => {
				execute(state, line);
				if state.exit.is_some() {
					return false;
				}
			},
			Ok(Next::Blank) => {},
			Ok(Next::Incomplete) => return true,
			Err(e) => {
				eprintln!("pish: syntax error: {}", e);
				state.last_status = 2;
			},
		}
	}
}

/// Reads `input` to the end in chunks, running each line as it completes.
/// The prompt, if any, goes to `prompt_out`. Returns the status the shell
/// should exit with.
pub fn drive<R: Read, W: Write>(state: &mut global::State, mut input: R, mut prompt_out: W, session: &Session) -> io::Result<i32> {
	let mut parser = parser::Parser::new();
	let mut buf = vec![0u8; session.chunk_size.max(1)];
	loop {
		report_jobs(state);
		if let Some(ref prompt) = session.prompt {
			let _ = prompt_out.write_all(prompt.as_bytes());
			let _ = prompt_out.flush();
		}
		let n = loop {
			match input.read(&mut buf) {
				Ok(n) => break n,
				Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {},
				Err(e) => return Err(e),
			}
		};
		if n == 0 {
			if parser.has_pending() {
				parser.feed(b"\n");
				drain(state, &mut parser);
			}
			break;
		}
		parser.feed(&buf[.. n]);
		if !drain(state, &mut parser) {
			break;
		}
	}
	Ok(state.exit.unwrap_or(state.last_status))
}

fn main() -> Result<()> {
	env_logger::init();
	let cli = cli::Cli::parse();
	let mut state = global::State::new();
	let chunk_size = cli.chunk_size as usize;

	let code = match cli.command {
		Some(line) => {
			let session = Session { prompt: None, chunk_size: chunk_size };
			drive(&mut state, line.as_bytes(), io::stdout(), &session)?
		},
		None => {
			let stdin = io::stdin();
			let prompt = if !cli.no_prompt && stdin.is_terminal() { Some(cli.prompt) } else { None };
			let session = Session { prompt: prompt, chunk_size: chunk_size };
			drive(&mut state, stdin.lock(), io::stdout(), &session).context("reading standard input")?
		},
	};
	std::process::exit(code)
}
