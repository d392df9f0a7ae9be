use std::ffi::{CString, NulError};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use libc::c_char;
use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd::{self, ForkResult, Pid};

use crate::builtin;
use crate::global;
use crate::job;
use crate::types::*;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
	#[error("cannot create pipe: {0}")]
	Pipe(#[source] nix::Error),
	#[error("cannot fork: {0}")]
	Fork(#[source] nix::Error),
	#[error("cannot wait for child: {0}")]
	Wait(#[source] nix::Error),
	#[error("{path}: {source}")]
	Redirect { path: String, #[source] source: io::Error },
	#[error("argument contains a NUL byte")]
	InteriorNul(#[from] NulError),
	#[error("malformed command line")]
	Malformed,
}

#[derive(Debug, PartialEq, Eq)]
pub enum EvalResult {
	/// Foreground line finished with this status.
	Done(i32),
	/// Line detached as the given background job.
	Background(usize),
}

/// A command with its `execvp` arguments laid out before `fork`, so the
/// child never allocates.
struct Prepared {
	file: CString,
	_argv: Vec<CString>,
	argv_ptrs: Vec<*const c_char>,
	not_found: Vec<u8>,
	not_executable: Vec<u8>,
}

impl Prepared {
	fn new(command: &Command) -> Result<Prepared, NulError> {
		let file = CString::new(command.program.as_bytes())?;
		let mut argv = command.args.iter()
			.map(|a| CString::new(a.as_bytes()))
			.collect::<Result<Vec<_>, _>>()?;
		if argv.is_empty() {
			argv.push(file.clone());
		}
		let argv_ptrs = argv.iter().map(|a| a.as_ptr()).chain(Some(ptr::null())).collect();
		Ok(Prepared {
			file: file,
			_argv: argv,
			argv_ptrs: argv_ptrs,
			not_found: format!("pish: {}: command not found\n", command.program).into_bytes(),
			not_executable: format!("pish: {}: cannot execute\n", command.program).into_bytes(),
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate { Always, OnSuccess, OnFailure }

impl Gate {
	fn admits(self, status: i32) -> bool {
		match self {
			Gate::Always => true,
			Gate::OnSuccess => status == 0,
			Gate::OnFailure => status != 0,
		}
	}
}

/// Commands joined by pipes, run only if `gate` admits the previous status.
struct Stage {
	gate: Gate,
	commands: Vec<Prepared>,
}

fn plan(line: &CommandLine) -> Result<Vec<Stage>, ExecError> {
	let mut stages = vec![Stage { gate: Gate::Always, commands: vec![] }];
	let mut expect_command = true;
	for expr in &line.exprs {
		let gate = match *expr {
			Expr::Command(ref cmd) => {
				if !expect_command || cmd.program.is_empty() {
					return Err(ExecError::Malformed);
				}
				if let Some(stage) = stages.last_mut() {
					stage.commands.push(Prepared::new(cmd)?);
				}
				expect_command = false;
				continue;
			},
			Expr::Pipe => None,
			Expr::And => Some(Gate::OnSuccess),
			Expr::Or => Some(Gate::OnFailure),
		};
		if expect_command {
			return Err(ExecError::Malformed);
		}
		if let Some(gate) = gate {
			stages.push(Stage { gate: gate, commands: vec![] });
		}
		expect_command = true;
	}
	if expect_command {
		return Err(ExecError::Malformed);
	}
	Ok(stages)
}

fn open_output(output: &Output) -> Result<Option<OwnedFd>, ExecError> {
	let mut oopt = OpenOptions::new();
	let path = match *output {
		Output::Stdout => return Ok(None),
		Output::NewFile(ref path) => {
			oopt.write(true).create(true).truncate(true);
			path
		},
		Output::AppendFile(ref path) => {
			oopt.append(true).create(true);
			path
		},
	};
	let redirect_err = |e: io::Error| ExecError::Redirect { path: path.clone(), source: e };
	let file = oopt.open(path).map_err(redirect_err)?;
	let fd = lift(OwnedFd::from(file)).map_err(|e| redirect_err(io::Error::from(e)))?;
	Ok(Some(fd))
}

/// Moves a descriptor that landed on 0, 1 or 2 above them, so a child's
/// `dup2` onto stdin or stdout never clobbers another source.
fn lift(fd: OwnedFd) -> nix::Result<OwnedFd> {
	if fd.as_raw_fd() > libc::STDERR_FILENO {
		return Ok(fd);
	}
	let raw = Errno::result(unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, libc::STDERR_FILENO + 1) })?;
	Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Runs in the forked child. Only async-signal-safe calls from here on.
unsafe fn exec_child(cmd: &Prepared, stdin: Option<RawFd>, stdout: Option<RawFd>) -> ! {
	for &(fd, target) in &[(stdin, libc::STDIN_FILENO), (stdout, libc::STDOUT_FILENO)] {
		let ok = match fd {
			None => true,
			Some(fd) if fd == target => libc::fcntl(fd, libc::F_SETFD, 0) >= 0,
			Some(fd) => libc::dup2(fd, target) >= 0,
		};
		if !ok {
			libc::_exit(126);
		}
	}
	libc::execvp(cmd.file.as_ptr(), cmd.argv_ptrs.as_ptr());
	let (msg, code) = if Errno::last() == Errno::ENOENT {
		(&cmd.not_found, 127)
	} else {
		(&cmd.not_executable, 126)
	};
	libc::write(libc::STDERR_FILENO, msg.as_ptr() as *const libc::c_void, msg.len());
	libc::_exit(code)
}

fn spawn(cmd: &Prepared, stdin: Option<&OwnedFd>, stdout: Option<&OwnedFd>) -> Result<Pid, ExecError> {
	match unsafe { unistd::fork() }.map_err(ExecError::Fork)? {
		ForkResult::Parent { child } => Ok(child),
		ForkResult::Child => unsafe {
			exec_child(cmd, stdin.map(|fd| fd.as_raw_fd()), stdout.map(|fd| fd.as_raw_fd()))
		},
	}
}

/// Forks one process per command, left to right. Each pipe is created just
/// before the segment that writes into it; the parent drops every endpoint
/// right after the fork, keeping only the read end for the next segment.
fn spawn_all(commands: &[Prepared], stdout: Option<OwnedFd>, pids: &mut Vec<Pid>) -> Result<(), ExecError> {
	let mut stdout = stdout;
	commands.iter().enumerate().try_fold(None, |prev_read: Option<OwnedFd>, (i, cmd)| -> Result<Option<OwnedFd>, ExecError> {
		let (next_read, write) = if i + 1 < commands.len() {
			let (r, w) = unistd::pipe2(OFlag::O_CLOEXEC).map_err(ExecError::Pipe)?;
			(Some(lift(r).map_err(ExecError::Pipe)?), Some(lift(w).map_err(ExecError::Pipe)?))
		} else {
			(None, stdout.take())
		};
		let pid = spawn(cmd, prev_read.as_ref(), write.as_ref())?;
		debug!("spawned {:?} as pid {}", cmd.file, pid);
		pids.push(pid);
		Ok(next_read)
	})?;
	Ok(())
}

fn wait_all(pids: &[Pid]) -> Result<i32, ExecError> {
	let mut last = 0;
	let mut failure = None;
	for &pid in pids {
		match job::wait_pid(pid) {
			Ok(code) => last = code,
			Err(e) => {
				warn!("waiting for pid {}: {}", pid, e);
				failure.get_or_insert(e);
			},
		}
	}
	match failure {
		Some(e) => Err(ExecError::Wait(e)),
		None => Ok(last),
	}
}

/// Spawns a stage. If spawning stops part way, the segments already
/// running are waited for before the error is returned.
fn spawn_stage(stage: &Stage, stdout: Option<OwnedFd>) -> Result<Vec<Pid>, ExecError> {
	let mut pids = Vec::with_capacity(stage.commands.len());
	if let Err(e) = spawn_all(&stage.commands, stdout, &mut pids) {
		let _ = wait_all(&pids);
		return Err(e);
	}
	Ok(pids)
}

fn run_stages(stages: &[Stage], output: &Output) -> Result<i32, ExecError> {
	let mut status = 0;
	for (i, stage) in stages.iter().enumerate() {
		if !stage.gate.admits(status) {
			debug!("skipping stage {} after status {}", i, status);
			continue;
		}
		let stdout = if i + 1 == stages.len() { open_output(output)? } else { None };
		let pids = spawn_stage(stage, stdout)?;
		status = wait_all(&pids)?;
	}
	Ok(status)
}

/// Forks a sub-shell that runs a gated line to completion on its own.
fn spawn_subshell(stages: &[Stage], output: &Output) -> Result<Pid, ExecError> {
	match unsafe { unistd::fork() }.map_err(ExecError::Fork)? {
		ForkResult::Parent { child } => Ok(child),
		ForkResult::Child => {
			let code = run_stages(stages, output).unwrap_or_else(|e| {
				let _ = writeln!(&mut io::stderr(), "pish: {}", e);
				126
			});
			unsafe { libc::_exit(code) }
		},
	}
}

fn as_builtin(line: &CommandLine) -> Option<(builtin::Builtin, &Command)> {
	if line.background || line.output != Output::Stdout || line.exprs.len() != 1 {
		return None;
	}
	match line.exprs[0] {
		Expr::Command(ref cmd) => builtin::match_builtin(&cmd.program).map(|b| (b, cmd)),
		_ => None,
	}
}

/// Executes one command line. Foreground lines are waited for and report
/// the status of their last segment; background lines are handed to the
/// job table.
pub fn run(state: &mut global::State, line: CommandLine) -> Result<EvalResult, ExecError> {
	if let Some((func, cmd)) = as_builtin(&line) {
		let s = func(state, &cmd.args);
		state.last_status = s;
		return Ok(EvalResult::Done(s));
	}

	let stages = plan(&line)?;
	if line.background {
		let pids = if stages.len() == 1 {
			spawn_stage(&stages[0], open_output(&line.output)?)?
		} else {
			vec![spawn_subshell(&stages, &line.output)?]
		};
		let id = state.job_set.push(pids, line.to_string());
		state.last_status = 0;
		return Ok(EvalResult::Background(id));
	}

	let s = run_stages(&stages, &line.output)?;
	state.last_status = s;
	Ok(EvalResult::Done(s))
}
