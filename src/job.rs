use log::{info, warn};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

pub trait WaitStatusExt {
	/// Shell-style status of a terminated process, `None` while it runs.
	fn code(&self) -> Option<i32>;
}

impl WaitStatusExt for WaitStatus {
	fn code(&self) -> Option<i32> {
		match *self {
			WaitStatus::Exited(_, code) => Some(code),
			WaitStatus::Signaled(_, sig, _) => Some(128 + sig as i32),
			_ => None,
		}
	}
}

/// Blocks until `pid` terminates.
pub fn wait_pid(pid: Pid) -> nix::Result<i32> {
	loop {
		match waitpid(pid, None) {
			Err(Errno::EINTR) => continue,
			Err(e) => return Err(e),
			Ok(status) => if let Some(code) = status.code() {
				return Ok(code);
			},
		}
	}
}

fn poll_pid(pid: Pid) -> nix::Result<Option<i32>> {
	loop {
		match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
			Err(Errno::EINTR) => continue,
			r => return r.map(|s| s.code()),
		}
	}
}

#[derive(Debug)]
struct Proccess {
	pid: Pid,
	status: Option<i32>,
}

#[derive(Debug)]
pub struct Job {
	proccesses: Vec<Proccess>,
	description: String,
}

impl Job {
	fn is_done(&self) -> bool {
		self.proccesses.iter().all(|pr| pr.status.is_some())
	}

	pub fn last_pid(&self) -> Option<Pid> {
		self.proccesses.last().map(|pr| pr.pid)
	}
}

#[derive(Debug, PartialEq, Eq)]
pub struct Finished {
	pub id: usize,
	pub description: String,
	pub status: i32,
}

/// Background jobs not yet reaped. Ids are slot numbers starting at 1 and
/// are reused once a job is reaped.
#[derive(Debug, Default)]
pub struct JobSet {
	jobs: Vec<Option<Job>>,
}

impl JobSet {
	pub fn new() -> JobSet {
		JobSet::default()
	}

	pub fn is_empty(&self) -> bool {
		self.jobs.is_empty()
	}

	pub fn get(&self, id: usize) -> Option<&Job> {
		id.checked_sub(1).and_then(|i| self.jobs.get(i)).and_then(|j| j.as_ref())
	}

	pub fn push(&mut self, pids: Vec<Pid>, description: String) -> usize {
		assert!(!pids.is_empty());
		let job = Job {
			proccesses: pids.into_iter().map(|pid| Proccess { pid: pid, status: None }).collect(),
			description: description,
		};
		let idx = if let Some(i) = self.jobs.iter().position(|j| j.is_none()) {
			self.jobs[i] = Some(job);
			i
		} else {
			self.jobs.push(Some(job));
			self.jobs.len() - 1
		};
		idx + 1
	}

	/// Collects every background process that has terminated without
	/// blocking, and returns the jobs that are now complete.
	pub fn reap(&mut self) -> Vec<Finished> {
		let mut finished = vec![];
		for (i, slot) in self.jobs.iter_mut().enumerate() {
			let done = match *slot {
				Some(ref mut job) => {
					for pr in job.proccesses.iter_mut().filter(|pr| pr.status.is_none()) {
						match poll_pid(pr.pid) {
							Ok(status) => pr.status = status,
							Err(e) => {
								warn!("lost track of background pid {}: {}", pr.pid, e);
								pr.status = Some(0);
							},
						}
					}
					job.is_done()
				},
				None => false,
			};
			if done {
				if let Some(job) = slot.take() {
					let status = job.proccesses.last().and_then(|pr| pr.status).unwrap_or(0);
					info!("background job {} finished with status {}", i + 1, status);
					finished.push(Finished { id: i + 1, description: job.description, status: status });
				}
			}
		}
		let len = self.jobs.iter().rposition(|j| j.is_some()).map_or(0, |i| i + 1);
		self.jobs.truncate(len);
		finished
	}
}
