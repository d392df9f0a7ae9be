use crate::job;

pub struct State {
	pub job_set: job::JobSet,
	/// Status of the most recent foreground line.
	pub last_status: i32,
	/// Set by the `exit` builtin; the driver stops once it sees it.
	pub exit: Option<i32>,
}

impl State {
	pub fn new() -> State {
		let job_set = job::JobSet::new();
		State { job_set: job_set, last_status: 0, exit: None }
	}
}
