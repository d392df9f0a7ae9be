use std::env;

use crate::global;

pub type Builtin = fn(&mut global::State, &[String]) -> i32;

pub fn builtin_cd(_: &mut global::State, args: &[String]) -> i32 {
	let target = match args.get(1) {
		Some(dir) => dir.clone(),
		None => match env::var("HOME") {
			Ok(home) => home,
			Err(_) => {
				eprintln!("pish: cd: HOME not set");
				return 1;
			},
		},
	};
	match env::set_current_dir(&target) {
		Ok(()) => 0,
		Err(e) => {
			eprintln!("pish: cd: {}: {}", target, e);
			1
		},
	}
}

pub fn builtin_exit(state: &mut global::State, args: &[String]) -> i32 {
	let code = match args.get(1).map(|s| s.parse::<i32>()) {
		None => state.last_status,
		Some(Ok(n)) => n,
		Some(Err(_)) => {
			eprintln!("pish: exit: {}: numeric argument required", args[1]);
			2
		},
	};
	state.exit = Some(code);
	code
}

pub fn match_builtin(name: &str) -> Option<Builtin> {
	match name {
		"cd" => Some(builtin_cd),
		"exit" => Some(builtin_exit),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn args(v: &[&str]) -> Vec<String> {
		v.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn exit_defaults_to_last_status() {
		let mut state = global::State::new();
		state.last_status = 4;
		assert_eq!(builtin_exit(&mut state, &args(&["exit"])), 4);
		assert_eq!(state.exit, Some(4));
	}

	#[test]
	fn exit_rejects_non_numeric_code() {
		let mut state = global::State::new();
		assert_eq!(builtin_exit(&mut state, &args(&["exit", "soon"])), 2);
		assert_eq!(state.exit, Some(2));
	}

	#[test]
	fn cd_changes_directory() {
		let _guard = crate::test::lock();
		let orig = env::current_dir().unwrap();
		let dir = tempfile::tempdir().unwrap();
		let mut state = global::State::new();
		let target = dir.path().to_string_lossy().into_owned();
		assert_eq!(builtin_cd(&mut state, &args(&["cd", &target])), 0);
		assert_eq!(env::current_dir().unwrap().canonicalize().unwrap(), dir.path().canonicalize().unwrap());
		assert_eq!(builtin_cd(&mut state, &args(&["cd", "/no/such/dir/for/pish"])), 1);
		env::set_current_dir(orig).unwrap();
	}

	#[test]
	fn only_known_names_match() {
		assert!(match_builtin("cd").is_some());
		assert!(match_builtin("exit").is_some());
		assert!(match_builtin("ls").is_none());
	}
}
