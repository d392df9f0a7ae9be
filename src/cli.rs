use clap::Parser;

#[derive(Parser)]
#[command(name = "pish", version, about = "A small pipeline shell")]
pub struct Cli {
	/// Run one command line and exit with its status
	#[arg(short = 'c', value_name = "LINE")]
	pub command: Option<String>,

	/// Prompt shown before each read when stdin is a terminal
	#[arg(long, default_value = "pish> ")]
	pub prompt: String,

	/// Never show the prompt
	#[arg(long)]
	pub no_prompt: bool,

	/// Bytes read from stdin at a time
	#[arg(long, default_value_t = 1024, value_parser = clap::value_parser!(u32).range(1..))]
	pub chunk_size: u32,
}
