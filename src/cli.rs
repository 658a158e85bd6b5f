use clap::Parser;

/// Black-box scenario runner for the /register, /login and /me account API
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML suite file
    #[arg(short, long, default_value = "suites/auth.toml")]
    pub path: String,

    /// Overrides `setup.base_url` from the suite file
    #[arg(long)]
    pub base_url: Option<String>,

    /// Only run scenarios whose name contains this text
    #[arg(long)]
    pub scenario: Option<String>,

    /// Run scenarios concurrently. Steps inside a scenario stay sequential
    #[arg(long)]
    pub parallel: bool,

    /// Log requests and responses to stderr
    #[arg(short, long)]
    pub verbose: bool,
}
