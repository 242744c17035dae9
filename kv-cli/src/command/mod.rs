use clap::Subcommand;

/// One-shot operations runnable without entering the REPL, each executed as
/// its own single-statement transaction.
#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
    /// Fetch the value for a key.
    Get { key: String },
    /// Insert or overwrite a key's value.
    Set { key: String, value: String },
    /// Remove a key.
    #[clap(alias = "del")]
    Delete { key: String },
}
