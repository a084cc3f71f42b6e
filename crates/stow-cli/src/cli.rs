use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use stow_persist::DEFAULT_KEY_PREFIX;

#[derive(Parser)]
#[command(
    name = "stow",
    about = "Inspect and maintain persisted application state",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Storage file
    #[arg(short, long, global = true, default_value = "stow.json")]
    pub file: PathBuf,

    /// Values in the file are zstd-compressed
    #[arg(long, global = true)]
    pub compressed: bool,

    /// Namespace prefix of persisted keys
    #[arg(long, global = true, default_value = DEFAULT_KEY_PREFIX)]
    pub prefix: String,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List persisted keys
    Keys(KeysArgs),
    /// Print the value stored for a key
    Get(GetArgs),
    /// Store a JSON value under a key
    Set(SetArgs),
    /// Remove persisted keys (all of them if none are named)
    Purge(PurgeArgs),
    /// Show the state a restore would produce for an options file
    Load(LoadArgs),
    /// Validate a persistence options file
    CheckConfig(CheckConfigArgs),
}

#[derive(Args)]
pub struct KeysArgs {
    /// Include keys outside the prefix, unstripped
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct GetArgs {
    pub key: String,
    /// Print the stored string as is
    #[arg(long)]
    pub raw: bool,
}

#[derive(Args)]
pub struct SetArgs {
    pub key: String,
    pub value: String,
}

#[derive(Args)]
pub struct PurgeArgs {
    pub keys: Vec<String>,
}

#[derive(Args)]
pub struct LoadArgs {
    pub options: PathBuf,
}

#[derive(Args)]
pub struct CheckConfigArgs {
    pub options: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keys_defaults() {
        let cli = Cli::try_parse_from(["stow", "keys"]).unwrap();
        assert!(matches!(cli.command, Command::Keys(KeysArgs { all: false })));
        assert_eq!(cli.file, PathBuf::from("stow.json"));
        assert_eq!(cli.prefix, DEFAULT_KEY_PREFIX);
        assert!(!cli.compressed);
    }

    #[test]
    fn parse_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stow", "get", "drafts", "--file", "/tmp/s.json", "--compressed", "--raw",
        ])
        .unwrap();
        assert_eq!(cli.file, PathBuf::from("/tmp/s.json"));
        assert!(cli.compressed);
        if let Command::Get(args) = cli.command {
            assert_eq!(args.key, "drafts");
            assert!(args.raw);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_set() {
        let cli = Cli::try_parse_from(["stow", "set", "settings", r#"{"theme":"dark"}"#]).unwrap();
        if let Command::Set(args) = cli.command {
            assert_eq!(args.key, "settings");
            assert_eq!(args.value, r#"{"theme":"dark"}"#);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_purge_keys() {
        let cli = Cli::try_parse_from(["stow", "purge", "a", "b"]).unwrap();
        if let Command::Purge(args) = cli.command {
            assert_eq!(args.keys, vec!["a", "b"]);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_check_config() {
        let cli = Cli::try_parse_from(["stow", "check-config", "persist.toml"]).unwrap();
        assert!(matches!(cli.command, Command::CheckConfig(_)));
    }

    #[test]
    fn parse_json_format_and_prefix() {
        let cli =
            Cli::try_parse_from(["stow", "--format", "json", "--prefix", "app:", "keys"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.prefix, "app:");
    }
}
