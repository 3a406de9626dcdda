use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ackd",
    about = "Ackchain: signed acknowledgments and their delivery workers",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true, default_value = "ackd.toml")]
    pub config: PathBuf,

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
    /// Run the webhook, email and cleanup workers until Ctrl-C
    Serve(ServeArgs),
    /// Verify document hash chains
    Verify(VerifyArgs),
    /// Generate an Ed25519 signing key
    Keygen(KeygenArgs),
    /// List dead-lettered deliveries of a tenant
    DeadLetters(DeadLettersArgs),
    /// Re-publish document.signed events from committed records
    ReplayEvents(ReplayArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Skip schema migration on startup
    #[arg(long)]
    pub no_migrate: bool,
}

#[derive(Args)]
pub struct VerifyArgs {
    #[arg(long, required_unless_present = "all", conflicts_with = "all")]
    pub doc: Option<String>,
    #[arg(long)]
    pub all: bool,
    /// Hex public key; derived from the configured signing key when omitted
    #[arg(long)]
    pub public_key: Option<String>,
}

#[derive(Args)]
pub struct KeygenArgs {
    #[arg(short, long)]
    pub out: PathBuf,
    /// Overwrite an existing key file
    #[arg(long)]
    pub force: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum QueueName {
    Webhook,
    Email,
}

#[derive(Args)]
pub struct DeadLettersArgs {
    #[arg(long)]
    pub tenant: String,
    #[arg(long, default_value = "webhook")]
    pub queue: QueueName,
    #[arg(short = 'n', long, default_value = "50")]
    pub limit: u32,
}

#[derive(Args)]
pub struct ReplayArgs {
    /// Only this document; all documents when omitted
    #[arg(long)]
    pub doc: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serve() {
        let cli = Cli::try_parse_from(["ackd", "serve", "-c", "/etc/ackd.toml"]).unwrap();
        assert!(matches!(cli.command, Command::Serve(ServeArgs { no_migrate: false })));
        assert_eq!(cli.config, PathBuf::from("/etc/ackd.toml"));
    }

    #[test]
    fn parse_verify_doc() {
        let cli = Cli::try_parse_from(["ackd", "verify", "--doc", "policy-2025"]).unwrap();
        if let Command::Verify(args) = cli.command {
            assert_eq!(args.doc.as_deref(), Some("policy-2025"));
            assert!(!args.all);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn verify_needs_doc_or_all() {
        assert!(Cli::try_parse_from(["ackd", "verify"]).is_err());
        assert!(Cli::try_parse_from(["ackd", "verify", "--all", "--doc", "d"]).is_err());
        assert!(Cli::try_parse_from(["ackd", "verify", "--all"]).is_ok());
    }

    #[test]
    fn parse_dead_letters() {
        let cli = Cli::try_parse_from([
            "ackd", "dead-letters", "--tenant", "acme", "--queue", "email", "-n", "5",
        ])
        .unwrap();
        if let Command::DeadLetters(args) = cli.command {
            assert_eq!(args.tenant, "acme");
            assert_eq!(args.queue, QueueName::Email);
            assert_eq!(args.limit, 5);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_keygen_and_json_format() {
        let cli =
            Cli::try_parse_from(["ackd", "--format", "json", "keygen", "--out", "k.hex"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Command::Keygen(_)));
    }

    #[test]
    fn parse_replay_all() {
        let cli = Cli::try_parse_from(["ackd", "replay-events", "--verbose"]).unwrap();
        assert!(cli.verbose);
        if let Command::ReplayEvents(args) = cli.command {
            assert!(args.doc.is_none());
        } else {
            panic!("wrong command");
        }
    }
}
