use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Chathub: credential vault and conversational connector hub
#[derive(Parser)]
#[command(name = "chathub", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to CHATHUB_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Keep all state in memory instead of Postgres
        #[arg(long)]
        in_memory: bool,
    },

    /// Print a fresh 64-hex-char master key for CHATHUB_MASTER_KEY
    Keygen,

    /// Inspect stored credentials
    Credential {
        #[command(subcommand)]
        command: CredentialCommands,
    },

    /// Manage chatbots
    Chatbot {
        #[command(subcommand)]
        command: ChatbotCommands,
    },
}

#[derive(Subcommand)]
pub enum CredentialCommands {
    /// List credentials of an organization (no secret material is shown)
    List {
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        service_type: Option<String>,
    },
    /// Re-run the connectivity test of a stored credential
    Test {
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum ChatbotCommands {
    /// Create a chatbot
    Create {
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        name: String,
    },
    /// Attach a connector to a chatbot
    Link {
        #[arg(long)]
        org: Uuid,
        #[arg(long)]
        chatbot: Uuid,
        #[arg(long)]
        connector: Uuid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_flags() {
        let cli = Cli::try_parse_from(["chathub", "serve", "--port", "9000", "--in-memory"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Serve { port: Some(9000), in_memory: true })
        ));
    }

    #[test]
    fn parses_chatbot_link() {
        let org = Uuid::new_v4();
        let bot = Uuid::new_v4();
        let conn = Uuid::new_v4();
        let cli = Cli::try_parse_from([
            "chathub", "chatbot", "link",
            "--org", &org.to_string(),
            "--chatbot", &bot.to_string(),
            "--connector", &conn.to_string(),
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Chatbot { command: ChatbotCommands::Link { chatbot, .. } }) => {
                assert_eq!(chatbot, bot)
            }
            _ => panic!("expected chatbot link"),
        }
    }

    #[test]
    fn rejects_bad_uuid() {
        assert!(Cli::try_parse_from(["chathub", "credential", "test", "--org", "x", "--id", "y"]).is_err());
    }
}
