//! CLI command definitions

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "wardbus")]
#[command(about = "Revocable sessions and live event routing", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Credential signing secret
    #[arg(long, env = "WARDBUS_SECRET", global = true, hide_env_values = true)]
    pub secret: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the wardbus server
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "0.0.0.0:8080", env = "WARDBUS_BIND")]
        bind: String,

        /// Credential lifetime in seconds
        #[arg(long, default_value_t = 3600, env = "WARDBUS_SESSION_TTL")]
        session_ttl: u64,

        /// Seconds between sweeps of expired revocation markers
        #[arg(long, default_value_t = 60, env = "WARDBUS_SWEEP_INTERVAL")]
        sweep_interval: u64,

        /// Outbound queue depth per connection
        #[arg(long, default_value_t = 100, env = "WARDBUS_QUEUE_DEPTH")]
        queue_depth: usize,

        /// Mark session cookies Secure
        #[arg(long, env = "WARDBUS_SECURE_COOKIES")]
        secure_cookies: bool,

        /// Seconds a socket without a header credential may wait for its auth message
        #[arg(long, default_value_t = 10, env = "WARDBUS_AUTH_TIMEOUT")]
        auth_timeout: u64,
    },

    /// Mint a credential for a subject
    ///
    /// Examples:
    ///   wardbus issue u1 --role reporter
    ///   wardbus issue a1 --role administrator --ttl 600
    Issue {
        /// Subject id
        subject: String,

        /// Role: reporter, handler, or administrator
        #[arg(short, long, value_parser = parse_role)]
        role: String,

        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },

    /// Decode and check a credential without touching the ledger
    Verify {
        /// Credential token
        token: String,
    },

    /// Revoke a credential until it expires
    Revoke {
        /// Credential token
        token: String,
    },

    /// Remove expired revocation markers
    Purge,

    /// Initialize the database schema
    Init,

    /// Show ledger status
    Status,
}

fn parse_role(s: &str) -> Result<String, String> {
    wardbus::Role::parse(s)
        .map(|role| role.as_str().to_string())
        .ok_or_else(|| format!("Invalid role: {}. Must be reporter, handler, or administrator", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_issue() {
        let cli = Cli::try_parse_from(["wardbus", "issue", "h1", "--role", "officer"]).unwrap();
        match cli.command {
            Commands::Issue { subject, role, ttl } => {
                assert_eq!(subject, "h1");
                assert_eq!(role, "handler");
                assert_eq!(ttl, 3600);
            }
            _ => panic!("expected issue"),
        }
    }

    #[test]
    fn test_rejects_unknown_role() {
        assert!(Cli::try_parse_from(["wardbus", "issue", "h1", "--role", "mayor"]).is_err());
    }
}
