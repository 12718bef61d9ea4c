//! CLI command definitions

use clap::{Args, Parser, Subcommand};
use commentbus_client::DEFAULT_CHANNEL;

#[derive(Parser)]
#[command(name = "commentbus")]
#[command(about = "Realtime comments bridge", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Topic to serve, publish to or follow
    #[arg(long, env = "COMMENTBUS_CHANNEL", default_value = DEFAULT_CHANNEL, global = true)]
    pub channel: String,
}

/// Broker settings needed wherever credentials are issued
#[derive(Args, Clone)]
pub struct BrokerArgs {
    /// Broker API key
    #[arg(long, env = "COMMENTBUS_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Broker HTTP host the credential is bound to
    #[arg(long, env = "COMMENTBUS_HTTP_HOST")]
    pub http_host: String,

    /// Broker realtime host handed to subscribers
    #[arg(long, env = "COMMENTBUS_REALTIME_HOST")]
    pub realtime_host: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the bridge server
    Serve {
        /// Address to bind to
        #[arg(short, long, env = "COMMENTBUS_BIND", default_value = "127.0.0.1:3000")]
        bind: String,

        #[command(flatten)]
        broker: BrokerArgs,

        /// Talk plain HTTP to the ingress (DANGEROUS - only for local testing)
        #[arg(long)]
        dangerous_plaintext: bool,
    },

    /// Print a realtime grant for the topic
    Token {
        #[command(flatten)]
        broker: BrokerArgs,
    },

    /// Publish one comment through a bridge server
    ///
    /// Examples:
    ///   commentbus publish --author Alice 'Great article!'
    Publish {
        /// Comment text
        content: String,

        /// Author name
        #[arg(short, long, default_value = "Current User")]
        author: String,

        /// Bridge server base URL
        #[arg(long, env = "COMMENTBUS_URL", default_value = "http://127.0.0.1:3000")]
        url: String,
    },

    /// Follow the topic and print comments as they arrive
    Tail {
        /// Bridge server base URL (token service)
        #[arg(long, env = "COMMENTBUS_URL", default_value = "http://127.0.0.1:3000")]
        url: String,

        /// Wait for connection_ack before subscribing
        #[arg(long)]
        await_ack: bool,

        /// Reconnect with backoff after a transport failure
        #[arg(long)]
        reconnect: bool,

        /// Connect with ws:// instead of wss:// (DANGEROUS - only for local testing)
        #[arg(long)]
        dangerous_plaintext: bool,
    },
}
