//! Clap CLI definitions for topicmesh.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use topicmesh_types::Address;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  topicmesh master                          Run a master with the interactive shell
  topicmesh node talker --pub-topic chat    Publish \"Message <n>\" every 5 seconds
  topicmesh node listener --sub-topic chat  Print everything published on `chat`
  topicmesh arm-publisher                   Stream simulated arm joint angles
  topicmesh arm-monitor                     Render the arm from `arm_state`

\x1b[1;36mConfig:\x1b[0m
  ~/.topicmesh/config.toml (override with --config). RUST_LOG wins over log_level.";

/// topicmesh — master-mediated publish/subscribe.
#[derive(Parser)]
#[command(name = "topicmesh", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the master (topology directory and relay).
    Master {
        /// Address to listen on [default: from config, localhost:11511].
        #[arg(long)]
        listen: Option<Address>,
        /// Do not start the interactive shell.
        #[arg(long)]
        no_shell: bool,
    },
    /// Run a generic node that publishes and/or prints a topic.
    Node {
        /// Node name, unique within the master.
        name: String,
        #[command(flatten)]
        endpoints: NodeEndpoints,
        /// Publish "Message <n>" to this topic.
        #[arg(long)]
        pub_topic: Option<String>,
        /// Print every message received on this topic.
        #[arg(long)]
        sub_topic: Option<String>,
        /// Seconds between two published messages.
        #[arg(long, default_value_t = 5.0)]
        interval_secs: f64,
    },
    /// Publish simulated two-joint arm states to `arm_state`.
    ArmPublisher {
        #[arg(long, default_value = "arm_state_publisher")]
        name: String,
        #[command(flatten)]
        endpoints: NodeEndpoints,
        /// Publish rate.
        #[arg(long, default_value_t = 20.0)]
        rate_hz: f64,
    },
    /// Subscribe to `arm_state` and render the arm in the terminal.
    ArmMonitor {
        #[arg(long, default_value = "robot_visualizer")]
        name: String,
        #[command(flatten)]
        endpoints: NodeEndpoints,
    },
}

/// Address overrides shared by every node command.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct NodeEndpoints {
    /// Address to listen on [default: from config, localhost:0].
    #[arg(long)]
    pub listen: Option<Address>,
    /// Master address [default: from config, localhost:11511].
    #[arg(long)]
    pub master: Option<Address>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_node_command() {
        let cli = Cli::try_parse_from([
            "topicmesh",
            "node",
            "talker",
            "--master",
            "127.0.0.1:12000",
            "--pub-topic",
            "chat",
        ])
        .unwrap();
        match cli.command {
            Commands::Node {
                name,
                endpoints,
                pub_topic,
                sub_topic,
                interval_secs,
            } => {
                assert_eq!(name, "talker");
                assert_eq!(endpoints.master, Some(Address::new("127.0.0.1", 12000)));
                assert_eq!(endpoints.listen, None);
                assert_eq!(pub_topic.as_deref(), Some("chat"));
                assert!(sub_topic.is_none());
                assert_eq!(interval_secs, 5.0);
            }
            _ => panic!("Expected node command"),
        }
    }

    #[test]
    fn bad_address_is_rejected() {
        assert!(Cli::try_parse_from(["topicmesh", "master", "--listen", "no-port"]).is_err());
    }
}
