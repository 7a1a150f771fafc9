use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::store::Backend;

#[derive(Parser, Debug, Clone)]
#[command(name = "reelcount")]
#[command(version)]
#[command(about = "View counter service for movie and TV detail pages", long_about = None)]
pub struct Args {
    /// Config file (defaults to ./reelcount.yaml, then ~/.config/reelcount/config.yaml)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Storage backend for the view table
    #[arg(long, value_enum, global = true)]
    pub store: Option<Backend>,

    /// Location of the view table (database or JSON file)
    #[arg(long, value_name = "PATH", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP server
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the view count of one item
    Views {
        /// Content type: movie or tv
        #[arg(value_name = "TYPE")]
        content_type: String,

        /// Provider id of the item
        id: String,
    },

    /// Print the most viewed movies and shows as JSON
    Top,

    /// Merge a legacy views.txt JSON table into the configured store
    Import {
        /// Path to the legacy table
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

impl Args {
    /// Fold the global flags into a loaded config; flags win over file values
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(backend) = self.store {
            if backend != config.storage.backend && self.data.is_none() {
                // A path configured for another backend would point at the wrong file
                config.storage.path = None;
            }
            config.storage.backend = backend;
        }
        if let Some(ref data) = self.data {
            config.storage.path = Some(data.clone());
        }
        if let Some(Command::Serve { host, port }) = &self.command {
            if let Some(host) = host {
                config.server.host = host.clone();
            }
            if let Some(port) = port {
                config.server.port = *port;
            }
        }
    }
}
