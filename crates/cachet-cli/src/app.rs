use clap::{Parser, Subcommand};

use crate::get::GetArg;
use crate::key::KeyArg;

#[derive(Clone, Debug, Parser)]
#[command(name = "cachet", version = env!("CARGO_PKG_VERSION"), about, long_about = None, propagate_version = true)]
pub struct App {
    #[command(subcommand)]
    pub cmd: Commands,

    /// More log output; repeat for more.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    #[command(alias = "g", name = "get", about = "Fetch a URL through the cache")]
    Get(GetArg),
    #[command(alias = "k", name = "key", about = "Show the cache key and entry name of a request")]
    Key(KeyArg),
}

impl App {
    pub fn run(self) -> anyhow::Result<()> {
        match self.cmd {
            Commands::Get(arg) => arg.run(),
            Commands::Key(arg) => arg.run(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_is_well_formed() { App::command().debug_assert(); }

    #[test]
    fn test_verbose_is_global() {
        let app = App::try_parse_from(["cachet", "key", "http://a.test/", "-vv"]).unwrap();
        assert_eq!(app.verbose, 2);
        assert!(matches!(app.cmd, Commands::Key(_)));
    }

    #[test]
    fn test_alias() {
        let app = App::try_parse_from(["cachet", "g", "http://a.test/"]).unwrap();
        assert!(matches!(app.cmd, Commands::Get(_)));
    }
}
