use clap::Parser;
use clap::builder::Styles;
use clap::builder::styling::AnsiColor;

use crate::args::srv::SrvArgs;
use crate::config::Config;

/// Defines the styles used for the CLI help output.
const HELP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Blue.on_default().bold())
    .usage(AnsiColor::Blue.on_default().bold())
    .literal(AnsiColor::White.on_default())
    .placeholder(AnsiColor::Green.on_default());

#[derive(Parser, Debug, PartialEq, Default)]
#[command(
    about,
    version,
    after_help = "Use RUST_LOG environment variable to control logging level, e.g. RUST_LOG=debug or RUST_LOG=plansight=debug. Detection tuning is read from the environment (OPENROUTER_API_KEY, TILE_SIZE_PX, ...).",
    styles = HELP_STYLES
)]
pub struct Args {
    #[command(flatten)]
    pub srv: SrvArgs,
}

impl Args {
    pub fn merge_into_config(self, config: &mut Config) {
        self.srv.merge_into_config(&mut config.srv);
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser as _;

    use super::*;

    #[test]
    fn parses_listen_addresses() {
        let args = Args::parse_from(["plansight", "--listen-addresses", "127.0.0.1:1234"]);
        let mut config = Config::default();
        args.merge_into_config(&mut config);
        assert_eq!(config.srv.listen_addresses.as_deref(), Some("127.0.0.1:1234"));
    }

    #[test]
    fn no_args_leaves_defaults() {
        let args = Args::parse_from(["plansight"]);
        let mut config = Config::default();
        args.merge_into_config(&mut config);
        assert_eq!(config, Config::default());
    }
}
