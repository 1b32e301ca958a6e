use crate::config::{KEEP_ALIVE_DEFAULT, LISTEN_ADDRESSES_DEFAULT, SrvConfig};

#[derive(clap::Args, Debug, PartialEq, Default)]
#[command(about, version)]
pub struct SrvArgs {
    #[arg(help = format!("Connection keep alive timeout. [DEFAULT: {KEEP_ALIVE_DEFAULT}]"), short, long)]
    pub keep_alive: Option<u64>,
    #[arg(help = format!("The socket address to bind. [DEFAULT: {LISTEN_ADDRESSES_DEFAULT}]"), short, long)]
    pub listen_addresses: Option<String>,
    /// Number of web server workers
    #[arg(short = 'W', long)]
    pub workers: Option<usize>,
}

impl SrvArgs {
    pub(crate) fn merge_into_config(self, srv_config: &mut SrvConfig) {
        // Override config values with the ones from the command line
        if self.keep_alive.is_some() {
            srv_config.keep_alive = self.keep_alive;
        }
        if self.listen_addresses.is_some() {
            srv_config.listen_addresses = self.listen_addresses;
        }
        if self.workers.is_some() {
            srv_config.worker_processes = self.workers;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_override_config() {
        let mut config = SrvConfig {
            keep_alive: Some(30),
            listen_addresses: None,
            worker_processes: Some(2),
        };
        let args = SrvArgs {
            keep_alive: None,
            listen_addresses: Some("127.0.0.1:9000".to_string()),
            workers: Some(4),
        };
        args.merge_into_config(&mut config);
        assert_eq!(config.keep_alive, Some(30));
        assert_eq!(config.listen_addresses.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(config.worker_processes, Some(4));
    }
}
