//! Environment-variable configuration. The core surface takes no CLI
//! flags.

use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use veridex::resolver::{fetch, scheduler};

const DATA_DIR: &str = "VERIDEX_DATA_DIR";
const RPC_ADDR: &str = "VERIDEX_RPC_ADDR";
const SCHEDULER_ENABLED: &str = "VERIDEX_SCHEDULER_ENABLED";
const SCHEDULER_PERIOD_SECS: &str = "VERIDEX_SCHEDULER_PERIOD_SECS";
const FETCH_TIMEOUT_SECS: &str = "VERIDEX_FETCH_TIMEOUT_SECS";

#[derive(Clone, Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub rpc_addr: SocketAddr,
    pub scheduler_enabled: bool,
    pub scheduler_period: Duration,
    pub fetch_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let data_dir = match env::var_os(DATA_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from("veridex-data"),
        };
        let rpc_addr: SocketAddr = match env::var(RPC_ADDR) {
            Ok(addr) => addr
                .parse()
                .map_err(|err| anyhow::anyhow!("{RPC_ADDR}: {err}"))?,
            Err(_) => "127.0.0.1:6285".parse().expect("valid default addr"),
        };
        let scheduler_enabled = match env::var(SCHEDULER_ENABLED) {
            Ok(value) => !matches!(
                value.to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            ),
            Err(_) => true,
        };
        let scheduler_period = match env::var(SCHEDULER_PERIOD_SECS) {
            Ok(secs) => Duration::from_secs(
                secs.parse()
                    .map_err(|err| {
                        anyhow::anyhow!("{SCHEDULER_PERIOD_SECS}: {err}")
                    })?,
            ),
            Err(_) => scheduler::DEFAULT_PERIOD,
        };
        let fetch_timeout = match env::var(FETCH_TIMEOUT_SECS) {
            Ok(secs) => Duration::from_secs(secs.parse().map_err(|err| {
                anyhow::anyhow!("{FETCH_TIMEOUT_SECS}: {err}")
            })?),
            Err(_) => fetch::DEFAULT_FETCH_TIMEOUT,
        };
        Ok(Self {
            data_dir,
            rpc_addr,
            scheduler_enabled,
            scheduler_period,
            fetch_timeout,
        })
    }
}
