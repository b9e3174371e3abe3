//! Wiring of the store, trading engine, and resolver behind the RPC
//! server.

use std::sync::Arc;

use veridex::{
    engine::TradingEngine,
    resolver::{Resolver, fetch::HttpFetcher},
    state::State,
};

use crate::config::Config;

#[derive(Clone)]
pub struct App {
    pub env: sneed::Env,
    pub state: State,
    pub engine: TradingEngine,
    pub resolver: Arc<Resolver>,
}

impl App {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let env_path = config.data_dir.join("data.mdb");
        std::fs::create_dir_all(&env_path)?;
        let env = {
            let mut env_open_opts = heed::EnvOpenOptions::new();
            env_open_opts
                .map_size(1024 * 1024 * 1024) // 1GB
                .max_dbs(State::NUM_DBS);
            unsafe { sneed::Env::open(&env_open_opts, &env_path) }?
        };
        let state = State::new(&env)?;
        let engine = TradingEngine::new(env.clone(), state.clone());
        let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout));
        let resolver =
            Arc::new(Resolver::new(env.clone(), state.clone(), fetcher));
        Ok(Self {
            env,
            state,
            engine,
            resolver,
        })
    }
}
