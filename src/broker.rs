//! Broker Façade: the single public entry point the out-of-scope chat
//! front-end calls. Wraps `Pool` with the shutdown/sweep lifecycle this
//! repo wires through `ctrlc` in `run_node`.

use std::sync::Arc;

use crate::container::ContainerRuntime;
use crate::pool::{Pool, PoolConfig};

pub struct Broker {
    pool: Arc<Pool>,
    image: String,
    runtime: Arc<dyn ContainerRuntime>,
}

impl Broker {
    /// Spawns the pool's scheduler task and returns immediately.
    pub fn new(config: PoolConfig, runtime: Arc<dyn ContainerRuntime>) -> Broker {
        let image = config.image.clone();
        let pool = Pool::new(config, runtime.clone());
        Broker {
            pool,
            image,
            runtime,
        }
    }

    /// The single public entry point: submit a `(language, code, args)`
    /// triple and await its result string. Never returns an `Err` — every
    /// failure path already resolves to a canned message.
    pub async fn submit(
        &self,
        language: impl Into<String>,
        code: impl Into<Vec<u8>>,
        args: impl Into<String>,
    ) -> String {
        let source = crate::core::model::Source {
            language: language.into(),
            code: code.into(),
            args: args.into(),
        };
        self.pool.submit(source).await
    }

    /// Draining in-flight leases is left to the caller awaiting
    /// already-issued `submit` futures; this only sweeps any containers
    /// left over from a prior crash. Returns the count reclaimed.
    pub async fn shutdown(self) -> usize {
        match self.runtime.sweep(&self.image).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("sweep failed during shutdown: {e}");
                0
            }
        }
    }
}
