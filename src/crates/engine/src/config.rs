//! Engine configuration

use std::time::Duration;

/// Tunables of the workflow executor
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on simultaneously running nodes
    pub max_concurrent: usize,

    /// Deadline of one execution attempt (not applied to human nodes,
    /// whose configured approval timeout governs)
    pub node_timeout: Duration,

    /// Upper bound on one persistence-hook invocation before it is
    /// abandoned and logged
    pub persist_timeout: Duration,

    /// Also persist the `running` transition of each node (off by
    /// default: only terminal transitions are recorded)
    pub persist_running: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            node_timeout: Duration::from_secs(300),
            persist_timeout: Duration::from_secs(5),
            persist_running: false,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden from `STRAND_MAX_CONCURRENT`,
    /// `STRAND_NODE_TIMEOUT_SECS`, and `STRAND_PERSIST_RUNNING`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(Some(n)) = tooling::config::get_env_parse::<usize>("STRAND_MAX_CONCURRENT") {
            config.max_concurrent = n.max(1);
        }
        if let Ok(Some(secs)) = tooling::config::get_env_parse::<u64>("STRAND_NODE_TIMEOUT_SECS") {
            config.node_timeout = Duration::from_secs(secs);
        }
        if let Ok(Some(flag)) = tooling::config::get_env_parse::<bool>("STRAND_PERSIST_RUNNING") {
            config.persist_running = flag;
        }
        config
    }

    /// Set the concurrency bound
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Set the per-attempt node deadline
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    /// Enable persisting `running` transitions
    pub fn with_persist_running(mut self, persist_running: bool) -> Self {
        self.persist_running = persist_running;
        self
    }
}
