//! Application state wiring the engine to the concrete infra implementations.

use tesflow_core::workflow::WorkflowEngine;
use tesflow_infra::store::RunStore;
use tesflow_infra::tool::build_registry;
use tesflow_types::config::EngineConfig;

/// Engine pinned to the runtime-selected run store.
pub type ConcreteEngine = WorkflowEngine<RunStore>;

pub struct AppState {
    pub engine: ConcreteEngine,
}

impl AppState {
    /// Build the tool registry and run store from `config` and wire the engine.
    pub fn init(config: EngineConfig) -> Self {
        let tools = build_registry(&config);
        let store = RunStore::from_config(&config);
        if !store.is_persistent() {
            tracing::debug!("run state persistence disabled, runs are kept in memory");
        }
        Self {
            engine: WorkflowEngine::new(store, tools, config),
        }
    }

    pub fn persistent(&self) -> bool {
        self.engine.repo().is_persistent()
    }
}
