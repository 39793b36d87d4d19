//! Wiring between a crew member and the tool handlers registered for it.
//! Handlers are user code (spec.md §9 "Tool handlers are plain functions
//! with async semantics"); this registry is how the dispatcher finds them.

use std::collections::HashMap;
use std::sync::Arc;

use crewline_crew::Tool;

pub trait ToolRegistry: Send + Sync {
    fn tools_for(&self, agent_name: &str, crew_name: &str) -> Vec<Arc<dyn Tool>>;
}

/// No crew has any tool handlers registered.
pub struct NoTools;

impl ToolRegistry for NoTools {
    fn tools_for(&self, _agent_name: &str, _crew_name: &str) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }
}

/// Simple registry keyed by `(agent, crew)`, for tests and small
/// deployments that wire tools up at startup.
#[derive(Default)]
pub struct StaticToolRegistry {
    tools: HashMap<(String, String), Vec<Arc<dyn Tool>>>,
}

impl StaticToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent_name: impl Into<String>, crew_name: impl Into<String>, tool: Arc<dyn Tool>) {
        self.tools
            .entry((agent_name.into(), crew_name.into()))
            .or_default()
            .push(tool);
    }
}

impl ToolRegistry for StaticToolRegistry {
    fn tools_for(&self, agent_name: &str, crew_name: &str) -> Vec<Arc<dyn Tool>> {
        self.tools
            .get(&(agent_name.to_string(), crew_name.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}
