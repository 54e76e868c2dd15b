//! Tool Registry - central registration and dispatch for built-in tools
//! (spec.md §4.3). Near-verbatim structure of `aof-tools/src/registry.rs`,
//! adapted to `conclave_core::tool`'s trait shape
//! (`Tool::definition`/`ToolExecutor::execute_tool`).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult, Tool, ToolDefinition, ToolExecutor, ToolInput, ToolResult};
use tracing::{debug, warn};

/// Registry is effectively read-only after initialization (spec.md §5):
/// tools are registered during setup, then only looked up during dispatch.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> &mut Self {
        let name = tool.definition().name.clone();
        debug!(tool = %name, "registering tool");
        self.tools.insert(name, Arc::new(tool));
        self
    }

    pub fn register_boxed(&mut self, tool: Box<dyn Tool>) -> &mut Self {
        let name = tool.definition().name.clone();
        self.tools.insert(name, Arc::from(tool));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn list_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn into_executor(self) -> BuiltinToolExecutor {
        BuiltinToolExecutor::new(self)
    }

    pub fn as_executor(&self) -> BuiltinToolExecutor {
        BuiltinToolExecutor {
            tools: self.tools.clone(),
        }
    }
}

/// Executor backing a single [`ToolRegistry`] (spec.md §4.3 `Invoke`).
/// Policy gating happens inside each tool's `execute` (construction-time
/// allowlist), so dispatch here is a plain lookup-and-call.
pub struct BuiltinToolExecutor {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl BuiltinToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { tools: registry.tools }
    }

    pub fn from_tools(tools: Vec<Box<dyn Tool>>) -> Self {
        let mut map = HashMap::new();
        for tool in tools {
            map.insert(tool.definition().name.clone(), Arc::from(tool));
        }
        Self { tools: map }
    }
}

#[async_trait]
impl ToolExecutor for BuiltinToolExecutor {
    async fn execute_tool(&self, name: &str, input: ToolInput) -> ConclaveResult<ToolResult> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ConclaveError::not_found(format!("tool {name:?} not found")))?;

        debug!(tool = %name, "executing tool");
        let start = std::time::Instant::now();
        match tool.execute(input).await {
            Ok(result) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(tool = %name, elapsed_ms = elapsed, success = result.success, "tool execution complete");
                Ok(result.with_execution_time(elapsed))
            }
            Err(e) => {
                warn!(tool = %name, error = %e, "tool execution failed");
                Err(e)
            }
        }
    }

    fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }
}

/// Combines multiple executors (e.g. built-in tools alongside an
/// MCP-backed executor added downstream), first-match-wins.
#[derive(Default)]
pub struct CompositeToolExecutor {
    executors: Vec<Box<dyn ToolExecutor>>,
}

impl CompositeToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_executor<E: ToolExecutor + 'static>(mut self, executor: E) -> Self {
        self.executors.push(Box::new(executor));
        self
    }
}

#[async_trait]
impl ToolExecutor for CompositeToolExecutor {
    async fn execute_tool(&self, name: &str, input: ToolInput) -> ConclaveResult<ToolResult> {
        for executor in &self.executors {
            if executor.get_tool(name).is_some() {
                return executor.execute_tool(name, input).await;
            }
        }
        Err(ConclaveError::not_found(format!(
            "tool {name:?} not found in any executor"
        )))
    }

    fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut tools = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for executor in &self.executors {
            for def in executor.list_tools() {
                if seen.insert(def.name.clone()) {
                    tools.push(def);
                }
            }
        }
        tools
    }

    fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.executors.iter().find_map(|e| e.get_tool(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::SideEffectClass;

    struct MockTool {
        name: String,
    }

    #[async_trait]
    impl Tool for MockTool {
        async fn execute(&self, _input: ToolInput) -> ConclaveResult<ToolResult> {
            Ok(ToolResult::success(serde_json::json!({"mock": true})))
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.clone(),
                description: format!("mock tool: {}", self.name),
                parameters: serde_json::json!({}),
                side_effect_class: SideEffectClass::Pure,
            }
        }
    }

    #[test]
    fn register_then_get() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool { name: "echo".into() });
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn executor_dispatches_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(MockTool { name: "echo".into() });
        let executor = registry.into_executor();
        let result = executor
            .execute_tool("echo", ToolInput::new(serde_json::json!({})))
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn executor_not_found_is_not_found_error() {
        let executor = ToolRegistry::new().into_executor();
        let err = executor
            .execute_tool("missing", ToolInput::new(serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn composite_executor_falls_through() {
        let mut first = ToolRegistry::new();
        first.register(MockTool { name: "a".into() });
        let mut second = ToolRegistry::new();
        second.register(MockTool { name: "b".into() });

        let composite = CompositeToolExecutor::new()
            .add_executor(first.into_executor())
            .add_executor(second.into_executor());

        assert!(composite
            .execute_tool("b", ToolInput::new(serde_json::json!({})))
            .await
            .unwrap()
            .success);
        assert_eq!(composite.list_tools().len(), 2);
    }
}
