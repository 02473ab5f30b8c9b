use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use opflow_core::error::{OpflowError, Result};
use opflow_core::traits::Operator;
use opflow_core::types::{OperatorDescriptor, Plan, WorkflowState};

use crate::builtin::OperatorDeps;

/// A registered operator: its name, description and handler.
#[derive(Clone)]
pub struct OperatorSpec {
    name: String,
    description: String,
    operator: Arc<dyn Operator>,
}

impl OperatorSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn operator(&self) -> Arc<dyn Operator> {
        self.operator.clone()
    }

    pub fn descriptor(&self) -> OperatorDescriptor {
        OperatorDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

impl std::fmt::Debug for OperatorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Adapts an async closure into an `Operator`.
struct FnOperator<F> {
    name: String,
    description: String,
    handler: F,
}

impl<F, Fut> Operator for FnOperator<F>
where
    F: Fn(WorkflowState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WorkflowState>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn execute(&self, state: WorkflowState) -> BoxFuture<'_, Result<WorkflowState>> {
        Box::pin((self.handler)(state))
    }
}

/// Startup-phase registration table. `build()` freezes it.
#[derive(Default)]
pub struct OperatorRegistryBuilder {
    operators: BTreeMap<String, OperatorSpec>,
}

impl OperatorRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-populated with the built-in operator set.
    pub fn with_builtins(deps: OperatorDeps) -> Result<Self> {
        let mut builder = Self::new();
        crate::builtin::register_all(&mut builder, deps)?;
        Ok(builder)
    }

    /// Register an async handler under `name`.
    ///
    /// Fails with `DuplicateOperator` if the name is taken; the existing
    /// registration is left untouched.
    pub fn register<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(WorkflowState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WorkflowState>> + Send + 'static,
    {
        let name = name.into();
        let description = description.into();
        let operator = FnOperator {
            name: name.clone(),
            description: description.clone(),
            handler,
        };
        self.insert(name, description, Arc::new(operator))
    }

    /// Register an operator under its own name and description.
    pub fn register_operator(&mut self, operator: impl Operator) -> Result<()> {
        self.register_arc(Arc::new(operator))
    }

    pub fn register_arc(&mut self, operator: Arc<dyn Operator>) -> Result<()> {
        let name = operator.name().to_string();
        let description = operator.description().to_string();
        self.insert(name, description, operator)
    }

    fn insert(
        &mut self,
        name: String,
        description: String,
        operator: Arc<dyn Operator>,
    ) -> Result<()> {
        if self.operators.contains_key(&name) {
            return Err(OpflowError::DuplicateOperator(name));
        }
        debug!(operator = %name, "Registered operator");
        self.operators.insert(
            name.clone(),
            OperatorSpec {
                name,
                description,
                operator,
            },
        );
        Ok(())
    }

    pub fn build(self) -> OperatorRegistry {
        OperatorRegistry {
            operators: self.operators,
        }
    }
}

/// Immutable registry of available operators.
///
/// Read-only once built; share it behind an `Arc` across concurrent runs.
#[derive(Debug, Default)]
pub struct OperatorRegistry {
    operators: BTreeMap<String, OperatorSpec>,
}

impl OperatorRegistry {
    pub fn builder() -> OperatorRegistryBuilder {
        OperatorRegistryBuilder::new()
    }

    /// Registry containing only the built-in operators.
    pub fn with_builtins(deps: OperatorDeps) -> Result<Self> {
        Ok(OperatorRegistryBuilder::with_builtins(deps)?.build())
    }

    pub fn get(&self, name: &str) -> Option<&OperatorSpec> {
        self.operators.get(name)
    }

    /// Look up an operator, failing with `UnknownOperator`.
    pub fn resolve(&self, name: &str) -> Result<&OperatorSpec> {
        self.get(name).ok_or_else(|| OpflowError::UnknownOperator {
            name: name.to_string(),
            position: None,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Descriptors of all registered operators, sorted by name.
    ///
    /// The iterator is lazy; call again to restart.
    pub fn list(&self) -> impl Iterator<Item = OperatorDescriptor> + '_ {
        self.operators.values().map(OperatorSpec::descriptor)
    }

    pub fn descriptors(&self) -> Vec<OperatorDescriptor> {
        self.list().collect()
    }

    /// Case-insensitive substring search over names and descriptions.
    pub fn search(&self, query: &str) -> Vec<OperatorDescriptor> {
        let needle = query.to_lowercase();
        self.list()
            .filter(|d| {
                d.name.to_lowercase().contains(&needle)
                    || d.description.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Plan steps whose operator is not registered, as `(position, name)`.
    pub fn unresolved(&self, plan: &Plan) -> Vec<(usize, String)> {
        plan.unresolved(|name| self.contains(name))
    }

    /// The operator catalog as pretty-printed JSON.
    pub fn catalog_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.descriptors())?)
    }

    pub fn export_catalog(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.catalog_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opflow_test_utils::StubOperator;

    async fn passthrough(state: WorkflowState) -> Result<WorkflowState> {
        Ok(state)
    }

    fn sample() -> OperatorRegistry {
        let mut builder = OperatorRegistry::builder();
        builder
            .register("sql", "Query structured data", passthrough)
            .unwrap();
        builder
            .register("classify", "Classify a text column", passthrough)
            .unwrap();
        builder
            .register("summarize", "Summarize upstream rows", passthrough)
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_resolve_registered() {
        let registry = sample();
        let spec = registry.resolve("classify").unwrap();
        assert_eq!(spec.name(), "classify");
        assert_eq!(spec.description(), "Classify a text column");
        assert_eq!(spec.operator().name(), "classify");
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = sample();
        match registry.resolve("pivot") {
            Err(OpflowError::UnknownOperator { name, position }) => {
                assert_eq!(name, "pivot");
                assert_eq!(position, None);
            }
            other => panic!("expected UnknownOperator, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let mut builder = OperatorRegistry::builder();
        builder.register("sql", "first", passthrough).unwrap();
        let err = builder.register("sql", "second", passthrough).unwrap_err();
        assert!(matches!(err, OpflowError::DuplicateOperator(ref n) if n == "sql"));

        let err = builder
            .register_operator(StubOperator::new("sql"))
            .unwrap_err();
        assert!(matches!(err, OpflowError::DuplicateOperator(_)));

        let registry = builder.build();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("sql").unwrap().description(), "first");
    }

    #[test]
    fn test_list_sorted_and_restartable() {
        let registry = sample();
        let names: Vec<String> = registry.list().map(|d| d.name).collect();
        assert_eq!(names, vec!["classify", "sql", "summarize"]);
        assert_eq!(registry.list().count(), 3);
    }

    #[test]
    fn test_search_matches_description() {
        let registry = sample();
        let hits = registry.search("TEXT");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "classify");
        assert!(registry.search("nothing-like-this").is_empty());
    }

    #[test]
    fn test_unresolved_steps() {
        let registry = sample();
        let plan: Plan = serde_json::from_str(
            r#"[{"op": "sql"}, {"op": "pivot"}, {"op": "summarize"}]"#,
        )
        .unwrap();
        assert_eq!(registry.unresolved(&plan), vec![(1, "pivot".to_string())]);
    }

    #[test]
    fn test_export_catalog() {
        let registry = sample();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operators_catalog.json");
        registry.export_catalog(&path).unwrap();

        let parsed: Vec<OperatorDescriptor> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, registry.descriptors());
    }

    #[tokio::test]
    async fn test_registered_handler_runs() {
        let mut builder = OperatorRegistry::builder();
        builder.register_operator(StubOperator::new("sql")).unwrap();
        let registry = builder.build();

        let mut state = WorkflowState::new("q");
        state.attach(opflow_core::types::NodeCursor {
            node_id: "n0".into(),
            predecessors: vec![],
        });
        let out = registry
            .resolve("sql")
            .unwrap()
            .operator()
            .execute(state)
            .await
            .unwrap();
        assert_eq!(out.result("n0"), Some(&serde_json::json!("sql")));
    }
}
