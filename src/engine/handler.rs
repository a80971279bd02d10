//! Policy handlers, looked up by the name a policy declares.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::NaiveDateTime;

use super::{
    EngineResult, orchestrator,
    run::{PolicyRun, RunOutcome},
    template::TemplateResolver,
};

/// Name of the handler every policy uses unless it declares another.
pub const DEFAULT_HANDLER: &str = "default";

/// Runs the archive or purge work of a policy.
#[async_trait]
pub trait PolicyHandler: Send + Sync {
    fn supports_archive(&self) -> bool;

    fn supports_purge(&self) -> bool;

    async fn perform_archive(
        &self,
        run: &mut PolicyRun<'_>,
        resolver: &TemplateResolver,
        aging: NaiveDateTime,
    ) -> EngineResult<RunOutcome>;

    async fn perform_purge(
        &self,
        run: &mut PolicyRun<'_>,
        resolver: &TemplateResolver,
        aging: NaiveDateTime,
    ) -> EngineResult<RunOutcome>;
}

/// Dispatches on the policy's commit strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyHandler;

#[async_trait]
impl PolicyHandler for StrategyHandler {
    fn supports_archive(&self) -> bool {
        true
    }

    fn supports_purge(&self) -> bool {
        true
    }

    async fn perform_archive(
        &self,
        run: &mut PolicyRun<'_>,
        resolver: &TemplateResolver,
        aging: NaiveDateTime,
    ) -> EngineResult<RunOutcome> {
        let strategy = run.policy.commit_strategy()?;
        orchestrator::execute(run, resolver, &strategy, aging).await
    }

    async fn perform_purge(
        &self,
        run: &mut PolicyRun<'_>,
        resolver: &TemplateResolver,
        aging: NaiveDateTime,
    ) -> EngineResult<RunOutcome> {
        let strategy = run.policy.commit_strategy()?;
        orchestrator::execute(run, resolver, &strategy, aging).await
    }
}

/// Handlers by name, built once at startup.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn PolicyHandler>>,
}

impl HandlerRegistry {
    /// A registry with no handlers.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn PolicyHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PolicyHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(DEFAULT_HANDLER, Arc::new(StrategyHandler));
        registry
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = HandlerRegistry::default();
        assert_eq!(registry.names(), vec![DEFAULT_HANDLER]);
        let handler = registry.get("default").unwrap();
        assert!(handler.supports_archive());
        assert!(handler.supports_purge());
        assert!(registry.get("custom").is_none());
        assert!(HandlerRegistry::empty().names().is_empty());
    }
}
