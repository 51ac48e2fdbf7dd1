//! Static handler registry.
//!
//! Maps every [`HandlerId`] to the handler instance that serves it. The set
//! of ids is closed; a registry can only leave slots empty, never add names.

use crate::agents::configurable::ConfigurableHandler;
use crate::agents::scheduler::waves;
use crate::agents::Handler;
use crate::llm::LLMClient;
use crate::rag::Retriever;
use crate::types::{AppError, HandlerId, Result};
use crate::utils::toml_config::MeridianConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct HandlerRegistry {
    handlers: BTreeMap<HandlerId, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    /// Builds one [`ConfigurableHandler`] per registry slot.
    pub fn from_config(
        config: &MeridianConfig,
        llm: Arc<dyn LLMClient>,
        retriever: Option<Arc<dyn Retriever>>,
    ) -> Result<Self> {
        let mut builder = Self::builder();
        for id in HandlerId::ALL {
            let handler_config = config.handler(id);
            let handler =
                ConfigurableHandler::from_config(id, &handler_config, llm.clone(), retriever.clone())?;
            builder = builder.register(Arc::new(handler));
        }
        let registry = builder.build()?;
        info!(handlers = ?registry.ids(), "Handler registry ready");
        Ok(registry)
    }

    pub fn get(&self, id: HandlerId) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(&id)
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        self.handlers.contains_key(&id)
    }

    /// Registered ids in priority order.
    pub fn ids(&self) -> Vec<HandlerId> {
        self.handlers.keys().copied().collect()
    }

    /// Declared dependencies of a registered handler.
    pub fn depends_on(&self, id: HandlerId) -> Vec<HandlerId> {
        self.handlers
            .get(&id)
            .map(|handler| handler.depends_on())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Builder for creating a HandlerRegistry with fluent API
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: BTreeMap<HandlerId, Arc<dyn Handler>>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill the slot named by `handler.id()`, replacing any earlier handler.
    pub fn register(mut self, handler: Arc<dyn Handler>) -> Self {
        let id = handler.id();
        if self.handlers.insert(id, handler).is_some() {
            warn!(handler = %id, "Replacing registered handler");
        }
        self
    }

    /// Validates dependencies and builds the registry.
    ///
    /// Self-dependencies and dependency cycles are configuration errors.
    pub fn build(self) -> Result<HandlerRegistry> {
        for (id, handler) in &self.handlers {
            let deps = handler.depends_on();
            if deps.contains(id) {
                return Err(AppError::Configuration(format!(
                    "Handler {} depends on itself",
                    id
                )));
            }
            for dep in deps.iter().filter(|dep| !self.handlers.contains_key(dep)) {
                warn!(handler = %id, dependency = %dep, "Dependency is not registered");
            }
        }

        let ids: Vec<HandlerId> = self.handlers.keys().copied().collect();
        waves(&ids, |id| {
            self.handlers
                .get(&id)
                .map(|handler| handler.depends_on())
                .unwrap_or_default()
        })?;

        Ok(HandlerRegistry {
            handlers: self.handlers,
        })
    }
}
