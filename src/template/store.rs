//! # TemplateStore Port
//!
//! Consumed by the template engine (spec §4.1/§6): "In-process map today;
//! pluggable to a persistent store without changing the C1 API." The engine
//! never touches a `HashMap` directly — it goes through this trait, keeping
//! the service layer separate from storage the way a repository boundary
//! does.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::domain::Template;
use crate::template::error::{TemplateError, TemplateResult};

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get(&self, name: &str) -> TemplateResult<Template>;
    async fn put(&self, template: Template) -> TemplateResult<()>;
    async fn remove(&self, name: &str) -> TemplateResult<()>;
    async fn list(&self) -> TemplateResult<Vec<Template>>;
    async fn exists(&self, name: &str) -> TemplateResult<bool>;
}

/// The default, in-process implementation: a map guarded by a readers/writer
/// lock (spec §4.1).
#[derive(Default)]
pub struct InMemoryTemplateStore {
    templates: RwLock<HashMap<String, Template>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with an initial set of templates, bypassing the
    /// `Exists` check `put` would otherwise perform through the engine.
    pub fn seed(&self, templates: impl IntoIterator<Item = Template>) {
        let mut guard = self.templates.write().expect("template store poisoned");
        for template in templates {
            guard.insert(template.name.clone(), template);
        }
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn get(&self, name: &str) -> TemplateResult<Template> {
        let guard = self.templates.read().expect("template store poisoned");
        guard
            .get(name)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))
    }

    async fn put(&self, template: Template) -> TemplateResult<()> {
        let mut guard = self.templates.write().expect("template store poisoned");
        guard.insert(template.name.clone(), template);
        Ok(())
    }

    async fn remove(&self, name: &str) -> TemplateResult<()> {
        let mut guard = self.templates.write().expect("template store poisoned");
        guard
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))
    }

    async fn list(&self) -> TemplateResult<Vec<Template>> {
        let guard = self.templates.read().expect("template store poisoned");
        let mut templates: Vec<Template> = guard.values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn exists(&self, name: &str) -> TemplateResult<bool> {
        let guard = self.templates.read().expect("template store poisoned");
        Ok(guard.contains_key(name))
    }
}
