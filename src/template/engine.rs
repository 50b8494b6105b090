//! # Template Engine (C1)
//!
//! Textual `{{.Name}}` substitution over a `serde_json::Value` object map
//! (spec §4.1), backed by a pluggable `TemplateStore`. Four default
//! templates are preloaded at construction and cannot be deleted.

use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::domain::{NewTemplate, Template, UpdateTemplate};
use crate::template::error::{TemplateError, TemplateResult};
use crate::template::store::TemplateStore;

static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*\.?([A-Za-z0-9_]+)\s*\}\}").expect("valid regex"));

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid regex"));

pub const DEFAULT_TEMPLATE_NAMES: [&str; 4] =
    ["overdue_reminder", "due_soon", "book_available", "fine_notice"];

/// The rendered result of a template against a data map.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Result of a dry-run render (spec §4.1 `Test`), additionally surfacing
/// tokens that had no matching value.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub subject: String,
    pub body: String,
    pub unresolved: Vec<String>,
}

/// Non-fatal validation findings (declared-but-unused variables).
#[derive(Debug, Clone, Serialize, Default)]
pub struct ValidationWarnings {
    pub unused_variables: Vec<String>,
}

/// Optional filter for `List`.
#[derive(Debug, Clone, Default)]
pub struct TemplateFilter {
    pub active_only: bool,
}

/// A full dump of every stored template, for `Backup`/`Restore`.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct TemplateBackup {
    pub templates: Vec<Template>,
}

/// The template engine: substitution, validation, and CRUD over a
/// `TemplateStore` (spec §4.1).
pub struct TemplateEngine {
    store: Arc<dyn TemplateStore>,
}

impl TemplateEngine {
    /// Builds an engine over `store`, seeding the four default templates if
    /// they are not already present.
    pub async fn new(store: Arc<dyn TemplateStore>) -> TemplateResult<Self> {
        let engine = Self { store };
        engine.ensure_defaults().await?;
        Ok(engine)
    }

    async fn ensure_defaults(&self) -> TemplateResult<()> {
        for (name, subject, body) in default_template_bodies() {
            if !self.store.exists(name).await? {
                let now = Utc::now();
                self.store
                    .put(Template {
                        name: name.to_string(),
                        subject: subject.to_string(),
                        body: body.to_string(),
                        is_html: false,
                        variables: extract_tokens(&format!("{subject} {body}")),
                        is_active: true,
                        is_default: true,
                        created_at: now,
                        updated_at: now,
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// `Render(template, data) → (subject, body)`.
    pub fn render(&self, template: &Template, data: &serde_json::Value) -> RenderedMessage {
        RenderedMessage {
            subject: substitute(&template.subject, data),
            body: substitute(&template.body, data),
        }
    }

    /// `Validate(template) → error|warnings`.
    pub fn validate(&self, template: &Template) -> TemplateResult<ValidationWarnings> {
        if !NAME_PATTERN.is_match(&template.name) {
            return Err(TemplateError::Invalid(format!(
                "template name '{}' must match [A-Za-z0-9_]+",
                template.name
            )));
        }
        check_balanced(&template.subject)?;
        check_balanced(&template.body)?;

        let combined = format!("{} {}", template.subject, template.body);
        let used = extract_tokens(&combined);

        let undeclared: Vec<&String> = used
            .iter()
            .filter(|token| !template.variables.contains(token))
            .collect();
        if !undeclared.is_empty() {
            let names = undeclared
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(TemplateError::Invalid(format!(
                "undeclared variable(s) used: {names}"
            )));
        }

        let unused_variables: Vec<String> = template
            .variables
            .iter()
            .filter(|declared| !used.contains(declared))
            .cloned()
            .collect();

        Ok(ValidationWarnings { unused_variables })
    }

    /// `Get(name)`.
    pub async fn get(&self, name: &str) -> TemplateResult<Template> {
        self.store.get(name).await
    }

    /// `Create`.
    pub async fn create(&self, req: NewTemplate) -> TemplateResult<Template> {
        if self.store.exists(&req.name).await? {
            return Err(TemplateError::Exists(req.name));
        }
        let now = Utc::now();
        let template = Template {
            name: req.name,
            subject: req.subject,
            body: req.body,
            is_html: req.is_html,
            variables: req.variables,
            is_active: true,
            is_default: false,
            created_at: now,
            updated_at: now,
        };
        self.validate(&template)?;
        self.store.put(template.clone()).await?;
        Ok(template)
    }

    /// `Update`.
    pub async fn update(&self, name: &str, req: UpdateTemplate) -> TemplateResult<Template> {
        let mut template = self.store.get(name).await?;
        if template.is_default {
            return Err(TemplateError::Invalid(format!(
                "template '{name}' is a default template and cannot be modified"
            )));
        }
        if let Some(subject) = req.subject {
            template.subject = subject;
        }
        if let Some(body) = req.body {
            template.body = body;
        }
        if let Some(is_html) = req.is_html {
            template.is_html = is_html;
        }
        if let Some(variables) = req.variables {
            template.variables = variables;
        }
        if let Some(is_active) = req.is_active {
            template.is_active = is_active;
        }
        template.updated_at = Utc::now();
        self.validate(&template)?;
        self.store.put(template.clone()).await?;
        Ok(template)
    }

    /// `Delete`.
    pub async fn delete(&self, name: &str) -> TemplateResult<()> {
        let template = self.store.get(name).await?;
        if template.is_default {
            return Err(TemplateError::Invalid(format!(
                "template '{name}' is a default template and cannot be deleted"
            )));
        }
        self.store.remove(name).await
    }

    /// `List(filter)`.
    pub async fn list(&self, filter: TemplateFilter) -> TemplateResult<Vec<Template>> {
        let templates = self.store.list().await?;
        Ok(templates
            .into_iter()
            .filter(|t| !filter.active_only || t.is_active)
            .collect())
    }

    /// `Test(name, data) → {subject, body, unresolved[]}`.
    pub async fn test(&self, name: &str, data: &serde_json::Value) -> TemplateResult<TestResult> {
        let template = self.store.get(name).await?;
        let rendered = self.render(&template, data);
        let unresolved = extract_tokens(&format!("{} {}", rendered.subject, rendered.body));
        Ok(TestResult {
            subject: rendered.subject,
            body: rendered.body,
            unresolved,
        })
    }

    /// `Backup` — a full snapshot of every stored template.
    pub async fn backup(&self) -> TemplateResult<TemplateBackup> {
        Ok(TemplateBackup {
            templates: self.store.list().await?,
        })
    }

    /// `Restore` — replaces matching templates from a prior `Backup`.
    /// Default templates in the backup are restored as defaults; unknown
    /// (non-default) templates are recreated as-is.
    pub async fn restore(&self, backup: TemplateBackup) -> TemplateResult<()> {
        for template in backup.templates {
            self.store.put(template).await?;
        }
        Ok(())
    }
}

/// Replaces every `{{.Name}}` token with its stringified value from `data`;
/// unknown tokens are left literal (spec §4.1).
fn substitute(text: &str, data: &serde_json::Value) -> String {
    TOKEN_PATTERN
        .replace_all(text, |caps: &regex::Captures| {
            let key = &caps[1];
            match data.get(key) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Collects the distinct token names referenced in `text`.
fn extract_tokens(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = TOKEN_PATTERN
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

/// Rejects unbalanced `{{`/`}}` delimiters.
fn check_balanced(text: &str) -> TemplateResult<()> {
    let opens = text.matches("{{").count();
    let closes = text.matches("}}").count();
    if opens != closes {
        return Err(TemplateError::Invalid(
            "unbalanced {{ }} delimiters".to_string(),
        ));
    }
    Ok(())
}

fn default_template_bodies() -> [(&'static str, &'static str, &'static str); 4] {
    [
        (
            "overdue_reminder",
            "Overdue: {{.BookTitle}}",
            "Hi {{.RecipientName}}, your loan of \"{{.BookTitle}}\" was due on {{.DueDate}} and is now overdue. Please return it as soon as possible.",
        ),
        (
            "due_soon",
            "Due soon: {{.BookTitle}}",
            "Hi {{.RecipientName}}, your loan of \"{{.BookTitle}}\" is due on {{.DueDate}}.",
        ),
        (
            "book_available",
            "Reserved book available: {{.BookTitle}}",
            "Hi {{.RecipientName}}, \"{{.BookTitle}}\" that you reserved is now available for pickup.",
        ),
        (
            "fine_notice",
            "Outstanding fine: {{.Amount}}",
            "Hi {{.RecipientName}}, you have an outstanding fine of {{.Amount}} related to \"{{.BookTitle}}\". Please settle it at your earliest convenience.",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::store::InMemoryTemplateStore;
    use serde_json::json;

    async fn engine() -> TemplateEngine {
        TemplateEngine::new(Arc::new(InMemoryTemplateStore::new()))
            .await
            .expect("engine construction")
    }

    #[tokio::test]
    async fn default_templates_are_preloaded() {
        let engine = engine().await;
        for name in DEFAULT_TEMPLATE_NAMES {
            let template = engine.get(name).await.expect("default template present");
            assert!(template.is_default);
        }
    }

    #[tokio::test]
    async fn default_templates_cannot_be_deleted_or_updated() {
        let engine = engine().await;
        assert!(engine.delete("due_soon").await.is_err());
        assert!(engine
            .update(
                "due_soon",
                UpdateTemplate {
                    subject: Some("changed".into()),
                    ..Default::default()
                }
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn render_substitutes_known_tokens_and_leaves_unknown_literal() {
        let engine = engine().await;
        let template = engine.get("due_soon").await.unwrap();
        let rendered = engine.render(
            &template,
            &json!({"RecipientName": "Ada", "BookTitle": "Dune", "DueDate": "2026-08-01"}),
        );
        assert_eq!(rendered.subject, "Due soon: Dune");
        assert!(rendered.body.contains("Ada"));
        assert!(rendered.body.contains("Dune"));
    }

    #[tokio::test]
    async fn test_reports_unresolved_tokens() {
        let engine = engine().await;
        let result = engine
            .test("due_soon", &json!({"RecipientName": "Ada"}))
            .await
            .unwrap();
        assert!(result.unresolved.iter().any(|t| t == "BookTitle"));
    }

    #[tokio::test]
    async fn create_rejects_duplicate_name() {
        let engine = engine().await;
        let req = NewTemplate {
            name: "custom".into(),
            subject: "Hi {{.Name}}".into(),
            body: "Body {{.Name}}".into(),
            is_html: false,
            variables: vec!["Name".into()],
        };
        engine.create(req.clone()).await.unwrap();
        assert!(engine.create(req).await.is_err());
    }

    #[tokio::test]
    async fn validate_rejects_undeclared_variable() {
        let engine = engine().await;
        let template = Template {
            name: "bad".into(),
            subject: "Hi {{.Name}}".into(),
            body: "Body".into(),
            is_html: false,
            variables: vec![],
            is_active: true,
            is_default: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(engine.validate(&template).is_err());
    }

    #[tokio::test]
    async fn validate_warns_on_unused_declared_variable() {
        let engine = engine().await;
        let template = Template {
            name: "ok".into(),
            subject: "Hi".into(),
            body: "Body".into(),
            is_html: false,
            variables: vec!["Unused".into()],
            is_active: true,
            is_default: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let warnings = engine.validate(&template).unwrap();
        assert_eq!(warnings.unused_variables, vec!["Unused".to_string()]);
    }

    #[tokio::test]
    async fn backup_and_restore_round_trip() {
        let engine = engine().await;
        let backup = engine.backup().await.unwrap();
        let fresh_store = Arc::new(InMemoryTemplateStore::new());
        let fresh_engine = TemplateEngine { store: fresh_store };
        fresh_engine.restore(backup).await.unwrap();
        for name in DEFAULT_TEMPLATE_NAMES {
            assert!(fresh_engine.get(name).await.is_ok());
        }
    }
}
