//! Tera renderer over the embedded manifest templates.
use super::embedded_templates;
use crate::error::{ClusterError, Result};
use tera::{Context, Tera};

pub struct TemplateRenderer {
    tera: Tera,
}

impl TemplateRenderer {
    /// Register every embedded template. A template that fails to parse is a
    /// build defect, so it is reported rather than skipped.
    pub fn from_embedded() -> Result<Self> {
        let mut tera = Tera::default();

        for (name, content) in embedded_templates::ALL_TEMPLATES {
            tera.add_raw_template(name, content).map_err(|e| {
                ClusterError::Config(format!("invalid embedded template {}: {}", name, e))
            })?;
            tracing::debug!("[TemplateRenderer] Loaded embedded template: {}", name);
        }

        Ok(Self { tera })
    }

    /// Render a template with a Tera Context directly
    pub fn render_with_context(&self, template_name: &str, context: &Context) -> Result<String> {
        let rendered = self.tera.render(template_name, context).map_err(|e| {
            ClusterError::Config(format!(
                "failed to render template {}: {}",
                template_name, e
            ))
        })?;

        tracing::debug!(
            "[TemplateRenderer] Rendered template {} ({} bytes)",
            template_name,
            rendered.len()
        );
        Ok(rendered)
    }

    /// List all loaded template names
    pub fn list_templates(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tera.get_template_names().map(String::from).collect();
        names.sort();
        names
    }
}
