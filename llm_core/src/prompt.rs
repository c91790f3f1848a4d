//! System prompt composition.
//!
//! Templates are markdown files `<root>/<name>.md`. Composition puts exactly
//! one system message at index 0 of the outgoing list: a leading system entry
//! is replaced, any other system entries supplied by the client are dropped.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{error::PromptError, ChatMessage, Role};

const TEMPLATE_EXTENSION: &str = "md";

#[derive(Debug, Clone)]
pub struct PromptComposer {
    root: PathBuf,
}

impl PromptComposer {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reduce a template name to `[A-Za-z0-9_-]`, removing parent-directory
    /// sequences and path separators first.
    pub fn sanitize_name(name: &str) -> String {
        name.trim()
            .replace("..", "")
            .replace(['/', '\\'], "")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
            .collect()
    }

    /// Resolve a template name to its file under the storage root.
    pub fn template_path(&self, name: &str) -> Result<PathBuf, PromptError> {
        let sanitized = Self::sanitize_name(name);
        if sanitized.is_empty() {
            return Err(PromptError::InvalidTemplateName(name.to_string()));
        }
        Ok(self
            .root
            .join(sanitized)
            .with_extension(TEMPLATE_EXTENSION))
    }

    /// Load a template's trimmed content.
    pub async fn load_template(&self, name: &str) -> Result<String, PromptError> {
        let path = self.template_path(name)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PromptError::TemplateNotFound(name.to_string()));
            }
            Err(source) => {
                return Err(PromptError::Io {
                    name: name.to_string(),
                    source,
                });
            }
        };

        let content = content.trim();
        if content.is_empty() {
            return Err(PromptError::EmptyTemplate(name.to_string()));
        }
        debug!(template = name, bytes = content.len(), "prompt template loaded");
        Ok(content.to_string())
    }

    /// Use the named template as the system message.
    pub async fn compose_with_named_template(
        &self,
        mut messages: Vec<ChatMessage>,
        template_name: &str,
    ) -> Result<Vec<ChatMessage>, PromptError> {
        let template = self.load_template(template_name).await?;
        install_system_message(&mut messages, ChatMessage::system(template));
        Ok(messages)
    }

    /// Use the conversation context followed by the default template as the
    /// system message. Blank context is rejected; callers fall back to
    /// [`compose_with_named_template`](Self::compose_with_named_template).
    pub async fn compose_with_context(
        &self,
        mut messages: Vec<ChatMessage>,
        context: &str,
        default_template: &str,
    ) -> Result<Vec<ChatMessage>, PromptError> {
        if context.trim().is_empty() {
            return Err(PromptError::EmptyContext);
        }
        let template = self.load_template(default_template).await?;
        install_system_message(
            &mut messages,
            ChatMessage::system(format!("{}\n\n{}", context.trim(), template)),
        );
        Ok(messages)
    }
}

/// Put `system` at index 0 and remove every other system-role entry.
pub fn install_system_message(messages: &mut Vec<ChatMessage>, system: ChatMessage) {
    messages.retain(|m| m.role != Role::System);
    messages.insert(0, system);
}
