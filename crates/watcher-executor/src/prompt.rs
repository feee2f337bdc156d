use minijinja::Environment;

use crate::error::{ExecutorError, Result};

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a passive observer of a chat community. You never speak, you only notice. \
     Respond with a single JSON object and nothing else.";

/// The rendered system/user pair handed to [`watcher_model::LlmClient::complete`].
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

/// Loads every `*.j2` template under a directory into a `minijinja`
/// environment, keyed by filename stem, so a layer's `prompt_template`
/// param names a file rather than an inline string.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new(templates_dir: &str) -> Result<Self> {
        let mut env = Environment::new();
        let dir = std::path::Path::new(templates_dir);
        if !dir.exists() {
            return Ok(Self { env });
        }
        let entries = std::fs::read_dir(dir).map_err(|e| ExecutorError::Template(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| ExecutorError::Template(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("j2") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| ExecutorError::Template(format!("non-utf8 template filename: {}", path.display())))?
                .to_string();
            let body = std::fs::read_to_string(&path).map_err(|e| ExecutorError::Template(e.to_string()))?;
            env.add_template_owned(stem, body)
                .map_err(|e| ExecutorError::Template(format!("failed to register template: {e}")))?;
        }
        Ok(Self { env })
    }

    /// Render `template_name` against `context`. The system prompt comes
    /// from a template named `system` if loaded, otherwise a fixed default.
    pub fn render(&self, template_name: &str, context: &serde_json::Value) -> Result<RenderedPrompt> {
        let user = self
            .env
            .get_template(template_name)
            .map_err(|e| ExecutorError::Template(format!("missing template `{template_name}`: {e}")))?
            .render(context)
            .map_err(|e| ExecutorError::Template(format!("render of `{template_name}` failed: {e}")))?;

        let system = match self.env.get_template("system") {
            Ok(tpl) => tpl
                .render(context)
                .map_err(|e| ExecutorError::Template(format!("system render failed: {e}")))?,
            Err(_) => DEFAULT_SYSTEM_PROMPT.to_string(),
        };

        Ok(RenderedPrompt { system, user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_named_template_with_default_system_prompt() {
        let dir = std::env::temp_dir().join(format!("watcher_prompt_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("reflect_user.j2"), "Messages:\n{% for m in messages %}- {{ m }}\n{% endfor %}").unwrap();

        let engine = PromptEngine::new(dir.to_str().unwrap()).expect("load");
        let ctx = serde_json::json!({"messages": ["hi", "there"]});
        let rendered = engine.render("reflect_user", &ctx).expect("render");

        assert!(rendered.user.contains("hi"));
        assert_eq!(rendered.system, DEFAULT_SYSTEM_PROMPT);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_template_is_an_error() {
        let dir = std::env::temp_dir().join(format!("watcher_prompt_empty_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let engine = PromptEngine::new(dir.to_str().unwrap()).expect("load");
        assert!(engine.render("nonexistent", &serde_json::json!({})).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
