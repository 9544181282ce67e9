//! Prompt assembly for fresh sessions.

use std::fs;

use tracing::debug;

use crate::config::GlobalConfig;
use crate::files;
use crate::{AppError, Result};

/// Build the prompt piped to a fresh session.
///
/// Reads the template, replaces each `{KEY}` from the configured
/// substitutions, and appends the memory file inside `<memory>` tags when
/// it exists and is non-empty.
///
/// # Errors
///
/// Returns `AppError::Config` if the template cannot be read.
pub fn build_prompt(config: &GlobalConfig) -> Result<Vec<u8>> {
    let template = fs::read_to_string(&config.paths.prompt_file).map_err(|err| {
        AppError::Config(format!(
            "cannot read prompt template {}: {err}",
            config.paths.prompt_file.display()
        ))
    })?;

    let mut prompt = template;
    for (key, value) in &config.prompt.substitutions {
        prompt = prompt.replace(&format!("{{{key}}}"), value);
    }

    if let Some(memory_file) = &config.paths.memory_file {
        match files::read_lenient(memory_file) {
            Some(memory) if !memory.trim().is_empty() => {
                prompt.push_str("\n\n<memory>\n");
                prompt.push_str(memory.trim());
                prompt.push_str("\n</memory>\n");
            }
            _ => debug!(path = %memory_file.display(), "no memory to append"),
        }
    }

    Ok(prompt.into_bytes())
}
