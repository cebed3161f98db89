use crate::cli::UsageError;
use itertools::Itertools;

/// Command line run for every chunk, with an optional placeholder
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    tokens: Vec<String>,
    placeholder: Option<String>,
}

impl CommandTemplate {
    /// An empty placeholder is treated as no placeholder. A placeholder has to
    /// occur in at least one token.
    pub fn new(tokens: Vec<String>, placeholder: Option<String>) -> Result<Self, UsageError> {
        let placeholder = placeholder.filter(|placeholder| !placeholder.is_empty());

        if let Some(ref placeholder) = placeholder {
            if !tokens.iter().any(|token| token.contains(placeholder.as_str())) {
                return Err(UsageError::UnusedPlaceholder(placeholder.clone()));
            }
        }

        Ok(Self {
            tokens,
            placeholder,
        })
    }

    /// build the command for `chunk`
    pub fn resolve(&self, chunk: &[String]) -> Vec<String> {
        match self.placeholder {
            Some(ref placeholder) => {
                let joined = chunk.iter().join(" ");

                self.tokens
                    .iter()
                    .map(|token| token.replace(placeholder.as_str(), &joined))
                    .collect()
            }
            None => self.tokens.iter().chain(chunk.iter()).cloned().collect(),
        }
    }
}
