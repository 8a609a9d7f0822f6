//! Reactions to recognised script output.

use std::fmt;
use std::sync::Arc;

use crate::scripting::api::CharacterHandle;

/// Output that makes the caller's character wave back.
pub const GREETING: &str = "Hello, Rust!";
const GREETING_REPLY: &str = "\nCharacter:\nHello!\n";

/// Matched against the trimmed console output of an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputPattern {
    Exact(String),
    Prefix(String),
}

impl OutputPattern {
    pub fn matches(&self, output: &str) -> bool {
        let output = output.trim();
        match self {
            Self::Exact(expected) => output == expected,
            Self::Prefix(prefix) => output.starts_with(prefix.as_str()),
        }
    }
}

/// Runs against the caller's character; returned text is appended to the output.
pub type HookAction = Arc<dyn Fn(&CharacterHandle, &str) -> Option<String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct OutputHooks {
    hooks: Vec<(OutputPattern, HookAction)>,
}

impl fmt::Debug for OutputHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|(pattern, _)| pattern))
            .finish()
    }
}

impl OutputHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock table: answers [`GREETING`] with a wave.
    pub fn with_defaults() -> Self {
        let mut hooks = Self::new();
        hooks.register(OutputPattern::Exact(GREETING.into()), |character, _| {
            character.wave();
            Some(GREETING_REPLY.into())
        });
        hooks
    }

    pub fn register<F>(&mut self, pattern: OutputPattern, action: F)
    where
        F: Fn(&CharacterHandle, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.hooks.push((pattern, Arc::new(action)));
    }

    /// Every hook sees the output as the script produced it.
    pub fn apply(&self, character: &CharacterHandle, output: &mut String) -> usize {
        let original = output.clone();
        let mut fired = 0;
        for (pattern, action) in &self.hooks {
            if !pattern.matches(&original) {
                continue;
            }
            fired += 1;
            if let Some(extra) = action(character, &original) {
                output.push_str(&extra);
            }
        }
        fired
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
