//! CLI commands implementation

pub mod aws;
pub mod cleanup;
pub mod deploy;
pub mod invoke;

use anyhow::{Context, Result};
use medgemma_aws::{AwsContext, CallerIdentity};
use medgemma_core::Settings;
use medgemma_store::BuildLayout;
use std::io::{self, BufRead, Write};
use std::path::Path;

const RULE_WIDTH: usize = 60;

/// Settings plus the project-relative build layout
pub struct Project {
    pub settings: Settings,
    pub layout: BuildLayout,
}

impl Project {
    pub fn load(env_file: &Path) -> Result<Self> {
        let settings = Settings::load(env_file)
            .with_context(|| format!("Failed to load settings from {}", env_file.display()))?;
        Ok(Self {
            settings,
            layout: BuildLayout::default(),
        })
    }

    pub async fn aws(&self) -> AwsContext {
        AwsContext::from_settings(&self.settings).await
    }

    /// Resolve the caller identity, pointing at `aws sso login` on failure
    pub async fn authenticate(&self, ctx: &AwsContext) -> Result<CallerIdentity> {
        match ctx.caller_identity().await {
            Ok(identity) => Ok(identity),
            Err(e) => {
                eprintln!("Authentication failed: {}", e);
                eprintln!(
                    "To fix this, run: aws sso login --profile {}",
                    ctx.profile()
                );
                Err(e.into())
            }
        }
    }
}

pub fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

pub fn banner(title: &str) {
    println!("{}", rule());
    println!("{}", title);
    println!("{}", rule());
}

/// Print `question` and read one line from stdin
pub fn prompt_line(question: &str) -> Result<String> {
    print!("{}", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim_end_matches(['\r', '\n']).to_string())
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "yes" | "y")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("yes"));
        assert!(is_yes(" Y "));
        assert!(!is_yes("no"));
        assert!(!is_yes(""));
    }
}
