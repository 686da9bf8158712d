//! Variable interpolation for application environment values.
//!
//! `paasdeploy.json`'s `env` map may reference:
//! - `${git.sha}` / `${git.short_sha}` / `${git.branch}` / `${git.message}` -
//!   the commit this deployment targets
//! - `${env.VAR_NAME}` - a process environment variable of the worker
//! - `${secrets.SECRET_NAME}` - a secret resolved by the adapter layer before
//!   the worker ever sees the raw config, so it can be masked in logs
//! - `${custom_name}` - an operator-supplied override

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Everything a single deployment's env interpolation can reference.
#[derive(Debug, Clone, Default)]
pub struct DeployContext {
    pub git: GitContext,
    pub env: HashMap<String, String>,
    pub secrets: HashMap<String, String>,
    pub custom: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct GitContext {
    pub sha: String,
    pub short_sha: String,
    pub branch: String,
    pub message: String,
}

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

impl DeployContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commit(commit_sha: &str, commit_message: Option<&str>, branch: &str) -> Self {
        let mut ctx = Self::new();
        ctx.git.sha = commit_sha.to_string();
        ctx.git.short_sha = commit_sha.chars().take(12).collect();
        ctx.git.branch = branch.to_string();
        ctx.git.message = commit_message.unwrap_or_default().to_string();
        ctx
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.custom.insert(name.to_string(), value.into());
    }

    fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();
        match parts.as_slice() {
            ["git", "sha"] => Some(self.git.sha.clone()),
            ["git", "short_sha"] => Some(self.git.short_sha.clone()),
            ["git", "branch"] => Some(self.git.branch.clone()),
            ["git", "message"] => Some(self.git.message.clone()),
            ["env", name] => self.env.get(*name).cloned(),
            ["secrets", name] => self.secrets.get(*name).cloned(),
            [name] => self.custom.get(*name).cloned(),
            _ => None,
        }
    }

    /// Interpolate `${...}` placeholders; unresolvable references are left
    /// untouched rather than silently dropped, so a typo surfaces at release
    /// time instead of producing an empty environment value.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{var_name}}}"))
            })
            .to_string()
    }

    pub fn interpolate_map(&self, map: &HashMap<String, String>) -> HashMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }

    /// Names of secret placeholders referenced in `input`, used by the
    /// worker to build the redaction set before any log line is emitted.
    pub fn find_secrets_in_string(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .filter_map(|caps| {
                let var_name = &caps[1];
                var_name.strip_prefix("secrets.").map(|s| s.to_string())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_git_and_env() {
        let mut ctx = DeployContext::with_commit("abc1234567890def", Some("fix bug"), "main");
        ctx.env.insert("REGION".to_string(), "us-east".to_string());

        let result = ctx.interpolate("${git.short_sha} in ${env.REGION}");
        assert_eq!(result, "abc123456789 in us-east");
    }

    #[test]
    fn unresolved_variable_is_left_untouched() {
        let ctx = DeployContext::new();
        assert_eq!(ctx.interpolate("${unknown.var}"), "${unknown.var}");
    }

    #[test]
    fn secrets_are_interpolated_and_discoverable_for_redaction() {
        let mut ctx = DeployContext::new();
        ctx.secrets.insert("API_KEY".to_string(), "sk-live-xyz".to_string());

        assert_eq!(ctx.interpolate("key=${secrets.API_KEY}"), "key=sk-live-xyz");
        assert_eq!(
            ctx.find_secrets_in_string("key=${secrets.API_KEY} other=${env.FOO}"),
            vec!["API_KEY".to_string()]
        );
    }

    #[test]
    fn interpolate_map_rewrites_every_value() {
        let ctx = DeployContext::with_commit("deadbeef", None, "main");
        let mut env = HashMap::new();
        env.insert("COMMIT".to_string(), "${git.sha}".to_string());
        let result = ctx.interpolate_map(&env);
        assert_eq!(result.get("COMMIT"), Some(&"deadbeef".to_string()));
    }

    #[test]
    fn nested_json_braces_survive_interpolation() {
        let ctx = DeployContext::with_commit("abc123", None, "main");
        let result = ctx.interpolate(r#"{"sha": "${git.sha}"}"#);
        assert_eq!(result, r#"{"sha": "abc123"}"#);
    }
}
