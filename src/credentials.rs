use std::collections::HashMap;

use base64::Engine;
use tracing::debug;

use crate::error::{Error, Result};

pub const GITHUB_TOKEN_VAR: &str = "GITHUB_TOKEN";

/// Source of credential variables. Empty values count as unset.
pub trait Environment: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

impl Environment for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).filter(|v| !v.is_empty()).cloned()
    }
}

pub fn env_var_name(identity: &str, suffix: &str) -> String {
    format!("{}_{}", identity, suffix)
}

fn encode(raw: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(raw)
}

/// A ready-made bearer token from `<IDENTITY>_TOKEN`.
pub fn bearer_token(env: &dyn Environment, identity: &str) -> Option<String> {
    env.var(&env_var_name(identity, "TOKEN"))
}

/// The Basic credential sent to the token endpoint.
///
/// `<IDENTITY>_AUTH` is used verbatim; otherwise `<IDENTITY>_USER` and
/// `<IDENTITY>_PASSWORD` are joined as `user:password` and base64-encoded.
pub fn auth_token(env: &dyn Environment, identity: &str) -> Result<String> {
    if let Some(auth) = env.var(&env_var_name(identity, "AUTH")) {
        debug!("Using {}_AUTH for token exchange", identity);
        return Ok(auth);
    }
    auth_token_from_credentials(env, identity)
}

pub fn auth_token_from_credentials(env: &dyn Environment, identity: &str) -> Result<String> {
    let user = env.var(&env_var_name(identity, "USER"));
    let password = env.var(&env_var_name(identity, "PASSWORD"));
    match (user, password) {
        (Some(user), Some(password)) => {
            debug!("Using {}_USER and {}_PASSWORD for token exchange", identity, identity);
            Ok(encode(&format!("{}:{}", user, password)))
        }
        _ => Err(Error::MissingCredentials {
            registry: identity.to_string(),
        }),
    }
}

/// GHCR accepts the base64-encoded `GITHUB_TOKEN` directly as a bearer token.
pub fn github_bearer_token(env: &dyn Environment) -> Option<String> {
    env.var(GITHUB_TOKEN_VAR).map(|token| encode(&token))
}

#[cfg(test)]
pub(crate) fn test_env(vars: &[(&str, &str)]) -> HashMap<String, String> {
    vars.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_token_from_credentials() {
        let env = test_env(&[("HOGE_DEV_USER", "hoge"), ("HOGE_DEV_PASSWORD", "hige")]);
        assert_eq!(
            auth_token_from_credentials(&env, "HOGE_DEV").unwrap(),
            "aG9nZTpoaWdl"
        );
    }

    #[test]
    fn test_missing_credentials() {
        let cases = [
            ("MissingUsername", test_env(&[("HOGE_DEV_PASSWORD", "hige")]), "HOGE_DEV"),
            ("MissingPassword", test_env(&[("HOGE_DEV_USER", "hoge")]), "HOGE_DEV"),
            (
                "EmptyPassword",
                test_env(&[("HOGE_DEV_USER", "hoge"), ("HOGE_DEV_PASSWORD", "")]),
                "HOGE_DEV",
            ),
            (
                "DifferentRegistry",
                test_env(&[("HOGE_DEV_USER", "hoge"), ("HOGE_DEV_PASSWORD", "hige")]),
                "HOGE_IO",
            ),
        ];
        for (title, env, identity) in cases {
            let result = auth_token_from_credentials(&env, identity);
            assert!(
                matches!(result, Err(Error::MissingCredentials { .. })),
                "{title}: {result:?}"
            );
        }
    }

    #[test]
    fn test_auth_env_takes_precedence() {
        let env = test_env(&[
            ("HOGE_DEV_AUTH", "cHJlOmNvbXB1dGVk"),
            ("HOGE_DEV_USER", "hoge"),
            ("HOGE_DEV_PASSWORD", "hige"),
        ]);
        assert_eq!(auth_token(&env, "HOGE_DEV").unwrap(), "cHJlOmNvbXB1dGVk");
    }

    #[test]
    fn test_bearer_token_ignores_empty_value() {
        let env = test_env(&[("HOGE_DEV_TOKEN", "")]);
        assert_eq!(bearer_token(&env, "HOGE_DEV"), None);

        let env = test_env(&[("HOGE_DEV_TOKEN", "aG9nZWJlYXJlcg==")]);
        assert_eq!(
            bearer_token(&env, "HOGE_DEV").as_deref(),
            Some("aG9nZWJlYXJlcg==")
        );
    }

    #[test]
    fn test_github_bearer_token() {
        let env = test_env(&[(GITHUB_TOKEN_VAR, "ghp_hogebearer")]);
        assert_eq!(
            github_bearer_token(&env).as_deref(),
            Some("Z2hwX2hvZ2ViZWFyZXI=")
        );
        assert_eq!(github_bearer_token(&test_env(&[])), None);
    }
}
