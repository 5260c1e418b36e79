//! # Symmetric Keys and Static Tokens

use std::collections::BTreeMap;

use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};

use crate::credentials::config::{StaticTokenConfig, SymmetricKeyConfig};

/// Length of generated bearer tokens
pub const TOKEN_LENGTH: usize = 32;

#[must_use]
pub fn generate_symmetric_key(config: &SymmetricKeyConfig) -> Vec<u8> {
    let mut key = vec![0_u8; config.length];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

#[must_use]
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// One line of a static token file
#[derive(Clone, PartialEq, Eq)]
pub struct StaticToken {
    pub token: String,
    pub username: String,
    pub user_id: String,
    pub groups: Vec<String>,
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken")
            .field("username", &self.username)
            .field("user_id", &self.user_id)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

/// Build the token bundle, reusing tokens of users that already had one
///
/// `existing` maps user ids to tokens from the previous bundle.
#[must_use]
pub fn generate_static_tokens(
    config: &StaticTokenConfig,
    existing: &BTreeMap<String, String>,
) -> BTreeMap<String, StaticToken> {
    config
        .tokens
        .iter()
        .map(|(id, spec)| {
            let user_id = spec.user_id.clone().unwrap_or_else(|| id.clone());
            let token = existing
                .get(&user_id)
                .cloned()
                .unwrap_or_else(generate_token);
            (
                id.clone(),
                StaticToken {
                    token,
                    username: spec.username.clone(),
                    user_id,
                    groups: spec.groups.clone(),
                },
            )
        })
        .collect()
}

/// Render the token file format read by the API server:
/// `token,user,uid,"group1,group2"`
#[must_use]
pub fn to_csv(tokens: &BTreeMap<String, StaticToken>) -> String {
    let mut out = String::new();
    for token in tokens.values() {
        out.push_str(&format!(
            "{},{},{}",
            token.token, token.username, token.user_id
        ));
        if !token.groups.is_empty() {
            out.push_str(&format!(",\"{}\"", token.groups.join(",")));
        }
        out.push('\n');
    }
    out
}

/// Parse a token file back into `user id -> token`
#[must_use]
pub fn parse_csv(csv: &str) -> BTreeMap<String, String> {
    csv.lines()
        .filter_map(|line| {
            let mut fields = line.splitn(4, ',');
            let token = fields.next()?.trim();
            let _username = fields.next()?;
            let user_id = fields.next()?.trim();
            (!token.is_empty() && !user_id.is_empty())
                .then(|| (user_id.to_string(), token.to_string()))
        })
        .collect()
}
