//! # Kubeconfig Rendering

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;

use crate::credentials::config::{KubeconfigAuth, KubeconfigConfig};

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig<'a> {
    api_version: &'static str,
    kind: &'static str,
    clusters: Vec<NamedCluster<'a>>,
    users: Vec<NamedUser>,
    contexts: Vec<NamedContext<'a>>,
    current_context: &'a str,
}

#[derive(Serialize)]
struct NamedCluster<'a> {
    name: &'a str,
    cluster: Cluster<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct Cluster<'a> {
    server: &'a str,
    certificate_authority_data: String,
}

#[derive(Serialize)]
struct NamedUser {
    name: String,
    user: User,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "kebab-case")]
struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_certificate_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_key_data: Option<String>,
}

#[derive(Serialize)]
struct NamedContext<'a> {
    name: &'a str,
    context: Context<'a>,
}

#[derive(Serialize)]
struct Context<'a> {
    cluster: &'a str,
    user: String,
}

/// Render a single-context kubeconfig
pub fn render(config: &KubeconfigConfig) -> Result<String, serde_yaml::Error> {
    let user_name = format!("{}-user", config.context_name);
    let user = match &config.auth {
        KubeconfigAuth::Token { token } => User {
            token: Some(token.clone()),
            ..User::default()
        },
        KubeconfigAuth::ClientCertificate {
            certificate_pem,
            key_pem,
        } => User {
            client_certificate_data: Some(STANDARD.encode(certificate_pem)),
            client_key_data: Some(STANDARD.encode(key_pem)),
            ..User::default()
        },
    };

    serde_yaml::to_string(&Kubeconfig {
        api_version: "v1",
        kind: "Config",
        clusters: vec![NamedCluster {
            name: &config.context_name,
            cluster: Cluster {
                server: &config.server,
                certificate_authority_data: STANDARD.encode(&config.ca_bundle),
            },
        }],
        users: vec![NamedUser {
            name: user_name.clone(),
            user,
        }],
        contexts: vec![NamedContext {
            name: &config.context_name,
            context: Context {
                cluster: &config.context_name,
                user: user_name,
            },
        }],
        current_context: &config.context_name,
    })
}
