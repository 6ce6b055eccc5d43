use anyhow::{Context, Result};
use pushaas_orchestrations::worker::CompletionRouting;
use std::str::FromStr;

/// Which container platform the workers provision on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Kubernetes,
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kubernetes" => Ok(BackendKind::Kubernetes),
            "memory" => Ok(BackendKind::Memory),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Absent means in-memory store and queue
    pub database_url: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    /// Basic auth for the broker API, `None` when auth is disabled
    pub credentials: Option<Credentials>,
    pub backend: BackendKind,
    pub kube_namespace: String,
    pub workers: usize,
    pub completion_routing: CompletionRouting,
}

impl ServerConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let auth_enabled = lookup("PUSHAAS_API_AUTH_ENABLED")
            .map(|v| v.parse::<bool>())
            .transpose()
            .context("PUSHAAS_API_AUTH_ENABLED must be true or false")?
            .unwrap_or(true);

        let credentials = if auth_enabled {
            Some(Credentials {
                username: lookup("PUSHAAS_API_USERNAME")
                    .context("PUSHAAS_API_USERNAME must be set (or PUSHAAS_API_AUTH_ENABLED=false)")?,
                password: lookup("PUSHAAS_API_PASSWORD")
                    .context("PUSHAAS_API_PASSWORD must be set (or PUSHAAS_API_AUTH_ENABLED=false)")?,
            })
        } else {
            None
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            server_host: lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: lookup("SERVER_PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            credentials,
            backend: lookup("PUSHAAS_BACKEND")
                .unwrap_or_else(|| "kubernetes".to_string())
                .parse()
                .map_err(anyhow::Error::msg)
                .context("PUSHAAS_BACKEND must be 'kubernetes' or 'memory'")?,
            kube_namespace: lookup("PUSHAAS_KUBE_NAMESPACE").unwrap_or_else(|| "pushaas".to_string()),
            workers: lookup("PUSHAAS_WORKERS")
                .unwrap_or_else(|| "2".to_string())
                .parse()
                .context("PUSHAAS_WORKERS must be a positive number")?,
            completion_routing: lookup("PUSHAAS_COMPLETION_ROUTING")
                .unwrap_or_else(|| "inline".to_string())
                .parse()
                .map_err(anyhow::Error::msg)
                .context("PUSHAAS_COMPLETION_ROUTING must be 'inline' or 'queued'")?,
        })
    }
}
