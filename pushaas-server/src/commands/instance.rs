use anyhow::{Context, Result};
use pushaas_models::{ErrorResponse, Instance};
use reqwest::{Method, RequestBuilder, Response, StatusCode};

/// Thin client for the broker API
struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    credentials: Option<(String, String)>,
}

impl ApiClient {
    fn new(api_url: &str) -> Self {
        let credentials = match (
            std::env::var("PUSHAAS_API_USERNAME"),
            std::env::var("PUSHAAS_API_PASSWORD"),
        ) {
            (Ok(username), Ok(password)) => Some((username, password)),
            _ => None,
        };
        Self {
            base_url: api_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            credentials,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.credentials {
            Some((username, password)) => builder.basic_auth(username, Some(password)),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        builder
            .send()
            .await
            .with_context(|| format!("Failed to connect to API at {}", self.base_url))
    }
}

/// Turn an error response into a readable failure
async fn api_error(response: Response) -> anyhow::Error {
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(body) => anyhow::anyhow!("API error ({}): {}", status, body.message),
        Err(_) => anyhow::anyhow!("API error: {}", status),
    }
}

pub async fn run_create(api_url: &str, name: String, plan: String, team: String, user: String) -> Result<()> {
    let client = ApiClient::new(api_url);
    let form = [
        ("name", name.as_str()),
        ("plan", plan.as_str()),
        ("team", team.as_str()),
        ("user", user.as_str()),
    ];

    let response = client
        .send(client.request(Method::POST, "/resources").form(&form))
        .await?;
    if response.status() != StatusCode::CREATED {
        return Err(api_error(response).await);
    }

    println!("✓ Instance '{}' requested", name);
    println!("  Check progress with: pushaas-server status {}", name);
    Ok(())
}

pub async fn run_delete(api_url: &str, name: String) -> Result<()> {
    let client = ApiClient::new(api_url);
    let response = client
        .send(client.request(Method::DELETE, &format!("/resources/{}", name)))
        .await?;

    if response.status() == StatusCode::NOT_FOUND {
        anyhow::bail!("Instance '{}' not found", name);
    }
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    println!("✓ Deletion of '{}' requested", name);
    Ok(())
}

pub async fn run_status(api_url: &str, name: String) -> Result<()> {
    let client = ApiClient::new(api_url);
    let response = client
        .send(client.request(Method::GET, &format!("/resources/{}/status", name)))
        .await?;

    let status = match response.status() {
        StatusCode::ACCEPTED => "pending",
        StatusCode::NO_CONTENT => "running",
        StatusCode::INTERNAL_SERVER_ERROR => "failed",
        StatusCode::NOT_FOUND => anyhow::bail!("Instance '{}' not found", name),
        _ => return Err(api_error(response).await),
    };

    println!("{}: {}", name, status);
    Ok(())
}

pub async fn run_list(api_url: &str, output: String) -> Result<()> {
    let client = ApiClient::new(api_url);
    let response = client
        .send(client.request(Method::GET, "/resources/instances"))
        .await?;
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    let instances: Vec<Instance> = response.json().await.context("Invalid API response")?;

    if output == "json" {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    println!("{:<20} {:<10} {:<8} {:<15} {:<8} {}", "NAME", "STATUS", "PLAN", "TEAM", "APPS", "CREATED");
    println!("{}", "-".repeat(85));
    for instance in &instances {
        println!(
            "{:<20} {:<10} {:<8} {:<15} {:<8} {}",
            instance.name,
            instance.status,
            instance.plan,
            if instance.team.is_empty() { "-" } else { instance.team.as_str() },
            instance.bindings.len(),
            instance.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    println!();
    println!("{} instance(s) found", instances.len());

    Ok(())
}
