use nest_checkout::components::nest::token::GOOGLE_TOKEN_URL;
use nest_checkout::error::{env_error, other_error, AppResult};
use url::Url;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const SDM_SCOPE: &str = "https://www.googleapis.com/auth/sdm.service";
const REDIRECT_URI: &str = "http://localhost:8080";

fn required_env(key: &str) -> AppResult<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| env_error(key))
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Only the client credentials are needed here, not the full service config
    dotenvy::dotenv().ok();
    let client_id = required_env("GOOGLE_CLIENT_ID")?;
    let client_secret = required_env("GOOGLE_CLIENT_SECRET")?;

    // Generate random state for security
    let state = uuid::Uuid::new_v4().to_string();

    let auth_url = Url::parse_with_params(
        AUTH_URL,
        &[
            ("client_id", client_id.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("response_type", "code"),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("scope", SDM_SCOPE),
            ("state", state.as_str()),
        ],
    )
    .map_err(|e| other_error(&format!("Invalid authorization URL: {}", e)))?;

    println!("Opening browser for Nest Device Access authorization...");
    println!("If it does not open, visit:\n{}", auth_url);
    if let Err(e) = webbrowser::open(auth_url.as_str()) {
        eprintln!("Could not open browser: {}", e);
    }

    // Start local server to receive the callback
    let server = tiny_http::Server::http("0.0.0.0:8080")
        .map_err(|e| other_error(&format!("Failed to start callback server: {}", e)))?;
    println!("Waiting for authorization callback...");

    let request = server.recv()?;
    let callback = Url::parse(&format!("{}{}", REDIRECT_URI, request.url()))
        .map_err(|e| other_error(&format!("Invalid callback URL: {}", e)))?;

    let param = |name: &str| {
        callback
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    };

    if let Some(error) = param("error") {
        request.respond(tiny_http::Response::from_string("Authorization was denied."))?;
        return Err(other_error(&format!("Authorization failed: {}", error)));
    }

    if param("state").as_deref() != Some(state.as_str()) {
        request.respond(tiny_http::Response::from_string("State mismatch, aborting."))?;
        return Err(other_error("OAuth state mismatch in callback"));
    }

    let code = param("code").ok_or_else(|| other_error("No authorization code found in callback"))?;

    // Exchange code for tokens
    let client = reqwest::Client::new();
    let response = client
        .post(GOOGLE_TOKEN_URL)
        .form(&[
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("code", code.as_str()),
            ("redirect_uri", REDIRECT_URI),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        let error_text = response.text().await?;
        request.respond(tiny_http::Response::from_string("Token exchange failed."))?;
        return Err(other_error(&format!("Failed to get token: {}", error_text)));
    }

    let token_data: serde_json::Value = response.json().await?;
    let refresh_token = token_data
        .get("refresh_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            other_error("No refresh token returned; revoke the app's access and try again")
        })?;

    // Send success response to browser
    request.respond(tiny_http::Response::from_string(
        "Authorization successful! You can close this window.",
    ))?;

    println!("\nAdd this to your environment:\n");
    println!("GOOGLE_REFRESH_TOKEN={}", refresh_token);

    Ok(())
}
