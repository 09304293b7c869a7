use super::error::{RestDaoError, RestResult};

/// Runtime configuration describing how to reach the managed backend's REST gateway.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project URL, without the `/rest/v1` suffix.
    pub base_url: String,
    /// Public api key sent in the `apikey` header.
    pub api_key: String,
    /// Bearer token sent instead of the api key when set (service role access).
    pub bearer_token: Option<String>,
}

impl RestConfig {
    /// Construct a configuration from an explicit project URL and public api key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            bearer_token: None,
        }
    }

    /// Authenticate requests with `token` rather than the api key.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Build a configuration by reading the expected environment variables.
    pub fn from_env() -> RestResult<Self> {
        let base_url = std::env::var("SUPABASE_URL").map_err(|_| RestDaoError::MissingEnvVar {
            var: "SUPABASE_URL",
        })?;
        let api_key =
            std::env::var("SUPABASE_ANON_KEY").map_err(|_| RestDaoError::MissingEnvVar {
                var: "SUPABASE_ANON_KEY",
            })?;

        let mut config = Self::new(base_url, api_key);
        if let Ok(token) = std::env::var("SUPABASE_SERVICE_ROLE_KEY") {
            config = config.with_bearer_token(token);
        }

        Ok(config)
    }
}
