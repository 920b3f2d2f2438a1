use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::env;
use std::time::Duration;

pub const DEFAULT_FREE_QUOTA: i32 = 5;
pub const DEFAULT_GRACE_PERIOD_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct StudioConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub store: StoreConfig,
    pub stripe: StripeConfig,
    pub model: ModelConfig,
    pub media: MediaConfig,
    pub quota: QuotaConfig,
    pub http: HttpClientConfig,
}

#[derive(Debug, Clone)]
pub enum StoreConfig {
    Postgres(DatabaseConfig),
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    pub price_lookup_keys: Vec<String>,
    /// Public app origin; the billing portal returns to `{app_url}/settings/billing`.
    pub app_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelProvider {
    OpenAi,
    Mock,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    pub api_key: Secret<String>,
    pub api_base_url: String,
    pub vision_model: String,
    pub image_model: String,
    pub image_size: String,
    pub image_quality: String,
    pub describe_max_tokens: u32,
}

#[derive(Debug, Clone)]
pub enum MediaConfig {
    Cloudinary(CloudinaryConfig),
    Local(LocalMediaConfig),
}

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: Secret<String>,
    pub folder: String,
    pub api_base_url: String,
}

#[derive(Debug, Clone)]
pub struct LocalMediaConfig {
    pub path: String,
    /// The service serves `path` under `/media`; point this at that route
    /// or at whatever fronts the directory.
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub free_quota: i32,
    pub grace_period: chrono::Duration,
    /// Give back the unit charged for a prompt whose generation failed at the provider.
    pub refund_failed_generations: bool,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_quota: DEFAULT_FREE_QUOTA,
            grace_period: chrono::Duration::hours(DEFAULT_GRACE_PERIOD_HOURS),
            refund_failed_generations: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retry: RetryConfig::with_max_retries(2),
        }
    }
}

impl StudioConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let store = match get_env("STUDIO_STORE", Some("postgres"), false)?.as_str() {
            "memory" if !is_prod => StoreConfig::Memory,
            "memory" => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "STUDIO_STORE=memory is not allowed in production"
                )))
            }
            _ => StoreConfig::Postgres(DatabaseConfig {
                url: Secret::new(get_env("DATABASE_URL", None, is_prod)?),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10, is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 1, is_prod)?,
            }),
        };

        let stripe = StripeConfig {
            secret_key: Secret::new(get_env("STRIPE_SECRET_KEY", Some(""), is_prod)?),
            webhook_secret: Secret::new(get_env("STRIPE_WEBHOOK_SECRET", Some(""), is_prod)?),
            api_base_url: get_env(
                "STRIPE_API_BASE_URL",
                Some("https://api.stripe.com/"),
                is_prod,
            )?,
            price_lookup_keys: get_env(
                "STRIPE_PRICE_LOOKUP_KEYS",
                Some("t3-stack-monthly"),
                is_prod,
            )?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
            app_url: get_env("APP_URL", Some("http://localhost:3000"), is_prod)?,
        };

        let provider = match get_env("STUDIO_MODEL_PROVIDER", Some("openai"), is_prod)?.as_str()
        {
            "mock" => ModelProvider::Mock,
            _ => ModelProvider::OpenAi,
        };
        let model = ModelConfig {
            provider,
            api_key: Secret::new(get_env(
                "OPENAI_API_KEY",
                Some(""),
                is_prod && provider == ModelProvider::OpenAi,
            )?),
            api_base_url: get_env(
                "OPENAI_API_BASE_URL",
                Some("https://api.openai.com/v1"),
                is_prod,
            )?,
            vision_model: get_env("OPENAI_VISION_MODEL", Some("gpt-4-vision-preview"), is_prod)?,
            image_model: get_env("OPENAI_IMAGE_MODEL", Some("dall-e-3"), is_prod)?,
            image_size: get_env("OPENAI_IMAGE_SIZE", Some("1792x1024"), is_prod)?,
            image_quality: get_env("OPENAI_IMAGE_QUALITY", Some("standard"), is_prod)?,
            describe_max_tokens: parse_env("OPENAI_DESCRIBE_MAX_TOKENS", 500, is_prod)?,
        };

        let media = match get_env("STUDIO_MEDIA_PROVIDER", Some("cloudinary"), is_prod)?.as_str()
        {
            "local" => MediaConfig::Local(LocalMediaConfig {
                path: get_env("MEDIA_LOCAL_PATH", Some("./media"), is_prod)?,
                public_base_url: get_env(
                    "MEDIA_PUBLIC_BASE_URL",
                    Some("http://localhost:8080/media"),
                    is_prod,
                )?,
            }),
            _ => MediaConfig::Cloudinary(CloudinaryConfig {
                cloud_name: get_env("CLOUDINARY_CLOUD_NAME", Some(""), is_prod)?,
                api_key: get_env("CLOUDINARY_API_KEY", Some(""), is_prod)?,
                api_secret: Secret::new(get_env("CLOUDINARY_API_SECRET", Some(""), is_prod)?),
                folder: get_env("CLOUDINARY_FOLDER", Some("t3stack"), is_prod)?,
                api_base_url: get_env(
                    "CLOUDINARY_API_BASE_URL",
                    Some("https://api.cloudinary.com/v1_1"),
                    is_prod,
                )?,
            }),
        };

        let quota = QuotaConfig {
            free_quota: parse_env("STUDIO_FREE_QUOTA", DEFAULT_FREE_QUOTA, is_prod)?,
            grace_period: chrono::Duration::hours(parse_env(
                "STUDIO_GRACE_PERIOD_HOURS",
                DEFAULT_GRACE_PERIOD_HOURS,
                is_prod,
            )?),
            refund_failed_generations: parse_env(
                "STUDIO_REFUND_FAILED_GENERATIONS",
                false,
                is_prod,
            )?,
        };

        let http = HttpClientConfig {
            timeout: Duration::from_secs(parse_env("STUDIO_HTTP_TIMEOUT_SECS", 60, is_prod)?),
            retry: RetryConfig::with_max_retries(parse_env("STUDIO_HTTP_MAX_RETRIES", 2, is_prod)?),
        };

        Ok(StudioConfig {
            common,
            service_name: get_env("SERVICE_NAME", Some("studio-service"), false)?,
            store,
            stripe,
            model,
            media,
            quota,
            http,
        })
    }

    pub fn billing_portal_return_url(&self) -> String {
        format!("{}/settings/billing", self.stripe.app_url.trim_end_matches('/'))
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr + ToString,
{
    let raw = get_env(key, Some(&default.to_string()), is_prod)?;
    raw.parse().map_err(|_| {
        AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, raw))
    })
}
