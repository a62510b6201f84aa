//! Process-wide configuration loaded from the environment.

use std::{env, time::Duration};

use tracing::warn;

/// Default port the HTTP/WebSocket listener binds to.
const DEFAULT_PORT: u16 = 8080;
/// Probability that the Little Girl is caught spying on the werewolf channel.
const DEFAULT_LITTLE_GIRL_CATCH_PROBABILITY: f64 = 0.1;
/// How long a disconnected client keeps its seat before lobby removal.
const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_secs(60);
/// Window granted to a dead Hunter for the revenge shot.
const DEFAULT_HUNTER_GRACE: Duration = Duration::from_secs(30);
/// Idle time after which a lobby that never started is cancelled.
const DEFAULT_ABANDONED_AFTER: Duration = Duration::from_secs(3_600);

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub jwt_secret: String,
    pub cors_origin: Option<String>,
    pub little_girl_catch_probability: f64,
    pub disconnect_grace: Duration,
    pub hunter_grace: Duration,
    pub abandoned_after: Duration,
}

impl AppConfig {
    /// Read configuration from the environment, falling back to defaults for
    /// everything except the JWT secret, which has a development-only default.
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .or_else(|_| env::var("SERVER_PORT"))
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET not set; using insecure development secret");
            "werewolf-dev-secret".to_owned()
        });

        let little_girl_catch_probability = env::var("LITTLE_GIRL_CATCH_PROBABILITY")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|p| (0.0..=1.0).contains(p))
            .unwrap_or(DEFAULT_LITTLE_GIRL_CATCH_PROBABILITY);

        Self {
            port,
            jwt_secret,
            cors_origin: env::var("FRONTEND_ORIGIN").ok(),
            little_girl_catch_probability,
            disconnect_grace: duration_from_env("DISCONNECT_GRACE_SECS", DEFAULT_DISCONNECT_GRACE),
            hunter_grace: duration_from_env("HUNTER_GRACE_SECS", DEFAULT_HUNTER_GRACE),
            abandoned_after: duration_from_env("ABANDONED_AFTER_SECS", DEFAULT_ABANDONED_AFTER),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            jwt_secret: "werewolf-dev-secret".to_owned(),
            cors_origin: None,
            little_girl_catch_probability: DEFAULT_LITTLE_GIRL_CATCH_PROBABILITY,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
            hunter_grace: DEFAULT_HUNTER_GRACE,
            abandoned_after: DEFAULT_ABANDONED_AFTER,
        }
    }
}

fn duration_from_env(var: &str, default: Duration) -> Duration {
    match env::var(var).ok().and_then(|value| value.parse::<u64>().ok()) {
        Some(secs) => Duration::from_secs(secs),
        None => default,
    }
}
