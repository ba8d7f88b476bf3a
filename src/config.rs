use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub cors_origin: Option<String>,

    /// Shared secret the chat gateway presents as a bearer token.
    pub gateway_token: String,
    pub bot_username: String,

    pub tinkoff_terminal_key: String,
    pub tinkoff_password: String,
    pub tinkoff_test_mode: bool,

    /// Price of one subscription period, in kopecks.
    pub subscription_price: i64,
    pub subscription_days: i32,

    pub session_ttl_secs: u64,
    pub session_max_entries: usize,
    pub ad_cache_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".into())
                .parse()
                .unwrap_or(10),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .expect("PORT must be a number"),
            cors_origin: env::var("CORS_ORIGIN").ok().filter(|s| !s.is_empty()),

            gateway_token: env::var("GATEWAY_TOKEN").expect("GATEWAY_TOKEN must be set"),
            bot_username: env::var("BOT_USERNAME").unwrap_or_default(),

            tinkoff_terminal_key: env::var("TINKOFF_TERMINAL_KEY").unwrap_or_default(),
            tinkoff_password: env::var("TINKOFF_PASSWORD").unwrap_or_default(),
            tinkoff_test_mode: env::var("TINKOFF_TEST_MODE")
                .map(|v| v == "true")
                .unwrap_or(false),

            subscription_price: env::var("SUBSCRIPTION_PRICE")
                .unwrap_or_else(|_| "19900".into())
                .parse()
                .expect("SUBSCRIPTION_PRICE must be a number"),
            subscription_days: env::var("SUBSCRIPTION_DAYS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .unwrap_or(crate::models::payment::SUBSCRIPTION_DAYS),

            session_ttl_secs: env::var("SESSION_TTL_SECS")
                .unwrap_or_else(|_| "1800".into())
                .parse()
                .unwrap_or(1800),
            session_max_entries: env::var("SESSION_MAX_ENTRIES")
                .unwrap_or_else(|_| "10000".into())
                .parse()
                .unwrap_or(10_000),
            ad_cache_ttl_secs: env::var("AD_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "300".into())
                .parse()
                .unwrap_or(300),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tinkoff_configured(&self) -> bool {
        !self.tinkoff_terminal_key.is_empty() && !self.tinkoff_password.is_empty()
    }

    pub fn invite_link(&self, referral_code: &str) -> String {
        format!("https://t.me/{}?start=ref_{}", self.bot_username, referral_code)
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            database_url: String::new(),
            database_max_connections: 1,
            host: "127.0.0.1".into(),
            port: 0,
            cors_origin: None,
            gateway_token: "test-gateway-token".into(),
            bot_username: "habit_test_bot".into(),
            tinkoff_terminal_key: "TestTerminal".into(),
            tinkoff_password: "secret".into(),
            tinkoff_test_mode: true,
            subscription_price: 19900,
            subscription_days: 30,
            session_ttl_secs: 60,
            session_max_entries: 100,
            ad_cache_ttl_secs: 300,
        }
    }
}
