//! Tinkoff acquiring API v2: request signing, `Init` and `GetState`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use crate::auth::middleware::constant_time_eq;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::services::payments::PaymentGateway;

const API_URL: &str = "https://securepay.tinkoff.ru/v2";
const TEST_API_URL: &str = "https://rest-api-test.tinkoff.ru/v2";

/// Request token: every field except `Token`, plus `Password`, ordered by
/// key, values concatenated, SHA-256, lowercase hex.
pub fn generate_token(params: &BTreeMap<&str, String>, password: &str) -> String {
    let mut fields: BTreeMap<&str, &str> = params
        .iter()
        .filter(|(key, _)| **key != "Token")
        .map(|(key, value)| (*key, value.as_str()))
        .collect();
    fields.insert("Password", password);

    let mut hasher = Sha256::new();
    for value in fields.values() {
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Payment ids arrive as numbers in notifications and as strings elsewhere.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(i64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Str(s)) => s,
        Some(Raw::Num(n)) => n.to_string(),
        None => String::new(),
    })
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Notification {
    #[serde(rename = "TerminalKey")]
    pub terminal_key: String,
    #[serde(rename = "OrderId")]
    pub order_id: String,
    #[serde(rename = "Success")]
    pub success: bool,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "PaymentId", deserialize_with = "string_or_number", default)]
    pub payment_id: String,
    #[serde(rename = "ErrorCode", default)]
    pub error_code: String,
    #[serde(rename = "Amount", default)]
    pub amount: i64,
    #[serde(rename = "Token", default)]
    pub token: String,
}

impl Notification {
    fn signed_fields(&self) -> BTreeMap<&str, String> {
        BTreeMap::from([
            ("TerminalKey", self.terminal_key.clone()),
            ("OrderId", self.order_id.clone()),
            ("Success", self.success.to_string()),
            ("Status", self.status.clone()),
            ("PaymentId", self.payment_id.clone()),
            ("ErrorCode", self.error_code.clone()),
            ("Amount", self.amount.to_string()),
        ])
    }

    pub fn verify(&self, password: &str) -> bool {
        let expected = generate_token(&self.signed_fields(), password);
        constant_time_eq(&expected, &self.token)
    }

    #[cfg(test)]
    pub fn sign(mut self, password: &str) -> Self {
        self.token = generate_token(&self.signed_fields(), password);
        self
    }
}

/// Shared shape of the `Init` and `GetState` responses.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayResponse {
    #[serde(rename = "Success")]
    pub success: bool,
    #[serde(rename = "ErrorCode", default)]
    pub error_code: String,
    #[serde(rename = "Message", default)]
    pub message: Option<String>,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "PaymentId", deserialize_with = "string_or_number", default)]
    pub payment_id: String,
    #[serde(rename = "OrderId", default)]
    pub order_id: String,
    #[serde(rename = "Amount", default)]
    pub amount: i64,
    #[serde(rename = "PaymentURL", default)]
    pub payment_url: Option<String>,
}

#[derive(Clone)]
pub struct TinkoffClient {
    http: reqwest::Client,
    base_url: String,
    terminal_key: String,
    password: String,
}

impl TinkoffClient {
    pub fn new(config: &Config) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            http,
            base_url: if config.tinkoff_test_mode {
                TEST_API_URL.into()
            } else {
                API_URL.into()
            },
            terminal_key: config.tinkoff_terminal_key.clone(),
            password: config.tinkoff_password.clone(),
        })
    }

    async fn call(&self, method: &str, body: &serde_json::Value) -> AppResult<GatewayResponse> {
        let url = format!("{}/{}", self.base_url, method);
        tracing::debug!(method, "Calling payment gateway");

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("{method}: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::Gateway(format!("{method}: {e}")))?;

        if text.is_empty() {
            return Err(AppError::Gateway(format!("{method}: empty response ({status})")));
        }

        let parsed: GatewayResponse = serde_json::from_str(&text)
            .map_err(|e| AppError::Gateway(format!("{method}: bad response ({status}): {e}")))?;

        if !parsed.success {
            return Err(AppError::Gateway(format!(
                "{method}: {} {}",
                parsed.error_code,
                parsed.message.as_deref().unwrap_or("")
            )));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl PaymentGateway for TinkoffClient {
    async fn init(
        &self,
        order_id: &str,
        amount: i64,
        description: &str,
        external_id: i64,
    ) -> AppResult<GatewayResponse> {
        let signed = BTreeMap::from([
            ("TerminalKey", self.terminal_key.clone()),
            ("Amount", amount.to_string()),
            ("OrderId", order_id.to_string()),
            ("Description", description.to_string()),
        ]);
        let token = generate_token(&signed, &self.password);

        let body = serde_json::json!({
            "TerminalKey": self.terminal_key,
            "Amount": amount,
            "OrderId": order_id,
            "Description": description,
            "Token": token,
            "DATA": { "TelegramUserID": external_id.to_string() },
        });

        self.call("Init", &body).await
    }

    async fn get_state(&self, payment_id: &str) -> AppResult<GatewayResponse> {
        let signed = BTreeMap::from([
            ("TerminalKey", self.terminal_key.clone()),
            ("PaymentId", payment_id.to_string()),
        ]);
        let token = generate_token(&signed, &self.password);

        let body = serde_json::json!({
            "TerminalKey": self.terminal_key,
            "PaymentId": payment_id,
            "Token": token,
        });

        self.call("GetState", &body).await
    }

    fn verify_notification(&self, notification: &Notification) -> bool {
        notification.verify(&self.password)
    }
}
