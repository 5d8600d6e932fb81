//! Thin client for the Daraja (M-Pesa) gateway: client-credentials token
//! exchange and STK push initiation. All credentials come from
//! [`MpesaConfig`]; nothing is read from the environment here.

use crate::{config::MpesaConfig, errors::ServiceError};
use base64::Engine as _;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, instrument};

/// Safaricom subscriber numbering: 07XX/01XX local forms or 2547/2541
/// international forms, with an optional leading plus.
static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\+?254|0)([17]\d{8})$").expect("phone pattern"));

/// Normalize a subscriber number to the canonical `254XXXXXXXXX` form the
/// gateway expects.
pub fn normalize_phone(raw: &str) -> Result<String, ServiceError> {
    let trimmed = raw.trim();
    match PHONE_PATTERN.captures(trimmed) {
        Some(caps) => Ok(format!("254{}", &caps[1])),
        None => Err(ServiceError::ValidationError(format!(
            "'{}' is not a valid M-Pesa phone number",
            trimmed
        ))),
    }
}

/// Accepted STK push request, as acknowledged by the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StkPushAccepted {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage")]
    pub customer_message: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// HTTP client for the gateway. The base URL is configurable so tests can
/// point it at a mock server.
#[derive(Clone)]
pub struct MpesaGateway {
    http: reqwest::Client,
    config: MpesaConfig,
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Time-stamped request password per the gateway's documented scheme:
    /// base64(short_code + passkey + timestamp).
    fn stk_password(&self, timestamp: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(format!(
            "{}{}{}",
            self.config.short_code, self.config.passkey, timestamp
        ))
    }

    /// Short-lived access token via the client-credentials exchange.
    async fn access_token(&self) -> Result<String, ServiceError> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url
        );
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Gateway token request failed");
                ServiceError::ExternalServiceError(format!("gateway unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway token request returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("malformed token response: {}", e))
        })?;
        Ok(token.access_token)
    }

    /// Issue an STK push charge request. On acceptance the gateway returns
    /// checkout/merchant request identifiers which key the later callback.
    #[instrument(skip(self), fields(phone = %phone, amount = amount))]
    pub async fn stk_push(
        &self,
        phone: &str,
        amount: u64,
        account_reference: &str,
        description: &str,
    ) -> Result<StkPushAccepted, ServiceError> {
        let token = self.access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();

        let body = json!({
            "BusinessShortCode": self.config.short_code,
            "Password": self.stk_password(&timestamp),
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": amount,
            "PartyA": phone,
            "PartyB": self.config.short_code,
            "PhoneNumber": phone,
            "CallBackURL": self.config.callback_url,
            "AccountReference": account_reference,
            "TransactionDesc": description,
        });

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "STK push request failed");
                ServiceError::ExternalServiceError(format!("gateway unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<GatewayError>()
                .await
                .ok()
                .and_then(|e| e.error_message)
                .unwrap_or_else(|| format!("gateway returned {}", status));
            return Err(ServiceError::ExternalServiceError(message));
        }

        let accepted: StkPushAccepted = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("malformed gateway response: {}", e))
        })?;

        if accepted.response_code != "0" {
            return Err(ServiceError::ExternalServiceError(
                accepted.response_description,
            ));
        }

        Ok(accepted)
    }
}
