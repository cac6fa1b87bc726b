use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use teloxide::types::{ChatId, UserId};

#[derive(Serialize, Deserialize, Debug)]
pub struct Config {
    pub telegram: Telegram,
    pub db: String,
    pub cache_dir: String,
    pub server_addr: SocketAddr,
    pub services: Services,
    pub payment: Payment,
    pub ingest: Ingest,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Telegram {
    pub token: String,
    pub admins: Vec<UserId>,
    /// Channel where client requests are broadcast for agents.
    pub proposal_channel: ChatId,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Services {
    pub oracle: OracleConfig,
    pub openai: OpenAI,
}

/// The intent-extraction backend. `models` is an ordered fallback
/// chain, tried first to last.
#[derive(Serialize, Deserialize, Debug)]
pub struct OracleConfig {
    pub api_key: String,
    pub api_base: Option<String>,
    pub models: Vec<String>,
    #[serde(default)]
    pub disable: bool,
}

/// Speech-to-text (whisper) backend.
#[derive(Serialize, Deserialize, Debug)]
pub struct OpenAI {
    pub api_key: String,
    #[serde(default)]
    pub disable: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Payment {
    /// Card payment provider token from BotFather. Telegram Stars
    /// invoices need no token.
    pub provider_token: String,
    /// USD cents for the card plans.
    pub card_week_cents: i32,
    pub card_month_cents: i32,
    /// Telegram Stars for the same plans.
    pub stars_week: i32,
    pub stars_month: i32,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Ingest {
    #[serde(default)]
    pub disable: bool,
    pub interval_hours: u64,
    pub base_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_example_config() -> anyhow::Result<()> {
        let config_text = std::fs::read_to_string("config.example.yaml")?;
        let config: Config = serde_yaml::from_str(&config_text)?;

        similar_asserts::assert_serde_eq!(
            serde_yaml::to_value(&config)?,
            serde_yaml::from_str::<serde_yaml::Value>(&config_text)?,
            "Extra fields in config.example.yaml?",
        );

        Ok(())
    }
}
