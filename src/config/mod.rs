//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

use crate::game::physics::CollisionResponse;
use crate::game::rules::{EightOnBreak, IllegalBreak, RulesConfig};
use crate::game::MatchSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    /// One JSON object per event, for log shippers
    Json,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log line format
    pub log_format: LogFormat,
    /// Allowed client origins for CORS, comma-separated
    pub client_origin: String,

    /// Shot clock per turn
    pub turn_time_secs: u64,
    pub eight_on_break: EightOnBreak,
    pub illegal_break: IllegalBreak,
    pub call_pocket_required: bool,
    pub collision_response: CollisionResponse,
    pub break_cluster_heuristic: bool,
    /// Running out of time hands the opponent ball-in-hand
    pub timeout_ball_in_hand: bool,
    /// Seconds a finished table stays up before teardown
    pub finished_linger_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let settings = MatchSettings::default();
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            client_origin: "http://localhost:5173".to_string(),
            turn_time_secs: settings.turn_secs,
            eight_on_break: settings.rules.eight_on_break,
            illegal_break: settings.rules.illegal_break,
            call_pocket_required: settings.rules.call_pocket_required,
            collision_response: settings.collision_response,
            break_cluster_heuristic: settings.break_cluster,
            timeout_ball_in_hand: settings.rules.timeout_grants_ball_in_hand,
            finished_linger_secs: settings.linger_secs,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup; unset keys keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Render-style PORT wins over SERVER_ADDR
        let server_addr = match (lookup("PORT"), lookup("SERVER_ADDR")) {
            (Some(port), _) => format!("0.0.0.0:{}", port.trim()),
            (None, Some(addr)) => addr,
            (None, None) => defaults.server_addr.to_string(),
        };

        Ok(Self {
            server_addr: server_addr
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: parse_var(&lookup, "LOG_FORMAT", defaults.log_format, |v| match v {
                "text" => Some(LogFormat::Text),
                "json" => Some(LogFormat::Json),
                _ => None,
            })?,
            client_origin: lookup("CLIENT_ORIGIN").unwrap_or(defaults.client_origin),

            turn_time_secs: parse_var(&lookup, "TURN_TIME_SECS", defaults.turn_time_secs, |v| {
                v.parse().ok().filter(|secs| *secs > 0)
            })?,
            eight_on_break: parse_var(&lookup, "EIGHT_ON_BREAK", defaults.eight_on_break, |v| {
                match v {
                    "respot" => Some(EightOnBreak::Respot),
                    "rerack_same" => Some(EightOnBreak::RerackSameBreaker),
                    "rerack_opponent" => Some(EightOnBreak::RerackOpponentBreaks),
                    _ => None,
                }
            })?,
            illegal_break: parse_var(&lookup, "ILLEGAL_BREAK", defaults.illegal_break, |v| {
                match v {
                    "accept" => Some(IllegalBreak::AcceptTable),
                    "rerack_opponent" => Some(IllegalBreak::RerackOpponentBreaks),
                    "rerack_same" => Some(IllegalBreak::RerackSameBreaker),
                    _ => None,
                }
            })?,
            call_pocket_required: parse_var(
                &lookup,
                "CALL_POCKET_REQUIRED",
                defaults.call_pocket_required,
                parse_bool,
            )?,
            collision_response: parse_var(
                &lookup,
                "COLLISION_RESPONSE",
                defaults.collision_response,
                |v| match v {
                    "planned" => Some(CollisionResponse::Planned),
                    "physical" => Some(CollisionResponse::Physical),
                    _ => None,
                },
            )?,
            break_cluster_heuristic: parse_var(
                &lookup,
                "BREAK_CLUSTER_HEURISTIC",
                defaults.break_cluster_heuristic,
                parse_bool,
            )?,
            timeout_ball_in_hand: parse_var(
                &lookup,
                "TIMEOUT_BALL_IN_HAND",
                defaults.timeout_ball_in_hand,
                parse_bool,
            )?,
            finished_linger_secs: parse_var(
                &lookup,
                "FINISHED_LINGER_SECS",
                defaults.finished_linger_secs,
                |v| v.parse().ok(),
            )?,
        })
    }

    /// Settings handed to every new table
    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            rules: RulesConfig {
                eight_on_break: self.eight_on_break,
                illegal_break: self.illegal_break,
                call_pocket_required: self.call_pocket_required,
                timeout_grants_ball_in_hand: self.timeout_ball_in_hand,
            },
            turn_secs: self.turn_time_secs,
            collision_response: self.collision_response,
            break_cluster: self.break_cluster_heuristic,
            linger_secs: self.finished_linger_secs,
        }
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => {
            let value = raw.trim().to_ascii_lowercase();
            parse(&value).ok_or(ConfigError::Invalid { var, value: raw })
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}
