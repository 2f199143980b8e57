//! Configuration types.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::jobs::Target;

/// Parser tuning.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Labels every question must declare before it can close.
    pub required_labels: BTreeSet<char>,
    /// Hard cap on options per question (Telegram accepts at most 10).
    pub max_options: usize,
    /// Prompt length above which a warning is emitted.
    pub max_prompt_chars: usize,
    /// Option length above which a warning is emitted.
    pub max_option_chars: usize,
    /// Explanation length the poll can carry; longer ones are posted as a
    /// reply, with a warning at parse time.
    pub max_explanation_chars: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            required_labels: ['A', 'B', 'C', 'D'].into_iter().collect(),
            max_options: 10,
            max_prompt_chars: 300,
            max_option_chars: 100,
            max_explanation_chars: 200,
        }
    }
}

impl ParserConfig {
    /// Require the first `n` letters (`A`, `B`, ...) on every question.
    pub fn with_min_options(mut self, n: usize) -> Self {
        self.required_labels = ('A'..='Z').take(n).collect();
        self
    }

    pub fn from_env() -> Self {
        let default = Self::default();
        match env_parse::<usize>("QUIZCAST_MIN_OPTIONS") {
            Some(n) => default.with_min_options(n),
            None => default,
        }
    }
}

/// Delivery engine tuning.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Attempts per question on transient failures.
    pub max_attempts: u32,
    /// First backoff delay; doubles per attempt.
    pub base_backoff: Duration,
    /// Upper bound for a single backoff sleep.
    pub max_backoff: Duration,
    /// Added on top of a server-requested wait.
    pub rate_limit_margin: Duration,
    /// Consecutive failed questions that abort the job.
    pub breaker_threshold: u32,
    /// Pause after each posted question when the job is small.
    pub pacing_short: Duration,
    /// Pause after each posted question when the job is large.
    pub pacing_long: Duration,
    /// Jobs with more questions than this use `pacing_long`.
    pub pacing_threshold: usize,
    /// Bound on every single gateway call.
    pub call_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            rate_limit_margin: Duration::from_secs(1),
            breaker_threshold: 3,
            pacing_short: Duration::from_secs(1),
            pacing_long: Duration::from_secs(2),
            pacing_threshold: 50,
            call_timeout: Duration::from_secs(20),
        }
    }
}

impl DeliveryConfig {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_attempts: env_parse("QUIZCAST_MAX_RETRIES").unwrap_or(default.max_attempts),
            base_backoff: env_secs("QUIZCAST_BACKOFF_BASE_SECS").unwrap_or(default.base_backoff),
            max_backoff: env_secs("QUIZCAST_BACKOFF_MAX_SECS").unwrap_or(default.max_backoff),
            rate_limit_margin: env_secs("QUIZCAST_RATE_LIMIT_MARGIN_SECS")
                .unwrap_or(default.rate_limit_margin),
            breaker_threshold: env_parse("QUIZCAST_SEQUENTIAL_FAIL_ABORT")
                .unwrap_or(default.breaker_threshold),
            pacing_short: env_secs("QUIZCAST_POLL_DELAY_SHORT_SECS").unwrap_or(default.pacing_short),
            pacing_long: env_secs("QUIZCAST_POLL_DELAY_LONG_SECS").unwrap_or(default.pacing_long),
            pacing_threshold: env_parse("QUIZCAST_POLL_DELAY_THRESHOLD")
                .unwrap_or(default.pacing_threshold),
            call_timeout: env_secs("QUIZCAST_CALL_TIMEOUT_SECS").unwrap_or(default.call_timeout),
        }
    }
}

/// Bot runtime configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: SecretString,
    /// Numeric Telegram user ids allowed to operate the bot.
    pub operators: Vec<i64>,
    /// Chats a job may be delivered to.
    pub targets: Vec<Target>,
    pub db_path: PathBuf,
    /// Long-poll timeout passed to `getUpdates`.
    pub poll_timeout_secs: u64,
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()))?;

        let operators = parse_operators(&std::env::var("QUIZCAST_OPERATORS").unwrap_or_default())?;
        if operators.is_empty() {
            return Err(ConfigError::MissingEnvVar("QUIZCAST_OPERATORS".into()));
        }

        let targets = parse_targets(&std::env::var("QUIZCAST_TARGET_CHATS").unwrap_or_default());

        let db_path = std::env::var("QUIZCAST_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/quizcast.db"));

        Ok(Self {
            bot_token: SecretString::from(token),
            operators,
            targets,
            db_path,
            poll_timeout_secs: env_parse("QUIZCAST_POLL_TIMEOUT_SECS").unwrap_or(30),
        })
    }

    pub fn is_operator(&self, user_id: i64) -> bool {
        self.operators.contains(&user_id)
    }
}

/// Parse a comma-separated list of numeric user ids.
pub fn parse_operators(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|e| ConfigError::InvalidValue {
                key: "QUIZCAST_OPERATORS".into(),
                message: format!("'{s}': {e}"),
            })
        })
        .collect()
}

/// Parse `Name:chat_id,Name2:chat_id` pairs. Malformed entries are skipped.
pub fn parse_targets(raw: &str) -> Vec<Target> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|part| {
            let Some((name, id)) = part.rsplit_once(':') else {
                tracing::warn!(entry = part, "Ignoring target chat entry without ':'");
                return None;
            };
            match id.trim().parse::<i64>() {
                Ok(chat_id) if !name.trim().is_empty() => Some(Target::new(name.trim(), chat_id)),
                _ => {
                    tracing::warn!(entry = part, "Ignoring invalid target chat entry");
                    None
                }
            }
        })
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<f64>(key)
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parser_defaults_require_four_labels() {
        let cfg = ParserConfig::default();
        assert_eq!(cfg.required_labels, ['A', 'B', 'C', 'D'].into_iter().collect());
        let two = ParserConfig::default().with_min_options(2);
        assert_eq!(two.required_labels, ['A', 'B'].into_iter().collect());
    }

    #[test]
    fn delivery_defaults() {
        let cfg = DeliveryConfig::default();
        assert_eq!(cfg.max_attempts, 4);
        assert_eq!(cfg.breaker_threshold, 3);
        assert_eq!(cfg.pacing_threshold, 50);
        assert!(cfg.pacing_short < cfg.pacing_long);
    }

    #[test]
    fn targets_parse_name_id_pairs() {
        let targets = parse_targets("Class 9:-100123, Physics:-100456 ,bad, :12, Nope:abc");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0], Target::new("Class 9", -100123));
        assert_eq!(targets[1], Target::new("Physics", -100456));
    }

    #[test]
    fn operators_parse_or_fail() {
        assert_eq!(parse_operators("1, 2,,3").unwrap(), vec![1, 2, 3]);
        assert!(parse_operators("1,alice").is_err());
        assert!(parse_operators("").unwrap().is_empty());
    }

    #[test]
    fn only_listed_users_operate() {
        let cfg = BotConfig {
            bot_token: SecretString::from("t"),
            operators: vec![42],
            targets: vec![],
            db_path: PathBuf::from(":memory:"),
            poll_timeout_secs: 30,
        };
        assert!(cfg.is_operator(42));
        assert!(!cfg.is_operator(43));
    }
}
