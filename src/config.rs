// Settings are read once here (config.toml, .env and the process
// environment) and turned into an `AppConfig` that the rest of the run
// receives by reference.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::dongchedi_api::{DEFAULT_USER_AGENT, REQUEST_TIMEOUT};
use crate::error::{ConfigurationError, MonthError};
use crate::models::CategoryFilter;
use crate::month::{last_full_month, MonthRange, MonthToken};
use crate::scraper::{FetchOptions, DEFAULT_PAGE_SIZE, DEFAULT_THROTTLE, MAX_PAGES_PER_MONTH};

pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const SENDGRID_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;

/// Raw settings as found in the environment. Keys are the lower-cased
/// environment variable names (`DCD_PAGE_SIZE` -> `dcd_page_size`).
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    pub mail_provider: Option<String>,
    pub email_from: Option<String>,
    pub email_to: Option<String>,
    pub force_yyyymm: Option<String>,
    pub input_force_month: Option<String>,
    pub dcd_start_yyyymm: Option<String>,
    pub dcd_page_size: Option<String>,
    pub dcd_new_energy_type: Option<String>,
    pub dcd_throttle_seconds: Option<String>,
    pub dcd_max_pages: Option<String>,
    pub dcd_user_agent: Option<String>,
    pub report_timezone: Option<String>,
    pub output_dir: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<String>,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub smtp_security: Option<String>,
    pub sendgrid_api_key: Option<String>,
    pub sendgrid_api_url: Option<String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigurationError> {
        dotenv::dotenv().ok(); // Load .env file if present

        let builder = Config::builder()
            // Optional config.toml next to the binary's working directory
            .add_source(File::with_name("config").required(false))
            // Environment wins over the file
            .add_source(Environment::default());

        let settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }
}

/// Which months to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// Exactly this month.
    Single(MonthToken),
    /// From this month up to the last full month.
    From(MonthToken),
    /// Only the last full month.
    LastFull,
}

impl RangeSpec {
    pub fn resolve(&self, now: DateTime<Utc>, zone: Tz) -> Result<MonthRange, MonthError> {
        match *self {
            RangeSpec::Single(month) => Ok(MonthRange::single(month)),
            RangeSpec::From(start) => MonthRange::new(start, last_full_month(now, zone)),
            RangeSpec::LastFull => Ok(MonthRange::single(last_full_month(now, zone))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS.
    StartTls,
    /// TLS from the first byte (SMTPS).
    ImplicitTls,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub security: SmtpSecurity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendGridSettings {
    pub api_key: String,
    pub api_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    Smtp(SmtpSettings),
    SendGrid(SendGridSettings),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MailConfig {
    pub from: String,
    pub to: Vec<String>,
    pub transport: TransportConfig,
}

/// Everything a run needs, validated.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub range: RangeSpec,
    pub fetch: FetchOptions,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub timezone: Tz,
    pub output_dir: PathBuf,
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigurationError> {
        Self::from_settings(Settings::new()?)
    }

    pub fn from_settings(settings: Settings) -> Result<Self, ConfigurationError> {
        let mail = mail_config(&settings)?;

        let range = match (
            forced_month(&settings),
            non_empty(&settings.dcd_start_yyyymm),
        ) {
            (Some((key, forced)), _) => RangeSpec::Single(parse_month(key, forced)?),
            (None, Some(start)) => RangeSpec::From(parse_month("DCD_START_YYYYMM", start)?),
            (None, None) => RangeSpec::LastFull,
        };

        let page_size = match non_empty(&settings.dcd_page_size) {
            Some(raw) => parse_positive("DCD_PAGE_SIZE", raw)?,
            None => DEFAULT_PAGE_SIZE,
        };
        let max_pages = match non_empty(&settings.dcd_max_pages) {
            Some(raw) => parse_positive("DCD_MAX_PAGES", raw)?,
            None => MAX_PAGES_PER_MONTH,
        };
        let throttle = match non_empty(&settings.dcd_throttle_seconds) {
            Some(raw) => raw
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| invalid("DCD_THROTTLE_SECONDS", raw, "expected a non-negative number of seconds"))?,
            None => DEFAULT_THROTTLE,
        };
        let category = match non_empty(&settings.dcd_new_energy_type) {
            Some(raw) => Some(parse_category(raw)?),
            None => None,
        };

        let timezone = match non_empty(&settings.report_timezone) {
            Some(raw) => raw
                .parse::<Tz>()
                .map_err(|e| invalid("REPORT_TIMEZONE", raw, &e.to_string()))?,
            None => DEFAULT_TIMEZONE,
        };

        Ok(AppConfig {
            range,
            fetch: FetchOptions {
                page_size,
                category,
                throttle,
                max_pages,
            },
            user_agent: non_empty(&settings.dcd_user_agent)
                .unwrap_or(DEFAULT_USER_AGENT)
                .to_string(),
            request_timeout: REQUEST_TIMEOUT,
            timezone,
            output_dir: PathBuf::from(non_empty(&settings.output_dir).unwrap_or(".")),
            mail,
        })
    }
}

/// The forced month and the key it was read from. `FORCE_YYYYMM` wins.
fn forced_month(settings: &Settings) -> Option<(&'static str, &str)> {
    non_empty(&settings.force_yyyymm)
        .map(|raw| ("FORCE_YYYYMM", raw))
        .or_else(|| non_empty(&settings.input_force_month).map(|raw| ("INPUT_FORCE_MONTH", raw)))
}

fn mail_config(settings: &Settings) -> Result<MailConfig, ConfigurationError> {
    let to: Vec<String> = non_empty(&settings.email_to)
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|addr| !addr.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    if to.is_empty() {
        return Err(ConfigurationError::Missing("EMAIL_TO"));
    }
    let from = required(&settings.email_from, "EMAIL_FROM")?.to_string();

    let provider = non_empty(&settings.mail_provider).unwrap_or("SMTP");
    let transport = match provider.to_ascii_uppercase().as_str() {
        "SMTP" | "RELAY" => TransportConfig::Smtp(smtp_settings(settings)?),
        "SENDGRID" | "API" => TransportConfig::SendGrid(SendGridSettings {
            api_key: required(&settings.sendgrid_api_key, "SENDGRID_API_KEY")?.to_string(),
            api_url: non_empty(&settings.sendgrid_api_url)
                .unwrap_or(SENDGRID_API_URL)
                .to_string(),
        }),
        _ => return Err(invalid("MAIL_PROVIDER", provider, "expected SMTP or SENDGRID")),
    };

    Ok(MailConfig { from, to, transport })
}

fn smtp_settings(settings: &Settings) -> Result<SmtpSettings, ConfigurationError> {
    let host = required(&settings.smtp_host, "SMTP_HOST")?.to_string();
    let port = match non_empty(&settings.smtp_port) {
        Some(raw) => raw
            .parse::<u16>()
            .map_err(|e| invalid("SMTP_PORT", raw, &e.to_string()))?,
        None => DEFAULT_SMTP_PORT,
    };
    let username = required(&settings.smtp_user, "SMTP_USER")?.to_string();
    let password = required(&settings.smtp_pass, "SMTP_PASS")?.to_string();
    let security = match non_empty(&settings.smtp_security).map(str::to_ascii_lowercase).as_deref() {
        Some("starttls") => SmtpSecurity::StartTls,
        Some("tls") | Some("ssl") => SmtpSecurity::ImplicitTls,
        Some(other) => return Err(invalid("SMTP_SECURITY", other, "expected starttls or tls")),
        None if port == 465 => SmtpSecurity::ImplicitTls,
        None => SmtpSecurity::StartTls,
    };

    Ok(SmtpSettings {
        host,
        port,
        username,
        password,
        security,
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, key: &'static str) -> Result<&'a str, ConfigurationError> {
    non_empty(value).ok_or(ConfigurationError::Missing(key))
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_month(key: &'static str, raw: &str) -> Result<MonthToken, ConfigurationError> {
    raw.parse().map_err(|e: MonthError| invalid(key, raw, &e.to_string()))
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u32, ConfigurationError> {
    match raw.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(invalid(key, raw, "expected a positive integer")),
    }
}

fn parse_category(raw: &str) -> Result<CategoryFilter, ConfigurationError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "bev" => Ok(CategoryFilter::BatteryElectric),
        "2" | "phev" => Ok(CategoryFilter::PluginHybrid),
        _ => Err(invalid("DCD_NEW_ENERGY_TYPE", raw, "expected 1 (bev), 2 (phev) or empty")),
    }
}
