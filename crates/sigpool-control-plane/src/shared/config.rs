//! Process configuration read from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sigpool_core::{LaunchTemplateRef, DEFAULT_PLACEHOLDER};

use crate::features::capacity_table::service::BindingMode;
use crate::features::dispatch::service::{DispatchSettings, MAX_BATCH_SIZE};
use crate::features::provisioning::readiness::ReadinessPolicy;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};

const DEFAULT_LISTEN_PORT: u16 = 8080;
const DEFAULT_LAUNCH_TEMPLATE: &str = "signalling-server";
const DEFAULT_APPLICATION_TAG: &str = "sigpool";
const DEFAULT_INSTANCE_NAME: &str = "signalling-server";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Where downstream notifications go. Without URLs they are only recorded
/// in memory and logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierTargets {
    Http {
        keep_alive_url: String,
        session_details_url: String,
    },
    Local,
}

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub listen_addr: SocketAddr,
    pub matchmaker_url: String,
    pub matchmaker_client_secret: String,
    pub matchmaker_timeout: Duration,
    pub matchmaker_address: String,
    pub concurrency_limit: u32,
    pub placement_candidates: Vec<String>,
    pub launch_template: LaunchTemplateRef,
    pub bootstrap_template_file: Option<PathBuf>,
    pub bootstrap_placeholder: String,
    pub readiness: ReadinessPolicy,
    pub dispatch: DispatchSettings,
    pub queue_visibility_timeout: Duration,
    /// Zero disables the scheduled dispatch task.
    pub dispatch_interval: Duration,
    pub notifier: NotifierTargets,
    pub application_tag: String,
    pub instance_name: String,
    pub binding_mode: BindingMode,
    pub slot_seed_file: Option<PathBuf>,
    pub clear_slots_on_seed: bool,
    pub bulk_fill_on_start: bool,
    pub log_format: LogFormat,
}

impl ControlPlaneConfig {
    pub fn from_env() -> ControlPlaneResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> ControlPlaneResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let listen_addr: SocketAddr = match get("SIGPOOL_LISTEN_ADDR") {
            Some(raw) => raw.parse().map_err(|e| {
                ControlPlaneError::Config(format!("SIGPOOL_LISTEN_ADDR={raw} is invalid: {e}"))
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)),
        };

        let matchmaker_url = get("MATCHMAKER_URL")
            .ok_or_else(|| ControlPlaneError::Config("MATCHMAKER_URL is required".to_string()))?;
        let matchmaker_client_secret = get("MATCHMAKER_CLIENT_SECRET").unwrap_or_default();
        let matchmaker_timeout = seconds_or(&get, "MATCHMAKER_TIMEOUT_SECS", 10)?;
        if matchmaker_timeout.is_zero() {
            return Err(ControlPlaneError::Config(
                "MATCHMAKER_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        let matchmaker_address =
            get("MATCHMAKER_ADDRESS").unwrap_or_else(|| "127.0.0.1".to_string());

        let concurrency_limit: u32 = parse_or(&get, "CONCURRENCY_LIMIT", 1)?;
        if concurrency_limit == 0 {
            return Err(ControlPlaneError::Config(
                "CONCURRENCY_LIMIT must be greater than zero".to_string(),
            ));
        }

        let placement_candidates = get("PLACEMENT_CANDIDATES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let launch_template = LaunchTemplateRef::parse(
            &get("LAUNCH_TEMPLATE").unwrap_or_else(|| DEFAULT_LAUNCH_TEMPLATE.to_string()),
        )
        .map_err(|e| ControlPlaneError::Config(format!("LAUNCH_TEMPLATE: {e}")))?;

        let readiness = ReadinessPolicy::new(
            seconds_or(&get, "READINESS_POLL_INTERVAL_SECS", 2)?,
            seconds_or(&get, "READINESS_MAX_WAIT_SECS", 20)?,
        )?;

        let batch_size: usize = parse_or(&get, "QUEUE_BATCH_SIZE", MAX_BATCH_SIZE)?;
        if !(1..=MAX_BATCH_SIZE).contains(&batch_size) {
            return Err(ControlPlaneError::Config(format!(
                "QUEUE_BATCH_SIZE must be between 1 and {MAX_BATCH_SIZE}, got {batch_size}"
            )));
        }
        let dispatch = DispatchSettings {
            batch_size,
            receive_wait: seconds_or(&get, "QUEUE_WAIT_SECS", 2)?,
        };

        let notifier = match (get("KEEP_ALIVE_URL"), get("SESSION_DETAILS_URL")) {
            (Some(keep_alive_url), Some(session_details_url)) => NotifierTargets::Http {
                keep_alive_url,
                session_details_url,
            },
            (None, None) => NotifierTargets::Local,
            _ => {
                return Err(ControlPlaneError::Config(
                    "KEEP_ALIVE_URL and SESSION_DETAILS_URL must be set together".to_string(),
                ))
            }
        };

        let binding_mode = if flag(&get, "CONDITIONAL_SLOT_BINDING")? {
            BindingMode::Conditional
        } else {
            BindingMode::Unconditional
        };

        let log_format = match get("SIGPOOL_LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ControlPlaneError::Config(format!(
                    "SIGPOOL_LOG_FORMAT must be text or json, got {other}"
                )))
            }
        };

        Ok(Self {
            listen_addr,
            matchmaker_url,
            matchmaker_client_secret,
            matchmaker_timeout,
            matchmaker_address,
            concurrency_limit,
            placement_candidates,
            launch_template,
            bootstrap_template_file: get("BOOTSTRAP_TEMPLATE_FILE").map(PathBuf::from),
            bootstrap_placeholder: get("BOOTSTRAP_PLACEHOLDER")
                .unwrap_or_else(|| DEFAULT_PLACEHOLDER.to_string()),
            readiness,
            dispatch,
            queue_visibility_timeout: seconds_or(&get, "QUEUE_VISIBILITY_TIMEOUT_SECS", 30)?,
            dispatch_interval: seconds_or(&get, "DISPATCH_INTERVAL_SECS", 60)?,
            notifier,
            application_tag: get("APPLICATION_TAG")
                .unwrap_or_else(|| DEFAULT_APPLICATION_TAG.to_string()),
            instance_name: get("INSTANCE_NAME")
                .unwrap_or_else(|| DEFAULT_INSTANCE_NAME.to_string()),
            binding_mode,
            slot_seed_file: get("SLOT_SEED_FILE").map(PathBuf::from),
            clear_slots_on_seed: flag(&get, "CLEAR_SLOTS_ON_SEED")?,
            bulk_fill_on_start: flag(&get, "BULK_FILL_ON_START")?,
            log_format,
        })
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> ControlPlaneResult<T>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ControlPlaneError::Config(format!("{key}={raw} is invalid: {e}"))),
        None => Ok(default),
    }
}

fn seconds_or<G>(get: &G, key: &str, default: u64) -> ControlPlaneResult<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default).map(Duration::from_secs)
}

fn flag<G>(get: &G, key: &str) -> ControlPlaneResult<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("false") | Some("0") | Some("no") => Ok(false),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some(other) => Err(ControlPlaneError::Config(format!(
            "{key} must be a boolean, got {other}"
        ))),
    }
}
