// # parceld - Parcel Tracking CLI
//
// This binary is a THIN integration layer:
// - No tracking, caching or dispatch logic here
// - All of that lives in parcel-core and the adapter crates
// - Configuration is via environment variables (plus an optional JSON file
//   of provider options)
//
// The binary is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering the adapters with a Dispatcher
// 4. Running one query, or listing the registered providers
//
// ## Configuration
//
// - `PARCEL_CONFIG_PATH`: JSON file with provider options (optional)
// - `PARCEL_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
// - `PARCEL_ALIYUN_APP_CODE`: Aliyun market app code (enables "ALI")
// - `PARCEL_TRACKINGMORE_API_KEY`: TrackingMore API key (enables "TM")
//
// Credentials from the environment are injected into the matching
// provider's `settings` block, overriding the file.
//
// ## Usage
//
// ```bash
// export PARCEL_ALIYUN_APP_CODE=...
//
// # List providers and their effective configuration
// parceld
//
// # Query one shipment
// parceld ZTO ZT1234567890
// parceld SF SF1234567890 --phone 13812345678 --force --provider ALI
// ```

use anyhow::{Context, Result};
use clap::Parser;
use parcel_core::{Dispatcher, DispatcherConfig, MemoryCache, ProviderOptions, QueryParam};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Exit codes for different termination scenarios
///
/// - 0: Clean exit
/// - 1: Configuration or usage error
/// - 2: Runtime error
#[derive(Debug, Clone, Copy)]
enum ParcelExitCode {
    /// Clean exit
    Clean = 0,
    /// Configuration error or bad arguments
    ConfigError = 1,
    /// Runtime error (registration or query failure)
    RuntimeError = 2,
}

impl From<ParcelExitCode> for ExitCode {
    fn from(code: ParcelExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    config_path: Option<String>,
    log_level: String,
    aliyun_app_code: Option<String>,
    trackingmore_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        Self {
            config_path: env::var("PARCEL_CONFIG_PATH").ok().filter(|s| !s.is_empty()),
            log_level: env::var("PARCEL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            aliyun_app_code: env::var("PARCEL_ALIYUN_APP_CODE").ok().filter(|s| !s.is_empty()),
            trackingmore_api_key: env::var("PARCEL_TRACKINGMORE_API_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "PARCEL_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        for (var, value) in [
            ("PARCEL_ALIYUN_APP_CODE", &self.aliyun_app_code),
            ("PARCEL_TRACKINGMORE_API_KEY", &self.trackingmore_api_key),
        ] {
            if let Some(value) = value {
                let lower = value.to_lowercase();
                if lower.contains("your_") || lower.contains("replace_me") || lower == "token" {
                    anyhow::bail!(
                        "{} appears to be a placeholder. Use a real credential.",
                        var
                    );
                }
            }
        }

        if let Some(ref path) = self.config_path
            && !std::path::Path::new(path).is_file()
        {
            anyhow::bail!("PARCEL_CONFIG_PATH does not point to a file: {}", path);
        }

        if self.aliyun_app_code.is_none() && self.trackingmore_api_key.is_none() {
            anyhow::bail!(
                "No provider credentials configured. \
                Set PARCEL_ALIYUN_APP_CODE and/or PARCEL_TRACKINGMORE_API_KEY"
            );
        }

        Ok(())
    }

    fn log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Look up one shipment across the registered providers
///
/// Without arguments the registered providers are listed instead.
#[derive(Debug, Parser)]
#[command(name = "parceld", version, about = "Parcel tracking aggregator")]
struct Args {
    /// Carrier code or name, fuzzy-matched against each provider's codes
    #[arg(requires = "number")]
    code: Option<String>,

    /// Tracking number (6 to 16 ASCII letters or digits)
    number: Option<String>,

    /// Recipient phone, needed by some carriers (SF)
    #[arg(long, requires = "code")]
    phone: Option<String>,

    /// Only ask the provider with this name
    #[arg(short, long, requires = "code")]
    provider: Option<String>,

    /// Skip the request cap and cached push state
    #[arg(short, long, requires = "code")]
    force: bool,
}

impl Args {
    /// The query to run, or `None` to list providers
    fn query(&self) -> Option<QueryParam> {
        let (code, number) = (self.code.as_ref()?, self.number.as_ref()?);
        let param = QueryParam::new(code.as_str(), number.as_str());
        Some(match self.phone {
            Some(ref phone) => param.with_phone(phone.as_str()),
            None => param,
        })
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ParcelExitCode::ConfigError.into()
            } else {
                ParcelExitCode::Clean.into()
            };
        }
    };

    let config = Config::from_env();

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return ParcelExitCode::ConfigError.into();
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ParcelExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ParcelExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run(config, args).await {
            Ok(()) => ParcelExitCode::Clean,
            Err(e) => {
                error!("{:#}", e);
                ParcelExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Registration options for `name`, with an env credential injected
fn options_with_credential(
    file: &DispatcherConfig,
    name: &str,
    key: &str,
    credential: &str,
) -> ProviderOptions {
    let mut options = file
        .options_for(name)
        .cloned()
        .unwrap_or_else(|| ProviderOptions::named(name));

    let mut settings = match options.patch.settings.take() {
        Some(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    settings.insert(key.to_string(), serde_json::Value::String(credential.to_string()));
    options.patch.settings = Some(serde_json::Value::Object(settings));
    options
}

/// Build the dispatcher and run the requested command
async fn run(config: Config, args: Args) -> Result<()> {
    let file = match config.config_path {
        Some(ref path) => DispatcherConfig::from_file(path)
            .await
            .with_context(|| format!("Failed to load {}", path))?,
        None => DispatcherConfig::default(),
    };

    let dispatcher = Dispatcher::new(Arc::new(MemoryCache::new()));

    #[cfg(feature = "aliyun")]
    if let Some(ref app_code) = config.aliyun_app_code {
        let name = parcel_provider_aliyun::PROVIDER_NAME;
        info!("Registering provider {}", name);
        parcel_provider_aliyun::register(
            &dispatcher,
            options_with_credential(&file, name, "app_code", app_code),
        )
        .await
        .with_context(|| format!("Failed to register {}", name))?;
    }

    #[cfg(feature = "trackingmore")]
    if let Some(ref api_key) = config.trackingmore_api_key {
        let name = parcel_provider_trackingmore::PROVIDER_NAME;
        info!("Registering provider {}", name);
        parcel_provider_trackingmore::register(
            &dispatcher,
            options_with_credential(&file, name, "api_key", api_key),
        )
        .await
        .with_context(|| format!("Failed to register {}", name))?;
    }

    if dispatcher.is_empty() {
        anyhow::bail!("No providers registered (check enabled features and credentials)");
    }

    let Some(param) = args.query() else {
        let configs = dispatcher.get_config();
        for name in dispatcher.handler_names() {
            if let Some(provider) = configs.get(&name) {
                println!(
                    "{}\tweight={}\tpush={}\tmax_requests={}\trefetch={}s",
                    name,
                    provider.weight,
                    provider.push_based,
                    provider.max_request_count,
                    provider.min_refetch_interval_secs
                );
            }
        }
        return Ok(());
    };

    match dispatcher
        .query(&param, args.force, args.provider.as_deref())
        .await?
    {
        Some(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        None => {
            warn!("No provider accepts {} {}", param.code, param.number);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_core::ConfigPatch;
    use serde_json::json;

    fn parse(list: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("parceld").chain(list.iter().copied()))
    }

    #[test]
    fn test_args_empty_lists_providers() {
        let args = parse(&[]).unwrap();
        assert!(args.query().is_none());
        assert!(!args.force);
    }

    #[test]
    fn test_args_query() {
        let args = parse(&[
            "SF",
            "SF1234567890",
            "--force",
            "--phone",
            "13812345678",
            "--provider",
            "ALI",
        ])
        .unwrap();

        let param = args.query().unwrap();
        assert_eq!(param.code, "SF");
        assert_eq!(param.number, "SF1234567890");
        assert_eq!(param.phone, "13812345678");
        assert_eq!(args.provider.as_deref(), Some("ALI"));
        assert!(args.force);
    }

    #[test]
    fn test_args_accept_short_and_inline_forms() {
        let args = parse(&["-f", "ZTO", "ZT1234567890", "--phone=138", "-p", "TM"]).unwrap();
        assert!(args.force);
        assert_eq!(args.query().unwrap().phone, "138");
        assert_eq!(args.provider.as_deref(), Some("TM"));
    }

    #[test]
    fn test_args_help_is_not_a_usage_error() {
        let err = parse(&["--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        assert!(!err.use_stderr());
    }

    #[test]
    fn test_args_reject_bad_input() {
        assert!(parse(&["ZTO"]).is_err());
        assert!(parse(&["ZTO", "ZT1234567890", "--phone"]).is_err());
        assert!(parse(&["ZTO", "ZT1234567890", "--verbose"]).is_err());
        assert!(parse(&["--force"]).is_err());
    }

    #[test]
    fn test_credential_injected_into_file_settings() {
        let file = DispatcherConfig {
            providers: vec![ProviderOptions::new(
                "ALI",
                ConfigPatch::new()
                    .weight(5)
                    .settings(json!({ "app_code": "from-file", "region": "cn" })),
            )],
        };

        let options = options_with_credential(&file, "ALI", "app_code", "from-env");
        assert_eq!(options.patch.weight, Some(5));
        assert_eq!(
            options.patch.settings,
            Some(json!({ "app_code": "from-env", "region": "cn" }))
        );

        let fresh = options_with_credential(&file, "TM", "api_key", "key");
        assert_eq!(fresh.name, "TM");
        assert_eq!(fresh.patch.settings, Some(json!({ "api_key": "key" })));
    }

    #[test]
    fn test_validate_requires_a_credential() {
        let config = Config {
            config_path: None,
            log_level: "info".to_string(),
            aliyun_app_code: None,
            trackingmore_api_key: None,
        };
        assert!(config.validate().is_err());

        let config = Config {
            aliyun_app_code: Some("a1b2c3d4e5".to_string()),
            ..config
        };
        assert!(config.validate().is_ok());

        let config = Config {
            log_level: "loud".to_string(),
            ..config
        };
        assert!(config.validate().is_err());
    }
}
