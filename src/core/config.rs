mod parsing;

use std::time::Duration;

use thiserror::Error;

use parsing::{
    env_optional, env_or_default, is_supported_image_extension, parse_bool, parse_cors_origins,
    parse_environment, parse_positive, parse_string_list, parse_u32, parse_u64,
    DEFAULT_IMAGE_EXTENSIONS,
};

/// Upper bound for `OCR_MAX_UPLOAD_SIZE_MB`.
const MAX_UPLOAD_SIZE_MB: u64 = 1024;
/// Upper bound for `OCR_TASK_RETENTION_MINUTES` (one week).
const MAX_TASK_RETENTION_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    server: ServerSettings,
    runtime: RuntimeSettings,
    api: ApiSettings,
    cors: CorsSettings,
    limits: LimitSettings,
    processing: ProcessingSettings,
    retention: RetentionSettings,
    engines: EngineSettings,
    telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct ServerSettings {
    host: ServerHost,
    port: ServerPort,
}

#[derive(Debug, Clone)]
pub(crate) struct ApiSettings {
    pub(crate) service_name: String,
    pub(crate) api_prefix: String,
}

#[derive(Debug, Clone)]
pub(crate) struct CorsSettings {
    pub(crate) origins: Vec<String>,
}

/// Admission and upload ceilings.
#[derive(Debug, Clone)]
pub(crate) struct LimitSettings {
    pub(crate) max_concurrent_tasks: usize,
    pub(crate) max_files_per_batch: usize,
    pub(crate) max_upload_size_mb: u64,
    pub(crate) allowed_image_extensions: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ProcessingSettings {
    pub(crate) max_image_dimension: u32,
    pub(crate) enhance_contrast: bool,
    pub(crate) recognition_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct RetentionSettings {
    pub(crate) task_retention_minutes: u64,
    pub(crate) janitor_interval_seconds: u64,
    pub(crate) clear_on_download: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct EngineSettings {
    pub(crate) tesseract_path: String,
    pub(crate) vision_url: Option<String>,
    pub(crate) vision_model: String,
    pub(crate) probe_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Test => "test",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ServerHost(String);

#[derive(Debug, Clone, Copy)]
pub(crate) struct ServerPort(u16);

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid server host: {0}")]
    InvalidHost(String),
    #[error("invalid server port: {0}")]
    InvalidPort(String),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("invalid cors origins: {0}")]
    InvalidCors(String),
}

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("OCR_HOST", "0.0.0.0");
        let port = env_or_default("OCR_PORT", "5000");

        let environment = parse_environment(env_optional("OCR_ENV"));

        let service_name = env_or_default("OCR_SERVICE_NAME", "OCR Batch Service");
        let api_prefix = env_or_default("OCR_API_PREFIX", "/api");

        let cors_origins = parse_cors_origins(env_optional("OCR_CORS_ORIGINS"))?;

        let max_concurrent_tasks = parse_positive(
            "OCR_MAX_CONCURRENT_TASKS",
            env_or_default("OCR_MAX_CONCURRENT_TASKS", "2"),
        )?;
        let max_files_per_batch = parse_positive(
            "OCR_MAX_FILES_PER_BATCH",
            env_or_default("OCR_MAX_FILES_PER_BATCH", "3"),
        )?;
        let max_upload_size_mb =
            parse_u64("OCR_MAX_UPLOAD_SIZE_MB", env_or_default("OCR_MAX_UPLOAD_SIZE_MB", "16"))?;
        let allowed_image_extensions = parse_string_list(
            env_optional("OCR_ALLOWED_IMAGE_EXTENSIONS"),
            DEFAULT_IMAGE_EXTENSIONS,
        );

        let max_image_dimension = parse_u32(
            "OCR_MAX_IMAGE_DIMENSION",
            env_or_default("OCR_MAX_IMAGE_DIMENSION", "1024"),
        )?;
        let enhance_contrast =
            env_optional("OCR_ENHANCE_CONTRAST").map(|value| parse_bool(&value)).unwrap_or(true);
        let recognition_timeout_seconds = parse_u64(
            "OCR_RECOGNITION_TIMEOUT_SECONDS",
            env_or_default("OCR_RECOGNITION_TIMEOUT_SECONDS", "120"),
        )?;

        let task_retention_minutes = parse_u64(
            "OCR_TASK_RETENTION_MINUTES",
            env_or_default("OCR_TASK_RETENTION_MINUTES", "30"),
        )?;
        let janitor_interval_seconds = parse_u64(
            "OCR_JANITOR_INTERVAL_SECONDS",
            env_or_default("OCR_JANITOR_INTERVAL_SECONDS", "60"),
        )?;
        let clear_on_download =
            env_optional("OCR_CLEAR_ON_DOWNLOAD").map(|value| parse_bool(&value)).unwrap_or(false);

        let tesseract_path = env_or_default("OCR_TESSERACT_PATH", "tesseract");
        let vision_url = env_optional("OCR_VISION_URL");
        let vision_model = env_or_default("OCR_VISION_MODEL", "llava");
        let probe_timeout_seconds = parse_u64(
            "OCR_ENGINE_PROBE_TIMEOUT_SECONDS",
            env_or_default("OCR_ENGINE_PROBE_TIMEOUT_SECONDS", "10"),
        )?;

        let log_level = env_or_default("OCR_LOG_LEVEL", "info");
        let json = env_optional("OCR_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment },
            api: ApiSettings { service_name, api_prefix },
            cors: CorsSettings { origins: cors_origins },
            limits: LimitSettings {
                max_concurrent_tasks,
                max_files_per_batch,
                max_upload_size_mb,
                allowed_image_extensions,
            },
            processing: ProcessingSettings {
                max_image_dimension,
                enhance_contrast,
                recognition_timeout_seconds,
            },
            retention: RetentionSettings {
                task_retention_minutes,
                janitor_interval_seconds,
                clear_on_download,
            },
            engines: EngineSettings {
                tesseract_path,
                vision_url,
                vision_model,
                probe_timeout_seconds,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn limits(&self) -> &LimitSettings {
        &self.limits
    }

    pub(crate) fn processing(&self) -> &ProcessingSettings {
        &self.processing
    }

    pub(crate) fn retention(&self) -> &RetentionSettings {
        &self.retention
    }

    pub(crate) fn engines(&self) -> &EngineSettings {
        &self.engines
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.allowed_image_extensions.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "OCR_ALLOWED_IMAGE_EXTENSIONS",
                value: String::from("<empty>"),
            });
        }
        for extension in &self.limits.allowed_image_extensions {
            if !is_supported_image_extension(extension) {
                return Err(ConfigError::InvalidValue {
                    field: "OCR_ALLOWED_IMAGE_EXTENSIONS",
                    value: extension.clone(),
                });
            }
        }

        if !(1..=MAX_UPLOAD_SIZE_MB).contains(&self.limits.max_upload_size_mb) {
            return Err(ConfigError::InvalidValue {
                field: "OCR_MAX_UPLOAD_SIZE_MB",
                value: self.limits.max_upload_size_mb.to_string(),
            });
        }

        if !(1..=MAX_TASK_RETENTION_MINUTES).contains(&self.retention.task_retention_minutes) {
            return Err(ConfigError::InvalidValue {
                field: "OCR_TASK_RETENTION_MINUTES",
                value: self.retention.task_retention_minutes.to_string(),
            });
        }

        if self.processing.max_image_dimension == 0 {
            return Err(ConfigError::InvalidValue {
                field: "OCR_MAX_IMAGE_DIMENSION",
                value: String::from("0"),
            });
        }

        if self.processing.recognition_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "OCR_RECOGNITION_TIMEOUT_SECONDS",
                value: String::from("0"),
            });
        }

        if self.retention.janitor_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "OCR_JANITOR_INTERVAL_SECONDS",
                value: String::from("0"),
            });
        }

        if !self.api.api_prefix.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "OCR_API_PREFIX",
                value: self.api.api_prefix.clone(),
            });
        }

        Ok(())
    }
}

impl LimitSettings {
    pub(crate) fn max_upload_bytes(&self) -> u64 {
        self.max_upload_size_mb * 1024 * 1024
    }
}

impl ProcessingSettings {
    pub(crate) fn recognition_timeout(&self) -> Duration {
        Duration::from_secs(self.recognition_timeout_seconds)
    }
}

impl RetentionSettings {
    pub(crate) fn retention_window(&self) -> time::Duration {
        time::Duration::minutes(self.task_retention_minutes as i64)
    }

    pub(crate) fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_seconds)
    }
}

impl EngineSettings {
    pub(crate) fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }
}

impl ServerHost {
    fn parse(value: String) -> Result<Self, ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidHost(value));
        }
        Ok(Self(value))
    }
}

impl ServerPort {
    fn parse(value: String) -> Result<Self, ConfigError> {
        let parsed: u16 = value.parse().map_err(|_| ConfigError::InvalidPort(value.clone()))?;
        if parsed == 0 {
            return Err(ConfigError::InvalidPort(value));
        }
        Ok(Self(parsed))
    }
}
