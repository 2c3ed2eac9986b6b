use crate::error::BillingError;
use crate::service::calculator::resolve_rate;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub billing: BillingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// 计费配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// 默认单价 (十进制文本), 数据库未设置时使用
    pub default_rate: String,
    /// 金额展示保留的小数位
    pub display_scale: i64,
    /// 批量保存要求每块表用量 > 0
    pub bulk_requires_positive_consumption: bool,
    /// 单条保存要求每块表用量 > 0
    pub single_requires_positive_consumption: bool,
}

impl BillingConfig {
    pub fn default_rate(&self) -> Result<BigDecimal, BillingError> {
        resolve_rate(&self.default_rate).ok_or_else(|| {
            BillingError::Config(format!(
                "billing.default_rate '{}' is not a non-negative number",
                self.default_rate
            ))
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost/hostel_billing".to_string()),
                max_connections: 20,
            },
            billing: BillingConfig {
                default_rate: "8".to_string(),
                display_scale: 2,
                bulk_requires_positive_consumption: true,
                single_requires_positive_consumption: false,
            },
        }
    }
}

impl AppConfig {
    /// 加载配置: 默认值 (含 DATABASE_URL) -> hostel-billing.toml (可选) -> HOSTEL__* 环境变量
    pub fn load() -> Result<Self, BillingError> {
        let defaults = Self::default();
        let settings = ::config::Config::builder()
            .set_default("server.host", defaults.server.host)
            .and_then(|b| b.set_default("server.port", defaults.server.port as i64))
            .and_then(|b| b.set_default("database.url", defaults.database.url))
            .and_then(|b| {
                b.set_default(
                    "database.max_connections",
                    defaults.database.max_connections as i64,
                )
            })
            .and_then(|b| b.set_default("billing.default_rate", defaults.billing.default_rate))
            .and_then(|b| b.set_default("billing.display_scale", defaults.billing.display_scale))
            .and_then(|b| {
                b.set_default(
                    "billing.bulk_requires_positive_consumption",
                    defaults.billing.bulk_requires_positive_consumption,
                )
            })
            .and_then(|b| {
                b.set_default(
                    "billing.single_requires_positive_consumption",
                    defaults.billing.single_requires_positive_consumption,
                )
            })
            .map_err(|e| BillingError::Config(e.to_string()))?
            .add_source(::config::File::with_name("hostel-billing").required(false))
            .add_source(
                ::config::Environment::with_prefix("HOSTEL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| BillingError::Config(e.to_string()))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| BillingError::Config(e.to_string()))?;
        config.billing.default_rate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::CommitPolicy;

    #[test]
    fn test_default_billing_policy() {
        let config = AppConfig::default();
        assert_eq!(config.billing.default_rate().unwrap(), BigDecimal::from(8));
        assert!(config.billing.bulk_requires_positive_consumption);
        assert!(!config.billing.single_requires_positive_consumption);
    }

    #[test]
    fn test_bad_default_rate_rejected() {
        let mut config = AppConfig::default();
        config.billing.default_rate = "cheap".to_string();
        assert!(matches!(
            config.billing.default_rate(),
            Err(BillingError::Config(_))
        ));
    }

    #[test]
    fn test_commit_policy_from_billing_config() {
        let mut config = AppConfig::default();
        assert_eq!(CommitPolicy::from(&config.billing), CommitPolicy::default());

        config.billing.bulk_requires_positive_consumption = false;
        config.billing.single_requires_positive_consumption = true;
        let policy = CommitPolicy::from(&config.billing);
        assert!(!policy.bulk_requires_positive_consumption);
        assert!(policy.single_requires_positive_consumption);
    }
}
