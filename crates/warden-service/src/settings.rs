//! Runtime settings

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

/// Warden runtime settings
#[derive(Parser, Debug, Clone)]
#[command(name = "warden", about = "External authorization service", version)]
pub struct Settings {
    /// Address the ext_authz gRPC server listens on
    #[arg(long, env = "WARDEN_GRPC_ADDR", default_value = "0.0.0.0:50051")]
    pub grpc_addr: SocketAddr,

    /// Namespace whose AuthPolicies are reconciled; cluster-wide when
    /// unset
    #[arg(long, env = "WARDEN_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Label selector (`key=value,...`) gating which AuthPolicies are
    /// admitted
    #[arg(long, env = "WARDEN_LABEL_SELECTOR")]
    pub label_selector: Option<String>,

    /// Default evaluator timeout in seconds
    #[arg(long, env = "WARDEN_EVALUATOR_TIMEOUT", default_value_t = 10)]
    pub evaluator_timeout_secs: u64,

    /// Default evaluator cache TTL in seconds
    #[arg(long, env = "WARDEN_CACHE_TTL", default_value_t = 60)]
    pub cache_ttl_secs: u64,

    /// Default OIDC discovery refresh interval in seconds, used when an
    /// identity sets no TTL of its own
    #[arg(long, env = "WARDEN_OIDC_REFRESH", default_value_t = 1800)]
    pub oidc_refresh_secs: u64,

    /// Emit human-readable logs instead of JSON
    #[arg(long, env = "WARDEN_PRETTY_LOGS", default_value_t = false)]
    pub pretty_logs: bool,
}

impl Settings {
    /// Whether the service reconciles AuthPolicies across all namespaces
    pub fn cluster_wide(&self) -> bool {
        self.watch_namespace.is_none()
    }

    /// Default evaluator timeout
    pub fn evaluator_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluator_timeout_secs)
    }

    /// Default evaluator cache TTL
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Default OIDC discovery refresh interval
    pub fn oidc_refresh(&self) -> Duration {
        Duration::from_secs(self.oidc_refresh_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::parse_from(["warden"]);
        assert!(settings.cluster_wide());
        assert_eq!(settings.evaluator_timeout(), Duration::from_secs(10));
        assert_eq!(settings.cache_ttl(), Duration::from_secs(60));
        assert_eq!(settings.oidc_refresh(), Duration::from_secs(1800));
        assert!(!settings.pretty_logs);
    }

    #[test]
    fn test_namespace_scoping() {
        let settings = Settings::parse_from(["warden", "--watch-namespace", "apps"]);
        assert!(!settings.cluster_wide());
        assert_eq!(settings.watch_namespace.as_deref(), Some("apps"));
    }
}
