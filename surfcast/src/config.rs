//! Service configuration loaded from the environment.
//!
//! Everything here is collaborator-facing contract: the env var names match
//! what the deployment already sets for the notifier.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

/// Identifies the destination group conversation.
#[derive(Debug, Clone, Default)]
pub struct TargetConfig {
    /// Display name to search for when no id is configured.
    pub group_name: String,
    /// Pre-resolved group id; takes precedence over everything else.
    pub group_id: Option<String>,
    /// Invite code; consulted only when no id is configured.
    pub invite_code: Option<String>,
}

/// Connection settings for the WhatsApp Web bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Base URL of the bridge REST/event surface.
    pub base_url: String,
    /// Where the bridge persists auth state between restarts.
    pub auth_data_dir: String,
    /// Browser executable the bridge should launch, if overridden.
    pub browser_path: Option<String>,
    /// Timeout for bridge page/protocol operations, including the wait for
    /// the session to become ready.
    pub page_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3080".to_string(),
            auth_data_dir: "/data/.wwebjs_auth".to_string(),
            browser_path: None,
            page_timeout: Duration::from_secs(300),
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub target: TargetConfig,
    pub bridge: BridgeConfig,
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    ///
    /// Supported env vars:
    /// - `WHATSAPP_GROUP_NAME` (display name of the target group)
    /// - `WHATSAPP_GROUP_ID` (pre-resolved group id)
    /// - `WHATSAPP_GROUP_INVITE_CODE` (invite code or full invite URL)
    /// - `WWEB_BRIDGE_URL` (bridge base URL)
    /// - `WHATSAPP_AUTH_PATH` (auth state directory)
    /// - `PUPPETEER_EXECUTABLE_PATH` (browser executable for the bridge)
    pub fn from_env_or_default() -> Self {
        let mut config = Self {
            target: TargetConfig {
                group_name: "Semi-kooks".to_string(),
                ..TargetConfig::default()
            },
            bridge: BridgeConfig::default(),
        };

        if let Ok(name) = std::env::var("WHATSAPP_GROUP_NAME")
            && !name.trim().is_empty()
        {
            config.target.group_name = name;
        }

        if let Ok(id) = std::env::var("WHATSAPP_GROUP_ID")
            && !id.trim().is_empty()
        {
            config.target.group_id = Some(id.trim().to_string());
        }

        if let Ok(raw) = std::env::var("WHATSAPP_GROUP_INVITE_CODE") {
            config.target.invite_code = parse_invite_code(&raw);
        }

        if let Ok(url) = std::env::var("WWEB_BRIDGE_URL")
            && !url.trim().is_empty()
        {
            config.bridge.base_url = url.trim().trim_end_matches('/').to_string();
        }

        if let Ok(path) = std::env::var("WHATSAPP_AUTH_PATH")
            && !path.trim().is_empty()
        {
            config.bridge.auth_data_dir = path;
        }

        if let Ok(path) = std::env::var("PUPPETEER_EXECUTABLE_PATH")
            && !path.trim().is_empty()
        {
            config.bridge.browser_path = Some(path);
        }

        config
    }
}

/// Extract an invite code from either a raw code or a full
/// `chat.whatsapp.com/<code>` invite URL.
pub fn parse_invite_code(raw: &str) -> Option<String> {
    static INVITE_URL: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"chat\.whatsapp\.com/([A-Za-z0-9]+)$").unwrap());
    static RAW_CODE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([A-Za-z0-9]+)$").unwrap());

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(captures) = INVITE_URL.captures(trimmed) {
        return Some(captures[1].to_string());
    }
    if let Some(captures) = RAW_CODE.captures(trimmed) {
        return Some(captures[1].to_string());
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invite_code_from_url() {
        assert_eq!(
            parse_invite_code("https://chat.whatsapp.com/AbC123xyz").as_deref(),
            Some("AbC123xyz")
        );
        assert_eq!(
            parse_invite_code("  chat.whatsapp.com/AbC123xyz  ").as_deref(),
            Some("AbC123xyz")
        );
    }

    #[test]
    fn test_parse_invite_code_raw() {
        assert_eq!(parse_invite_code("AbC123xyz").as_deref(), Some("AbC123xyz"));
    }

    #[test]
    fn test_parse_invite_code_fallback_keeps_trimmed_input() {
        assert_eq!(
            parse_invite_code(" code-with-dash ").as_deref(),
            Some("code-with-dash")
        );
    }

    #[test]
    fn test_parse_invite_code_empty() {
        assert_eq!(parse_invite_code(""), None);
        assert_eq!(parse_invite_code("   "), None);
    }

    #[test]
    fn test_bridge_config_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.base_url, "http://127.0.0.1:3080");
        assert_eq!(config.page_timeout, Duration::from_secs(300));
        assert!(config.browser_path.is_none());
    }
}
