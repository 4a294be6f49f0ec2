//! MCP server configuration and validation (spec §4.D).

use crate::error::ToolCallError;

/// Exactly one of `url`/`command` is required; both absent is a validation
/// error. Mirrors the teacher's `McpServerTransportConfig`, minus its
/// dependency on `rmcp`'s transport types.
#[derive(Debug, Clone)]
pub enum McpServerConfig {
    Http {
        name: String,
        url: url::Url,
    },
    Stdio {
        name: String,
        command: String,
        args: Vec<String>,
    },
}

/// Raw, not-yet-validated server configuration as it arrives from a caller
/// (e.g. deserialized from a config file upstream of this crate).
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
pub struct RawMcpServerConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Whether this platform is "mobile-like" — spec §4.D restricts it to
/// https-to-non-loopback and rejects spawning a `command` at all (the
/// `command` rejection is enforced by [`crate::runtime::PlatformRuntime::create_mcp_connection`]
/// on such a runtime, not here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    Native,
    MobileLike,
}

fn is_loopback_host(host: &str) -> bool {
    host == "localhost"
        || host
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback())
}

/// Validates a raw server config into a connectable [`McpServerConfig`],
/// enforcing the XOR between `url` and `command`, scheme-checking the URL
/// with the `url` crate, and the remaining rules in spec §4.D's validation
/// table: a mobile-like platform may only reach a non-loopback host over
/// https, a privileged `localhost` port is always blocked, and plain http
/// against a non-loopback host is allowed but warned about.
pub fn validate_server_config(
    raw: RawMcpServerConfig,
    platform: PlatformKind,
) -> Result<McpServerConfig, ToolCallError> {
    match (raw.url, raw.command) {
        (Some(_), Some(_)) => Err(ToolCallError::SecurityViolation(
            "exactly one of url or command must be set, not both".into(),
        )),
        (None, None) => Err(ToolCallError::SecurityViolation(
            "one of url or command is required".into(),
        )),
        (Some(url), None) => {
            let parsed = url::Url::parse(&url).map_err(|e| ToolCallError::InvalidUrl(e.to_string()))?;
            match parsed.scheme() {
                "http" | "https" => {}
                other => return Err(ToolCallError::InvalidProtocol(other.to_string())),
            }

            let host = parsed.host_str().unwrap_or("");
            let loopback = is_loopback_host(host);

            if platform == PlatformKind::MobileLike && parsed.scheme() == "http" && !loopback {
                return Err(ToolCallError::RemoteOnlyViolation);
            }

            if loopback {
                if let Some(port) = parsed.port() {
                    if port < 1024 {
                        return Err(ToolCallError::SecurityViolation(format!(
                            "refusing to connect to privileged localhost port {port}"
                        )));
                    }
                }
            } else if parsed.scheme() == "http" {
                log::warn!("MCP server {:?} uses plain http against non-loopback host {host}", raw.name);
            }

            Ok(McpServerConfig::Http {
                name: raw.name,
                url: parsed,
            })
        }
        (None, Some(command)) => {
            if command.trim().is_empty() {
                return Err(ToolCallError::SecurityViolation(
                    "command must not be empty".into(),
                ));
            }
            Ok(McpServerConfig::Stdio {
                name: raw.name,
                command,
                args: raw.args,
            })
        }
    }
}
