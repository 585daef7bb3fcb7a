use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a break is delivered to a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertionMode {
    /// Ad segments are stitched into the media playlist.
    #[default]
    Ssai,
    /// The player is handed an interstitial and fetches the ad itself.
    Sgai,
}

impl InsertionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            InsertionMode::Ssai => "ssai",
            InsertionMode::Sgai => "sgai",
        }
    }
}

impl fmt::Display for InsertionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsertionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssai" => Ok(InsertionMode::Ssai),
            "sgai" => Ok(InsertionMode::Sgai),
            other => Err(format!("unknown insertion mode: {other}")),
        }
    }
}

/// Pick the mode for one request: explicit override, then channel setting,
/// then what the client is known to support, then SSAI.
pub fn select_mode(
    force: Option<InsertionMode>,
    channel: Option<InsertionMode>,
    user_agent: Option<&str>,
) -> InsertionMode {
    force
        .or(channel)
        .or_else(|| user_agent.filter(|ua| supports_interstitials(ua)).map(|_| InsertionMode::Sgai))
        .unwrap_or_default()
}

/// Whether the user agent is a player known to render HLS interstitials.
pub fn supports_interstitials(user_agent: &str) -> bool {
    if user_agent.contains("AppleCoreMedia") || user_agent.contains("AVPlayer") {
        return true;
    }
    hls_js_version(user_agent).is_some_and(|(major, minor)| (major, minor) >= (1, 6))
}

fn hls_js_version(user_agent: &str) -> Option<(u32, u32)> {
    let (_, rest) = user_agent.split_once("hls.js/")?;
    let version = rest.split(|c: char| c.is_whitespace() || c == ';' || c == ')').next()?;
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
    Some((major, minor))
}
