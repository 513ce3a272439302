use serde::{Deserialize, Serialize};

/// TV brand recognized from the request user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TvBrand {
    Samsung,
    Lg,
    AndroidTv,
    Generic,
}

impl TvBrand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Samsung => "samsung",
            Self::Lg => "lg",
            Self::AndroidTv => "androidtv",
            Self::Generic => "generic",
        }
    }

    pub fn capabilities(self) -> &'static CapabilitySet {
        match self {
            Self::Samsung => &SAMSUNG,
            Self::Lg => &LG,
            Self::AndroidTv => &ANDROID_TV,
            Self::Generic => &GENERIC,
        }
    }
}

impl std::fmt::Display for TvBrand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requesting device, derived from the user agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Tv(TvBrand),
    Browser,
}

impl DeviceClass {
    pub fn is_tv(self) -> bool {
        matches!(self, Self::Tv(_))
    }

    /// Classify a user agent. `force_tv` upgrades an unrecognized agent to a
    /// generic TV (the `device=tv` request flag).
    pub fn from_user_agent(user_agent: &str, force_tv: bool) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ua.contains("tizen") || ua.contains("samsung") {
            Self::Tv(TvBrand::Samsung)
        } else if ua.contains("web0s") || ua.contains("webos") || ua.contains("netcast") {
            Self::Tv(TvBrand::Lg)
        } else if ua.contains("android tv") || ua.contains("androidtv") || ua.contains("bravia") {
            Self::Tv(TvBrand::AndroidTv)
        } else if ua.contains("smart-tv") || ua.contains("smarttv") || ua.contains("hbbtv") {
            Self::Tv(TvBrand::Generic)
        } else if force_tv {
            Self::Tv(TvBrand::Generic)
        } else {
            Self::Browser
        }
    }
}

/// What a TV brand can play natively. Design-time constants, not
/// configuration.
#[derive(Debug)]
pub struct CapabilitySet {
    pub allowed_video: &'static [&'static str],
    pub max_h264_level: i64,
    pub max_hevc_level: i64,
    pub allowed_audio: &'static [&'static str],
    pub allowed_profiles: &'static [&'static str],
}

static SAMSUNG: CapabilitySet = CapabilitySet {
    allowed_video: &["h264", "hevc"],
    max_h264_level: 51,
    max_hevc_level: 153,
    allowed_audio: &["aac", "ac3", "eac3", "mp3"],
    allowed_profiles: &["baseline", "main", "high", "main 10"],
};

static LG: CapabilitySet = CapabilitySet {
    allowed_video: &["h264", "hevc"],
    max_h264_level: 51,
    max_hevc_level: 153,
    allowed_audio: &["aac", "ac3", "eac3", "mp3"],
    allowed_profiles: &["baseline", "main", "high", "main 10"],
};

static ANDROID_TV: CapabilitySet = CapabilitySet {
    allowed_video: &["h264", "hevc", "vp9"],
    max_h264_level: 52,
    max_hevc_level: 156,
    allowed_audio: &["aac", "ac3", "eac3", "opus", "mp3"],
    allowed_profiles: &["baseline", "main", "high", "main 10", "high10"],
};

static GENERIC: CapabilitySet = CapabilitySet {
    allowed_video: &["h264", "hevc"],
    max_h264_level: 51,
    max_hevc_level: 153,
    allowed_audio: &["aac", "ac3", "eac3", "mp3"],
    allowed_profiles: &["baseline", "main", "high", "main 10"],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_tv_user_agents() {
        let samsung = "Mozilla/5.0 (SMART-TV; Linux; Tizen 6.0) AppleWebKit/537.36";
        assert_eq!(
            DeviceClass::from_user_agent(samsung, false),
            DeviceClass::Tv(TvBrand::Samsung)
        );

        let lg = "Mozilla/5.0 (Web0S; Linux/SmartTV) AppleWebKit/537.36";
        assert_eq!(
            DeviceClass::from_user_agent(lg, false),
            DeviceClass::Tv(TvBrand::Lg)
        );

        let android = "Mozilla/5.0 (Linux; Android 9; BRAVIA 4K GB) AppleWebKit/537.36";
        assert_eq!(
            DeviceClass::from_user_agent(android, false),
            DeviceClass::Tv(TvBrand::AndroidTv)
        );
    }

    #[test]
    fn desktop_browser_is_not_a_tv() {
        let chrome = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) Chrome/120.0";
        assert_eq!(DeviceClass::from_user_agent(chrome, false), DeviceClass::Browser);
    }

    #[test]
    fn force_tv_upgrades_unknown_agents() {
        let chrome = "Mozilla/5.0 (X11; Linux x86_64) Chrome/120.0";
        assert_eq!(
            DeviceClass::from_user_agent(chrome, true),
            DeviceClass::Tv(TvBrand::Generic)
        );
        // a recognized brand wins over the generic upgrade
        assert_eq!(
            DeviceClass::from_user_agent("Tizen 5.5", true),
            DeviceClass::Tv(TvBrand::Samsung)
        );
    }

    #[test]
    fn capability_table_values() {
        let caps = TvBrand::Samsung.capabilities();
        assert!(caps.allowed_video.contains(&"hevc"));
        assert_eq!(caps.max_h264_level, 51);
        assert_eq!(caps.max_hevc_level, 153);
        assert!(!caps.allowed_audio.contains(&"opus"));

        let caps = TvBrand::AndroidTv.capabilities();
        assert!(caps.allowed_video.contains(&"vp9"));
        assert_eq!(caps.max_h264_level, 52);
        assert!(caps.allowed_audio.contains(&"opus"));
    }
}
