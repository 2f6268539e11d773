//! Device classification from the user agent.

/// Result of classifying a user agent. Both flags are `false` for bots and
/// agents that cannot be recognised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceClass {
    pub mobile: bool,
    pub desktop: bool,
}

pub trait DeviceDetector: Send + Sync {
    fn classify(&self, user_agent: &str) -> DeviceClass;
}

const BOT_MARKERS: &[&str] = &[
    "bot", "crawler", "spider", "slurp", "facebookexternalhit", "headlesschrome", "curl/", "wget/",
];

const MOBILE_MARKERS: &[&str] = &[
    "mobi", "android", "iphone", "ipad", "ipod", "windows phone", "iemobile", "blackberry", "bb10",
    "opera mini", "kindle", "silk/", "tablet", "webos", "kaios",
];

const DESKTOP_MARKERS: &[&str] = &["windows nt", "macintosh", "mac os x", "x11", "linux"];

/// Substring heuristics over the lower-cased user agent. Mobile markers win
/// over desktop ones, since mobile agents usually mention a desktop OS too
/// (`like Mac OS X`, `Linux; Android`).
#[derive(Debug, Clone, Copy, Default)]
pub struct UserAgentDetector;

impl DeviceDetector for UserAgentDetector {
    fn classify(&self, user_agent: &str) -> DeviceClass {
        let ua = user_agent.trim().to_ascii_lowercase();
        if ua.is_empty() || BOT_MARKERS.iter().any(|m| ua.contains(m)) {
            return DeviceClass::default();
        }
        if MOBILE_MARKERS.iter().any(|m| ua.contains(m)) {
            return DeviceClass {
                mobile: true,
                desktop: false,
            };
        }
        DeviceClass {
            mobile: false,
            desktop: DESKTOP_MARKERS.iter().any(|m| ua.contains(m)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1";
    const ANDROID: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Mobile Safari/537.36";
    const IPAD: &str = "Mozilla/5.0 (iPad; CPU OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/604.1";
    const WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
    const MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15";
    const LINUX: &str = "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0";
    const GOOGLEBOT: &str = "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

    #[test]
    fn classifies_a_fixed_corpus() {
        let detector = UserAgentDetector;
        for ua in [IPHONE, ANDROID, IPAD] {
            assert_eq!(
                detector.classify(ua),
                DeviceClass { mobile: true, desktop: false },
                "{ua}"
            );
        }
        for ua in [WINDOWS, MAC, LINUX] {
            assert_eq!(
                detector.classify(ua),
                DeviceClass { mobile: false, desktop: true },
                "{ua}"
            );
        }
        assert_eq!(detector.classify(GOOGLEBOT), DeviceClass::default());
        assert_eq!(detector.classify(""), DeviceClass::default());
        assert_eq!(detector.classify("SomethingElse/1.0"), DeviceClass::default());
    }
}
