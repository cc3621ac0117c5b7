use regex::Regex;

use crate::config::SafetyConfig;
use crate::errors::{DeskPilotError, DeskPilotResult};

/// Gate for the two action kinds that can reach outside the UI: scripts and URLs.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    allow_scripts: bool,
    blocked_patterns: Vec<Regex>,
    blocked_schemes: Vec<String>,
}

impl SafetyPolicy {
    pub fn from_config(cfg: &SafetyConfig) -> DeskPilotResult<Self> {
        let blocked_patterns = cfg
            .blocked_script_patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){p}")).map_err(|e| {
                    DeskPilotError::Config(format!("invalid blocked_script_pattern {p:?}: {e}"))
                })
            })
            .collect::<DeskPilotResult<Vec<_>>>()?;
        Ok(Self {
            allow_scripts: cfg.allow_scripts,
            blocked_patterns,
            blocked_schemes: cfg
                .blocked_url_schemes
                .iter()
                .map(|s| s.trim_end_matches(':').to_lowercase())
                .collect(),
        })
    }

    pub fn check_script(&self, script: &str) -> DeskPilotResult<()> {
        if !self.allow_scripts {
            return Err(DeskPilotError::SafetyViolation(
                "run_script is disabled ([safety] allow_scripts = false)".into(),
            ));
        }
        if let Some(p) = self.blocked_patterns.iter().find(|p| p.is_match(script)) {
            return Err(DeskPilotError::SafetyViolation(format!(
                "script matches blocked pattern {:?}",
                p.as_str().trim_start_matches("(?i)")
            )));
        }
        Ok(())
    }

    pub fn check_url(&self, url: &str) -> DeskPilotResult<()> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| DeskPilotError::SafetyViolation(format!("invalid URL {url:?}: {e}")))?;
        if self.blocked_schemes.iter().any(|s| s == parsed.scheme()) {
            return Err(DeskPilotError::SafetyViolation(format!(
                "URL scheme '{}' is blocked",
                parsed.scheme()
            )));
        }
        Ok(())
    }
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            allow_scripts: false,
            blocked_patterns: Vec::new(),
            blocked_schemes: vec!["file".into(), "javascript".into()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permissive() -> SafetyPolicy {
        SafetyPolicy::from_config(&SafetyConfig {
            allow_scripts: true,
            ..SafetyConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn scripts_disabled_by_default() {
        let p = SafetyPolicy::from_config(&SafetyConfig::default()).unwrap();
        assert!(matches!(
            p.check_script("tell application \"Notes\" to activate"),
            Err(DeskPilotError::SafetyViolation(_))
        ));
    }

    #[test]
    fn blocked_patterns_apply_when_enabled() {
        let p = permissive();
        assert!(p.check_script("tell application \"Notes\" to activate").is_ok());
        assert!(p.check_script("do shell script \"rm -rf ~/Documents\"").is_err());
        assert!(p.check_script("do shell script \"SUDO reboot\"").is_err());
    }

    #[test]
    fn url_schemes() {
        let p = permissive();
        assert!(p.check_url("https://example.com").is_ok());
        assert!(p.check_url("file:///etc/passwd").is_err());
        assert!(p.check_url("javascript:alert(1)").is_err());
        assert!(p.check_url("not a url").is_err());
    }

    #[test]
    fn bad_pattern_is_config_error() {
        let cfg = SafetyConfig {
            blocked_script_patterns: vec!["(".into()],
            ..SafetyConfig::default()
        };
        assert!(matches!(SafetyPolicy::from_config(&cfg), Err(DeskPilotError::Config(_))));
    }
}
