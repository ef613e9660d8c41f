use anyhow::Context as _;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_USER_AGENT: &str = concat!("ficpack/", env!("CARGO_PKG_VERSION"));

/// Retrieval settings shared by the page source and the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub concurrency: usize,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl FetchSettings {
    /// Applies `FICPACK_CONCURRENCY`, `FICPACK_USER_AGENT` and
    /// `FICPACK_TIMEOUT_SECS` on top of `self`.
    pub fn with_env(self) -> anyhow::Result<Self> {
        self.with_lookup(|key| std::env::var(key).ok())
    }

    fn with_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        if let Some(raw) = lookup("FICPACK_CONCURRENCY") {
            self.concurrency = parse_positive(&raw)
                .with_context(|| format!("invalid FICPACK_CONCURRENCY={raw:?}"))?
                as usize;
        }
        if let Some(raw) = lookup("FICPACK_USER_AGENT") {
            let raw = raw.trim();
            if raw.is_empty() {
                anyhow::bail!("FICPACK_USER_AGENT is empty");
            }
            self.user_agent = raw.to_string();
        }
        if let Some(raw) = lookup("FICPACK_TIMEOUT_SECS") {
            self.timeout_secs = parse_positive(&raw)
                .with_context(|| format!("invalid FICPACK_TIMEOUT_SECS={raw:?}"))?;
        }
        Ok(self)
    }
}

fn parse_positive(raw: &str) -> anyhow::Result<u64> {
    let value: u64 = raw.trim().parse().context("expected a positive integer")?;
    if value == 0 {
        anyhow::bail!("must be at least 1");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_defaults() {
        let settings = FetchSettings::default()
            .with_lookup(|key| match key {
                "FICPACK_CONCURRENCY" => Some(" 8 ".to_string()),
                "FICPACK_USER_AGENT" => Some("test-agent".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(settings.concurrency, 8);
        assert_eq!(settings.user_agent, "test-agent");
        assert_eq!(settings.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = FetchSettings::default()
            .with_lookup(|key| (key == "FICPACK_CONCURRENCY").then(|| "0".to_string()))
            .unwrap_err();
        assert!(format!("{err:#}").contains("FICPACK_CONCURRENCY"));
    }
}
