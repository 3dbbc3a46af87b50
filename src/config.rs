use anyhow::Context;
use std::path::PathBuf;

/// A model repository plus the revision to fetch artifacts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub repo: String,
    pub revision: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub model_cache_dir: PathBuf,
    pub hub_url: String,
    pub vision_model: ModelSource,
    pub language_model: ModelSource,
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = match lookup("PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("PORT must be a valid port number, got {port:?}"))?,
            None => 5000,
        };

        Ok(Self {
            host: var("HOST", "0.0.0.0"),
            port,
            upload_dir: var("UPLOAD_DIR", "uploads").into(),
            model_cache_dir: var("MODEL_CACHE_DIR", "models").into(),
            hub_url: var("MODEL_HUB_URL", "https://huggingface.co")
                .trim_end_matches('/')
                .to_string(),
            vision_model: ModelSource {
                repo: var("VISION_MODEL_ID", "openai/clip-vit-base-patch32"),
                // main only ships pytorch weights
                revision: var("VISION_MODEL_REVISION", "refs/pr/15"),
            },
            language_model: ModelSource {
                repo: var("LANGUAGE_MODEL_ID", "gpt2"),
                revision: var("LANGUAGE_MODEL_REVISION", "main"),
            },
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_dev_server() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:5000");
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.vision_model.repo, "openai/clip-vit-base-patch32");
        assert_eq!(config.language_model.repo, "gpt2");
        assert_eq!(config.language_model.revision, "main");
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("UPLOAD_DIR", "/tmp/staging"),
            ("MODEL_HUB_URL", "http://mirror.local/"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.upload_dir, PathBuf::from("/tmp/staging"));
        assert_eq!(config.hub_url, "http://mirror.local");
    }

    #[test]
    fn rejects_bad_port() {
        let err = Config::from_lookup(lookup(&[("PORT", "http")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
