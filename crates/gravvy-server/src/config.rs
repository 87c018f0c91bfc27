use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, ensure};

use gravvy_api::ApiSettings;
use gravvy_notify::NotifySettings;
use gravvy_types::models::RankWeights;

/// Process configuration, read from `GRAVVY_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub media_root: PathBuf,
    pub media_url: String,
    pub http_domain: String,
    pub session_age: chrono::Duration,
    pub activation_days: i64,
    pub verification_code_len: u32,
    pub max_recent_contacts: usize,
    pub max_clip_size: usize,
    pub max_image_size: usize,
    pub rank_weights: RankWeights,
    pub push_sound: String,
    pub notify_webhook: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source. Unset and blank variables take their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            lookup(&format!("GRAVVY_{}", name)).filter(|v| !v.trim().is_empty())
        };
        let string = |name: &str, default: &str| var(name).unwrap_or_else(|| default.into());

        let session_age_secs: i64 = parsed(&var, "SESSION_AGE_SECS", 1_209_600)?;
        let session_age = chrono::Duration::try_seconds(session_age_secs)
            .filter(|age| *age >= chrono::Duration::zero())
            .with_context(|| {
                format!("GRAVVY_SESSION_AGE_SECS is out of range: {}", session_age_secs)
            })?;
        let activation_days: i64 = parsed(&var, "ACTIVATION_DAYS", 2)?;
        ensure!(
            chrono::Duration::try_days(activation_days).is_some() && activation_days >= 0,
            "GRAVVY_ACTIVATION_DAYS is out of range: {}",
            activation_days
        );

        Ok(Self {
            host: string("HOST", "0.0.0.0"),
            port: parsed(&var, "PORT", 8000)?,
            db_path: string("DB_PATH", "gravvy.db").into(),
            media_root: string("MEDIA_ROOT", "./media").into(),
            media_url: string("MEDIA_URL", "/media"),
            http_domain: string("HTTP_DOMAIN", "http://localhost:8000")
                .trim_end_matches('/')
                .to_string(),
            session_age,
            activation_days,
            verification_code_len: parsed(&var, "VERIFICATION_CODE_LEN", 4)?,
            max_recent_contacts: parsed(&var, "MAX_RECENT_CONTACTS", 20)?,
            max_clip_size: parsed(&var, "MAX_CLIP_SIZE", 20 * 1024 * 1024)?,
            max_image_size: parsed(&var, "MAX_IMAGE_SIZE", 5 * 1024 * 1024)?,
            rank_weights: RankWeights {
                plays: parsed(&var, "PLAYS_WEIGHT", 1.0)?,
                likes: parsed(&var, "LIKES_WEIGHT", 2.0)?,
                gravity: parsed(&var, "SCORE_GRAVITY", 1.8)?,
            },
            push_sound: string("PUSH_SOUND", "default"),
            notify_webhook: var("NOTIFY_WEBHOOK"),
        })
    }

    /// Public root of uploaded files. A path-only media URL is served by
    /// this process, so it is joined to the site domain.
    pub fn media_base_url(&self) -> String {
        let media_url = self.media_url.trim_end_matches('/');
        if media_url.starts_with('/') {
            format!("{}{}", self.http_domain, media_url)
        } else {
            media_url.to_string()
        }
    }

    /// Mount path for serving media locally, when the media URL is one.
    pub fn media_mount(&self) -> Option<String> {
        let media_url = self.media_url.trim_end_matches('/');
        (media_url.starts_with('/') && media_url.len() > 1).then(|| media_url.to_string())
    }

    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            base_url: format!("{}/api/v1", self.http_domain),
            session_age: self.session_age,
            activation_days: self.activation_days,
            verification_code_len: self.verification_code_len,
            max_recent_contacts: self.max_recent_contacts,
            max_clip_size: self.max_clip_size,
            max_image_size: self.max_image_size,
            rank_weights: self.rank_weights,
        }
    }

    pub fn notify_settings(&self) -> NotifySettings {
        NotifySettings {
            http_domain: self.http_domain.clone(),
            push_sound: self.push_sound.clone(),
        }
    }
}

fn parsed<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("GRAVVY_{} has an invalid value: {:?}", name, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.db_path, PathBuf::from("gravvy.db"));
        assert_eq!(config.session_age, chrono::Duration::days(14));
        assert_eq!(config.verification_code_len, 4);
        assert_eq!(config.max_clip_size, 20_971_520);
        assert_eq!(config.rank_weights.gravity, 1.8);
        assert!(config.notify_webhook.is_none());
        assert_eq!(config.media_base_url(), "http://localhost:8000/media");
        assert_eq!(config.media_mount().as_deref(), Some("/media"));
        assert_eq!(
            config.api_settings().base_url,
            "http://localhost:8000/api/v1"
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("GRAVVY_PORT", "9000"),
            ("GRAVVY_HTTP_DOMAIN", "https://gravvy.example/"),
            ("GRAVVY_LIKES_WEIGHT", "3.5"),
            ("GRAVVY_NOTIFY_WEBHOOK", "https://hooks.example/push"),
            ("GRAVVY_PUSH_SOUND", "   "),
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.http_domain, "https://gravvy.example");
        assert_eq!(config.rank_weights.likes, 3.5);
        assert_eq!(config.push_sound, "default");
        assert_eq!(
            config.notify_webhook.as_deref(),
            Some("https://hooks.example/push")
        );
        assert_eq!(
            config.notify_settings().http_domain,
            "https://gravvy.example"
        );
    }

    #[test]
    fn absolute_media_url_is_used_as_is() {
        let config = config(&[("GRAVVY_MEDIA_URL", "https://cdn.example/media/")]).unwrap();
        assert_eq!(config.media_base_url(), "https://cdn.example/media");
        assert!(config.media_mount().is_none());
    }

    #[test]
    fn out_of_range_windows_are_rejected() {
        let err = config(&[("GRAVVY_ACTIVATION_DAYS", &i64::MAX.to_string())]).unwrap_err();
        assert!(format!("{:#}", err).contains("GRAVVY_ACTIVATION_DAYS"));
        assert!(config(&[("GRAVVY_ACTIVATION_DAYS", "-1")]).is_err());
        assert!(config(&[("GRAVVY_SESSION_AGE_SECS", &i64::MAX.to_string())]).is_err());
    }

    #[test]
    fn bad_numbers_name_the_variable() {
        let err = config(&[("GRAVVY_MAX_IMAGE_SIZE", "lots")]).unwrap_err();
        assert!(format!("{:#}", err).contains("GRAVVY_MAX_IMAGE_SIZE"));
    }
}
