use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobBackend {
    /// Files under `DATA_DIR/media`, served by this process.
    Local,
    /// PUT to an external object store.
    Http {
        endpoint: String,
        bucket: String,
        token: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub public_base_url: String,
    pub max_upload_bytes: usize,
    pub blob: BlobBackend,
    pub smtp: Option<SmtpSettings>,
    pub default_pass_threshold: u32,
    pub default_certificate_threshold: u32,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Builds settings from any key lookup; `from_env` passes the process env.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = get("DATABASE_URL").context("DATABASE_URL not set")?;
        let port: u16 = parse_or(&get, "PORT", 8081)?;
        let data_dir = PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "./data".into()));
        let public_base_url = get("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();

        let blob = match get("BLOB_BACKEND").as_deref().unwrap_or("local") {
            "local" => BlobBackend::Local,
            "http" => BlobBackend::Http {
                endpoint: get("BLOB_HTTP_ENDPOINT")
                    .context("BLOB_HTTP_ENDPOINT not set for BLOB_BACKEND=http")?
                    .trim_end_matches('/')
                    .to_string(),
                bucket: get("BLOB_BUCKET").unwrap_or_else(|| "course-media".into()),
                token: get("BLOB_HTTP_TOKEN"),
            },
            other => bail!("unknown BLOB_BACKEND '{other}' (expected local or http)"),
        };

        let smtp = match get("SMTP_HOST") {
            Some(host) => Some(SmtpSettings {
                port: parse_or(&get, "SMTP_PORT", 465)?,
                user: get("SMTP_USER"),
                password: get("SMTP_PASSWORD"),
                from: get("SMTP_FROM").context("SMTP_FROM not set while SMTP_HOST is")?,
                host,
            }),
            None => None,
        };

        let default_pass_threshold = parse_or(&get, "DEFAULT_PASS_THRESHOLD", 40)?;
        let default_certificate_threshold = parse_or(&get, "DEFAULT_CERTIFICATE_THRESHOLD", 50)?;
        if default_certificate_threshold <= default_pass_threshold {
            bail!("DEFAULT_CERTIFICATE_THRESHOLD must be greater than DEFAULT_PASS_THRESHOLD");
        }

        Ok(Settings {
            database_url,
            port,
            data_dir,
            public_base_url,
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", 200 * 1024 * 1024)?,
            blob,
            smtp,
            default_pass_threshold,
            default_certificate_threshold,
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 10)?,
            db_acquire_timeout_secs: parse_or(&get, "DB_ACQUIRE_TIMEOUT_SECS", 5)?,
        })
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}")),
        None => Ok(default),
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
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply() {
        let s = Settings::from_lookup(lookup(&[("DATABASE_URL", "postgres://x")])).unwrap();
        assert_eq!(s.port, 8081);
        assert_eq!(s.blob, BlobBackend::Local);
        assert!(s.smtp.is_none());
        assert_eq!(s.default_pass_threshold, 40);
        assert_eq!(s.default_certificate_threshold, 50);
        assert_eq!(s.public_base_url, "http://localhost:8081");
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = Settings::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn http_blob_backend_requires_endpoint() {
        let err = Settings::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("BLOB_BACKEND", "http"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("BLOB_HTTP_ENDPOINT"));
    }

    #[test]
    fn thresholds_must_be_ordered() {
        assert!(Settings::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("DEFAULT_PASS_THRESHOLD", "50"),
            ("DEFAULT_CERTIFICATE_THRESHOLD", "50"),
        ]))
        .is_err());
    }

    #[test]
    fn bad_port_names_the_variable() {
        let err = Settings::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
