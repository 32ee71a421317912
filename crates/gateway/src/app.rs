//! Wiring from configuration to running components.
//!
//! [`Gateway`] builds the token codec, storage adapter, URL issuer and
//! filesystem facade from a validated [`Config`], and owns them for the
//! lifetime of the process. The issuer and the delivery handler share one
//! codec, so every URL the gateway mints can be redeemed by it.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use protocol::{AccessTokenCodec, TokenCipher};
use tokio::net::TcpListener;
use tracing::info;
use url::Url;

use crate::config::{Config, StorageBackend, StorageConfig};
use crate::delivery::FileDeliveryHandler;
use crate::filesystem::Filesystem;
use crate::server;
use crate::signing::SignedUrlIssuer;
use crate::storage::{LocalAdapter, MemoryAdapter, StorageAdapter, ZipArchiveAdapter};

/// All long-lived components of a gateway instance.
pub struct Gateway {
    config: Config,
    codec: Arc<AccessTokenCodec>,
    issuer: Arc<SignedUrlIssuer>,
    filesystem: Filesystem,
}

impl Gateway {
    /// Validate `config` and build every component from it.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let cipher = TokenCipher::from_passphrase(
            &config.security.secret,
            config.security.iv.as_deref(),
            &config.security.app_id,
            config.cipher_algorithm()?,
        )
        .context("Failed to derive token keys")?;
        let codec = Arc::new(AccessTokenCodec::new(cipher));

        let issuer = Arc::new(
            SignedUrlIssuer::new(codec.clone(), &config.server.base_url, &config.server.action)
                .context("Failed to set up URL issuing")?,
        );

        let adapter = build_adapter(&config.storage)?;
        info!(
            "Using {} storage (prefix: {:?}, debug: {})",
            adapter.name(),
            config.storage.prefix,
            config.storage.debug
        );

        let filesystem = Filesystem::new(adapter)
            .with_prefix(&config.storage.prefix)
            .with_debug(config.storage.debug)
            .with_issuer(issuer.clone());

        Ok(Self {
            config,
            codec,
            issuer,
            filesystem,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn filesystem(&self) -> &Filesystem {
        &self.filesystem
    }

    pub fn issuer(&self) -> &Arc<SignedUrlIssuer> {
        &self.issuer
    }

    /// A delivery handler reading from this gateway's storage.
    pub fn delivery_handler(&self) -> FileDeliveryHandler {
        FileDeliveryHandler::new(self.codec.clone(), self.filesystem.adapter().clone())
    }

    /// The HTTP router for this gateway.
    pub fn router(&self) -> Router {
        server::router(
            Arc::new(self.delivery_handler()),
            self.issuer.action_path(),
        )
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("Delivery endpoint: {}", self.issuer.endpoint());
        server::serve(listener, self.router()).await
    }
}

/// Build the storage adapter selected by `storage`.
pub fn build_adapter(storage: &StorageConfig) -> Result<Arc<dyn StorageAdapter>> {
    let adapter: Arc<dyn StorageAdapter> = match storage.backend {
        StorageBackend::Local => {
            let mut adapter = LocalAdapter::new(&storage.root).with_context(|| {
                format!("Failed to open storage root: {}", storage.root.display())
            })?;
            if let Some(base) = &storage.public_base_url {
                let base = Url::parse(base)
                    .with_context(|| format!("Invalid public_base_url: {}", base))?;
                adapter = adapter.with_public_base_url(base);
            }
            Arc::new(adapter)
        }
        StorageBackend::Zip => {
            let archive = storage
                .archive
                .as_ref()
                .context("storage.archive must be set for the zip backend")?;
            Arc::new(ZipArchiveAdapter::new(archive))
        }
        StorageBackend::Memory => Arc::new(MemoryAdapter::new()),
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::WriteOptions;
    use serde_json::Map;

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.security.secret = "unit-secret".to_string();
        config.storage.backend = StorageBackend::Memory;
        config.storage.prefix = "p".to_string();
        config
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Gateway::from_config(Config::default()).err().unwrap();
        assert!(format!("{:#}", err).contains("secret"));
    }

    #[test]
    fn test_issued_url_redeems() {
        let gateway = Gateway::from_config(memory_config()).unwrap();
        let fs = gateway.filesystem();
        fs.write("a.txt", b"data", &WriteOptions::default()).unwrap();

        let url = fs.public_url("a.txt", &Map::new()).unwrap();
        let url = Url::parse(&url).unwrap();
        let token = url
            .query_pairs()
            .find(|(k, _)| k == "data")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        let file = gateway
            .delivery_handler()
            .handle(Some(&token), protocol::unix_now())
            .unwrap();
        assert_eq!(file.contents, b"data");
        assert_eq!(file.filename, "a.txt");
    }

    #[test]
    fn test_build_zip_adapter() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut storage = StorageConfig {
            backend: StorageBackend::Zip,
            ..StorageConfig::default()
        };
        assert!(build_adapter(&storage).is_err());

        storage.archive = Some(temp.path().join("s.zip"));
        let adapter = build_adapter(&storage).unwrap();
        assert_eq!(adapter.name(), "zip");
        assert!(!adapter.serves_signed_urls());
    }
}
