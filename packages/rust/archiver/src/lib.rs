//! Archival backends behind a single capability interface.
//!
//! This crate provides:
//! - [`Broker`]: one capability per slot (`ia`, `is`, `ip`, `ph`)
//! - [`HttpBroker`]: the HTTP adapter that implements all four

mod backends;
mod broker;

use async_trait::async_trait;
use wayback_shared::{Mapping, Result, Slot};

pub use broker::HttpBroker;

/// The archival capabilities the dispatch engine calls, one per slot.
///
/// Each call returns original URL → archived URL for every URL the backend
/// managed to archive. URLs that failed are left out; a backend that could
/// archive none of them returns an error.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Internet Archive.
    async fn ia(&self, urls: &[String]) -> Result<Mapping>;

    /// archive.today.
    async fn is(&self, urls: &[String]) -> Result<Mapping>;

    /// IPFS.
    async fn ip(&self, urls: &[String]) -> Result<Mapping>;

    /// Telegraph.
    async fn ph(&self, urls: &[String]) -> Result<Mapping>;

    /// Route to the capability for `slot`.
    async fn archive(&self, slot: Slot, urls: &[String]) -> Result<Mapping> {
        match slot {
            Slot::Ia => self.ia(urls).await,
            Slot::Is => self.is(urls).await,
            Slot::Ip => self.ip(urls).await,
            Slot::Ph => self.ph(urls).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayback_shared::WaybackError;

    /// Answers every capability with a fixed, slot-tagged archive URL.
    struct Echo;

    fn tag(slot: Slot, urls: &[String]) -> Mapping {
        urls.iter()
            .map(|u| (u.clone(), format!("https://{slot}.example/{u}")))
            .collect()
    }

    #[async_trait]
    impl Broker for Echo {
        async fn ia(&self, urls: &[String]) -> Result<Mapping> {
            Ok(tag(Slot::Ia, urls))
        }
        async fn is(&self, urls: &[String]) -> Result<Mapping> {
            Ok(tag(Slot::Is, urls))
        }
        async fn ip(&self, urls: &[String]) -> Result<Mapping> {
            Ok(tag(Slot::Ip, urls))
        }
        async fn ph(&self, _urls: &[String]) -> Result<Mapping> {
            Err(WaybackError::backend(Slot::Ph, "no token"))
        }
    }

    #[tokio::test]
    async fn archive_routes_by_slot() {
        let urls = vec!["a".to_string()];
        let ia = Echo.archive(Slot::Ia, &urls).await.unwrap();
        assert_eq!(ia["a"], "https://ia.example/a");

        let ip = Echo.archive(Slot::Ip, &urls).await.unwrap();
        assert_eq!(ip["a"], "https://ip.example/a");

        let ph = Echo.archive(Slot::Ph, &urls).await;
        assert!(matches!(ph, Err(WaybackError::Backend { slot: Slot::Ph, .. })));
    }
}
