//! Cross-instance "stations changed" signal.
//!
//! Contract: a write to the shared key means "invalidate and resync".  The
//! transport here is a small JSON file in the shared data directory holding
//! the writer's origin id and a millisecond timestamp.  Every instance polls
//! it; writes carrying our own origin are ignored, the same way a browser tab
//! never sees its own storage events.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[async_trait]
pub trait UpdateSignal: Send + Sync {
    /// Tell every other instance that stations changed.
    async fn touch(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalStamp {
    pub origin: String,
    /// Epoch milliseconds.
    pub at: i64,
}

pub struct FileSignal {
    path: PathBuf,
    origin: String,
}

pub fn random_origin() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

impl FileSignal {
    pub fn new(path: PathBuf) -> Self {
        Self::with_origin(path, random_origin())
    }

    pub fn with_origin(path: PathBuf, origin: String) -> Self {
        Self { path, origin }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read_stamp(&self) -> Option<SignalStamp> {
        read_stamp(&self.path).await
    }

    /// Poll the signal file until `cancel` fires.  `on_remote_change` runs for
    /// every new stamp written by another origin.
    pub fn watch<F>(
        &self,
        interval: Duration,
        cancel: CancellationToken,
        on_remote_change: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(SignalStamp) + Send + 'static,
    {
        let path = self.path.clone();
        let origin = self.origin.clone();
        tokio::spawn(async move {
            let mut last = read_stamp(&path).await;
            info!("signal: watching {}", path.display());
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("signal: watcher cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let stamp = read_stamp(&path).await;
                        if stamp == last {
                            continue;
                        }
                        last = stamp.clone();
                        if let Some(stamp) = stamp {
                            if stamp.origin != origin {
                                debug!("signal: remote update from {} at {}", stamp.origin, stamp.at);
                                on_remote_change(stamp);
                            }
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl UpdateSignal for FileSignal {
    async fn touch(&self) -> anyhow::Result<()> {
        let stamp = SignalStamp {
            origin: self.origin.clone(),
            at: chrono::Utc::now().timestamp_millis(),
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so pollers never read half a stamp.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&stamp)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("signal: touched {} at {}", self.path.display(), stamp.at);
        Ok(())
    }
}

async fn read_stamp(path: &Path) -> Option<SignalStamp> {
    let bytes = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(stamp) => Some(stamp),
        Err(e) => {
            warn!("signal: ignoring unreadable stamp {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_touch_writes_stamp_with_origin() {
        let dir = tempfile::tempdir().unwrap();
        let signal = FileSignal::with_origin(dir.path().join("stations.signal"), "tab-a".into());
        signal.touch().await.unwrap();
        let stamp = signal.read_stamp().await.unwrap();
        assert_eq!(stamp.origin, "tab-a");
        assert!(stamp.at > 0);
    }

    #[tokio::test]
    async fn test_watch_ignores_own_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.signal");
        let tab_a = FileSignal::with_origin(path.clone(), "tab-a".into());
        let tab_b = FileSignal::with_origin(path, "tab-b".into());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let seen_b = seen.clone();
        let handle = tab_b.watch(Duration::from_millis(10), cancel.clone(), move |stamp| {
            seen_b.lock().unwrap().push(stamp.origin);
        });

        tab_b.touch().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        tab_a.touch().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["tab-a".to_string()]);
    }
}
