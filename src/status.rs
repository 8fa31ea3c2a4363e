//! Transient user-facing status messages.
//!
//! One message is visible at a time, last write wins. Info and success
//! messages hide themselves after a short delay; errors stay until replaced.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
}

impl Severity {
    /// CSS class suffix used by the dashboard page
    pub fn class(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Banner {
    pub text: String,
    pub severity: Severity,

    #[serde(skip)]
    seq: u64,
}

struct Inner {
    tx: watch::Sender<Option<Banner>>,
    seq: AtomicU64,
    auto_hide: Duration,
}

#[derive(Clone)]
pub struct StatusBanner {
    inner: Arc<Inner>,
}

impl StatusBanner {
    pub fn new(auto_hide: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                tx,
                seq: AtomicU64::new(0),
                auto_hide,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Banner>> {
        self.inner.tx.subscribe()
    }

    pub fn current(&self) -> Option<Banner> {
        self.inner.tx.borrow().clone()
    }

    /// Shows a message, replacing whatever is visible. Non-error messages
    /// schedule their own removal; a newer message makes the stale expiry a
    /// no-op.
    pub fn show(&self, text: impl Into<String>, severity: Severity) {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed) + 1;
        // send_replace updates the value even when no receiver exists yet
        self.inner.tx.send_replace(Some(Banner {
            text: text.into(),
            severity,
            seq,
        }));

        if severity != Severity::Error {
            let this = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(this.inner.auto_hide).await;
                this.hide_if_current(seq);
            });
        }
    }

    pub fn hide(&self) {
        self.inner.tx.send_replace(None);
    }

    fn hide_if_current(&self, seq: u64) {
        self.inner.tx.send_if_modified(|current| {
            if current.as_ref().is_some_and(|banner| banner.seq == seq) {
                *current = None;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shows_and_hides_without_any_subscriber() {
        let banner = StatusBanner::new(Duration::from_secs(5));

        banner.show("visible", Severity::Error);
        assert_eq!(banner.current().unwrap().text, "visible");

        banner.hide();
        assert!(banner.current().is_none());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let banner = StatusBanner::new(Duration::from_secs(5));

        banner.show("first", Severity::Info);
        banner.show("second", Severity::Success);

        let current = banner.current().unwrap();
        assert_eq!(current.text, "second");
        assert_eq!(current.severity, Severity::Success);
    }

    #[tokio::test]
    async fn info_auto_hides() {
        let banner = StatusBanner::new(Duration::from_millis(20));

        banner.show("transient", Severity::Info);
        assert!(banner.current().is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(banner.current().is_none());
    }

    #[tokio::test]
    async fn error_persists_past_auto_hide() {
        let banner = StatusBanner::new(Duration::from_millis(20));

        banner.show("broken", Severity::Error);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let current = banner.current().unwrap();
        assert_eq!(current.severity, Severity::Error);
    }

    #[tokio::test]
    async fn stale_expiry_does_not_clear_newer_message() {
        let banner = StatusBanner::new(Duration::from_millis(30));

        banner.show("old", Severity::Info);
        tokio::time::sleep(Duration::from_millis(10)).await;
        banner.show("broken", Severity::Error);

        // The first message's expiry fires here; the error must survive it
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(banner.current().unwrap().text, "broken");
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let banner = StatusBanner::new(Duration::from_secs(5));
        let mut rx = banner.subscribe();

        banner.show("hello", Severity::Info);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().text, "hello");

        banner.hide();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }
}
