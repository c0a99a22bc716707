//! Fan-out of candidates to subscribed recipients.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::metrics::RelayMetrics;
use crate::relay::dedup::DedupStore;
use crate::relay::error::{DeliveryError, DispatchError};
use crate::relay::recipients::RecipientDirectory;
use crate::relay::types::{Candidate, Recipient};

/// Default pause between two consecutive sends.
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_millis(500);

/// Outbound message primitive, e.g. a bot API.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Send `text` to one recipient, with `media` attached when given.
    async fn deliver(
        &self,
        recipient_id: i64,
        text: &str,
        media: Option<&Path>,
    ) -> Result<(), DeliveryError>;
}

/// Message body sent for a candidate: source header, blank line, text.
pub fn format_message(candidate: &Candidate) -> String {
    format!("{}\n\n{}", candidate.source.headline(), candidate.text)
}

pub struct Dispatcher {
    recipients: Arc<dyn RecipientDirectory>,
    channel: Arc<dyn DeliveryChannel>,
    dedup: Arc<dyn DedupStore>,
    send_delay: Duration,
    metrics: Arc<RelayMetrics>,
}

impl Dispatcher {
    pub fn new(
        recipients: Arc<dyn RecipientDirectory>,
        channel: Arc<dyn DeliveryChannel>,
        dedup: Arc<dyn DedupStore>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            recipients,
            channel,
            dedup,
            send_delay: DEFAULT_SEND_DELAY,
            metrics,
        }
    }

    pub fn with_send_delay(mut self, send_delay: Duration) -> Self {
        self.send_delay = send_delay;
        self
    }

    /// Deliver `candidate` to every opted-in recipient and return how many
    /// sends succeeded.
    ///
    /// Sends are sequential with `send_delay` between them. A failed send is
    /// logged and skipped. `cancel` is honoured between sends only. The key
    /// is recorded once at least one send succeeded; a recording fault is
    /// logged and does not undo the delivery.
    pub async fn dispatch(
        &self,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Result<usize, DispatchError> {
        let key = candidate.key();
        let recipients = self.recipients.list_eligible_recipients().await?;
        let targets: Vec<&Recipient> = recipients
            .iter()
            .filter(|r| r.accepts(candidate.source))
            .collect();

        if targets.is_empty() {
            tracing::debug!(key = %key, "no recipients opted in");
            return Ok(0);
        }

        let text = format_message(candidate);
        let media = match candidate.media_path.as_deref() {
            Some(path) if tokio::fs::metadata(path).await.is_ok() => Some(path),
            Some(path) => {
                tracing::warn!(key = %key, path = %path.display(), "media file missing, sending text only");
                None
            }
            None => None,
        };

        let mut delivered = 0usize;
        for (index, recipient) in targets.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(key = %key, "dispatch cancelled after {} sends", delivered);
                break;
            }

            if index > 0 && !self.send_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!(key = %key, "dispatch cancelled after {} sends", delivered);
                        break;
                    }
                    _ = tokio::time::sleep(self.send_delay) => {}
                }
            }

            match self.channel.deliver(recipient.id, &text, media).await {
                Ok(()) => {
                    delivered += 1;
                    self.metrics.deliveries_total.inc();
                    tracing::debug!(key = %key, recipient = recipient.id, "delivered");
                }
                Err(err) => {
                    self.metrics.delivery_failures_total.inc();
                    tracing::warn!(key = %key, recipient = recipient.id, "delivery failed: {}", err);
                }
            }
        }

        if delivered > 0 {
            match self.dedup.record(&key, &candidate.meta()).await {
                Ok(true) => self.metrics.records_written_total.inc(),
                Ok(false) => tracing::debug!(key = %key, "already recorded"),
                Err(err) => {
                    tracing::error!(key = %key, "delivered but could not record: {}", err)
                }
            }
            tracing::info!(key = %key, "delivered to {}/{} recipients", delivered, targets.len());
        } else {
            tracing::warn!(key = %key, "no recipient received the item, will retry next cycle");
        }

        Ok(delivered)
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use chrono::Utc;

    use crate::relay::types::SourceKind;
    use crate::store::MemoryDedupStore;

    fn make_candidate(source: SourceKind, item_id: &str) -> Candidate {
        Candidate {
            source,
            entity_id: "-100500".into(),
            item_id: item_id.into(),
            text: "need a video editor".into(),
            media_path: None,
            produced_at: Utc::now(),
        }
    }

    fn make_dispatcher(
        directory: FixedDirectory,
        channel: Arc<RecordingChannel>,
        dedup: Arc<MemoryDedupStore>,
    ) -> Dispatcher {
        Dispatcher::new(
            Arc::new(directory),
            channel,
            dedup,
            Arc::new(RelayMetrics::new().unwrap()),
        )
    }

    // ---- fan-out ----

    #[tokio::test(start_paused = true)]
    async fn delivers_to_opted_in_recipients_and_records_key() {
        let directory = FixedDirectory::new(vec![
            make_recipient(1, &[SourceKind::Telegram]),
            make_recipient(2, &[SourceKind::Vk]),
            make_recipient(3, &[SourceKind::Telegram, SourceKind::Hh]),
        ]);
        let channel = Arc::new(RecordingChannel::default());
        let dedup = Arc::new(MemoryDedupStore::new());
        let dispatcher = make_dispatcher(directory, channel.clone(), dedup.clone());
        let candidate = make_candidate(SourceKind::Telegram, "42");

        let delivered = dispatcher
            .dispatch(&candidate, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(channel.sent_to(), vec![1, 3]);
        assert!(dedup.has(&candidate.key()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn message_carries_source_header() {
        let directory = FixedDirectory::new(vec![make_recipient(1, &[SourceKind::Hh])]);
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher =
            make_dispatcher(directory, channel.clone(), Arc::new(MemoryDedupStore::new()));

        dispatcher
            .dispatch(&make_candidate(SourceKind::Hh, "9"), &CancellationToken::new())
            .await
            .unwrap();

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent[0].1, "💼 New vacancy on HH.ru\n\nneed a video editor");
    }

    #[tokio::test(start_paused = true)]
    async fn orders_disabled_recipient_is_skipped() {
        let mut muted = make_recipient(1, &[SourceKind::Telegram]);
        muted.orders_enabled = false;
        let directory = FixedDirectory::new(vec![muted]);
        let channel = Arc::new(RecordingChannel::default());
        let dedup = Arc::new(MemoryDedupStore::new());
        let dispatcher = make_dispatcher(directory, channel.clone(), dedup.clone());
        let candidate = make_candidate(SourceKind::Telegram, "1");

        let delivered = dispatcher
            .dispatch(&candidate, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(delivered, 0);
        assert!(channel.sent_to().is_empty());
        assert!(!dedup.has(&candidate.key()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_recipient_does_not_block_others() {
        let directory = FixedDirectory::new(vec![
            make_recipient(1, &[SourceKind::Vk]),
            make_recipient(2, &[SourceKind::Vk]),
        ]);
        let channel = Arc::new(RecordingChannel {
            failing: vec![1],
            ..Default::default()
        });
        let dedup = Arc::new(MemoryDedupStore::new());
        let dispatcher = make_dispatcher(directory, channel.clone(), dedup.clone());
        let candidate = make_candidate(SourceKind::Vk, "5");

        let delivered = dispatcher
            .dispatch(&candidate, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(channel.sent_to(), vec![2]);
        assert!(dedup.has(&candidate.key()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_deliveries_leave_key_unrecorded() {
        let directory = FixedDirectory::new(vec![make_recipient(1, &[SourceKind::Vk])]);
        let channel = Arc::new(RecordingChannel {
            failing: vec![1],
            ..Default::default()
        });
        let dedup = Arc::new(MemoryDedupStore::new());
        let dispatcher = make_dispatcher(directory, channel, dedup.clone());
        let candidate = make_candidate(SourceKind::Vk, "5");

        let delivered = dispatcher
            .dispatch(&candidate, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(delivered, 0);
        assert!(!dedup.has(&candidate.key()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn record_fault_keeps_delivered_count() {
        let directory = FixedDirectory::new(vec![
            make_recipient(1, &[SourceKind::Telegram]),
            make_recipient(2, &[SourceKind::Telegram]),
        ]);
        let channel = Arc::new(RecordingChannel::default());
        let store = Arc::new(FailingStore {
            fail_record: true,
            ..Default::default()
        });
        let metrics = Arc::new(RelayMetrics::new().unwrap());
        let dispatcher = Dispatcher::new(Arc::new(directory), channel.clone(), store.clone(), metrics.clone());

        let delivered = dispatcher
            .dispatch(&make_candidate(SourceKind::Telegram, "3"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(channel.sent_to(), vec![1, 2]);
        assert_eq!(*store.record_calls.lock().unwrap(), 1);
        assert_eq!(metrics.records_written_total.get() as u64, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn directory_fault_is_returned() {
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = make_dispatcher(
            FixedDirectory::failing(),
            channel,
            Arc::new(MemoryDedupStore::new()),
        );

        let result = dispatcher
            .dispatch(&make_candidate(SourceKind::Telegram, "1"), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(DispatchError::Directory(_))));
    }

    // ---- media & pacing ----

    #[tokio::test]
    async fn media_attached_only_when_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("photo.jpg");
        std::fs::write(&present, b"jpeg").unwrap();

        let directory = FixedDirectory::new(vec![make_recipient(1, &[SourceKind::Telegram])]);
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = make_dispatcher(directory, channel.clone(), Arc::new(MemoryDedupStore::new()))
            .with_send_delay(Duration::ZERO);

        let mut with_media = make_candidate(SourceKind::Telegram, "1");
        with_media.media_path = Some(present.clone());
        let mut missing_media = make_candidate(SourceKind::Telegram, "2");
        missing_media.media_path = Some(dir.path().join("gone.jpg"));

        let token = CancellationToken::new();
        dispatcher.dispatch(&with_media, &token).await.unwrap();
        dispatcher.dispatch(&missing_media, &token).await.unwrap();

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent[0].2.as_deref(), Some(present.as_path()));
        assert_eq!(sent[1].2, None);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_are_spaced_by_send_delay() {
        let directory = FixedDirectory::new(
            (1..=3).map(|id| make_recipient(id, &[SourceKind::Hh])).collect(),
        );
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = make_dispatcher(directory, channel, Arc::new(MemoryDedupStore::new()));

        let started = tokio::time::Instant::now();
        dispatcher
            .dispatch(&make_candidate(SourceKind::Hh, "1"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() >= DEFAULT_SEND_DELAY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_between_sends_and_still_records() {
        let token = CancellationToken::new();
        let directory = FixedDirectory::new(
            (1..=3).map(|id| make_recipient(id, &[SourceKind::Telegram])).collect(),
        );
        let channel = Arc::new(RecordingChannel {
            cancel_after_first: Some(token.clone()),
            ..Default::default()
        });
        let dedup = Arc::new(MemoryDedupStore::new());
        let dispatcher = make_dispatcher(directory, channel.clone(), dedup.clone());
        let candidate = make_candidate(SourceKind::Telegram, "7");

        let delivered = dispatcher.dispatch(&candidate, &token).await.unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(channel.sent_to(), vec![1]);
        assert!(dedup.has(&candidate.key()).await.unwrap());
    }
}
