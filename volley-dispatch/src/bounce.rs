//! Bounce classification and recipient reachability updates
//!
//! A failed attempt's diagnostic is mapped to a hard (permanent) or
//! soft (transient) bounce. The split follows the reply-code families:
//! 5xx is permanent, 4xx is transient, and codeless diagnostics fall
//! back to a fixed phrase list before defaulting to soft.
//!
//! Hard bounces flip the recipient to `Bounced` but never blacklist —
//! blacklisting is a separate administrative action. Repeated soft
//! bounces only ever raise a warning signal.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;
use volley_common::{
    ids::{CampaignId, RecipientId},
    recipient::{Reachability, Recipient},
};

use crate::attempt_log::Page;

/// Soft bounces inside this trailing window count toward the warning
const SOFT_BOUNCE_WINDOW: Duration = Duration::from_secs(7 * 86400);

/// Soft bounces within the window before a warning is emitted
const SOFT_BOUNCE_WARNING_THRESHOLD: usize = 3;

/// Diagnostics with no reply code matching one of these phrases are
/// treated as hard bounces
const HARD_BOUNCE_PHRASES: &[&str] = &[
    "mailbox not found",
    "mailbox unavailable",
    "unknown user",
    "no such user",
    "user unknown",
    "invalid recipient",
    "address rejected",
    "does not exist",
];

/// Permanent vs. transient failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BounceKind {
    Hard,
    Soft,
}

/// One classified bounce
#[derive(Debug, Clone, Serialize)]
pub struct BounceRecord {
    pub recipient: RecipientId,
    pub campaign: CampaignId,
    pub kind: BounceKind,
    pub code: Option<u16>,
    pub diagnostic: String,
    pub at: SystemTime,
}

/// Extract the first 4xx/5xx reply code from a diagnostic
///
/// Looks for a standalone three-digit sequence beginning with `4` or
/// `5`; digits embedded in longer numbers (message ids, timestamps) are
/// ignored.
#[must_use]
pub fn extract_code(diagnostic: &str) -> Option<u16> {
    let bytes = diagnostic.as_bytes();

    for (index, window) in bytes.windows(3).enumerate() {
        if !(window[0] == b'4' || window[0] == b'5')
            || !window.iter().all(u8::is_ascii_digit)
        {
            continue;
        }

        let before_is_digit = index > 0 && bytes[index - 1].is_ascii_digit();
        let after_is_digit = bytes.get(index + 3).is_some_and(u8::is_ascii_digit);
        if before_is_digit || after_is_digit {
            continue;
        }

        let code = u16::from(window[0] - b'0') * 100
            + u16::from(window[1] - b'0') * 10
            + u16::from(window[2] - b'0');
        return Some(code);
    }

    None
}

/// Classify a diagnostic into a hard or soft bounce
///
/// The reply code decides when present; otherwise the phrase list
/// decides; otherwise the bounce is soft.
#[must_use]
pub fn classify(code: Option<u16>, diagnostic: &str) -> BounceKind {
    match code {
        Some(code) if (500..600).contains(&code) => BounceKind::Hard,
        Some(code) if (400..500).contains(&code) => BounceKind::Soft,
        _ => {
            let lowered = diagnostic.to_lowercase();
            if HARD_BOUNCE_PHRASES
                .iter()
                .any(|phrase| lowered.contains(phrase))
            {
                BounceKind::Hard
            } else {
                BounceKind::Soft
            }
        }
    }
}

#[derive(Debug, Default)]
struct BounceLogInner {
    records: Vec<Arc<BounceRecord>>,
    by_campaign: AHashMap<CampaignId, Vec<usize>>,
    /// Soft bounce timestamps per recipient, append-ordered
    soft_by_recipient: AHashMap<RecipientId, Vec<SystemTime>>,
}

/// Classifier plus the append-only record of its decisions
#[derive(Debug, Default)]
pub struct BounceClassifier {
    inner: RwLock<BounceLogInner>,
}

impl BounceClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a failed attempt and update the recipient in place
    ///
    /// Appends a [`BounceRecord`] either way. Returns the
    /// classification; the caller is responsible for the campaign's
    /// advisory bounced counter.
    pub fn record_failure(
        &self,
        campaign: CampaignId,
        recipient: &mut Recipient,
        diagnostic: &str,
        now: SystemTime,
    ) -> BounceKind {
        let code = extract_code(diagnostic);
        let kind = classify(code, diagnostic);

        recipient.bounce_count += 1;
        recipient.last_bounce_at = Some(chrono::DateTime::<chrono::Utc>::from(now));

        match kind {
            BounceKind::Hard => {
                // Never auto-blacklist; that is an administrative action
                recipient.reachability = Reachability::Bounced;
            }
            BounceKind::Soft => {
                let recent = self.note_soft_bounce(recipient.id, now);
                if recent >= SOFT_BOUNCE_WARNING_THRESHOLD {
                    warn!(
                        recipient = %recipient.id,
                        soft_bounces = recent,
                        window_days = SOFT_BOUNCE_WINDOW.as_secs() / 86400,
                        "Recipient repeatedly soft-bouncing; no automatic suppression applied"
                    );
                }
            }
        }

        let mut inner = self.inner.write();
        let index = inner.records.len();
        inner.by_campaign.entry(campaign).or_default().push(index);
        inner.records.push(Arc::new(BounceRecord {
            recipient: recipient.id,
            campaign,
            kind,
            code,
            diagnostic: diagnostic.to_string(),
            at: now,
        }));

        kind
    }

    /// Record a soft bounce and return the count within the window
    fn note_soft_bounce(&self, recipient: RecipientId, now: SystemTime) -> usize {
        let mut inner = self.inner.write();
        let stamps = inner.soft_by_recipient.entry(recipient).or_default();
        stamps.push(now);

        let since = now - SOFT_BOUNCE_WINDOW;
        stamps.iter().filter(|&&at| at >= since && at <= now).count()
    }

    /// Soft bounces for a recipient within the trailing window
    #[must_use]
    pub fn soft_bounces_in_window(&self, recipient: RecipientId, now: SystemTime) -> usize {
        let inner = self.inner.read();
        let since = now - SOFT_BOUNCE_WINDOW;
        inner.soft_by_recipient.get(&recipient).map_or(0, |stamps| {
            stamps.iter().filter(|&&at| at >= since && at <= now).count()
        })
    }

    /// Total bounce records
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Paginated read of a campaign's bounces, oldest first
    #[must_use]
    pub fn page_for_campaign(
        &self,
        campaign: CampaignId,
        offset: usize,
        limit: usize,
    ) -> Page<Arc<BounceRecord>> {
        let inner = self.inner.read();
        let indexes = inner
            .by_campaign
            .get(&campaign)
            .map_or(&[][..], Vec::as_slice);

        let items = indexes
            .iter()
            .skip(offset)
            .take(limit)
            .map(|&i| inner.records[i].clone())
            .collect();

        Page {
            items,
            total: indexes.len(),
            offset,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use volley_common::address::EmailAddress;

    use super::*;

    #[test]
    fn test_extract_code_from_protocol_response() {
        assert_eq!(extract_code("550 mailbox not found"), Some(550));
        assert_eq!(extract_code("450 too busy, try later"), Some(450));
        assert_eq!(extract_code("delivery failed: 421 service unavailable"), Some(421));
    }

    #[test]
    fn test_extract_code_ignores_embedded_digits() {
        // 4512 is not a reply code, and neither is the id
        assert_eq!(extract_code("message id 45123456 deferred"), None);
        assert_eq!(extract_code("queue-5501-overflow at 4512"), None);
    }

    #[test]
    fn test_extract_code_absent() {
        assert_eq!(extract_code("connection reset by peer"), None);
        assert_eq!(extract_code("250 ok"), None);
    }

    #[test]
    fn test_classify_by_code_prefix() {
        assert_eq!(classify(Some(550), "whatever"), BounceKind::Hard);
        assert_eq!(classify(Some(552), "over quota"), BounceKind::Hard);
        assert_eq!(classify(Some(421), "service busy"), BounceKind::Soft);
        assert_eq!(classify(Some(450), "greylisted"), BounceKind::Soft);
    }

    #[test]
    fn test_classify_codeless_by_phrase() {
        assert_eq!(classify(None, "Unknown User"), BounceKind::Hard);
        assert_eq!(classify(None, "no such user here"), BounceKind::Hard);
        assert_eq!(classify(None, "temporary failure"), BounceKind::Soft);
        assert_eq!(classify(None, "connection timed out"), BounceKind::Soft);
    }

    #[test]
    fn test_spec_classification_table() {
        // The canonical cases
        let code = extract_code("550 mailbox not found");
        assert_eq!(classify(code, "550 mailbox not found"), BounceKind::Hard);

        let code = extract_code("450 too busy");
        assert_eq!(classify(code, "450 too busy"), BounceKind::Soft);

        assert_eq!(classify(None, "unknown user"), BounceKind::Hard);
        assert_eq!(classify(None, "temporary failure"), BounceKind::Soft);
    }

    fn recipient() -> Recipient {
        Recipient::new(
            RecipientId::generate(),
            EmailAddress::parse("user@example.com").unwrap(),
        )
    }

    #[test]
    fn test_hard_bounce_updates_reachability() {
        let classifier = BounceClassifier::new();
        let campaign = CampaignId::generate();
        let mut recipient = recipient();
        let now = SystemTime::now();

        let kind =
            classifier.record_failure(campaign, &mut recipient, "550 mailbox not found", now);

        assert_eq!(kind, BounceKind::Hard);
        assert_eq!(recipient.reachability, Reachability::Bounced);
        assert_eq!(recipient.bounce_count, 1);
        assert!(recipient.last_bounce_at.is_some());
        assert_eq!(classifier.len(), 1);
    }

    #[test]
    fn test_soft_bounce_keeps_recipient_active() {
        let classifier = BounceClassifier::new();
        let campaign = CampaignId::generate();
        let mut recipient = recipient();
        let now = SystemTime::now();

        let kind = classifier.record_failure(campaign, &mut recipient, "450 greylisted", now);

        assert_eq!(kind, BounceKind::Soft);
        assert_eq!(recipient.reachability, Reachability::Active);
        assert_eq!(recipient.bounce_count, 1);
    }

    #[test]
    fn test_soft_bounce_window_counting() {
        let classifier = BounceClassifier::new();
        let campaign = CampaignId::generate();
        let mut recipient = recipient();
        let now = SystemTime::now();

        // Two inside the window, one far outside
        classifier.record_failure(
            campaign,
            &mut recipient,
            "450 busy",
            now - Duration::from_secs(10 * 86400),
        );
        classifier.record_failure(campaign, &mut recipient, "450 busy", now - Duration::from_secs(86400));
        classifier.record_failure(campaign, &mut recipient, "450 busy", now);

        assert_eq!(classifier.soft_bounces_in_window(recipient.id, now), 2);
        // No suppression regardless of count
        assert_eq!(recipient.reachability, Reachability::Active);
    }

    #[test]
    fn test_bounce_records_paginate_per_campaign() {
        let classifier = BounceClassifier::new();
        let campaign_a = CampaignId::generate();
        let campaign_b = CampaignId::generate();
        let now = SystemTime::now();

        for _ in 0..3 {
            let mut r = recipient();
            classifier.record_failure(campaign_a, &mut r, "450 busy", now);
        }
        let mut r = recipient();
        classifier.record_failure(campaign_b, &mut r, "550 unknown user", now);

        let page = classifier.page_for_campaign(campaign_a, 0, 10);
        assert_eq!(page.total, 3);
        assert!(page.items.iter().all(|b| b.campaign == campaign_a));

        let page = classifier.page_for_campaign(campaign_b, 0, 10);
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].kind, BounceKind::Hard);
    }
}
