//! Delivery policy evaluation
//!
//! Decides, for one outgoing message, whether the recipient gets it now or
//! whether it is held back until do-not-disturb is switched off or the next
//! availability window opens. Pure: no I/O, no clock access beyond `now`.

use crate::config::PolicyConfig;
use crate::models::{MessageStatus, QueuedReason, RecipientAvailability};
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDecision {
    DeliverNow,
    Queue {
        reason: QueuedReason,
        /// Earliest release instant; only set for `OutsideTimeBoundary`
        deliver_at: Option<DateTime<Utc>>,
    },
}

impl DeliveryDecision {
    pub fn is_queued(&self) -> bool {
        matches!(self, DeliveryDecision::Queue { .. })
    }

    pub fn initial_status(&self) -> MessageStatus {
        match self {
            DeliveryDecision::DeliverNow => MessageStatus::Sent,
            DeliveryDecision::Queue { .. } => MessageStatus::Queued,
        }
    }

    pub fn queued_reason(&self) -> Option<QueuedReason> {
        match self {
            DeliveryDecision::DeliverNow => None,
            DeliveryDecision::Queue { reason, .. } => Some(*reason),
        }
    }

    pub fn deliver_at(&self) -> Option<DateTime<Utc>> {
        match self {
            DeliveryDecision::DeliverNow => None,
            DeliveryDecision::Queue { deliver_at, .. } => *deliver_at,
        }
    }

    /// Label used for the accepted-messages metric
    pub fn outcome_label(&self) -> &'static str {
        match self.queued_reason() {
            None => "live",
            Some(QueuedReason::RecipientCalmMode) => "queued_calm_mode",
            Some(QueuedReason::OutsideTimeBoundary) => "queued_time_boundary",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryPolicy {
    config: PolicyConfig,
}

impl DeliveryPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        availability: &RecipientAvailability,
        now: DateTime<Utc>,
    ) -> DeliveryDecision {
        if availability.do_not_disturb_active {
            return DeliveryDecision::Queue {
                reason: QueuedReason::RecipientCalmMode,
                deliver_at: None,
            };
        }

        let tz = availability.timezone();
        let local = now.with_timezone(&tz);
        let today = local.date_naive();
        let t = to_minute(local.time());

        // Morning tail of an overnight window that opened yesterday
        if let Some(yesterday) = today.pred_opt() {
            if let Some(prev) = availability.boundary_for(yesterday.weekday()) {
                if prev.is_overnight() && t <= prev.end {
                    return DeliveryDecision::DeliverNow;
                }
            }
        }

        let Some(boundary) = availability.boundary_for(today.weekday()) else {
            return DeliveryDecision::DeliverNow;
        };

        if boundary.is_overnight() {
            if t >= boundary.start || t <= boundary.end {
                return DeliveryDecision::DeliverNow;
            }
            return queue_until(local_instant(tz, today, boundary.start));
        }

        if t < boundary.start {
            return queue_until(local_instant(tz, today, boundary.start));
        }
        if t <= boundary.end {
            return DeliveryDecision::DeliverNow;
        }

        queue_until(self.next_window_start(availability, today))
    }

    /// Start of the next configured window after `today`, scanning forward a
    /// full week (so today's own weekday is reached again last). Falls back to
    /// tomorrow at the configured fallback time.
    pub fn next_window_start(
        &self,
        availability: &RecipientAvailability,
        today: NaiveDate,
    ) -> DateTime<Utc> {
        let tz = availability.timezone();
        for offset in 1..=7 {
            let day = today + Duration::days(offset);
            if let Some(boundary) = availability.boundary_for(day.weekday()) {
                return local_instant(tz, day, boundary.start);
            }
        }

        let tomorrow = today + Duration::days(1);
        local_instant(tz, tomorrow, self.config.fallback_delivery_time)
    }
}

fn queue_until(deliver_at: DateTime<Utc>) -> DeliveryDecision {
    DeliveryDecision::Queue {
        reason: QueuedReason::OutsideTimeBoundary,
        deliver_at: Some(deliver_at),
    }
}

fn to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

/// Resolve a wall-clock time in `tz` to an instant. Times inside a DST gap move
/// forward one hour; ambiguous times take the earlier instant.
fn local_instant(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            match tz.from_local_datetime(&shifted).earliest() {
                Some(dt) => dt.with_timezone(&Utc),
                None => Utc.from_utc_datetime(&shifted),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeBoundary;
    use chrono::Weekday;

    // 2024-01-01 is a Monday
    fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, h, m, 0).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(day: Weekday, start: NaiveTime, end: NaiveTime) -> TimeBoundary {
        TimeBoundary::new(day, start, end, Tz::UTC)
    }

    fn policy() -> DeliveryPolicy {
        DeliveryPolicy::new(PolicyConfig::default())
    }

    #[test]
    fn do_not_disturb_queues_without_deliver_at() {
        let availability = RecipientAvailability::new(
            true,
            vec![window(Weekday::Mon, hm(0, 0), hm(23, 59))],
        );
        let decision = policy().evaluate(&availability, at(1, 12, 0));
        assert_eq!(
            decision,
            DeliveryDecision::Queue {
                reason: QueuedReason::RecipientCalmMode,
                deliver_at: None,
            }
        );
        assert_eq!(decision.initial_status(), MessageStatus::Queued);
    }

    #[test]
    fn no_boundary_today_delivers() {
        let availability =
            RecipientAvailability::new(false, vec![window(Weekday::Tue, hm(9, 0), hm(21, 0))]);
        assert_eq!(
            policy().evaluate(&availability, at(1, 3, 0)),
            DeliveryDecision::DeliverNow
        );
        assert_eq!(
            policy().evaluate(&RecipientAvailability::always_available(), at(1, 3, 0)),
            DeliveryDecision::DeliverNow
        );
    }

    #[test]
    fn before_window_waits_for_todays_start() {
        let availability =
            RecipientAvailability::new(false, vec![window(Weekday::Mon, hm(9, 0), hm(21, 0))]);
        let decision = policy().evaluate(&availability, at(1, 7, 30));
        assert_eq!(decision.queued_reason(), Some(QueuedReason::OutsideTimeBoundary));
        assert_eq!(decision.deliver_at(), Some(at(1, 9, 0)));
    }

    #[test]
    fn inside_window_delivers() {
        let availability =
            RecipientAvailability::new(false, vec![window(Weekday::Mon, hm(9, 0), hm(21, 0))]);
        let decision = policy().evaluate(&availability, at(1, 12, 0));
        assert_eq!(decision, DeliveryDecision::DeliverNow);
        assert_eq!(decision.initial_status(), MessageStatus::Sent);
    }

    #[test]
    fn window_edges_are_inclusive_at_minute_precision() {
        let availability =
            RecipientAvailability::new(false, vec![window(Weekday::Mon, hm(9, 0), hm(21, 0))]);
        assert!(!policy().evaluate(&availability, at(1, 9, 0)).is_queued());
        let late = at(1, 21, 0) + Duration::seconds(45);
        assert!(!policy().evaluate(&availability, late).is_queued());
        assert!(policy().evaluate(&availability, at(1, 21, 1)).is_queued());
    }

    #[test]
    fn after_window_jumps_to_next_configured_day() {
        let availability = RecipientAvailability::new(
            false,
            vec![
                window(Weekday::Mon, hm(9, 0), hm(21, 0)),
                window(Weekday::Wed, hm(10, 30), hm(18, 0)),
            ],
        );
        let decision = policy().evaluate(&availability, at(1, 22, 0));
        assert_eq!(decision.deliver_at(), Some(at(3, 10, 30)));
    }

    #[test]
    fn after_window_wraps_to_same_weekday_next_week() {
        let availability =
            RecipientAvailability::new(false, vec![window(Weekday::Mon, hm(9, 0), hm(21, 0))]);
        let decision = policy().evaluate(&availability, at(1, 22, 0));
        assert_eq!(decision.deliver_at(), Some(at(8, 9, 0)));
    }

    #[test]
    fn scan_without_any_boundary_falls_back_to_tomorrow() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let start = policy().next_window_start(&RecipientAvailability::always_available(), today);
        assert_eq!(start, at(2, 9, 0));

        let custom = DeliveryPolicy::new(PolicyConfig {
            fallback_delivery_time: hm(7, 15),
        });
        let start = custom.next_window_start(&RecipientAvailability::always_available(), today);
        assert_eq!(start, at(2, 7, 15));
    }

    #[test]
    fn evaluation_is_repeatable() {
        let availability = RecipientAvailability::new(
            false,
            vec![
                window(Weekday::Mon, hm(9, 0), hm(21, 0)),
                window(Weekday::Thu, hm(8, 0), hm(12, 0)),
            ],
        );
        for now in [at(1, 7, 0), at(1, 12, 0), at(1, 23, 0)] {
            assert_eq!(
                policy().evaluate(&availability, now),
                policy().evaluate(&availability, now)
            );
        }
    }

    #[test]
    fn window_is_read_in_recipient_timezone() {
        let availability = RecipientAvailability::new(
            false,
            vec![TimeBoundary::new(
                Weekday::Mon,
                hm(9, 0),
                hm(17, 0),
                chrono_tz::America::New_York,
            )],
        );
        // 13:00 UTC is 08:00 EST
        let decision = policy().evaluate(&availability, at(1, 13, 0));
        assert_eq!(decision.deliver_at(), Some(at(1, 14, 0)));
        // 15:00 UTC is 10:00 EST
        assert!(!policy().evaluate(&availability, at(1, 15, 0)).is_queued());
    }

    #[test]
    fn overnight_window_spans_midnight() {
        // 2024-01-05 is a Friday
        let availability =
            RecipientAvailability::new(false, vec![window(Weekday::Fri, hm(22, 0), hm(6, 0))]);
        assert!(!policy().evaluate(&availability, at(5, 23, 0)).is_queued());
        assert!(!policy().evaluate(&availability, at(5, 2, 0)).is_queued());

        let decision = policy().evaluate(&availability, at(5, 12, 0));
        assert_eq!(decision.deliver_at(), Some(at(5, 22, 0)));
    }

    #[test]
    fn overnight_tail_counts_before_todays_window() {
        let availability = RecipientAvailability::new(
            false,
            vec![
                window(Weekday::Fri, hm(22, 0), hm(6, 0)),
                window(Weekday::Sat, hm(9, 0), hm(21, 0)),
            ],
        );
        assert!(!policy().evaluate(&availability, at(6, 5, 0)).is_queued());
        let decision = policy().evaluate(&availability, at(6, 7, 0));
        assert_eq!(decision.deliver_at(), Some(at(6, 9, 0)));
    }

    #[test]
    fn deliver_at_in_dst_gap_moves_forward_an_hour() {
        // 2024-03-10 02:30 does not exist in New York
        let availability = RecipientAvailability::new(
            false,
            vec![TimeBoundary::new(
                Weekday::Sun,
                hm(2, 30),
                hm(5, 0),
                chrono_tz::America::New_York,
            )],
        );
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap();
        let decision = policy().evaluate(&availability, now);
        assert_eq!(
            decision.deliver_at(),
            Some(Utc.with_ymd_and_hms(2024, 3, 10, 7, 30, 0).unwrap())
        );
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(DeliveryDecision::DeliverNow.outcome_label(), "live");
        assert_eq!(
            DeliveryDecision::Queue {
                reason: QueuedReason::RecipientCalmMode,
                deliver_at: None
            }
            .outcome_label(),
            "queued_calm_mode"
        );
    }
}
