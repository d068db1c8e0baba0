//! Pure recurrence expansion. No hidden state, safe to call concurrently;
//! the same inputs always produce the same sequence.

use chrono::{DateTime, Duration, Months, Utc};

use crate::error::CoreError;
use crate::models::{Frequency, RecurrenceEnd, RecurrenceRule};

/// Lazy, finite sequence of occurrence timestamps for one rule within one
/// window. Produced by [`expand`].
#[derive(Debug, Clone)]
pub struct OccurrenceDates {
    rule: RecurrenceRule,
    anchor: DateTime<Utc>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    next_index: u32,
    exhausted: bool,
}

impl Iterator for OccurrenceDates {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        loop {
            if self.exhausted {
                return None;
            }
            let index = self.next_index;
            if let Some(RecurrenceEnd::Count(count)) = self.rule.end {
                if index >= count {
                    self.exhausted = true;
                    return None;
                }
            }
            let Some(at) = nth_occurrence(&self.rule, self.anchor, index) else {
                // Calendar arithmetic overflowed; the sequence ends here.
                self.exhausted = true;
                return None;
            };
            if let Some(RecurrenceEnd::Until(until)) = self.rule.end {
                if at > until {
                    self.exhausted = true;
                    return None;
                }
            }
            if at > self.to {
                self.exhausted = true;
                return None;
            }
            self.next_index += 1;
            if at >= self.from {
                return Some(at);
            }
        }
    }
}

/// Expands `rule` from `anchor` into the occurrence timestamps intersecting
/// `[from, to]`, in ascending order.
///
/// The k-th occurrence is always derived from the anchor (anchor advanced by
/// k * interval units), never from a previously emitted occurrence. Monthly
/// and yearly steps clamp to the end of shorter months, so a rule anchored on
/// Jan 31 emits Feb 28 and then recovers to Mar 31 instead of drifting.
///
/// Fails with `InvalidRule` when the interval is zero and `InvalidWindow`
/// when `from > to`.
pub fn expand(
    rule: &RecurrenceRule,
    anchor: DateTime<Utc>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<OccurrenceDates, CoreError> {
    if rule.interval == 0 {
        return Err(CoreError::InvalidRule(
            "interval must be at least 1".to_string(),
        ));
    }
    if from > to {
        return Err(CoreError::InvalidWindow { from, to });
    }
    Ok(OccurrenceDates {
        rule: rule.clone(),
        anchor,
        from,
        to,
        next_index: 0,
        exhausted: false,
    })
}

/// Whether `at` is a valid occurrence of `rule` anchored at `anchor`.
pub fn contains(
    rule: &RecurrenceRule,
    anchor: DateTime<Utc>,
    at: DateTime<Utc>,
) -> Result<bool, CoreError> {
    Ok(expand(rule, anchor, at, at)?.next().is_some())
}

fn nth_occurrence(rule: &RecurrenceRule, anchor: DateTime<Utc>, index: u32) -> Option<DateTime<Utc>> {
    let steps = index.checked_mul(rule.interval)?;
    match rule.frequency {
        Frequency::Daily => anchor.checked_add_signed(Duration::days(steps as i64)),
        Frequency::Weekly => anchor.checked_add_signed(Duration::weeks(steps as i64)),
        Frequency::Monthly => anchor.checked_add_months(Months::new(steps)),
        Frequency::Yearly => anchor.checked_add_months(Months::new(steps.checked_mul(12)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rstest::rstest;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    fn collect(
        rule: &RecurrenceRule,
        anchor: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        expand(rule, anchor, from, to).unwrap().collect()
    }

    mod expansion {
        use super::*;

        #[test]
        fn weekly_rule_fills_the_window() {
            let rule = RecurrenceRule::new(Frequency::Weekly, 1);
            let anchor = at(2025, 1, 1);
            let dates = collect(&rule, anchor, at(2025, 1, 1), at(2025, 1, 22));
            assert_eq!(
                dates,
                vec![at(2025, 1, 1), at(2025, 1, 8), at(2025, 1, 15), at(2025, 1, 22)]
            );
        }

        #[test]
        fn window_clips_both_ends() {
            let rule = RecurrenceRule::new(Frequency::Daily, 2);
            let anchor = at(2025, 1, 1);
            let dates = collect(&rule, anchor, at(2025, 1, 4), at(2025, 1, 8));
            assert_eq!(dates, vec![at(2025, 1, 5), at(2025, 1, 7)]);
        }

        #[test]
        fn window_before_anchor_is_empty() {
            let rule = RecurrenceRule::new(Frequency::Daily, 1);
            let dates = collect(&rule, at(2025, 6, 1), at(2025, 1, 1), at(2025, 2, 1));
            assert!(dates.is_empty());
        }

        #[test]
        fn monthly_step_clamps_to_month_end_and_recovers() {
            let rule = RecurrenceRule::new(Frequency::Monthly, 1);
            let anchor = at(2025, 1, 31);
            let dates = collect(&rule, anchor, anchor, at(2025, 4, 30));
            assert_eq!(
                dates,
                vec![at(2025, 1, 31), at(2025, 2, 28), at(2025, 3, 31), at(2025, 4, 30)]
            );
        }

        #[test]
        fn yearly_step_clamps_leap_day() {
            let rule = RecurrenceRule::new(Frequency::Yearly, 1);
            let anchor = at(2024, 2, 29);
            let dates = collect(&rule, anchor, anchor, at(2028, 12, 31));
            assert_eq!(
                dates,
                vec![
                    at(2024, 2, 29),
                    at(2025, 2, 28),
                    at(2026, 2, 28),
                    at(2027, 2, 28),
                    at(2028, 2, 29),
                ]
            );
        }

        #[rstest]
        #[case(Frequency::Daily, Duration::days(3))]
        #[case(Frequency::Weekly, Duration::weeks(3))]
        fn fixed_frequencies_step_by_interval(#[case] frequency: Frequency, #[case] step: Duration) {
            let rule = RecurrenceRule::new(frequency, 3);
            let anchor = at(2025, 3, 10);
            let dates = collect(&rule, anchor, anchor, anchor + step * 10);
            assert!(dates.len() > 2);
            for pair in dates.windows(2) {
                assert_eq!(pair[1] - pair[0], step);
            }
        }
    }

    mod end_conditions {
        use super::*;

        #[test]
        fn count_bounds_the_series() {
            let rule = RecurrenceRule::new(Frequency::Daily, 1).count(3);
            let anchor = at(2025, 1, 1);
            let dates = collect(&rule, anchor, anchor, at(2025, 12, 31));
            assert_eq!(dates, vec![at(2025, 1, 1), at(2025, 1, 2), at(2025, 1, 3)]);
        }

        #[test]
        fn until_bounds_the_series() {
            let rule = RecurrenceRule::new(Frequency::Weekly, 1).until(at(2025, 1, 15));
            let anchor = at(2025, 1, 1);
            let dates = collect(&rule, anchor, anchor, at(2025, 12, 31));
            assert_eq!(dates, vec![at(2025, 1, 1), at(2025, 1, 8), at(2025, 1, 15)]);
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn zero_interval_is_rejected() {
            let rule = RecurrenceRule::new(Frequency::Daily, 0);
            let result = expand(&rule, at(2025, 1, 1), at(2025, 1, 1), at(2025, 1, 2));
            assert!(matches!(result, Err(CoreError::InvalidRule(_))));
        }

        #[test]
        fn inverted_window_is_rejected() {
            let rule = RecurrenceRule::new(Frequency::Daily, 1);
            let result = expand(&rule, at(2025, 1, 1), at(2025, 1, 2), at(2025, 1, 1));
            assert!(matches!(result, Err(CoreError::InvalidWindow { .. })));
        }
    }

    mod membership {
        use super::*;

        #[test]
        fn contains_accepts_exact_occurrences_only() {
            let rule = RecurrenceRule::new(Frequency::Weekly, 1);
            let anchor = at(2025, 1, 1);
            assert!(contains(&rule, anchor, at(2025, 1, 8)).unwrap());
            assert!(!contains(&rule, anchor, at(2025, 1, 9)).unwrap());
            assert!(!contains(&rule, anchor, at(2024, 12, 25)).unwrap());
        }

        #[test]
        fn contains_respects_count_end() {
            let rule = RecurrenceRule::new(Frequency::Daily, 1).count(2);
            let anchor = at(2025, 1, 1);
            assert!(contains(&rule, anchor, at(2025, 1, 2)).unwrap());
            assert!(!contains(&rule, anchor, at(2025, 1, 3)).unwrap());
        }
    }

    proptest! {
        #[test]
        fn expansion_is_idempotent_and_strictly_increasing(
            freq_index in 0usize..4,
            interval in 1u32..24,
            window_days in 1i64..400,
        ) {
            let frequency = [
                Frequency::Daily,
                Frequency::Weekly,
                Frequency::Monthly,
                Frequency::Yearly,
            ][freq_index];
            let rule = RecurrenceRule::new(frequency, interval);
            let anchor = at(2025, 1, 15);
            let to = anchor + Duration::days(window_days);

            let first: Vec<_> = collect(&rule, anchor, anchor, to);
            let second: Vec<_> = collect(&rule, anchor, anchor, to);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.first().copied(), Some(anchor));
            for pair in first.windows(2) {
                prop_assert!(pair[0] < pair[1]);
            }
        }
    }
}
