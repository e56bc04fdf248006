use chrono::{Datelike, Days, Months, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::model::{Ms, Span};

use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Week,
    Month,
}

impl Granularity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "day" | "dia" => Some(Granularity::Day),
            "week" | "semana" => Some(Granularity::Week),
            "month" | "mes" | "mês" => Some(Granularity::Month),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Prev,
    Next,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "prev" | "previous" => Some(Direction::Prev),
            "next" => Some(Direction::Next),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "pt-BR")]
    PtBr,
    #[serde(rename = "en-US")]
    EnUs,
    #[serde(rename = "en-GB")]
    EnGb,
}

const PT_MONTHS: [&str; 12] = [
    "janeiro", "fevereiro", "março", "abril", "maio", "junho", "julho", "agosto", "setembro",
    "outubro", "novembro", "dezembro",
];

const EN_MONTHS: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

impl Locale {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "pt-br" | "pt" => Some(Locale::PtBr),
            "en-us" | "en" => Some(Locale::EnUs),
            "en-gb" => Some(Locale::EnGb),
            _ => None,
        }
    }

    pub fn first_weekday(&self) -> Weekday {
        match self {
            Locale::PtBr | Locale::EnUs => Weekday::Sun,
            Locale::EnGb => Weekday::Mon,
        }
    }

    fn month_name(&self, month0: u32) -> &'static str {
        let names = match self {
            Locale::PtBr => &PT_MONTHS,
            Locale::EnUs | Locale::EnGb => &EN_MONTHS,
        };
        names[month0 as usize % 12]
    }

    fn full_date(&self, d: NaiveDate) -> String {
        let month = self.month_name(d.month0());
        match self {
            Locale::PtBr => format!("{} de {} de {}", d.day(), month, d.year()),
            Locale::EnUs => format!("{} {}, {}", month, d.day(), d.year()),
            Locale::EnGb => format!("{} {} {}", d.day(), month, d.year()),
        }
    }

    fn day_month(&self, d: NaiveDate) -> String {
        let month = self.month_name(d.month0());
        match self {
            Locale::PtBr => format!("{} de {}", d.day(), month),
            Locale::EnUs => format!("{} {}", month, d.day()),
            Locale::EnGb => format!("{} {}", d.day(), month),
        }
    }

    fn month_year(&self, d: NaiveDate) -> String {
        let month = self.month_name(d.month0());
        match self {
            Locale::PtBr => format!("{} de {}", month, d.year()),
            Locale::EnUs | Locale::EnGb => format!("{} {}", month, d.year()),
        }
    }

    /// `first` and `last` are both inclusive.
    fn date_range(&self, first: NaiveDate, last: NaiveDate) -> String {
        if first.year() != last.year() {
            return format!("{} - {}", self.full_date(first), self.full_date(last));
        }
        if first.month() != last.month() {
            return match self {
                Locale::PtBr => format!(
                    "{} - {} de {}",
                    self.day_month(first),
                    self.day_month(last),
                    last.year()
                ),
                Locale::EnUs => format!(
                    "{} - {}, {}",
                    self.day_month(first),
                    self.day_month(last),
                    last.year()
                ),
                Locale::EnGb => format!(
                    "{} - {} {}",
                    self.day_month(first),
                    self.day_month(last),
                    last.year()
                ),
            };
        }
        match self {
            Locale::PtBr => format!("{} - {}", first.day(), self.full_date(last)),
            Locale::EnUs => format!(
                "{} {} - {}, {}",
                self.month_name(first.month0()),
                first.day(),
                last.day(),
                last.year()
            ),
            Locale::EnGb => format!("{} - {}", first.day(), self.full_date(last)),
        }
    }
}

/// One calendar view: `[start, end)` in whole days on a fixed-offset calendar.
/// Stateless beyond its anchor date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarWindow {
    pub granularity: Granularity,
    pub anchor: NaiveDate,
    pub first_weekday: Weekday,
    pub start: NaiveDate,
    /// Exclusive.
    pub end: NaiveDate,
}

fn out_of_range() -> EngineError {
    EngineError::LimitExceeded("date out of calendar range")
}

/// Midnight of `d` as `Ms`.
pub fn midnight_ms(d: NaiveDate) -> Ms {
    d.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Compute the window containing `anchor`.
pub fn window_for(
    anchor: NaiveDate,
    granularity: Granularity,
    first_weekday: Weekday,
) -> Result<CalendarWindow, EngineError> {
    let (start, end) = match granularity {
        Granularity::Day => {
            let end = anchor.checked_add_days(Days::new(1)).ok_or_else(out_of_range)?;
            (anchor, end)
        }
        Granularity::Week => {
            let back = (7 + anchor.weekday().num_days_from_monday()
                - first_weekday.num_days_from_monday())
                % 7;
            let start = anchor
                .checked_sub_days(Days::new(u64::from(back)))
                .ok_or_else(out_of_range)?;
            let end = start.checked_add_days(Days::new(7)).ok_or_else(out_of_range)?;
            (start, end)
        }
        Granularity::Month => {
            let start = anchor.with_day(1).ok_or_else(out_of_range)?;
            let end = start
                .checked_add_months(Months::new(1))
                .ok_or_else(out_of_range)?;
            (start, end)
        }
    };
    Ok(CalendarWindow {
        granularity,
        anchor,
        first_weekday,
        start,
        end,
    })
}

impl CalendarWindow {
    /// Shift by one unit of the window's granularity. Month steps clamp the
    /// anchor's day to the target month's length, and the clamp carries
    /// forward (Jan 31, Feb 29, Mar 29).
    pub fn navigate(&self, direction: Direction) -> Result<CalendarWindow, EngineError> {
        let anchor = match (self.granularity, direction) {
            (Granularity::Day, Direction::Next) => self.anchor.checked_add_days(Days::new(1)),
            (Granularity::Day, Direction::Prev) => self.anchor.checked_sub_days(Days::new(1)),
            (Granularity::Week, Direction::Next) => self.anchor.checked_add_days(Days::new(7)),
            (Granularity::Week, Direction::Prev) => self.anchor.checked_sub_days(Days::new(7)),
            (Granularity::Month, Direction::Next) => {
                self.anchor.checked_add_months(Months::new(1))
            }
            (Granularity::Month, Direction::Prev) => {
                self.anchor.checked_sub_months(Months::new(1))
            }
        }
        .ok_or_else(out_of_range)?;
        window_for(anchor, self.granularity, self.first_weekday)
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn span(&self) -> Span {
        Span::new(midnight_ms(self.start), midnight_ms(self.end))
    }

    /// Last day covered (inclusive).
    pub fn last_day(&self) -> NaiveDate {
        self.end.pred_opt().unwrap_or(self.start)
    }

    pub fn label(&self, locale: Locale) -> String {
        match self.granularity {
            Granularity::Day => locale.full_date(self.start),
            Granularity::Week => locale.date_range(self.start, self.last_day()),
            Granularity::Month => locale.month_year(self.start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DAY_MS;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn month(y: i32, m: u32, d: u32) -> CalendarWindow {
        window_for(date(y, m, d), Granularity::Month, Weekday::Sun).unwrap()
    }

    #[test]
    fn day_window_is_one_day() {
        let w = window_for(date(2025, 3, 28), Granularity::Day, Weekday::Sun).unwrap();
        assert_eq!(w.start, date(2025, 3, 28));
        assert_eq!(w.end, date(2025, 3, 29));
        assert_eq!(w.span().duration_ms(), DAY_MS);
    }

    #[test]
    fn week_starts_on_sunday_by_default() {
        // 2025-03-28 is a Friday
        let w = window_for(date(2025, 3, 28), Granularity::Week, Weekday::Sun).unwrap();
        assert_eq!(w.start, date(2025, 3, 23));
        assert_eq!(w.end, date(2025, 3, 30));
        assert_eq!(w.days(), 7);
    }

    #[test]
    fn week_anchor_on_first_weekday_starts_there() {
        let w = window_for(date(2025, 3, 30), Granularity::Week, Weekday::Sun).unwrap();
        assert_eq!(w.start, date(2025, 3, 30));
    }

    #[test]
    fn week_monday_start() {
        // Sunday anchor with Monday-first weeks belongs to the week started six days before
        let w = window_for(date(2025, 3, 30), Granularity::Week, Weekday::Mon).unwrap();
        assert_eq!(w.start, date(2025, 3, 24));
        assert_eq!(w.end, date(2025, 3, 31));
    }

    #[test]
    fn month_lengths_follow_calendar() {
        assert_eq!(month(2024, 2, 10).days(), 29); // leap year
        assert_eq!(month(2023, 2, 10).days(), 28);
        assert_eq!(month(2025, 4, 30).days(), 30);
        assert_eq!(month(2025, 1, 1).days(), 31);
        assert_eq!(month(2024, 2, 10).span().duration_ms(), 29 * DAY_MS);
    }

    #[test]
    fn december_rolls_into_next_year() {
        let w = month(2025, 12, 15);
        assert_eq!(w.start, date(2025, 12, 1));
        assert_eq!(w.end, date(2026, 1, 1));
        let next = w.navigate(Direction::Next).unwrap();
        assert_eq!(next.start, date(2026, 1, 1));
        assert_eq!(next.anchor, date(2026, 1, 15));
    }

    #[test]
    fn week_crossing_year_boundary() {
        let w = window_for(date(2025, 12, 31), Granularity::Week, Weekday::Sun).unwrap();
        assert_eq!(w.start, date(2025, 12, 28));
        assert_eq!(w.end, date(2026, 1, 4));
        assert_eq!(
            w.label(Locale::PtBr),
            "28 de dezembro de 2025 - 3 de janeiro de 2026"
        );
    }

    #[test]
    fn navigate_round_trip_day_and_week() {
        for granularity in [Granularity::Day, Granularity::Week] {
            let w = window_for(date(2024, 2, 29), granularity, Weekday::Sun).unwrap();
            let back = w
                .navigate(Direction::Next)
                .unwrap()
                .navigate(Direction::Prev)
                .unwrap();
            assert_eq!(back, w);
        }
    }

    #[test]
    fn navigate_round_trip_month_without_clamping() {
        let w = month(2025, 3, 15);
        let back = w
            .navigate(Direction::Next)
            .unwrap()
            .navigate(Direction::Prev)
            .unwrap();
        assert_eq!(back, w);
    }

    #[test]
    fn month_navigation_clamps_day_of_month() {
        let jan = month(2023, 1, 31);
        let feb = jan.navigate(Direction::Next).unwrap();
        assert_eq!(feb.anchor, date(2023, 2, 28));
        let mar = feb.navigate(Direction::Next).unwrap();
        assert_eq!(mar.anchor, date(2023, 3, 28));

        // Clamping is not undone by going back
        let back = feb.navigate(Direction::Prev).unwrap();
        assert_eq!(back.anchor, date(2023, 1, 28));
        assert_ne!(back, jan);
        assert_eq!(back.start, jan.start);
    }

    #[test]
    fn month_navigation_leap_year_clamp() {
        let feb = month(2024, 1, 31).navigate(Direction::Next).unwrap();
        assert_eq!(feb.anchor, date(2024, 2, 29));
        assert_eq!(feb.days(), 29);
    }

    #[test]
    fn navigate_prev_across_year() {
        let w = window_for(date(2026, 1, 1), Granularity::Day, Weekday::Sun).unwrap();
        let prev = w.navigate(Direction::Prev).unwrap();
        assert_eq!(prev.start, date(2025, 12, 31));
        let jan = month(2026, 1, 20).navigate(Direction::Prev).unwrap();
        assert_eq!(jan.start, date(2025, 12, 1));
    }

    #[test]
    fn week_label_spans_two_months() {
        // Sunday 2025-03-30 to Saturday 2025-04-05
        let w = window_for(date(2025, 4, 2), Granularity::Week, Weekday::Sun).unwrap();
        assert_eq!(w.start.month(), 3);
        assert_eq!(w.last_day().month(), 4);
        assert_eq!(w.label(Locale::PtBr), "30 de março - 5 de abril de 2025");
        assert_eq!(w.label(Locale::EnUs), "March 30 - April 5, 2025");
        assert_eq!(w.label(Locale::EnGb), "30 March - 5 April 2025");
    }

    #[test]
    fn week_label_single_month() {
        let w = window_for(date(2025, 3, 12), Granularity::Week, Weekday::Sun).unwrap();
        assert_eq!(w.label(Locale::PtBr), "9 - 15 de março de 2025");
        assert_eq!(w.label(Locale::EnUs), "March 9 - 15, 2025");
    }

    #[test]
    fn day_and_month_labels() {
        let d = window_for(date(2026, 10, 18), Granularity::Day, Weekday::Sun).unwrap();
        assert_eq!(d.label(Locale::PtBr), "18 de outubro de 2026");
        assert_eq!(d.label(Locale::EnUs), "October 18, 2026");
        assert_eq!(d.label(Locale::EnGb), "18 October 2026");
        assert_eq!(month(2025, 3, 1).label(Locale::PtBr), "março de 2025");
        assert_eq!(month(2025, 3, 1).label(Locale::EnUs), "March 2025");
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(Granularity::parse("Week"), Some(Granularity::Week));
        assert_eq!(Granularity::parse("mês"), Some(Granularity::Month));
        assert_eq!(Granularity::parse("year"), None);
        assert_eq!(Direction::parse("prev"), Some(Direction::Prev));
        assert_eq!(Locale::parse("pt_BR"), Some(Locale::PtBr));
        assert_eq!(Locale::parse("en-GB").map(|l| l.first_weekday()), Some(Weekday::Mon));
        assert_eq!(Locale::parse("fr"), None);
    }

    #[test]
    fn extreme_dates_fail_cleanly() {
        let result = window_for(NaiveDate::MAX, Granularity::Day, Weekday::Sun);
        assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
    }
}
