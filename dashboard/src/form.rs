use chrono::{DateTime, NaiveDate, Utc};
use minewatchcore::filter::{ConfidenceRange, DateRange};
use minewatchcore::FilterEngine;

/// Raw text of the filter bar inputs. Each edit pushes whatever parses into
/// the session's filter engine; anything unparseable keeps the previous bound.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterForm {
    pub search: String,
    pub confidence_min: String,
    pub confidence_max: String,
    pub date_from: String,
    pub date_to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Search,
    ConfidenceMin,
    ConfidenceMax,
    DateFrom,
    DateTo,
}

impl Default for FilterForm {
    fn default() -> Self {
        let range = ConfidenceRange::default();
        Self {
            search: String::new(),
            confidence_min: format!("{}", range.min),
            confidence_max: format!("{}", range.max),
            date_from: String::new(),
            date_to: String::new(),
        }
    }
}

impl FilterForm {
    pub fn update_field(&mut self, field: FilterField, value: String, filters: &mut FilterEngine) {
        match field {
            FilterField::Search => {
                filters.set_search(value.clone());
                self.search = value;
            }
            FilterField::ConfidenceMin => {
                if let Some(min) = parse_percent(&value) {
                    let range = filters.spec().confidence_range;
                    filters.set_confidence_range(ConfidenceRange { min, ..range });
                }
                self.confidence_min = value;
            }
            FilterField::ConfidenceMax => {
                if let Some(max) = parse_percent(&value) {
                    let range = filters.spec().confidence_range;
                    filters.set_confidence_range(ConfidenceRange { max, ..range });
                }
                self.confidence_max = value;
            }
            FilterField::DateFrom => {
                if let Some(from) = parse_day(&value, DayBound::Start) {
                    let range = filters.spec().date_range;
                    filters.set_date_range(DateRange { from, ..range });
                }
                self.date_from = value;
            }
            FilterField::DateTo => {
                if let Some(to) = parse_day(&value, DayBound::End) {
                    let range = filters.spec().date_range;
                    filters.set_date_range(DateRange { to, ..range });
                }
                self.date_to = value;
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Copy)]
enum DayBound {
    Start,
    End,
}

fn parse_percent(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// `YYYY-MM-DD` to the first or last instant of that UTC day. Blank input
/// clears the bound; `None` means the text did not parse.
fn parse_day(value: &str, bound: DayBound) -> Option<Option<DateTime<Utc>>> {
    let value = value.trim();
    if value.is_empty() {
        return Some(None);
    }
    let day = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let instant = match bound {
        DayBound::Start => day.and_hms_opt(0, 0, 0)?,
        DayBound::End => day.and_hms_milli_opt(23, 59, 59, 999)?,
    };
    Some(Some(instant.and_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn confidence_edits_update_only_their_bound() {
        let mut form = FilterForm::default();
        let mut filters = FilterEngine::new();
        form.update_field(FilterField::ConfidenceMin, "80".into(), &mut filters);
        form.update_field(FilterField::ConfidenceMax, "20".into(), &mut filters);
        let range = filters.spec().confidence_range;
        assert_eq!(range.min, 80.0);
        assert_eq!(range.max, 20.0);
    }

    #[test]
    fn unparseable_input_keeps_previous_bound() {
        let mut form = FilterForm::default();
        let mut filters = FilterEngine::new();
        form.update_field(FilterField::ConfidenceMin, "55".into(), &mut filters);
        form.update_field(FilterField::ConfidenceMin, "55x".into(), &mut filters);
        form.update_field(FilterField::DateFrom, "2024-13-40".into(), &mut filters);
        assert_eq!(form.confidence_min, "55x");
        assert_eq!(filters.spec().confidence_range.min, 55.0);
        assert!(filters.spec().date_range.from.is_none());
    }

    #[test]
    fn dates_cover_whole_days_and_blank_clears() {
        let mut form = FilterForm::default();
        let mut filters = FilterEngine::new();
        form.update_field(FilterField::DateFrom, "2024-03-01".into(), &mut filters);
        form.update_field(FilterField::DateTo, " 2024-03-02 ".into(), &mut filters);
        let range = filters.spec().date_range;
        assert_eq!(range.from, Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 3, 2, 23, 59, 59).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2024, 3, 3, 0, 0, 0).unwrap()));

        form.update_field(FilterField::DateTo, String::new(), &mut filters);
        assert!(filters.spec().date_range.to.is_none());
        assert!(filters.spec().date_range.from.is_some());
    }

    #[test]
    fn reset_restores_defaults() {
        let mut form = FilterForm::default();
        let mut filters = FilterEngine::new();
        form.update_field(FilterField::Search, "tabriz".into(), &mut filters);
        assert_eq!(filters.spec().search, "tabriz");
        form.reset();
        assert_eq!(form, FilterForm::default());
        assert_eq!(form.confidence_max, "100");
    }
}
