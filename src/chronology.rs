use crate::capture::Capture;
use crate::event::Attrs;
use crate::processor::Processor;
use crate::template::parse_date;
use anyhow::Result;
use chrono::{Datelike, Days, NaiveDate, Weekday};
use indexmap::IndexMap;
use std::collections::BTreeMap;

/// A dated happening: required date, normalized tag list, free-form
/// attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct ChronoEvent {
    pub date: NaiveDate,
    pub tags: Vec<String>,
    pub attrs: Attrs,
}

impl ChronoEvent {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    fn selected(&self, tag: Option<&str>, match_attrs: Option<&Attrs>) -> bool {
        if let Some(tag) = tag {
            if !self.has_tag(tag) {
                return false;
            }
        }
        if let Some(match_attrs) = match_attrs {
            return match_attrs
                .iter()
                .all(|(key, value)| self.attrs.get(key) == Some(value));
        }
        true
    }
}

/// Free-form item grouped by its required `class`, ordered within the
/// class by its `index` field after sealing.
#[derive(Clone, Debug, PartialEq)]
pub struct InventoryItem {
    pub class: String,
    pub attrs: Attrs,
}

/// One calendar date with the events falling on it. Materialized on
/// demand by `days`, never stored.
#[derive(Clone, Debug, PartialEq)]
pub struct Day {
    pub date: NaiveDate,
    pub events: Vec<ChronoEvent>,
}

impl Day {
    pub fn get_event(&self, tag: Option<&str>, match_attrs: Option<&Attrs>) -> Option<&ChronoEvent> {
        self.get_events(tag, match_attrs).into_iter().next()
    }

    pub fn get_events(&self, tag: Option<&str>, match_attrs: Option<&Attrs>) -> Vec<&ChronoEvent> {
        self.events
            .iter()
            .filter(|event| event.selected(tag, match_attrs))
            .collect()
    }
}

/// The chronology-building processor: interprets `chrono:` commands into
/// a date-indexed event log and a per-class inventory.
pub struct Chronology {
    inventory: IndexMap<String, Vec<InventoryItem>>,
    events: Vec<ChronoEvent>,
    by_date: BTreeMap<NaiveDate, Vec<usize>>,
    sealed: bool,
    today: NaiveDate,
    warn_unhandled: bool,
}

impl Default for Chronology {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Chronology {
    fn family_prefix(&self) -> &'static str {
        "chrono:"
    }

    fn warn_unhandled(&self) -> bool {
        self.warn_unhandled
    }

    fn handle(&mut self, tag: &str, attrs: &Attrs, capture: &mut Capture<'_>) -> Result<bool> {
        match tag {
            "inventory" => self.command_inventory(attrs, capture)?,
            "event" => self.command_event(attrs, capture)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

impl Chronology {
    pub fn new() -> Chronology {
        Self::with_today(chrono::Local::now().date_naive())
    }

    pub fn with_today(today: NaiveDate) -> Chronology {
        Chronology {
            inventory: IndexMap::new(),
            events: Vec::new(),
            by_date: BTreeMap::new(),
            sealed: false,
            today,
            warn_unhandled: true,
        }
    }

    pub fn set_warn_unhandled(&mut self, warn: bool) {
        self.warn_unhandled = warn;
    }

    ////////////////////////////////////////////////////////////////////
    // Commands

    fn command_inventory(&mut self, attrs: &Attrs, capture: &mut Capture<'_>) -> Result<()> {
        capture.discard_level()?;

        let mut attrs = attrs.clone();
        let Some(class) = attrs.shift_remove("class") else {
            capture.warn("missing attribute 'class' for chrono:inventory")?;
            return Ok(());
        };
        self.inventory
            .entry(class.clone())
            .or_default()
            .push(InventoryItem { class, attrs });
        Ok(())
    }

    fn command_event(&mut self, attrs: &Attrs, capture: &mut Capture<'_>) -> Result<()> {
        capture.discard_level()?;

        let mut attrs = attrs.clone();
        let Some(date) = attrs.shift_remove("date").as_deref().and_then(parse_date) else {
            capture.warn("missing or invalid attribute 'date' for chrono:event")?;
            return Ok(());
        };
        if date > self.today {
            capture.warn(format!("chronology: future-dated event ({}) discarded", date))?;
            return Ok(());
        }
        let tags = match attrs.shift_remove("tags") {
            Some(tags) => tags
                .split(',')
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect(),
            None => Vec::new(),
        };
        self.events.push(ChronoEvent { date, tags, attrs });
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////
    // Sealing and queries

    /// Sort events by date, bucket them by calendar day, order inventory
    /// classes by their `index` field. Idempotent.
    pub fn seal_events(&mut self) {
        if self.sealed {
            return;
        }
        self.sealed = true;
        tracing::debug!(events = self.events.len(), "sealing chronology");

        self.events.sort_by(|a, b| a.date.cmp(&b.date));
        self.by_date.clear();
        for (idx, event) in self.events.iter().enumerate() {
            self.by_date.entry(event.date).or_default().push(idx);
        }

        for items in self.inventory.values_mut() {
            items.sort_by(|a, b| {
                let left = a.attrs.get("index").map(|s| s.as_str()).unwrap_or("");
                let right = b.attrs.get("index").map(|s| s.as_str()).unwrap_or("");
                left.cmp(right)
            });
        }
    }

    /// One `Day` per calendar date in the inclusive range, zero-event
    /// days included. Bounds default to the first/last event's date.
    pub fn days(&mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Vec<Day> {
        self.seal_events();

        let Some(start) = start.or_else(|| self.events.first().map(|e| e.date)) else {
            return Vec::new();
        };
        let Some(end) = end.or_else(|| self.events.last().map(|e| e.date)) else {
            return Vec::new();
        };

        let mut days = Vec::new();
        let mut date = start;
        while date <= end {
            let events = self
                .by_date
                .get(&date)
                .map(|idxs| idxs.iter().map(|&i| self.events[i].clone()).collect())
                .unwrap_or_default();
            days.push(Day { date, events });
            match date.checked_add_days(Days::new(1)) {
                Some(next) => date = next,
                None => break,
            }
        }
        days
    }

    pub fn get_events(&mut self, tag: Option<&str>, match_attrs: Option<&Attrs>) -> Vec<&ChronoEvent> {
        self.seal_events();
        self.events
            .iter()
            .filter(|event| event.selected(tag, match_attrs))
            .collect()
    }

    pub fn get_event(&mut self, tag: Option<&str>, match_attrs: Option<&Attrs>) -> Option<&ChronoEvent> {
        self.get_events(tag, match_attrs).into_iter().next()
    }

    /// Index-sorted items of one inventory class.
    pub fn inventory(&mut self, class: &str) -> &[InventoryItem] {
        self.seal_events();
        self.inventory
            .get(class)
            .map(|items| items.as_slice())
            .unwrap_or(&[])
    }
}

////////////////////////////////////////////////////////////////////////
// Calendar helpers

pub fn number_of_days(a: NaiveDate, b: NaiveDate) -> i64 {
    (b - a).num_days().abs()
}

pub fn days_after(date: NaiveDate, days: u64) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(days))
}

pub fn is_week_end(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

#[cfg(test)]
mod tests {
    use crate::capture::{ArraySource, VecSink};
    use crate::chronology::{days_after, is_week_end, number_of_days, Chronology};
    use crate::event::{Attrs, Event, Level};
    use crate::processor::process;
    use anyhow::Result;
    use chrono::NaiveDate;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 6, 15).unwrap()
    }

    fn el(name: &str, attrs: &[(&str, &str)]) -> Vec<Event> {
        vec![Event::start_with(name, attrs), Event::End]
    }

    fn run(groups: Vec<Vec<Event>>) -> Result<(Chronology, Vec<Event>)> {
        let mut source = ArraySource::new(groups.into_iter().flatten().collect());
        let mut sink = VecSink::new();
        let mut chronology = Chronology::with_today(today());
        process(&mut chronology, &mut source, &mut sink)?;
        Ok((chronology, sink.into_events()))
    }

    #[test]
    fn test_day_range_is_complete() -> Result<()> {
        let groups = vec![
            el(
                "chrono:event",
                &[("date", "2021-03-05"), ("tags", "trip"), ("place", "lyon")],
            ),
            el("chrono:event", &[("date", "2021-03-01")]),
        ];
        let (mut chronology, _) = run(groups)?;

        let start = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2021, 3, 5).unwrap();
        let days = chronology.days(None, None);
        assert_eq!(days.len() as i64, number_of_days(start, end) + 1);
        assert_eq!(days[0].date, start);
        assert_eq!(days[4].date, end);

        // in-between days exist with no events
        assert!(days[1].events.is_empty());
        assert_eq!(days[4].events.len(), 1);
        Ok(())
    }

    #[test]
    fn test_events_are_sorted_and_tag_filtered() -> Result<()> {
        let groups = vec![
            el("chrono:event", &[("date", "2021-03-05"), ("tags", "trip,work")]),
            el("chrono:event", &[("date", "2021-03-01"), ("tags", "home")]),
        ];
        let (mut chronology, _) = run(groups)?;

        let all = chronology.get_events(None, None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].date, NaiveDate::from_ymd_opt(2021, 3, 1).unwrap());

        let trips = chronology.get_events(Some("trip"), None);
        assert_eq!(trips.len(), 1);
        assert!(trips[0].has_tag("work"));
        Ok(())
    }

    #[test]
    fn test_events_match_attributes() -> Result<()> {
        let groups = vec![
            el("chrono:event", &[("date", "2021-03-05"), ("place", "lyon")]),
            el("chrono:event", &[("date", "2021-03-06"), ("place", "paris")]),
        ];
        let (mut chronology, _) = run(groups)?;

        let mut match_attrs = Attrs::new();
        match_attrs.insert("place".to_string(), "paris".to_string());
        let found = chronology.get_event(None, Some(&match_attrs));
        assert_eq!(
            found.map(|e| e.date),
            NaiveDate::from_ymd_opt(2021, 3, 6)
        );
        Ok(())
    }

    #[test]
    fn test_missing_date_or_class_warns() -> Result<()> {
        let groups = vec![
            el("chrono:event", &[("tags", "oops")]),
            el("chrono:inventory", &[("index", "1")]),
        ];
        let (mut chronology, output) = run(groups)?;

        assert!(chronology.get_events(None, None).is_empty());
        let warned: Vec<&str> = output
            .iter()
            .filter_map(|event| match event {
                Event::Message {
                    level: Level::Warn,
                    text,
                } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(warned.len(), 2);
        assert!(warned[0].contains("'date'"));
        assert!(warned[1].contains("'class'"));
        Ok(())
    }

    #[test]
    fn test_future_event_is_discarded_with_warning() -> Result<()> {
        let groups = vec![el("chrono:event", &[("date", "2021-07-01")])];
        let (mut chronology, output) = run(groups)?;

        assert!(chronology.get_events(None, None).is_empty());
        assert!(output.iter().any(|event| matches!(
            event,
            Event::Message { level: Level::Warn, text } if text.contains("future-dated event")
        )));
        Ok(())
    }

    #[test]
    fn test_inventory_sorted_by_index() -> Result<()> {
        let groups = vec![
            el(
                "chrono:inventory",
                &[("class", "gear"), ("index", "2"), ("name", "tent")],
            ),
            el(
                "chrono:inventory",
                &[("class", "gear"), ("index", "1"), ("name", "bag")],
            ),
        ];
        let (mut chronology, _) = run(groups)?;

        let names: Vec<&str> = chronology
            .inventory("gear")
            .iter()
            .filter_map(|item| item.attrs.get("name").map(|s| s.as_str()))
            .collect();
        assert_eq!(names, vec!["bag", "tent"]);
        assert!(chronology.inventory("nothing").is_empty());
        Ok(())
    }

    #[test]
    fn test_calendar_helpers() {
        let monday = NaiveDate::from_ymd_opt(2021, 6, 14).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2021, 6, 19).unwrap();
        assert_eq!(number_of_days(monday, saturday), 5);
        assert_eq!(number_of_days(saturday, monday), 5);
        assert_eq!(days_after(monday, 5), Some(saturday));
        assert!(is_week_end(saturday));
        assert!(!is_week_end(monday));
    }
}
