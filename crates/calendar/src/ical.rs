//! iCalendar import: VEVENT/VALARM components to [`NewEvent`]s.
//!
//! Parsing is a pure function; nothing here touches the stores.

use crate::{Result, types::NewEvent};

/// Extract one [`NewEvent`] per VEVENT with a usable DTSTART.
///
/// Components without DTSTART, or with one that cannot be resolved to an
/// instant, are skipped.
#[cfg(feature = "ics")]
pub fn parse_ics(text: &str) -> Result<Vec<NewEvent>> {
    imp::parse_ics(text)
}

#[cfg(not(feature = "ics"))]
pub fn parse_ics(_text: &str) -> Result<Vec<NewEvent>> {
    Err(crate::Error::CapabilityUnavailable {
        capability: "iCalendar import",
    })
}

#[cfg(feature = "ics")]
mod imp {
    use {
        chrono::{Local, NaiveDate, NaiveDateTime, TimeZone, Utc},
        icalendar::parser::{Component, Property, read_calendar, unfold},
        switchyard_cron::CronPayload,
        tracing::debug,
    };

    use crate::{
        Error, Result,
        types::{EventStatus, NewEvent},
    };

    pub(super) fn parse_ics(text: &str) -> Result<Vec<NewEvent>> {
        let unfolded = unfold(text);
        let calendar = read_calendar(&unfolded).map_err(Error::ics_parse)?;

        let mut events = Vec::new();
        collect_events(&calendar.components, &mut events);
        Ok(events)
    }

    fn collect_events(components: &[Component<'_>], out: &mut Vec<NewEvent>) {
        for component in components {
            if component.name.as_str().eq_ignore_ascii_case("VEVENT") {
                match convert_event(component) {
                    Some(event) => out.push(event),
                    None => debug!("skipping VEVENT without a usable DTSTART"),
                }
            } else {
                collect_events(&component.components, out);
            }
        }
    }

    fn convert_event(vevent: &Component<'_>) -> Option<NewEvent> {
        let start_ms = property(vevent, "DTSTART").and_then(parse_date_time)?;
        let end_ms = property(vevent, "DTEND").and_then(parse_date_time);

        let name = text_value(vevent, "SUMMARY")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "Untitled event".to_string());
        let status = text_value(vevent, "STATUS")
            .map(|s| EventStatus::parse(&s))
            .unwrap_or_default();

        let mut event = NewEvent {
            name,
            start_ms,
            end_ms,
            description: text_value(vevent, "DESCRIPTION").unwrap_or_default(),
            location: text_value(vevent, "LOCATION").filter(|s| !s.is_empty()),
            status,
            payload: None,
            alarm_ms: None,
        };

        if let Some((alarm_ms, text)) = first_alarm(vevent, start_ms, end_ms) {
            let text = text.unwrap_or_else(|| event.name.clone());
            event.payload = Some(CronPayload::agent_turn(format!("Event reminder: {text}")));
            event.alarm_ms = Some(alarm_ms);
        }
        Some(event)
    }

    /// The first VALARM with a resolvable TRIGGER: fire time and description.
    fn first_alarm(
        vevent: &Component<'_>,
        start_ms: u64,
        end_ms: Option<u64>,
    ) -> Option<(u64, Option<String>)> {
        vevent
            .components
            .iter()
            .filter(|c| c.name.as_str().eq_ignore_ascii_case("VALARM"))
            .find_map(|valarm| {
                let trigger = property(valarm, "TRIGGER")?;
                let at_ms = if param(trigger, "VALUE")
                    .is_some_and(|v| v.eq_ignore_ascii_case("DATE-TIME"))
                {
                    parse_date_time(trigger)?
                } else {
                    let offset = parse_duration_ms(trigger.val.as_str())?;
                    let related_end =
                        param(trigger, "RELATED").is_some_and(|v| v.eq_ignore_ascii_case("END"));
                    let base = if related_end {
                        end_ms.unwrap_or(start_ms)
                    } else {
                        start_ms
                    };
                    base.saturating_add_signed(offset)
                };
                let text = text_value(valarm, "DESCRIPTION").filter(|s| !s.trim().is_empty());
                Some((at_ms, text))
            })
    }

    fn property<'c, 'a>(component: &'c Component<'a>, name: &str) -> Option<&'c Property<'a>> {
        component
            .properties
            .iter()
            .find(|p| p.name.as_str().eq_ignore_ascii_case(name))
    }

    fn param<'p>(property: &'p Property<'_>, key: &str) -> Option<&'p str> {
        property
            .params
            .iter()
            .find(|p| p.key.as_str().eq_ignore_ascii_case(key))
            .and_then(|p| p.val.as_ref())
            .map(|v| v.as_str())
    }

    fn text_value(component: &Component<'_>, name: &str) -> Option<String> {
        property(component, name).map(|p| unescape_text(p.val.as_str()))
    }

    /// Resolve DATE / UTC / TZID / floating values to epoch millis.
    fn parse_date_time(property: &Property<'_>) -> Option<u64> {
        let value = property.val.as_str().trim();
        let is_date = param(property, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
            || (value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()));

        let ms = if is_date {
            NaiveDate::parse_from_str(value, "%Y%m%d")
                .ok()?
                .and_hms_opt(0, 0, 0)?
                .and_utc()
                .timestamp_millis()
        } else if let Some(utc) = value.strip_suffix(['Z', 'z']) {
            naive_date_time(utc)?.and_utc().timestamp_millis()
        } else if let Some(tzid) = param(property, "TZID") {
            let tz: chrono_tz::Tz = tzid.trim_matches('"').parse().ok()?;
            tz.from_local_datetime(&naive_date_time(value)?)
                .earliest()?
                .with_timezone(&Utc)
                .timestamp_millis()
        } else {
            Local
                .from_local_datetime(&naive_date_time(value)?)
                .earliest()?
                .timestamp_millis()
        };
        u64::try_from(ms).ok()
    }

    fn naive_date_time(value: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()
    }

    /// Signed RFC 5545 duration (`-PT15M`, `P1D`, `-P1W`) in millis.
    pub(super) fn parse_duration_ms(raw: &str) -> Option<i64> {
        let raw = raw.trim();
        let (sign, rest) = match raw.strip_prefix('-') {
            Some(rest) => (-1, rest),
            None => (1, raw.strip_prefix('+').unwrap_or(raw)),
        };
        let rest = rest.strip_prefix(['P', 'p'])?;

        let mut total: i64 = 0;
        let mut digits = String::new();
        let mut in_time = false;
        let mut saw_unit = false;
        for c in rest.chars() {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            if c == 'T' {
                in_time = true;
                continue;
            }
            let n: i64 = digits.parse().ok()?;
            digits.clear();
            let unit: i64 = match (c, in_time) {
                ('W', false) => 604_800_000,
                ('D', false) => 86_400_000,
                ('H', true) => 3_600_000,
                ('M', true) => 60_000,
                ('S', true) => 1_000,
                _ => return None,
            };
            total = total.checked_add(n.checked_mul(unit)?)?;
            saw_unit = true;
        }
        (saw_unit && digits.is_empty()).then_some(sign * total)
    }

    pub(super) fn unescape_text(value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut chars = value.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n' | 'N') => out.push('\n'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        }
        out
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, feature = "ics"))]
mod tests {
    use {
        super::{
            imp::{parse_duration_ms, unescape_text},
            parse_ics,
        },
        crate::types::EventStatus,
        chrono::DateTime,
        rstest::rstest,
    };

    fn utc(ms: u64) -> String {
        DateTime::from_timestamp_millis(ms as i64)
            .unwrap()
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }

    fn calendar(body: &str) -> String {
        format!("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//switchyard//test//EN\r\n{body}END:VCALENDAR\r\n")
    }

    #[test]
    fn reminder_fifteen_minutes_before() {
        let ics = calendar(
            "BEGIN:VEVENT\r\n\
             UID:1\r\n\
             SUMMARY:Standup\r\n\
             DTSTART:20300105T090000Z\r\n\
             DTEND:20300105T091500Z\r\n\
             BEGIN:VALARM\r\n\
             ACTION:DISPLAY\r\n\
             TRIGGER:-PT15M\r\n\
             END:VALARM\r\n\
             END:VEVENT\r\n",
        );
        let events = parse_ics(&ics).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.name, "Standup");
        assert_eq!(utc(event.start_ms), "2030-01-05 09:00");
        assert_eq!(utc(event.end_ms.unwrap()), "2030-01-05 09:15");
        assert_eq!(utc(event.alarm_ms.unwrap()), "2030-01-05 08:45");
        let payload = event.payload.as_ref().unwrap();
        assert_eq!(payload.message, "Event reminder: Standup");
        assert!(!payload.deliver);
    }

    #[test]
    fn alarm_related_to_end_and_description() {
        let ics = calendar(
            "BEGIN:VEVENT\r\n\
             SUMMARY:Workshop\r\n\
             DTSTART:20300105T090000Z\r\n\
             DTEND:20300105T120000Z\r\n\
             BEGIN:VALARM\r\n\
             TRIGGER;RELATED=END:-PT10M\r\n\
             DESCRIPTION:Wrap up\r\n\
             END:VALARM\r\n\
             END:VEVENT\r\n",
        );
        let event = &parse_ics(&ics).unwrap()[0];
        assert_eq!(utc(event.alarm_ms.unwrap()), "2030-01-05 11:50");
        assert_eq!(
            event.payload.as_ref().unwrap().message,
            "Event reminder: Wrap up"
        );
    }

    #[test]
    fn absolute_trigger_and_first_alarm_wins() {
        let ics = calendar(
            "BEGIN:VEVENT\r\n\
             SUMMARY:Flight\r\n\
             DTSTART:20300105T090000Z\r\n\
             BEGIN:VALARM\r\n\
             TRIGGER;VALUE=DATE-TIME:20300104T180000Z\r\n\
             END:VALARM\r\n\
             BEGIN:VALARM\r\n\
             TRIGGER:-PT1H\r\n\
             END:VALARM\r\n\
             END:VEVENT\r\n",
        );
        let event = &parse_ics(&ics).unwrap()[0];
        assert_eq!(utc(event.alarm_ms.unwrap()), "2030-01-04 18:00");
    }

    #[test]
    fn date_tzid_and_defaults() {
        let ics = calendar(
            "BEGIN:VEVENT\r\n\
             DTSTART;VALUE=DATE:20300301\r\n\
             STATUS:CANCELLED\r\n\
             END:VEVENT\r\n\
             BEGIN:VEVENT\r\n\
             SUMMARY:Paris call\r\n\
             DTSTART;TZID=Europe/Paris:20300115T100000\r\n\
             STATUS:TENTATIVE\r\n\
             LOCATION:Room 2\\, floor 3\r\n\
             DESCRIPTION:Agenda:\\nbudget\r\n\
             END:VEVENT\r\n",
        );
        let events = parse_ics(&ics).unwrap();
        assert_eq!(events.len(), 2);

        assert_eq!(events[0].name, "Untitled event");
        assert_eq!(utc(events[0].start_ms), "2030-03-01 00:00");
        assert_eq!(events[0].status, EventStatus::Cancelled);
        assert!(events[0].payload.is_none());

        assert_eq!(utc(events[1].start_ms), "2030-01-15 09:00");
        assert_eq!(events[1].status, EventStatus::Tentative);
        assert_eq!(events[1].location.as_deref(), Some("Room 2, floor 3"));
        assert_eq!(events[1].description, "Agenda:\nbudget");
    }

    #[test]
    fn event_without_start_is_skipped() {
        let ics = calendar(
            "BEGIN:VEVENT\r\n\
             SUMMARY:No start\r\n\
             END:VEVENT\r\n\
             BEGIN:VEVENT\r\n\
             SUMMARY:Bad zone\r\n\
             DTSTART;TZID=Mars/Olympus:20300115T100000\r\n\
             END:VEVENT\r\n\
             BEGIN:VEVENT\r\n\
             SUMMARY:Kept\r\n\
             DTSTART:20300115T100000Z\r\n\
             END:VEVENT\r\n",
        );
        let events = parse_ics(&ics).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Kept");
    }

    #[rstest]
    #[case("-PT15M", Some(-900_000))]
    #[case("PT1H30M", Some(5_400_000))]
    #[case("+P1D", Some(86_400_000))]
    #[case("-P1W", Some(-604_800_000))]
    #[case("P1DT2H", Some(93_600_000))]
    #[case("PT", None)]
    #[case("15M", None)]
    #[case("PT15", None)]
    fn duration_parsing(#[case] raw: &str, #[case] expected: Option<i64>) {
        assert_eq!(parse_duration_ms(raw), expected);
    }

    #[test]
    fn unescape_handles_backslashes() {
        assert_eq!(unescape_text(r"a\;b\,c\\d\Ne"), "a;b,c\\d\ne");
    }
}
