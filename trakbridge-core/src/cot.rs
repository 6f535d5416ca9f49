//! Cursor-on-Target XML event construction.
//!
//! The wire format is fixed: a single-line UTF-8 XML fragment with no XML declaration. We build
//! it with plain `format!` rather than an XML library because the byte-level layout (attribute
//! order, numeric precision, timestamp format) is part of the contract TAK servers are tested
//! against, and a generic serializer would not reproduce it faithfully.

use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};

use crate::error::CotBuildError;
use crate::position::Position;

/// Team-member metadata attached by an active callsign mapping.
#[derive(Clone, Debug, PartialEq)]
pub struct TeamMember {
    pub color: String,
    pub role: String,
}

/// Inputs to CoT construction that come from the stream/mapping configuration rather than the
/// provider, i.e. everything [`crate::position::Position`] itself doesn't carry.
#[derive(Clone, Debug, PartialEq)]
pub struct CotBuildOptions {
    pub cot_type: String,
    pub stale_seconds: i64,
    pub team: Option<TeamMember>,
}

/// An immutable, already-rendered CoT event plus the fields extracted at creation time and
/// cached alongside it: `uid` and `event_time`, plus `lat`/`lon` so the Queue Manager
/// can feed the Device-State Tracker without re-parsing the rendered XML.
#[derive(Clone, Debug, PartialEq)]
pub struct CotEvent {
    uid: String,
    event_time: DateTime<Utc>,
    lat: f64,
    lon: f64,
    xml: Bytes,
}

impl CotEvent {
    /// Builds one CoT event from a [`Position`] and the stream-level options that decide its
    /// type, staleness window, and (optionally) team-member group.
    pub fn build(position: &Position, opts: &CotBuildOptions) -> Result<Self, CotBuildError> {
        position.validate()?;
        if opts.stale_seconds <= 0 {
            return Err(CotBuildError::NonPositiveStale);
        }

        let time_iso = format_timestamp(position.timestamp);
        let stale_time = position.timestamp + ChronoDuration::seconds(opts.stale_seconds);
        let stale_iso = format_timestamp(stale_time);

        let hae = position
            .altitude
            .map(|a| format!("{a:.2}"))
            .unwrap_or_else(|| "0.00".to_string());

        let mut detail = String::new();
        detail.push_str(&format!(
            r#"<contact callsign="{}"/>"#,
            xml_escape(&position.name)
        ));
        if position.speed_mps.is_some() || position.course_deg.is_some() {
            let speed = position.speed_mps.unwrap_or(0.0);
            let course = position.course_deg.unwrap_or(0.0);
            detail.push_str(&format!(
                r#"<track speed="{speed:.2}" course="{course:.2}"/>"#
            ));
        }
        if let Some(team) = &opts.team {
            detail.push_str(&format!(
                r#"<__group name="{}" role="{}"/>"#,
                xml_escape(&team.color),
                xml_escape(&team.role)
            ));
        }
        if let Some(desc) = &position.description {
            detail.push_str(&format!("<remarks>{}</remarks>", xml_escape(desc)));
        }

        let xml = format!(
            r#"<event version="2.0" uid="{uid}" type="{cot_type}" how="m-g" time="{time}" start="{time}" stale="{stale}"><point lat="{lat:.8}" lon="{lon:.8}" hae="{hae}" ce="9999999.0" le="9999999.0"/><detail>{detail}</detail></event>"#,
            uid = xml_escape(&position.uid),
            cot_type = xml_escape(&opts.cot_type),
            time = time_iso,
            stale = stale_iso,
            lat = position.lat,
            lon = position.lon,
            hae = hae,
            detail = detail,
        );

        Ok(CotEvent {
            uid: position.uid.clone(),
            event_time: position.timestamp,
            lat: position.lat,
            lon: position.lon,
            xml: Bytes::from(xml),
        })
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    pub fn xml_bytes(&self) -> &Bytes {
        &self.xml
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    // Truncate to whole seconds (spec: "seconds precision, trailing Z") before formatting.
    let truncated = DateTime::<Utc>::from_timestamp(ts.timestamp(), 0).unwrap_or(ts);
    truncated.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> CotBuildOptions {
        CotBuildOptions {
            cot_type: "a-f-G-U-C".to_string(),
            stale_seconds: 300,
            team: None,
        }
    }

    fn position() -> Position {
        let ts = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        Position::new("alpha-1", "Alpha One", 40.12345678, -74.87654321, ts)
    }

    #[test]
    fn wire_format_is_a_single_line_with_no_declaration() {
        let event = CotEvent::build(&position(), &opts()).unwrap();
        let xml = std::str::from_utf8(event.xml_bytes()).unwrap();
        assert!(!xml.contains('\n'));
        assert!(!xml.starts_with("<?xml"));
        assert!(xml.starts_with(r#"<event version="2.0" uid="alpha-1" type="a-f-G-U-C" how="m-g""#));
    }

    #[test]
    fn lat_lon_use_eight_fractional_digits() {
        let event = CotEvent::build(&position(), &opts()).unwrap();
        let xml = std::str::from_utf8(event.xml_bytes()).unwrap();
        assert!(xml.contains(r#"lat="40.12345678""#));
        assert!(xml.contains(r#"lon="-74.87654321""#));
    }

    #[test]
    fn missing_altitude_defaults_to_zero() {
        let event = CotEvent::build(&position(), &opts()).unwrap();
        let xml = std::str::from_utf8(event.xml_bytes()).unwrap();
        assert!(xml.contains(r#"hae="0.00""#));
        assert!(xml.contains(r#"ce="9999999.0""#));
    }

    #[test]
    fn stale_is_timestamp_plus_configured_seconds() {
        let event = CotEvent::build(&position(), &opts()).unwrap();
        let xml = std::str::from_utf8(event.xml_bytes()).unwrap();
        assert!(xml.contains(r#"time="2023-11-14T22:13:20Z""#));
        assert!(xml.contains(r#"stale="2023-11-14T22:18:20Z""#));
    }

    #[test]
    fn track_omitted_without_speed_or_course() {
        let event = CotEvent::build(&position(), &opts()).unwrap();
        let xml = std::str::from_utf8(event.xml_bytes()).unwrap();
        assert!(!xml.contains("<track"));
    }

    #[test]
    fn track_present_when_speed_given() {
        let mut p = position();
        p.speed_mps = Some(3.5);
        let event = CotEvent::build(&p, &opts()).unwrap();
        let xml = std::str::from_utf8(event.xml_bytes()).unwrap();
        assert!(xml.contains(r#"<track speed="3.50" course="0.00"/>"#));
    }

    #[test]
    fn group_present_only_for_team_members() {
        let mut o = opts();
        o.team = Some(TeamMember { color: "Green".into(), role: "Sniper".into() });
        let event = CotEvent::build(&position(), &o).unwrap();
        let xml = std::str::from_utf8(event.xml_bytes()).unwrap();
        assert!(xml.contains(r#"<__group name="Green" role="Sniper"/>"#));
    }

    #[test]
    fn nonpositive_stale_is_rejected() {
        let mut o = opts();
        o.stale_seconds = 0;
        assert_matches::assert_matches!(
            CotEvent::build(&position(), &o),
            Err(CotBuildError::NonPositiveStale)
        );
    }

    #[test]
    fn invalid_position_is_rejected() {
        let mut p = position();
        p.lat = 9000.0;
        assert_matches::assert_matches!(
            CotEvent::build(&p, &opts()),
            Err(CotBuildError::InvalidPosition(_))
        );
    }

    #[test]
    fn round_trip_extracts_uid_and_time() {
        let p = position();
        let event = CotEvent::build(&p, &opts()).unwrap();
        assert_eq!(event.uid(), p.uid);
        assert_eq!(event.event_time().timestamp(), p.timestamp.timestamp());
    }
}
