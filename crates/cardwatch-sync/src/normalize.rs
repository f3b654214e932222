//! Raw record -> canonical entity. Every function here is total: malformed
//! optional input degrades to `None` or a documented fallback.

use cardwatch_core::{
    Bout, BoutDetailRecord, BoutRecord, BoutResult, BoutStatus, CardSection, Corner, CornerSide,
    Event, EventCategory, EventRecord, EventStatus, FightRecord, FighterDetailsRecord,
    FinishMethod, FormMark, Gender, Location, Ranking, RawFighter, RawMeasure, RawResult,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::config::IngestRules;

pub const DEFAULT_ROUNDS: u32 = 3;

/// Divisions that only exist for women. A weight class naming one of these
/// without the word "women" still infers female.
pub const FEMALE_ONLY_DIVISIONS: &[&str] = &["strawweight"];

fn clean_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// ISO calendar date (`YYYY-MM-DD`); anything else is `None`.
pub fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw?.trim(), "%Y-%m-%d").ok()
}

/// Civil clock time: `HH:MM`, `HH:MM:SS` or `h:MM AM/PM`.
pub fn parse_start_time(raw: Option<&str>) -> Option<NaiveTime> {
    let raw = raw?.trim();
    ["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
}

/// Splits `"city, country"` on the last comma. Without a comma the whole
/// string is the city.
pub fn parse_location(raw: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(raw) = clean_text(raw) else {
        return (None, None);
    };
    match raw.rsplit_once(',') {
        Some((city, country)) => (clean_text(Some(city)), clean_text(Some(country))),
        None => (Some(raw), None),
    }
}

fn build_location(venue: Option<&str>, combined: Option<&str>) -> Option<Location> {
    let (city, country) = parse_location(combined);
    let location = Location {
        venue: clean_text(venue),
        city,
        country,
    };
    (location != Location::default()).then_some(location)
}

/// Trailing path segment after `/events/<digits>-` or `/bouts/<digits>-`;
/// empty when the URL has neither shape.
pub fn extract_slug(url: Option<&str>) -> String {
    let Some(url) = url else {
        return String::new();
    };
    let path = url.split(['?', '#']).next().unwrap_or_default();
    for marker in ["/events/", "/bouts/"] {
        let Some(pos) = path.rfind(marker) else {
            continue;
        };
        let tail = path[pos + marker.len()..].trim_end_matches('/');
        let digits = tail.chars().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            continue;
        }
        if let Some(slug) = tail[digits..].strip_prefix('-') {
            if !slug.is_empty() {
                return slug.to_string();
            }
        }
    }
    String::new()
}

/// "early" + "prelim" -> early prelims, "prelim" -> prelims, anything else
/// (including a missing label) -> main card.
pub fn normalize_card_section(label: Option<&str>) -> CardSection {
    let label = label.unwrap_or_default().to_lowercase();
    if label.contains("early") && label.contains("prelim") {
        CardSection::EarlyPrelim
    } else if label.contains("prelim") {
        CardSection::Prelim
    } else {
        CardSection::Main
    }
}

/// `<promotion> <1-4 digits>` followed by whitespace, a colon or the end of
/// the name is a numbered event; everything else is a fight night.
pub fn detect_event_category(name: &str, promotion: &str) -> EventCategory {
    let name = name.to_lowercase();
    let promotion = promotion.trim().to_lowercase();
    if promotion.is_empty() {
        return EventCategory::FightNight;
    }

    for (start, _) in name.match_indices(&promotion) {
        let rest = &name[start + promotion.len()..];
        let after_space = rest.trim_start();
        if after_space.len() == rest.len() {
            continue;
        }
        let digits = after_space.chars().take_while(char::is_ascii_digit).count();
        if !(1..=4).contains(&digits) {
            continue;
        }
        match after_space[digits..].chars().next() {
            None | Some(':') => return EventCategory::Numbered,
            Some(c) if c.is_whitespace() => return EventCategory::Numbered,
            _ => {}
        }
    }
    EventCategory::FightNight
}

/// Heuristic: "women" anywhere in the weight class, or a division listed in
/// [`FEMALE_ONLY_DIVISIONS`], is female; everything else, including a missing
/// label, is male. Wrong for any source that labels women's bouts without
/// either signal.
pub fn infer_gender(weight_class: Option<&str>) -> Gender {
    let label = weight_class.unwrap_or_default().to_lowercase();
    if label.contains("women") || FEMALE_ONLY_DIVISIONS.iter().any(|d| label.contains(d)) {
        Gender::Female
    } else {
        Gender::Male
    }
}

/// The record's timezone when it is an IANA name, otherwise the source default.
pub fn resolve_timezone(raw: Option<&str>, fallback: Tz) -> Tz {
    raw.and_then(|name| name.trim().parse::<Tz>().ok())
        .unwrap_or(fallback)
}

fn measure_cm(measure: Option<RawMeasure>) -> Option<u32> {
    let cm = measure?.cm?;
    (cm.is_finite() && cm > 0.0 && cm < 400.0).then(|| cm.round() as u32)
}

/// Full corner snapshot. An absent or empty payload becomes the placeholder.
pub fn corner_snapshot(raw: Option<RawFighter>) -> Corner {
    let Some(raw) = raw.filter(|f| !f.is_empty()) else {
        return Corner::placeholder();
    };
    let record = raw
        .record_at_fight
        .map(|r| FightRecord {
            wins: r.wins,
            losses: r.losses,
            draws: r.draws,
        })
        .unwrap_or_default();

    Corner {
        name: clean_text(raw.name.as_deref())
            .unwrap_or_else(|| Corner::PLACEHOLDER_NAME.to_string()),
        nickname: clean_text(raw.nickname.as_deref()),
        nationality: clean_text(raw.nationality.as_deref()),
        fighting_out_of: clean_text(raw.fighting_out_of.as_deref()),
        age_at_fight_years: raw.age_at_fight.and_then(|a| a.years),
        height_cm: measure_cm(raw.height),
        reach_cm: measure_cm(raw.reach),
        record,
        recent_form: raw
            .recent_form
            .unwrap_or_default()
            .iter()
            .filter_map(|label| FormMark::from_label(label))
            .collect(),
        ranking: raw.ranking.map(|r| Ranking {
            position: r.position,
            division: r.division.trim().to_string(),
        }),
        external_id: clean_text(raw.external_id.as_deref()),
        external_url: clean_text(raw.url.as_deref()),
        image_key: None,
    }
}

/// Overlay profile data onto a corner. The source's filler values (an
/// "Unknown" nationality, an age of zero) never replace anything. Returns
/// whether the corner changed.
pub fn apply_fighter_details(corner: &mut Corner, details: &FighterDetailsRecord) -> bool {
    let before = corner.clone();

    if let Some(nationality) = clean_text(details.nationality.as_deref())
        .filter(|n| !n.eq_ignore_ascii_case("unknown"))
    {
        corner.nationality = Some(nationality);
    }
    if let Some(home) = clean_text(details.fighting_out_of.as_deref()) {
        corner.fighting_out_of = Some(home);
    }
    if let Some(age) = details.age_years.filter(|age| *age > 0) {
        corner.age_at_fight_years = Some(age);
    }
    if let Some(cm) = measure_cm(details.height_cm.map(|cm| RawMeasure { cm: Some(cm) })) {
        corner.height_cm = Some(cm);
    }
    if let Some(cm) = measure_cm(details.reach_cm.map(|cm| RawMeasure { cm: Some(cm) })) {
        corner.reach_cm = Some(cm);
    }
    if let Some(record) = details.record {
        corner.record = FightRecord {
            wins: record.wins,
            losses: record.losses,
            draws: record.draws,
        };
    }
    if let Some(ranking) = &details.ranking {
        corner.ranking = Some(Ranking {
            position: ranking.position,
            division: ranking.division.trim().to_string(),
        });
    }

    *corner != before
}

pub fn parse_winner(raw: Option<&str>) -> Option<CornerSide> {
    match raw?.trim().to_lowercase().as_str() {
        "red" => Some(CornerSide::Red),
        "blue" => Some(CornerSide::Blue),
        _ => None,
    }
}

/// Maps a free-text method label to a finish method; unknown labels are `None`.
pub fn parse_method(raw: &str) -> Option<FinishMethod> {
    let label = raw.trim().to_lowercase();
    let head = label
        .split([' ', '-', '(', '·'])
        .next()
        .unwrap_or_default();
    if label.contains("no contest") || head == "nc" {
        Some(FinishMethod::NoContest)
    } else if label.contains("draw") {
        Some(FinishMethod::Draw)
    } else if head == "dq" || label.contains("disqualif") {
        Some(FinishMethod::Dq)
    } else if label.contains("submission") || head == "sub" {
        Some(FinishMethod::Submission)
    } else if label.contains("ko") || label.contains("knockout") {
        Some(FinishMethod::KoTko)
    } else if label.contains("decision") || head == "dec" {
        Some(FinishMethod::Decision)
    } else {
        None
    }
}

/// A raw result only counts when it names a winner or a method. A method
/// label like `"Decision - Unanimous"` supplies the detail when none is given.
pub fn normalize_result(raw: Option<RawResult>) -> Option<BoutResult> {
    let raw = raw?;
    let winner = parse_winner(raw.winner.as_deref());
    let method_label = clean_text(raw.method.as_deref());
    if winner.is_none() && method_label.is_none() {
        return None;
    }

    let method = method_label.as_deref().and_then(parse_method);
    let method_detail = clean_text(raw.method_detail.as_deref()).or_else(|| {
        method_label
            .as_deref()
            .and_then(|label| label.split_once(" - "))
            .and_then(|(_, detail)| clean_text(Some(detail)))
    });
    let winner = match method {
        Some(FinishMethod::Draw | FinishMethod::NoContest) => None,
        _ => winner,
    };

    Some(BoutResult {
        winner,
        method,
        method_detail,
        round: raw.round,
        time: clean_text(raw.time.as_deref()),
    })
}

pub fn normalize_event(record: &EventRecord, rules: &IngestRules, now: DateTime<Utc>) -> Event {
    let name = clean_text(record.name.as_deref());
    let promotion =
        clean_text(record.promotion.as_deref()).unwrap_or_else(|| rules.promotion.clone());
    let category = detect_event_category(name.as_deref().unwrap_or_default(), &rules.promotion);
    let timezone = resolve_timezone(record.timezone.as_deref(), rules.source_timezone);

    Event {
        id: record.event_id,
        name,
        slug: extract_slug(record.url.as_deref()),
        url: clean_text(record.url.as_deref()),
        promotion,
        category,
        date: parse_date(record.event_date.as_deref()),
        start_time: parse_start_time(record.start_time.as_deref()),
        timezone: timezone.name().to_string(),
        location: build_location(record.venue.as_deref(), record.location.as_deref()),
        broadcast: clean_text(record.broadcast.as_deref()),
        total_bouts: record.total_bouts.unwrap_or(0),
        status: EventStatus::Scheduled,
        main_event_bout_id: None,
        poster_key: None,
        fired_windows: Default::default(),
        last_updated: now,
    }
}

fn fold_corner(base: Option<RawFighter>, detail: Option<RawFighter>) -> Option<RawFighter> {
    match (base, detail) {
        (Some(base), Some(detail)) => Some(base.overlay(detail)),
        (base, detail) => detail.or(base),
    }
}

/// Weight class label, falling back to the weight in pounds.
fn weight_class_label(record: &BoutRecord, detail: Option<&BoutDetailRecord>) -> Option<String> {
    clean_text(record.weight_class.as_deref())
        .or_else(|| {
            detail
                .and_then(|d| d.weight_info.as_deref())
                .and_then(|info| clean_text(info.split(['·', '|', '(']).next()))
                .filter(|label| !label.chars().next().is_some_and(|c| c.is_ascii_digit()))
        })
        .or_else(|| record.weight_lbs.map(|lbs| format!("{lbs} lbs")))
}

/// Base bout record with the first detail record for the same bout folded in.
pub fn normalize_bout(
    record: &BoutRecord,
    detail: Option<&BoutDetailRecord>,
    now: DateTime<Utc>,
) -> Bout {
    let base_corners = record.fighters.clone().unwrap_or_default();
    let detail_corners = detail
        .and_then(|d| d.fighters.clone())
        .unwrap_or_default();
    let red = corner_snapshot(fold_corner(base_corners.red, detail_corners.red));
    let blue = corner_snapshot(fold_corner(base_corners.blue, detail_corners.blue));

    let result = normalize_result(detail.and_then(|d| d.result.clone()));
    let status = if result.is_some() {
        BoutStatus::Completed
    } else if record.cancelled {
        BoutStatus::Cancelled
    } else {
        BoutStatus::Scheduled
    };
    let weight_class = weight_class_label(record, detail);

    Bout {
        id: record.bout_id,
        event_id: record.event_id,
        slug: extract_slug(record.url.as_deref()),
        url: clean_text(record.url.as_deref()),
        gender: infer_gender(weight_class.as_deref()),
        weight_class,
        weight_lbs: record.weight_lbs,
        rounds_scheduled: record
            .scheduled_rounds
            .filter(|r| *r > 0)
            .unwrap_or(DEFAULT_ROUNDS),
        is_title_fight: record.is_title_fight,
        card_section: normalize_card_section(record.card.as_deref()),
        card_order: record.order,
        is_main_event: record.is_main_event,
        is_co_main_event: record.is_co_main_event,
        status,
        red,
        blue,
        result,
        bout_date: parse_date(detail.and_then(|d| d.bout_date.as_deref())),
        broadcast: clean_text(detail.and_then(|d| d.broadcast.as_deref())),
        last_updated: now,
    }
}
