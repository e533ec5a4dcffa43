//! Weekly schedule ("WAP") library: plan model, layout projection, and printing.
//! The core stays pure: recoverable problems land in an explicit `Diagnostics`
//! collector, layout is a projection over an immutable `Plan`, and drawing only
//! happens through the `render::Canvas` boundary.

/// Version string printed in the page footer and PDF producer field.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod core {
    use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Weekday};
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /* ------------------------------ Constants ------------------------------ */

    pub const DAYS_IN_WEEK: usize = 7;

    /// Events shorter than this cannot show their title and are reported.
    pub const MINIMUM_EVENT_MINUTES: i64 = 10;

    /// Background of the `""` category; also used when a color fails to parse.
    pub const DEFAULT_COLOR: Rgb = Rgb::new(0xf0, 0xf0, 0xf0);

    /* ---------------------------- Value Objects ---------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub struct Rgb {
        pub r: u8,
        pub g: u8,
        pub b: u8,
    }

    impl Rgb {
        pub const BLACK: Rgb = Rgb::new(0, 0, 0);
        pub const WHITE: Rgb = Rgb::new(0xff, 0xff, 0xff);

        pub const fn new(r: u8, g: u8, b: u8) -> Self {
            Self { r, g, b }
        }

        /// Components scaled to `0.0..=1.0`, the form PDF color operators expect.
        pub fn unit(self) -> [f64; 3] {
            [
                f64::from(self.r) / 255.0,
                f64::from(self.g) / 255.0,
                f64::from(self.b) / 255.0,
            ]
        }
    }

    impl fmt::Display for Rgb {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        }
    }

    /// How events of one category are painted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CategoryStyle {
        pub background: Rgb,
        pub text: Rgb,
    }

    impl Default for CategoryStyle {
        fn default() -> Self {
            Self {
                background: DEFAULT_COLOR,
                text: Rgb::BLACK,
            }
        }
    }

    /* ------------------------------ Time of day ------------------------------ */

    /// Time of day from hour and minute; out-of-range input yields midnight.
    pub fn day_time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
    }

    /// Round to the nearest quarter hour (`:07` rounds down, `:08` rounds up).
    /// Times that would round past midnight stay on 23:45.
    pub fn round_to_quarter_hour(t: NaiveTime) -> NaiveTime {
        let minutes = (t.minute() + 7) / 15 * 15;
        if minutes < 60 {
            day_time(t.hour(), minutes)
        } else if t.hour() == 23 {
            day_time(23, 45)
        } else {
            day_time(t.hour() + 1, 0)
        }
    }

    /// `08:30` -> `0830`.
    pub fn military_time(t: NaiveTime) -> String {
        format!("{:02}{:02}", t.hour(), t.minute())
    }

    /// Signed whole minutes from `from` to `to` on the same day.
    pub fn minutes_between(from: NaiveTime, to: NaiveTime) -> i64 {
        to.signed_duration_since(from).num_minutes()
    }

    /// `2025-04-21` -> `21.04.2025`.
    pub fn swiss_date(date: NaiveDate) -> String {
        format!("{:02}.{:02}.{}", date.day(), date.month(), date.year())
    }

    pub fn german_weekday(day: Weekday) -> &'static str {
        match day {
            Weekday::Mon => "Montag",
            Weekday::Tue => "Dienstag",
            Weekday::Wed => "Mittwoch",
            Weekday::Thu => "Donnerstag",
            Weekday::Fri => "Freitag",
            Weekday::Sat => "Samstag",
            Weekday::Sun => "Sonntag",
        }
    }

    /// Column header label, e.g. `Montag, 21.04.2025`.
    pub fn day_name(date: NaiveDate) -> String {
        format!("{}, {}", german_weekday(date.weekday()), swiss_date(date))
    }

    /* ------------------------------- Settings ------------------------------- */

    /// Knobs for building a plan from an input document.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct PlanOptions {
        pub min_event_minutes: i64,
        pub default_day_start: NaiveTime,
        pub default_day_end: NaiveTime,
        /// Becomes the version string when the document does not carry one.
        pub today: NaiveDate,
    }

    impl Default for PlanOptions {
        fn default() -> Self {
            Self {
                min_event_minutes: MINIMUM_EVENT_MINUTES,
                default_day_start: day_time(5, 30),
                default_day_end: day_time(23, 30),
                today: chrono::Local::now().date_naive(),
            }
        }
    }

    /* -------------------------------- Event -------------------------------- */

    /// A validated activity.
    ///
    /// Invariants once it sits in a `Plan`: `start < end` (inverted input is
    /// swapped), `day_offset < plan.total_days`, and `category` names an entry of
    /// `plan.categories`.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Event {
        pub start: NaiveTime,
        pub end: NaiveTime,
        /// Drawn with a wavy bottom edge; layout ignores it.
        pub open_end: bool,
        pub day_offset: usize,
        /// Template instantiated on every day from `day_offset` to the end of the plan.
        pub repeats: bool,
        /// Empty means every column of the day.
        pub appears_in: Vec<String>,
        pub category: String,
        pub title: String,
        pub description: String,
        pub footnote: bool,
    }

    impl Event {
        pub fn new(day_offset: usize, start: NaiveTime, end: NaiveTime, title: impl Into<String>) -> Self {
            Self {
                start,
                end,
                open_end: false,
                day_offset,
                repeats: false,
                appears_in: vec![],
                category: String::new(),
                title: title.into(),
                description: String::new(),
                footnote: false,
            }
        }

        /// Canonical plan order: day, then start, then end.
        pub fn sort_key(&self) -> (usize, NaiveTime, NaiveTime) {
            (self.day_offset, self.start, self.end)
        }

        pub fn duration_minutes(&self) -> i64 {
            minutes_between(self.start, self.end)
        }
    }

    impl fmt::Display for Event {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "day {} {}-{} {}",
                self.day_offset + 1,
                self.start.format("%H:%M"),
                self.end.format("%H:%M"),
                self.title
            )
        }
    }

    /* ------------------------------ Aggregate ------------------------------ */

    /// Aggregate root: a validated multi-week schedule.
    ///
    /// Per-day vectors (`columns`, `day_names`, `daily_remarks`) have one slot for
    /// every day of every week, `weeks * 7` in total; `total_days` counts the slots
    /// up to the last declared day. `events` stays sorted by `Event::sort_key`.
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct Plan {
        pub total_days: usize,
        pub weeks: usize,
        pub first_day: NaiveDate,
        /// Quarter-hour aligned, `day_start < day_end`.
        pub day_start: NaiveTime,
        pub day_end: NaiveTime,
        /// Always contains `""`, the fallback style.
        pub categories: IndexMap<String, CategoryStyle>,
        pub columns: Vec<Vec<String>>,
        pub day_names: Vec<String>,
        pub weekly_remarks: Vec<Vec<String>>,
        pub daily_remarks: Vec<Vec<String>>,
        pub events: Vec<Event>,

        pub unit: String,
        pub title: String,
        pub author: String,
        pub version: String,
    }

    impl Plan {
        /// An empty plan covering `weeks` weeks starting at `first_day`.
        pub fn new(first_day: NaiveDate, weeks: usize, day_start: NaiveTime, day_end: NaiveTime) -> Self {
            let slots = weeks * DAYS_IN_WEEK;
            let mut categories = IndexMap::new();
            categories.insert(String::new(), CategoryStyle::default());
            Self {
                total_days: 0,
                weeks,
                first_day,
                day_start,
                day_end,
                categories,
                columns: vec![vec![]; slots],
                day_names: first_day.iter_days().take(slots).map(day_name).collect(),
                weekly_remarks: vec![vec![]; weeks],
                daily_remarks: vec![vec![]; slots],
                events: vec![],
                unit: String::new(),
                title: String::new(),
                author: String::new(),
                version: String::new(),
            }
        }

        /// Number of per-day slots (`weeks * 7`).
        pub fn day_slots(&self) -> usize {
            self.columns.len()
        }

        pub fn columns_for(&self, day: usize) -> &[String] {
            self.columns.get(day).map(Vec::as_slice).unwrap_or(&[])
        }

        /// Style for `category`, falling back to the default category.
        pub fn style_for(&self, category: &str) -> CategoryStyle {
            self.categories
                .get(category)
                .or_else(|| self.categories.get(""))
                .copied()
                .unwrap_or_default()
        }

        pub fn window_minutes(&self) -> i64 {
            minutes_between(self.day_start, self.day_end)
        }

        /// Restore the `(day, start, end)` order; stable for equal keys.
        pub fn sort_events(&mut self) {
            self.events.sort_by_key(Event::sort_key);
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum DomainError {
        #[error("invalid time of day {0:?}, use the format HH:MM")]
        InvalidDayTime(String),
        #[error("invalid color {0:?}, use the format #RRGGBB")]
        InvalidColor(String),
        #[error("failed to parse first day {0:?}, use the format YYYY-MM-DD")]
        InvalidFirstDay(String),
    }

}

pub mod diagnostics {
    //! Recoverable problems found while building or laying out a plan.
    //!
    //! The collector is owned by the caller and passed down explicitly; nothing in
    //! the core logs on its own. Front ends decide what to do with the entries
    //! (`Diagnostics::emit` forwards them to `tracing`).

    use serde::Serialize;
    use std::fmt;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Severity {
        Info,
        Warning,
        Error,
    }

    impl fmt::Display for Severity {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Severity::Info => "INFO",
                Severity::Warning => "WARNING",
                Severity::Error => "ERROR",
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum DiagnosticKind {
        InvalidColor,
        InvalidDayWindow,
        TooManyDays,
        InvalidEventTime,
        SwappedTimes,
        UnknownColumn,
        ImplicitAllColumns,
        TooShort,
        StartsBeforeDay,
        EndsAfterDay,
        UnknownCategory,
        EmptyDuration,
        UnsupportedOverlap,
        UnplacedEvent,
        TextOverflow,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct Diagnostic {
        pub severity: Severity,
        pub kind: DiagnosticKind,
        pub message: String,
    }

    impl Diagnostic {
        pub fn new(severity: Severity, kind: DiagnosticKind, message: impl Into<String>) -> Self {
            Self {
                severity,
                kind,
                message: message.into(),
            }
        }

        pub fn info(kind: DiagnosticKind, message: impl Into<String>) -> Self {
            Self::new(Severity::Info, kind, message)
        }

        pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
            Self::new(Severity::Warning, kind, message)
        }

        pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
            Self::new(Severity::Error, kind, message)
        }
    }

    impl fmt::Display for Diagnostic {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} {}", self.severity, self.message)
        }
    }

    /// Append-only diagnostic log.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
    #[serde(transparent)]
    pub struct Diagnostics {
        entries: Vec<Diagnostic>,
    }

    impl Diagnostics {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn record(&mut self, diagnostic: Diagnostic) {
            self.entries.push(diagnostic);
        }

        pub fn info(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
            self.record(Diagnostic::info(kind, message));
        }

        pub fn warn(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
            self.record(Diagnostic::warning(kind, message));
        }

        pub fn error(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
            self.record(Diagnostic::error(kind, message));
        }

        pub fn entries(&self) -> &[Diagnostic] {
            &self.entries
        }

        pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
            self.entries.iter()
        }

        pub fn len(&self) -> usize {
            self.entries.len()
        }

        pub fn is_empty(&self) -> bool {
            self.entries.is_empty()
        }

        pub fn count(&self, kind: DiagnosticKind) -> usize {
            self.entries.iter().filter(|d| d.kind == kind).count()
        }

        pub fn contains(&self, kind: DiagnosticKind) -> bool {
            self.count(kind) > 0
        }

        pub fn has_errors(&self) -> bool {
            self.entries.iter().any(|d| d.severity == Severity::Error)
        }

        /// Forward every entry to `tracing` at its severity.
        pub fn emit(&self) {
            for d in &self.entries {
                match d.severity {
                    Severity::Info => tracing::info!(kind = ?d.kind, "{}", d.message),
                    Severity::Warning => tracing::warn!(kind = ?d.kind, "{}", d.message),
                    Severity::Error => tracing::error!(kind = ?d.kind, "{}", d.message),
                }
            }
        }
    }

    impl Extend<Diagnostic> for Diagnostics {
        fn extend<T: IntoIterator<Item = Diagnostic>>(&mut self, iter: T) {
            self.entries.extend(iter);
        }
    }
}

pub mod schema {
    //! Raw input document as written by users (YAML, camelCase keys).
    //!
    //! Unknown keys are rejected so typos surface before a plan is built. Values
    //! stay as text here; `normalizer` validates them.

    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct PlanDocument {
        pub meta: Meta,
        #[serde(default)]
        pub categories: Vec<CategoryEntry>,
        #[serde(default)]
        pub weeks: Vec<WeekEntry>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields, rename_all = "camelCase")]
    pub struct Meta {
        pub title: String,
        pub author: String,
        /// Anchor date `YYYY-MM-DD` of the first day of the first week.
        pub first_day: String,
        pub unit: Option<String>,
        pub version: Option<String>,
        pub start_time: Option<String>,
        pub end_time: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields, rename_all = "camelCase")]
    pub struct CategoryEntry {
        pub identifier: String,
        pub color: String,
        pub text_color: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct WeekEntry {
        #[serde(default)]
        pub days: Vec<DayEntry>,
        #[serde(default)]
        pub remarks: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct DayEntry {
        #[serde(default)]
        pub columns: Vec<String>,
        #[serde(default)]
        pub events: Vec<EventEntry>,
        #[serde(default)]
        pub remarks: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields, rename_all = "camelCase")]
    pub struct EventEntry {
        pub title: String,
        pub start: String,
        pub end: String,
        pub description: Option<String>,
        pub category: Option<String>,
        pub repeats: Option<bool>,
        pub footnote: Option<bool>,
        pub open_end: Option<bool>,
        #[serde(default)]
        pub appears_in: Vec<String>,
    }
}

pub mod parser {
    //! Text parsing built on `nom` (times, dates, colors) and strict YAML decoding
    //! of plan documents.

    use crate::core::{DomainError, Rgb};
    use crate::schema::PlanDocument;
    use anyhow::{Context, Result};
    use chrono::{NaiveDate, NaiveTime};
    use nom::{
        IResult,
        bytes::complete::take_while_m_n,
        character::complete::char,
        combinator::{all_consuming, map, map_res},
        sequence::{preceded, separated_pair, tuple},
    };
    use std::{fs, path::Path};

    type PResult<'a, T> = IResult<&'a str, T>;

    /* ------------------------ Public entry points ------------------------ */

    /// Decode a plan document; unknown keys are an error.
    pub fn parse_plan_document(input: &str) -> Result<PlanDocument> {
        serde_yaml::from_str(input).context("decoding plan document")
    }

    pub fn read_plan_document(path: &Path) -> Result<PlanDocument> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        parse_plan_document(&text).with_context(|| format!("parsing {:?}", path))
    }

    /// 24-hour `H:MM` or `HH:MM`.
    pub fn parse_day_time(s: &str) -> Result<NaiveTime, DomainError> {
        all_consuming(day_time)(s)
            .map(|(_, t)| t)
            .map_err(|_| DomainError::InvalidDayTime(s.to_string()))
    }

    /// `#RRGGBB`, hex digits in either case.
    pub fn parse_color(s: &str) -> Result<Rgb, DomainError> {
        all_consuming(hex_color)(s)
            .map(|(_, c)| c)
            .map_err(|_| DomainError::InvalidColor(s.to_string()))
    }

    /// `YYYY-MM-DD`.
    pub fn parse_first_day(s: &str) -> Result<NaiveDate, DomainError> {
        all_consuming(date)(s)
            .map(|(_, d)| d)
            .map_err(|_| DomainError::InvalidFirstDay(s.to_string()))
    }

    /* ------------------------------ Combinators ------------------------------ */

    fn day_time(i: &str) -> PResult<'_, NaiveTime> {
        map_res(
            separated_pair(
                map_res(take_while_m_n(1, 2, char_is_digit), |s: &str| s.parse::<u32>()),
                char(':'),
                map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| s.parse::<u32>()),
            ),
            |(h, m)| NaiveTime::from_hms_opt(h, m, 0).ok_or("invalid time"),
        )(i)
    }

    fn date(i: &str) -> PResult<'_, NaiveDate> {
        map_res(
            tuple((
                map_res(take_while_m_n(4, 4, char_is_digit), |s: &str| s.parse::<i32>()),
                char('-'),
                map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| s.parse::<u32>()),
                char('-'),
                map_res(take_while_m_n(2, 2, char_is_digit), |s: &str| s.parse::<u32>()),
            )),
            |(y, _, m, _, d)| NaiveDate::from_ymd_opt(y, m, d).ok_or("invalid date"),
        )(i)
    }

    fn hex_color(i: &str) -> PResult<'_, Rgb> {
        map(
            preceded(char('#'), tuple((hex_byte, hex_byte, hex_byte))),
            |(r, g, b)| Rgb::new(r, g, b),
        )(i)
    }

    fn hex_byte(i: &str) -> PResult<'_, u8> {
        map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()), |s: &str| {
            u8::from_str_radix(s, 16)
        })(i)
    }

    fn char_is_digit(c: char) -> bool {
        c.is_ascii_digit()
    }

}

pub mod normalizer {
    //! Raw document -> validated `Plan`.
    //!
    //! An unparsable anchor date is the only fatal error. Everything else is
    //! repaired or skipped and recorded in the caller's `Diagnostics`.

    use crate::core::{
        CategoryStyle, DAYS_IN_WEEK, DomainError, Event, Plan, PlanOptions, round_to_quarter_hour,
    };
    use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
    use crate::parser::{parse_color, parse_day_time, parse_first_day};
    use crate::schema::{CategoryEntry, DayEntry, EventEntry, Meta, PlanDocument, WeekEntry};
    use chrono::NaiveTime;
    use indexmap::IndexMap;

    /* ------------------------------ Plan building ------------------------------ */

    pub fn build_plan(
        doc: &PlanDocument,
        options: &PlanOptions,
        diags: &mut Diagnostics,
    ) -> Result<Plan, DomainError> {
        let first_day = parse_first_day(&doc.meta.first_day)?;
        let (day_start, day_end) = resolve_day_window(&doc.meta, options, diags);

        let mut plan = Plan::new(first_day, doc.weeks.len(), day_start, day_end);
        plan.unit = doc.meta.unit.clone().unwrap_or_default();
        plan.title = doc.meta.title.clone();
        plan.author = doc.meta.author.clone();
        plan.version = doc
            .meta
            .version
            .clone()
            .unwrap_or_else(|| options.today.format("%Y-%m-%d").to_string());
        plan.categories = resolve_categories(&doc.categories, diags);

        for (week_idx, week) in doc.weeks.iter().enumerate() {
            plan.weekly_remarks[week_idx] = week.remarks.clone();
            let days = declared_days(week);
            plan.total_days = plan.total_days.max(week_idx * DAYS_IN_WEEK + days.len());
            for (day_idx, day) in days.iter().enumerate() {
                let offset = week_idx * DAYS_IN_WEEK + day_idx;
                plan.columns[offset] = day.columns.clone();
                plan.daily_remarks[offset] = day.remarks.clone();
            }
        }

        plan.events = normalize_events(&doc.weeks, diags);
        plan.sort_events();
        validate_events(&mut plan, options, diags);
        Ok(plan)
    }

    /// Days of a week that take part in the plan; anything past the seventh is ignored.
    fn declared_days(week: &WeekEntry) -> &[DayEntry] {
        &week.days[..week.days.len().min(DAYS_IN_WEEK)]
    }

    /// Day window from the document, rounded to quarter hours. Unparsable or
    /// inverted windows fall back to the configured defaults.
    pub fn resolve_day_window(
        meta: &Meta,
        options: &PlanOptions,
        diags: &mut Diagnostics,
    ) -> (NaiveTime, NaiveTime) {
        let mut bound = |raw: &Option<String>, fallback: NaiveTime, which: &str| match raw {
            None => fallback,
            Some(s) => match parse_day_time(s) {
                Ok(t) => round_to_quarter_hour(t),
                Err(err) => {
                    diags.warn(
                        DiagnosticKind::InvalidDayWindow,
                        format!("{err}; using default {which} {}", fallback.format("%H:%M")),
                    );
                    fallback
                }
            },
        };
        let start = bound(&meta.start_time, options.default_day_start, "start time");
        let end = bound(&meta.end_time, options.default_day_end, "end time");

        if start < end {
            return (start, end);
        }
        diags.warn(
            DiagnosticKind::InvalidDayWindow,
            format!(
                "day window {}-{} is empty; using {}-{}",
                start.format("%H:%M"),
                end.format("%H:%M"),
                options.default_day_start.format("%H:%M"),
                options.default_day_end.format("%H:%M"),
            ),
        );
        (options.default_day_start, options.default_day_end)
    }

    /// Category table with the `""` fallback entry first. Bad colors keep the
    /// category but paint it with the default style.
    pub fn resolve_categories(
        entries: &[CategoryEntry],
        diags: &mut Diagnostics,
    ) -> IndexMap<String, CategoryStyle> {
        let mut categories = IndexMap::new();
        categories.insert(String::new(), CategoryStyle::default());

        for entry in entries {
            let mut style = CategoryStyle::default();
            match parse_color(&entry.color) {
                Ok(color) => style.background = color,
                Err(err) => diags.warn(
                    DiagnosticKind::InvalidColor,
                    format!("{err} for category '{}', using {}", entry.identifier, style.background),
                ),
            }
            if let Some(raw) = &entry.text_color {
                match parse_color(raw) {
                    Ok(color) => style.text = color,
                    Err(err) => diags.warn(
                        DiagnosticKind::InvalidColor,
                        format!("{err} for the text of category '{}'", entry.identifier),
                    ),
                }
            }
            categories.insert(entry.identifier.clone(), style);
        }
        categories
    }

    /* ----------------------------- Event records ----------------------------- */

    /// Flatten every week/day record into events, unsorted.
    pub fn normalize_events(weeks: &[WeekEntry], diags: &mut Diagnostics) -> Vec<Event> {
        let mut events = vec![];
        for (week_idx, week) in weeks.iter().enumerate() {
            if week.days.len() > DAYS_IN_WEEK {
                diags.error(
                    DiagnosticKind::TooManyDays,
                    format!(
                        "week {} declares {} days; only the first {DAYS_IN_WEEK} are used",
                        week_idx + 1,
                        week.days.len()
                    ),
                );
            }
            for (day_idx, day) in declared_days(week).iter().enumerate() {
                let offset = week_idx * DAYS_IN_WEEK + day_idx;
                events.extend(
                    day.events
                        .iter()
                        .filter_map(|raw| normalize_event(raw, offset, &day.columns, diags)),
                );
            }
        }
        events
    }

    /// One raw record -> `Event`; `None` when a time does not parse.
    pub fn normalize_event(
        raw: &EventEntry,
        day_offset: usize,
        day_columns: &[String],
        diags: &mut Diagnostics,
    ) -> Option<Event> {
        let parsed = parse_day_time(&raw.start).and_then(|start| Ok((start, parse_day_time(&raw.end)?)));
        let (start, end) = match parsed {
            Ok(times) => times,
            Err(err) => {
                diags.error(
                    DiagnosticKind::InvalidEventTime,
                    format!("dropping event '{}' on day #{}: {err}", raw.title, day_offset + 1),
                );
                return None;
            }
        };

        let mut event = Event::new(day_offset, start, end, raw.title.clone());
        event.description = raw.description.clone().unwrap_or_default();
        event.category = raw.category.clone().unwrap_or_default();
        event.repeats = raw.repeats.unwrap_or(false);
        event.footnote = raw.footnote.unwrap_or(false);
        event.open_end = raw.open_end.unwrap_or(false);

        if end < start {
            diags.warn(
                DiagnosticKind::SwappedTimes,
                format!("{event} ends before it starts; swapping start and end"),
            );
            event.start = end;
            event.end = start;
        }

        let (appears_in, notes) = resolve_appears_in(&raw.appears_in, day_columns, &event);
        event.appears_in = appears_in;
        diags.extend(notes);
        Some(event)
    }

    /// Column membership as declared. Unknown names are kept and flagged unless
    /// the event repeats; an empty list stays empty and means "all columns".
    pub fn resolve_appears_in(
        declared: &[String],
        day_columns: &[String],
        event: &Event,
    ) -> (Vec<String>, Vec<Diagnostic>) {
        if declared.is_empty() {
            let note = Diagnostic::info(
                DiagnosticKind::ImplicitAllColumns,
                format!("{event} names no columns; it spans all columns of its day"),
            );
            return (vec![], vec![note]);
        }

        let notes = declared
            .iter()
            .filter(|c| !event.repeats && !day_columns.contains(c))
            .map(|c| {
                Diagnostic::warning(
                    DiagnosticKind::UnknownColumn,
                    format!("{event} references column '{c}', which is not defined for its day"),
                )
            })
            .collect();
        (declared.to_vec(), notes)
    }

    /// Category to use for `requested`; unknown identifiers fall back to `""`.
    pub fn resolve_category(
        categories: &IndexMap<String, CategoryStyle>,
        requested: &str,
        event: &Event,
    ) -> (String, Option<Diagnostic>) {
        if categories.contains_key(requested) {
            return (requested.to_string(), None);
        }
        let note = Diagnostic::warning(
            DiagnosticKind::UnknownCategory,
            format!("{event} uses undefined category '{requested}'; using the default"),
        );
        (String::new(), Some(note))
    }

    /* ---------------------------- Validation pass ---------------------------- */

    /// Advisory checks over the sorted event list. Only the category is rewritten.
    pub fn validate_events(plan: &mut Plan, options: &PlanOptions, diags: &mut Diagnostics) {
        let Plan {
            events,
            categories,
            day_start,
            day_end,
            ..
        } = plan;

        for event in events.iter_mut() {
            if event.duration_minutes() < options.min_event_minutes {
                diags.warn(
                    DiagnosticKind::TooShort,
                    format!(
                        "{event} is shorter than {} minutes; its title will not fit",
                        options.min_event_minutes
                    ),
                );
            }
            if event.start < *day_start {
                diags.warn(
                    DiagnosticKind::StartsBeforeDay,
                    format!("{event} starts before the day starts at {}", day_start.format("%H:%M")),
                );
            }
            if event.end > *day_end {
                diags.warn(
                    DiagnosticKind::EndsAfterDay,
                    format!("{event} ends after the day ends at {}", day_end.format("%H:%M")),
                );
            }
            let (category, note) = resolve_category(categories, &event.category, event);
            event.category = category;
            diags.extend(note);
        }
    }

}

pub mod projectors {
    //! Read-only projections over a `Plan`.

    pub mod layout_projector {
        //! Places events in the week grid.
        //!
        //! Three stages over the sorted event list: candidates clamped to the day
        //! window, side-by-side lanes for overlapping single-column events, and
        //! column-run merging, which also expands repeating events onto every
        //! following day. The plan is never mutated; placements carry their own
        //! event snapshot.

        use crate::core::{DAYS_IN_WEEK, Event, Plan, minutes_between};
        use crate::diagnostics::{DiagnosticKind, Diagnostics};
        use crate::projectors::footnote_projector;
        use chrono::NaiveTime;
        use serde::Serialize;

        /* ------------------------------ Geometry ------------------------------ */

        #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
        pub struct Point {
            pub x: f64,
            pub y: f64,
        }

        impl Point {
            pub const fn new(x: f64, y: f64) -> Self {
                Self { x, y }
            }

            pub fn offset(self, dx: f64, dy: f64) -> Self {
                Self::new(self.x + dx, self.y + dy)
            }
        }

        /// Axis-aligned rectangle, `y` growing downwards.
        #[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
        pub struct Rect {
            pub x: f64,
            pub y: f64,
            pub w: f64,
            pub h: f64,
        }

        impl Rect {
            pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
                Self { x, y, w, h }
            }

            pub fn at(origin: Point, w: f64, h: f64) -> Self {
                Self::new(origin.x, origin.y, w, h)
            }

            pub fn origin(&self) -> Point {
                Point::new(self.x, self.y)
            }

            pub fn right(&self) -> f64 {
                self.x + self.w
            }

            pub fn bottom(&self) -> f64 {
                self.y + self.h
            }

            /// Width of the shared horizontal band; zero when disjoint.
            pub fn horizontal_overlap(&self, other: &Rect) -> f64 {
                (self.right().min(other.right()) - self.x.max(other.x)).max(0.0)
            }
        }

        /// Scale of the time grid, supplied by whoever draws it.
        #[derive(Debug, Clone, Copy, PartialEq, Serialize)]
        pub struct GridGeometry {
            /// Top-left corner of the first day at `day_start`.
            pub origin: Point,
            /// Width of one whole day; its columns share it evenly.
            pub column_width: f64,
            pub minute_height: f64,
        }

        impl Default for GridGeometry {
            fn default() -> Self {
                Self {
                    origin: Point::default(),
                    column_width: 100.0,
                    minute_height: 1.0,
                }
            }
        }

        impl GridGeometry {
            /// Position of time `t` in weekday column `day_in_week` (0..7).
            pub fn to_grid(&self, t: NaiveTime, day_start: NaiveTime, day_in_week: usize) -> Point {
                self.origin.offset(
                    day_in_week as f64 * self.column_width,
                    minutes_between(day_start, t) as f64 * self.minute_height,
                )
            }

            pub fn height_of(&self, minutes: i64) -> f64 {
                minutes as f64 * self.minute_height
            }
        }

        /// One named column inside a day, relative to the day's left edge.
        #[derive(Debug, Clone, Copy, PartialEq)]
        pub struct ColumnSlot<'a> {
            pub name: &'a str,
            pub offset: f64,
            pub width: f64,
        }

        pub fn column_slots(columns: &[String], day_width: f64) -> Vec<ColumnSlot<'_>> {
            if columns.is_empty() {
                return vec![];
            }
            let width = day_width / columns.len() as f64;
            columns
                .iter()
                .enumerate()
                .map(|(i, name)| ColumnSlot {
                    name: name.as_str(),
                    offset: i as f64 * width,
                    width,
                })
                .collect()
        }

        /* ------------------------------- Output ------------------------------- */

        #[derive(Debug, Clone, PartialEq, Serialize)]
        pub struct Placement {
            pub day_offset: usize,
            pub rect: Rect,
            /// Snapshot with clamped times and, for repeats, the target day.
            pub event: Event,
            /// Index of the originating event in `Plan::events`.
            pub source: usize,
            pub footnote: Option<u32>,
        }

        #[derive(Debug, Clone, PartialEq, Default, Serialize)]
        pub struct Layout {
            /// Grouped by day; within a day, repeating instances come first so
            /// regular events draw on top of them.
            pub placements: Vec<Placement>,
            /// Footnote legend lines, one list per day slot.
            pub footnotes: Vec<Vec<String>>,
        }

        impl Layout {
            pub fn on_day(&self, day: usize) -> impl Iterator<Item = &Placement> + '_ {
                self.placements.iter().filter(move |p| p.day_offset == day)
            }

            pub fn footnotes_for(&self, day: usize) -> &[String] {
                self.footnotes.get(day).map(Vec::as_slice).unwrap_or(&[])
            }
        }

        /* ------------------------------ Pipeline ------------------------------ */

        pub fn layout_plan(plan: &Plan, geometry: &GridGeometry, diags: &mut Diagnostics) -> Layout {
            let mut candidates = build_candidates(plan, geometry, diags);
            resolve_overlaps(plan, &mut candidates, diags);
            let mut placements = place_candidates(plan, geometry, &candidates, diags);
            placements.sort_by_key(|p| (p.day_offset, !p.event.repeats));
            let footnotes = footnote_projector::number_footnotes(&mut placements, plan.day_slots());
            Layout {
                placements,
                footnotes,
            }
        }

        /* ------------------------- Stage 1: candidates ------------------------- */

        #[derive(Debug, Clone, PartialEq)]
        pub struct Candidate {
            pub source: usize,
            pub origin: Point,
            pub height: f64,
            /// Clamped to the day window.
            pub event: Event,
            /// Extra lanes in this event's overlap cluster; zero when it has none.
            pub parallel_cols: usize,
            /// Lane of this event inside its cluster.
            pub parallel_idx: usize,
        }

        /// Clamp every event to the day window and drop what has no time left.
        pub fn build_candidates(plan: &Plan, geometry: &GridGeometry, diags: &mut Diagnostics) -> Vec<Candidate> {
            let mut candidates = Vec::with_capacity(plan.events.len());
            for (source, original) in plan.events.iter().enumerate() {
                let mut event = original.clone();
                event.start = event.start.max(plan.day_start);
                event.end = event.end.min(plan.day_end);

                let minutes = event.duration_minutes();
                if minutes <= 0 {
                    diags.warn(
                        DiagnosticKind::EmptyDuration,
                        format!(
                            "{original} lies outside the day window {}-{} and is not drawn",
                            plan.day_start.format("%H:%M"),
                            plan.day_end.format("%H:%M")
                        ),
                    );
                    continue;
                }

                candidates.push(Candidate {
                    source,
                    origin: geometry.to_grid(event.start, plan.day_start, event.day_offset % DAYS_IN_WEEK),
                    height: geometry.height_of(minutes),
                    event,
                    parallel_cols: 0,
                    parallel_idx: 0,
                });
            }
            candidates
        }

        /* ----------------------- Stage 2: parallel lanes ----------------------- */

        /// The single column of a non-repeating event, the only kind that gets lanes.
        fn lane_column(candidate: &Candidate) -> Option<&str> {
            match candidate.event.appears_in.as_slice() {
                [column] if !candidate.event.repeats => Some(column.as_str()),
                _ => None,
            }
        }

        /// Assign side-by-side lanes to overlapping single-column events.
        ///
        /// Conflicts are found with a forward scan over the sorted candidates that
        /// stops at the first event starting after the current one ends. Each event
        /// takes the lowest lane not used by an earlier conflicting event, and all
        /// events of a connected overlap cluster share the cluster's lane count, so
        /// events that overlap in time never share horizontal space. Results only
        /// depend on the events, so running this again changes nothing.
        ///
        /// A single-column event overlapping a wider event that covers its column
        /// is not subdivided; it is reported as `UnsupportedOverlap` instead.
        pub fn resolve_overlaps(plan: &Plan, candidates: &mut [Candidate], diags: &mut Diagnostics) {
            let n = candidates.len();
            let mut earlier: Vec<Vec<usize>> = vec![vec![]; n];

            for (i, current) in candidates.iter().enumerate() {
                if current.event.repeats {
                    continue;
                }
                let day_columns = plan.columns_for(current.event.day_offset);
                for (j, next) in candidates.iter().enumerate().skip(i + 1) {
                    if next.event.day_offset != current.event.day_offset || current.event.end <= next.event.start {
                        break;
                    }
                    if next.event.repeats {
                        continue;
                    }
                    match (lane_column(current), lane_column(next)) {
                        (Some(a), Some(b)) if a == b => earlier[j].push(i),
                        (Some(_), Some(_)) | (None, None) => {}
                        (Some(column), None) => report_wide_overlap(current, next, column, day_columns, diags),
                        (None, Some(column)) => report_wide_overlap(next, current, column, day_columns, diags),
                    }
                }
            }

            let mut lanes = vec![0usize; n];
            let mut cluster: Vec<usize> = (0..n).collect();
            for j in 0..n {
                let taken: Vec<usize> = earlier[j].iter().map(|&i| lanes[i]).collect();
                lanes[j] = (0..).find(|lane| !taken.contains(lane)).unwrap_or(0);
                for &i in &earlier[j] {
                    union(&mut cluster, i, j);
                }
            }

            let mut widest = vec![0usize; n];
            for (j, &lane) in lanes.iter().enumerate() {
                let root = find(&mut cluster, j);
                widest[root] = widest[root].max(lane);
            }
            for (j, candidate) in candidates.iter_mut().enumerate() {
                candidate.parallel_idx = lanes[j];
                candidate.parallel_cols = widest[find(&mut cluster, j)];
            }
        }

        fn report_wide_overlap(
            single: &Candidate,
            wide: &Candidate,
            column: &str,
            day_columns: &[String],
            diags: &mut Diagnostics,
        ) {
            if !effective_columns(&wide.event, day_columns).iter().any(|c| c == column) {
                return;
            }
            diags.warn(
                DiagnosticKind::UnsupportedOverlap,
                format!(
                    "{} overlaps {} in column '{column}'; only single-column events are placed side by side",
                    single.event, wide.event
                ),
            );
        }

        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        fn union(parent: &mut [usize], a: usize, b: usize) {
            let (ra, rb) = (find(parent, a), find(parent, b));
            if ra != rb {
                parent[rb] = ra;
            }
        }

        /* -------------------- Stage 3: column runs and repeats -------------------- */

        /// Columns an event occupies on a day; no declared columns means all of them.
        pub fn effective_columns<'a>(event: &'a Event, day_columns: &'a [String]) -> &'a [String] {
            if event.appears_in.is_empty() {
                day_columns
            } else {
                &event.appears_in
            }
        }

        /// Maximal runs of adjacent member columns as `(offset, width)` within a
        /// day of width `day_width`, in declared column order.
        pub fn column_runs(day_columns: &[String], members: &[String], day_width: f64) -> Vec<(f64, f64)> {
            let mut runs = vec![];
            let mut run: Option<(f64, f64)> = None;
            for slot in column_slots(day_columns, day_width) {
                if members.iter().any(|m| m == slot.name) {
                    run = Some(match run {
                        Some((offset, width)) => (offset, width + slot.width),
                        None => (slot.offset, slot.width),
                    });
                } else if let Some(done) = run.take() {
                    runs.push(done);
                }
            }
            runs.extend(run);
            runs
        }

        fn place_candidates(
            plan: &Plan,
            geometry: &GridGeometry,
            candidates: &[Candidate],
            diags: &mut Diagnostics,
        ) -> Vec<Placement> {
            let mut placements = vec![];
            for candidate in candidates {
                let placed: Vec<Placement> = if candidate.event.repeats {
                    (candidate.event.day_offset..plan.total_days)
                        .flat_map(|day| {
                            let mut instance = candidate.event.clone();
                            instance.day_offset = day;
                            let origin = geometry.to_grid(instance.start, plan.day_start, day % DAYS_IN_WEEK);
                            merged_placements(plan, geometry, candidate, instance, origin)
                        })
                        .collect()
                } else if candidate.parallel_cols > 0 {
                    place_in_lane(plan, geometry, candidate).into_iter().collect()
                } else {
                    merged_placements(plan, geometry, candidate, candidate.event.clone(), candidate.origin)
                };

                if placed.is_empty() {
                    diags.warn(
                        DiagnosticKind::UnplacedEvent,
                        format!(
                            "{} matches no column of its day ({:?}) and is not drawn",
                            candidate.event,
                            plan.columns_for(candidate.event.day_offset)
                        ),
                    );
                }
                placements.extend(placed);
            }
            placements
        }

        fn merged_placements(
            plan: &Plan,
            geometry: &GridGeometry,
            candidate: &Candidate,
            event: Event,
            origin: Point,
        ) -> Vec<Placement> {
            let day_columns = plan.columns_for(event.day_offset);
            column_runs(day_columns, effective_columns(&event, day_columns), geometry.column_width)
                .into_iter()
                .map(|(offset, width)| Placement {
                    day_offset: event.day_offset,
                    rect: Rect::new(origin.x + offset, origin.y, width, candidate.height),
                    event: event.clone(),
                    source: candidate.source,
                    footnote: None,
                })
                .collect()
        }

        fn place_in_lane(plan: &Plan, geometry: &GridGeometry, candidate: &Candidate) -> Option<Placement> {
            let column = lane_column(candidate)?;
            let slots = column_slots(plan.columns_for(candidate.event.day_offset), geometry.column_width);
            let slot = slots.iter().find(|s| s.name == column)?;
            let width = slot.width / (candidate.parallel_cols + 1) as f64;
            Some(Placement {
                day_offset: candidate.event.day_offset,
                rect: Rect::new(
                    candidate.origin.x + slot.offset + candidate.parallel_idx as f64 * width,
                    candidate.origin.y,
                    width,
                    candidate.height,
                ),
                event: candidate.event.clone(),
                source: candidate.source,
                footnote: None,
            })
        }

        #[cfg(test)]
        mod tests {
            use super::*;
            use crate::core::day_time;
            use crate::parser::parse_day_time;
            use chrono::NaiveDate;

            const GEOMETRY: GridGeometry = GridGeometry {
                origin: Point::new(10.0, 20.0),
                column_width: 120.0,
                minute_height: 0.5,
            };

            fn event(day: usize, start: &str, end: &str, title: &str, columns: &[&str]) -> Event {
                let mut e = Event::new(
                    day,
                    parse_day_time(start).unwrap(),
                    parse_day_time(end).unwrap(),
                    title,
                );
                e.appears_in = columns.iter().map(|c| c.to_string()).collect();
                e
            }

            fn plan_with(days: usize, columns: &[&str], events: Vec<Event>) -> Plan {
                let first = NaiveDate::from_ymd_opt(2025, 4, 21).unwrap();
                let mut plan = Plan::new(first, days.div_ceil(DAYS_IN_WEEK), day_time(5, 30), day_time(23, 30));
                plan.total_days = days;
                for day in 0..days {
                    plan.columns[day] = columns.iter().map(|c| c.to_string()).collect();
                }
                plan.events = events;
                plan.sort_events();
                plan
            }

            fn layout(plan: &Plan) -> (Layout, Diagnostics) {
                let mut diags = Diagnostics::new();
                let layout = layout_plan(plan, &GEOMETRY, &mut diags);
                (layout, diags)
            }

            fn assert_no_shared_space(layout: &Layout) {
                for (i, a) in layout.placements.iter().enumerate() {
                    for b in &layout.placements[i + 1..] {
                        let same_time = a.day_offset == b.day_offset
                            && a.event.start < b.event.end
                            && b.event.start < a.event.end;
                        if same_time && !a.event.repeats && !b.event.repeats {
                            assert_eq!(
                                a.rect.horizontal_overlap(&b.rect),
                                0.0,
                                "{} and {} share space",
                                a.event,
                                b.event
                            );
                        }
                    }
                }
            }

            #[test]
            fn single_event_fills_its_column() {
                let plan = plan_with(1, &["A"], vec![event(0, "08:00", "09:30", "Drill", &["A"])]);
                let (layout, diags) = layout(&plan);
                assert!(diags.is_empty());
                assert_eq!(layout.placements.len(), 1);
                assert_eq!(layout.placements[0].rect, Rect::new(10.0, 20.0 + 150.0 * 0.5, 120.0, 90.0 * 0.5));
            }

            #[test]
            fn overlapping_pair_splits_the_column() {
                let plan = plan_with(
                    1,
                    &["A"],
                    vec![
                        event(0, "08:30", "09:30", "Second", &["A"]),
                        event(0, "08:00", "09:00", "First", &["A"]),
                    ],
                );
                let (layout, _) = layout(&plan);
                let rects: Vec<_> = layout.placements.iter().map(|p| (p.event.title.as_str(), p.rect)).collect();
                assert_eq!(rects[0].0, "First");
                assert_eq!((rects[0].1.x, rects[0].1.w), (10.0, 60.0));
                assert_eq!((rects[1].1.x, rects[1].1.w), (70.0, 60.0));
            }

            #[test]
            fn lanes_stay_inside_their_column() {
                let plan = plan_with(
                    1,
                    &["A", "B"],
                    vec![
                        event(0, "08:00", "09:00", "a1", &["B"]),
                        event(0, "08:00", "09:00", "a2", &["B"]),
                        event(0, "08:00", "09:00", "other", &["A"]),
                    ],
                );
                let (layout, _) = layout(&plan);
                let by_title = |t: &str| layout.placements.iter().find(|p| p.event.title == t).unwrap().rect;
                assert_eq!(by_title("other"), Rect::new(10.0, 20.0 + 75.0, 60.0, 30.0));
                assert_eq!((by_title("a1").x, by_title("a1").w), (70.0, 30.0));
                assert_eq!((by_title("a2").x, by_title("a2").w), (100.0, 30.0));
            }

            #[test]
            fn chained_overlaps_never_share_space() {
                let plan = plan_with(
                    2,
                    &["A"],
                    vec![
                        event(0, "08:00", "09:00", "a", &["A"]),
                        event(0, "08:30", "10:00", "b", &["A"]),
                        event(0, "09:30", "11:00", "c", &["A"]),
                        event(1, "08:00", "12:00", "long", &["A"]),
                        event(1, "08:30", "09:00", "inner1", &["A"]),
                        event(1, "08:45", "10:00", "inner2", &["A"]),
                        event(1, "09:30", "10:30", "inner3", &["A"]),
                        event(1, "13:00", "14:00", "alone", &["A"]),
                    ],
                );
                let (layout, _) = layout(&plan);
                assert_no_shared_space(&layout);

                let alone = layout.placements.iter().find(|p| p.event.title == "alone").unwrap();
                assert_eq!(alone.rect.w, 120.0);
                let c = layout.placements.iter().find(|p| p.event.title == "c").unwrap();
                assert_eq!((c.rect.x, c.rect.w), (10.0, 60.0));
            }

            #[test]
            fn overlap_resolution_is_idempotent() {
                let plan = plan_with(
                    1,
                    &["A"],
                    vec![
                        event(0, "08:00", "10:00", "a", &["A"]),
                        event(0, "08:30", "09:00", "b", &["A"]),
                        event(0, "08:45", "09:30", "c", &["A"]),
                    ],
                );
                let mut diags = Diagnostics::new();
                let mut candidates = build_candidates(&plan, &GEOMETRY, &mut diags);
                resolve_overlaps(&plan, &mut candidates, &mut diags);
                let first: Vec<_> = candidates.iter().map(|c| (c.parallel_cols, c.parallel_idx)).collect();
                assert_eq!(first, [(2, 0), (2, 1), (2, 2)]);
                resolve_overlaps(&plan, &mut candidates, &mut diags);
                let second: Vec<_> = candidates.iter().map(|c| (c.parallel_cols, c.parallel_idx)).collect();
                assert_eq!(first, second);
            }

            #[test]
            fn adjacent_columns_merge_and_gaps_split() {
                let plan = plan_with(
                    1,
                    &["A", "B", "C"],
                    vec![
                        event(0, "08:00", "09:00", "ab", &["A", "B"]),
                        event(0, "10:00", "11:00", "ac", &["A", "C"]),
                        event(0, "12:00", "13:00", "all", &[]),
                    ],
                );
                let (layout, _) = layout(&plan);
                let rects = |t: &str| -> Vec<Rect> {
                    layout.placements.iter().filter(|p| p.event.title == t).map(|p| p.rect).collect()
                };
                let ab = rects("ab");
                assert_eq!(ab.len(), 1);
                assert_eq!((ab[0].x, ab[0].w), (10.0, 80.0));
                let ac = rects("ac");
                assert_eq!(ac.len(), 2);
                assert_eq!((ac[0].x, ac[1].x), (10.0, 90.0));
                let all = rects("all");
                assert_eq!(all.len(), 1);
                assert_eq!(all[0].w, 120.0);
            }

            #[test]
            fn repeats_expand_to_the_end_of_the_plan() {
                let mut daily = event(2, "06:00", "06:30", "Appell", &[]);
                daily.repeats = true;
                let plan = plan_with(10, &["A", "B"], vec![daily]);
                let (layout, _) = layout(&plan);
                let days: Vec<_> = layout.placements.iter().map(|p| p.day_offset).collect();
                assert_eq!(days, (2..10).collect::<Vec<_>>());
                assert!(layout.placements.iter().all(|p| p.source == 0 && p.rect.w == 120.0));
                assert_eq!(layout.placements[5].event.day_offset, 7);
                assert_eq!(layout.placements[5].rect.x, 10.0);
                assert_eq!(plan.events[0].day_offset, 2);
            }

            #[test]
            fn repeats_use_each_target_days_columns() {
                let mut daily = event(0, "06:00", "06:30", "Appell", &["B"]);
                daily.repeats = true;
                let mut plan = plan_with(3, &["A", "B"], vec![daily]);
                plan.columns[1] = vec!["B".to_string()];
                plan.columns[2] = vec!["A".to_string()];
                let (layout, diags) = layout(&plan);
                let placed: Vec<_> = layout.placements.iter().map(|p| (p.day_offset, p.rect.w)).collect();
                assert_eq!(placed, [(0, 60.0), (1, 120.0)]);
                assert!(diags.is_empty());
            }

            #[test]
            fn repeating_instances_come_before_regular_events() {
                let mut daily = event(0, "12:00", "13:00", "Mittag", &[]);
                daily.repeats = true;
                let plan = plan_with(2, &["A"], vec![daily, event(1, "07:00", "08:00", "Sport", &["A"])]);
                let (layout, _) = layout(&plan);
                let order: Vec<_> = layout.on_day(1).map(|p| p.event.title.as_str()).collect();
                assert_eq!(order, ["Mittag", "Sport"]);
            }

            #[test]
            fn events_are_clamped_to_the_window_without_touching_the_plan() {
                let plan = plan_with(
                    1,
                    &["A"],
                    vec![
                        event(0, "05:00", "06:00", "early", &["A"]),
                        event(0, "04:00", "05:00", "gone", &["A"]),
                    ],
                );
                let (layout, diags) = layout(&plan);
                assert_eq!(layout.placements.len(), 1);
                let early = &layout.placements[0];
                assert_eq!(early.rect, Rect::new(10.0, 20.0, 120.0, 15.0));
                assert_eq!(early.event.start, day_time(5, 30));
                assert!(plan.events.iter().any(|e| e.start == day_time(5, 0)));
                assert_eq!(diags.count(DiagnosticKind::EmptyDuration), 1);
            }

            #[test]
            fn multi_column_overlap_is_reported_not_split() {
                let plan = plan_with(
                    1,
                    &["A", "B"],
                    vec![
                        event(0, "08:00", "09:00", "single", &["A"]),
                        event(0, "08:30", "09:30", "wide", &["A", "B"]),
                    ],
                );
                let (layout, diags) = layout(&plan);
                assert_eq!(diags.count(DiagnosticKind::UnsupportedOverlap), 1);
                let widths: Vec<_> = layout.placements.iter().map(|p| p.rect.w).collect();
                assert_eq!(widths, [60.0, 120.0]);
            }

            #[test]
            fn wide_event_before_single_column_event_is_reported() {
                let plan = plan_with(
                    1,
                    &["A", "B"],
                    vec![
                        event(0, "08:00", "10:00", "wide", &["A", "B"]),
                        event(0, "09:00", "11:00", "single", &["A"]),
                    ],
                );
                let (layout, diags) = layout(&plan);
                assert_eq!(diags.count(DiagnosticKind::UnsupportedOverlap), 1);
                let rects: Vec<_> = layout
                    .placements
                    .iter()
                    .map(|p| (p.event.title.as_str(), p.rect.x, p.rect.w))
                    .collect();
                assert_eq!(rects, [("wide", 10.0, 120.0), ("single", 10.0, 60.0)]);
            }

            #[test]
            fn all_column_event_overlapping_single_column_event_is_reported() {
                let plan = plan_with(
                    1,
                    &["A", "B"],
                    vec![
                        event(0, "08:00", "10:00", "single", &["A"]),
                        event(0, "09:00", "11:00", "all", &[]),
                    ],
                );
                let (_, diags) = layout(&plan);
                assert_eq!(diags.count(DiagnosticKind::UnsupportedOverlap), 1);
            }

            #[test]
            fn wide_event_in_other_columns_is_not_reported() {
                let plan = plan_with(
                    1,
                    &["A", "B", "C"],
                    vec![
                        event(0, "08:00", "10:00", "single", &["A"]),
                        event(0, "09:00", "11:00", "wide", &["B", "C"]),
                    ],
                );
                let (_, diags) = layout(&plan);
                assert!(!diags.contains(DiagnosticKind::UnsupportedOverlap));
            }

            #[test]
            fn events_outside_the_days_columns_are_reported() {
                let plan = plan_with(1, &["A"], vec![event(0, "08:00", "09:00", "lost", &["Z"])]);
                let (layout, diags) = layout(&plan);
                assert!(layout.placements.is_empty());
                assert!(diags.contains(DiagnosticKind::UnplacedEvent));
            }

            #[test]
            fn later_weeks_reuse_weekday_positions() {
                let plan = plan_with(9, &["A"], vec![event(8, "05:30", "06:00", "Tuesday", &["A"])]);
                let (layout, _) = layout(&plan);
                assert_eq!(layout.placements[0].rect.origin(), Point::new(130.0, 20.0));
            }
        }
    }

    pub mod footnote_projector {
        //! Footnote numbering. Per day, footnoted events are numbered from
        //! `(weekday + 1) * 10` in time order; the placement's title becomes the
        //! number and the original text moves to the day's legend.

        use crate::core::{DAYS_IN_WEEK, military_time};
        use crate::projectors::layout_projector::Placement;
        use chrono::NaiveTime;
        use std::collections::HashMap;

        pub fn first_number(day_offset: usize) -> u32 {
            ((day_offset % DAYS_IN_WEEK) as u32 + 1) * 10
        }

        /// `10  0800 Title, description`
        pub fn legend_line(number: u32, start: NaiveTime, title: &str, description: &str) -> String {
            if description.is_empty() {
                format!("{number}  {} {title}", military_time(start))
            } else {
                format!("{number}  {} {title}, {description}", military_time(start))
            }
        }

        /// Number footnoted placements and return the legend, one list per day slot.
        /// All rectangles of one event instance share a number.
        pub fn number_footnotes(placements: &mut [Placement], day_slots: usize) -> Vec<Vec<String>> {
            let mut instances: Vec<&Placement> = placements.iter().filter(|p| p.event.footnote).collect();
            instances.sort_by_key(|p| (p.day_offset, p.event.start, p.event.end, p.source));
            instances.dedup_by_key(|p| (p.day_offset, p.source));

            let mut legend = vec![Vec::new(); day_slots];
            let mut numbers = HashMap::new();
            let mut current_day = None;
            let mut next = 0;
            for p in instances {
                if current_day != Some(p.day_offset) {
                    current_day = Some(p.day_offset);
                    next = first_number(p.day_offset);
                }
                numbers.insert((p.day_offset, p.source), next);
                if let Some(lines) = legend.get_mut(p.day_offset) {
                    lines.push(legend_line(next, p.event.start, &p.event.title, &p.event.description));
                }
                next += 1;
            }

            for p in placements.iter_mut() {
                if let Some(&number) = numbers.get(&(p.day_offset, p.source)) {
                    p.footnote = Some(number);
                    p.event.title = number.to_string();
                    p.event.description.clear();
                }
            }
            legend
        }

        #[cfg(test)]
        mod tests {
            use super::*;
            use crate::core::{Event, Plan, day_time};
            use crate::diagnostics::Diagnostics;
            use crate::projectors::layout_projector::{GridGeometry, layout_plan};
            use chrono::NaiveDate;

            fn footnoted(day: usize, start: u32, title: &str, columns: &[&str]) -> Event {
                let mut e = Event::new(day, day_time(start, 0), day_time(start + 1, 0), title);
                e.footnote = true;
                e.description = format!("about {title}");
                e.appears_in = columns.iter().map(|c| c.to_string()).collect();
                e
            }

            fn plan(events: Vec<Event>) -> Plan {
                let first = NaiveDate::from_ymd_opt(2025, 4, 21).unwrap();
                let mut plan = Plan::new(first, 2, day_time(5, 30), day_time(23, 30));
                plan.total_days = 14;
                for cols in plan.columns.iter_mut() {
                    *cols = vec!["A".into(), "B".into(), "C".into()];
                }
                plan.events = events;
                plan.sort_events();
                plan
            }

            #[test]
            fn tuesday_footnotes_start_at_twenty() {
                let plan = plan(vec![
                    footnoted(1, 14, "Schiessen", &["A"]),
                    footnoted(1, 8, "Marsch", &["B"]),
                    footnoted(1, 10, "Theorie", &["C"]),
                ]);
                let mut diags = Diagnostics::new();
                let layout = layout_plan(&plan, &GridGeometry::default(), &mut diags);

                let titles: Vec<_> = layout.placements.iter().map(|p| p.event.title.as_str()).collect();
                assert_eq!(titles, ["20", "21", "22"]);
                assert!(layout.placements.iter().all(|p| p.event.description.is_empty()));
                assert_eq!(
                    layout.footnotes_for(1),
                    [
                        "20  0800 Marsch, about Marsch",
                        "21  1000 Theorie, about Theorie",
                        "22  1400 Schiessen, about Schiessen",
                    ]
                );
                assert_eq!(plan.events[0].title, "Marsch");
            }

            #[test]
            fn numbering_restarts_per_day_and_split_events_share_a_number() {
                let plan = plan(vec![
                    footnoted(0, 9, "Split", &["A", "C"]),
                    footnoted(7, 9, "Next Monday", &["A"]),
                    Event::new(0, day_time(11, 0), day_time(12, 0), "Plain"),
                ]);
                let mut diags = Diagnostics::new();
                let layout = layout_plan(&plan, &GridGeometry::default(), &mut diags);

                let numbers: Vec<_> = layout.placements.iter().map(|p| (p.day_offset, p.footnote)).collect();
                assert_eq!(numbers, [(0, Some(10)), (0, Some(10)), (0, None), (7, Some(10))]);
                assert_eq!(layout.footnotes_for(0).len(), 1);
                assert_eq!(layout.footnotes_for(7), ["10  0900 Next Monday, about Next Monday"]);
            }

            #[test]
            fn legend_omits_empty_description() {
                assert_eq!(legend_line(30, day_time(7, 15), "Appell", ""), "30  0715 Appell");
                assert_eq!(first_number(6), 70);
                assert_eq!(first_number(13), 70);
            }
        }
    }
}

pub mod render {
    //! Weekly page renderer on top of a minimal drawing boundary.
    //!
    //! `Canvas` exposes rectangles, lines, text and text measurement in page
    //! points with `y` growing downwards; `ScheduleRenderer` lays out one page
    //! per week. Backends live elsewhere (`pdf`).

    use crate::core::{DAYS_IN_WEEK, Plan, Rgb};
    use crate::diagnostics::{DiagnosticKind, Diagnostics};
    use crate::projectors::layout_projector::{GridGeometry, Layout, Placement, Point, Rect, column_slots};
    use chrono::Timelike;

    /// Line box height as a multiple of the font size.
    pub const LINE_HEIGHT: f64 = 1.2;

    const MM: f64 = 72.0 / 25.4;
    const GRID_GRAY: Rgb = Rgb::new(0xc8, 0xc8, 0xc8);

    /* ------------------------------ Drawing API ------------------------------ */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FontWeight {
        Regular,
        Bold,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Font {
        pub weight: FontWeight,
        pub size: f64,
        pub color: Rgb,
    }

    impl Font {
        pub fn regular(size: f64) -> Self {
            Self {
                weight: FontWeight::Regular,
                size,
                color: Rgb::BLACK,
            }
        }

        pub fn bold(size: f64) -> Self {
            Self {
                weight: FontWeight::Bold,
                ..Self::regular(size)
            }
        }

        pub fn colored(self, color: Rgb) -> Self {
            Self { color, ..self }
        }

        pub fn line_height(&self) -> f64 {
            self.size * LINE_HEIGHT
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Paint {
        pub fill: Option<Rgb>,
        pub stroke: Option<Rgb>,
        pub line_width: f64,
    }

    impl Paint {
        /// Filled with a thin black outline.
        pub fn filled(fill: Rgb) -> Self {
            Self {
                fill: Some(fill),
                stroke: Some(Rgb::BLACK),
                line_width: 0.3,
            }
        }

        pub fn outline(line_width: f64) -> Self {
            Self {
                fill: None,
                stroke: Some(Rgb::BLACK),
                line_width,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Align {
        Left,
        Center,
        Right,
    }

    /// Result of drawing wrapped text into a box.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct TextFit {
        /// Height taken by the drawn lines.
        pub height: f64,
        pub fits: bool,
    }

    pub trait Canvas {
        fn begin_page(&mut self);
        fn rect(&mut self, rect: Rect, paint: Paint);
        /// Rectangle whose bottom edge is a wave.
        fn open_end_rect(&mut self, rect: Rect, paint: Paint);
        fn line(&mut self, from: Point, to: Point, width: f64, color: Rgb);
        /// One line of text; `at` is the top-left corner of its line box.
        fn text(&mut self, at: Point, text: &str, font: &Font);
        /// Text rotated a quarter turn, reading upwards from `at`; the glyphs
        /// occupy `at.x..at.x + font.size`.
        fn vertical_text(&mut self, at: Point, text: &str, font: &Font);
        fn text_width(&self, text: &str, font: &Font) -> f64;

        /// Greedy word wrap; explicit newlines start a new line and words wider
        /// than `max_width` are broken.
        fn wrap(&self, text: &str, font: &Font, max_width: f64) -> Vec<String> {
            if text.is_empty() {
                return vec![];
            }
            let mut lines = vec![];
            for paragraph in text.split('\n') {
                let mut line = String::new();
                for word in paragraph.split_whitespace() {
                    let joined = if line.is_empty() {
                        word.to_string()
                    } else {
                        format!("{line} {word}")
                    };
                    if self.text_width(&joined, font) <= max_width {
                        line = joined;
                        continue;
                    }
                    if !line.is_empty() {
                        lines.push(std::mem::take(&mut line));
                    }
                    let mut rest = word;
                    while !rest.is_empty() && self.text_width(rest, font) > max_width {
                        let cut = split_point(self, rest, font, max_width);
                        lines.push(rest[..cut].to_string());
                        rest = &rest[cut..];
                    }
                    line = rest.to_string();
                }
                lines.push(line);
            }
            lines
        }

        /// Draw wrapped text from the top of `area`. Lines past the bottom are
        /// still drawn; the returned fit says whether they stayed inside.
        fn text_block(&mut self, area: Rect, text: &str, font: &Font, align: Align) -> TextFit {
            let lines = self.wrap(text, font, area.w);
            let mut widest: f64 = 0.0;
            for (i, line) in lines.iter().enumerate() {
                let width = self.text_width(line, font);
                widest = widest.max(width);
                let x = match align {
                    Align::Left => area.x,
                    Align::Center => area.x + (area.w - width) / 2.0,
                    Align::Right => area.right() - width,
                };
                self.text(Point::new(x, area.y + i as f64 * font.line_height()), line, font);
            }
            let height = lines.len() as f64 * font.line_height();
            TextFit {
                height,
                fits: height <= area.h + 1e-6 && widest <= area.w + 1e-6,
            }
        }
    }

    /// Byte index of the longest prefix of `word` that fits, at least one char.
    fn split_point<C: Canvas + ?Sized>(canvas: &C, word: &str, font: &Font, max_width: f64) -> usize {
        let mut chars = word.char_indices();
        let mut cut = chars.next().map_or(word.len(), |(_, c)| c.len_utf8());
        for (i, c) in chars {
            let end = i + c.len_utf8();
            if canvas.text_width(&word[..end], font) > max_width {
                break;
            }
            cut = end;
        }
        cut
    }

    /* ------------------------------ Page setup ------------------------------ */

    /// Page dimensions in points and the fixed parts of the page grid.
    #[derive(Debug, Clone, PartialEq)]
    pub struct PageSetup {
        pub width: f64,
        pub height: f64,
        pub margin_left: f64,
        pub margin_right: f64,
        pub margin_top: f64,
        /// Holds the remarks boxes and the footer.
        pub margin_bottom: f64,
        pub footer_band: f64,
        /// Seven days plus the weekly remarks column.
        pub big_columns: usize,
        /// Header rows above the grid, measured in grid minutes.
        pub day_header_minutes: f64,
        pub column_header_minutes: f64,
        pub small_font: f64,
        pub large_font: f64,
        pub padding: f64,
        /// Boxes at least this tall get inner padding.
        pub padding_min_height: f64,
    }

    impl Default for PageSetup {
        fn default() -> Self {
            Self::a4_landscape()
        }
    }

    impl PageSetup {
        pub fn a4_landscape() -> Self {
            Self {
                width: 297.0 * MM,
                height: 210.0 * MM,
                margin_left: 20.0 * MM,
                margin_right: 15.0 * MM,
                margin_top: 15.0 * MM,
                margin_bottom: 40.0 * MM,
                footer_band: 10.0 * MM,
                big_columns: DAYS_IN_WEEK + 1,
                day_header_minutes: 20.0,
                column_header_minutes: 90.0,
                small_font: 4.0,
                large_font: 8.0,
                padding: 2.0,
                padding_min_height: 16.0,
            }
        }

        fn header_minutes(&self) -> f64 {
            self.day_header_minutes + self.column_header_minutes
        }

        /// Grid scale for `plan`: the header rows and the day window share the
        /// space between the top and bottom margins.
        pub fn grid_geometry(&self, plan: &Plan) -> GridGeometry {
            let usable = self.height - self.margin_top - self.margin_bottom;
            let minute_height = usable / (plan.window_minutes().max(1) as f64 + self.header_minutes());
            GridGeometry {
                origin: Point::new(
                    self.margin_left,
                    self.margin_top + self.header_minutes() * minute_height,
                ),
                column_width: (self.width - self.margin_left - self.margin_right) / self.big_columns as f64,
                minute_height,
            }
        }

        pub fn grid_bottom(&self) -> f64 {
            self.height - self.margin_bottom
        }

        pub fn remarks_height(&self) -> f64 {
            self.margin_bottom - self.footer_band
        }
    }

    /* ------------------------------- Renderer ------------------------------- */

    pub struct ScheduleRenderer<'a> {
        plan: &'a Plan,
        setup: PageSetup,
        geometry: GridGeometry,
    }

    impl<'a> ScheduleRenderer<'a> {
        pub fn new(plan: &'a Plan, setup: PageSetup) -> Self {
            let geometry = setup.grid_geometry(plan);
            Self { plan, setup, geometry }
        }

        /// The geometry placements must be computed with.
        pub fn geometry(&self) -> GridGeometry {
            self.geometry
        }

        /// One page per week.
        pub fn render(&self, layout: &Layout, canvas: &mut impl Canvas, diags: &mut Diagnostics) {
            for week in 0..self.plan.weeks {
                canvas.begin_page();
                self.draw_header_footer(week, canvas);
                self.draw_grid(canvas);
                self.draw_weekly_remarks(week, canvas);
                for day in week * DAYS_IN_WEEK..(week + 1) * DAYS_IN_WEEK {
                    self.draw_day_header(day, canvas);
                    for placement in layout.on_day(day) {
                        self.draw_event(placement, canvas, diags);
                    }
                    self.draw_daily_remarks(day, layout.footnotes_for(day), canvas);
                }
            }
        }

        fn day_x(&self, day: usize) -> f64 {
            self.geometry.origin.x + (day % DAYS_IN_WEEK) as f64 * self.geometry.column_width
        }

        fn draw_header_footer(&self, week: usize, canvas: &mut impl Canvas) {
            let s = &self.setup;
            let font = Font::regular(s.large_font);
            let band = |y: f64| Rect::new(s.margin_left, y, s.width - s.margin_left - s.margin_right, font.line_height());

            let header = band((s.margin_top - font.line_height()) / 2.0);
            canvas.text_block(header, &self.plan.unit, &font, Align::Left);
            let title = format!("{} - Woche {}", self.plan.title, week + 1);
            canvas.text_block(header, &title, &Font::bold(s.large_font), Align::Center);
            canvas.text_block(header, &self.plan.version, &font, Align::Right);

            let footer = band(s.height - (s.footer_band + font.line_height()) / 2.0);
            canvas.text_block(footer, &format!("made with wap {}", crate::VERSION), &font, Align::Center);
            canvas.text_block(footer, &self.plan.author, &font, Align::Right);
        }

        fn draw_grid(&self, canvas: &mut impl Canvas) {
            let g = &self.geometry;
            let window = self.plan.window_minutes();
            let left = g.origin.x;
            let right = left + self.setup.big_columns as f64 * g.column_width;
            let bottom = self.setup.grid_bottom();

            for minute in (0..=window).step_by(15) {
                let y = g.origin.y + g.height_of(minute);
                canvas.line(Point::new(left, y), Point::new(right, y), 0.1, GRID_GRAY);
            }

            let start = i64::from(self.plan.day_start.hour()) * 60 + i64::from(self.plan.day_start.minute());
            let label_font = Font::regular(self.setup.large_font);
            let first_full_hour = (60 - start % 60) % 60;
            for minute in (first_full_hour..=window).step_by(60) {
                let y = g.origin.y + g.height_of(minute);
                canvas.line(Point::new(left, y), Point::new(right, y), 0.5, Rgb::BLACK);
                let label = format!("{:02}00", (start + minute) / 60);
                let width = canvas.text_width(&label, &label_font);
                canvas.text(
                    Point::new(left - width - self.setup.padding, y - label_font.line_height() / 2.0),
                    &label,
                    &label_font,
                );
            }

            for column in 0..=self.setup.big_columns {
                let x = left + column as f64 * g.column_width;
                canvas.line(
                    Point::new(x, self.setup.margin_top),
                    Point::new(x, bottom + self.setup.remarks_height()),
                    0.5,
                    Rgb::BLACK,
                );
            }
            canvas.rect(
                Rect::new(left, self.setup.margin_top, right - left, bottom - self.setup.margin_top),
                Paint::outline(0.8),
            );
        }

        fn draw_day_header(&self, day: usize, canvas: &mut impl Canvas) {
            let s = &self.setup;
            let g = &self.geometry;
            let x = self.day_x(day);
            let name_box = Rect::new(x, s.margin_top, g.column_width, s.day_header_minutes * g.minute_height);
            canvas.rect(name_box, Paint::filled(Rgb::WHITE));
            let name = self.plan.day_names.get(day).map(String::as_str).unwrap_or_default();
            let font = Font::bold(s.small_font * 1.5);
            canvas.text_block(
                Rect::new(x, name_box.y + (name_box.h - font.line_height()) / 2.0, name_box.w, name_box.h),
                name,
                &font,
                Align::Center,
            );

            let columns_top = name_box.bottom();
            let columns_height = s.column_header_minutes * g.minute_height;
            let slots = column_slots(self.plan.columns_for(day), g.column_width);
            if slots.is_empty() {
                canvas.rect(Rect::new(x, columns_top, g.column_width, columns_height), Paint::outline(0.5));
                return;
            }
            let font = Font::regular(s.small_font * 1.5);
            for slot in slots {
                let cell = Rect::new(x + slot.offset, columns_top, slot.width, columns_height);
                canvas.rect(cell, Paint::outline(0.5));
                canvas.vertical_text(
                    Point::new(cell.x + (cell.w - font.size) / 2.0, cell.bottom() - s.padding),
                    slot.name,
                    &font,
                );
            }
        }

        fn draw_event(&self, placement: &Placement, canvas: &mut impl Canvas, diags: &mut Diagnostics) {
            let style = self.plan.style_for(&placement.event.category);
            let rect = placement.rect;
            let paint = Paint::filled(style.background);
            if placement.event.open_end {
                canvas.open_end_rect(rect, paint);
            } else {
                canvas.rect(rect, paint);
            }

            let pad = if rect.h >= self.setup.padding_min_height {
                self.setup.padding
            } else {
                0.0
            };
            let inner = Rect::new(rect.x + pad, rect.y + pad, rect.w - 2.0 * pad, rect.h - 2.0 * pad);
            let title_font = Font::bold(self.setup.small_font).colored(style.text);
            let title = canvas.text_block(inner, &placement.event.title, &title_font, Align::Left);
            if !title.fits {
                diags.warn(
                    DiagnosticKind::TextOverflow,
                    format!("title of {} does not fit into its box", placement.event),
                );
            }

            if !placement.event.description.is_empty() {
                let rest = Rect::new(inner.x, inner.y + title.height, inner.w, (inner.h - title.height).max(0.0));
                let font = Font::regular(self.setup.small_font).colored(style.text);
                canvas.text_block(rest, &placement.event.description, &font, Align::Left);
            }
        }

        fn draw_daily_remarks(&self, day: usize, legend: &[String], canvas: &mut impl Canvas) {
            let s = &self.setup;
            let area = Rect::new(self.day_x(day), s.grid_bottom(), self.geometry.column_width, s.remarks_height());
            canvas.rect(area, Paint::outline(0.5));

            let own = self.plan.daily_remarks.get(day).map(Vec::as_slice).unwrap_or(&[]);
            let text = legend.iter().chain(own).cloned().collect::<Vec<_>>().join("\n");
            canvas.text_block(inset(area, s.padding), &text, &Font::regular(s.small_font), Align::Left);
        }

        fn draw_weekly_remarks(&self, week: usize, canvas: &mut impl Canvas) {
            let s = &self.setup;
            let g = &self.geometry;
            let x = g.origin.x + DAYS_IN_WEEK as f64 * g.column_width;

            let header = Rect::new(x, s.margin_top, g.column_width, g.origin.y - s.margin_top);
            canvas.rect(header, Paint::filled(Rgb::WHITE));
            let font = Font::bold(s.large_font);
            canvas.text_block(
                Rect::new(header.x, header.y + (header.h - font.line_height()) / 2.0, header.w, header.h),
                "Bemerkungen",
                &font,
                Align::Center,
            );

            let body = Rect::new(x, g.origin.y, g.column_width, s.grid_bottom() - g.origin.y);
            canvas.rect(body, Paint::filled(Rgb::WHITE));
            let remarks = self
                .plan
                .weekly_remarks
                .get(week)
                .map(|r| r.iter().map(|line| format!("- {line}")).collect::<Vec<_>>().join("\n"))
                .unwrap_or_default();
            canvas.text_block(inset(body, s.padding), &remarks, &Font::regular(s.large_font), Align::Left);

            canvas.rect(Rect::new(x, s.grid_bottom(), g.column_width, s.remarks_height()), Paint::outline(0.8));
        }
    }

    fn inset(rect: Rect, by: f64) -> Rect {
        Rect::new(rect.x + by, rect.y + by, (rect.w - 2.0 * by).max(0.0), (rect.h - 2.0 * by).max(0.0))
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::{CategoryStyle, Event, day_time};
        use crate::projectors::layout_projector::layout_plan;
        use chrono::NaiveDate;

        #[derive(Debug, Clone, PartialEq)]
        enum Op {
            Page,
            Rect(Rect, Paint),
            OpenEnd(Rect, Paint),
            Line,
            Text(Point, String, Font),
            Vertical(String),
        }

        /// Records drawing calls; every glyph is half the font size wide.
        #[derive(Default)]
        struct RecordingCanvas {
            ops: Vec<Op>,
        }

        impl RecordingCanvas {
            fn texts(&self) -> Vec<&str> {
                self.ops
                    .iter()
                    .filter_map(|op| match op {
                        Op::Text(_, t, _) => Some(t.as_str()),
                        _ => None,
                    })
                    .collect()
            }
        }

        impl Canvas for RecordingCanvas {
            fn begin_page(&mut self) {
                self.ops.push(Op::Page);
            }
            fn rect(&mut self, rect: Rect, paint: Paint) {
                self.ops.push(Op::Rect(rect, paint));
            }
            fn open_end_rect(&mut self, rect: Rect, paint: Paint) {
                self.ops.push(Op::OpenEnd(rect, paint));
            }
            fn line(&mut self, _: Point, _: Point, _: f64, _: Rgb) {
                self.ops.push(Op::Line);
            }
            fn text(&mut self, at: Point, text: &str, font: &Font) {
                self.ops.push(Op::Text(at, text.to_string(), *font));
            }
            fn vertical_text(&mut self, _: Point, text: &str, _: &Font) {
                self.ops.push(Op::Vertical(text.to_string()));
            }
            fn text_width(&self, text: &str, font: &Font) -> f64 {
                text.chars().count() as f64 * font.size * 0.5
            }
        }

        fn sample_plan() -> Plan {
            let first = NaiveDate::from_ymd_opt(2025, 4, 21).unwrap();
            let mut plan = Plan::new(first, 2, day_time(5, 30), day_time(23, 30));
            plan.total_days = 9;
            plan.title = "Ausbildung".into();
            plan.author = "Kp Kdt".into();
            plan.version = "v3".into();
            plan.categories.insert(
                "sport".into(),
                CategoryStyle {
                    background: Rgb::new(255, 0, 128),
                    text: Rgb::WHITE,
                },
            );
            plan.columns[0] = vec!["Zug 1".into(), "Zug 2".into()];
            plan.daily_remarks[0] = vec!["Material fassen".into()];
            plan.weekly_remarks[0] = vec!["Tenue B".into()];

            let mut run = Event::new(0, day_time(8, 0), day_time(10, 0), "Lauf");
            run.category = "sport".into();
            run.open_end = true;
            run.appears_in = vec!["Zug 1".into()];
            let mut note = Event::new(0, day_time(11, 0), day_time(12, 0), "Theorie");
            note.footnote = true;
            note.description = "Saal".into();
            plan.events = vec![run, note];
            plan
        }

        fn render(plan: &Plan) -> (RecordingCanvas, Diagnostics) {
            let renderer = ScheduleRenderer::new(plan, PageSetup::default());
            let mut diags = Diagnostics::new();
            let layout = layout_plan(plan, &renderer.geometry(), &mut diags);
            let mut canvas = RecordingCanvas::default();
            renderer.render(&layout, &mut canvas, &mut diags);
            (canvas, diags)
        }

        #[test]
        fn grid_fills_the_space_between_margins() {
            let plan = sample_plan();
            let setup = PageSetup::default();
            let g = setup.grid_geometry(&plan);
            let bottom = g.origin.y + g.height_of(plan.window_minutes());
            assert!((bottom - setup.grid_bottom()).abs() < 1e-6);
            let right = g.origin.x + 8.0 * g.column_width;
            assert!((right - (setup.width - setup.margin_right)).abs() < 1e-6);
        }

        #[test]
        fn draws_one_page_per_week_with_headers() {
            let (canvas, _) = render(&sample_plan());
            assert_eq!(canvas.ops.iter().filter(|op| **op == Op::Page).count(), 2);
            let texts = canvas.texts();
            assert!(texts.contains(&"Ausbildung - Woche 1"));
            assert!(texts.contains(&"Ausbildung - Woche 2"));
            assert!(texts.contains(&"v3"));
            assert!(texts.contains(&"0600"));
            assert!(texts.contains(&"Montag, 21.04.2025"));
            assert!(texts.iter().any(|t| t.starts_with("made with wap ")));
            let columns: Vec<_> = canvas
                .ops
                .iter()
                .filter_map(|op| match op {
                    Op::Vertical(t) => Some(t.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(columns, ["Zug 1", "Zug 2"]);
        }

        #[test]
        fn events_use_category_style_and_open_end_shape() {
            let (canvas, _) = render(&sample_plan());
            let open = canvas.ops.iter().find_map(|op| match op {
                Op::OpenEnd(_, paint) => Some(*paint),
                _ => None,
            });
            assert_eq!(open.and_then(|p| p.fill), Some(Rgb::new(255, 0, 128)));
            let title = canvas.ops.iter().find_map(|op| match op {
                Op::Text(_, t, font) if t == "Lauf" => Some(*font),
                _ => None,
            });
            assert_eq!(title.map(|f| (f.weight, f.color)), Some((FontWeight::Bold, Rgb::WHITE)));
        }

        #[test]
        fn remarks_list_footnotes_before_own_remarks() {
            let (canvas, _) = render(&sample_plan());
            let texts = canvas.texts();
            let legend = texts.iter().position(|t| *t == "10  1100 Theorie, Saal");
            let own = texts.iter().position(|t| *t == "Material fassen");
            assert!(legend.is_some() && own.is_some());
            assert!(legend < own);
            assert!(texts.contains(&"10"));
            assert!(texts.contains(&"- Tenue B"));
            assert!(texts.contains(&"Bemerkungen"));
        }

        #[test]
        fn overflowing_titles_are_reported() {
            let mut plan = sample_plan();
            plan.events = vec![Event::new(
                0,
                day_time(8, 0),
                day_time(8, 10),
                "Ein ausserordentlich langer Titel der nie passt",
            )];
            let (_, diags) = render(&plan);
            assert_eq!(diags.count(DiagnosticKind::TextOverflow), 1);
        }

        #[test]
        fn wrap_breaks_on_words_and_splits_long_ones() {
            let canvas = RecordingCanvas::default();
            let font = Font::regular(2.0);
            assert_eq!(canvas.wrap("ab cd ef", &font, 5.0), ["ab cd", "ef"]);
            assert_eq!(canvas.wrap("abcdefgh", &font, 3.0), ["abc", "def", "gh"]);
            assert_eq!(canvas.wrap("a\nb", &font, 10.0), ["a", "b"]);
            assert!(canvas.wrap("", &font, 10.0).is_empty());
        }
    }
}

pub mod pdf {
    //! `lopdf` backend: builtin Helvetica fonts, WinAnsi text, one content
    //! stream per page. Coordinates arrive top-down and are flipped here.

    use crate::core::{Plan, Rgb};
    use crate::diagnostics::Diagnostics;
    use crate::projectors::layout_projector::{Layout, Point, Rect, layout_plan};
    use crate::render::{Canvas, Font, FontWeight, PageSetup, Paint, ScheduleRenderer};
    use anyhow::{Context, Result};
    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, StringFormat, dictionary};

    /// Helvetica ascender, in units of the font size.
    const ASCENT: f64 = 0.718;
    /// Helvetica-Bold runs wider; widths are scaled instead of tabulated twice.
    const BOLD_FACTOR: f64 = 1.07;

    /// Helvetica advance widths for ' '..='~' in 1/1000 em.
    const HELVETICA_WIDTHS: [u16; 95] = [
        278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
        556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
        1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
        667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
        333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
        556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
    ];
    const FALLBACK_WIDTH: u16 = 556;

    fn glyph_width(c: char) -> u16 {
        match c {
            ' '..='~' => HELVETICA_WIDTHS[c as usize - 0x20],
            'ä' | 'ö' | 'ü' | 'é' | 'è' | 'à' => 556,
            'Ä' | 'Ö' | 'Ü' => 722,
            _ => FALLBACK_WIDTH,
        }
    }

    /// WinAnsi bytes for `text`; unmapped characters become `?`.
    pub fn encode_win_ansi(text: &str) -> Vec<u8> {
        text.chars()
            .map(|c| match c {
                '€' => 0x80,
                '…' => 0x85,
                '‘' => 0x91,
                '’' => 0x92,
                '“' => 0x93,
                '”' => 0x94,
                '•' => 0x95,
                '–' => 0x96,
                '—' => 0x97,
                c if (c as u32) < 0x80 || (0xa0..=0xff).contains(&(c as u32)) => c as u32 as u8,
                _ => b'?',
            })
            .collect()
    }

    fn real(v: f64) -> Object {
        Object::Real(v as _)
    }

    fn font_name(font: &Font) -> Object {
        match font.weight {
            FontWeight::Regular => Object::Name(b"F1".to_vec()),
            FontWeight::Bold => Object::Name(b"F2".to_vec()),
        }
    }

    /* ------------------------------ Canvas ------------------------------ */

    pub struct PdfCanvas {
        width: f64,
        height: f64,
        pages: Vec<Vec<Operation>>,
    }

    impl PdfCanvas {
        pub fn new(width: f64, height: f64) -> Self {
            Self {
                width,
                height,
                pages: vec![],
            }
        }

        fn ops(&mut self) -> &mut Vec<Operation> {
            if self.pages.is_empty() {
                self.pages.push(vec![]);
            }
            let last = self.pages.len() - 1;
            &mut self.pages[last]
        }

        fn push(&mut self, operator: &str, operands: Vec<Object>) {
            self.ops().push(Operation::new(operator, operands));
        }

        fn flip(&self, y: f64) -> f64 {
            self.height - y
        }

        fn set_paint(&mut self, paint: &Paint) {
            if let Some(fill) = paint.fill {
                let [r, g, b] = fill.unit();
                self.push("rg", vec![real(r), real(g), real(b)]);
            }
            if let Some(stroke) = paint.stroke {
                let [r, g, b] = stroke.unit();
                self.push("RG", vec![real(r), real(g), real(b)]);
                self.push("w", vec![real(paint.line_width)]);
            }
        }

        fn finish_path(&mut self, paint: &Paint) {
            let operator = match (paint.fill.is_some(), paint.stroke.is_some()) {
                (true, true) => "B",
                (true, false) => "f",
                (false, true) => "S",
                (false, false) => "n",
            };
            self.push(operator, vec![]);
        }

        fn show_text(&mut self, matrix: [f64; 6], text: &str, font: &Font) {
            let [r, g, b] = font.color.unit();
            self.push("BT", vec![]);
            self.push("Tf", vec![font_name(font), real(font.size)]);
            self.push("rg", vec![real(r), real(g), real(b)]);
            self.push("Tm", matrix.iter().map(|v| real(*v)).collect());
            self.push(
                "Tj",
                vec![Object::String(encode_win_ansi(text), StringFormat::Literal)],
            );
            self.push("ET", vec![]);
        }

        /// Serialize all pages into a PDF file.
        pub fn finish(self, info: &DocumentInfo) -> Result<Vec<u8>> {
            let mut doc = Document::with_version("1.5");
            let pages_id = doc.new_object_id();
            let regular = doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => "Helvetica",
                "Encoding" => "WinAnsiEncoding",
            });
            let bold = doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => "Helvetica-Bold",
                "Encoding" => "WinAnsiEncoding",
            });
            let resources = doc.add_object(dictionary! {
                "Font" => dictionary! { "F1" => regular, "F2" => bold },
            });

            let mut kids: Vec<Object> = vec![];
            for operations in self.pages {
                let content = Content { operations }.encode().context("encoding page content")?;
                let content_id = doc.add_object(Stream::new(dictionary! {}, content));
                let page_id = doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "Contents" => content_id,
                });
                kids.push(page_id.into());
            }

            let count = kids.len() as i64;
            doc.objects.insert(
                pages_id,
                Object::Dictionary(dictionary! {
                    "Type" => "Pages",
                    "Kids" => kids,
                    "Count" => count,
                    "Resources" => resources,
                    "MediaBox" => vec![real(0.0), real(0.0), real(self.width), real(self.height)],
                }),
            );
            let catalog = doc.add_object(dictionary! {
                "Type" => "Catalog",
                "Pages" => pages_id,
            });
            doc.trailer.set("Root", catalog);

            let literal = |s: &str| Object::String(encode_win_ansi(s), StringFormat::Literal);
            let info_id = doc.add_object(dictionary! {
                "Title" => literal(&info.title),
                "Author" => literal(&info.author),
                "Producer" => literal(&info.producer),
            });
            doc.trailer.set("Info", info_id);

            doc.compress();
            let mut bytes = Vec::new();
            doc.save_to(&mut bytes).context("serializing PDF")?;
            Ok(bytes)
        }
    }

    impl Canvas for PdfCanvas {
        fn begin_page(&mut self) {
            self.pages.push(vec![]);
        }

        fn rect(&mut self, rect: Rect, paint: Paint) {
            let y = self.flip(rect.bottom());
            self.push("q", vec![]);
            self.set_paint(&paint);
            self.push("re", vec![real(rect.x), real(y), real(rect.w), real(rect.h)]);
            self.finish_path(&paint);
            self.push("Q", vec![]);
        }

        fn open_end_rect(&mut self, rect: Rect, paint: Paint) {
            let amplitude = (rect.h.min(rect.w) * 0.15).min(4.0);
            let (top, bottom) = (self.flip(rect.y), self.flip(rect.bottom()));
            self.push("q", vec![]);
            self.set_paint(&paint);
            self.push("m", vec![real(rect.x), real(top)]);
            self.push("l", vec![real(rect.x), real(bottom)]);
            self.push(
                "c",
                vec![
                    real(rect.x + rect.w / 3.0),
                    real(bottom + amplitude),
                    real(rect.x + 2.0 * rect.w / 3.0),
                    real(bottom - amplitude),
                    real(rect.right()),
                    real(bottom),
                ],
            );
            self.push("l", vec![real(rect.right()), real(top)]);
            self.push("h", vec![]);
            self.finish_path(&paint);
            self.push("Q", vec![]);
        }

        fn line(&mut self, from: Point, to: Point, width: f64, color: Rgb) {
            let (y1, y2) = (self.flip(from.y), self.flip(to.y));
            self.push("q", vec![]);
            self.set_paint(&Paint {
                fill: None,
                stroke: Some(color),
                line_width: width,
            });
            self.push("m", vec![real(from.x), real(y1)]);
            self.push("l", vec![real(to.x), real(y2)]);
            self.push("S", vec![]);
            self.push("Q", vec![]);
        }

        fn text(&mut self, at: Point, text: &str, font: &Font) {
            let baseline = self.flip(at.y + font.size * ASCENT);
            self.show_text([1.0, 0.0, 0.0, 1.0, at.x, baseline], text, font);
        }

        fn vertical_text(&mut self, at: Point, text: &str, font: &Font) {
            let y = self.flip(at.y);
            self.show_text([0.0, 1.0, -1.0, 0.0, at.x + font.size * ASCENT, y], text, font);
        }

        fn text_width(&self, text: &str, font: &Font) -> f64 {
            let units: u32 = text.chars().map(|c| u32::from(glyph_width(c))).sum();
            let width = f64::from(units) / 1000.0 * font.size;
            match font.weight {
                FontWeight::Regular => width,
                FontWeight::Bold => width * BOLD_FACTOR,
            }
        }
    }

    /* ------------------------------ Document ------------------------------ */

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct DocumentInfo {
        pub title: String,
        pub author: String,
        pub producer: String,
    }

    impl DocumentInfo {
        pub fn for_plan(plan: &Plan) -> Self {
            Self {
                title: plan.title.clone(),
                author: plan.author.clone(),
                producer: format!("wap {}", crate::VERSION),
            }
        }
    }

    /// Lay out and print `plan`; returns the layout used and the PDF bytes.
    pub fn render_pdf(plan: &Plan, setup: &PageSetup, diags: &mut Diagnostics) -> Result<(Layout, Vec<u8>)> {
        let renderer = ScheduleRenderer::new(plan, setup.clone());
        let layout = layout_plan(plan, &renderer.geometry(), diags);
        let mut canvas = PdfCanvas::new(setup.width, setup.height);
        renderer.render(&layout, &mut canvas, diags);
        let bytes = canvas.finish(&DocumentInfo::for_plan(plan))?;
        Ok((layout, bytes))
    }

}

pub use crate::core::{CategoryStyle, DomainError, Event, Plan, PlanOptions, Rgb};
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use normalizer::build_plan;
pub use parser::{parse_plan_document, read_plan_document};
pub use pdf::{PdfCanvas, render_pdf};
pub use projectors::layout_projector::{GridGeometry, Layout, Placement, layout_plan};
pub use render::{Canvas, PageSetup, ScheduleRenderer};
