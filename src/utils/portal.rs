use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use log::{info, warn};

use crate::config::PortalConfig;
use crate::error::FetchError;
use crate::models::{ChildReportSet, GradeRecord};

// A child as listed by the portal: the id used for later requests and the
// name shown in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    pub id: String,
    pub name: String,
}

// A grade in whatever shape the portal hands it out. Nothing is validated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawGrade {
    pub subject: Option<String>,
    pub grade: Option<String>,
    pub out_of: Option<String>,
    pub date: Option<String>,
    pub comment: Option<String>,
    pub coefficient: Option<String>,
    pub is_bonus: bool,
}

#[async_trait]
pub trait PortalClient: Send + Sync {
    async fn authenticate(&self, portal: &PortalConfig) -> Result<Box<dyn PortalSession>, FetchError>;
}

/// A logged-in portal session.
///
/// `close` is infallible from the caller's point of view: a session that
/// cannot be released cleanly is logged and dropped.
#[async_trait]
pub trait PortalSession: Send {
    async fn list_children(&mut self) -> Result<Vec<ChildRef>, FetchError>;
    async fn grades_for(&mut self, child: &ChildRef) -> Result<Vec<RawGrade>, FetchError>;
    async fn close(&mut self);
}

/// Logs in, collects the grades of every child recorded during the last
/// `days` days, and releases the session whatever the outcome.
///
/// An account without children yields an empty set, not an error.
pub async fn fetch_grades(
    client: &dyn PortalClient,
    portal: &PortalConfig,
    days: u32,
    today: NaiveDate,
) -> Result<ChildReportSet, FetchError> {
    let mut session = client.authenticate(portal).await?;
    let result = collect(session.as_mut(), window_start(today, days)).await;
    session.close().await;

    if let Ok(set) = &result {
        info!("Fetched {} grade(s) across {} child(ren)", set.total_grades(), set.len());
    }
    result
}

/// First day of the look-back window ending on `today`. Saturates at the
/// earliest representable date instead of overflowing.
pub fn window_start(today: NaiveDate, days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}

async fn collect(session: &mut dyn PortalSession, cutoff: NaiveDate) -> Result<ChildReportSet, FetchError> {
    let children = session.list_children().await?;
    if children.is_empty() {
        warn!("The portal account has no linked child");
    }

    let mut set = ChildReportSet::new();
    for child in children {
        let raw = session.grades_for(&child).await?;
        let mut grades: Vec<GradeRecord> = raw
            .into_iter()
            .map(to_record)
            .filter(|g| g.date.map_or(true, |d| d >= cutoff))
            .collect();
        // Most recent first, undated grades last.
        grades.sort_by(|a, b| b.date.cmp(&a.date));
        if set.get(&child.name).is_some() {
            warn!(
                "Two children are named {}, only the grades of id {} are kept",
                child.name, child.id
            );
        }
        set.insert(child.name, grades);
    }
    Ok(set)
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// Dates come as ISO or as the French day/month/year forms.
pub fn parse_portal_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    ["%Y-%m-%d", "%d/%m/%y", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

// Converts an upstream grade into the record used by the report. Unreadable
// fields are dropped, the grade itself is always kept.
pub fn to_record(raw: RawGrade) -> GradeRecord {
    let date = raw.date.as_deref().and_then(|d| {
        let parsed = parse_portal_date(d);
        if parsed.is_none() && !d.trim().is_empty() {
            warn!("Unreadable grade date {:?}, keeping the grade undated", d);
        }
        parsed
    });

    GradeRecord {
        subject: non_empty(raw.subject).unwrap_or_default(),
        value: non_empty(raw.grade),
        max_value: non_empty(raw.out_of),
        date,
        comment: non_empty(raw.comment),
        coefficient: non_empty(raw.coefficient),
        is_bonus: raw.is_bonus,
    }
}
