use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

pub const TERM_COUNT: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holiday {
    pub name: String,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Term {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub holidays: Vec<Holiday>,
}

impl Term {
    pub fn empty(id: i64) -> Self {
        Term {
            id,
            name: format!("Term {}", id),
            start_date: None,
            end_date: None,
            holidays: Vec::new(),
        }
    }
}

fn default_status() -> String {
    "planned".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: i64,
    pub term: i64,
    pub subject: String,
    pub grade: String,
    pub assessment_date: NaiveDate,
    #[serde(default)]
    pub moderation_date: Option<NaiveDate>,
    #[serde(default)]
    pub total_marks: Option<i64>,
    #[serde(default)]
    pub target_percentage: Option<i64>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub topics: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
}

/// The whole planning aggregate for one teacher: four terms plus every
/// assessment they own. Loaded wholesale, rewritten wholesale on save.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerDoc {
    #[serde(default)]
    pub terms: Vec<Term>,
    #[serde(default)]
    pub assessments: Vec<Assessment>,
}

impl PlannerDoc {
    pub fn seeded() -> Self {
        PlannerDoc {
            terms: (1..=TERM_COUNT as i64).map(Term::empty).collect(),
            assessments: Vec::new(),
        }
    }

    /// Repair a document read back from storage: terms 1..=4 exist exactly
    /// once, in order. Historical documents may have gaps or strays.
    pub fn normalize(&mut self) {
        self.terms.retain(|t| (1..=TERM_COUNT as i64).contains(&t.id));
        for id in 1..=TERM_COUNT as i64 {
            if !self.terms.iter().any(|t| t.id == id) {
                self.terms.push(Term::empty(id));
            }
        }
        self.terms.sort_by_key(|t| t.id);
        self.terms.dedup_by_key(|t| t.id);
    }

    pub fn term(&self, id: i64) -> Option<&Term> {
        self.terms.iter().find(|t| t.id == id)
    }

    pub fn term_mut(&mut self, id: i64) -> Option<&mut Term> {
        self.terms.iter_mut().find(|t| t.id == id)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Term dates are not set. Please set them in the School Calendar.")]
    TermDatesNotSet { term: i64 },
    #[error("not enough free weekdays in term {term}: requested {requested}, available {available}")]
    InsufficientCapacity {
        term: i64,
        requested: usize,
        available: usize,
    },
    #[error("No available weekdays found in this term.")]
    NoAvailableWeekday { term: i64 },
    #[error("term {0} does not exist")]
    UnknownTerm(i64),
}

impl ScheduleError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::TermDatesNotSet { .. } => "term_dates_not_set",
            Self::InsufficientCapacity { .. } => "insufficient_capacity",
            Self::NoAvailableWeekday { .. } => "no_available_weekday",
            Self::UnknownTerm(_) => "not_found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    OutsideTerm,
    Holiday(String),
}

impl Conflict {
    pub fn message(&self) -> String {
        match self {
            Conflict::OutsideTerm => "Outside term dates".to_string(),
            Conflict::Holiday(name) => format!("Holiday: {}", name),
        }
    }
}

fn is_weekday(d: NaiveDate) -> bool {
    !matches!(d.weekday(), Weekday::Sat | Weekday::Sun)
}

fn term_bounds(term: &Term) -> Result<(NaiveDate, NaiveDate), ScheduleError> {
    match (term.start_date, term.end_date) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(ScheduleError::TermDatesNotSet { term: term.id }),
    }
}

/// Every date covered by any holiday range, across all terms. Ranges are
/// inclusive at both ends; a holiday missing either end reserves nothing.
pub fn holiday_dates(terms: &[Term]) -> HashSet<NaiveDate> {
    let mut out = HashSet::new();
    for term in terms {
        for h in &term.holidays {
            let (Some(start), Some(end)) = (h.start, h.end) else {
                continue;
            };
            let mut d = start;
            while d <= end {
                out.insert(d);
                d = d + Duration::days(1);
            }
        }
    }
    out
}

/// Chronological Mon-Fri dates inside the term bounds, minus reserved dates.
/// Recomputed fresh per call.
pub fn available_weekdays(
    term: &Term,
    reserved: &HashSet<NaiveDate>,
) -> Result<Vec<NaiveDate>, ScheduleError> {
    let (start, end) = term_bounds(term)?;
    let mut out = Vec::new();
    let mut d = start;
    while d <= end {
        if is_weekday(d) && !reserved.contains(&d) {
            out.push(d);
        }
        d = d + Duration::days(1);
    }
    Ok(out)
}

/// Stride selection: step = floor(available / requested), picks indices
/// 0, step, 2*step, ... The last selectable index is (requested-1)*step, which
/// can leave the tail of the term uncovered when available is not an exact
/// multiple of requested. That asymmetry is the historical behaviour and is
/// kept as-is.
pub fn plan_term(
    term_id: i64,
    available: &[NaiveDate],
    requested: usize,
) -> Result<Vec<NaiveDate>, ScheduleError> {
    if requested == 0 {
        return Ok(Vec::new());
    }
    if available.len() < requested {
        return Err(ScheduleError::InsufficientCapacity {
            term: term_id,
            requested,
            available: available.len(),
        });
    }
    let step = available.len() / requested;
    Ok((0..requested).map(|i| available[i * step]).collect())
}

/// Pure function of its inputs: same date and term always yield the same
/// answer. A term with unset bounds cannot place a date outside them.
pub fn check_date_conflict(date: NaiveDate, term: &Term) -> Option<Conflict> {
    if let (Some(start), Some(end)) = (term.start_date, term.end_date) {
        if date < start || date > end {
            return Some(Conflict::OutsideTerm);
        }
    }
    for h in &term.holidays {
        let (Some(hs), Some(he)) = (h.start, h.end) else {
            continue;
        };
        if date >= hs && date <= he {
            return Some(Conflict::Holiday(h.name.clone()));
        }
    }
    None
}

/// Day-by-day forward scan for a single free slot. Starts the day after the
/// latest assessment already scheduled in the term (term start when none),
/// skipping weekends, every term's holidays, and every booked assessment date.
pub fn find_next_available_date(doc: &PlannerDoc, term_id: i64) -> Result<NaiveDate, ScheduleError> {
    let term = doc
        .term(term_id)
        .ok_or(ScheduleError::UnknownTerm(term_id))?;
    let (start, end) = term_bounds(term)?;

    let mut reserved = holiday_dates(&doc.terms);
    for a in &doc.assessments {
        reserved.insert(a.assessment_date);
    }

    let latest = doc
        .assessments
        .iter()
        .filter(|a| a.term == term_id)
        .map(|a| a.assessment_date)
        .max();
    let mut d = match latest {
        Some(latest) => latest + Duration::days(1),
        None => start,
    };
    while d <= end {
        if is_weekday(d) && !reserved.contains(&d) {
            return Ok(d);
        }
        d = d + Duration::days(1);
    }
    Err(ScheduleError::NoAvailableWeekday { term: term_id })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedTerm {
    pub term: i64,
    pub requested: usize,
    pub available: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct PlanOutcome {
    pub scheduled: Vec<Assessment>,
    pub skipped: Vec<SkippedTerm>,
}

/// Destructive replan of one subject/grade programme across all four terms.
///
/// The reserved snapshot (every term's holidays plus the dates of the outgoing
/// programme) is taken before the old assessments are discarded, so a replan
/// never lands on a date the previous plan held. Terms run independently in
/// order 1..=4; a term that cannot be planned is skipped and reported, never
/// fatal. Ids are `id_base + offset` so one creation event stays unique.
pub fn plan_programme(
    doc: &mut PlannerDoc,
    subject: &str,
    grade: &str,
    counts: &[usize; TERM_COUNT],
    id_base: i64,
    status: &str,
) -> PlanOutcome {
    let mut reserved = holiday_dates(&doc.terms);
    for a in &doc.assessments {
        if a.subject == subject && a.grade == grade {
            reserved.insert(a.assessment_date);
        }
    }
    doc.assessments
        .retain(|a| !(a.subject == subject && a.grade == grade));

    let mut outcome = PlanOutcome::default();
    let mut next_id = id_base;
    for idx in 0..TERM_COUNT {
        let term_id = (idx + 1) as i64;
        let requested = counts[idx];
        if requested == 0 {
            continue;
        }
        let Some(term) = doc.term(term_id) else {
            continue;
        };
        let available = match available_weekdays(term, &reserved) {
            Ok(v) => v,
            Err(e) => {
                warn!(term = term_id, "auto-plan skipped term: {}", e);
                outcome.skipped.push(SkippedTerm {
                    term: term_id,
                    requested,
                    available: 0,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let dates = match plan_term(term_id, &available, requested) {
            Ok(v) => v,
            Err(e) => {
                warn!(term = term_id, "auto-plan skipped term: {}", e);
                outcome.skipped.push(SkippedTerm {
                    term: term_id,
                    requested,
                    available: available.len(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        for date in dates {
            let assessment = Assessment {
                id: next_id,
                term: term_id,
                subject: subject.to_string(),
                grade: grade.to_string(),
                assessment_date: date,
                moderation_date: None,
                total_marks: None,
                target_percentage: None,
                duration: None,
                topics: None,
                status: status.to_string(),
            };
            next_id += 1;
            doc.assessments.push(assessment.clone());
            outcome.scheduled.push(assessment);
        }
    }
    outcome
}
