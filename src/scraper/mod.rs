//! Crawl orchestration.
//!
//! A crawl runs five stages against the portal:
//!
//! 1. departments, from the selection page dropdown
//! 2. terms, from the same page
//! 3. courses and 4. professors, per department x term, from the schedule listing
//! 5. entries, per professor, from the instructor history page
//!
//! Stages 3 to 5 fan out over bounded parallel units. A unit that fails is
//! recorded in the [`ErrorSink`] and its siblings keep going; only a failure on
//! the department or term list stops the run.

pub mod errors;
pub mod history;
pub mod listing;

pub use errors::{Cause, ErrorSink, RowParseError, ScrapeError};

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use ulid::Ulid;

use crate::config::ScrapeConfig;
use crate::http::{Fetch, FetchError, PostBody};
use crate::models::names::first_name_for;
use crate::models::{Course, Department, Entry, Professor, Term};
use crate::page::{Page, PageShapeError, SelectOption};
use crate::reconcile::{Checkpoint, LookupKey, Reconciler};
use crate::utils::fmt_duration;
use listing::{ListedProfessor, Parsed};

/// Where the portal lives and how its pages are laid out.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Page carrying the department and term dropdowns.
    pub selection_url: String,
    /// Form target returning one department's schedule for one term.
    pub schedule_url: String,
    /// Instructor history page; `{n_number}` is replaced with the N-number.
    pub history_url: String,
    pub department_select: String,
    pub term_select: String,
    pub department_field: String,
    pub term_field: String,
    pub course_column: String,
    pub title_column: String,
    pub professor_column: String,
    /// First capture group is the N-number.
    pub instructor_pattern: String,
    pub history_table_selector: String,
    /// Column of the history page's first table holding the full name.
    pub instructor_column: String,
    /// Text the schedule page shows instead of a table when nothing is offered.
    pub empty_listing_text: String,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            selection_url: "https://banner.unf.edu/pls/nfpo/wksfwbs.p_dept_schd".into(),
            schedule_url: "https://banner.unf.edu/pls/nfpo/wksfwbs.p_dept_schd".into(),
            history_url: concat!(
                "https://banner.unf.edu/pls/nfpo/wksfwbs.p_instructor_isq_grade",
                "?pv_instructor={n_number}"
            )
            .into(),
            department_select: "select[name=pv_dept]".into(),
            term_select: "select[name=pv_term]".into(),
            department_field: "pv_dept".into(),
            term_field: "pv_term".into(),
            course_column: "Course".into(),
            title_column: "Title".into(),
            professor_column: "Professor".into(),
            instructor_pattern: r"pv_instructor=(N\d+)".into(),
            history_table_selector: "table.datadisplaytable".into(),
            instructor_column: "Instructor".into(),
            empty_listing_text: "No classes were found".into(),
        }
    }
}

/// What a crawl covers.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Re-fetch departments and terms even when some are already known.
    pub force: bool,
    /// Skip units recorded as complete by an earlier run.
    pub resume: bool,
    /// Only list the latest N known terms.
    pub recent_terms: Option<usize>,
    /// Only these departments; empty means all.
    pub departments: Vec<u32>,
    /// Stop after the listings.
    pub skip_entries: bool,
}

/// Records added by one crawl, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertedCounts {
    pub departments: usize,
    pub terms: usize,
    pub courses: usize,
    pub professors: usize,
    pub entries: usize,
}

impl InsertedCounts {
    fn of(reconciler: &Reconciler) -> Self {
        Self {
            departments: reconciler.departments().len(),
            terms: reconciler.terms().len(),
            courses: reconciler.courses().len(),
            professors: reconciler.professors().len(),
            entries: reconciler.entries().len(),
        }
    }

    fn since(self, before: Self) -> Self {
        Self {
            departments: self.departments.saturating_sub(before.departments),
            terms: self.terms.saturating_sub(before.terms),
            courses: self.courses.saturating_sub(before.courses),
            professors: self.professors.saturating_sub(before.professors),
            entries: self.entries.saturating_sub(before.entries),
        }
    }
}

/// Outcome of [`Scraper::run`].
#[derive(Debug)]
pub struct CrawlReport {
    pub run_id: Ulid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    /// The error that stopped the run early.
    pub fatal: Option<ScrapeError>,
    pub inserted: InsertedCounts,
    pub units_completed: usize,
    /// Units skipped because a checkpoint said they were done.
    pub units_skipped: usize,
    pub units_failed: usize,
    /// Every non-fatal error, in no particular order.
    pub errors: Vec<ScrapeError>,
}

impl CrawlReport {
    /// The run reached the end. Non-fatal errors do not count against it.
    pub fn success(&self) -> bool {
        self.fatal.is_none() && !self.cancelled
    }
}

/// A course listing and the professors teaching in it.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub courses: Vec<Arc<Course>>,
    pub professors: Vec<Arc<Professor>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
    Completed,
    Skipped,
    Failed,
    Cancelled,
}

#[derive(Debug, Default)]
struct Tally {
    completed: usize,
    skipped: usize,
    failed: usize,
}

impl Tally {
    fn add(&mut self, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Completed => self.completed += 1,
            UnitOutcome::Skipped => self.skipped += 1,
            UnitOutcome::Failed => self.failed += 1,
            UnitOutcome::Cancelled => {}
        }
    }
}

fn course_error(department_id: u32, term_id: u32, cause: impl Into<Cause>) -> ScrapeError {
    ScrapeError::Course {
        department_id,
        term_id,
        row: None,
        cause: cause.into(),
    }
}

fn professor_error(
    department_id: u32,
    term_id: u32,
    n_number: Option<&str>,
    cause: impl Into<Cause>,
) -> ScrapeError {
    ScrapeError::Professor {
        department_id,
        term_id,
        n_number: n_number.map(str::to_string),
        cause: cause.into(),
    }
}

fn entry_error(n_number: &str, row: Option<usize>, cause: impl Into<Cause>) -> ScrapeError {
    ScrapeError::Entry {
        n_number: n_number.to_string(),
        row,
        cause: cause.into(),
    }
}

fn dropdown(html: &str, selector: &str) -> Result<Vec<SelectOption>, PageShapeError> {
    Page::parse(html).find(selector)?.select_options()
}

pub struct Scraper {
    fetch: Arc<dyn Fetch>,
    reconciler: Arc<Reconciler>,
    portal: PortalConfig,
    config: ScrapeConfig,
    instructor_pattern: Regex,
    errors: ErrorSink,
    cancel: CancellationToken,
}

impl Scraper {
    pub fn new(
        fetch: Arc<dyn Fetch>,
        reconciler: Arc<Reconciler>,
        portal: PortalConfig,
        config: ScrapeConfig,
    ) -> Result<Self, regex::Error> {
        let instructor_pattern = Regex::new(&portal.instructor_pattern)?;
        Ok(Self {
            fetch,
            reconciler,
            portal,
            config,
            instructor_pattern,
            errors: ErrorSink::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Cancelling this token stops the crawl at the next unit boundary and
    /// abandons units in flight.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Errors recorded by stage calls made outside [`Scraper::run`].
    pub fn errors(&self) -> &ErrorSink {
        &self.errors
    }

    fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    fn history_url(&self, n_number: &str) -> String {
        self.portal
            .history_url
            .replace("{n_number}", &urlencoding::encode(n_number))
    }

    /// Retry transient failures with linear backoff. Gives up early on cancel.
    async fn with_retries<F, Fut>(&self, mut attempt: F) -> Result<String, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, FetchError>>,
    {
        let mut retry = 0;
        loop {
            match attempt().await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && retry < self.config.retries => {
                    retry += 1;
                    let delay = self.config.retry_backoff * retry;
                    warn!(
                        url = e.url(),
                        retry,
                        delay = fmt_duration(delay),
                        error = %e,
                        "Transient fetch failure, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(e),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get(&self, url: &str) -> Result<String, FetchError> {
        self.with_retries(|| self.fetch.get(url)).await
    }

    async fn schedule_page(&self, department_id: u32, term_id: u32) -> Result<String, FetchError> {
        let body = PostBody::form([
            (self.portal.department_field.as_str(), department_id.to_string()),
            (self.portal.term_field.as_str(), term_id.to_string()),
        ]);
        self.with_retries(|| self.fetch.post(&self.portal.schedule_url, &body))
            .await
    }

    /// Stage 1. Known departments are returned as-is unless `force` is set.
    pub async fn scrape_departments(
        &self,
        force: bool,
    ) -> Result<Vec<Arc<Department>>, ScrapeError> {
        let departments = self.reconciler.departments();
        if force || departments.is_empty() {
            let fail = |cause: Cause| ScrapeError::Department { cause };
            let html = self.get(&self.portal.selection_url).await.map_err(|e| fail(e.into()))?;
            let options =
                dropdown(&html, &self.portal.department_select).map_err(|e| fail(e.into()))?;

            let scraped = options.into_iter().filter_map(|option| match option.value.parse() {
                Ok(id) => Some(Department::new(id, option.text)),
                Err(_) => {
                    warn!(value = %option.value, "Skipping non-numeric department option");
                    None
                }
            });
            let inserted = self.reconciler.add_range(scraped).await.map_err(|e| fail(e.into()))?;
            info!(inserted, total = departments.len(), "Departments scraped");
        } else {
            debug!(known = departments.len(), "Departments already known, skipping");
        }
        Ok(departments.all().await)
    }

    /// Stage 2. Known terms are returned as-is unless `force` is set.
    pub async fn scrape_terms(&self, force: bool) -> Result<Vec<Arc<Term>>, ScrapeError> {
        let terms = self.reconciler.terms();
        if force || terms.is_empty() {
            let fail = |cause: Cause| ScrapeError::Term { cause };
            let html = self.get(&self.portal.selection_url).await.map_err(|e| fail(e.into()))?;
            let options = dropdown(&html, &self.portal.term_select).map_err(|e| fail(e.into()))?;

            let scraped = options.into_iter().filter_map(|option| match option.value.parse() {
                Ok(id) => Some(Term::new(id, option.text)),
                Err(_) => {
                    warn!(value = %option.value, "Skipping term option with a non-numeric id");
                    None
                }
            });
            let inserted = self.reconciler.add_range(scraped).await.map_err(|e| fail(e.into()))?;
            info!(inserted, total = terms.len(), "Terms scraped");
        } else {
            debug!(known = terms.len(), "Terms already known, skipping");
        }
        Ok(self.reconciler.terms_sorted().await)
    }

    /// Stage 3 for one department in one term: the distinct courses listed.
    pub async fn scrape_courses(
        &self,
        department_id: u32,
        term_id: u32,
    ) -> Result<Vec<Arc<Course>>, ScrapeError> {
        let html = self
            .schedule_page(department_id, term_id)
            .await
            .map_err(|e| course_error(department_id, term_id, e))?;
        self.courses_from_page(department_id, term_id, &html).await
    }

    /// Stage 4 for one department in one term: the instructors listed.
    pub async fn scrape_professors(
        &self,
        department_id: u32,
        term_id: u32,
    ) -> Result<Vec<Arc<Professor>>, ScrapeError> {
        let html = self
            .schedule_page(department_id, term_id)
            .await
            .map_err(|e| professor_error(department_id, term_id, None, e))?;
        self.professors_from_page(department_id, term_id, &html).await
    }

    /// Stages 3 and 4 from a single fetch of the schedule page.
    pub async fn scrape_listing(
        &self,
        department_id: u32,
        term_id: u32,
    ) -> Result<Listing, ScrapeError> {
        let html = self
            .schedule_page(department_id, term_id)
            .await
            .map_err(|e| course_error(department_id, term_id, e))?;

        let courses = self.courses_from_page(department_id, term_id, &html).await;
        let professors = self.professors_from_page(department_id, term_id, &html).await;
        match (courses, professors) {
            (Ok(courses), Ok(professors)) => Ok(Listing {
                courses,
                professors,
            }),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(other)) => {
                self.errors.record(other);
                Err(e)
            }
        }
    }

    fn is_empty_listing(&self, html: &str) -> bool {
        !self.portal.empty_listing_text.is_empty() && html.contains(&self.portal.empty_listing_text)
    }

    async fn courses_from_page(
        &self,
        department_id: u32,
        term_id: u32,
        html: &str,
    ) -> Result<Vec<Arc<Course>>, ScrapeError> {
        if self.is_empty_listing(html) {
            debug!(department_id, term_id, "Nothing offered");
            return Ok(Vec::new());
        }
        let parsed = listing::parse_courses(html, &self.portal)
            .map_err(|e| course_error(department_id, term_id, e))?;
        for failure in parsed.failures {
            self.errors.record(ScrapeError::Course {
                department_id,
                term_id,
                row: Some(failure.row),
                cause: failure.cause,
            });
        }

        let rows: Vec<(String, String)> = parsed
            .items
            .into_iter()
            .map(|course| (course.code, course.title))
            .collect();
        let merged = self
            .reconciler
            .merge_listing(department_id, term_id, &rows)
            .await;
        self.reconciler
            .flush()
            .await
            .map_err(|e| course_error(department_id, term_id, e))?;

        let mut seen = HashSet::new();
        Ok(merged
            .into_iter()
            .map(|m| m.course)
            .filter(|course| seen.insert(course.id))
            .collect())
    }

    async fn professors_from_page(
        &self,
        department_id: u32,
        term_id: u32,
        html: &str,
    ) -> Result<Vec<Arc<Professor>>, ScrapeError> {
        if self.is_empty_listing(html) {
            return Ok(Vec::new());
        }
        let Parsed { items, failures } =
            listing::parse_professors(html, &self.portal, &self.instructor_pattern)
                .map_err(|e| professor_error(department_id, term_id, None, e))?;
        for failure in failures {
            self.errors.record(professor_error(
                department_id,
                term_id,
                failure.n_number.as_deref(),
                failure.cause,
            ));
        }

        let mut resolved = stream::iter(items)
            .map(|listed| self.reconcile_professor(department_id, term_id, listed))
            .buffer_unordered(self.concurrency());

        let mut professors = Vec::new();
        while let Some(result) = resolved.next().await {
            match result {
                Ok(professor) => professors.push(professor),
                Err(e) => self.errors.record(e),
            }
        }
        self.reconciler
            .flush()
            .await
            .map_err(|e| professor_error(department_id, term_id, None, e))?;
        Ok(professors)
    }

    /// Known professors are returned directly. New ones need their history
    /// page for a first name, since the listing only shows the last name.
    async fn reconcile_professor(
        &self,
        department_id: u32,
        term_id: u32,
        listed: ListedProfessor,
    ) -> Result<Arc<Professor>, ScrapeError> {
        let key = LookupKey::NNumber(listed.n_number.clone());
        if let Some(known) = self.reconciler.professors().get_in(&department_id, &key).await {
            return Ok(known);
        }

        let ListedProfessor {
            last_name, n_number, ..
        } = listed;
        let fail = |cause: Cause| professor_error(department_id, term_id, Some(&n_number), cause);
        let html = self
            .get(&self.history_url(&n_number))
            .await
            .map_err(|e| fail(e.into()))?;
        let first_name = match listing::instructor_name(&html, &self.portal) {
            Ok(Some(full)) => first_name_for(&full, &last_name).unwrap_or_default(),
            Ok(None) => {
                warn!(n_number = %n_number, "History page shows no instructor name");
                String::new()
            }
            Err(e) => return Err(fail(e.into())),
        };

        let upsert = self
            .reconciler
            .add(Professor::new(department_id, first_name, last_name, n_number))
            .await;
        if upsert.inserted() {
            let professor = upsert.get();
            debug!(
                name = %professor.display_name(),
                n_number = %professor.n_number,
                "New professor"
            );
        }
        Ok(upsert.into_inner())
    }

    /// Stage 5 for one professor. Returns the number of new entries.
    pub async fn scrape_entries(&self, professor: &Professor) -> Result<usize, ScrapeError> {
        let n_number = professor.n_number.as_str();
        let html = self
            .get(&self.history_url(n_number))
            .await
            .map_err(|e| entry_error(n_number, None, e))?;
        let parsed = history::parse_history(&html, &self.portal)
            .map_err(|e| entry_error(n_number, None, e))?;
        for failure in parsed.failures {
            self.errors
                .record(entry_error(n_number, Some(failure.row), failure.cause));
        }

        let mut entries = Vec::with_capacity(parsed.items.len());
        for row in parsed.items {
            let term_id = match self.resolve_term(&row.term).await {
                Ok(id) => id,
                Err(cause) => {
                    self.errors.record(entry_error(n_number, None, cause));
                    continue;
                }
            };
            let resolved = self.reconciler.resolve_course(&row.course_code, term_id).await;
            let Some(course) = resolved else {
                self.errors.record(entry_error(
                    n_number,
                    None,
                    Cause::UnknownCourse {
                        code: row.course_code,
                        term_id,
                    },
                ));
                continue;
            };

            entries.push(Entry {
                course_id: course.id,
                professor_id: professor.id,
                term_id,
                crn: row.crn,
                enrolled: row.enrolled,
                responded: row.responded,
                ratings: row.ratings,
                grades: row.grades,
                mean_gpa: row.mean_gpa,
            });
        }

        self.reconciler
            .add_range(entries)
            .await
            .map_err(|e| entry_error(n_number, None, e))
    }

    /// Term id for a display name, adding the term when the dropdown never
    /// listed it.
    async fn resolve_term(&self, name: &str) -> Result<u32, Cause> {
        let key = LookupKey::Name(name.to_string());
        if let Some(term) = self.reconciler.terms().get(&key).await {
            return Ok(term.id);
        }
        let term = Term::parse(name).ok_or_else(|| Cause::UnknownTerm {
            name: name.to_string(),
        })?;
        Ok(self.reconciler.add(term).await.get().id)
    }

    /// `None` when cancelled before or during `work`.
    async fn until_cancelled<T>(&self, work: impl Future<Output = T>) -> Option<T> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = work => Some(out),
        }
    }

    async fn checkpoint(&self, checkpoint: Checkpoint) -> UnitOutcome {
        if let Err(e) = self.reconciler.complete(checkpoint).await {
            warn!(checkpoint = ?checkpoint, error = %e, "Checkpoint not persisted yet");
        }
        UnitOutcome::Completed
    }

    async fn listing_unit(&self, department_id: u32, term_id: u32, resume: bool) -> UnitOutcome {
        let checkpoint = Checkpoint::Listing {
            department_id,
            term_id,
        };
        if resume && self.reconciler.is_complete(&checkpoint) {
            return UnitOutcome::Skipped;
        }

        let span = info_span!("listing", department_id, term_id);
        let work = self.scrape_listing(department_id, term_id);
        match self.until_cancelled(work).instrument(span).await {
            None => UnitOutcome::Cancelled,
            Some(Ok(listing)) => {
                debug!(
                    department_id,
                    term_id,
                    courses = listing.courses.len(),
                    professors = listing.professors.len(),
                    "Listing scraped"
                );
                self.checkpoint(checkpoint).await
            }
            Some(Err(e)) => {
                self.errors.record(e);
                UnitOutcome::Failed
            }
        }
    }

    async fn history_unit(&self, professor: Arc<Professor>, resume: bool) -> UnitOutcome {
        let checkpoint = Checkpoint::History {
            professor_id: professor.id,
        };
        if resume && self.reconciler.is_complete(&checkpoint) {
            return UnitOutcome::Skipped;
        }

        let span = info_span!(
            "history",
            professor_id = professor.id,
            n_number = %professor.n_number
        );
        match self.until_cancelled(self.scrape_entries(&professor)).instrument(span).await {
            None => UnitOutcome::Cancelled,
            Some(Ok(inserted)) => {
                debug!(n_number = %professor.n_number, inserted, "History scraped");
                self.checkpoint(checkpoint).await
            }
            Some(Err(e)) => {
                self.errors.record(e);
                UnitOutcome::Failed
            }
        }
    }

    /// Run every stage. Never fails: the report carries the fatal error, if
    /// any, and every non-fatal one.
    pub async fn run(&self, options: RunOptions) -> CrawlReport {
        let run_id = Ulid::new();
        let span = info_span!("crawl", run_id = %run_id);
        self.crawl(run_id, options).instrument(span).await
    }

    async fn crawl(&self, run_id: Ulid, options: RunOptions) -> CrawlReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let before = InsertedCounts::of(&self.reconciler);
        info!(
            force = options.force,
            resume = options.resume,
            recent_terms = ?options.recent_terms,
            "Crawl started"
        );

        let mut tally = Tally::default();
        let fatal = self.stages(&options, &mut tally).await.err();
        if let Err(e) = self.reconciler.flush().await {
            warn!(error = %e, "Final flush failed");
        }

        let report = CrawlReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            cancelled: self.cancel.is_cancelled(),
            fatal,
            inserted: InsertedCounts::of(&self.reconciler).since(before),
            units_completed: tally.completed,
            units_skipped: tally.skipped,
            units_failed: tally.failed,
            errors: self.errors.drain(),
        };
        info!(
            success = report.success(),
            cancelled = report.cancelled,
            completed = report.units_completed,
            skipped = report.units_skipped,
            failed = report.units_failed,
            errors = report.errors.len(),
            inserted = ?report.inserted,
            duration = fmt_duration(start.elapsed()),
            "Crawl finished"
        );
        report
    }

    async fn stages(&self, options: &RunOptions, tally: &mut Tally) -> Result<(), ScrapeError> {
        let mut departments = self.scrape_departments(options.force).await?;
        let terms = self.scrape_terms(options.force).await?;
        let terms = match options.recent_terms {
            Some(count) => self.reconciler.recent_terms(count).await,
            None => terms,
        };

        if !options.departments.is_empty() {
            departments.retain(|d| options.departments.contains(&d.id));
            if departments.len() < options.departments.len() {
                warn!(
                    requested = ?options.departments,
                    found = departments.len(),
                    "Some requested departments are unknown"
                );
            }
        }
        departments.sort_by_key(|d| d.id);
        let department_ids: HashSet<u32> = departments.iter().map(|d| d.id).collect();

        let units: Vec<(u32, u32)> = departments
            .iter()
            .flat_map(|d| terms.iter().map(move |t| (d.id, t.id)))
            .collect();
        info!(
            departments = departments.len(),
            terms = terms.len(),
            units = units.len(),
            "Scraping listings"
        );
        let stage_start = Instant::now();
        let mut listings = stream::iter(units)
            .map(|(department_id, term_id)| {
                self.listing_unit(department_id, term_id, options.resume)
            })
            .buffer_unordered(self.concurrency());
        while let Some(outcome) = listings.next().await {
            tally.add(outcome);
        }
        log_stage("listings", stage_start.elapsed(), tally);

        if options.skip_entries || self.cancel.is_cancelled() {
            return Ok(());
        }

        let professors = history_owners(self.reconciler.professors().all().await, &department_ids);
        info!(professors = professors.len(), "Scraping entry histories");

        let stage_start = Instant::now();
        let mut histories = stream::iter(professors)
            .map(|professor| self.history_unit(professor, options.resume))
            .buffer_unordered(self.concurrency());
        while let Some(outcome) = histories.next().await {
            tally.add(outcome);
        }
        log_stage("histories", stage_start.elapsed(), tally);
        Ok(())
    }
}

/// One record per N-number that teaches in `department_ids`, lowest id first.
///
/// A person listed in several departments has one record in each but a single
/// history page, which is scraped once and credited to their lowest-id record.
fn history_owners(
    mut professors: Vec<Arc<Professor>>,
    department_ids: &HashSet<u32>,
) -> Vec<Arc<Professor>> {
    let selected: HashSet<String> = professors
        .iter()
        .filter(|p| department_ids.contains(&p.department_id))
        .map(|p| p.n_number.clone())
        .collect();
    professors.sort_by_key(|p| p.id);

    let mut seen = HashSet::new();
    professors
        .into_iter()
        .filter(|p| selected.contains(&p.n_number) && seen.insert(p.n_number.clone()))
        .collect()
}

fn log_stage(stage: &str, elapsed: Duration, tally: &Tally) {
    info!(
        stage,
        completed = tally.completed,
        skipped = tally.skipped,
        failed = tally.failed,
        duration = fmt_duration(elapsed),
        "Stage finished"
    );
}
