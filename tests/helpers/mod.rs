//! Shared fixtures for integration tests: a canned portal and page builders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use isq::config::ScrapeConfig;
use isq::http::{Fetch, FetchError, PostBody};
use isq::reconcile::{MemoryStore, Reconciler, Snapshot};
use isq::scraper::{PortalConfig, Scraper};

pub const SELECTION_URL: &str = "http://portal.test/select";
pub const SCHEDULE_URL: &str = "http://portal.test/schedule";
pub const HISTORY_URL: &str = "http://portal.test/history?pv_instructor={n_number}";

pub fn portal() -> PortalConfig {
    PortalConfig {
        selection_url: SELECTION_URL.into(),
        schedule_url: SCHEDULE_URL.into(),
        history_url: HISTORY_URL.into(),
        ..PortalConfig::default()
    }
}

pub fn scrape_config() -> ScrapeConfig {
    ScrapeConfig {
        concurrency: 4,
        retries: 2,
        retry_backoff: Duration::from_millis(5),
    }
}

/// Request key for a schedule listing POST.
pub fn schedule_key(department_id: u32, term_id: u32) -> String {
    let body = PostBody::form([
        ("pv_dept", department_id.to_string()),
        ("pv_term", term_id.to_string()),
    ]);
    format!("{SCHEDULE_URL}?{}", body.serialize())
}

pub fn history_key(n_number: &str) -> String {
    HISTORY_URL.replace("{n_number}", n_number)
}

pub fn fixture(name: &str) -> String {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/");
    std::fs::read_to_string(format!("{path}{name}"))
        .unwrap_or_else(|e| panic!("fixture {name}: {e}"))
}

#[derive(Clone)]
enum Canned {
    Page(String),
    Status(u16),
    /// Fail with this status `n` times, then serve the page.
    Flaky(u16, usize, String),
}

/// In-memory portal. GET requests are keyed by URL, POSTs by `url?payload`.
/// Unknown keys answer 404.
#[derive(Default)]
pub struct FakeFetcher {
    routes: Mutex<HashMap<String, Canned>>,
    requests: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn page(self, key: impl Into<String>, html: impl Into<String>) -> Self {
        self.set(key, Canned::Page(html.into()));
        self
    }

    pub fn status(self, key: impl Into<String>, status: u16) -> Self {
        self.set(key, Canned::Status(status));
        self
    }

    pub fn flaky(
        self,
        key: impl Into<String>,
        status: u16,
        failures: usize,
        html: impl Into<String>,
    ) -> Self {
        self.set(key, Canned::Flaky(status, failures, html.into()));
        self
    }

    pub fn set_page(&self, key: impl Into<String>, html: impl Into<String>) {
        self.set(key, Canned::Page(html.into()));
    }

    fn set(&self, key: impl Into<String>, canned: Canned) {
        self.routes.lock().unwrap().insert(key.into(), canned);
    }

    /// Every request made so far, as keys.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, key: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|k| *k == key).count()
    }

    async fn respond(&self, key: String, url: &str) -> Result<String, FetchError> {
        self.requests.lock().unwrap().push(key.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let canned = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&key) {
                Some(Canned::Flaky(status, failures, html)) if *failures > 0 => {
                    *failures -= 1;
                    Canned::Status(*status)
                }
                Some(Canned::Flaky(_, _, html)) => Canned::Page(html.clone()),
                Some(other) => other.clone(),
                None => Canned::Status(404),
            }
        };
        match canned {
            Canned::Page(html) => Ok(html),
            Canned::Status(status) | Canned::Flaky(status, ..) => Err(FetchError::Status {
                url: url.to_string(),
                status,
            }),
        }
    }
}

#[async_trait]
impl Fetch for FakeFetcher {
    async fn get(&self, url: &str) -> Result<String, FetchError> {
        self.respond(url.to_string(), url).await
    }

    async fn post(&self, url: &str, body: &PostBody) -> Result<String, FetchError> {
        self.respond(format!("{url}?{}", body.serialize()), url).await
    }
}

pub struct Harness {
    pub fetch: Arc<FakeFetcher>,
    pub store: Arc<MemoryStore>,
    pub reconciler: Arc<Reconciler>,
    pub scraper: Scraper,
}

pub async fn harness(fetch: FakeFetcher) -> Harness {
    harness_with(fetch, Arc::new(MemoryStore::new())).await
}

/// A scraper over `fetch` whose reconciler is hydrated from `store`.
pub async fn harness_with(fetch: FakeFetcher, store: Arc<MemoryStore>) -> Harness {
    let fetch = Arc::new(fetch);
    let reconciler = Arc::new(Reconciler::load(store.clone()).await.unwrap());
    let scraper =
        Scraper::new(fetch.clone(), reconciler.clone(), portal(), scrape_config()).unwrap();
    Harness {
        fetch,
        store,
        reconciler,
        scraper,
    }
}

pub async fn stored(store: &MemoryStore) -> Snapshot {
    store.snapshot().await
}

/// Selection page with department and term dropdowns.
pub fn selection_page(departments: &[(u32, &str)], terms: &[(u32, &str)]) -> String {
    let options = |items: &[(u32, &str)]| {
        items
            .iter()
            .map(|(id, name)| format!(r#"<option value="{id}">{name}</option>"#))
            .collect::<String>()
    };
    format!(
        r#"<html><body><form action="schedule" method="post">
        <select name="pv_term"><option value="">Select a term</option>{}</select>
        <select name="pv_dept"><option value="%">All</option>{}</select>
        </form></body></html>"#,
        options(terms),
        options(departments)
    )
}

/// One section of a schedule listing.
pub struct Section<'a> {
    pub crn: u32,
    /// Raw HTML of the course cell.
    pub course: String,
    pub title: &'a str,
    /// Raw HTML of the professor cell.
    pub professor: String,
}

impl<'a> Section<'a> {
    pub fn new(crn: u32, code: &str, title: &'a str, professor: Option<(&str, &str)>) -> Self {
        Self {
            crn,
            course: course_link(code),
            title,
            professor: professor
                .map(|(name, n_number)| professor_link(name, n_number))
                .unwrap_or_else(|| "TBA".into()),
        }
    }
}

pub fn course_link(code: &str) -> String {
    format!(r#"<a href="/catalog?course={code}">{code}</a>"#)
}

pub fn professor_link(name: &str, n_number: &str) -> String {
    format!(r#"<a href="/isq?pv_instructor={n_number}">{name}</a>"#)
}

pub fn schedule_page(sections: &[Section<'_>]) -> String {
    let rows: String = sections
        .iter()
        .map(|s| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>3</td><td>{}</td></tr>",
                s.crn, s.course, s.title, s.professor
            )
        })
        .collect();
    format!(
        r#"<html><body>
        <table class="plaintable"><tr><td>Schedule of classes</td></tr></table>
        <table class="datadisplaytable">
          <tr><th>CRN</th><th>Course</th><th>Title</th><th>Credits</th><th>Professor</th></tr>
          {rows}
        </table></body></html>"#
    )
}

/// Ratings and grades for one section of a history page.
pub struct Evaluation<'a> {
    pub term: &'a str,
    pub crn: u32,
    pub code: &'a str,
    pub enrolled: &'a str,
    pub responded: u32,
    pub excellent: f32,
    pub mean_gpa: &'a str,
}

impl<'a> Evaluation<'a> {
    pub fn new(term: &'a str, crn: u32, code: &'a str) -> Self {
        Self {
            term,
            crn,
            code,
            enrolled: "30",
            responded: 15,
            excellent: 40.0,
            mean_gpa: "3.05",
        }
    }
}

fn info_table(heading: &str, value: &str) -> String {
    format!(
        "<table class=\"datadisplaytable\">\
         <tr><th>{heading}</th></tr><tr><td>{value}</td></tr>\
         </table>"
    )
}

/// History page with the six `datadisplaytable`s the portal renders.
pub fn history_page(instructor: &str, evaluations: &[Evaluation<'_>]) -> String {
    let ratings: String = evaluations
        .iter()
        .map(|e| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>0{}</td><td>{}</td><td>{}</td>\
                 <td>{:.1}%</td><td>30.0%</td><td>20.0%</td>\
                 <td>5.0%</td><td>5.0%</td><td>0.0%</td></tr>",
                e.term, e.crn, e.code, e.crn, e.enrolled, e.responded, e.excellent
            )
        })
        .collect();
    let grades: String = evaluations
        .iter()
        .map(|e| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>35.0</td><td>10.0</td><td>10.0</td>\
                 <td>10.0</td><td>5.0</td><td>5.0</td><td>10.0</td><td>5.0</td><td>5.0</td>\
                 <td>5.0</td><td>{}</td></tr>",
                e.term, e.crn, e.code, e.mean_gpa
            )
        })
        .collect();

    format!(
        r#"<html><body>
        <table class="datadisplaytable">
          <tr><th>Instructor</th><th>Department</th></tr>
          <tr><td>{instructor}</td><td>Computing</td></tr>
        </table>
        {summary}
        {legend}
        <table class="datadisplaytable">
          <tr><th colspan="6">Section</th><th colspan="6">Ratings</th></tr>
          <tr><th>Term</th><th>CRN</th><th>Course</th><th>Course ID</th>
              <th>Number Enrolled</th><th>Number Responded</th>
              <th>Excellent (5)</th><th>Very Good (4)</th><th>Good (3)</th>
              <th>Fair (2)</th><th>Poor (1)</th><th>NR/NA</th></tr>
          {ratings}
        </table>
        {grade_legend}
        <table class="datadisplaytable">
          <tr><th>Term</th><th>CRN</th><th>Course</th><th>A</th><th>A-</th><th>B+</th>
              <th>B</th><th>B-</th><th>C+</th><th>C</th><th>D</th><th>F</th>
              <th>Withdraw</th><th>Mean GPA</th></tr>
          {grades}
        </table>
        </body></html>"#,
        summary = info_table("Sections evaluated", &evaluations.len().to_string()),
        legend = info_table("Scale", "5 = Excellent, 1 = Poor"),
        grade_legend = info_table("Grades", "Percent of enrolled students"),
    )
}
