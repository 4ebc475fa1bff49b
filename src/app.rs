use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use isq::cli::Command;
use isq::config::Config;
use isq::http::FetchClient;
use isq::http::rate_limit::per_host_factory;
use isq::models::{Course, Term};
use isq::reconcile::{JsonStore, LookupKey, Reconciler, Store};
use isq::scraper::{CrawlReport, Scraper};
use tracing::{error, info, warn};

/// Errors listed individually at the end of a crawl; the rest are counted.
const REPORTED_ERRORS: usize = 25;

/// Exit code for a crawl stopped by Ctrl-C.
const INTERRUPTED: u8 = 130;

/// Main application struct wiring the store, client and scraper together.
pub struct App {
    reconciler: Arc<Reconciler>,
    scraper: Scraper,
}

impl App {
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let store: Arc<dyn Store> = Arc::new(JsonStore::new(&config.data_path));
        let reconciler = Reconciler::load(store)
            .await
            .with_context(|| format!("Failed to load {}", config.data_path.display()))?;
        let reconciler = Arc::new(reconciler);

        let fetch = FetchClient::new(&config.http, per_host_factory(config.rate_limiting.clone()))
            .context("Failed to create HTTP client")?;
        info!(
            user_agent = %config.http.user_agent,
            max_concurrent = config.rate_limiting.max_concurrent,
            cache = config.http.cache_responses,
            "HTTP client ready"
        );

        let scraper = Scraper::new(
            Arc::new(fetch),
            Arc::clone(&reconciler),
            config.portal,
            config.scrape,
        )
        .context("Invalid instructor pattern")?;

        Ok(Self {
            reconciler,
            scraper,
        })
    }

    /// Run one command to completion and flush the store.
    pub async fn run(self, command: Command) -> ExitCode {
        let code = match &command {
            Command::Crawl { .. } => match command.run_options() {
                Some(options) => self.crawl(options).await,
                None => ExitCode::FAILURE,
            },
            Command::Courses { department, term } => {
                self.print_courses(*department, *term).await;
                ExitCode::SUCCESS
            }
            Command::Entries { n_number } => self.print_entries(n_number).await,
        };

        if let Err(e) = self.reconciler.close().await {
            error!(error = ?e, "Failed to persist data on shutdown");
            return ExitCode::FAILURE;
        }
        code
    }

    async fn crawl(&self, options: isq::scraper::RunOptions) -> ExitCode {
        let token = self.scraper.cancellation_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling crawl");
                token.cancel();
            }
        });

        let report = self.scraper.run(options).await;
        interrupt.abort();
        log_report(&report);

        if report.cancelled {
            ExitCode::from(INTERRUPTED)
        } else if report.success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }

    async fn print_courses(&self, department_id: u32, term_id: u32) {
        let courses = self.reconciler.department_courses(department_id, term_id).await;
        if courses.is_empty() {
            warn!(department_id, term_id, "No stored courses");
        }
        for course in courses {
            println!("{}", course_line(&course, term_id));
        }
    }

    async fn print_entries(&self, n_number: &str) -> ExitCode {
        let Some(professor) = self.reconciler.professor_by_n_number(n_number).await else {
            warn!(n_number, "No stored professor with this N-number");
            return ExitCode::FAILURE;
        };
        println!("{} ({})", professor.display_name(), professor.n_number);

        for entry in self.reconciler.entries_for_n_number(n_number).await {
            let term = self
                .reconciler
                .terms()
                .get(&LookupKey::Id(u64::from(entry.term_id)))
                .await
                .map(|t| t.name.clone())
                .unwrap_or_else(|| fallback_term_name(entry.term_id));
            let course = self
                .reconciler
                .courses()
                .get(&LookupKey::Id(entry.course_id))
                .await
                .map(|c| c.code_as_of(entry.term_id).to_string())
                .unwrap_or_default();
            let rate = entry
                .response_rate()
                .map(|r| format!("{:.0}%", r * 100.0))
                .unwrap_or_else(|| "-".into());
            let gpa = entry
                .mean_gpa
                .map(|g| format!("{g:.2}"))
                .unwrap_or_else(|| "-".into());
            println!(
                "{term}\t{course}\tCRN {}\tresponded {}/{} ({rate})\texcellent {:.1}%\tGPA {gpa}",
                entry.crn, entry.responded, entry.enrolled, entry.ratings.excellent
            );
        }
        ExitCode::SUCCESS
    }
}

/// `Fall 2019` for a well-formed id, the bare id otherwise.
fn fallback_term_name(term_id: u32) -> String {
    let term = Term::new(term_id, "");
    match term.season() {
        Some(season) => Term::from_parts(term.year(), season).name,
        None => term_id.to_string(),
    }
}

fn course_line(course: &Course, term_id: u32) -> String {
    format!(
        "{}\t{}\t{}",
        course.id,
        course.code_as_of(term_id),
        course.name_as_of(term_id)
    )
}

fn log_report(report: &CrawlReport) {
    for error in report.errors.iter().take(REPORTED_ERRORS) {
        warn!(kind = error.kind(), error = %error, "Crawl error");
    }
    if report.errors.len() > REPORTED_ERRORS {
        warn!(
            omitted = report.errors.len() - REPORTED_ERRORS,
            "More crawl errors not shown"
        );
    }
    if let Some(fatal) = &report.fatal {
        error!(run_id = %report.run_id, error = %fatal, "Crawl aborted");
    }
    info!(
        run_id = %report.run_id,
        started_at = %report.started_at,
        finished_at = %report.finished_at,
        departments = report.inserted.departments,
        terms = report.inserted.terms,
        courses = report.inserted.courses,
        professors = report.inserted.professors,
        entries = report.inserted.entries,
        "New records"
    );
}
