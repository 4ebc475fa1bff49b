mod helpers;

use std::collections::HashSet;

use helpers::*;
use isq::http::FetchError;
use isq::reconcile::LookupKey;
use isq::scraper::{Cause, ScrapeError};

const DEPT: u32 = 6502;
const FALL_2019: u32 = 201980;

const INSTRUCTORS: [(&str, &str); 8] = [
    ("N00000101", "James Smith"),
    ("N00000102", "María José García"),
    ("N00000103", "Erin O'Brien"),
    ("N00000104", "Linh Nguyen"),
    ("N00000105", "Rosa De La Cruz"),
    ("N00000106", "Priya Patel"),
    ("N00000107", "Chidi Okafor"),
    ("N00000108", "Mark Johnson"),
];

fn with_histories(mut fetch: FakeFetcher) -> FakeFetcher {
    for (n_number, name) in INSTRUCTORS {
        fetch = fetch.page(history_key(n_number), history_page(name, &[]));
    }
    fetch
}

#[tokio::test]
async fn department_listing_yields_every_distinct_course() {
    let fetch = FakeFetcher::new().page(
        schedule_key(DEPT, FALL_2019),
        fixture("schedule_6502_201980.html"),
    );
    let h = harness(fetch).await;

    let courses = h.scraper.scrape_courses(DEPT, FALL_2019).await.unwrap();

    assert_eq!(courses.len(), 51);
    let ids: HashSet<u64> = courses.iter().map(|c| c.id).collect();
    assert_eq!(ids.len(), 51, "course ids must be distinct");
    assert!(h.scraper.errors().is_empty(), "{:?}", h.scraper.errors().drain());

    let stored = stored(&h.store).await;
    assert_eq!(stored.courses.len(), 51);

    let course = h
        .reconciler
        .resolve_course("CEN 4655", FALL_2019)
        .await
        .expect("CEN4655 is listed");
    assert_eq!(course.name_as_of(FALL_2019), "Software Engineering");
    assert_eq!(course.first_seen, Some(FALL_2019));
}

#[tokio::test]
async fn relisting_the_same_term_adds_nothing() {
    let fetch = FakeFetcher::new().page(
        schedule_key(DEPT, FALL_2019),
        fixture("schedule_6502_201980.html"),
    );
    let h = harness(fetch).await;

    let first = h.scraper.scrape_courses(DEPT, FALL_2019).await.unwrap();
    let second = h.scraper.scrape_courses(DEPT, FALL_2019).await.unwrap();

    let first: HashSet<u64> = first.iter().map(|c| c.id).collect();
    let second: HashSet<u64> = second.iter().map(|c| c.id).collect();
    assert_eq!(first, second);
    assert_eq!(h.reconciler.courses().len(), 51);
}

#[tokio::test]
async fn malformed_course_row_is_isolated() {
    let titles = [
        "Intro to Programming",
        "Data Structures",
        "Discrete Math",
        "Computer Organization",
        "Operating Systems",
        "Networks",
        "Databases",
        "Compilers",
        "Security",
        "Graphics",
    ];
    let mut sections: Vec<Section> = titles
        .iter()
        .enumerate()
        .map(|(i, title)| Section::new(80100 + i as u32, &format!("COP {}", 3000 + i), title, None))
        .collect();
    sections[2].course = "COP 3002".into();

    let fetch = FakeFetcher::new().page(schedule_key(DEPT, FALL_2019), schedule_page(&sections));
    let h = harness(fetch).await;

    let courses = h.scraper.scrape_courses(DEPT, FALL_2019).await.unwrap();
    assert_eq!(courses.len(), 9);
    assert!(courses.iter().all(|c| c.base_code() != "COP3002"));

    let errors = h.scraper.errors().drain();
    assert_eq!(errors.len(), 1);
    assert!(
        matches!(
            &errors[0],
            ScrapeError::Course {
                department_id: DEPT,
                term_id: FALL_2019,
                row: Some(2),
                cause: Cause::Shape(_),
            }
        ),
        "{:?}",
        errors[0]
    );
}

#[tokio::test]
async fn listing_failure_is_reported_with_context() {
    let fetch = FakeFetcher::new().status(schedule_key(DEPT, FALL_2019), 404);
    let h = harness(fetch).await;

    let err = h.scraper.scrape_courses(DEPT, FALL_2019).await.unwrap_err();
    assert!(matches!(
        err,
        ScrapeError::Course {
            department_id: DEPT,
            row: None,
            cause: Cause::Fetch(FetchError::Status { status: 404, .. }),
            ..
        }
    ));
    // Client errors are not retried.
    assert_eq!(h.fetch.request_count(&schedule_key(DEPT, FALL_2019)), 1);
}

#[tokio::test]
async fn empty_listing_is_not_an_error() {
    let page =
        "<html><body><p>No classes were found that meet your search criteria</p></body></html>";
    let fetch = FakeFetcher::new().page(schedule_key(DEPT, FALL_2019), page);
    let h = harness(fetch).await;

    let listing = h.scraper.scrape_listing(DEPT, FALL_2019).await.unwrap();
    assert!(listing.courses.is_empty());
    assert!(listing.professors.is_empty());
    assert!(h.scraper.errors().is_empty());
}

#[tokio::test]
async fn professors_get_first_names_from_their_history_page() {
    let fetch = with_histories(FakeFetcher::new()).page(
        schedule_key(DEPT, FALL_2019),
        fixture("schedule_6502_201980.html"),
    );
    let h = harness(fetch).await;

    let professors = h.scraper.scrape_professors(DEPT, FALL_2019).await.unwrap();
    assert_eq!(professors.len(), 8);
    assert!(h.scraper.errors().is_empty(), "{:?}", h.scraper.errors().drain());

    let garcia = h.reconciler.professor_by_n_number("N00000102").await.unwrap();
    assert_eq!(garcia.first_name, "María José");
    assert_eq!(garcia.last_name, "García");
    assert_eq!(garcia.department_id, DEPT);

    let de_la_cruz = h.reconciler.professor_by_n_number("N00000105").await.unwrap();
    assert_eq!(de_la_cruz.display_name(), "Rosa De La Cruz");

    let smith = h.reconciler.professor_by_n_number("N00000101").await.unwrap();
    assert_eq!(smith.last_name, "Smith");
    assert_eq!(smith.first_name, "James");

    assert_eq!(stored(&h.store).await.professors.len(), 8);
}

#[tokio::test]
async fn known_professors_are_not_fetched_again() {
    let fetch = with_histories(FakeFetcher::new()).page(
        schedule_key(DEPT, FALL_2019),
        fixture("schedule_6502_201980.html"),
    );
    let h = harness(fetch).await;

    h.scraper.scrape_professors(DEPT, FALL_2019).await.unwrap();
    let history = history_key("N00000103");
    assert_eq!(h.fetch.request_count(&history), 1);

    let again = h.scraper.scrape_professors(DEPT, FALL_2019).await.unwrap();
    assert_eq!(again.len(), 8);
    assert_eq!(h.fetch.request_count(&history), 1);
    assert_eq!(h.reconciler.professors().len(), 8);
}

#[tokio::test]
async fn missing_history_page_fails_only_that_professor() {
    let sections = [
        Section::new(80001, "COP 3530", "Data Structures", Some(("Smith", "N00000101"))),
        Section::new(80002, "COT 3100", "Discrete Math", Some(("Nguyen", "N00000104"))),
        Section::new(80003, "CIS 4360", "Security", None),
    ];
    let fetch = FakeFetcher::new()
        .page(schedule_key(DEPT, FALL_2019), schedule_page(&sections))
        .page(history_key("N00000101"), history_page("James Smith", &[]));
    let h = harness(fetch).await;

    let professors = h.scraper.scrape_professors(DEPT, FALL_2019).await.unwrap();
    assert_eq!(professors.len(), 1);
    assert_eq!(professors[0].n_number, "N00000101");

    let errors = h.scraper.errors().drain();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ScrapeError::Professor {
            n_number, cause, ..
        } => {
            assert_eq!(n_number.as_deref(), Some("N00000104"));
            assert!(matches!(cause, Cause::Fetch(FetchError::Status { status: 404, .. })));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(
        h.reconciler
            .professors()
            .get(&LookupKey::NNumber("N00000104".into()))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn instructor_link_without_n_number_is_a_row_error() {
    let mut sections = vec![
        Section::new(80001, "COP 3530", "Data Structures", Some(("Smith", "N00000101"))),
        Section::new(80002, "COT 3100", "Discrete Math", None),
    ];
    sections[1].professor = r#"<a href="/isq?pv_instructor=">Nguyen</a>"#.into();
    let fetch = FakeFetcher::new()
        .page(schedule_key(DEPT, FALL_2019), schedule_page(&sections))
        .page(history_key("N00000101"), history_page("James Smith", &[]));
    let h = harness(fetch).await;

    let professors = h.scraper.scrape_professors(DEPT, FALL_2019).await.unwrap();
    assert_eq!(professors.len(), 1);

    let errors = h.scraper.errors().drain();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        ScrapeError::Professor {
            n_number: None,
            cause: Cause::MissingNNumber { .. },
            ..
        }
    ));
}
