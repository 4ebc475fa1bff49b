use clap::{Parser, Subcommand, ValueEnum};

use crate::scraper::RunOptions;

/// Scrape and reconcile ISQ course evaluation data.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log output format
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a crawl and store everything found.
    Crawl {
        /// Re-fetch departments and terms even when already known
        #[arg(long)]
        force: bool,
        /// Skip units finished by an earlier run
        #[arg(long)]
        resume: bool,
        /// Only crawl the latest N terms
        #[arg(long, value_name = "N")]
        recent_terms: Option<usize>,
        /// Only crawl this department (repeatable)
        #[arg(long = "department", value_name = "ID")]
        departments: Vec<u32>,
        /// Stop after course and professor listings
        #[arg(long)]
        skip_entries: bool,
    },
    /// List stored courses of a department as they were named in a term.
    Courses {
        #[arg(long)]
        department: u32,
        #[arg(long)]
        term: u32,
    },
    /// List stored evaluations of one instructor.
    Entries {
        #[arg(long)]
        n_number: String,
    },
}

impl Command {
    /// Crawl options, for the crawl command.
    pub fn run_options(&self) -> Option<RunOptions> {
        match self {
            Self::Crawl {
                force,
                resume,
                recent_terms,
                departments,
                skip_entries,
            } => Some(RunOptions {
                force: *force,
                resume: *resume,
                recent_terms: *recent_terms,
                departments: departments.clone(),
                skip_entries: *skip_entries,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    /// Compact human-readable lines
    Pretty,
    /// One JSON object per event
    Json,
}

fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crawl_flags_map_to_run_options() {
        let args = Args::try_parse_from([
            "isq",
            "--tracing",
            "json",
            "crawl",
            "--resume",
            "--recent-terms",
            "2",
            "--department",
            "6502",
            "--department",
            "6504",
        ])
        .unwrap();
        assert_eq!(args.tracing, TracingFormat::Json);

        let options = args.command.run_options().unwrap();
        assert!(options.resume && !options.force && !options.skip_entries);
        assert_eq!(options.recent_terms, Some(2));
        assert_eq!(options.departments, vec![6502, 6504]);
    }

    #[test]
    fn query_commands_have_no_run_options() {
        let args = Args::try_parse_from(["isq", "entries", "--n-number", "N00000001"]).unwrap();
        assert!(args.command.run_options().is_none());
        assert!(Args::try_parse_from(["isq", "courses", "--department", "1"]).is_err());
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
