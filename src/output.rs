use std::io::{self, Write};

use serde::Serialize;

use crate::app::{QueryResult, StatusReport};
use crate::scheduler::TickOutcome;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_tick(outcome: &TickOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_status(report: &StatusReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_query(result: &QueryResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
