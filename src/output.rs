use std::io::{self, Write};

use serde::Serialize;

use crate::app::RunOutcome;
use crate::domain::{JobId, Route};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(outcome: &RunOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_ledger(claimed: &[JobId]) -> io::Result<()> {
        Self::print_json(&claimed)
    }

    pub fn print_routes(routes: &[Route]) -> io::Result<()> {
        Self::print_json(&routes)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
