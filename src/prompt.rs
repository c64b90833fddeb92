//! Confirmation before each step (`--prompt`).

use anyhow::{Context, Result};
use std::io::{BufRead, Write};

/// Asks whether a step should run.
pub trait Prompter {
    /// Returns `false` when the user declines.
    fn confirm(&mut self, step: &str) -> Result<bool>;
}

/// Never asks.
pub struct AlwaysYes;

impl Prompter for AlwaysYes {
    fn confirm(&mut self, _step: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Reads answers line by line. Anything but `n`/`no` counts as yes, so a bare
/// Enter accepts the default.
pub struct LinePrompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl LinePrompter<std::io::StdinLock<'static>, std::io::Stderr> {
    pub fn stdin() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> Prompter for LinePrompter<R, W> {
    fn confirm(&mut self, step: &str) -> Result<bool> {
        write!(self.output, "Do you want to run {}? [y]/n ", step)?;
        self.output.flush()?;

        let mut answer = String::new();
        let n = self
            .input
            .read_line(&mut answer)
            .context("Failed to read answer from stdin")?;
        if n == 0 {
            // EOF: nobody is there to say yes.
            return Ok(false);
        }
        Ok(!is_decline(&answer))
    }
}

fn is_decline(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "n" | "no")
}
