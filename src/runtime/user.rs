//! User interaction operations (confirmation prompts).

use anyhow::Result;

use super::RealRuntime;

use std::io::{self, BufRead, Write};

/// Ask a yes/no question on `output` and read the answer from `input`.
/// Anything other than `y`/`yes` (any case, surrounding blanks ignored) is a no.
pub(crate) fn confirm_with_io<R: BufRead, W: Write>(
    prompt: &str,
    input: &mut R,
    output: &mut W,
) -> Result<bool> {
    write!(output, "{} [y/N] ", prompt)?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    let answer = line.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

impl RealRuntime {
    pub(crate) fn confirm_impl(&self, prompt: &str) -> Result<bool> {
        let stdin = io::stdin();
        let mut stderr = io::stderr();
        let mut stdin_lock = stdin.lock();
        // Prompt on stderr so wrapper listings on stdout stay clean.
        confirm_with_io(prompt, &mut stdin_lock, &mut stderr)
    }
}
