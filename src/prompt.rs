use std::fmt::Display;
use std::io::{self, BufRead, Write};

/// Where a single question stands. The loop in [`ask_until_valid`] only
/// stops on `Valid`.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptState<T> {
    Pending,
    Valid(T),
    Invalid(String),
}

impl<T> PromptState<T> {
    /// Feeds one answer through `parse`.
    pub fn evaluate<E, F>(answer: &str, parse: F) -> Self
    where
        E: Display,
        F: FnOnce(&str) -> Result<T, E>,
    {
        match parse(answer.trim()) {
            Ok(value) => PromptState::Valid(value),
            Err(e) => PromptState::Invalid(e.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PromptState::Valid(_))
    }
}

/// Reads one trimmed line after printing `question`. `None` on end of input.
pub fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> io::Result<Option<String>> {
    write!(output, "{}", question)?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Asks `question` until `parse` accepts the answer. Rejections are echoed
/// back and the question is asked again; running out of input is an error.
pub fn ask_until_valid<R, W, T, E, F>(
    input: &mut R,
    output: &mut W,
    question: &str,
    mut parse: F,
) -> io::Result<T>
where
    R: BufRead,
    W: Write,
    E: Display,
    F: FnMut(&str) -> Result<T, E>,
{
    let mut state = PromptState::Pending;

    loop {
        state = match state {
            PromptState::Valid(value) => return Ok(value),
            PromptState::Invalid(reason) => {
                tracing::debug!(%reason, "rejected prompt answer");
                writeln!(output, "{}", reason)?;
                PromptState::Pending
            }
            PromptState::Pending => {
                let Some(answer) = ask(input, output, question)? else {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "input closed before a valid answer was given",
                    ));
                };
                PromptState::evaluate(&answer, &mut parse)
            }
        };
    }
}

/// `yes`/`y` in any case counts as yes; everything else is no.
pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "yes" | "y")
}
