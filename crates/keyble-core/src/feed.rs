//! Credential input feed.
//!
//! Yields key card payloads either from a single value supplied up front
//! or line by line from a text stream (typically stdin).

use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

/// Lazy, single-pass sequence of credential strings.
pub enum InputFeed<R> {
    /// One value supplied directly; `None` once consumed
    Single(Option<String>),
    /// Successive non-blank lines of a stream
    Lines(Lines<R>),
}

impl<R: AsyncBufRead + Unpin> InputFeed<R> {
    pub fn single(value: impl Into<String>) -> Self {
        InputFeed::Single(Some(value.into()))
    }

    pub fn from_reader(reader: R) -> Self {
        InputFeed::Lines(reader.lines())
    }

    /// Whether the feed was built from a directly supplied value.
    pub fn is_single(&self) -> bool {
        matches!(self, InputFeed::Single(_))
    }

    /// Next credential string, or `None` once the feed is exhausted.
    ///
    /// Blank lines are skipped; yielded lines are trimmed.
    pub async fn next(&mut self) -> std::io::Result<Option<String>> {
        match self {
            InputFeed::Single(value) => Ok(value.take()),
            InputFeed::Lines(lines) => {
                while let Some(line) = lines.next_line().await? {
                    let line = line.trim();
                    if !line.is_empty() {
                        return Ok(Some(line.to_string()));
                    }
                }
                Ok(None)
            }
        }
    }
}
