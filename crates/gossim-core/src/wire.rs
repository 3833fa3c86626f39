//! Text wire format
//!
//! A logical message is a tag followed by fields, all separated by `|`.
//! Several logical messages travelling together are joined with `;`.
//! Decimal fields are written with every digit the context produced.
//!
//! ```text
//! F|-2.5|15        one flow-updating message
//! J|3|20;A|3|15    a batch of two messages
//! ```

use std::fmt::Display;
use std::str::FromStr;

use crate::error::WireError;

/// Separator between fields of one message
pub const FIELD_SEPARATOR: char = '|';
/// Separator between messages of one batch
pub const BATCH_SEPARATOR: char = ';';

/// Builds one logical message
#[derive(Debug, Clone)]
pub struct WireWriter {
    buf: String,
}

impl WireWriter {
    pub fn new(tag: &str) -> Self {
        WireWriter {
            buf: tag.to_string(),
        }
    }

    /// Append a field
    pub fn field(mut self, value: impl Display) -> Self {
        self.buf.push(FIELD_SEPARATOR);
        self.buf.push_str(&value.to_string());
        self
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

/// Reads the fields of one logical message in order
#[derive(Debug)]
pub struct WireReader<'a> {
    tag: &'a str,
    fields: std::str::Split<'a, char>,
    index: usize,
}

impl<'a> WireReader<'a> {
    /// Start reading `message`, whatever its tag
    pub fn open(message: &'a str) -> Result<Self, WireError> {
        if message.is_empty() {
            return Err(WireError::Empty);
        }
        let mut fields = message.split(FIELD_SEPARATOR);
        let tag = fields.next().unwrap_or_default();
        Ok(WireReader {
            tag,
            fields,
            index: 0,
        })
    }

    /// Start reading `message`, which must carry `expected` as its tag
    pub fn expect(message: &'a str, expected: &str) -> Result<Self, WireError> {
        let reader = Self::open(message)?;
        if reader.tag != expected {
            return Err(WireError::UnexpectedTag {
                expected: expected.to_string(),
                found: reader.tag.to_string(),
            });
        }
        Ok(reader)
    }

    pub fn tag(&self) -> &'a str {
        self.tag
    }

    /// Next field, parsed
    pub fn read<T: FromStr>(&mut self) -> Result<T, WireError> {
        let index = self.index;
        self.index += 1;
        let raw = self.fields.next().ok_or(WireError::MissingField(index))?;
        raw.parse::<T>().map_err(|_| WireError::BadField {
            index,
            value: raw.to_string(),
        })
    }

    /// Next field if there is one. Trailing optional fields let a format
    /// grow without breaking older messages.
    pub fn read_opt<T: FromStr>(&mut self) -> Result<Option<T>, WireError> {
        let index = self.index;
        match self.fields.next() {
            None => Ok(None),
            Some(raw) => {
                self.index += 1;
                raw.parse::<T>().map(Some).map_err(|_| WireError::BadField {
                    index,
                    value: raw.to_string(),
                })
            }
        }
    }

    /// Remaining unread text, separators included
    pub fn rest(self) -> String {
        self.fields.collect::<Vec<_>>().join(&FIELD_SEPARATOR.to_string())
    }
}

/// Join messages into one batch
pub fn join_batch<I, S>(messages: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, message) in messages.into_iter().enumerate() {
        if i > 0 {
            out.push(BATCH_SEPARATOR);
        }
        out.push_str(message.as_ref());
    }
    out
}

/// Split a batch back into messages, skipping empty entries
pub fn split_batch(batch: &str) -> impl Iterator<Item = &str> {
    batch.split(BATCH_SEPARATOR).filter(|m| !m.is_empty())
}
