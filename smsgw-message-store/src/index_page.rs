//! Pages over the compound indexes, decoded into rows.

use crate::error::{MessageStoreError, MessageStoreResult};
use crate::models::INDEX_SEPARATOR;
use chrono::NaiveDateTime;
use smsgw_storage::{IndexPage, Manager};
use smsgw_types::{from_reverse_timestamp, parse_timestamp};

/// How a compound index term is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    /// `<prefix>$<timestamp>$<value>`
    TimestampAndValue,
    /// `<prefix>$<reverse timestamp>$<value>`
    ReverseTimestampAndValue,
    /// Like `TimestampAndValue`, dropping the value.
    TimestampOnly,
}

/// One decoded index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    pub key: String,
    pub timestamp: NaiveDateTime,
    /// Address or status. `None` for [`IndexFormat::TimestampOnly`].
    pub value: Option<String>,
}

/// Splits `term` into its timestamp and value parts.
fn split_term<'a>(prefix: &str, term: &'a str) -> MessageStoreResult<(&'a str, &'a str)> {
    let suffix = term
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(INDEX_SEPARATOR))
        .ok_or_else(|| {
            MessageStoreError::InvalidIndexValue(format!(
                "{term:?} does not begin with expected prefix \"{prefix}{INDEX_SEPARATOR}\""
            ))
        })?;
    suffix.split_once(INDEX_SEPARATOR).ok_or_else(|| {
        MessageStoreError::InvalidIndexValue(format!("{term:?} does not match expected format"))
    })
}

/// Decodes one `(key, term)` pair of a page queried with terms.
pub fn format_row(
    format: IndexFormat,
    prefix: &str,
    key: &str,
    term: Option<&str>,
) -> MessageStoreResult<IndexRow> {
    let term = term.ok_or_else(|| {
        MessageStoreError::InvalidIndexValue(format!("no index term returned for {key:?}"))
    })?;
    let (timestamp, value) = split_term(prefix, term)?;
    let timestamp = match format {
        IndexFormat::ReverseTimestampAndValue => from_reverse_timestamp(timestamp)?,
        IndexFormat::TimestampAndValue | IndexFormat::TimestampOnly => parse_timestamp(timestamp)?,
    };
    let value = match format {
        IndexFormat::TimestampOnly => None,
        _ => Some(value.to_string()),
    };
    Ok(IndexRow {
        key: key.to_string(),
        timestamp,
        value,
    })
}

/// An index page whose terms have been decoded. Decoding happens when the
/// page is fetched, so a malformed term fails the fetch.
#[derive(Debug, Clone)]
pub struct FormattedPage {
    format: IndexFormat,
    prefix: String,
    rows: Vec<IndexRow>,
    page: IndexPage,
}

impl FormattedPage {
    /// Terms of other prefixes that sort inside the queried range (`b1#x`
    /// for `b1`) are skipped.
    pub fn new(format: IndexFormat, prefix: &str, page: IndexPage) -> MessageStoreResult<Self> {
        let own = format!("{prefix}{INDEX_SEPARATOR}");
        let rows = page
            .terms()
            .filter(|(_, term)| term.is_none_or(|term| term.starts_with(&own)))
            .map(|(key, term)| format_row(format, prefix, key, term))
            .collect::<MessageStoreResult<Vec<_>>>()?;
        Ok(Self {
            format,
            prefix: prefix.to_string(),
            rows,
            page,
        })
    }

    #[must_use]
    pub fn rows(&self) -> &[IndexRow] {
        &self.rows
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.rows.iter().map(|row| row.key.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn has_next_page(&self) -> bool {
        self.page.has_next_page()
    }

    /// The undecoded page.
    #[must_use]
    pub fn raw(&self) -> &IndexPage {
        &self.page
    }

    pub async fn next_page(&self, manager: &Manager) -> MessageStoreResult<Option<FormattedPage>> {
        match self.page.next_page(manager).await? {
            Some(page) => Ok(Some(Self::new(self.format, &self.prefix, page)?)),
            None => Ok(None),
        }
    }
}

impl IntoIterator for FormattedPage {
    type Item = IndexRow;
    type IntoIter = std::vec::IntoIter<IndexRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
