use std::iter::FusedIterator;

use indexmap::IndexMap;
use indexmap::map::Entry;

use crate::{Metrics, ParseMetricError};

/// An ordered collection of series keyed by name.
///
/// Inserting a series whose name is already present appends its data points to the existing
/// entry. Iteration follows the order in which names were first inserted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSet {
    metrics: IndexMap<String, Metrics>,
}

impl MetricsSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a series, merging it into an existing series of the same name.
    pub fn insert(&mut self, metrics: Metrics) {
        match self.metrics.entry(metrics.name().to_owned()) {
            Entry::Occupied(mut entry) => entry.get_mut().merge(metrics),
            Entry::Vacant(entry) => {
                entry.insert(metrics);
            }
        }
    }

    /// Returns the series with the given name.
    pub fn get(&self, name: &str) -> Option<&Metrics> {
        self.metrics.get(name)
    }

    /// Returns the number of distinct series.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns `true` if the set holds no series.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Returns the total number of data points across all series.
    pub fn data_point_count(&self) -> usize {
        self.metrics.values().map(Metrics::data_point_count).sum()
    }

    /// Iterates the series in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Metrics> {
        self.metrics.values()
    }

    /// Parses a Carbon plaintext feed.
    ///
    /// Every line that parses is added to the returned set, even if other lines in the same feed are
    /// malformed. The first error is reported in [`ParsedFeed::error`].
    pub fn parse_plain_text(slice: &[u8]) -> ParsedFeed {
        ParsedFeed::collect(ParseLines::new(slice, Metrics::parse_plain_text_line))
    }

    /// Parses rows of a render CSV response.
    ///
    /// Like [`parse_plain_text`](Self::parse_plain_text), malformed rows are skipped.
    pub fn parse_csv(slice: &[u8]) -> ParsedFeed {
        ParsedFeed::collect(ParseLines::new(slice, Metrics::parse_csv_line))
    }
}

impl IntoIterator for MetricsSet {
    type Item = Metrics;
    type IntoIter = indexmap::map::IntoValues<String, Metrics>;

    fn into_iter(self) -> Self::IntoIter {
        self.metrics.into_values()
    }
}

impl FromIterator<Metrics> for MetricsSet {
    fn from_iter<T: IntoIterator<Item = Metrics>>(iter: T) -> Self {
        let mut set = Self::new();
        for metrics in iter {
            set.insert(metrics);
        }
        set
    }
}

/// Some lines of a feed could not be parsed.
///
/// The lines that did parse are still delivered alongside this error.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{failed_lines} line(s) rejected")]
pub struct PartialBatchError {
    /// The first error encountered in the feed.
    #[source]
    pub first: ParseMetricError,
    /// The number of rejected lines.
    pub failed_lines: usize,
}

/// The outcome of parsing a whole feed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedFeed {
    /// All series parsed from valid lines.
    pub metrics: MetricsSet,
    /// Set if at least one line was rejected.
    pub error: Option<PartialBatchError>,
}

impl ParsedFeed {
    fn collect<I>(lines: I) -> Self
    where
        I: Iterator<Item = Result<Metrics, ParseMetricError>>,
    {
        let mut feed = Self::default();

        for result in lines {
            match result {
                Ok(metrics) => feed.metrics.insert(metrics),
                Err(error) => match &mut feed.error {
                    Some(partial) => partial.failed_lines += 1,
                    None => {
                        feed.error = Some(PartialBatchError {
                            first: error,
                            failed_lines: 1,
                        })
                    }
                },
            }
        }

        feed
    }
}

/// Iterator over the non-empty lines of a byte slice, parsing each line with a line parser.
///
/// Lines are separated by `\n`; a trailing `\r` is stripped.
pub struct ParseLines<'a, F> {
    slice: &'a [u8],
    parse: F,
}

impl<'a, F> ParseLines<'a, F>
where
    F: Fn(&str) -> Result<Metrics, ParseMetricError>,
{
    /// Creates a new iterator over `slice`.
    pub fn new(slice: &'a [u8], parse: F) -> Self {
        Self { slice, parse }
    }
}

impl<F> Iterator for ParseLines<'_, F>
where
    F: Fn(&str) -> Result<Metrics, ParseMetricError>,
{
    type Item = Result<Metrics, ParseMetricError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let mut split = self.slice.splitn(2, |&b| b == b'\n');
            let current = split.next()?;
            self.slice = split.next().unwrap_or_default();

            let string = match std::str::from_utf8(current) {
                Ok(string) => string.strip_suffix('\r').unwrap_or(string),
                Err(_) => return Some(Err(ParseMetricError::InvalidUtf8)),
            };

            if !string.is_empty() {
                return Some((self.parse)(string));
            }
        }
    }
}

impl<F> FusedIterator for ParseLines<'_, F> where F: Fn(&str) -> Result<Metrics, ParseMetricError> {}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::{DataPoint, UnixTimestamp};

    #[test]
    fn test_parse_lines_skips_empty() {
        let text = b"\n\r\nfoo 1 2\r\n\nbar 3 4";
        let names: Vec<_> = ParseLines::new(text, Metrics::parse_plain_text_line)
            .map(|result| result.unwrap().name().to_owned())
            .collect();
        assert_eq!(names, ["foo", "bar"]);
    }

    #[test]
    fn test_parse_lines_invalid_utf8() {
        let text = b"foo 1 2\n\xff\xfe 1 2\n";
        let results: Vec<_> = ParseLines::new(text, Metrics::parse_plain_text_line).collect();
        assert!(results[0].is_ok());
        assert_eq!(results[1], Err(ParseMetricError::InvalidUtf8));
    }

    #[test]
    fn test_merge_by_name() {
        let text = b"a 1 1\nb 2 1\na 3 2\nc 4 1\na 5 3\nb 6 2\n";
        let feed = MetricsSet::parse_plain_text(text);
        assert!(feed.error.is_none());

        let names: Vec<_> = feed.metrics.iter().map(Metrics::name).collect();
        assert_eq!(names, ["a", "b", "c"]);

        let a = feed.metrics.get("a").unwrap();
        let values: Vec<_> = a.data_points().iter().map(DataPoint::value).collect();
        assert_eq!(values, [1.0, 3.0, 5.0]);
        assert_eq!(feed.metrics.data_point_count(), 6);
    }

    #[test]
    fn test_partial_batch() {
        let mut text = String::new();
        for i in 0..9 {
            text.push_str(&format!("path{i} {i}.5 {}\n", 1_500_000_000 + i));
            if i == 4 {
                text.push_str("this line is broken\n");
            }
        }

        let feed = MetricsSet::parse_plain_text(text.as_bytes());
        assert_eq!(feed.metrics.data_point_count(), 9);
        assert_debug_snapshot!(feed.error, @r###"
        Some(
            PartialBatchError {
                first: InvalidLine(
                    "this line is broken",
                ),
                failed_lines: 1,
            },
        )
        "###);
    }

    #[test]
    fn test_partial_batch_keeps_first_error() {
        let feed = MetricsSet::parse_plain_text(b"x\nfoo 1 1\ny 1\n");
        let error = feed.error.unwrap();
        assert_eq!(error.first, ParseMetricError::InvalidLine("x".to_owned()));
        assert_eq!(error.failed_lines, 2);
        assert_eq!(feed.metrics.len(), 1);
    }

    #[test]
    fn test_parse_csv() {
        let first = DataPoint::new(1.0, UnixTimestamp::from_secs(1_500_000_000));
        let second = DataPoint::new(2.0, UnixTimestamp::from_secs(1_500_000_060));
        let text = format!(
            "foo,{}\nfoo,{}\nbroken\n",
            first.csv_string(),
            second.csv_string()
        );

        let feed = MetricsSet::parse_csv(text.as_bytes());
        assert_eq!(
            feed.metrics.get("foo").unwrap().data_points(),
            &[first, second]
        );
        assert!(feed.error.is_some());
    }

    #[test]
    fn test_collect_from_iterator() {
        let set: MetricsSet = [Metrics::new("a"), Metrics::new("b"), Metrics::new("a")]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        let names: Vec<_> = set.into_iter().map(|m| m.name().to_owned()).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
