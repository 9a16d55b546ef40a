use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const WILDCARD: &str = "*";
const NEGATION_PREFIX: &str = "not:";

/// Include/exclude sets of queue names that scope which records an actor touches.
///
/// The textual form is a comma separated list. `*` includes every queue, a
/// `not:` prefix excludes a queue, anything else is included explicitly.
/// An empty list includes every queue.
///
/// ```
/// use foreman_queue_filters::QueueNameFilters;
///
/// let filters = QueueNameFilters::parse("a, b, not:c");
/// assert!(filters.includes("a"));
/// assert!(!filters.includes("c"));
/// assert!(!filters.includes("d"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueNameFilters {
    include: BTreeSet<String>,
    exclude: BTreeSet<String>,
    include_all: bool,
}

impl QueueNameFilters {
    /// Filters matching every queue.
    pub fn any() -> Self {
        QueueNameFilters {
            include_all: true,
            ..Default::default()
        }
    }

    pub fn parse(value: &str) -> Self {
        let mut filters = QueueNameFilters::default();

        for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if entry == WILDCARD {
                filters.include_all = true;
            } else if let Some(name) = strip_negation(entry) {
                if !name.is_empty() {
                    filters.exclude.insert(name.to_string());
                }
            } else {
                filters.include.insert(entry.to_string());
            }
        }

        if filters.include.is_empty() {
            filters.include_all = true;
        }

        filters
    }

    /// Whether `queue_name` passes the filters. Exclusions always win.
    pub fn includes(&self, queue_name: &str) -> bool {
        if self.exclude.contains(queue_name) {
            return false;
        }

        self.include_all || self.include.contains(queue_name)
    }

    /// True when no explicit include list narrows the filters.
    pub fn includes_all_queues(&self) -> bool {
        self.include_all
    }

    pub fn include(&self) -> &BTreeSet<String> {
        &self.include
    }

    pub fn exclude(&self) -> &BTreeSet<String> {
        &self.exclude
    }
}

fn strip_negation(entry: &str) -> Option<&str> {
    let prefix = entry.get(..NEGATION_PREFIX.len())?;
    if prefix.eq_ignore_ascii_case(NEGATION_PREFIX) {
        Some(entry[NEGATION_PREFIX.len()..].trim())
    } else {
        None
    }
}

impl Display for QueueNameFilters {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if self.include_all {
            parts.push(WILDCARD.to_string());
        } else {
            parts.extend(self.include.iter().cloned());
        }
        parts.extend(self.exclude.iter().map(|e| format!("{NEGATION_PREFIX}{e}")));

        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for QueueNameFilters {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(QueueNameFilters::parse(s))
    }
}

impl From<&str> for QueueNameFilters {
    fn from(value: &str) -> Self {
        QueueNameFilters::parse(value)
    }
}

impl Serialize for QueueNameFilters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QueueNameFilters {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(QueueNameFilters::parse(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_includes_and_excludes() {
        let filters = QueueNameFilters::parse("a,b,not:c");

        assert_eq!(
            filters.include().iter().collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(filters.exclude().iter().collect::<Vec<_>>(), vec!["c"]);
        assert!(!filters.includes_all_queues());
        assert!(filters.includes("a"));
        assert!(!filters.includes("c"));
        assert!(!filters.includes("d"));
    }

    #[test]
    fn empty_and_wildcard_include_everything() {
        for value in ["", "*", " , ", "  *  "] {
            let filters = QueueNameFilters::parse(value);
            assert!(filters.includes_all_queues(), "{value:?}");
            assert!(filters.includes("anything"), "{value:?}");
            assert!(filters.includes(""), "{value:?}");
        }
    }

    #[test]
    fn exclusions_only_include_the_rest() {
        let filters = QueueNameFilters::parse("not:slow, NOT:reports");

        assert!(filters.includes_all_queues());
        assert!(filters.includes("mail"));
        assert!(!filters.includes("slow"));
        assert!(!filters.includes("reports"));
    }

    #[test]
    fn wildcard_with_exclusion() {
        let filters = QueueNameFilters::parse("*,not:c");

        assert!(filters.includes("a"));
        assert!(!filters.includes("c"));
    }

    #[test]
    fn display_round_trips() {
        for value in ["a,b,not:c", "*", "*,not:c", "x"] {
            let filters = QueueNameFilters::parse(value);
            let rendered = filters.to_string();
            assert_eq!(QueueNameFilters::parse(&rendered), filters, "{value:?}");
        }
        assert_eq!(QueueNameFilters::parse("b, a ,not:c").to_string(), "a,b,not:c");
    }

    #[test]
    fn serde_uses_the_textual_form() {
        let filters = QueueNameFilters::parse("a,not:b");
        let json = serde_json::to_string(&filters).unwrap();
        assert_eq!(json, "\"a,not:b\"");

        let back: QueueNameFilters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filters);
    }
}
