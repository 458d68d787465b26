use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Which part of an `interchange:illocutionary` speech-act code is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagGranularity {
    /// The whole code
    #[default]
    All,
    /// Interchange part, before the colon
    First,
    /// Illocutionary part, after the colon
    Second,
    /// Illocutionary part, falling back to the whole code
    SecondAdapted,
}

impl TagGranularity {
    /// Reduce a raw tag to this granularity. Empty results are missing tags.
    pub fn select(&self, raw: &str) -> Option<String> {
        let tag = raw.trim().trim_start_matches('$').trim();
        if tag.is_empty() {
            return None;
        }

        let split = tag.split_once(':');
        let selected = match (self, split) {
            (TagGranularity::All, _) => tag,
            (TagGranularity::First, Some((first, _))) => first,
            (TagGranularity::First, None) => tag,
            (TagGranularity::Second, Some((_, second))) => second,
            (TagGranularity::Second, None) => return None,
            (TagGranularity::SecondAdapted, Some((_, second))) if !second.trim().is_empty() => {
                second
            }
            (TagGranularity::SecondAdapted, _) => tag,
        };

        let selected = selected.trim();
        (!selected.is_empty()).then(|| selected.to_string())
    }

    /// Name of the tag column this granularity fills (`spa_all`, `spa_1`, ...)
    pub fn column_name(&self) -> String {
        format!("spa_{}", self)
    }
}

impl fmt::Display for TagGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TagGranularity::All => "all",
            TagGranularity::First => "1",
            TagGranularity::Second => "2",
            TagGranularity::SecondAdapted => "2a",
        };
        f.write_str(s)
    }
}

impl FromStr for TagGranularity {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(TagGranularity::All),
            "1" => Ok(TagGranularity::First),
            "2" => Ok(TagGranularity::Second),
            "2a" => Ok(TagGranularity::SecondAdapted),
            other => Err(PipelineError::unknown_selector("tag granularity", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_parts() {
        assert_eq!(TagGranularity::All.select("$RES:YY"), Some("RES:YY".to_string()));
        assert_eq!(TagGranularity::First.select("RES:YY"), Some("RES".to_string()));
        assert_eq!(TagGranularity::Second.select("RES:YY"), Some("YY".to_string()));
        assert_eq!(TagGranularity::SecondAdapted.select("RES:YY"), Some("YY".to_string()));
    }

    #[test]
    fn test_select_without_colon() {
        assert_eq!(TagGranularity::Second.select("YY"), None);
        assert_eq!(TagGranularity::SecondAdapted.select("YY"), Some("YY".to_string()));
        assert_eq!(TagGranularity::First.select("YY"), Some("YY".to_string()));
        assert_eq!(TagGranularity::All.select("  "), None);
    }

    #[test]
    fn test_parse_selector() {
        assert_eq!("2a".parse::<TagGranularity>().unwrap(), TagGranularity::SecondAdapted);
        assert_eq!(TagGranularity::First.column_name(), "spa_1");
        assert!("3".parse::<TagGranularity>().is_err());
    }
}
