/// Ordered keywords parsed from a comma-separated input. Empty means pass-through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordSet {
    keywords: Vec<String>,
}

impl KeywordSet {
    pub fn parse(input: &str) -> Self {
        let keywords = input
            .split(',')
            .map(str::trim)
            .filter(|keyword| !keyword.is_empty())
            .map(str::to_string)
            .collect();
        Self { keywords }
    }

    pub fn from_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.keywords
    }
}

/// True when any keyword is a substring of `line`. An empty set matches everything.
pub fn matches(line: &str, keywords: &KeywordSet, case_sensitive: bool) -> bool {
    if keywords.is_empty() {
        return true;
    }
    if case_sensitive {
        return keywords.keywords.iter().any(|keyword| line.contains(keyword.as_str()));
    }
    let line = line.to_lowercase();
    keywords
        .keywords
        .iter()
        .any(|keyword| line.contains(&keyword.to_lowercase()))
}

/// Keyword set with its case mode, lower-cased once up front for the hot path.
#[derive(Debug, Clone)]
pub struct LineFilter {
    keywords: KeywordSet,
    case_sensitive: bool,
    folded: Vec<String>,
}

impl LineFilter {
    pub fn new(keywords: KeywordSet, case_sensitive: bool) -> Self {
        let folded = if case_sensitive {
            Vec::new()
        } else {
            keywords.keywords.iter().map(|k| k.to_lowercase()).collect()
        };
        Self {
            keywords,
            case_sensitive,
            folded,
        }
    }

    pub fn matches(&self, line: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        if self.case_sensitive {
            return matches(line, &self.keywords, true);
        }
        let line = line.to_lowercase();
        self.folded.iter().any(|keyword| line.contains(keyword.as_str()))
    }
}
