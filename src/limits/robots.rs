//! # Robots Exclusion Module
//!
//! Parsing, matching and caching of robots.txt rules.
//!
//! ## Overview
//!
//! A [`RobotFile`] holds everything a robots.txt file declares: a default
//! (`*`) rule group, further groups keyed by user-agent token, and an
//! optional sitemap URL. Each [`UserAgentRules`] group carries ordered allow
//! and disallow patterns and an optional crawl-delay.
//!
//! ## Parsing
//!
//! The parser is line oriented. Comments (`#` to end of line) and blank
//! lines are ignored, directives are case-insensitive and split on the first
//! colon. `user-agent` opens a new group; an allow/disallow/crawl-delay
//! before any `user-agent` is a parse error. An empty `allow` or `disallow`
//! value resets the corresponding list. Unknown directives are skipped. An
//! empty file yields an empty default group, which allows everything.
//!
//! ## Matching
//!
//! Patterns support `*` (any run of characters) and a trailing `$` end
//! anchor; see [`match_url_rule`]. Within a group, allow patterns are
//! consulted before disallow patterns, and a path matching neither list is
//! allowed.
//!
//! ## Caching
//!
//! [`RobotRules`] keeps one parsed file per host behind a reader/writer
//! lock. Fetching robots.txt over HTTP is the orchestrator's job; this
//! module only parses and answers queries.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use url::Url;

use crate::error::Error;

/// Reasons a robots.txt file can fail to parse.
#[derive(Debug, thiserror::Error)]
pub enum RobotsParseError {
    #[error("{directive} directive without a user-agent")]
    RuleOutsideGroup { directive: String },

    #[error("user-agent directive with empty value")]
    EmptyUserAgent,

    #[error("invalid crawl-delay {value:?}")]
    InvalidCrawlDelay { value: String },

    #[error("invalid sitemap URL {value:?}: {source}")]
    InvalidSitemap {
        value: String,
        #[source]
        source: url::ParseError,
    },
}

/// Returns true if the robots exclusion rule matches the URL path.
///
/// `*` matches any run of characters; a trailing `$` anchors the rule to the
/// end of the path. The empty rule matches everything. A rule longer than
/// the path that contains no wildcard can never match and returns false
/// early.
pub fn match_url_rule(rule: &str, url: &str) -> bool {
    let rule = rule.as_bytes();
    let url = url.as_bytes();

    if rule.len() > url.len() && !rule.contains(&b'*') {
        return false;
    }

    // j tracks the current position in url.
    let mut j = 0;
    let mut i = 0;
    while i < rule.len() {
        match rule[i] {
            b'*' => {
                // A trailing wildcard matches any remainder.
                if i + 1 == rule.len() {
                    return true;
                }
                // Scan forward for the next literal rule character.
                let seek = rule[i + 1];
                match url[j..].iter().position(|&c| c == seek) {
                    Some(offset) => j += offset,
                    None => return false,
                }
            }
            b'$' => return j == url.len(),
            literal => {
                if j >= url.len() || literal != url[j] {
                    return false;
                }
                j += 1;
            }
        }
        i += 1;
    }
    true
}

/// The rules a robots.txt file declares for a single user agent.
#[derive(Debug, Clone)]
pub struct UserAgentRules {
    user_agent: String,
    allowed: Vec<String>,
    disallowed: Vec<String>,
    delay: Option<Duration>,
}

impl UserAgentRules {
    fn new(user_agent: impl Into<String>) -> UserAgentRules {
        UserAgentRules {
            user_agent: user_agent.into(),
            allowed: Vec::new(),
            disallowed: Vec::new(),
            delay: None,
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// True if the path is allowed by this group: any allow match wins, then
    /// any disallow match loses, otherwise allowed.
    pub fn allowed(&self, path: &str) -> bool {
        for rule in &self.allowed {
            if match_url_rule(rule, path) {
                return true;
            }
        }
        for rule in &self.disallowed {
            if match_url_rule(rule, path) {
                return false;
            }
        }
        true
    }

    /// Declared crawl-delay, if any.
    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }
}

/// A parsed robots.txt file.
#[derive(Debug, Clone)]
pub struct RobotFile {
    default_rules: UserAgentRules,
    groups: HashMap<String, UserAgentRules>,
    sitemap: Option<Url>,
}

impl Default for RobotFile {
    /// An empty file: no rules, everything allowed.
    fn default() -> RobotFile {
        RobotFile {
            default_rules: UserAgentRules::new("*"),
            groups: HashMap::new(),
            sitemap: None,
        }
    }
}

impl RobotFile {
    /// Parses a robots.txt body.
    pub fn parse(input: &str) -> Result<RobotFile, RobotsParseError> {
        let mut file = RobotFile::default();
        let mut current: Option<UserAgentRules> = None;

        for raw_line in input.lines() {
            let line = match raw_line.find('#') {
                Some(idx) => &raw_line[..idx],
                None => raw_line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (directive, parameter) = match line.split_once(':') {
                Some((directive, parameter)) => (directive.trim(), parameter.trim()),
                None => (line, ""),
            };

            match directive.to_ascii_lowercase().as_str() {
                "user-agent" => {
                    if parameter.is_empty() {
                        return Err(RobotsParseError::EmptyUserAgent);
                    }
                    if let Some(group) = current.take() {
                        file.add_group(group);
                    }
                    current = Some(UserAgentRules::new(parameter));
                }

                "disallow" => {
                    let group = current.as_mut().ok_or_else(|| {
                        RobotsParseError::RuleOutsideGroup {
                            directive: "disallow".into(),
                        }
                    })?;
                    if parameter.is_empty() {
                        group.disallowed.clear();
                    } else {
                        group.disallowed.push(parameter.to_string());
                    }
                }

                "allow" => {
                    let group = current.as_mut().ok_or_else(|| {
                        RobotsParseError::RuleOutsideGroup {
                            directive: "allow".into(),
                        }
                    })?;
                    if parameter.is_empty() {
                        group.allowed.clear();
                    } else {
                        group.allowed.push(parameter.to_string());
                    }
                }

                "crawl-delay" => {
                    let group = current.as_mut().ok_or_else(|| {
                        RobotsParseError::RuleOutsideGroup {
                            directive: "crawl-delay".into(),
                        }
                    })?;
                    let seconds: f64 = parameter.parse().map_err(|_| {
                        RobotsParseError::InvalidCrawlDelay {
                            value: parameter.to_string(),
                        }
                    })?;
                    if !seconds.is_finite() || seconds < 0.0 {
                        return Err(RobotsParseError::InvalidCrawlDelay {
                            value: parameter.to_string(),
                        });
                    }
                    group.delay = Some(Duration::from_secs_f64(seconds));
                }

                "sitemap" => {
                    let url = Url::parse(parameter).map_err(|source| {
                        RobotsParseError::InvalidSitemap {
                            value: parameter.to_string(),
                            source,
                        }
                    })?;
                    file.sitemap = Some(url);
                }

                _ => {}
            }
        }

        if let Some(group) = current.take() {
            file.add_group(group);
        }
        Ok(file)
    }

    fn add_group(&mut self, group: UserAgentRules) {
        if group.user_agent == "*" {
            self.default_rules = group;
        } else {
            self.groups.insert(group.user_agent.clone(), group);
        }
    }

    /// The group whose user-agent token exactly equals `user_agent`, or the
    /// default (`*`) group.
    pub fn rules_for(&self, user_agent: &str) -> &UserAgentRules {
        self.groups.get(user_agent).unwrap_or(&self.default_rules)
    }

    /// True if `user_agent` may access `path`.
    pub fn allowed(&self, user_agent: &str, path: &str) -> bool {
        self.rules_for(user_agent).allowed(path)
    }

    /// Crawl-delay for `user_agent`, if its group declares one.
    pub fn delay(&self, user_agent: &str) -> Option<Duration> {
        self.rules_for(user_agent).delay
    }

    /// Sitemap URL declared at file scope, if any.
    pub fn sitemap(&self) -> Option<&Url> {
        self.sitemap.as_ref()
    }
}

/// Renders the effective rules back to robots.txt syntax. Parsing the output
/// yields a file with identical `allowed` answers.
impl fmt::Display for RobotFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut groups: Vec<&UserAgentRules> = self.groups.values().collect();
        groups.sort_by(|a, b| a.user_agent.cmp(&b.user_agent));
        groups.insert(0, &self.default_rules);

        for group in groups {
            writeln!(f, "User-agent: {}", group.user_agent)?;
            for rule in &group.allowed {
                writeln!(f, "Allow: {rule}")?;
            }
            for rule in &group.disallowed {
                writeln!(f, "Disallow: {rule}")?;
            }
            if let Some(delay) = group.delay {
                writeln!(f, "Crawl-delay: {}", delay.as_secs_f64())?;
            }
            writeln!(f)?;
        }
        if let Some(sitemap) = &self.sitemap {
            writeln!(f, "Sitemap: {sitemap}")?;
        }
        Ok(())
    }
}

/// Per-host cache of parsed robots.txt files.
#[derive(Default)]
pub struct RobotRules {
    hosts: RwLock<HashMap<String, Arc<RobotFile>>>,
}

impl RobotRules {
    pub fn new() -> RobotRules {
        RobotRules::default()
    }

    /// Parses a robots.txt body and caches it for the host, replacing any
    /// previous entry.
    pub fn add_rules(&self, input: &str, host: &str) -> Result<Arc<RobotFile>, Error> {
        let file = RobotFile::parse(input).map_err(|source| Error::InvalidRobots {
            host: host.to_string(),
            source,
        })?;
        let file = Arc::new(file);
        self.hosts.write().insert(host.to_string(), Arc::clone(&file));
        Ok(file)
    }

    /// The cached rules for a host, or [`Error::RobotRulesNotCached`].
    pub fn rules_for_host(&self, host: &str) -> Result<Arc<RobotFile>, Error> {
        self.hosts
            .read()
            .get(host)
            .cloned()
            .ok_or_else(|| Error::RobotRulesNotCached(host.to_string()))
    }

    /// True if `user_agent` may access the URL, per the cached rules for the
    /// URL's host. Fails when no rules are cached.
    pub fn allowed(&self, user_agent: &str, host: &str, path: &str) -> Result<bool, Error> {
        Ok(self.rules_for_host(host)?.allowed(user_agent, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS_TXT: &str = "
User-agent: *
Disallow:

# too many repeated hits, too quick
User-agent: litefinder
Disallow: /

# Yahoo. too many repeated hits, too quick
User-agent: Slurp
Disallow: /
Allow: /test

# too many repeated hits, too quick
User-agent: Baidu
Disallow: /
";

    #[test]
    fn per_agent_groups_are_selected_by_exact_match() {
        let file = RobotFile::parse(ROBOTS_TXT).unwrap();

        assert!(!file.allowed("Baidu", "/"));
        assert!(!file.allowed("Slurp", "/tess"));
        assert!(file.allowed("Slurp", "/test/1"));
        assert!(file.allowed("PriceTracker/0.1", "/robots.txt"));
    }

    #[test]
    fn match_url_rule_wildcards_and_anchors() {
        assert!(match_url_rule("/*/*/test", "/hello/world/test"));
        assert!(!match_url_rule("/*/*/test", "/hello/test/ssfs"));
        assert!(!match_url_rule("/*?", "/test/is/nice"));
        assert!(match_url_rule("/*?", "/test/is/nice?param=1"));
        assert!(!match_url_rule("/*?$", "/test/is/nice?param=1"));
        assert!(match_url_rule("/*?$", "/test/is/nice?"));
        assert!(!match_url_rule("/*?$", "/x?param=1"));
        assert!(match_url_rule("/*?$", "/x?"));
        assert!(match_url_rule("/*/*/test$", "/test1/test$/test"));
        assert!(match_url_rule("/*/*/*", "/test1/test$/test"));
        assert!(!match_url_rule("/test1/test2/*?", "/"));
        assert!(!match_url_rule("/", ""));
        assert!(match_url_rule("", "/"));
        assert!(match_url_rule("", ""));
        assert!(!match_url_rule("/*/?z=1", "/bolpuntcom/"));
        assert!(match_url_rule("/*/?z=1", "/test/?z=1"));
    }

    #[test]
    fn empty_file_allows_everything() {
        let file = RobotFile::parse("").unwrap();
        assert!(file.allowed("anyone", "/anything"));
        assert!(file.sitemap().is_none());
        assert!(file.delay("anyone").is_none());
    }

    #[test]
    fn rule_before_user_agent_is_an_error() {
        let err = RobotFile::parse("Disallow: /private").unwrap_err();
        assert!(matches!(err, RobotsParseError::RuleOutsideGroup { .. }));
    }

    #[test]
    fn empty_user_agent_is_an_error() {
        let err = RobotFile::parse("User-agent:\nDisallow: /").unwrap_err();
        assert!(matches!(err, RobotsParseError::EmptyUserAgent));
    }

    #[test]
    fn empty_disallow_resets_the_list() {
        let file = RobotFile::parse(
            "User-agent: *\nDisallow: /a\nDisallow: /b\nDisallow:\nDisallow: /c",
        )
        .unwrap();
        assert!(file.allowed("bot", "/a"));
        assert!(file.allowed("bot", "/b"));
        assert!(!file.allowed("bot", "/c"));
    }

    #[test]
    fn crawl_delay_parses_as_seconds() {
        let file = RobotFile::parse("User-agent: *\nCrawl-delay: 1.5").unwrap();
        assert_eq!(file.delay("bot"), Some(Duration::from_millis(1500)));

        assert!(matches!(
            RobotFile::parse("User-agent: *\nCrawl-delay: -1").unwrap_err(),
            RobotsParseError::InvalidCrawlDelay { .. }
        ));
        assert!(matches!(
            RobotFile::parse("User-agent: *\nCrawl-delay: soon").unwrap_err(),
            RobotsParseError::InvalidCrawlDelay { .. }
        ));
    }

    #[test]
    fn sitemap_is_stored_at_file_scope() {
        let file = RobotFile::parse(
            "Sitemap: https://example.com/sitemap.xml\nUser-agent: *\nDisallow: /x",
        )
        .unwrap();
        assert_eq!(
            file.sitemap().unwrap().as_str(),
            "https://example.com/sitemap.xml"
        );

        assert!(matches!(
            RobotFile::parse("Sitemap: not a url").unwrap_err(),
            RobotsParseError::InvalidSitemap { .. }
        ));
    }

    #[test]
    fn unknown_directives_are_ignored() {
        let file = RobotFile::parse("User-agent: *\nHost: example.com\nDisallow: /x").unwrap();
        assert!(!file.allowed("bot", "/x"));
        assert!(file.allowed("bot", "/y"));
    }

    #[test]
    fn directives_are_case_insensitive() {
        let file = RobotFile::parse("USER-AGENT: Bot\nDISALLOW: /x").unwrap();
        assert!(!file.allowed("Bot", "/x"));
    }

    #[test]
    fn rendered_rules_reparse_to_the_same_answers() {
        let file = RobotFile::parse(ROBOTS_TXT).unwrap();
        let reparsed = RobotFile::parse(&file.to_string()).unwrap();

        let probes = [
            ("Baidu", "/"),
            ("Baidu", "/x"),
            ("Slurp", "/tess"),
            ("Slurp", "/test/1"),
            ("Slurp", "/"),
            ("litefinder", "/anything"),
            ("Other", "/robots.txt"),
            ("Other", ""),
        ];
        for (agent, path) in probes {
            assert_eq!(
                file.allowed(agent, path),
                reparsed.allowed(agent, path),
                "round-trip diverged for {agent} {path:?}"
            );
        }
    }

    #[test]
    fn cache_stores_rules_per_host() {
        let rules = RobotRules::new();
        assert!(matches!(
            rules.rules_for_host("example.com").unwrap_err(),
            Error::RobotRulesNotCached(_)
        ));

        rules
            .add_rules("User-agent: *\nDisallow: /private", "example.com")
            .unwrap();
        assert!(!rules.allowed("bot", "example.com", "/private/x").unwrap());
        assert!(rules.allowed("bot", "example.com", "/public").unwrap());
        assert!(rules.rules_for_host("other.com").is_err());
    }

    #[test]
    fn invalid_file_reports_the_host() {
        let rules = RobotRules::new();
        let err = rules.add_rules("Disallow: /", "example.com").unwrap_err();
        match err {
            Error::InvalidRobots { host, .. } => assert_eq!(host, "example.com"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
