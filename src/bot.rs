//! User-agent heuristics for crawlers and scripted clients.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub allow_list: Vec<String>,
    pub deny_list: Vec<String>,
    pub min_user_agent_length: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            allow_list: list(&[
                "googlebot",
                "bingbot",
                "slurp",
                "duckduckbot",
                "baiduspider",
                "yandexbot",
                "facebookexternalhit",
                "twitterbot",
                "linkedinbot",
            ]),
            deny_list: list(&[
                "bot",
                "crawler",
                "spider",
                "scraper",
                "curl",
                "wget",
                "python-requests",
                "python-urllib",
                "httpclient",
                "headless",
                "phantomjs",
                "selenium",
            ]),
            min_user_agent_length: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// A known search-engine or link-preview crawler.
    Crawler,
    Bot,
    Human,
}

#[derive(Debug, Clone, Default)]
pub struct BotClassifier {
    allow: Vec<Box<str>>,
    deny: Vec<Box<str>>,
    min_len: usize,
}

impl BotClassifier {
    pub fn new(config: &BotConfig) -> Self {
        let lower = |items: &[String]| {
            items
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase().into_boxed_str())
                .collect()
        };
        Self {
            allow: lower(&config.allow_list),
            deny: lower(&config.deny_list),
            min_len: config.min_user_agent_length,
        }
    }

    /// First match wins: allow-list, deny-list, then the length floor.
    pub fn classify(&self, user_agent: &str) -> Verdict {
        let ua = user_agent.to_lowercase();
        if self.allow.iter().any(|s| ua.contains(s.as_ref())) {
            return Verdict::Crawler;
        }
        if self.deny.iter().any(|s| ua.contains(s.as_ref())) {
            return Verdict::Bot;
        }
        if ua.trim().is_empty() || ua.len() < self.min_len {
            return Verdict::Bot;
        }
        Verdict::Human
    }

    #[inline]
    pub fn is_bot(&self, user_agent: &str) -> bool {
        self.classify(user_agent) == Verdict::Bot
    }
}
