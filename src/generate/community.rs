//! Community quotes from a subreddit's public JSON endpoints.
//!
//! Search failures never fail a product: every error degrades to fewer
//! quotes.

use crate::models::{CommunityConfig, delay_from_secs};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};

/// Listing posts need fewer upvotes than search hits to be quoted.
const LISTING_MIN_UPVOTES: i64 = 3;
const MIN_TITLE_CHARS: usize = 20;
const MIN_SELFTEXT_CHARS: usize = 50;
const SENTENCE_CHARS: std::ops::Range<usize> = 31..200;
const LISTING_EXCERPT_CHARS: usize = 150;

/// Bundle and edition suffixes that only add noise to a search.
static NAME_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*[-\x{2013}]\s*\d+\s*pack\b.*$|\s*\(limited release\)").expect("valid regex")
});

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]").expect("valid regex"));

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: Post,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Post {
    title: String,
    selftext: String,
    ups: i64,
    author: String,
}

/// A quotable piece of community discussion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityQuote {
    pub text: String,
    pub upvotes: i64,
    pub author: String,
}

impl CommunityQuote {
    /// `"text" - u/author (N upvotes)`
    pub fn formatted(&self) -> String {
        format!("\"{}\" - u/{} ({} upvotes)", self.text, self.author, self.upvotes)
    }
}

/// Searches one subreddit for quotes about a product.
pub struct CommunitySearch {
    client: reqwest::Client,
    config: CommunityConfig,
}

impl CommunitySearch {
    pub fn new(config: CommunityConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("catalog-scribe/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    /// Up to `max_quotes` formatted quotes, most upvoted first.
    pub async fn quotes_for(&self, product_name: &str, brand: &str) -> Vec<String> {
        let name = NAME_NOISE.replace_all(product_name, "").trim().to_string();
        let queries = search_queries(&name, brand);
        let terms: Vec<String> = [brand.to_lowercase(), name.to_lowercase().replace('-', " ")]
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .collect();

        let mut quotes = self.listing_mentions(&terms).await;
        for (i, query) in queries.iter().enumerate() {
            if quotes.len() >= self.config.max_quotes {
                break;
            }
            if i > 0 && self.config.request_delay_secs > 0.0 {
                tokio::time::sleep(delay_from_secs(self.config.request_delay_secs)).await;
            }
            quotes.extend(self.search(query).await);
        }

        let mut seen = HashSet::new();
        quotes.retain(|q| !q.text.is_empty() && seen.insert(q.text.clone()));
        quotes.sort_by(|a, b| b.upvotes.cmp(&a.upvotes));
        quotes.truncate(self.config.max_quotes);

        info!(
            product = %product_name,
            quotes = quotes.len(),
            "Gathered community quotes"
        );
        quotes.iter().map(CommunityQuote::formatted).collect()
    }

    async fn fetch(&self, url: &str, query: &[(&str, &str)]) -> Option<Vec<Post>> {
        let response = match self.client.get(url).query(query).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(url = %url, status = r.status().as_u16(), "Community request rejected");
                return None;
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Community request failed");
                return None;
            }
        };
        match response.json::<Listing>().await {
            Ok(listing) => Some(listing.data.children.into_iter().map(|c| c.data).collect()),
            Err(e) => {
                debug!(url = %url, error = %e, "Unparseable community listing");
                None
            }
        }
    }

    async fn search(&self, query: &str) -> Vec<CommunityQuote> {
        let url = format!(
            "{}/r/{}/search.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.subreddit
        );
        let params = [
            ("q", query),
            ("restrict_sr", "on"),
            ("sort", "top"),
            ("t", "year"),
            ("limit", "10"),
        ];
        let posts = self.fetch(&url, &params).await.unwrap_or_default();

        let mut quotes = Vec::new();
        for post in posts.iter().filter(|p| p.ups >= self.config.min_upvotes) {
            if post.title.chars().count() > MIN_TITLE_CHARS {
                quotes.push(quote(post, post.title.clone()));
            }
            if post.selftext.chars().count() > MIN_SELFTEXT_CHARS {
                if let Some(sentence) = meaningful_sentence(&post.selftext) {
                    quotes.push(quote(post, sentence));
                }
            }
        }
        quotes
    }

    /// Front-page posts that mention the brand or product.
    async fn listing_mentions(&self, terms: &[String]) -> Vec<CommunityQuote> {
        if terms.is_empty() {
            return Vec::new();
        }
        let url = format!(
            "{}/r/{}.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.subreddit
        );
        let posts = self.fetch(&url, &[]).await.unwrap_or_default();

        posts
            .iter()
            .filter(|p| p.ups >= LISTING_MIN_UPVOTES)
            .filter(|p| {
                let title = p.title.to_lowercase();
                let body = p.selftext.to_lowercase();
                terms.iter().any(|t| title.contains(t) || body.contains(t))
            })
            .map(|p| {
                let text = if p.title.chars().count() > MIN_TITLE_CHARS {
                    p.title.clone()
                } else if p.selftext.chars().count() > LISTING_EXCERPT_CHARS {
                    let excerpt: String = p.selftext.chars().take(LISTING_EXCERPT_CHARS).collect();
                    format!("{excerpt}...")
                } else {
                    p.selftext.clone()
                };
                quote(p, text)
            })
            .collect()
    }
}

fn quote(post: &Post, text: String) -> CommunityQuote {
    CommunityQuote {
        text: text.trim().to_string(),
        upvotes: post.ups,
        author: post.author.clone(),
    }
}

/// Search strings from most to least specific.
fn search_queries(name: &str, brand: &str) -> Vec<String> {
    let spaced = name.replace(['-', '_'], " ");
    let brand = brand.trim();
    if brand.is_empty() || name.to_lowercase().contains(&brand.to_lowercase()) {
        vec![name.to_string(), format!("\"{name}\""), spaced]
    } else {
        vec![
            format!("{brand} {name}"),
            format!("{name} {brand}"),
            format!("\"{brand}\" \"{name}\""),
            spaced,
            brand.to_string(),
        ]
    }
}

/// First sentence long enough to say something and short enough to quote.
fn meaningful_sentence(text: &str) -> Option<String> {
    SENTENCE_END
        .split(text)
        .map(str::trim)
        .find(|s| SENTENCE_CHARS.contains(&s.chars().count()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> CommunityConfig {
        CommunityConfig {
            base_url: server.uri(),
            request_delay_secs: 0.0,
            ..CommunityConfig::default()
        }
    }

    fn listing(posts: serde_json::Value) -> serde_json::Value {
        let children: Vec<_> = posts
            .as_array()
            .unwrap()
            .iter()
            .map(|p| json!({ "kind": "t3", "data": p }))
            .collect();
        json!({ "kind": "Listing", "data": { "children": children } })
    }

    #[test]
    fn test_search_queries_avoid_repeating_brand() {
        let queries = search_queries("Lattafa Khamrah", "Lattafa");
        assert_eq!(queries, vec!["Lattafa Khamrah", "\"Lattafa Khamrah\"", "Lattafa Khamrah"]);

        let queries = search_queries("Oud-Wood", "Tom Ford");
        assert_eq!(queries[0], "Tom Ford Oud-Wood");
        assert_eq!(queries[3], "Oud Wood");
        assert_eq!(queries[4], "Tom Ford");
    }

    #[test]
    fn test_name_noise_is_stripped() {
        let cleaned = NAME_NOISE.replace_all("Rose Oil - 2 Pack ($25 value) (Limited Release)", "");
        assert_eq!(cleaned, "Rose Oil");
        let cleaned = NAME_NOISE.replace_all("Amber (Limited Release)", "");
        assert_eq!(cleaned, "Amber");
    }

    #[test]
    fn test_meaningful_sentence_bounds() {
        let text = "Love it. This one lasts all day on my skin and gets compliments! ok";
        assert_eq!(
            meaningful_sentence(text).as_deref(),
            Some("This one lasts all day on my skin and gets compliments")
        );
        assert_eq!(meaningful_sentence("Too short. Also short."), None);
    }

    #[test]
    fn test_quote_format() {
        let quote = CommunityQuote {
            text: "Best winter scent".to_string(),
            upvotes: 42,
            author: "nose".to_string(),
        };
        assert_eq!(quote.formatted(), "\"Best winter scent\" - u/nose (42 upvotes)");
    }

    #[tokio::test]
    async fn test_quotes_sorted_filtered_and_capped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/fragrance/search.json"))
            .and(query_param("restrict_sr", "on"))
            .and(query_param("sort", "top"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(json!([
                { "title": "Amber Oud is the best winter scent I own", "ups": 12, "author": "a" },
                { "title": "Amber Oud dupe recommendations please", "ups": 3, "author": "low" },
                { "title": "short", "selftext": "Honestly Amber Oud projects like crazy for the first hour. Then it settles.", "ups": 40, "author": "b" }
            ]))))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/r/fragrance.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing(json!([
                { "title": "SOTD: Amber Oud from Maison", "ups": 4, "author": "c" },
                { "title": "Unrelated post about citrus", "ups": 100, "author": "d" }
            ]))))
            .mount(&server)
            .await;

        let search = CommunitySearch::new(CommunityConfig {
            max_quotes: 3,
            ..config(&server)
        })
        .unwrap();
        let quotes = search.quotes_for("Amber Oud", "Maison").await;

        assert_eq!(
            quotes,
            vec![
                "\"Honestly Amber Oud projects like crazy for the first hour\" - u/b (40 upvotes)",
                "\"Amber Oud is the best winter scent I own\" - u/a (12 upvotes)",
                "\"SOTD: Amber Oud from Maison\" - u/c (4 upvotes)",
            ]
        );
    }

    #[tokio::test]
    async fn test_failures_yield_no_quotes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let search = CommunitySearch::new(config(&server)).unwrap();
        assert!(search.quotes_for("Amber Oud", "Maison").await.is_empty());
    }
}
