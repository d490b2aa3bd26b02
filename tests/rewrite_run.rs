//! End-to-end runs over a small product export.

use catalog_scribe::models::{GenerationError, QuoteStyle};
use catalog_scribe::{
    CheckpointStore, Config, Generator, LlmClient, ProductDescriber, ProductRecord,
    RewritePipeline, RunOptions,
};
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SOURCE: &str = "\"Handle\",\"Title\",\"Body (HTML)\",\"Vendor\",\"Tags\"\r\n\
\"p1\",\"First\",\"<p>one, with comma</p>\",\"Acme\",\"\"\r\n\
\"p2\",\"Second\",\"<p>two\nlines</p>\",\"Acme\",\"\"\r\n\
\"p3\",\"Third\",\"<p>three</p>\",\"Acme\",\"\"\r\n";

struct Rewriter;

impl Generator for Rewriter {
    async fn generate(&self, product: &ProductRecord) -> Result<String, GenerationError> {
        Ok(format!("<div>{} rewritten</div>", product.display_name))
    }
}

fn options(dir: &TempDir, limit: usize) -> RunOptions {
    let input = dir.path().join("products.csv");
    fs::write(&input, SOURCE).unwrap();
    let mut config = Config::default();
    config.batch.delay_secs = 0.0;
    let mut options = RunOptions::new(&input, &dir.path().join("out.csv"), &config);
    options.limit = Some(limit);
    options
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn three_rows_limit_two() {
    let dir = TempDir::new().unwrap();
    let options = options(&dir, 2);
    let pipeline = RewritePipeline::new(Config::default(), Rewriter);

    let stats = pipeline
        .run(&options, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.total_completed, 2);

    let store = CheckpointStore::open(&options.checkpoint);
    let keys: Vec<&str> = store.state().completed.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["p1", "p2"]);
    assert!(store.state().is_consistent());

    let expected = "\"Handle\",\"Title\",\"Body (HTML)\",\"Vendor\",\"Tags\"\r\n\
\"p1\",\"First\",\"<div>First rewritten</div>\",\"Acme\",\"\"\r\n\
\"p2\",\"Second\",\"<div>Second rewritten</div>\",\"Acme\",\"\"\r\n\
\"p3\",\"Third\",\"<p>three</p>\",\"Acme\",\"\"\r\n";
    assert_eq!(read(&options.output), expected);

    // The next run picks up exactly the remaining product.
    let stats = pipeline
        .run(&options, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.total_candidates, 1);
    assert_eq!(stats.checkpoint_completed, 3);
    assert!(read(&options.output).contains("<div>Third rewritten</div>"));
}

#[tokio::test]
async fn reset_starts_over() {
    let dir = TempDir::new().unwrap();
    let options = options(&dir, 3);
    let pipeline = RewritePipeline::new(Config::default(), Rewriter);
    pipeline
        .run(&options, CancellationToken::new())
        .await
        .unwrap();

    let mut store = CheckpointStore::open(&options.checkpoint);
    store.reset().unwrap();
    assert!(CheckpointStore::open(&options.checkpoint).state().is_empty());

    let stats = pipeline
        .run(&options, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.total_candidates, 3);
}

#[tokio::test]
async fn describer_against_mock_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("product research expert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "{\"features\": [\"sturdy\"]}" } }],
            "usage": { "prompt_tokens": 100, "completion_tokens": 50 }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("copywriter"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "content": "```html\n<div>Sturdy and simple</div>\n```" } }],
            "usage": { "prompt_tokens": 200, "completion_tokens": 100 }
        })))
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.llm.base_url = format!("{}/v1", server.uri());
    config.llm.max_retries = 1;
    config.community.enabled = false;
    config.output.quote_style = QuoteStyle::Necessary;

    let dir = TempDir::new().unwrap();
    let options = options(&dir, 1);
    let client = LlmClient::new(&config.llm, "sk-test".to_string()).unwrap();
    let describer = ProductDescriber::new(&config, client).unwrap();
    let pipeline = RewritePipeline::new(config, describer);

    let stats = pipeline
        .run(&options, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.total_completed, 1);
    assert!(stats.cost_usd > 0.0);

    let output = read(&options.output);
    assert!(output.contains("p1,First,<div>Sturdy and simple</div>,Acme,\r\n"));
    // Untouched rows keep their original quoting.
    assert!(output.contains("\"p3\",\"Third\",\"<p>three</p>\",\"Acme\",\"\"\r\n"));
}
