//! Prompt templates and the templated fallback description.

use super::cleanup::{plain_text, truncate_chars};
use crate::models::ProductRecord;
use serde_json::{Map, Value, json};
use std::fmt::Write;

pub const RESEARCH_SYSTEM: &str = "You are a product research expert specializing in e-commerce \
and AI search optimization. You want to provide helpful accurate information to the consumer. \
Provide accurate, detailed information in JSON format.";

pub const WRITER_SYSTEM: &str = "You are an expert e-commerce copywriter specializing in \
AI-optimized product descriptions. Create compelling, natural content that ranks well in AI \
search and appears in ChatGPT shopping. Always focus on the specific product provided. Do NOT \
use emojis or special characters. Keep the content clean and professional.";

/// Characters of the current description given to the research call.
const RESEARCH_EXCERPT_CHARS: usize = 500;
/// Characters of the current description given to the general writer call.
const WRITER_EXCERPT_CHARS: usize = 300;
/// Characters of the current description kept in the fallback.
const FALLBACK_EXCERPT_CHARS: usize = 200;

/// How a product is described.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductKind {
    Fragrance,
    General,
}

impl ProductKind {
    pub fn classify(product: &ProductRecord, keywords: &[String]) -> Self {
        if product.matches_keywords(keywords) {
            Self::Fragrance
        } else {
            Self::General
        }
    }
}

fn product_facts(product: &ProductRecord, excerpt_chars: usize) -> String {
    let current = plain_text(&product.description);
    let mut facts = String::new();
    let _ = writeln!(facts, "Product: {}", product.display_name);
    let _ = writeln!(facts, "Brand: {}", product.vendor);
    let _ = writeln!(
        facts,
        "Current Description: {}",
        truncate_chars(&current, excerpt_chars)
    );
    let _ = writeln!(facts, "Price: ${}", product.price);
    if !product.compare_at_price.trim().is_empty() {
        let _ = writeln!(facts, "Compare At Price: ${}", product.compare_at_price);
    }
    let _ = writeln!(facts, "Category: {}", product.category);
    let _ = writeln!(facts, "Tags: {}", product.tags);
    for (label, value) in product.present_metafields() {
        let _ = writeln!(facts, "{label}: {value}");
    }
    facts
}

/// Prompt for the research call.
pub fn research_prompt(product: &ProductRecord, kind: ProductKind) -> String {
    let facts = product_facts(product, RESEARCH_EXCERPT_CHARS);
    match kind {
        ProductKind::Fragrance => format!(
            "Research this perfume product and provide detailed information:

{facts}
Please provide:
1. Detailed fragrance notes (top, middle, base notes)
2. Longevity and sillage information
3. Best seasons and occasions to wear
4. Target audience and who would love this fragrance
5. Key benefits and unique selling points
6. 5 frequently asked questions with detailed answers
7. Community insights and popular opinions
8. How to use and apply this fragrance

Format as JSON with these keys:
- fragrance_notes (object with top_notes, middle_notes, base_notes arrays)
- longevity (string)
- sillage (string)
- seasons (array)
- occasions (array)
- target_audience (array)
- benefits (array)
- faqs (array of objects with question and answer)
- community_insights (array)
- usage_tips (array)
- unique_features (string)
"
        ),
        ProductKind::General => format!(
            "Research this product and provide detailed information:

{facts}
Please provide:
1. Detailed product features and benefits
2. How to use this product effectively
3. Who this product is perfect for
4. Key benefits and unique selling points
5. 5 frequently asked questions with detailed answers
6. Common use cases and applications
7. Product specifications and details

Format as JSON with these keys:
- features (array)
- benefits (array)
- usage_instructions (array)
- target_audience (array)
- faqs (array of objects with question and answer)
- use_cases (array)
- specifications (string)
- unique_features (string)
"
        ),
    }
}

fn pretty(map: &Map<String, Value>) -> String {
    serde_json::to_string_pretty(map).unwrap_or_else(|_| "{}".to_string())
}

fn key_list(map: &Map<String, Value>, empty: &str) -> String {
    if map.is_empty() {
        empty.to_string()
    } else {
        map.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Prompt for the writer call.
pub fn writer_prompt(
    product: &ProductRecord,
    kind: ProductKind,
    research: &Map<String, Value>,
    community: &Map<String, Value>,
    store_url: &str,
) -> String {
    match kind {
        ProductKind::Fragrance => {
            let schema = structured_data(product, "[key description from the research data]", store_url);
            format!(
                "You are creating a product description for {name}. You MUST use the research data \
and community data provided below to fill in the sections.

RESEARCH DATA (use this data):
{research_json}

COMMUNITY DATA (use this data):
{community_json}

AVAILABLE DATA FIELDS:
- Research data contains: {research_keys}
- Community data contains: {community_keys}

Create the description in this EXACT format, filling in the brackets with real data from the \
research and community data above:

<div class=\"product-description\">
    <h2>{name}</h2>

    <p><strong>[Three-word tagline.]</strong> [Write a compelling opening paragraph using the research data]</p>

    <h3>Fragrance Notes</h3>
    <ul>
        <li><strong>Top:</strong> [top_notes from research data]</li>
        <li><strong>Heart:</strong> [middle_notes from research data]</li>
        <li><strong>Base:</strong> [base_notes from research data]</li>
    </ul>

    <h3>Product Characteristics</h3>
    <ul>
        <li><strong>Longevity:</strong> [longevity from research data]</li>
        <li><strong>Sillage:</strong> [sillage from research data]</li>
        <li><strong>Best Seasons:</strong> [seasons from research data]</li>
        <li><strong>Unisex:</strong> [target_audience from research data]</li>
        <li><strong>Vibe:</strong> [unique_features from research data]</li>
    </ul>

    <h3>Reddit &amp; Community Tips</h3>
    <ul>
        <li>[First quote from the community data if available, formatted as \"quote\" - u/username (X upvotes)]</li>
        <li>[Second quote if available]</li>
        <li>[usage_tips from research data if available]</li>
    </ul>

    <h3>Who It's For</h3>
    <p>[Use the target_audience from research data to write this section]</p>

    <h3>Product Features</h3>
    <ul>
        <li>[benefits from research data]</li>
    </ul>

    <h3>How to Use</h3>
    <p>[usage_tips from research data]</p>

    <div class=\"schema-markup\" style=\"display: none;\">
        <script type=\"application/ld+json\">
{schema}
        </script>
    </div>
</div>

CRITICAL: You MUST replace the [bracketed text] with actual data from the JSON objects above. \
Do not leave brackets empty. If data is not available, skip that item or section entirely.
",
                name = product.display_name,
                research_json = pretty(research),
                community_json = pretty(community),
                research_keys = key_list(research, "No research data"),
                community_keys = key_list(community, "No community data"),
            )
        }
        ProductKind::General => {
            let facts = product_facts(product, WRITER_EXCERPT_CHARS);
            format!(
                "Create a product description for this product that will help it appear in \
ChatGPT shopping and AI search results.

{facts}
Research Data: {research_json}
Community Data: {community_json}

Create an HTML description that includes:
1. Compelling product overview that starts with what the product does
2. Key features and benefits section
3. How to use section
4. Target audience section
5. FAQ section with the provided questions and answers
6. Use cases and applications
7. Schema.org structured data markup (hidden), with the offer URL {store_url}/products/{key}

Requirements:
- Write in natural, conversational language like speaking to a curious shopper
- Include Schema.org markup for Product and Offer
- Make it descriptive and benefit-driven
- Avoid keyword stuffing
- Include unique use cases and key differentiators
- Use customer questions as headers where appropriate
- Focus specifically on this product, not generic content
- Do NOT use emojis or special characters

Format the response as clean HTML with proper structure.
",
                research_json = pretty(research),
                community_json = pretty(community),
                store_url = store_url.trim_end_matches('/'),
                key = product.key,
            )
        }
    }
}

/// Schema.org `Product` JSON-LD for `product`.
pub fn structured_data(product: &ProductRecord, description: &str, store_url: &str) -> String {
    let data = json!({
        "@context": "https://schema.org",
        "@type": "Product",
        "name": product.display_name,
        "brand": { "@type": "Brand", "name": product.vendor },
        "description": description,
        "sku": product.sku,
        "image": product.image_src,
        "offers": {
            "@type": "Offer",
            "price": product.price,
            "priceCurrency": "USD",
            "availability": "https://schema.org/InStock",
            "url": format!("{}/products/{}", store_url.trim_end_matches('/'), product.key),
        }
    });
    serde_json::to_string_pretty(&data).unwrap_or_default()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Templated description used when the writer call fails.
pub fn fallback_description(product: &ProductRecord, store_url: &str) -> String {
    let current = plain_text(&product.description);
    let excerpt = truncate_chars(&current, FALLBACK_EXCERPT_CHARS);
    let name = escape_html(&product.display_name);
    let vendor = if product.vendor.trim().is_empty() {
        "a trusted brand".to_string()
    } else {
        escape_html(&product.vendor)
    };
    let schema = structured_data(product, excerpt, store_url).replace("</", "<\\/");

    format!(
        "<div class=\"product-description\">
    <h2>{name}</h2>

    <div class=\"product-overview\">
        <p><strong>What it does:</strong> {overview}</p>
    </div>

    <div class=\"benefits\">
        <h3>Key Benefits</h3>
        <ul>
            <li>High-quality product from {vendor}</li>
            <li>Trusted brand with proven effectiveness</li>
        </ul>
    </div>

    <div class=\"usage\">
        <h3>How to Use</h3>
        <p>Follow the manufacturer's instructions for best results.</p>
    </div>

    <div class=\"schema-markup\" style=\"display: none;\">
        <script type=\"application/ld+json\">
{schema}
        </script>
    </div>
</div>",
        overview = escape_html(excerpt),
    )
}
