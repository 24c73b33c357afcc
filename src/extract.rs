use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::models::PreviewResult;

// ── Lazy statics ─────────────────────────────────────────────────────────────

static INLINE_PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)"price"\s*:\s*"₹?([0-9,.]+)""#).unwrap());

static INLINE_IMAGES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""images":\s*\[(\s*".*?")\]"#).unwrap());

static LEADING_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(?:[0-9]+\.?[0-9]*|\.[0-9]+)").unwrap());

static NON_PRICE_CHARS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9.]").unwrap());

static TITLE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());

static IMAGE_SRC_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"link[rel="image_src"]"#).unwrap());

static JSON_LD_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

static PRICE_WHOLE_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".a-price-whole").unwrap());

static PRICE_FRACTION_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".a-price-fraction").unwrap());

static PRICE_SYMBOL_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".a-price-symbol").unwrap());

static PRICE_SYMBOL_SPAN_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.priceSymbol").unwrap());

// ── Stage plumbing ───────────────────────────────────────────────────────────

/// Raw field values gathered so far. Prices stay textual until the end.
#[derive(Debug, Default, Clone)]
struct Partial {
    title: Option<String>,
    image: Option<String>,
    price: Option<String>,
    currency: Option<String>,
}

struct Page<'a> {
    document: &'a Html,
    html: String,
}

type Stage = fn(Partial, &Page<'_>) -> Partial;

/// Most portable sources first, site-specific scraping last.
const STAGES: &[Stage] = &[
    meta_tags,
    document_title,
    json_ld_product,
    inline_json,
    dom_fallback,
];

// ── Public API ───────────────────────────────────────────────────────────────

pub fn extract_from_html(html: &str, final_url: &Url) -> PreviewResult {
    let document = Html::parse_document(html);
    extract(&document, final_url)
}

/// Build a preview from a parsed page. Never fails: anything that can't be
/// found or parsed comes back as `None`.
pub fn extract(document: &Html, final_url: &Url) -> PreviewResult {
    let page = Page {
        document,
        html: document.html(),
    };
    let partial = STAGES
        .iter()
        .fold(Partial::default(), |partial, stage| stage(partial, &page));
    finish(partial, final_url)
}

fn finish(partial: Partial, final_url: &Url) -> PreviewResult {
    PreviewResult {
        title: partial
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        image: partial
            .image
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .and_then(|i| final_url.join(&i).ok())
            .map(|u| u.to_string()),
        price: partial.price.as_deref().and_then(parse_price),
        currency: partial.currency.filter(|c| !c.is_empty()),
        site_name: final_url.host_str().unwrap_or("").to_string(),
        source_url: final_url.to_string(),
    }
}

// ── Stage 1: Open Graph / Twitter ────────────────────────────────────────────

fn meta_tags(mut partial: Partial, page: &Page<'_>) -> Partial {
    if partial.title.is_none() {
        partial.title = meta_content(page.document, "og:title")
            .or_else(|| meta_content(page.document, "twitter:title"));
    }
    if partial.image.is_none() {
        partial.image = meta_content(page.document, "og:image")
            .or_else(|| meta_content(page.document, "twitter:image"))
            .or_else(|| {
                page.document
                    .select(&IMAGE_SRC_SEL)
                    .next()
                    .and_then(|el| el.value().attr("href"))
                    .map(str::to_string)
                    .filter(|s| !s.is_empty())
            });
    }
    partial
}

/// `<meta property=...>` wins over `<meta name=...>`; empty content counts as
/// missing.
fn meta_content(document: &Html, key: &str) -> Option<String> {
    ["property", "name"].iter().find_map(|attr| {
        let sel_str = format!("meta[{}=\"{}\"]", attr, key);
        let sel = Selector::parse(&sel_str).ok()?;
        document
            .select(&sel)
            .next()
            .and_then(|el| el.value().attr("content"))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

// ── Stage 2: <title> ─────────────────────────────────────────────────────────

fn document_title(mut partial: Partial, page: &Page<'_>) -> Partial {
    if partial.title.is_none() {
        partial.title = page.document.select(&TITLE_SEL).next().map(collect_text);
    }
    partial
}

// ── Stage 3: JSON-LD Product ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ImageLd {
    Url(String),
    List(Vec<ImageLd>),
    Object {
        url: Option<String>,
        #[serde(rename = "contentUrl")]
        content_url: Option<String>,
    },
}

impl ImageLd {
    fn first_url(&self) -> Option<&str> {
        match self {
            ImageLd::Url(url) => Some(url.as_str()),
            ImageLd::List(items) => items.iter().find_map(ImageLd::first_url),
            ImageLd::Object { url, content_url } => url.as_deref().or(content_url.as_deref()),
        }
        .filter(|u| !u.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PriceLd {
    Text(String),
    Number(f64),
}

impl PriceLd {
    fn to_text(&self) -> Option<String> {
        match self {
            PriceLd::Text(s) if s.trim().is_empty() => None,
            PriceLd::Text(s) => Some(s.clone()),
            PriceLd::Number(n) => Some(n.to_string()),
        }
    }
}

/// Read one property of a JSON-LD node. A value of the wrong shape drops only
/// that property.
fn ld_field<T: serde::de::DeserializeOwned>(node: &Value, key: &str) -> Option<T> {
    let raw = node.get(key).filter(|v| !v.is_null())?;
    match serde_json::from_value::<T>(raw.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(key, error = %e, "ignoring unreadable JSON-LD property");
            None
        }
    }
}

fn json_ld_product(mut partial: Partial, page: &Page<'_>) -> Partial {
    for script in page.document.select(&JSON_LD_SEL) {
        let value = match serde_json::from_str::<Value>(&collect_text(script)) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "skipping malformed JSON-LD block");
                continue;
            }
        };

        for product in product_nodes(&value) {
            if let Some(name) = ld_field::<String>(product, "name").filter(|n| !n.is_empty()) {
                partial.title = Some(name);
            }
            if let Some(image) = ld_field::<ImageLd>(product, "image") {
                if let Some(url) = image.first_url() {
                    partial.image = Some(url.to_string());
                }
            }

            let offer = match product.get("offers") {
                Some(Value::Array(offers)) => offers.first(),
                Some(offer) => Some(offer),
                None => None,
            };
            if let Some(offer) = offer {
                let price = ld_field::<PriceLd>(offer, "price")
                    .or_else(|| ld_field::<PriceLd>(offer, "lowPrice"))
                    .and_then(|p| p.to_text());
                if let Some(price) = price {
                    partial.price = Some(price);
                }
                if let Some(currency) =
                    ld_field::<String>(offer, "priceCurrency").filter(|c| !c.is_empty())
                {
                    partial.currency = Some(currency);
                }
            }
        }
    }
    partial
}

/// Product objects at the top level, inside a top-level array, or inside an
/// `@graph` container.
fn product_nodes(value: &Value) -> Vec<&Value> {
    let candidates: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("@graph") {
            Some(Value::Array(graph)) => std::iter::once(value).chain(graph.iter()).collect(),
            _ => vec![value],
        },
        _ => Vec::new(),
    };
    candidates.into_iter().filter(|v| is_product(v)).collect()
}

fn is_product(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => t == "Product",
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some("Product")),
        _ => false,
    }
}

// ── Stage 4: inline JSON blobs ───────────────────────────────────────────────

fn inline_json(mut partial: Partial, page: &Page<'_>) -> Partial {
    if partial.price.is_some() && partial.image.is_some() {
        return partial;
    }

    if partial.price.is_none() {
        if let Some(cap) = INLINE_PRICE_RE.captures(&page.html) {
            partial.price = Some(cap[1].replace(',', ""));
            partial.currency = Some("INR".to_string());
        }
    }

    if partial.image.is_none() {
        if let Some(cap) = INLINE_IMAGES_RE.captures(&page.html) {
            match serde_json::from_str::<Vec<String>>(&format!("[{}]", &cap[1])) {
                Ok(images) => partial.image = images.into_iter().next(),
                Err(e) => tracing::debug!(error = %e, "skipping malformed inline images array"),
            }
        }
    }

    partial
}

// ── Stage 5: storefront DOM ──────────────────────────────────────────────────

fn dom_fallback(mut partial: Partial, page: &Page<'_>) -> Partial {
    if partial.price.is_none() {
        partial.price = dom_price(page.document);
    }
    if partial.currency.is_none() {
        partial.currency = first_text(page.document, &PRICE_SYMBOL_SEL)
            .or_else(|| first_text(page.document, &PRICE_SYMBOL_SPAN_SEL))
            .map(|symbol| currency_code(&symbol));
    }
    partial
}

fn dom_price(document: &Html) -> Option<String> {
    let whole = first_text(document, &PRICE_WHOLE_SEL)?;
    let whole = NON_PRICE_CHARS_RE.replace_all(&whole, "");
    let whole = whole.trim_end_matches('.');
    if whole.is_empty() {
        return None;
    }

    let fraction = first_text(document, &PRICE_FRACTION_SEL)
        .map(|f| f.chars().filter(char::is_ascii_digit).collect::<String>())
        .filter(|f| !f.is_empty());

    match fraction {
        Some(fraction) if !whole.contains('.') => Some(format!("{}.{}", whole, fraction)),
        _ => Some(whole.to_string()),
    }
}

fn currency_code(symbol: &str) -> String {
    match symbol {
        "₹" => "INR".to_string(),
        "$" => "USD".to_string(),
        other => other.to_string(),
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Parse the leading number of a price string, ignoring thousands separators.
fn parse_price(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', "");
    LEADING_NUMBER_RE
        .find(&cleaned)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|p| p.is_finite())
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(|el| collect_text(el).trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Recursively collect all text from an element and its descendants.
fn collect_text(el: ElementRef<'_>) -> String {
    use scraper::node::Node;
    let mut parts = Vec::new();
    for child in el.children() {
        match child.value() {
            Node::Text(text) => parts.push((&*text.text).to_string()),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    parts.push(collect_text(child_el));
                }
            }
            _ => {}
        }
    }
    parts.join("")
}
