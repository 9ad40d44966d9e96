use serde::Serialize;

use crate::models::{Clinic, FaqRow, PricingRow, ReviewRow};

pub const SOURCE_CURRENCY: &str = "KRW";
pub const DISPLAY_CURRENCY: &str = "JPY";

/// Which field or row a chunk was rendered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "source_id", rename_all = "snake_case")]
pub enum ChunkSource {
    Description,
    DetailedDescription,
    Address,
    Pricing(String),
    Faq(String),
    Review(String),
}

impl ChunkSource {
    pub fn tag(&self) -> &'static str {
        match self {
            ChunkSource::Description => "description",
            ChunkSource::DetailedDescription => "detailed_description",
            ChunkSource::Address => "address",
            ChunkSource::Pricing(_) => "pricing",
            ChunkSource::Faq(_) => "faq",
            ChunkSource::Review(_) => "review",
        }
    }

    pub fn source_id(&self) -> Option<&str> {
        match self {
            ChunkSource::Pricing(id) | ChunkSource::Faq(id) | ChunkSource::Review(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextChunk {
    pub text: String,
    pub chunk_index: usize,
    pub source: ChunkSource,
}

/// Everything one ingestion run reads for a clinic.
#[derive(Debug, Clone)]
pub struct ClinicSnapshot {
    pub clinic: Clinic,
    pub pricing: Vec<PricingRow>,
    pub faqs: Vec<FaqRow>,
    pub reviews: Vec<ReviewRow>,
}

/// Renders one chunk per salient fact, in a stable order: profile fields,
/// pricing, FAQs by `sort_order`, reviews.
pub fn render_chunks(snapshot: &ClinicSnapshot) -> Vec<TextChunk> {
    let name = snapshot.clinic.name.trim();
    let mut rendered: Vec<(String, ChunkSource)> = Vec::new();

    let profile = [
        ("Description", &snapshot.clinic.description, ChunkSource::Description),
        ("Details", &snapshot.clinic.detailed_description, ChunkSource::DetailedDescription),
        ("Address", &snapshot.clinic.address, ChunkSource::Address),
    ];
    for (label, field, source) in profile {
        if let Some(value) = non_empty(field) {
            rendered.push((format!("[{}] {}: {}", label, name, value), source));
        }
    }

    for row in &snapshot.pricing {
        rendered.push((render_pricing(name, row), ChunkSource::Pricing(row.id.clone())));
    }

    let mut faqs: Vec<&FaqRow> = snapshot.faqs.iter().collect();
    faqs.sort_by_key(|faq| faq.sort_order);
    for faq in faqs {
        rendered.push((
            format!("[FAQ] {} Q: {} A: {}", name, faq.question.trim(), faq.answer.trim()),
            ChunkSource::Faq(faq.id.clone()),
        ));
    }

    for review in &snapshot.reviews {
        rendered.push((
            format!("[Review] {} (rating {}/5): {}", name, review.rating, review.content.trim()),
            ChunkSource::Review(review.id.clone()),
        ));
    }

    rendered
        .into_iter()
        .enumerate()
        .map(|(chunk_index, (text, source))| TextChunk { text, chunk_index, source })
        .collect()
}

pub fn render_pricing(clinic_name: &str, row: &PricingRow) -> String {
    let mut text = format!(
        "[Pricing] {} - {}: {} {} (~{} {})",
        clinic_name,
        row.treatment_name.trim(),
        format_amount(row.price_krw),
        SOURCE_CURRENCY,
        format_amount(row.price_jpy),
        DISPLAY_CURRENCY,
    );
    if let Some(promo) = row.promo_price_krw {
        text.push_str(&format!(" / Promotion: {} {}", format_amount(promo), SOURCE_CURRENCY));
    }
    text
}

/// Groups digits in threes: `100000` → `100,000`.
pub fn format_amount(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        grouped.insert(0, '-');
    }
    grouped
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
