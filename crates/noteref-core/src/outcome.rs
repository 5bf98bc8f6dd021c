use std::sync::Arc;

use crate::cache::CacheHit;
use crate::consumer::ResolveConsumer;
use crate::metadata::EmbedMetadata;

/// What a consumer is eventually told about a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Resolved(Arc<EmbedMetadata>),
    NotFound,
    /// Unparseable input; carries the raw text to show as-is
    Reference(String),
}

impl Outcome {
    pub fn deliver(&self, consumer: &dyn ResolveConsumer) {
        match self {
            Outcome::Resolved(metadata) => consumer.on_resolved(metadata),
            Outcome::NotFound => consumer.on_not_found(),
            Outcome::Reference(raw) => consumer.on_reference(raw),
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Resolved(_) => "resolved",
            Outcome::NotFound => "not_found",
            Outcome::Reference(_) => "reference",
        }
    }

    pub fn metadata(&self) -> Option<&EmbedMetadata> {
        match self {
            Outcome::Resolved(metadata) => Some(metadata),
            _ => None,
        }
    }
}

impl From<CacheHit> for Outcome {
    fn from(hit: CacheHit) -> Self {
        match hit {
            CacheHit::Positive(metadata) => Outcome::Resolved(metadata),
            CacheHit::Negative => Outcome::NotFound,
        }
    }
}
