//! Derivation library
//!
//! Pure functions that synthesize the classification, relevance, sector
//! and valuation signals upstream data leaves out.

pub mod classifier;
pub mod enrich;
pub mod relevance;
pub mod sector;
pub mod valuation;

pub use classifier::{derive_classification, EtfClassification};
pub use enrich::{enrich_all, enrich_etf};
pub use relevance::{analyze_news, estimate_sentiment, extract_keywords, score_relevance, MarketImpact, NewsAnalysis};
pub use sector::{build_virtual_sector, build_virtual_sectors, rank_sectors, rotation_analysis, SectorReport};
pub use valuation::{assess_market_valuation, estimate_valuation, MarketValuation, ValuationEstimate};
