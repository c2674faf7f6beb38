//! Virtual sector aggregation
//!
//! ETFs sharing a derived category form a virtual sector whose index is
//! the AUM-weighted price relative of its constituents, based at 1000.

use crate::derivation::classifier::industry_of_category;
use crate::error::EngineError;
use crate::models::{EnrichedEtfRecord, PriceBook, PricePoint, SectorAggregate};
use crate::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

const BASE_INDEX_VALUE: f64 = 1000.0;
const MIN_CONSTITUENTS: usize = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    Excellent,
    Good,
    Neutral,
    Poor,
    VeryPoor,
}

impl PerformanceLevel {
    pub fn from_change_rate(change_rate: f64) -> Self {
        if change_rate > 3.0 {
            PerformanceLevel::Excellent
        } else if change_rate > 1.0 {
            PerformanceLevel::Good
        } else if change_rate > -1.0 {
            PerformanceLevel::Neutral
        } else if change_rate > -3.0 {
            PerformanceLevel::Poor
        } else {
            PerformanceLevel::VeryPoor
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedSector {
    pub rank: usize,
    pub performance_level: PerformanceLevel,
    pub summary: String,
    pub sector: SectorAggregate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectorReport {
    pub ranking: Vec<RankedSector>,
    pub strong_sectors: Vec<String>,
    pub weak_sectors: Vec<String>,
    pub rotation_suggestion: String,
}

struct Constituent<'a> {
    code: &'a str,
    aum: f64,
    base: f64,
    current: f64,
    previous: Option<f64>,
}

/// Build one virtual sector from the given constituents.
///
/// Fails with `InsufficientData` when fewer than two constituents have a
/// valid close on `as_of`.
pub fn build_virtual_sector(
    sector_id: &str,
    name: &str,
    etfs: &[EnrichedEtfRecord],
    prices: &PriceBook,
    as_of: NaiveDate,
) -> Result<SectorAggregate> {
    let constituents: Vec<Constituent<'_>> = etfs
        .iter()
        .filter_map(|etf| constituent(etf, prices.get(etf.code())?, as_of))
        .collect();

    if constituents.len() < MIN_CONSTITUENTS {
        return Err(EngineError::InsufficientData(format!(
            "sector {} has {} priced constituent(s) on {}, need {}",
            sector_id,
            constituents.len(),
            as_of,
            MIN_CONSTITUENTS
        )));
    }

    let total_aum: f64 = constituents.iter().map(|c| c.aum).sum();

    let mut index_value = 0.0;
    let mut change_rate = 0.0;
    for c in &constituents {
        let weight = c.aum / total_aum;
        index_value += weight * c.current / c.base;
        if let Some(previous) = c.previous {
            change_rate += weight * (c.current / previous - 1.0) * 100.0;
        }
    }

    Ok(SectorAggregate {
        virtual_sector_id: sector_id.to_string(),
        name: name.to_string(),
        constituents: constituents.iter().map(|c| c.code.to_string()).collect::<BTreeSet<_>>(),
        index_value: round2(BASE_INDEX_VALUE * index_value),
        change_rate: round2(change_rate),
        total_aum,
        as_of,
    })
}

/// Group by derived category and build every sector that has enough data.
pub fn build_virtual_sectors(
    etfs: &[EnrichedEtfRecord],
    prices: &PriceBook,
    as_of: NaiveDate,
) -> Vec<SectorAggregate> {
    let mut groups: BTreeMap<&str, Vec<EnrichedEtfRecord>> = BTreeMap::new();
    for etf in etfs {
        groups
            .entry(etf.category.value.as_str())
            .or_default()
            .push(etf.clone());
    }

    groups
        .into_iter()
        .filter_map(|(category, members)| {
            let label = industry_of_category(category).unwrap_or("综合");
            let id = format!("VS_{}", label);
            let name = format!("{}板块", label);

            match build_virtual_sector(&id, &name, &members, prices, as_of) {
                Ok(sector) => Some(sector),
                Err(e) => {
                    debug!(sector = %id, error = %e, "Skipping virtual sector");
                    None
                }
            }
        })
        .collect()
}

/// Rank by change rate, best first.
pub fn rank_sectors(sectors: &[SectorAggregate]) -> Vec<RankedSector> {
    let mut sorted = sectors.to_vec();
    sorted.sort_by(|a, b| b.change_rate.total_cmp(&a.change_rate));

    sorted
        .into_iter()
        .enumerate()
        .map(|(i, sector)| RankedSector {
            rank: i + 1,
            performance_level: PerformanceLevel::from_change_rate(sector.change_rate),
            summary: sector_summary(&sector),
            sector,
        })
        .collect()
}

/// Strong and weak thirds of the ranking plus a rotation suggestion
pub fn rotation_analysis(sectors: &[SectorAggregate]) -> SectorReport {
    let ranking = rank_sectors(sectors);

    if ranking.is_empty() {
        return SectorReport {
            ranking,
            strong_sectors: Vec::new(),
            weak_sectors: Vec::new(),
            rotation_suggestion: "暂无足够的板块数据用于轮动分析。".to_string(),
        };
    }

    let third = (ranking.len() / 3).max(1);
    let strong_sectors: Vec<String> = ranking[..third].iter().map(|r| r.sector.name.clone()).collect();
    let weak_sectors: Vec<String> = ranking[ranking.len() - third..]
        .iter()
        .map(|r| r.sector.name.clone())
        .collect();

    let rotation_suggestion = format!(
        "当前市场中，{}等板块表现强势，而{}等板块相对疲弱。建议在风险可控的前提下，适当增加强势板块配置，减少弱势板块权重。",
        strong_sectors.iter().take(3).cloned().collect::<Vec<_>>().join(", "),
        weak_sectors.iter().take(3).cloned().collect::<Vec<_>>().join(", "),
    );

    SectorReport {
        ranking,
        strong_sectors,
        weak_sectors,
        rotation_suggestion,
    }
}

fn constituent<'a>(
    etf: &'a EnrichedEtfRecord,
    series: &[PricePoint],
    as_of: NaiveDate,
) -> Option<Constituent<'a>> {
    let current = series
        .iter()
        .find(|p| p.date == as_of)
        .map(|p| p.close)
        .filter(|c| valid_price(*c))?;

    let base = series
        .iter()
        .find(|p| valid_price(p.close))
        .map(|p| p.close)?;

    let previous = series
        .iter()
        .filter(|p| p.date < as_of && valid_price(p.close))
        .last()
        .map(|p| p.close);

    let aum = etf.record.aum.filter(|a| *a > 0.0).unwrap_or(1.0);

    Some(Constituent {
        code: etf.code(),
        aum,
        base,
        current,
        previous,
    })
}

fn valid_price(close: f64) -> bool {
    close.is_finite() && close > 0.0
}

fn sector_summary(sector: &SectorAggregate) -> String {
    let (trend, suggestion) = if sector.change_rate > 2.0 {
        ("强势上涨", "表现优异，可考虑适当配置")
    } else if sector.change_rate > 0.0 {
        ("温和上涨", "表现平稳，可持续关注")
    } else if sector.change_rate > -2.0 {
        ("小幅波动", "表现中性，建议观望")
    } else {
        ("明显下跌", "表现疲弱，建议谨慎配置")
    };

    format!(
        "{}今日{}，涨跌幅{:.2}%。{}。",
        sector.name, trend, sector.change_rate, suggestion
    )
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
