//! Sample reference data for demos and tests
//!
//! Prices are deterministic functions of the ETF code and date offset,
//! so every run over the same `as_of` sees the same series.

use crate::models::{EtfRecord, NewsItem, PricePoint, PriceBook};
use chrono::{Datelike, Duration, NaiveDate, Weekday};

pub fn sample_universe() -> Vec<EtfRecord> {
    let with = |code: &str, name: &str, category: Option<&str>, aum: Option<f64>| EtfRecord {
        category: category.map(str::to_string),
        aum,
        ..EtfRecord::new(code, name)
    };

    vec![
        with("510300", "沪深300ETF", Some("宽基指数ETF"), Some(1_500.0)),
        with("510500", "中证500ETF", Some("宽基指数ETF"), Some(800.0)),
        with("159915", "创业板ETF", None, Some(400.0)),
        with("512760", "中证芯片ETF", None, Some(250.0)),
        with("515000", "科技龙头ETF", None, Some(90.0)),
        with("512010", "医药ETF", None, Some(180.0)),
        with("512170", "医疗ETF", None, None),
        with("159928", "消费ETF", None, Some(160.0)),
        with("512800", "银行ETF", None, Some(120.0)),
        with("510880", "红利ETF", None, Some(200.0)),
        with("511010", "国债ETF", None, Some(60.0)),
        with("511260", "十年国债ETF", None, Some(40.0)),
        with("511220", "城投债ETF", None, None),
        with("518880", "黄金ETF", None, Some(300.0)),
        with("511880", "银华日利货币ETF", None, Some(700.0)),
    ]
}

/// Business-day closes for every record over the `days` calendar days ending at `as_of`.
pub fn synthetic_prices(universe: &[EtfRecord], days: i64, as_of: NaiveDate) -> PriceBook {
    universe
        .iter()
        .map(|etf| (etf.code.clone(), synthetic_series(&etf.code, days, as_of)))
        .collect()
}

fn synthetic_series(code: &str, days: i64, as_of: NaiveDate) -> Vec<PricePoint> {
    let seed: u32 = code.bytes().map(u32::from).sum();
    let (amplitude, drift) = profile(code);
    let phase = seed as f64 * 0.37;
    let period = 40.0 + (seed % 7) as f64 * 6.0;
    let base = 1.0 + (seed % 5) as f64 * 0.6;

    (0..=days)
        .map(|offset| as_of - Duration::days(days - offset))
        .filter(|date| !matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
        .map(|date| {
            let t = (date - (as_of - Duration::days(days))).num_days() as f64;
            let wave = amplitude * (t * std::f64::consts::TAU / period + phase).sin();
            let ripple = amplitude * 0.3 * (t * 0.9 + phase).cos();
            PricePoint {
                date,
                close: base * (1.0 + drift * t + wave + ripple),
            }
        })
        .collect()
}

/// (oscillation amplitude, daily drift) by code family
fn profile(code: &str) -> (f64, f64) {
    match &code[..code.len().min(3)] {
        "511" if code == "511880" => (0.0005, 0.00005),
        "511" => (0.01, 0.0001),
        "518" => (0.04, 0.0003),
        "512" | "515" | "159" => (0.09, 0.0002),
        _ => (0.06, 0.0002),
    }
}

pub fn sample_news() -> Vec<NewsItem> {
    let item = |id: &str, title: &str, content: &str| NewsItem {
        id: id.to_string(),
        title: title.to_string(),
        content: content.to_string(),
        source: Some("示例资讯".to_string()),
        published_at: None,
    };

    vec![
        item("n-001", "芯片产业政策加码", "多项支持半导体和芯片国产化的政策落地，行业景气度有望提升，龙头企业订单增长。"),
        item("n-002", "消费复苏节奏放缓", "社零数据低于预期，部分消费品类需求疲软，市场担忧情绪升温。"),
        item("n-003", "国债收益率小幅下行", "资金面宽松，债券市场表现稳健，国债期货温和上涨。"),
        item("n-004", "医药集采规则优化", "新一轮集采规则更趋温和，医药板块估值修复预期增强。"),
    ]
}
