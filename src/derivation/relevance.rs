//! News relevance and sentiment
//!
//! Keyword vocabulary matching stands in for word segmentation: a keyword
//! is anything from the industry tables or the news vocabulary below.

use crate::derivation::classifier::INDUSTRY_KEYWORDS;
use crate::models::{EtfRecord, NewsItem};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

const NEWS_VOCABULARY: &[&str] = &[
    "软件", "云计算", "算力", "机器人", "疫苗", "创新药", "信贷", "理财", "支付",
    "餐饮", "旅游", "酒店", "核电", "导弹", "雷达", "水泥", "汽车", "新能源车",
    "电动车", "智能驾驶", "车联网", "红利", "高股息", "黄金", "原油", "国债",
    "债券", "利率", "降息", "加息", "港股", "恒生", "纳斯达克", "标普", "沪深300",
    "创业板", "科创板", "中证500", "上证50",
];

const POSITIVE_WORDS: &[&str] = &[
    "上涨", "利好", "增长", "看好", "买入", "推荐", "积极", "乐观",
    "突破", "创新高", "强势", "领涨", "机遇", "受益", "提升",
];

const NEGATIVE_WORDS: &[&str] = &[
    "下跌", "利空", "下降", "看空", "卖出", "风险", "担忧", "悲观",
    "跌破", "创新低", "疲软", "领跌", "压力", "冲击", "下滑",
];

const NAME_TOKEN_WEIGHT: f64 = 2.0;
const INDUSTRY_TOKEN_WEIGHT: f64 = 1.0;
const NAME_MATCH_BONUS: f64 = 0.3;
const CODE_MATCH_BONUS: f64 = 0.5;
const IMPACT_THRESHOLD: f64 = 0.3;

lazy_static! {
    static ref DIGIT_RUN: Regex = Regex::new(r"\d+").expect("valid digit pattern");
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MarketImpact {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsAnalysis {
    pub news_id: String,
    pub keywords: Vec<String>,
    pub related_etfs: Vec<String>,
    pub relevance_scores: BTreeMap<String, f64>,
    pub sentiment_score: f64,
    pub market_impact: MarketImpact,
    pub implications: String,
    pub confidence: f64,
}

/// Vocabulary keywords and six-digit fund codes found in `text`,
/// in order of first appearance.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut hits: Vec<(usize, String)> = INDUSTRY_KEYWORDS
        .iter()
        .flat_map(|(_, keywords)| keywords.iter())
        .chain(NEWS_VOCABULARY.iter())
        .filter_map(|kw| text.find(kw).map(|pos| (pos, kw.to_string())))
        .collect();

    hits.extend(
        DIGIT_RUN
            .find_iter(text)
            .filter(|m| m.as_str().len() == 6)
            .map(|m| (m.start(), m.as_str().to_string())),
    );

    hits.sort_by_key(|(pos, _)| *pos);

    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|(_, kw)| seen.insert(kw.clone()))
        .map(|(_, kw)| kw)
        .collect()
}

/// Weighted keyword overlap between news keywords and an ETF, in [0, 1].
///
/// Name tokens weigh more than the generic keywords of the ETF's industry.
/// For a fixed ETF the score never decreases as overlap grows.
pub fn score_relevance(news_keywords: &[String], etf: &EtfRecord) -> f64 {
    let weighted = etf_keywords(etf);
    if weighted.is_empty() {
        return 0.0;
    }

    let total: f64 = weighted.values().sum();
    let overlap: f64 = weighted
        .iter()
        .filter(|(kw, _)| news_keywords.iter().any(|n| n == *kw))
        .map(|(_, w)| *w)
        .sum();

    let mut score = overlap / total;

    if news_keywords.iter().any(|kw| etf.name.contains(kw.as_str())) {
        score += NAME_MATCH_BONUS;
    }

    let bare_code = etf.code.split('.').next().unwrap_or(&etf.code);
    if !bare_code.is_empty() && news_keywords.iter().any(|kw| kw == bare_code) {
        score += CODE_MATCH_BONUS;
    }

    score.clamp(0.0, 1.0)
}

/// Lexicon polarity in [-1, 1]; positive means bullish language
pub fn estimate_sentiment(text: &str) -> f64 {
    let positive = POSITIVE_WORDS.iter().filter(|w| text.contains(*w)).count();
    let negative = NEGATIVE_WORDS.iter().filter(|w| text.contains(*w)).count();
    let total = positive + negative;

    if total == 0 {
        return 0.0;
    }

    let sentiment = (positive as f64 - negative as f64) / total as f64;
    (sentiment * 100.0).round() / 100.0
}

/// Full analysis of one news item against an ETF universe
pub fn analyze_news(item: &NewsItem, etfs: &[EtfRecord], threshold: f64) -> NewsAnalysis {
    let text = item.full_text();
    let keywords = extract_keywords(&text);

    let mut related_etfs = Vec::new();
    let mut relevance_scores = BTreeMap::new();

    for etf in etfs {
        let score = score_relevance(&keywords, etf);
        if score > threshold {
            related_etfs.push(etf.code.clone());
            relevance_scores.insert(etf.code.clone(), score);
        }
    }

    let sentiment_score = estimate_sentiment(&text);
    let market_impact = market_impact(sentiment_score, &related_etfs);
    let implications = implications(sentiment_score, &related_etfs);

    let keyword_score = (keywords.len() as f64 / 20.0).min(1.0);
    let etf_score = (related_etfs.len() as f64 / 5.0).min(1.0);
    let confidence = ((keyword_score + etf_score) / 2.0 * 100.0).round() / 100.0;

    NewsAnalysis {
        news_id: item.id.clone(),
        keywords,
        related_etfs,
        relevance_scores,
        sentiment_score,
        market_impact,
        implications,
        confidence,
    }
}

fn etf_keywords(etf: &EtfRecord) -> BTreeMap<String, f64> {
    let mut weighted = BTreeMap::new();

    if let Some((_, keywords)) = INDUSTRY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| etf.name.contains(kw)))
    {
        for kw in keywords.iter() {
            weighted.insert(kw.to_string(), INDUSTRY_TOKEN_WEIGHT);
        }
    }

    for token in extract_keywords(&etf.name) {
        weighted.insert(token, NAME_TOKEN_WEIGHT);
    }

    weighted
}

fn market_impact(sentiment: f64, related: &[String]) -> MarketImpact {
    if related.is_empty() {
        MarketImpact::Neutral
    } else if sentiment > IMPACT_THRESHOLD {
        MarketImpact::Positive
    } else if sentiment < -IMPACT_THRESHOLD {
        MarketImpact::Negative
    } else {
        MarketImpact::Neutral
    }
}

fn implications(sentiment: f64, related: &[String]) -> String {
    if related.is_empty() {
        return "该新闻与ETF产品关联度较低，建议关注相关行业动态。".to_string();
    }

    let head = related.iter().take(3).cloned().collect::<Vec<_>>().join(", ");

    if sentiment > IMPACT_THRESHOLD {
        format!("该新闻对相关ETF（{}等）可能产生积极影响，建议关注相关产品的投资机会，但需注意市场风险。", head)
    } else if sentiment < -IMPACT_THRESHOLD {
        format!("该新闻对相关ETF（{}等）可能产生负面影响，建议谨慎评估投资风险，考虑适当调整仓位。", head)
    } else {
        format!("该新闻对相关ETF（{}等）影响中性，建议持续关注后续发展，保持理性投资态度。", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kws(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_keywords_in_order() {
        let keywords = extract_keywords("芯片板块领涨，人工智能概念走强，512760资金流入");
        assert_eq!(keywords[0], "芯片");
        assert!(keywords.contains(&"人工智能".to_string()));
        assert!(keywords.contains(&"512760".to_string()));
    }

    #[test]
    fn test_relevance_monotonic_in_overlap() {
        let etf = EtfRecord::new("512760", "半导体芯片ETF");
        let base = kws(&["汽车"]);
        let one = kws(&["汽车", "电子"]);
        let two = kws(&["汽车", "电子", "通信"]);
        let three = kws(&["汽车", "电子", "通信", "半导体"]);

        let s0 = score_relevance(&base, &etf);
        let s1 = score_relevance(&one, &etf);
        let s2 = score_relevance(&two, &etf);
        let s3 = score_relevance(&three, &etf);

        assert!(s0 <= s1 && s1 <= s2 && s2 <= s3, "{s0} {s1} {s2} {s3}");
        assert!(s3 <= 1.0);
    }

    #[test]
    fn test_relevance_threshold_filters() {
        let news = NewsItem {
            id: "n1".into(),
            title: "芯片半导体板块强势领涨".into(),
            content: "人工智能需求推动芯片景气度提升".into(),
            source: None,
            published_at: None,
        };
        let etfs = vec![
            EtfRecord::new("512760", "半导体芯片ETF"),
            EtfRecord::new("512800", "银行ETF"),
        ];

        let analysis = analyze_news(&news, &etfs, 0.3);
        assert_eq!(analysis.related_etfs, vec!["512760".to_string()]);
        assert_eq!(analysis.market_impact, MarketImpact::Positive);
        assert!(analysis.confidence > 0.0);
    }

    #[test]
    fn test_sentiment_sign() {
        assert!(estimate_sentiment("市场上涨，利好频出") > 0.0);
        assert!(estimate_sentiment("板块下跌，担忧加剧") < 0.0);
        assert_eq!(estimate_sentiment("今天天气不错"), 0.0);
    }
}
