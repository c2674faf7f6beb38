//! ETF classification from name and code
//!
//! Ordered keyword tables; the first industry with a substring hit in the
//! name wins, so table order is the tie-break.

use crate::models::RiskLevel;
use serde::{Deserialize, Serialize};

pub const FALLBACK_CATEGORY: &str = "综合指数ETF";

/// Industry → name keywords, in priority order
pub const INDUSTRY_KEYWORDS: &[(&str, &[&str])] = &[
    ("科技", &["科技", "芯片", "半导体", "人工智能", "AI", "5G", "互联网", "计算机", "电子", "通信"]),
    ("医药", &["医药", "生物", "医疗", "健康", "制药", "医疗器械", "生物医药", "CXO"]),
    ("金融", &["银行", "保险", "证券", "金融", "券商", "信托", "期货"]),
    ("消费", &["消费", "食品", "饮料", "零售", "白酒", "家电", "纺织", "轻工"]),
    ("能源", &["能源", "石油", "煤炭", "电力", "新能源", "光伏", "风电", "储能"]),
    ("军工", &["军工", "国防", "航天", "航空", "兵器", "船舶"]),
    ("地产", &["地产", "房地产", "建筑", "基建", "建材", "装饰"]),
    ("材料", &["材料", "化工", "钢铁", "有色", "采掘", "化学"]),
    ("交通", &["交通", "运输", "物流", "航运", "港口", "机场"]),
    ("公用", &["公用", "水务", "燃气", "环保", "公共服务"]),
];

const THEME_KEYWORDS: &[(&str, &[&str])] = &[
    ("ESG", &["ESG", "可持续", "绿色", "环保", "碳中和"]),
    ("红利", &["红利", "股息", "分红", "高股息"]),
    ("成长", &["成长", "创新", "新兴", "小盘", "创业板"]),
    ("价值", &["价值", "蓝筹", "大盘", "低估值"]),
    ("质量", &["质量", "优质", "龙头", "白马"]),
    ("动量", &["动量", "趋势", "强势"]),
];

const REGION_KEYWORDS: &[(&str, &[&str])] = &[
    ("A股", &["沪深", "上证", "深证", "创业板", "科创板", "中证", "国证"]),
    ("港股", &["港股", "恒生", "香港", "H股"]),
    ("美股", &["纳斯达克", "标普", "美股", "道琼斯"]),
    ("全球", &["全球", "海外", "MSCI", "发达", "新兴"]),
];

const HIGH_RISK_KEYWORDS: &[&str] = &["小盘", "创业板", "科创板", "新兴", "成长", "主题"];
const LOW_RISK_KEYWORDS: &[&str] = &["大盘", "蓝筹", "红利", "价值", "国债", "货币"];
const HIGH_RISK_INDUSTRIES: &[&str] = &["科技", "军工"];

pub const ASSET_CLASSES: &[&str] = &["股票", "债券", "商品", "货币", "REITs"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EtfClassification {
    pub category: String,
    pub sub_category: String,
    pub industry: Option<String>,
    pub theme: Option<String>,
    pub region: String,
    pub objective: String,
    pub risk_level: RiskLevel,
    pub asset_class: String,
}

/// Classify an ETF. Pure and deterministic in (name, code).
pub fn derive_classification(name: &str, code: &str) -> EtfClassification {
    let industry = first_match(INDUSTRY_KEYWORDS, name);
    let theme = first_match(THEME_KEYWORDS, name);
    let region = first_match(REGION_KEYWORDS, name).unwrap_or("A股");

    let category = match industry {
        Some(industry) => format!("{}行业ETF", industry),
        None => FALLBACK_CATEGORY.to_string(),
    };

    let sub_category = industry.or(theme).unwrap_or("综合").to_string();
    let asset_class = derive_asset_class(name, code);

    EtfClassification {
        objective: objective_text(industry, theme, name),
        risk_level: derive_risk_level(industry, &asset_class, name),
        category,
        sub_category,
        industry: industry.map(str::to_string),
        theme: theme.map(str::to_string),
        region: region.to_string(),
        asset_class,
    }
}

/// Industry keywords for a bare industry name such as `科技`
pub fn industry_keywords(industry: &str) -> &'static [&'static str] {
    INDUSTRY_KEYWORDS
        .iter()
        .find(|(name, _)| *name == industry)
        .map(|(_, keywords)| *keywords)
        .unwrap_or(&[])
}

/// Strip the `行业ETF` suffix from a derived category
pub fn industry_of_category(category: &str) -> Option<&str> {
    category.strip_suffix("行业ETF")
}

fn first_match(table: &[(&'static str, &[&str])], name: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| name.contains(kw)))
        .map(|(label, _)| *label)
}

fn derive_asset_class(name: &str, code: &str) -> String {
    let class = if name.contains("货币") {
        "货币"
    } else if name.contains('债') || code.starts_with("511") {
        "债券"
    } else if code.starts_with("518")
        || ["黄金", "商品", "原油", "豆粕", "有色期货"].iter().any(|kw| name.contains(kw))
    {
        "商品"
    } else if name.to_uppercase().contains("REIT") {
        "REITs"
    } else {
        "股票"
    };
    class.to_string()
}

fn derive_risk_level(industry: Option<&str>, asset_class: &str, name: &str) -> RiskLevel {
    if matches!(asset_class, "债券" | "货币") {
        return RiskLevel::Low;
    }
    if HIGH_RISK_KEYWORDS.iter().any(|kw| name.contains(kw)) {
        return RiskLevel::High;
    }
    if LOW_RISK_KEYWORDS.iter().any(|kw| name.contains(kw)) {
        return RiskLevel::Low;
    }
    match industry {
        Some(i) if HIGH_RISK_INDUSTRIES.contains(&i) => RiskLevel::High,
        _ => RiskLevel::Medium,
    }
}

fn objective_text(industry: Option<&str>, theme: Option<&str>, name: &str) -> String {
    if let Some(industry) = industry {
        format!(
            "本基金主要投资于{0}行业相关的优质上市公司，通过跟踪相关指数，为投资者提供投资{0}行业的便利工具。",
            industry
        )
    } else if let Some(theme) = theme {
        format!(
            "本基金围绕{0}投资主题，精选相关概念股票，把握{0}投资机遇，实现主题投资价值。",
            theme
        )
    } else if name.contains("指数") {
        "本基金采用被动投资策略，通过严格跟踪标的指数，为投资者提供指数化投资工具。".to_string()
    } else {
        "本基金通过投资一篮子股票，实现对相关市场的广泛覆盖，为投资者提供分散化投资选择。".to_string()
    }
}
