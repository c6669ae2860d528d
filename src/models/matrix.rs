//! 测试矩阵定义（配置模型）
//!
//! `MatrixDefinition` 是 TOML 反序列化得到的原始结构，
//! `validate()` 之后得到只读的 `ValidatedMatrix`。
//! 不做任何隐式补全：定义不完整就是配置错误，而不是"跑一部分"。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;

/// 提示词模板允许使用的占位符
pub const PLACEHOLDERS: [&str; 3] = ["destination", "checkin_date", "checkout_date"];

/// 原始矩阵定义
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatrixDefinition {
    /// 启用的各维度（引用下方目录中的键）
    pub matrix: EnabledSets,
    pub websites: BTreeMap<String, WebsiteDef>,
    pub features: BTreeMap<String, FeatureDef>,
    /// 城市键 -> 展示名称（用于提示词中的 {destination}）
    pub cities: BTreeMap<String, String>,
    pub date_ranges: BTreeMap<String, DateRangeDef>,
    pub run: RunOptions,
    #[serde(default)]
    pub prompts: PromptSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnabledSets {
    pub websites: Vec<String>,
    pub features: Vec<String>,
    pub cities: Vec<String>,
    pub date_ranges: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebsiteDef {
    pub url: String,
    /// 站点专属指令，优先级最高
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureDef {
    pub prompt: String,
    /// 针对个别网站覆盖的提示词
    #[serde(default)]
    pub website_prompts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateRangeDef {
    /// 入住日相对运行当天的天数
    pub checkin_offset: i64,
    /// 退房日相对运行当天的天数
    pub checkout_offset: i64,
}

/// 运行参数，除 `narration_timeout` 外全部必填
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunOptions {
    /// 同时执行的单元数量
    pub max_workers: usize,
    /// 每个单元最多尝试次数（含第一次）
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub backoff_initial: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
    /// 单次尝试的超时
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,
    /// 单个单元组对比分析的超时
    #[serde(default = "default_narration_timeout", with = "humantime_serde")]
    pub narration_timeout: Duration,
}

pub const DEFAULT_NARRATION_TIMEOUT: Duration = Duration::from_secs(120);

fn default_narration_timeout() -> Duration {
    DEFAULT_NARRATION_TIMEOUT
}

impl RunOptions {
    /// 第 `attempt` 次失败之后的退避时间（指数增长，封顶 `backoff_max`）
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.backoff_initial
            .checked_mul(1u32 << shift)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidRunOption {
                field: "max_workers",
                reason: "必须至少为 1".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRunOption {
                field: "max_attempts",
                reason: "必须至少为 1".to_string(),
            });
        }
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::InvalidRunOption {
                field: "attempt_timeout",
                reason: "必须大于 0".to_string(),
            });
        }
        if self.narration_timeout.is_zero() {
            return Err(ConfigError::InvalidRunOption {
                field: "narration_timeout",
                reason: "必须大于 0".to_string(),
            });
        }
        if self.backoff_initial > self.backoff_max {
            return Err(ConfigError::InvalidRunOption {
                field: "backoff_initial",
                reason: format!(
                    "{} 大于 backoff_max {}",
                    humantime::format_duration(self.backoff_initial),
                    humantime::format_duration(self.backoff_max)
                ),
            });
        }
        Ok(())
    }
}

/// 评估能力和对比分析使用的系统提示词
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptSettings {
    pub browser_agent_system: Option<String>,
    pub comparison_system: Option<String>,
}

// ========== 校验后的只读结构 ==========

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Website {
    pub key: String,
    pub url: String,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Feature {
    pub key: String,
    prompt: String,
    website_prompts: BTreeMap<String, String>,
}

impl Feature {
    /// 通用提示词模板（不含网站覆盖）
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// 某个网站实际使用的提示词模板
    pub fn template_for(&self, website: &str) -> &str {
        self.website_prompts
            .get(website)
            .map(String::as_str)
            .unwrap_or(&self.prompt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct City {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRangeSpec {
    pub key: String,
    pub checkin_offset: i64,
    pub checkout_offset: i64,
}

/// 校验通过的矩阵配置
///
/// 各维度按键名排序，保证矩阵展开顺序稳定。
#[derive(Debug, Clone)]
pub struct ValidatedMatrix {
    websites: Vec<Website>,
    features: Vec<Feature>,
    cities: Vec<City>,
    date_ranges: Vec<DateRangeSpec>,
    run: RunOptions,
    prompts: PromptSettings,
}

impl ValidatedMatrix {
    pub fn websites(&self) -> &[Website] {
        &self.websites
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn cities(&self) -> &[City] {
        &self.cities
    }

    pub fn date_ranges(&self) -> &[DateRangeSpec] {
        &self.date_ranges
    }

    pub fn run(&self) -> &RunOptions {
        &self.run
    }

    pub fn prompts(&self) -> &PromptSettings {
        &self.prompts
    }

    pub fn website_keys(&self) -> Vec<String> {
        self.websites.iter().map(|w| w.key.clone()).collect()
    }
}

impl MatrixDefinition {
    /// 校验并生成只读矩阵配置
    pub fn validate(&self) -> Result<ValidatedMatrix, ConfigError> {
        self.run.validate()?;

        let website_keys = enabled_keys("网站", &self.matrix.websites, &self.websites)?;
        let feature_keys = enabled_keys("功能", &self.matrix.features, &self.features)?;
        let city_keys = enabled_keys("城市", &self.matrix.cities, &self.cities)?;
        let date_range_keys =
            enabled_keys("日期区间", &self.matrix.date_ranges, &self.date_ranges)?;

        let mut websites = Vec::with_capacity(website_keys.len());
        for key in website_keys {
            let def = &self.websites[&key];
            if def.url.trim().is_empty() {
                return Err(ConfigError::MissingUrl(key));
            }
            websites.push(Website {
                url: def.url.trim().to_string(),
                instructions: def
                    .instructions
                    .as_ref()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                key,
            });
        }

        let mut features = Vec::with_capacity(feature_keys.len());
        for key in feature_keys {
            let def = &self.features[&key];
            check_template(&key, None, &def.prompt)?;
            for (website, template) in &def.website_prompts {
                if !self.websites.contains_key(website) {
                    return Err(ConfigError::UnknownReference {
                        kind: "网站",
                        key: website.clone(),
                    });
                }
                check_template(&key, Some(website), template)?;
            }
            features.push(Feature {
                prompt: def.prompt.clone(),
                website_prompts: def.website_prompts.clone(),
                key,
            });
        }

        let mut cities = Vec::with_capacity(city_keys.len());
        for key in city_keys {
            let name = self.cities[&key].trim();
            if name.is_empty() {
                return Err(ConfigError::UnknownReference { kind: "城市", key });
            }
            cities.push(City {
                name: name.to_string(),
                key,
            });
        }

        let date_ranges = date_range_keys
            .into_iter()
            .map(|key| {
                let def = self.date_ranges[&key];
                DateRangeSpec {
                    key,
                    checkin_offset: def.checkin_offset,
                    checkout_offset: def.checkout_offset,
                }
            })
            .collect();

        Ok(ValidatedMatrix {
            websites,
            features,
            cities,
            date_ranges,
            run: self.run.clone(),
            prompts: self.prompts.clone(),
        })
    }
}

/// 校验启用列表：非空、无重复、键名合法、都在目录中定义过。返回排序后的键
fn enabled_keys<V>(
    kind: &'static str,
    enabled: &[String],
    catalog: &BTreeMap<String, V>,
) -> Result<Vec<String>, ConfigError> {
    if enabled.is_empty() {
        return Err(ConfigError::EmptyDimension(kind));
    }

    let mut seen = BTreeSet::new();
    for key in enabled {
        if !is_valid_key(key) {
            return Err(ConfigError::InvalidKey {
                kind,
                key: key.clone(),
            });
        }
        if !catalog.contains_key(key) {
            return Err(ConfigError::UnknownReference {
                kind,
                key: key.clone(),
            });
        }
        if !seen.insert(key.clone()) {
            return Err(ConfigError::DuplicateReference {
                kind,
                key: key.clone(),
            });
        }
    }

    Ok(seen.into_iter().collect())
}

fn is_valid_key(key: &str) -> bool {
    static KEY: OnceLock<Regex> = OnceLock::new();
    KEY.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"))
        .is_match(key)
}

/// `{{` / `}}` 为转义花括号，`{name}` 为占位符
fn template_regex() -> &'static Regex {
    static TEMPLATE: OnceLock<Regex> = OnceLock::new();
    TEMPLATE.get_or_init(|| Regex::new(r"\{\{|\}\}|\{([^{}]*)\}").expect("static regex"))
}

fn check_template(feature: &str, website: Option<&str>, template: &str) -> Result<(), ConfigError> {
    if template.trim().is_empty() {
        return Err(ConfigError::EmptyPrompt {
            feature: feature.to_string(),
            website: website.map(str::to_string),
        });
    }

    for caps in template_regex().captures_iter(template) {
        if let Some(name) = caps.get(1) {
            if !PLACEHOLDERS.contains(&name.as_str()) {
                return Err(ConfigError::UnknownPlaceholder {
                    feature: feature.to_string(),
                    name: name.as_str().to_string(),
                });
            }
        }
    }
    Ok(())
}

/// 填充提示词模板
///
/// 模板已在校验阶段检查过占位符，这里遇到未知名称时原样保留。
pub fn render_template(template: &str, destination: &str, checkin: &str, checkout: &str) -> String {
    template_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| match caps.get(1) {
            None if &caps[0] == "{{" => "{".to_string(),
            None => "}".to_string(),
            Some(name) => match name.as_str() {
                "destination" => destination.to_string(),
                "checkin_date" => checkin.to_string(),
                "checkout_date" => checkout.to_string(),
                _ => caps[0].to_string(),
            },
        })
        .into_owned()
}
