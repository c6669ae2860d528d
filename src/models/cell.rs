//! 评估单元与单元组
//!
//! 一个单元 = (功能, 城市, 日期区间, 网站)；一个单元组 = 同一 (功能, 城市, 日期区间) 下的全部网站。

use std::fmt::{self, Display};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 单元标识，字段顺序即排序顺序：功能 → 城市 → 日期区间 → 网站
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey {
    pub feature: String,
    pub city: String,
    pub date_range: String,
    pub website: String,
}

impl CellKey {
    pub fn group(&self) -> GroupKey {
        GroupKey {
            feature: self.feature.clone(),
            city: self.city.clone(),
            date_range: self.date_range.clone(),
        }
    }
}

impl Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.feature, self.city, self.date_range, self.website
        )
    }
}

/// 单元组标识（聚合单位）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub feature: String,
    pub city: String,
    pub date_range: String,
}

impl GroupKey {
    pub fn cell(&self, website: &str) -> CellKey {
        CellKey {
            feature: self.feature.clone(),
            city: self.city.clone(),
            date_range: self.date_range.clone(),
            website: website.to_string(),
        }
    }
}

impl Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.feature, self.city, self.date_range)
    }
}

/// 解析后的入住 / 退房日期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayDates {
    pub checkin: NaiveDate,
    pub checkout: NaiveDate,
}

impl StayDates {
    pub fn checkin_str(&self) -> String {
        self.checkin.format("%Y-%m-%d").to_string()
    }

    pub fn checkout_str(&self) -> String {
        self.checkout.format("%Y-%m-%d").to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Pending,
    Running,
    Succeeded,
    FailedRetryable,
    FailedTerminal,
}

impl CellStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CellStatus::Succeeded | CellStatus::FailedTerminal)
    }
}

/// 评估能力返回的原始结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    pub content: String,
}

impl RawResult {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// 评估单元
///
/// 由矩阵构建器创建，只由持有它的单元执行器修改；进入终态后不再变化。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationCell {
    /// 在矩阵中的序号（从 1 开始，仅用于日志）
    pub index: usize,
    pub key: CellKey,
    pub city_name: String,
    pub website_url: String,
    pub site_instructions: Option<String>,
    pub dates: StayDates,
    pub prompt: String,
    pub status: CellStatus,
    pub attempts: u32,
    pub result: Option<RawResult>,
    pub error: Option<String>,
}

impl EvaluationCell {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 开始新的一次尝试，终态单元返回 false
    pub fn begin_attempt(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.attempts += 1;
        self.status = CellStatus::Running;
        true
    }

    pub fn succeed(&mut self, result: RawResult) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = CellStatus::Succeeded;
        self.result = Some(result);
        self.error = None;
        true
    }

    pub fn fail_retryable(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = CellStatus::FailedRetryable;
        self.error = Some(error.into());
        true
    }

    pub fn fail_terminal(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = CellStatus::FailedTerminal;
        self.result = None;
        self.error = Some(error.into());
        true
    }
}

/// 单元组：同一 (功能, 城市, 日期区间) 的所有网站
#[derive(Debug, Clone)]
pub struct CellGroup {
    pub key: GroupKey,
    pub city_name: String,
    pub dates: StayDates,
    /// 功能检查说明（填充后的功能模板，不含网站包装）
    pub feature_checks: String,
    /// 构建矩阵时启用的网站集合（已排序）
    pub websites: Vec<String>,
    /// 成员单元在矩阵中的下标
    pub members: Vec<usize>,
}

impl CellGroup {
    /// 所有成员都进入终态
    pub fn is_ready(&self, cells: &[EvaluationCell]) -> bool {
        self.members
            .iter()
            .all(|&i| cells.get(i).map(EvaluationCell::is_terminal).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell() -> EvaluationCell {
        EvaluationCell {
            index: 1,
            key: CellKey {
                feature: "f".to_string(),
                city: "tokyo".to_string(),
                date_range: "d".to_string(),
                website: "agoda".to_string(),
            },
            city_name: "Tokyo".to_string(),
            website_url: "https://www.agoda.com".to_string(),
            site_instructions: None,
            dates: StayDates {
                checkin: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
                checkout: NaiveDate::from_ymd_opt(2026, 10, 21).unwrap(),
            },
            prompt: "p".to_string(),
            status: CellStatus::Pending,
            attempts: 0,
            result: None,
            error: None,
        }
    }

    #[test]
    fn test_terminal_cell_is_immutable() {
        let mut c = cell();
        assert!(c.begin_attempt());
        assert!(c.succeed(RawResult::new("ok")));
        assert!(!c.begin_attempt());
        assert!(!c.fail_terminal("late"));
        assert_eq!(c.status, CellStatus::Succeeded);
        assert_eq!(c.attempts, 1);
        assert_eq!(c.result, Some(RawResult::new("ok")));
    }

    #[test]
    fn test_retryable_failure_is_not_terminal() {
        let mut c = cell();
        c.begin_attempt();
        c.fail_retryable("timeout");
        assert!(!c.is_terminal());
        c.begin_attempt();
        assert_eq!(c.attempts, 2);
        assert_eq!(c.status, CellStatus::Running);
    }

    #[test]
    fn test_cell_key_order() {
        let a = cell().key;
        let mut b = a.clone();
        b.website = "booking_com".to_string();
        let mut c = a.clone();
        c.city = "aachen".to_string();
        let mut keys = vec![b.clone(), a.clone(), c.clone()];
        keys.sort();
        assert_eq!(keys, vec![c, a, b]);
    }
}
