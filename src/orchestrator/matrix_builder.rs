//! 测试矩阵构建器 - 编排层
//!
//! 把校验过的矩阵配置展开成 功能 × 城市 × 日期区间 × 网站 的单元列表，
//! 并按 (功能, 城市, 日期区间) 分组。纯函数，不做任何 I/O。

use chrono::{Days, NaiveDate};

use crate::error::ConfigError;
use crate::models::matrix::{render_template, DateRangeSpec};
use crate::models::{CellGroup, CellKey, CellStatus, EvaluationCell, GroupKey, StayDates, ValidatedMatrix};

/// 展开后的矩阵
#[derive(Debug, Clone)]
pub struct Matrix {
    /// 顺序：功能 → 城市 → 日期区间 → 网站
    pub cells: Vec<EvaluationCell>,
    pub groups: Vec<CellGroup>,
}

/// 以 `today` 为基准解析日期偏移
pub fn resolve_dates(spec: &DateRangeSpec, today: NaiveDate) -> Result<StayDates, ConfigError> {
    let unresolvable = || ConfigError::UnresolvableDateRange {
        key: spec.key.clone(),
        checkin_offset: spec.checkin_offset,
        checkout_offset: spec.checkout_offset,
    };

    if spec.checkin_offset < 0 || spec.checkout_offset <= spec.checkin_offset {
        return Err(unresolvable());
    }
    let checkin = today
        .checked_add_days(Days::new(spec.checkin_offset as u64))
        .ok_or_else(unresolvable)?;
    let checkout = today
        .checked_add_days(Days::new(spec.checkout_offset as u64))
        .ok_or_else(unresolvable)?;

    Ok(StayDates { checkin, checkout })
}

/// 每个网站实际收到的提示词
fn wrap_prompt(url: &str, rendered: &str) -> String {
    format!("Navigate to {} and execute the following:\n{}", url, rendered)
}

pub fn build_matrix(matrix: &ValidatedMatrix, today: NaiveDate) -> Result<Matrix, ConfigError> {
    let dates = matrix
        .date_ranges()
        .iter()
        .map(|spec| resolve_dates(spec, today))
        .collect::<Result<Vec<_>, _>>()?;

    let websites = matrix.website_keys();
    let mut cells = Vec::new();
    let mut groups = Vec::new();

    for feature in matrix.features() {
        for city in matrix.cities() {
            for (range, stay) in matrix.date_ranges().iter().zip(&dates) {
                let checkin = stay.checkin_str();
                let checkout = stay.checkout_str();
                let key = GroupKey {
                    feature: feature.key.clone(),
                    city: city.key.clone(),
                    date_range: range.key.clone(),
                };
                let mut members = Vec::with_capacity(websites.len());

                for website in matrix.websites() {
                    let rendered = render_template(
                        feature.template_for(&website.key),
                        &city.name,
                        &checkin,
                        &checkout,
                    );
                    members.push(cells.len());
                    cells.push(EvaluationCell {
                        index: cells.len() + 1,
                        key: CellKey {
                            feature: feature.key.clone(),
                            city: city.key.clone(),
                            date_range: range.key.clone(),
                            website: website.key.clone(),
                        },
                        city_name: city.name.clone(),
                        website_url: website.url.clone(),
                        site_instructions: website.instructions.clone(),
                        dates: *stay,
                        prompt: wrap_prompt(&website.url, &rendered),
                        status: CellStatus::Pending,
                        attempts: 0,
                        result: None,
                        error: None,
                    });
                }

                groups.push(CellGroup {
                    key,
                    city_name: city.name.clone(),
                    dates: *stay,
                    feature_checks: render_template(feature.prompt(), &city.name, &checkin, &checkout),
                    websites: websites.clone(),
                    members,
                });
            }
        }
    }

    Ok(Matrix { cells, groups })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::matrix::tests::sample_definition;
    use pretty_assertions::assert_eq;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn test_cell_count_is_product_of_dimensions() {
        let mut def = sample_definition();
        def.matrix.cities.push("london".to_string());
        def.matrix.websites.push("agoda".to_string());
        let matrix = build_matrix(&def.validate().unwrap(), today()).unwrap();

        assert_eq!(matrix.cells.len(), 2 * 3);
        assert_eq!(matrix.groups.len(), 2);
        assert!(matrix.groups.iter().all(|g| g.members.len() == 3));
        assert!(matrix.cells.iter().all(|c| c.status == CellStatus::Pending));
    }

    #[test]
    fn test_cells_are_ordered_and_grouped() {
        let mut def = sample_definition();
        def.matrix.cities.push("london".to_string());
        let matrix = build_matrix(&def.validate().unwrap(), today()).unwrap();

        let keys: Vec<String> = matrix.cells.iter().map(|c| c.key.to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "relevance_of_top_listings/london/next_day_one_night/booking_com",
                "relevance_of_top_listings/london/next_day_one_night/google_travel",
                "relevance_of_top_listings/tokyo/next_day_one_night/booking_com",
                "relevance_of_top_listings/tokyo/next_day_one_night/google_travel",
            ]
        );
        for group in &matrix.groups {
            for &member in &group.members {
                assert_eq!(matrix.cells[member].key.group(), group.key);
            }
        }
        assert_eq!(matrix.cells[3].index, 4);
    }

    #[test]
    fn test_prompt_is_rendered_per_website() {
        let matrix = build_matrix(&sample_definition().validate().unwrap(), today()).unwrap();

        let booking = &matrix.cells[0];
        assert_eq!(
            booking.prompt,
            "Navigate to https://www.booking.com and execute the following:\n\
             Use the list view. Search Tokyo for 2026-10-20 - 2026-10-21."
        );
        let google = &matrix.cells[1];
        assert!(google.prompt.ends_with(
            "Search hotels in Tokyo from 2026-10-20 to 2026-10-21. Reply with {\"score\": 7}."
        ));
        assert_eq!(
            matrix.groups[0].feature_checks,
            "Search hotels in Tokyo from 2026-10-20 to 2026-10-21. Reply with {\"score\": 7}."
        );
    }

    #[test]
    fn test_unresolvable_date_range() {
        let spec = DateRangeSpec {
            key: "backwards".to_string(),
            checkin_offset: 3,
            checkout_offset: 3,
        };
        assert!(matches!(
            resolve_dates(&spec, today()),
            Err(ConfigError::UnresolvableDateRange { .. })
        ));

        let past = DateRangeSpec {
            key: "past".to_string(),
            checkin_offset: -1,
            checkout_offset: 1,
        };
        assert!(resolve_dates(&past, today()).is_err());
    }

    #[test]
    fn test_dates_cross_month_boundary() {
        let spec = DateRangeSpec {
            key: "weekend".to_string(),
            checkin_offset: 12,
            checkout_offset: 14,
        };
        let stay = resolve_dates(&spec, today()).unwrap();
        assert_eq!(stay.checkin_str(), "2026-10-31");
        assert_eq!(stay.checkout_str(), "2026-11-02");
    }
}
